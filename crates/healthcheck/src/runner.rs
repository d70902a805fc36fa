//! Sequential execution of the check list.

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::api::{SelfCheckResponse, SubsystemStatus};
use crate::checks::{Check, CheckAction, CheckResult, HealthChecker, RETRY_WINDOW};
use crate::error::Error;
use crate::session::SessionContext;

impl HealthChecker {
    /// Run every configured check in order, delivering each result to the
    /// observer as it is produced. A failing check marked fatal skips all
    /// remaining checks.
    ///
    /// Returns `true` iff every executed check (and every reported
    /// sub-result) succeeded.
    pub async fn run_checks(&mut self, observer: &mut dyn FnMut(&CheckResult)) -> bool {
        let mut success = true;

        for check in &self.checks {
            debug!(category = check.category, description = %check.description, "Running check");
            let passed = match &check.action {
                CheckAction::Simple(run) => {
                    run_simple(&mut self.session, check, run.as_ref(), observer).await
                }
                CheckAction::RemoteSelfCheck(run) => {
                    run_self_check(&mut self.session, check, run.as_ref(), observer).await
                }
            };

            if !passed {
                success = false;
                if check.fatal {
                    break;
                }
            }
        }

        success
    }
}

/// Invoke a simple check, retrying on failure until the check's deadline.
/// Each failed attempt before the deadline is reported with `retry: true`;
/// exactly one terminal result follows.
async fn run_simple(
    session: &mut SessionContext,
    check: &Check,
    run: &(dyn for<'a> Fn(
        &'a mut SessionContext,
    ) -> futures::future::BoxFuture<'a, Result<(), Error>>
          + Send
          + Sync),
    observer: &mut dyn FnMut(&CheckResult),
) -> bool {
    loop {
        let error = run(session).await.err();
        let failed = error.is_some();

        if failed {
            if let Some(deadline) = check.retry_deadline {
                if Instant::now() < deadline {
                    observer(&CheckResult {
                        category: check.category.to_string(),
                        description: check.description.clone(),
                        retry: true,
                        error,
                    });
                    sleep(RETRY_WINDOW).await;
                    continue;
                }
            }
        }

        observer(&CheckResult {
            category: check.category.to_string(),
            description: check.description.clone(),
            retry: false,
            error,
        });
        return !failed;
    }
}

/// Invoke a self-check RPC once, then expand its sub-results in response
/// order. Expansion stops at the first failing sub-result; results already
/// delivered stay delivered.
async fn run_self_check(
    session: &mut SessionContext,
    check: &Check,
    run: &(dyn for<'a> Fn(
        &'a mut SessionContext,
    ) -> futures::future::BoxFuture<'a, Result<SelfCheckResponse, Error>>
          + Send
          + Sync),
    observer: &mut dyn FnMut(&CheckResult),
) -> bool {
    let response = run(session).await;

    let (response, error) = match response {
        Ok(response) => (Some(response), None),
        Err(err) => (None, Some(err)),
    };
    observer(&CheckResult {
        category: check.category.to_string(),
        description: check.description.clone(),
        retry: false,
        error,
    });
    let Some(response) = response else {
        return false;
    };

    for sub in &response.results {
        let error = match sub.status {
            SubsystemStatus::Ok => None,
            SubsystemStatus::Fail => Some(Error::failed(sub.friendly_message.clone())),
        };
        let failed = error.is_some();
        observer(&CheckResult {
            category: format!("{}[{}]", check.category, sub.subsystem_name),
            description: sub.check_description.clone(),
            retry: false,
            error,
        });
        if failed {
            return false;
        }
    }

    true
}
