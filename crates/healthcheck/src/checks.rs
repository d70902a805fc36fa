//! Check descriptors and the builder that expands requested categories into
//! an ordered check list.

use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::api::{ApiClient, SelfCheckResponse};
use crate::error::Error;
use crate::k8s::KubeApi;
use crate::permissions;
use crate::session::SessionContext;
use crate::validate::{
    validate_control_plane_pods, validate_data_plane_pod_reporting, validate_data_plane_pods,
};
use crate::version::{self, USER_AGENT};

pub const KUBERNETES_API_CATEGORY: &str = "kubernetes-api";
pub const PRE_INSTALL_CATEGORY: &str = "kubernetes-setup";
pub const DATA_PLANE_CATEGORY: &str = "lattice-data-plane";
pub const API_CATEGORY: &str = "lattice-api";
pub const VERSION_CATEGORY: &str = "lattice-version";

/// Interval slept between attempts of a check that carries a retry deadline.
pub(crate) const RETRY_WINDOW: Duration = Duration::from_secs(5);

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Categories of checks a caller can request.
///
/// Expansion is order-dependent: the builder does not enforce ordering with
/// types, so callers must request categories in an order that satisfies each
/// category's documented dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckCategory {
    /// Validates that the caller can reach a working Kubernetes cluster and,
    /// unless disabled, that the cluster meets the minimum version. Every
    /// other category depends on these checks, so they must come first.
    KubernetesApi,
    /// Validates that the control plane can be installed: the target
    /// namespace is absent and the caller holds the required creation
    /// permissions. Depends on [`CheckCategory::KubernetesApi`].
    PreInstall,
    /// Validates that injected proxies are ready and visible in the metrics
    /// store. Depends on [`CheckCategory::KubernetesApi`] and
    /// [`CheckCategory::Api`].
    DataPlane,
    /// Validates that the control-plane namespace exists and its API is
    /// serving. Depends on [`CheckCategory::KubernetesApi`].
    Api,
    /// Validates that the CLI, control plane, and data plane run the latest
    /// released version. Depends on [`CheckCategory::Api`] unless the
    /// control-plane and data-plane version options are off.
    Version,
}

/// A plain check: validate (and possibly populate) session state.
pub type SimpleCheckFn =
    Box<dyn for<'a> Fn(&'a mut SessionContext) -> BoxFuture<'a, Result<(), Error>> + Send + Sync>;

/// A check whose single RPC expands into independently reported sub-results.
pub type SelfCheckFn = Box<
    dyn for<'a> Fn(&'a mut SessionContext) -> BoxFuture<'a, Result<SelfCheckResponse, Error>>
        + Send
        + Sync,
>;

/// What a check does when invoked. Exactly one variant by construction.
pub(crate) enum CheckAction {
    Simple(SimpleCheckFn),
    RemoteSelfCheck(SelfCheckFn),
}

pub(crate) struct Check {
    pub(crate) category: &'static str,
    pub(crate) description: String,
    pub(crate) fatal: bool,
    pub(crate) retry_deadline: Option<Instant>,
    pub(crate) action: CheckAction,
}

/// The outcome of one check, or one sub-result of a self-check expansion.
/// Delivered to the observer immediately; never retained by the engine.
#[derive(Debug)]
pub struct CheckResult {
    pub category: String,
    pub description: String,
    /// True for intermediate failures that will be retried before the
    /// check's deadline.
    pub retry: bool,
    pub error: Option<Error>,
}

/// Configuration for a run.
#[derive(Debug, Clone)]
pub struct HealthCheckOptions {
    /// Namespace the control plane runs in (or will be installed into).
    pub control_plane_namespace: String,
    /// Namespace to scope data-plane checks to; empty means all namespaces.
    pub data_plane_namespace: String,
    /// Explicit kubeconfig path; `None` infers from the environment.
    pub kubeconfig: Option<PathBuf>,
    /// Direct address of the controller API, bypassing discovery.
    pub api_addr: String,
    /// Treat this as the latest version instead of asking the version service.
    pub version_override: String,
    /// Absolute deadline until which readiness checks keep retrying.
    /// `None` means failing checks are terminal on the first attempt.
    pub retry_deadline: Option<Instant>,
    pub should_check_kube_version: bool,
    pub should_check_control_plane_version: bool,
    pub should_check_data_plane_version: bool,
    /// Probe namespaced Roles instead of ClusterRoles before installing.
    pub single_namespace: bool,
    /// Version-check endpoint; overridable for tests.
    pub version_check_url: String,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            control_plane_namespace: "lattice".to_string(),
            data_plane_namespace: String::new(),
            kubeconfig: None,
            api_addr: String::new(),
            version_override: String::new(),
            retry_deadline: None,
            should_check_kube_version: true,
            should_check_control_plane_version: false,
            should_check_data_plane_version: false,
            single_namespace: false,
            version_check_url: version::DEFAULT_VERSION_CHECK_URL.to_string(),
        }
    }
}

/// Builds and runs an ordered list of diagnostic checks.
pub struct HealthChecker {
    pub(crate) checks: Vec<Check>,
    pub(crate) options: HealthCheckOptions,
    pub(crate) session: SessionContext,
}

impl HealthChecker {
    /// Expand the requested categories, in order, into the check list.
    #[must_use]
    pub fn new(categories: &[CheckCategory], options: HealthCheckOptions) -> Self {
        let mut checker = Self {
            checks: Vec::new(),
            options,
            session: SessionContext::default(),
        };
        for category in categories {
            match category {
                CheckCategory::KubernetesApi => checker.add_kubernetes_api_checks(),
                CheckCategory::PreInstall => checker.add_pre_install_checks(),
                CheckCategory::DataPlane => checker.add_data_plane_checks(),
                CheckCategory::Api => checker.add_api_checks(),
                CheckCategory::Version => checker.add_version_checks(),
            }
        }
        checker
    }

    /// Append an arbitrary check: non-fatal, no retry deadline. Intended for
    /// tests; production callers should request categories instead.
    pub fn add_check(
        &mut self,
        category: &'static str,
        description: impl Into<String>,
        check: SimpleCheckFn,
    ) {
        self.checks.push(Check {
            category,
            description: description.into(),
            fatal: false,
            retry_deadline: None,
            action: CheckAction::Simple(check),
        });
    }

    /// The control-plane API client discovered during the run, if the
    /// lattice-api checks were requested and ran successfully.
    #[must_use]
    pub fn api_client(&self) -> Option<&ApiClient> {
        self.session.api_client.as_ref()
    }

    fn add_kubernetes_api_checks(&mut self) {
        let kubeconfig = self.options.kubeconfig.clone();
        self.checks.push(Check {
            category: KUBERNETES_API_CATEGORY,
            description: "can initialize the client".to_string(),
            fatal: true,
            retry_deadline: None,
            action: CheckAction::Simple(Box::new(move |ctx| {
                let kubeconfig = kubeconfig.clone();
                Box::pin(async move {
                    ctx.kube_api = Some(KubeApi::new(kubeconfig.as_deref()).await?);
                    ctx.http = Some(
                        reqwest::Client::builder()
                            .user_agent(USER_AGENT)
                            .timeout(Duration::from_secs(30))
                            .build()?,
                    );
                    Ok(())
                })
            })),
        });

        self.checks.push(Check {
            category: KUBERNETES_API_CATEGORY,
            description: "can query the Kubernetes API".to_string(),
            fatal: true,
            retry_deadline: None,
            action: CheckAction::Simple(Box::new(|ctx| {
                Box::pin(async move {
                    let api = ctx.kube_api()?.clone();
                    ctx.kube_version = Some(api.version_info().await?);
                    Ok(())
                })
            })),
        });

        if self.options.should_check_kube_version {
            self.checks.push(Check {
                category: KUBERNETES_API_CATEGORY,
                description: "is running the minimum Kubernetes API version".to_string(),
                fatal: false,
                retry_deadline: None,
                action: CheckAction::Simple(Box::new(|ctx| {
                    Box::pin(async move { KubeApi::check_version(ctx.kube_version()?) })
                })),
            });
        }
    }

    fn add_pre_install_checks(&mut self) {
        let namespace = self.options.control_plane_namespace.clone();
        self.checks.push(Check {
            category: PRE_INSTALL_CATEGORY,
            description: "control plane namespace does not already exist".to_string(),
            fatal: false,
            retry_deadline: None,
            action: CheckAction::Simple(Box::new(move |ctx| {
                let namespace = namespace.clone();
                Box::pin(async move {
                    let api = ctx.kube_api()?.clone();
                    if api.namespace_exists(&namespace).await? {
                        return Err(Error::failed(format!(
                            "the \"{namespace}\" namespace already exists"
                        )));
                    }
                    Ok(())
                })
            })),
        });

        self.add_can_create_check("can create Namespaces", String::new(), "", "v1", "namespaces");

        if self.options.single_namespace {
            self.add_can_create_check("can create Roles", String::new(), RBAC_GROUP, "v1", "roles");
            self.add_can_create_check(
                "can create RoleBindings",
                String::new(),
                RBAC_GROUP,
                "v1",
                "rolebindings",
            );
        } else {
            self.add_can_create_check(
                "can create ClusterRoles",
                String::new(),
                RBAC_GROUP,
                "v1",
                "clusterroles",
            );
            self.add_can_create_check(
                "can create ClusterRoleBindings",
                String::new(),
                RBAC_GROUP,
                "v1",
                "clusterrolebindings",
            );
        }

        let namespace = self.options.control_plane_namespace.clone();
        self.add_can_create_check(
            "can create ServiceAccounts",
            namespace.clone(),
            "",
            "v1",
            "serviceaccounts",
        );
        self.add_can_create_check("can create Services", namespace.clone(), "", "v1", "services");
        self.add_can_create_check(
            "can create Deployments",
            namespace.clone(),
            "apps",
            "v1",
            "deployments",
        );
        self.add_can_create_check("can create ConfigMaps", namespace, "", "v1", "configmaps");
    }

    fn add_can_create_check(
        &mut self,
        description: &str,
        namespace: String,
        group: &'static str,
        version: &'static str,
        resource: &'static str,
    ) {
        self.checks.push(Check {
            category: PRE_INSTALL_CATEGORY,
            description: description.to_string(),
            fatal: true,
            retry_deadline: None,
            action: CheckAction::Simple(Box::new(move |ctx| {
                let namespace = namespace.clone();
                Box::pin(async move {
                    permissions::can_create(ctx, &namespace, group, version, resource).await
                })
            })),
        });
    }

    fn add_api_checks(&mut self) {
        self.checks.push(Check {
            category: API_CATEGORY,
            description: "control plane namespace exists".to_string(),
            fatal: true,
            retry_deadline: None,
            action: namespace_exists_check(self.options.control_plane_namespace.clone()),
        });

        let namespace = self.options.control_plane_namespace.clone();
        self.checks.push(Check {
            category: API_CATEGORY,
            description: "control plane pods are ready".to_string(),
            fatal: true,
            retry_deadline: self.options.retry_deadline,
            action: CheckAction::Simple(Box::new(move |ctx| {
                let namespace = namespace.clone();
                Box::pin(async move {
                    let api = ctx.kube_api()?.clone();
                    ctx.control_plane_pods = api.pods_in_namespace(&namespace).await?;
                    validate_control_plane_pods(&ctx.control_plane_pods)
                })
            })),
        });

        let api_addr = self.options.api_addr.clone();
        let namespace = self.options.control_plane_namespace.clone();
        self.checks.push(Check {
            category: API_CATEGORY,
            description: "can initialize the client".to_string(),
            fatal: true,
            retry_deadline: None,
            action: CheckAction::Simple(Box::new(move |ctx| {
                let api_addr = api_addr.clone();
                let namespace = namespace.clone();
                Box::pin(async move {
                    let client = if api_addr.is_empty() {
                        ApiClient::proxied(ctx.kube_api()?, &namespace)
                    } else {
                        ApiClient::direct(&api_addr)?
                    };
                    ctx.api_client = Some(client);
                    Ok(())
                })
            })),
        });

        self.checks.push(Check {
            category: API_CATEGORY,
            description: "can query the Lattice API".to_string(),
            fatal: true,
            retry_deadline: None,
            action: CheckAction::RemoteSelfCheck(Box::new(|ctx| {
                Box::pin(async move { ctx.api_client()?.self_check().await })
            })),
        });
    }

    fn add_data_plane_checks(&mut self) {
        if !self.options.data_plane_namespace.is_empty() {
            self.checks.push(Check {
                category: DATA_PLANE_CATEGORY,
                description: "data plane namespace exists".to_string(),
                fatal: true,
                retry_deadline: None,
                action: namespace_exists_check(self.options.data_plane_namespace.clone()),
            });
        }

        let control_plane_namespace = self.options.control_plane_namespace.clone();
        let namespace = self.options.data_plane_namespace.clone();
        self.checks.push(Check {
            category: DATA_PLANE_CATEGORY,
            description: "data plane proxies are ready".to_string(),
            fatal: true,
            retry_deadline: self.options.retry_deadline,
            action: CheckAction::Simple(Box::new(move |ctx| {
                let control_plane_namespace = control_plane_namespace.clone();
                let namespace = namespace.clone();
                Box::pin(async move {
                    let api = ctx.kube_api()?.clone();
                    ctx.data_plane_pods =
                        api.meshed_pods(&control_plane_namespace, &namespace).await?;
                    validate_data_plane_pods(&ctx.data_plane_pods, &namespace)
                })
            })),
        });

        let namespace = self.options.data_plane_namespace.clone();
        self.checks.push(Check {
            category: DATA_PLANE_CATEGORY,
            description: "data plane proxy metrics are present in the metrics store".to_string(),
            fatal: false,
            retry_deadline: self.options.retry_deadline,
            action: CheckAction::Simple(Box::new(move |ctx| {
                let namespace = namespace.clone();
                Box::pin(async move {
                    let client = ctx.api_client()?.clone();
                    let reported = client.list_pods(&namespace).await?;
                    validate_data_plane_pod_reporting(&ctx.data_plane_pods, &reported)
                })
            })),
        });
    }

    fn add_version_checks(&mut self) {
        let version_override = self.options.version_override.clone();
        let version_check_url = self.options.version_check_url.clone();
        self.checks.push(Check {
            category: VERSION_CATEGORY,
            description: "can determine the latest version".to_string(),
            fatal: true,
            retry_deadline: None,
            action: CheckAction::Simple(Box::new(move |ctx| {
                let version_override = version_override.clone();
                let version_check_url = version_check_url.clone();
                Box::pin(async move {
                    if !version_override.is_empty() {
                        ctx.latest_version = Some(version_override);
                        return Ok(());
                    }
                    // The installation id is only known to the web process;
                    // it is read off the pod discovered by the API checks.
                    let uuid = version::install_uuid(&ctx.control_plane_pods);
                    let http = ctx.http()?.clone();
                    let latest =
                        version::latest_version(&http, &version_check_url, &uuid, version::CLI_CHANNEL)
                            .await?;
                    ctx.latest_version = Some(latest);
                    Ok(())
                })
            })),
        });

        self.checks.push(Check {
            category: VERSION_CATEGORY,
            description: "cli is up-to-date".to_string(),
            fatal: false,
            retry_deadline: None,
            action: CheckAction::Simple(Box::new(|ctx| {
                Box::pin(async move { version::check_client_version(ctx.latest_version()?) })
            })),
        });

        if self.options.should_check_control_plane_version {
            self.checks.push(Check {
                category: VERSION_CATEGORY,
                description: "control plane is up-to-date".to_string(),
                fatal: false,
                retry_deadline: None,
                action: CheckAction::Simple(Box::new(|ctx| {
                    Box::pin(async move {
                        let client = ctx.api_client()?.clone();
                        let latest = ctx.latest_version()?.to_string();
                        version::check_server_version(&client, &latest).await
                    })
                })),
            });
        }

        if self.options.should_check_data_plane_version {
            self.checks.push(Check {
                category: VERSION_CATEGORY,
                description: "data plane is up-to-date".to_string(),
                fatal: false,
                retry_deadline: None,
                action: CheckAction::Simple(Box::new(|ctx| {
                    Box::pin(async move {
                        KubeApi::check_proxy_versions(&ctx.data_plane_pods, ctx.latest_version()?)
                    })
                })),
            });
        }
    }
}

fn namespace_exists_check(namespace: String) -> CheckAction {
    CheckAction::Simple(Box::new(move |ctx| {
        let namespace = namespace.clone();
        Box::pin(async move {
            let api = ctx.kube_api()?.clone();
            if !api.namespace_exists(&namespace).await? {
                return Err(Error::failed(format!(
                    "the \"{namespace}\" namespace does not exist"
                )));
            }
            Ok(())
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summaries(checker: &HealthChecker) -> Vec<(&'static str, String, bool)> {
        checker
            .checks
            .iter()
            .map(|c| (c.category, c.description.clone(), c.fatal))
            .collect()
    }

    #[test]
    fn test_kubernetes_api_checks() {
        let checker = HealthChecker::new(
            &[CheckCategory::KubernetesApi],
            HealthCheckOptions::default(),
        );
        assert_eq!(
            summaries(&checker),
            vec![
                (KUBERNETES_API_CATEGORY, "can initialize the client".to_string(), true),
                (KUBERNETES_API_CATEGORY, "can query the Kubernetes API".to_string(), true),
                (
                    KUBERNETES_API_CATEGORY,
                    "is running the minimum Kubernetes API version".to_string(),
                    false
                ),
            ]
        );
    }

    #[test]
    fn test_kube_version_check_gated_by_option() {
        let options = HealthCheckOptions {
            should_check_kube_version: false,
            ..HealthCheckOptions::default()
        };
        let checker = HealthChecker::new(&[CheckCategory::KubernetesApi], options);
        assert_eq!(checker.checks.len(), 2);
    }

    #[test]
    fn test_pre_install_cluster_wide() {
        let checker =
            HealthChecker::new(&[CheckCategory::PreInstall], HealthCheckOptions::default());
        let descriptions: Vec<String> =
            checker.checks.iter().map(|c| c.description.clone()).collect();
        assert_eq!(
            descriptions,
            vec![
                "control plane namespace does not already exist",
                "can create Namespaces",
                "can create ClusterRoles",
                "can create ClusterRoleBindings",
                "can create ServiceAccounts",
                "can create Services",
                "can create Deployments",
                "can create ConfigMaps",
            ]
        );
        // Only the namespace-absent probe is advisory.
        assert!(!checker.checks[0].fatal);
        assert!(checker.checks[1..].iter().all(|c| c.fatal));
    }

    #[test]
    fn test_pre_install_single_namespace_uses_roles() {
        let options = HealthCheckOptions {
            single_namespace: true,
            ..HealthCheckOptions::default()
        };
        let checker = HealthChecker::new(&[CheckCategory::PreInstall], options);
        let descriptions: Vec<String> =
            checker.checks.iter().map(|c| c.description.clone()).collect();
        assert!(descriptions.contains(&"can create Roles".to_string()));
        assert!(descriptions.contains(&"can create RoleBindings".to_string()));
        assert!(!descriptions.contains(&"can create ClusterRoles".to_string()));
    }

    #[test]
    fn test_api_checks_end_with_self_check() {
        let options = HealthCheckOptions {
            retry_deadline: Some(Instant::now() + Duration::from_secs(60)),
            ..HealthCheckOptions::default()
        };
        let checker = HealthChecker::new(&[CheckCategory::Api], options);
        assert_eq!(
            summaries(&checker),
            vec![
                (API_CATEGORY, "control plane namespace exists".to_string(), true),
                (API_CATEGORY, "control plane pods are ready".to_string(), true),
                (API_CATEGORY, "can initialize the client".to_string(), true),
                (API_CATEGORY, "can query the Lattice API".to_string(), true),
            ]
        );
        // The pod-readiness check polls until the run deadline; the others
        // fail on first attempt.
        assert!(checker.checks[1].retry_deadline.is_some());
        assert!(checker.checks[0].retry_deadline.is_none());
        assert!(matches!(checker.checks[3].action, CheckAction::RemoteSelfCheck(_)));
    }

    #[test]
    fn test_data_plane_checks_with_namespace() {
        let options = HealthCheckOptions {
            data_plane_namespace: "books".to_string(),
            retry_deadline: Some(Instant::now() + Duration::from_secs(60)),
            ..HealthCheckOptions::default()
        };
        let checker = HealthChecker::new(&[CheckCategory::DataPlane], options);
        assert_eq!(
            summaries(&checker),
            vec![
                (DATA_PLANE_CATEGORY, "data plane namespace exists".to_string(), true),
                (DATA_PLANE_CATEGORY, "data plane proxies are ready".to_string(), true),
                (
                    DATA_PLANE_CATEGORY,
                    "data plane proxy metrics are present in the metrics store".to_string(),
                    false
                ),
            ]
        );
        assert!(checker.checks[1].retry_deadline.is_some());
        assert!(checker.checks[2].retry_deadline.is_some());
    }

    #[test]
    fn test_data_plane_checks_all_namespaces() {
        let checker =
            HealthChecker::new(&[CheckCategory::DataPlane], HealthCheckOptions::default());
        // No namespace-exists probe when scanning every namespace.
        assert_eq!(checker.checks.len(), 2);
        assert_eq!(checker.checks[0].description, "data plane proxies are ready");
    }

    #[test]
    fn test_version_checks_gated_by_options() {
        let checker =
            HealthChecker::new(&[CheckCategory::Version], HealthCheckOptions::default());
        assert_eq!(checker.checks.len(), 2);

        let options = HealthCheckOptions {
            should_check_control_plane_version: true,
            should_check_data_plane_version: true,
            ..HealthCheckOptions::default()
        };
        let checker = HealthChecker::new(&[CheckCategory::Version], options);
        let descriptions: Vec<String> =
            checker.checks.iter().map(|c| c.description.clone()).collect();
        assert_eq!(
            descriptions,
            vec![
                "can determine the latest version",
                "cli is up-to-date",
                "control plane is up-to-date",
                "data plane is up-to-date",
            ]
        );
        assert!(checker.checks[0].fatal);
        assert!(checker.checks[1..].iter().all(|c| !c.fatal));
    }

    #[test]
    fn test_categories_expand_in_request_order() {
        let checker = HealthChecker::new(
            &[CheckCategory::KubernetesApi, CheckCategory::Api, CheckCategory::Version],
            HealthCheckOptions::default(),
        );
        let categories: Vec<&str> = checker.checks.iter().map(|c| c.category).collect();
        let first_api = categories.iter().position(|c| *c == API_CATEGORY).unwrap();
        let first_version = categories.iter().position(|c| *c == VERSION_CATEGORY).unwrap();
        assert_eq!(categories[0], KUBERNETES_API_CATEGORY);
        assert!(first_api < first_version);
    }

    #[test]
    fn test_add_check_is_non_fatal_with_no_deadline() {
        let mut checker = HealthChecker::new(&[], HealthCheckOptions::default());
        checker.add_check("test", "ad-hoc", Box::new(|_| Box::pin(async { Ok(()) })));
        assert_eq!(checker.checks.len(), 1);
        assert!(!checker.checks[0].fatal);
        assert!(checker.checks[0].retry_deadline.is_none());
    }
}
