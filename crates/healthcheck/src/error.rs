//! Error types for the healthcheck engine.

use thiserror::Error;

/// Errors produced by checks and the collaborator clients they drive.
///
/// Every failure surfaces as an `Error` attached to a
/// [`CheckResult`](crate::CheckResult); the engine never panics on a failed
/// check.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to load the kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("failed to infer the Kubernetes configuration: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error("failed to decode the response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("timed out querying the Lattice API")]
    ApiTimeout,

    /// A check ran to completion and decided the cluster is not in the
    /// expected state. The message is shown to the user verbatim.
    #[error("{0}")]
    Failed(String),

    /// A check read a `SessionContext` field that no earlier check populated.
    /// Categories were requested in the wrong order.
    #[error("{what} is not available yet; an earlier check must populate it")]
    Uninitialized { what: &'static str },
}

impl Error {
    pub(crate) fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
