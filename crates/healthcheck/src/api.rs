//! Client for the Lattice control-plane API.
//!
//! The client is built either against a direct address (useful with a
//! port-forward or an in-cluster caller) or through the Kubernetes API
//! server's service proxy, reusing the cluster credentials.

use std::time::Duration;

use http::Request;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::k8s::KubeApi;
use crate::version::USER_AGENT;

/// Service proxy coordinates of the controller API, `name:port`.
const API_SERVICE: &str = "controller-api:http";

/// Bound on the self-check RPC, enforced here rather than by the runner.
const SELF_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Status of one subsystem in a [`SelfCheckResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsystemStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAIL")]
    Fail,
}

/// One subsystem's verdict from the control plane's self-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemResult {
    #[serde(rename = "subsystemName")]
    pub subsystem_name: String,
    #[serde(rename = "checkDescription")]
    pub check_description: String,
    pub status: SubsystemStatus,
    #[serde(rename = "friendlyMessageToUser", default)]
    pub friendly_message: String,
}

/// Response of the control plane's self-check RPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelfCheckResponse {
    #[serde(default)]
    pub results: Vec<SubsystemResult>,
}

/// A pod as reported by the control plane's pod listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSummary {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Whether the metrics store has discovered this pod.
    #[serde(default)]
    pub added: bool,
    #[serde(rename = "proxyVersion", default)]
    pub proxy_version: String,
}

#[derive(Debug, Deserialize)]
struct ListPodsResponse {
    #[serde(default)]
    pods: Vec<PodSummary>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(rename = "releaseVersion")]
    release_version: String,
}

/// Client for the control-plane API.
#[derive(Clone)]
pub enum ApiClient {
    /// Talks to a reachable address directly.
    Direct {
        http: reqwest::Client,
        base_url: String,
    },
    /// Tunnels through the Kubernetes API server's service proxy.
    Proxied {
        client: kube::Client,
        base_path: String,
    },
}

impl ApiClient {
    /// Build a client against a direct base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn direct(addr: &str) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::Direct {
            http,
            base_url: addr.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client that reaches the controller API through the Kubernetes
    /// API server's service proxy in the given namespace.
    #[must_use]
    pub fn proxied(kube: &KubeApi, namespace: &str) -> Self {
        Self::Proxied {
            client: kube.client(),
            base_path: format!("/api/v1/namespaces/{namespace}/services/{API_SERVICE}/proxy"),
        }
    }

    /// Run the control plane's self-check RPC, bounded to a short timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails, times out, or cannot be decoded.
    pub async fn self_check(&self) -> Result<SelfCheckResponse, Error> {
        debug!("Querying control-plane self-check");
        tokio::time::timeout(SELF_CHECK_TIMEOUT, self.post("/api/v1/SelfCheck"))
            .await
            .map_err(|_| Error::ApiTimeout)?
    }

    /// List the pods the control plane knows about, optionally restricted to
    /// one namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or cannot be decoded.
    pub async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>, Error> {
        let path = if namespace.is_empty() {
            "/api/v1/ListPods".to_string()
        } else {
            format!("/api/v1/ListPods?namespace={namespace}")
        };
        let response: ListPodsResponse = self.get(&path).await?;
        debug!(count = response.pods.len(), "Control plane reported pods");
        Ok(response.pods)
    }

    /// The control plane's reported release version.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or cannot be decoded.
    pub async fn version(&self) -> Result<String, Error> {
        let response: VersionResponse = self.get("/api/v1/Version").await?;
        Ok(response.release_version)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        match self {
            Self::Direct { http, base_url } => {
                let response = http
                    .get(format!("{base_url}{path}"))
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.json().await?)
            }
            Self::Proxied { client, base_path } => {
                let request = Request::get(format!("{base_path}{path}")).body(Vec::new())?;
                Ok(client.request(request).await?)
            }
        }
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        match self {
            Self::Direct { http, base_url } => {
                let response = http
                    .post(format!("{base_url}{path}"))
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.json().await?)
            }
            Self::Proxied { client, base_path } => {
                let request = Request::post(format!("{base_path}{path}")).body(Vec::new())?;
                Ok(client.request(request).await?)
            }
        }
    }
}
