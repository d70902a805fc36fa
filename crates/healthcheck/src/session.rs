//! Per-run state shared across checks.

use k8s_openapi::api::authorization::v1::SelfSubjectAccessReview;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::Api;

use crate::api::ApiClient;
use crate::error::Error;
use crate::k8s::KubeApi;

/// Mutable state populated progressively while a run executes.
///
/// Checks both validate and populate this context: a check may read a field
/// only if an earlier check in the list is documented as writing it. The
/// context is owned by a single run and never shared across runs.
#[derive(Default)]
pub struct SessionContext {
    /// Written by the kubernetes-api "can initialize the client" check.
    pub(crate) kube_api: Option<KubeApi>,
    /// Written by the kubernetes-api "can initialize the client" check;
    /// used for the version-check service.
    pub(crate) http: Option<reqwest::Client>,
    /// Written by the kubernetes-api "can query the Kubernetes API" check.
    pub(crate) kube_version: Option<Info>,
    /// Written by the lattice-api "control plane pods are ready" check.
    pub(crate) control_plane_pods: Vec<Pod>,
    /// Written by the data-plane "proxies are ready" check.
    pub(crate) data_plane_pods: Vec<Pod>,
    /// Written by the lattice-api "can initialize the client" check.
    pub(crate) api_client: Option<ApiClient>,
    /// Written by the version "can determine the latest version" check.
    pub(crate) latest_version: Option<String>,
    /// Built lazily by the first capability probe.
    pub(crate) access_reviews: Option<Api<SelfSubjectAccessReview>>,
}

impl SessionContext {
    pub fn kube_api(&self) -> Result<&KubeApi, Error> {
        self.kube_api.as_ref().ok_or(Error::Uninitialized {
            what: "the Kubernetes client",
        })
    }

    pub fn http(&self) -> Result<&reqwest::Client, Error> {
        self.http.as_ref().ok_or(Error::Uninitialized {
            what: "the HTTP client",
        })
    }

    pub fn kube_version(&self) -> Result<&Info, Error> {
        self.kube_version.as_ref().ok_or(Error::Uninitialized {
            what: "the Kubernetes version",
        })
    }

    pub fn api_client(&self) -> Result<&ApiClient, Error> {
        self.api_client.as_ref().ok_or(Error::Uninitialized {
            what: "the Lattice API client",
        })
    }

    pub fn latest_version(&self) -> Result<&str, Error> {
        self.latest_version.as_deref().ok_or(Error::Uninitialized {
            what: "the latest version",
        })
    }

    pub fn control_plane_pods(&self) -> &[Pod] {
        &self.control_plane_pods
    }

    pub fn data_plane_pods(&self) -> &[Pod] {
        &self.data_plane_pods
    }
}
