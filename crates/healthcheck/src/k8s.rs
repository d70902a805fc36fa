//! Thin wrapper over the Kubernetes client used by the checks.

use std::path::Path;

use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::debug;

use crate::error::Error;

/// Name of the proxy sidecar container injected into data-plane pods.
pub const PROXY_CONTAINER_NAME: &str = "lattice-proxy";

/// Label carried by every meshed pod, pointing at its control plane.
pub const CONTROL_PLANE_NS_LABEL: &str = "lattice.io/control-plane-ns";

/// Prefix on control-plane pod names in single-namespace installs.
pub const COMPONENT_PREFIX: &str = "lattice-";

/// Oldest supported Kubernetes version, as (major, minor).
const MINIMUM_KUBE_VERSION: (u64, u64) = (1, 21);

/// Authenticated handle to the Kubernetes API.
#[derive(Clone)]
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    /// Build a client from an explicit kubeconfig path, or from the inferred
    /// environment configuration (in-cluster or `~/.kube/config`).
    ///
    /// # Errors
    ///
    /// Returns an error if no usable configuration can be loaded.
    pub async fn new(kubeconfig: Option<&Path>) -> Result<Self, Error> {
        let config = match kubeconfig {
            Some(path) => {
                debug!(path = %path.display(), "Loading kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
            }
            None => Config::infer().await?,
        };
        let client = Client::try_from(config)?;
        Ok(Self { client })
    }

    /// The underlying client, for callers that need raw or typed API access.
    #[must_use]
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Fetch the API server's version information.
    ///
    /// # Errors
    ///
    /// Returns an error if the API server cannot be reached.
    pub async fn version_info(&self) -> Result<Info, Error> {
        Ok(self.client.apiserver_version().await?)
    }

    /// Compare reported version info against the minimum supported release.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster is older than the minimum, or if the
    /// reported version cannot be parsed.
    pub fn check_version(info: &Info) -> Result<(), Error> {
        let major = parse_version_component(&info.major)?;
        // GKE and friends report minors like "21+".
        let minor = parse_version_component(&info.minor)?;

        if (major, minor) < MINIMUM_KUBE_VERSION {
            return Err(Error::failed(format!(
                "Kubernetes is on version {major}.{minor}, but version {}.{} or later is required",
                MINIMUM_KUBE_VERSION.0, MINIMUM_KUBE_VERSION.1
            )));
        }
        Ok(())
    }

    /// Whether the named namespace exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails for any reason other than the
    /// namespace being absent.
    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool, Error> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        Ok(namespaces.get_opt(namespace).await?.is_some())
    }

    /// List pods in the given namespace, or across the cluster if empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the list call fails.
    pub async fn pods_in_namespace(&self, namespace: &str) -> Result<Vec<Pod>, Error> {
        let pods = self.pod_api(namespace).list(&ListParams::default()).await?;
        debug!(namespace, count = pods.items.len(), "Listed pods");
        Ok(pods.items)
    }

    /// List pods belonging to the given control plane's scope: pods labeled
    /// with [`CONTROL_PLANE_NS_LABEL`], optionally restricted to a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the list call fails.
    pub async fn meshed_pods(
        &self,
        control_plane_namespace: &str,
        namespace: &str,
    ) -> Result<Vec<Pod>, Error> {
        let selector = format!("{CONTROL_PLANE_NS_LABEL}={control_plane_namespace}");
        let params = ListParams::default().labels(&selector);
        let pods = self.pod_api(namespace).list(&params).await?;
        debug!(namespace, count = pods.items.len(), "Listed meshed pods");
        Ok(pods.items)
    }

    /// Check that every pod's proxy sidecar runs the expected image version.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first pod whose proxy image tag differs
    /// from `expected`.
    pub fn check_proxy_versions(pods: &[Pod], expected: &str) -> Result<(), Error> {
        for pod in pods {
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or_default();
            for container in containers {
                if container.name != PROXY_CONTAINER_NAME {
                    continue;
                }
                let image = container.image.as_deref().unwrap_or_default();
                let tag = image.rsplit(':').next().unwrap_or_default();
                if tag != expected {
                    return Err(Error::failed(format!(
                        "the \"{name}\" pod is running proxy version {tag}, but the latest version is {expected}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn pod_api(&self, namespace: &str) -> Api<Pod> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

fn parse_version_component(component: &str) -> Result<u64, Error> {
    let digits: String = component.chars().take_while(char::is_ascii_digit).collect();
    digits
        .parse()
        .map_err(|_| Error::failed(format!("unparseable Kubernetes version component \"{component}\"")))
}
