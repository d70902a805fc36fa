//! Version resolution against the public version-check service.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use crate::api::ApiClient;
use crate::error::Error;
use crate::k8s::COMPONENT_PREFIX;

/// Endpoint queried for the latest released versions per channel.
pub const DEFAULT_VERSION_CHECK_URL: &str = "https://version.lattice.dev/version.json";

/// Channel tag reported by (and resolved for) this tool.
pub const CLI_CHANNEL: &str = "cli";

/// Version of the running tool.
pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) const USER_AGENT: &str = concat!("lattice/", env!("CARGO_PKG_VERSION"));

/// Web component whose container arguments carry the installation id.
const WEB_COMPONENT: &str = "web";

const UUID_ARG_PREFIX: &str = "-uuid=";

/// Resolve the latest available version for a channel.
///
/// # Errors
///
/// Returns an error if the request fails or the response does not carry a
/// version for the channel.
pub async fn latest_version(
    http: &reqwest::Client,
    base_url: &str,
    uuid: &str,
    channel: &str,
) -> Result<String, Error> {
    let channels: HashMap<String, String> = http
        .get(base_url)
        .query(&[("version", CLI_VERSION), ("uuid", uuid), ("source", channel)])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    debug!(uuid, channel, "Resolved version channels");
    channels
        .get(channel)
        .cloned()
        .ok_or_else(|| Error::failed(format!("no version found for channel \"{channel}\"")))
}

/// Extract the installation id from the web component's container arguments.
/// Returns `"unknown"` when no id is found; the id only affects version-check
/// telemetry, never the result.
#[must_use]
pub fn install_uuid(control_plane_pods: &[Pod]) -> String {
    let mut uuid = "unknown".to_string();
    for pod in control_plane_pods {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let name = name.strip_prefix(COMPONENT_PREFIX).unwrap_or(name);
        if name.split('-').next() != Some(WEB_COMPONENT) {
            continue;
        }
        let Some(spec) = &pod.spec else { continue };
        for container in &spec.containers {
            if container.name != WEB_COMPONENT {
                continue;
            }
            for arg in container.args.iter().flatten() {
                if let Some(value) = arg.strip_prefix(UUID_ARG_PREFIX) {
                    uuid = value.to_string();
                }
            }
        }
    }
    uuid
}

/// Check that this tool is running the latest version.
///
/// # Errors
///
/// Returns an error naming both versions if they differ.
pub fn check_client_version(latest: &str) -> Result<(), Error> {
    check_version("cli", CLI_VERSION, latest)
}

/// Check that the control plane reports the latest version.
///
/// # Errors
///
/// Returns an error if the control plane cannot be queried, or naming both
/// versions if they differ.
pub async fn check_server_version(api: &ApiClient, latest: &str) -> Result<(), Error> {
    let running = api.version().await?;
    check_version("control plane", &running, latest)
}

fn check_version(component: &str, running: &str, latest: &str) -> Result<(), Error> {
    if running.trim_start_matches('v') == latest.trim_start_matches('v') {
        Ok(())
    } else {
        Err(Error::failed(format!(
            "the {component} is running version {running}, but the latest version is {latest}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn web_pod(name: &str, container: &str, args: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: container.to_string(),
                    args: Some(args.iter().map(ToString::to_string).collect()),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
            ..Pod::default()
        }
    }

    #[tokio::test]
    async fn test_latest_version_resolves_channel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/version.json"))
            .and(query_param("uuid", "abc123"))
            .and(query_param("source", "cli"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"cli": "v0.4.0", "web": "v0.4.1"})),
            )
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/version.json", server.uri());
        let latest = latest_version(&http, &url, "abc123", "cli").await.unwrap();
        assert_eq!(latest, "v0.4.0");
    }

    #[tokio::test]
    async fn test_latest_version_missing_channel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/version.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/version.json", server.uri());
        let err = latest_version(&http, &url, "unknown", "cli").await.unwrap_err();
        assert!(err.to_string().contains("no version found for channel \"cli\""));
    }

    #[test]
    fn test_install_uuid_found() {
        let pods = vec![web_pod("web-7f9c4-x2m4p", "web", &["-addr=:8084", "-uuid=abc123"])];
        assert_eq!(install_uuid(&pods), "abc123");
    }

    #[test]
    fn test_install_uuid_prefixed_pod_name() {
        let pods = vec![web_pod("lattice-web-7f9c4", "web", &["-uuid=xyz"])];
        assert_eq!(install_uuid(&pods), "xyz");
    }

    #[test]
    fn test_install_uuid_defaults_to_unknown() {
        assert_eq!(install_uuid(&[]), "unknown");
        let pods = vec![web_pod("web-7f9c4", "web", &["-addr=:8084"])];
        assert_eq!(install_uuid(&pods), "unknown");
        // Wrong container name is skipped.
        let pods = vec![web_pod("web-7f9c4", "sidecar", &["-uuid=abc"])];
        assert_eq!(install_uuid(&pods), "unknown");
    }

    #[test]
    fn test_check_client_version() {
        assert!(check_client_version(CLI_VERSION).is_ok());
        // A leading "v" on the published version is not a mismatch.
        assert!(check_client_version(&format!("v{CLI_VERSION}")).is_ok());

        let err = check_client_version("v99.0.0").unwrap_err();
        assert!(err.to_string().contains("latest version is v99.0.0"));
    }
}
