//! Pure state validators.
//!
//! These functions decide pod and component readiness from snapshots of
//! cluster and metrics-store state. They perform no I/O and are
//! deterministic given their inputs.

use std::collections::{HashMap, HashSet};

use k8s_openapi::api::core::v1::{ContainerStatus, Pod};

use crate::api::PodSummary;
use crate::error::Error;
use crate::k8s::{COMPONENT_PREFIX, PROXY_CONTAINER_NAME};

/// Control-plane components that must always have at least one running pod,
/// in the order they are reported when missing.
const REQUIRED_COMPONENTS: [&str; 4] = ["controller", "dashboard", "metrics", "web"];

/// The certificate authority is optional, but must be healthy if deployed.
const CA_COMPONENT: &str = "ca";

const RUNNING_PHASE: &str = "Running";

/// Component identifier for a control-plane pod: the pod name minus the
/// optional `lattice-` prefix, truncated at the first dash.
fn component_name(pod: &Pod) -> String {
    let name = pod.metadata.name.as_deref().unwrap_or_default();
    let name = name.strip_prefix(COMPONENT_PREFIX).unwrap_or(name);
    name.split('-').next().unwrap_or_default().to_string()
}

fn is_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(RUNNING_PHASE)
}

fn container_statuses(pod: &Pod) -> &[ContainerStatus] {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default()
}

/// Validate that every required control-plane component has at least one
/// running pod and that every container of those pods is ready.
///
/// # Errors
///
/// Returns an error naming the first missing component, or the first
/// component and container found not ready.
pub fn validate_control_plane_pods(pods: &[Pod]) -> Result<(), Error> {
    let mut statuses: HashMap<String, Vec<ContainerStatus>> = HashMap::new();

    for pod in pods {
        if !is_running(pod) {
            continue;
        }
        statuses
            .entry(component_name(pod))
            .or_default()
            .extend_from_slice(container_statuses(pod));
    }

    let mut required: Vec<&str> = REQUIRED_COMPONENTS.to_vec();
    if statuses.contains_key(CA_COMPONENT) {
        required.push(CA_COMPONENT);
    }

    for name in required {
        let Some(containers) = statuses.get(name) else {
            return Err(Error::failed(format!("no running pods for \"{name}\"")));
        };
        for container in containers {
            if !container.ready {
                return Err(Error::failed(format!(
                    "the \"{name}\" pod's \"{}\" container is not ready",
                    container.name
                )));
            }
        }
    }

    Ok(())
}

/// Validate that every data-plane pod is running with a ready proxy sidecar.
///
/// # Errors
///
/// Returns an error if no pods were found, or naming the first pod that is
/// not running or whose proxy container is absent or unready.
pub fn validate_data_plane_pods(pods: &[Pod], target_namespace: &str) -> Result<(), Error> {
    if pods.is_empty() {
        let mut msg = format!("no \"{PROXY_CONTAINER_NAME}\" containers found");
        if !target_namespace.is_empty() {
            msg.push_str(&format!(" in the \"{target_namespace}\" namespace"));
        }
        return Err(Error::failed(msg));
    }

    for pod in pods {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();

        if !is_running(pod) {
            return Err(Error::failed(format!(
                "the \"{name}\" pod in the \"{namespace}\" namespace is not running"
            )));
        }

        let proxy_ready = container_statuses(pod)
            .iter()
            .any(|c| c.name == PROXY_CONTAINER_NAME && c.ready);
        if !proxy_ready {
            return Err(Error::failed(format!(
                "the \"{PROXY_CONTAINER_NAME}\" container in the \"{name}\" pod in the \"{namespace}\" namespace is not ready"
            )));
        }
    }

    Ok(())
}

/// Reconcile the pods observed in the cluster against the pods the metrics
/// store reports scraping, and fail on any difference.
///
/// Cluster pods are keyed by `namespace/name`; reported pods are keyed by
/// their name exactly as the control plane returned it, restricted to
/// entries the metrics store has discovered (`added`). The asymmetric key
/// shapes are a known ambiguity: a reported name that does not carry a
/// namespace can never match, and name collisions across namespaces can
/// produce false matches. Kept as-is deliberately.
///
/// # Errors
///
/// Returns an error listing pods missing from the metrics store first, then
/// reported pods unknown to the cluster.
pub fn validate_data_plane_pod_reporting(
    pods: &[Pod],
    reported: &[PodSummary],
) -> Result<(), Error> {
    let cluster: Vec<String> = pods
        .iter()
        .map(|p| {
            format!(
                "{}/{}",
                p.metadata.namespace.as_deref().unwrap_or_default(),
                p.metadata.name.as_deref().unwrap_or_default()
            )
        })
        .collect();
    let cluster_set: HashSet<&str> = cluster.iter().map(String::as_str).collect();

    let discovered: Vec<&str> = reported
        .iter()
        .filter(|p| p.added)
        .map(|p| p.name.as_str())
        .collect();
    let discovered_set: HashSet<&str> = discovered.iter().copied().collect();

    // Input order keeps the message deterministic.
    let only_in_cluster: Vec<&str> = cluster
        .iter()
        .map(String::as_str)
        .filter(|k| !discovered_set.contains(k))
        .collect();
    let only_in_metrics: Vec<&str> = discovered
        .iter()
        .copied()
        .filter(|k| !cluster_set.contains(k))
        .collect();

    let mut msg = String::new();
    if !only_in_cluster.is_empty() {
        msg.push_str(&format!(
            "data plane metrics not found for {}. ",
            only_in_cluster.join(", ")
        ));
    }
    if !only_in_metrics.is_empty() {
        msg.push_str(&format!(
            "found data plane metrics for {}, but not found in Kubernetes.",
            only_in_metrics.join(", ")
        ));
    }

    if msg.is_empty() {
        Ok(())
    } else {
        Err(Error::failed(msg.trim_end().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str, namespace: &str, phase: &str, containers: &[(&str, bool)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(
                    containers
                        .iter()
                        .map(|(name, ready)| ContainerStatus {
                            name: (*name).to_string(),
                            ready: *ready,
                            ..ContainerStatus::default()
                        })
                        .collect(),
                ),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    fn control_plane_pod(component: &str, ready: bool) -> Pod {
        pod(
            &format!("{component}-6c48b5d9f-x2m4p"),
            "lattice",
            "Running",
            &[(component, ready)],
        )
    }

    fn healthy_control_plane() -> Vec<Pod> {
        vec![
            control_plane_pod("controller", true),
            control_plane_pod("dashboard", true),
            control_plane_pod("metrics", true),
            control_plane_pod("web", true),
        ]
    }

    fn summary(name: &str, added: bool) -> PodSummary {
        PodSummary {
            name: name.to_string(),
            namespace: String::new(),
            added,
            proxy_version: String::new(),
        }
    }

    #[test]
    fn test_control_plane_empty_names_first_missing_component() {
        let err = validate_control_plane_pods(&[]).unwrap_err();
        assert_eq!(err.to_string(), "no running pods for \"controller\"");
    }

    #[test]
    fn test_control_plane_all_ready() {
        assert!(validate_control_plane_pods(&healthy_control_plane()).is_ok());
    }

    #[test]
    fn test_control_plane_strips_namespace_prefix() {
        let pods = vec![
            pod("lattice-controller-abc-def", "lattice", "Running", &[("controller", true)]),
            control_plane_pod("dashboard", true),
            control_plane_pod("metrics", true),
            control_plane_pod("web", true),
        ];
        assert!(validate_control_plane_pods(&pods).is_ok());
    }

    #[test]
    fn test_control_plane_unready_container_named() {
        let mut pods = healthy_control_plane();
        pods[1] = control_plane_pod("dashboard", false);
        let err = validate_control_plane_pods(&pods).unwrap_err();
        assert_eq!(
            err.to_string(),
            "the \"dashboard\" pod's \"dashboard\" container is not ready"
        );
    }

    #[test]
    fn test_control_plane_ignores_non_running_pods() {
        let mut pods = healthy_control_plane();
        pods[0] = pod("controller-abc-def", "lattice", "Pending", &[("controller", true)]);
        let err = validate_control_plane_pods(&pods).unwrap_err();
        assert_eq!(err.to_string(), "no running pods for \"controller\"");
    }

    #[test]
    fn test_control_plane_ca_required_only_if_observed() {
        let mut pods = healthy_control_plane();
        assert!(validate_control_plane_pods(&pods).is_ok());

        pods.push(control_plane_pod("ca", false));
        let err = validate_control_plane_pods(&pods).unwrap_err();
        assert_eq!(err.to_string(), "the \"ca\" pod's \"ca\" container is not ready");
    }

    #[test]
    fn test_data_plane_no_pods() {
        let err = validate_data_plane_pods(&[], "books").unwrap_err();
        assert_eq!(
            err.to_string(),
            "no \"lattice-proxy\" containers found in the \"books\" namespace"
        );

        let err = validate_data_plane_pods(&[], "").unwrap_err();
        assert_eq!(err.to_string(), "no \"lattice-proxy\" containers found");
    }

    #[test]
    fn test_data_plane_pod_not_running() {
        let pods = vec![pod("web-backend-1", "books", "Pending", &[("lattice-proxy", true)])];
        let err = validate_data_plane_pods(&pods, "books").unwrap_err();
        assert_eq!(
            err.to_string(),
            "the \"web-backend-1\" pod in the \"books\" namespace is not running"
        );
    }

    #[test]
    fn test_data_plane_proxy_missing_or_unready() {
        let pods = vec![pod("web-backend-1", "books", "Running", &[("app", true)])];
        let err = validate_data_plane_pods(&pods, "books").unwrap_err();
        assert_eq!(
            err.to_string(),
            "the \"lattice-proxy\" container in the \"web-backend-1\" pod in the \"books\" namespace is not ready"
        );

        let pods = vec![pod(
            "web-backend-1",
            "books",
            "Running",
            &[("app", true), ("lattice-proxy", false)],
        )];
        assert!(validate_data_plane_pods(&pods, "books").is_err());
    }

    #[test]
    fn test_data_plane_all_ready() {
        let pods = vec![pod(
            "web-backend-1",
            "books",
            "Running",
            &[("app", true), ("lattice-proxy", true)],
        )];
        assert!(validate_data_plane_pods(&pods, "books").is_ok());
    }

    #[test]
    fn test_reporting_missing_from_metrics() {
        let pods = vec![
            pod("a", "ns", "Running", &[]),
            pod("b", "ns", "Running", &[]),
        ];
        let reported = vec![summary("ns/a", true)];
        let err = validate_data_plane_pod_reporting(&pods, &reported).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ns/b"), "unexpected message: {msg}");
        assert!(!msg.contains("ns/a"), "unexpected message: {msg}");
        assert!(!msg.contains("but not found in Kubernetes"), "unexpected message: {msg}");
    }

    #[test]
    fn test_reporting_identical_sets() {
        let pods = vec![
            pod("a", "ns", "Running", &[]),
            pod("b", "ns", "Running", &[]),
        ];
        let reported = vec![summary("ns/a", true), summary("ns/b", true)];
        assert!(validate_data_plane_pod_reporting(&pods, &reported).is_ok());
    }

    #[test]
    fn test_reporting_undiscovered_pods_excluded() {
        let pods = vec![pod("a", "ns", "Running", &[])];
        let reported = vec![summary("ns/a", false)];
        let err = validate_data_plane_pod_reporting(&pods, &reported).unwrap_err();
        assert!(err.to_string().contains("data plane metrics not found for ns/a"));
    }

    #[test]
    fn test_reporting_extra_metrics_entry() {
        let pods = vec![pod("a", "ns", "Running", &[])];
        let reported = vec![summary("ns/a", true), summary("ns/c", true)];
        let err = validate_data_plane_pod_reporting(&pods, &reported).unwrap_err();
        assert_eq!(
            err.to_string(),
            "found data plane metrics for ns/c, but not found in Kubernetes."
        );
    }

    // A reported name without a namespace prefix can never match the
    // cluster key, so the same pod shows up on both sides of the diff.
    // This documents the key-shape mismatch rather than fixing it.
    #[test]
    fn test_reporting_bare_name_counts_both_ways() {
        let pods = vec![pod("a", "ns", "Running", &[])];
        let reported = vec![summary("a", true)];
        let err = validate_data_plane_pod_reporting(&pods, &reported).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("data plane metrics not found for ns/a"), "{msg}");
        assert!(msg.contains("found data plane metrics for a"), "{msg}");
    }
}
