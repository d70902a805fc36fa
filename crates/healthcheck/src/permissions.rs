//! Capability probes via self-subject access reviews.

use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::PostParams;
use kube::Api;
use tracing::debug;

use crate::error::Error;
use crate::session::SessionContext;

/// Probe whether the caller may `create` the given resource coordinates.
///
/// The access-review API handle is built from the cluster client on first
/// use and cached on the session for the rest of the run.
///
/// # Errors
///
/// Returns an error if the review call fails, or if the review denies the
/// permission (including the server-provided reason when there is one).
pub async fn can_create(
    ctx: &mut SessionContext,
    namespace: &str,
    group: &str,
    version: &str,
    resource: &str,
) -> Result<(), Error> {
    let reviews = match &ctx.access_reviews {
        Some(reviews) => reviews.clone(),
        None => {
            let reviews: Api<SelfSubjectAccessReview> = Api::all(ctx.kube_api()?.client());
            ctx.access_reviews = Some(reviews.clone());
            reviews
        }
    };

    let review = SelfSubjectAccessReview {
        spec: SelfSubjectAccessReviewSpec {
            resource_attributes: Some(ResourceAttributes {
                namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
                verb: Some("create".to_string()),
                group: (!group.is_empty()).then(|| group.to_string()),
                version: Some(version.to_string()),
                resource: Some(resource.to_string()),
                ..ResourceAttributes::default()
            }),
            ..SelfSubjectAccessReviewSpec::default()
        },
        ..SelfSubjectAccessReview::default()
    };

    let response = reviews.create(&PostParams::default(), &review).await?;
    let status = response.status.unwrap_or_default();
    debug!(resource, allowed = status.allowed, "Access review");

    if status.allowed {
        return Ok(());
    }
    match status.reason.filter(|reason| !reason.is_empty()) {
        Some(reason) => Err(Error::failed(format!(
            "missing permissions to create {resource}: {reason}"
        ))),
        None => Err(Error::failed(format!(
            "missing permissions to create {resource}"
        ))),
    }
}
