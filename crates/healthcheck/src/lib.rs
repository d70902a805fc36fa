//! Diagnostic checks for Lattice clusters.
//!
//! The engine expands a requested set of check categories into an ordered
//! list of validation steps, runs them sequentially against the cluster and
//! the Lattice control-plane API, and reports structured pass/fail results
//! to an observer callback. Checks are ordered deliberately: later checks
//! read session state (clients, discovered pods, resolved versions) that
//! earlier checks populate as a side effect of passing.
//!
//! ```no_run
//! use lattice_healthcheck::{CheckCategory, HealthCheckOptions, HealthChecker};
//!
//! # async fn check() -> bool {
//! let mut checker = HealthChecker::new(
//!     &[CheckCategory::KubernetesApi, CheckCategory::Api, CheckCategory::Version],
//!     HealthCheckOptions::default(),
//! );
//! checker
//!     .run_checks(&mut |result| {
//!         println!("{}: {} ok={}", result.category, result.description, result.error.is_none());
//!     })
//!     .await
//! # }
//! ```

pub mod api;
mod checks;
mod error;
pub mod k8s;
pub mod permissions;
mod runner;
mod session;
pub mod validate;
pub mod version;

pub use api::{ApiClient, PodSummary, SelfCheckResponse, SubsystemResult, SubsystemStatus};
pub use checks::{
    CheckCategory, CheckResult, HealthCheckOptions, HealthChecker, SelfCheckFn, SimpleCheckFn,
    API_CATEGORY, DATA_PLANE_CATEGORY, KUBERNETES_API_CATEGORY, PRE_INSTALL_CATEGORY,
    VERSION_CATEGORY,
};
pub use error::Error;
pub use session::SessionContext;
