//! Lattice CLI.
//!
//! Runs ordered diagnostics against a cluster and the Lattice control
//! plane, reporting each check's outcome as it completes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use lattice_healthcheck::{CheckCategory, HealthCheckOptions, HealthChecker};

mod report;

use report::Reporter;

/// Lattice - service mesh diagnostics.
#[derive(Parser)]
#[command(
    name = "lattice",
    version,
    about = "Lattice platform CLI",
    long_about = "Work with the Lattice service mesh.\n\n\
                  The check command validates that a cluster is ready for the\n\
                  control plane, or that an installed control plane and its\n\
                  data-plane proxies are healthy and up-to-date."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the Lattice installation for potential problems.
    ///
    /// Checks run in order and stop at the first fatal failure. The exit
    /// status is nonzero if any check failed.
    Check(CheckCommand),
}

#[derive(Args)]
struct CheckCommand {
    /// Only run pre-installation checks, to determine if the control plane
    /// can be installed.
    #[arg(long, conflicts_with = "data_plane")]
    pre: bool,

    /// Also validate the data plane: proxy readiness and metrics reporting.
    #[arg(long)]
    data_plane: bool,

    /// Namespace to scope data-plane checks to (all namespaces if unset).
    #[arg(long, default_value = "")]
    namespace: String,

    /// Namespace the control plane runs in.
    #[arg(long, default_value = "lattice")]
    lattice_namespace: String,

    /// Path to the kubeconfig file to use.
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Address of the Lattice controller API, bypassing discovery through
    /// the Kubernetes API server.
    #[arg(long, default_value = "")]
    api_addr: String,

    /// Treat this as the latest released version instead of asking the
    /// version-check service.
    #[arg(long, default_value = "")]
    expected_version: String,

    /// Seconds to keep retrying readiness checks before giving up.
    #[arg(long, default_value_t = 0)]
    wait: u64,

    /// The control plane was installed into a single namespace, without
    /// cluster-wide RBAC.
    #[arg(long)]
    single_namespace: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info,lattice_healthcheck=debug,lattice_cli=debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Check(cmd) => run_check(cmd).await,
    }
}

async fn run_check(cmd: CheckCommand) -> Result<()> {
    let mut categories = vec![CheckCategory::KubernetesApi];
    if cmd.pre {
        categories.push(CheckCategory::PreInstall);
    } else {
        categories.push(CheckCategory::Api);
        if cmd.data_plane {
            categories.push(CheckCategory::DataPlane);
        }
    }
    categories.push(CheckCategory::Version);
    debug!(?categories, "Running checks");

    let retry_deadline = (cmd.wait > 0).then(|| Instant::now() + Duration::from_secs(cmd.wait));
    let options = HealthCheckOptions {
        control_plane_namespace: cmd.lattice_namespace,
        data_plane_namespace: cmd.namespace,
        kubeconfig: cmd.kubeconfig,
        api_addr: cmd.api_addr,
        version_override: cmd.expected_version,
        retry_deadline,
        should_check_control_plane_version: !cmd.pre,
        should_check_data_plane_version: cmd.data_plane,
        single_namespace: cmd.single_namespace,
        ..HealthCheckOptions::default()
    };

    let mut checker = HealthChecker::new(&categories, options);
    let mut reporter = Reporter::new();
    let success = checker.run_checks(&mut |result| reporter.report(result)).await;
    reporter.finish(success);

    if !success {
        std::process::exit(2);
    }
    Ok(())
}
