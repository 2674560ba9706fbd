//! `berth healthcheck`: Run a container's health check once.

use std::process::ExitCode;

use berth_runtime::engine::Engine;
use berth_runtime::health::HealthStatus;
use clap::Args;

/// Arguments for the `healthcheck` command.
#[derive(Args, Debug)]
pub struct HealthcheckArgs {
    /// Container ID, prefix, or name.
    pub container: String,
}

/// Executes the `healthcheck` command. Prints the resulting status and
/// exits with 1 unless the container is healthy.
///
/// # Errors
///
/// Returns an error if the container has no health check or is not running.
pub async fn execute(engine: &Engine, args: HealthcheckArgs) -> anyhow::Result<ExitCode> {
    let health = engine.healthcheck(&args.container).await?;
    println!("{}", health.status);
    if health.status == HealthStatus::Healthy {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
