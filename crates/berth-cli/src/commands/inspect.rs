//! `berth inspect`, `berth exists`, and `berth top`.

use std::process::ExitCode;

use berth_runtime::engine::Engine;
use clap::Args;

use crate::output;

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Include on-disk size of the container and its anonymous volumes.
    #[arg(short, long)]
    pub size: bool,

    /// Containers to inspect.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Arguments for the `exists` command.
#[derive(Args, Debug)]
pub struct ExistsArgs {
    /// Container ID, prefix, or name.
    pub container: String,
}

/// Arguments for the `top` command.
#[derive(Args, Debug)]
pub struct TopArgs {
    /// Container ID, prefix, or name.
    pub container: String,

    /// Format descriptors such as `pid`, `user`, or `args`; comma-joined
    /// lists are accepted.
    pub descriptors: Vec<String>,
}

/// Executes the `inspect` command, printing a JSON array.
///
/// # Errors
///
/// Returns an error if any container does not resolve.
pub async fn inspect(engine: &Engine, args: InspectArgs) -> anyhow::Result<ExitCode> {
    let mut reports = Vec::with_capacity(args.containers.len());
    for reference in &args.containers {
        reports.push(engine.inspect(reference, args.size).await?);
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(ExitCode::SUCCESS)
}

/// Executes the `exists` command: exit status 0 when the container exists,
/// 1 when it does not.
///
/// # Errors
///
/// Returns an error for an ambiguous reference.
pub fn exists(engine: &Engine, args: &ExistsArgs) -> anyhow::Result<ExitCode> {
    if engine.exists(&args.container)? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Executes the `top` command.
///
/// # Errors
///
/// Returns an error if the container does not resolve or is not running.
pub async fn top(engine: &Engine, args: TopArgs) -> anyhow::Result<ExitCode> {
    let report = engine.top(&args.container, &args.descriptors).await?;
    print!("{}", output::table(&report.titles, &report.processes));
    Ok(ExitCode::SUCCESS)
}
