//! `berth prune`: Remove stopped containers.

use std::process::ExitCode;

use anyhow::bail;
use berth_runtime::engine::Engine;
use clap::Args;

use super::parse_filters;
use crate::output::format_bytes;

/// Arguments for the `prune` command.
#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Filter, `until=<time>` or `label=<key>[=<value>]`. Repeatable.
    #[arg(short, long = "filter")]
    pub filter: Vec<String>,
}

/// Executes the `prune` command.
///
/// # Errors
///
/// Returns an error for an invalid filter, or when some container could
/// not be removed.
pub async fn execute(engine: &Engine, args: PruneArgs) -> anyhow::Result<ExitCode> {
    let report = engine.prune(&parse_filters(&args.filter)?).await?;

    for item in report.items() {
        match &item.error {
            None => println!("{}", item.id),
            Some(failure) => eprintln!("Error: {}: {}", item.id, failure.message),
        }
    }
    println!(
        "Total reclaimed space: {}",
        format_bytes(report.reclaimed_bytes())
    );
    if !report.is_success() {
        bail!("{} container(s) could not be pruned", report.failures().count());
    }
    Ok(ExitCode::SUCCESS)
}
