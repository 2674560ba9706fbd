//! `berth ps`: List containers.

use std::process::ExitCode;

use berth_runtime::engine::Engine;
use berth_runtime::query::ListOptions;
use clap::{Args, ValueEnum};

use super::parse_filters;
use crate::output;

/// Output layouts for listings.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    /// Aligned columns.
    #[default]
    Table,
    /// JSON array.
    Json,
}

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (including stopped).
    #[arg(short, long)]
    pub all: bool,

    /// Show only the N most recently created containers, in any state.
    #[arg(short = 'n', long, default_value_t = 0)]
    pub last: usize,

    /// Filter, `key=value`. Repeatable.
    #[arg(short, long = "filter")]
    pub filter: Vec<String>,

    /// Print full IDs.
    #[arg(long)]
    pub no_trunc: bool,

    /// Output layout.
    #[arg(long, value_enum, default_value_t = Format::Table)]
    pub format: Format,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if a filter is invalid.
pub async fn execute(engine: &Engine, args: PsArgs) -> anyhow::Result<ExitCode> {
    let options = ListOptions {
        filters: parse_filters(&args.filter)?,
        all: args.all,
        last: args.last,
    };
    let containers = engine.list(&options).await?;

    if args.format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
        return Ok(ExitCode::SUCCESS);
    }

    let rows: Vec<Vec<String>> = containers
        .iter()
        .map(|c| {
            vec![
                if args.no_trunc {
                    c.id.to_string()
                } else {
                    c.id.short().to_string()
                },
                c.image.clone(),
                c.command.join(" "),
                output::format_age(c.created_at),
                output::format_status(c.state, c.exit_code, c.finished_at),
                c.pod_name.clone(),
                c.name.clone(),
            ]
        })
        .collect();
    print!(
        "{}",
        output::table(
            &["CONTAINER ID", "IMAGE", "COMMAND", "CREATED", "STATUS", "POD", "NAMES"],
            &rows,
        )
    );
    Ok(ExitCode::SUCCESS)
}
