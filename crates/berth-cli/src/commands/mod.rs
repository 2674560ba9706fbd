//! CLI command definitions and dispatch.

pub mod container;
pub mod health;
pub mod inspect;
pub mod pod;
pub mod prune;
pub mod ps;

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Context as _;
use berth_common::config::BerthConfig;
use berth_runtime::backend::BackendKind;
use berth_runtime::engine::Engine;
use berth_runtime::filter::Filters;
use clap::{Parser, Subcommand};

/// Berth: daemon-less container lifecycle engine.
#[derive(Parser, Debug)]
#[command(name = "berth", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the state file, container directories, and volumes.
    #[arg(long, global = true, env = "BERTH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Execution backend: `host` or `simulated`.
    #[arg(long, global = true, env = "BERTH_BACKEND", default_value = "host")]
    pub backend: String,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container without starting it.
    Create(container::CreateArgs),
    /// Create and start a container.
    Run(container::RunArgs),
    /// Prepare a container's runtime resources.
    Init(container::RefsArgs),
    /// Start one or more containers.
    Start(container::RefsArgs),
    /// Freeze running containers.
    Pause(container::RefsArgs),
    /// Thaw paused containers.
    Unpause(container::RefsArgs),
    /// Stop containers gracefully, escalating to SIGKILL.
    Stop(container::StopArgs),
    /// Send a signal to running containers.
    Kill(container::KillArgs),
    /// Remove containers.
    Rm(container::RmArgs),
    /// Block until containers reach a state.
    Wait(container::WaitArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Show the full record of containers.
    Inspect(inspect::InspectArgs),
    /// Check whether a container exists.
    Exists(inspect::ExistsArgs),
    /// Show the processes of a running container.
    Top(inspect::TopArgs),
    /// Remove stopped containers.
    Prune(prune::PruneArgs),
    /// Run a container's health check once.
    Healthcheck(health::HealthcheckArgs),
    /// Manage pods.
    #[command(subcommand)]
    Pod(pod::PodCommand),
}

/// Dispatches the parsed CLI command to its handler.
///
/// The engine is restored from the state file before the command runs and
/// saved again afterwards, whether or not the command succeeded.
///
/// # Errors
///
/// Returns an error if the state cannot be loaded or saved, or if the
/// command fails.
pub async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli
        .data_dir
        .as_ref()
        .map_or_else(BerthConfig::default, BerthConfig::with_data_dir);
    let backend = BackendKind::from_str(&cli.backend)?.build();
    tracing::debug!(data_dir = %config.data_dir.display(), backend = backend.name(), "opening engine");

    let engine = Engine::open(config, backend)
        .await
        .context("failed to load state")?;
    let outcome = dispatch(&engine, cli.command).await;
    engine.save().await.context("failed to save state")?;
    outcome
}

async fn dispatch(engine: &Engine, command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Create(args) => container::create(engine, args),
        Command::Run(args) => container::run(engine, args).await,
        Command::Init(args) => container::init(engine, args).await,
        Command::Start(args) => container::start(engine, args).await,
        Command::Pause(args) => container::pause(engine, args).await,
        Command::Unpause(args) => container::unpause(engine, args).await,
        Command::Stop(args) => container::stop(engine, args).await,
        Command::Kill(args) => container::kill(engine, args).await,
        Command::Rm(args) => container::rm(engine, args).await,
        Command::Wait(args) => container::wait(engine, args).await,
        Command::Ps(args) => ps::execute(engine, args).await,
        Command::Inspect(args) => inspect::inspect(engine, args).await,
        Command::Exists(args) => inspect::exists(engine, &args),
        Command::Top(args) => inspect::top(engine, args).await,
        Command::Prune(args) => prune::execute(engine, args).await,
        Command::Healthcheck(args) => health::execute(engine, args).await,
        Command::Pod(command) => pod::execute(engine, command),
    }
}

/// Splits `KEY=VALUE`; a bare `KEY` yields an empty value.
pub fn parse_key_value(raw: &str) -> (String, String) {
    match raw.split_once('=') {
        Some((key, value)) => (key.to_string(), value.to_string()),
        None => (raw.to_string(), String::new()),
    }
}

/// Collects repeated `--filter key=value` flags. Repeated keys accumulate.
///
/// # Errors
///
/// Returns an error for a filter without `=`.
pub fn parse_filters(raw: &[String]) -> anyhow::Result<Filters> {
    let mut filters = Filters::new();
    for item in raw {
        let (key, value) = item
            .split_once('=')
            .with_context(|| format!("filter {item:?} must be key=value"))?;
        filters
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }
    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_accumulate_values_per_key() {
        let raw = vec![
            "label=tier=front".to_string(),
            "label=team".to_string(),
            "status=running".to_string(),
        ];
        let filters = parse_filters(&raw).unwrap();
        assert_eq!(filters["label"], vec!["tier=front", "team"]);
        assert_eq!(filters["status"], vec!["running"]);
        assert!(parse_filters(&["label".to_string()]).is_err());
    }

    #[test]
    fn key_value_splits_on_first_equals() {
        assert_eq!(
            parse_key_value("A=b=c"),
            ("A".to_string(), "b=c".to_string())
        );
        assert_eq!(parse_key_value("FLAG"), ("FLAG".to_string(), String::new()));
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "berth",
            "--backend",
            "simulated",
            "--data-dir",
            "/tmp/berth",
            "ps",
            "-a",
        ])
        .unwrap();
        assert_eq!(cli.backend, "simulated");
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/berth")));
        assert!(matches!(cli.command, Command::Ps(_)));
    }
}
