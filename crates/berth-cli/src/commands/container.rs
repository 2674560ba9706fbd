//! Lifecycle commands: `create`, `run`, `init`, `start`, `pause`,
//! `unpause`, `stop`, `kill`, `rm`, and `wait`.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::bail;
use berth_common::types::ContainerState;
use berth_runtime::container::CreateOptions;
use berth_runtime::engine::{Engine, RemoveOptions};
use berth_runtime::health::HealthCheckConfig;
use clap::Args;

use super::parse_key_value;
use crate::output;

/// Container definition shared by `create` and `run`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Container name; generated when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Environment variable, `KEY=VALUE`. Repeatable.
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Label, `KEY=VALUE`. Repeatable.
    #[arg(short, long = "label")]
    pub label: Vec<String>,

    /// Pod to join, by name or ID.
    #[arg(long)]
    pub pod: Option<String>,

    /// Volume, `NAME:DEST` for a named volume or `DEST` for an anonymous
    /// one. Repeatable.
    #[arg(short, long = "volume")]
    pub volume: Vec<String>,

    /// Health check command, run through the shell.
    #[arg(long)]
    pub health_cmd: Option<String>,

    /// Consecutive health check failures before the container is unhealthy.
    #[arg(long, requires = "health_cmd")]
    pub health_retries: Option<u32>,

    /// Seconds a single health check may run.
    #[arg(long, requires = "health_cmd")]
    pub health_timeout: Option<u64>,

    /// Signal sent first by `stop`.
    #[arg(long)]
    pub stop_signal: Option<String>,

    /// Stop grace period in seconds.
    #[arg(long)]
    pub stop_timeout: Option<u64>,

    /// Image reference recorded on the container.
    pub image: String,

    /// Command and arguments of the main process.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

impl CreateArgs {
    fn into_options(self) -> CreateOptions {
        let mut options = CreateOptions::new(self.image, self.command);
        if let Some(name) = self.name {
            options = options.name(name);
        }
        for raw in &self.env {
            let (key, value) = parse_key_value(raw);
            options = options.env(key, value);
        }
        for raw in &self.label {
            let (key, value) = parse_key_value(raw);
            options = options.label(key, value);
        }
        if let Some(pod) = self.pod {
            options = options.pod(pod);
        }
        for raw in self.volume {
            options = match raw.split_once(':') {
                Some((name, destination)) => options.named_volume(name, destination),
                None => options.anonymous_volume(raw),
            };
        }
        if let Some(cmd) = self.health_cmd {
            let mut check = HealthCheckConfig::shell(cmd);
            if let Some(retries) = self.health_retries {
                check = check.with_retries(retries);
            }
            if let Some(secs) = self.health_timeout {
                check = check.with_timeout(Duration::from_secs(secs));
            }
            options = options.healthcheck(check);
        }
        if let Some(signal) = self.stop_signal {
            options = options.stop_signal(signal);
        }
        if let Some(secs) = self.stop_timeout {
            options = options.stop_timeout(Duration::from_secs(secs));
        }
        options
    }
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Print the ID and return instead of waiting for the exit.
    #[arg(short, long)]
    pub detach: bool,

    /// Container definition.
    #[command(flatten)]
    pub create: CreateArgs,
}

/// Arguments for commands taking a list of containers.
#[derive(Args, Debug)]
pub struct RefsArgs {
    /// Container IDs, ID prefixes, or names.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Arguments for `stop`.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Grace period in seconds, overriding the container's own.
    #[arg(short, long)]
    pub time: Option<u64>,

    /// Containers to stop.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Arguments for `kill`.
#[derive(Args, Debug)]
pub struct KillArgs {
    /// Signal name or number.
    #[arg(short, long, default_value = "SIGKILL")]
    pub signal: String,

    /// Containers to signal.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Arguments for `rm`.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Kill live containers before removing them.
    #[arg(short, long)]
    pub force: bool,

    /// Remove anonymous volumes too.
    #[arg(short, long)]
    pub volumes: bool,

    /// Containers to remove.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Arguments for `wait`.
#[derive(Args, Debug)]
pub struct WaitArgs {
    /// State to wait for. Repeatable; defaults to `stopped`.
    #[arg(long = "condition")]
    pub conditions: Vec<ContainerState>,

    /// Containers to wait for.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Runs `operation` on every reference, printing each one that succeeds
/// and reporting the failures. Later references still run after a failure.
async fn for_each<F, Fut>(references: &[String], mut operation: F) -> anyhow::Result<ExitCode>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = berth_common::error::Result<()>>,
{
    let mut failed = 0usize;
    for reference in references {
        match operation(reference.clone()).await {
            Ok(()) => println!("{reference}"),
            Err(e) => {
                failed += 1;
                eprintln!("Error: {reference}: {e}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} container(s) failed", references.len());
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes the `create` command.
///
/// # Errors
///
/// Returns an error if the container cannot be created.
pub fn create(engine: &Engine, args: CreateArgs) -> anyhow::Result<ExitCode> {
    let id = engine.create(args.into_options())?;
    println!("{id}");
    Ok(ExitCode::SUCCESS)
}

/// Executes the `run` command.
///
/// Without `--detach` the command blocks until the container exits and
/// returns its exit code.
///
/// # Errors
///
/// Returns an error if the container cannot be created or started.
pub async fn run(engine: &Engine, args: RunArgs) -> anyhow::Result<ExitCode> {
    let id = engine.create(args.create.into_options())?;
    engine.start(id.as_str()).await?;
    if args.detach {
        println!("{id}");
        return Ok(ExitCode::SUCCESS);
    }
    let code = engine.wait(id.as_str(), &[]).await?;
    Ok(output::exit_code(code))
}

/// Executes the `init` command.
///
/// # Errors
///
/// Returns an error if any container fails to initialize.
pub async fn init(engine: &Engine, args: RefsArgs) -> anyhow::Result<ExitCode> {
    for_each(&args.containers, |r| async move { engine.init(&r).await }).await
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns an error if any container fails to start.
pub async fn start(engine: &Engine, args: RefsArgs) -> anyhow::Result<ExitCode> {
    for_each(&args.containers, |r| async move { engine.start(&r).await }).await
}

/// Executes the `pause` command.
///
/// # Errors
///
/// Returns an error if any container fails to pause.
pub async fn pause(engine: &Engine, args: RefsArgs) -> anyhow::Result<ExitCode> {
    for_each(&args.containers, |r| async move { engine.pause(&r).await }).await
}

/// Executes the `unpause` command.
///
/// # Errors
///
/// Returns an error if any container fails to unpause.
pub async fn unpause(engine: &Engine, args: RefsArgs) -> anyhow::Result<ExitCode> {
    for_each(&args.containers, |r| async move { engine.unpause(&r).await }).await
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if any container fails to stop.
pub async fn stop(engine: &Engine, args: StopArgs) -> anyhow::Result<ExitCode> {
    let timeout = args.time.map(Duration::from_secs);
    for_each(&args.containers, |r| async move { engine.stop(&r, timeout).await }).await
}

/// Executes the `kill` command.
///
/// # Errors
///
/// Returns an error if the signal cannot be delivered to any container.
pub async fn kill(engine: &Engine, args: KillArgs) -> anyhow::Result<ExitCode> {
    let signal = args.signal.as_str();
    for_each(&args.containers, |r| async move { engine.kill(&r, signal).await }).await
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if any container could not be removed.
pub async fn rm(engine: &Engine, args: RmArgs) -> anyhow::Result<ExitCode> {
    let mut options = RemoveOptions::default();
    if args.force {
        options = options.forced();
    }
    if args.volumes {
        options = options.with_volumes();
    }
    let report = engine.remove_many(&args.containers, options).await;
    for id in report.succeeded() {
        println!("{id}");
    }
    for (reference, failure) in report.failures() {
        eprintln!("Error: {reference}: {}", failure.message);
    }
    if !report.is_success() {
        bail!(
            "{} of {} container(s) could not be removed",
            report.failures().count(),
            report.len()
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes the `wait` command, printing one exit code per container.
///
/// # Errors
///
/// Returns an error if a container is unknown or removed while waiting.
pub async fn wait(engine: &Engine, args: WaitArgs) -> anyhow::Result<ExitCode> {
    for reference in &args.containers {
        let code = engine.wait(reference, &args.conditions).await?;
        println!("{code}");
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::commands::{Cli, Command};

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(std::iter::once("berth").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn run_keeps_command_flags_for_the_container() {
        let Command::Run(args) = parse(&["run", "-d", "--name", "web", "alpine", "sh", "-c", "exit 3"])
        else {
            panic!("expected run");
        };
        assert!(args.detach);
        assert_eq!(args.create.name.as_deref(), Some("web"));
        assert_eq!(args.create.command, vec!["sh", "-c", "exit 3"]);
    }

    #[test]
    fn wait_parses_state_conditions() {
        let Command::Wait(args) = parse(&["wait", "--condition", "paused", "--condition", "exited", "web"])
        else {
            panic!("expected wait");
        };
        assert_eq!(
            args.conditions,
            vec![ContainerState::Paused, ContainerState::Stopped]
        );
    }

    #[test]
    fn create_requires_a_command() {
        assert!(Cli::try_parse_from(["berth", "create", "alpine"]).is_err());
    }
}
