//! Execution backend abstraction.
//!
//! The engine owns container records and state transitions; a backend only
//! runs processes. Every call names the container by ID and the engine
//! guarantees the call is legal for the container's current state.

pub mod host;
pub mod simulated;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use berth_common::constants::NO_EXIT_CODE;
use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;
use tokio::sync::watch;

use crate::container::ContainerRecord;
use crate::signal::Signal;

pub use host::HostBackend;
pub use simulated::{SimulatedBackend, SimulatedWorkload};

/// One process observed inside a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessInfo {
    /// PID as seen by the container.
    pub pid: u32,
    /// Host PID.
    pub host_pid: u32,
    /// Parent PID.
    pub ppid: u32,
    /// User name inside the container.
    pub user: String,
    /// User name on the host.
    pub host_user: String,
    /// CPU usage, in percent.
    pub cpu_percent: f32,
    /// Time since the process started.
    pub elapsed: Duration,
    /// Scheduler state, e.g. `S` or `T`.
    pub state: String,
    /// Executable name.
    pub comm: String,
    /// Full command line.
    pub args: String,
    /// Nice value.
    pub nice: i32,
}

/// Output from a command executed in a container.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command.
    pub exit_code: i32,
}

/// Runs container processes on behalf of the engine.
#[async_trait]
pub trait RuntimeBackend: Send + Sync {
    /// Short name used in logs and `inspect` output.
    fn name(&self) -> &'static str;

    /// Prepares runtime resources without starting the main process.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be prepared.
    async fn init(&self, container: &ContainerRecord, workdir: &Path) -> Result<()>;

    /// Starts the main process, returning its PID.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    async fn start(&self, container: &ContainerRecord, workdir: &Path) -> Result<u32>;

    /// Freezes every process of the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the processes cannot be frozen.
    async fn pause(&self, id: &ContainerId) -> Result<()>;

    /// Thaws a frozen container.
    ///
    /// # Errors
    ///
    /// Returns an error if the processes cannot be thawed.
    async fn resume(&self, id: &ContainerId) -> Result<()>;

    /// Delivers a signal to the main process.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    async fn signal(&self, id: &ContainerId, signal: Signal) -> Result<()>;

    /// Resolves once the main process has exited, with its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is unknown or was released before
    /// it exited.
    async fn wait_exit(&self, id: &ContainerId) -> Result<i32>;

    /// Lists the processes running in the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the process table cannot be read.
    async fn processes(&self, id: &ContainerId) -> Result<Vec<ProcessInfo>>;

    /// Runs a command in the context of the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned.
    async fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecOutput>;

    /// Re-attaches to a live container recorded by a previous session.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorded process cannot be tracked.
    async fn adopt(&self, container: &ContainerRecord, workdir: &Path) -> Result<()>;

    /// Releases every resource held for the container.
    ///
    /// # Errors
    ///
    /// Returns an error if resources cannot be released.
    async fn cleanup(&self, id: &ContainerId) -> Result<()>;
}

/// Selectable backend implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Host processes in their own process group.
    Host,
    /// In-memory processes for tests and dry runs.
    Simulated,
}

impl BackendKind {
    /// Instantiates the backend.
    #[must_use]
    pub fn build(self) -> Arc<dyn RuntimeBackend> {
        match self {
            Self::Host => Arc::new(HostBackend::new()),
            Self::Simulated => Arc::new(SimulatedBackend::new()),
        }
    }
}

impl FromStr for BackendKind {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(Self::Host),
            "simulated" | "sim" => Ok(Self::Simulated),
            other => Err(BerthError::Config {
                message: format!("unknown backend {other:?}"),
            }),
        }
    }
}

/// Picks the backend for the current platform.
#[must_use]
pub fn detect_backend() -> Arc<dyn RuntimeBackend> {
    if cfg!(unix) {
        BackendKind::Host.build()
    } else {
        BackendKind::Simulated.build()
    }
}

pub(crate) fn unknown_process(id: &ContainerId) -> BerthError {
    BerthError::runtime(format!("no process is tracked for container {id}"))
}

/// Waits until an exit slot is filled.
pub(crate) async fn await_exit(
    id: &ContainerId,
    mut exit: watch::Receiver<Option<i32>>,
) -> Result<i32> {
    let code = *exit.wait_for(Option::is_some).await.map_err(|_| {
        BerthError::runtime(format!(
            "process of container {id} was released before it exited"
        ))
    })?;
    Ok(code.unwrap_or(NO_EXIT_CODE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_names() {
        assert_eq!("host".parse::<BackendKind>().unwrap(), BackendKind::Host);
        assert_eq!(
            "Simulated".parse::<BackendKind>().unwrap(),
            BackendKind::Simulated
        );
        assert!("qemu".parse::<BackendKind>().is_err());
    }

    #[test]
    fn built_backends_report_their_name() {
        assert_eq!(BackendKind::Simulated.build().name(), "simulated");
        assert_eq!(BackendKind::Host.build().name(), "host");
    }
}
