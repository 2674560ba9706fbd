//! In-memory backend.
//!
//! Processes are modelled, not spawned: each one is a PID plus an exit slot
//! that signals, timers, or [`SimulatedBackend::exit`] fill in. Terminating
//! signals end a process with `128 + signo` unless its workload ignores
//! them; a paused process only honours SIGKILL.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use berth_common::error::{BerthError, Result};
use berth_common::types::{ContainerId, ContainerState};
use tokio::sync::watch;

use super::{ExecOutput, ProcessInfo, RuntimeBackend, await_exit, unknown_process};
use crate::container::ContainerRecord;
use crate::signal::{Signal, exit_code_for, is_terminating};

/// First PID handed out.
const FIRST_PID: u32 = 4000;

/// How a simulated process behaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedWorkload {
    /// Signals the process traps and survives.
    pub ignored_signals: Vec<Signal>,
    /// Exit on its own after this long.
    pub run_for: Option<Duration>,
    /// Exit code for a natural exit.
    pub exit_code: i32,
    /// Exit code of every command executed in the container.
    pub exec_exit_code: i32,
    /// How long each executed command runs.
    pub exec_duration: Option<Duration>,
}

impl SimulatedWorkload {
    /// A process that runs until signalled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Traps `signal` instead of terminating.
    #[must_use]
    pub fn ignoring(mut self, signal: Signal) -> Self {
        self.ignored_signals.push(signal);
        self
    }

    /// Exits with `exit_code` after `duration`.
    #[must_use]
    pub const fn run_for(mut self, duration: Duration, exit_code: i32) -> Self {
        self.run_for = Some(duration);
        self.exit_code = exit_code;
        self
    }

    /// Makes executed commands (health checks) exit with `code`.
    #[must_use]
    pub const fn exec_exit_code(mut self, code: i32) -> Self {
        self.exec_exit_code = code;
        self
    }

    /// Makes executed commands take `duration` before they report.
    #[must_use]
    pub const fn exec_duration(mut self, duration: Duration) -> Self {
        self.exec_duration = Some(duration);
        self
    }
}

#[derive(Debug)]
struct SimProcess {
    pid: u32,
    command: Vec<String>,
    started: Instant,
    paused: bool,
    workload: SimulatedWorkload,
    exit: Arc<watch::Sender<Option<i32>>>,
}

impl SimProcess {
    fn exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

/// Records the first exit code; later ones are ignored.
fn terminate(exit: &watch::Sender<Option<i32>>, code: i32) -> bool {
    exit.send_if_modified(|slot| {
        if slot.is_none() {
            *slot = Some(code);
            true
        } else {
            false
        }
    })
}

fn program_name(command: &[String]) -> String {
    command
        .first()
        .map(|arg0| {
            Path::new(arg0)
                .file_name()
                .map_or_else(|| arg0.clone(), |n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct SimState {
    prepared: HashSet<ContainerId>,
    processes: HashMap<ContainerId, SimProcess>,
}

/// Backend that keeps every process in memory.
#[derive(Debug)]
pub struct SimulatedBackend {
    state: Mutex<SimState>,
    next_pid: AtomicU32,
    default_workload: SimulatedWorkload,
    programs: HashMap<String, SimulatedWorkload>,
}

impl SimulatedBackend {
    /// Creates a backend whose processes run until signalled.
    #[must_use]
    pub fn new() -> Self {
        Self::with_workload(SimulatedWorkload::default())
    }

    /// Creates a backend applying `workload` to every program.
    #[must_use]
    pub fn with_workload(workload: SimulatedWorkload) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            next_pid: AtomicU32::new(FIRST_PID),
            default_workload: workload,
            programs: HashMap::new(),
        }
    }

    /// Overrides the workload for commands whose program is `program`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>, workload: SimulatedWorkload) -> Self {
        let _ = self.programs.insert(program.into(), workload);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn workload_for(&self, command: &[String]) -> SimulatedWorkload {
        self.programs
            .get(&program_name(command))
            .unwrap_or(&self.default_workload)
            .clone()
    }

    fn spawn_process(&self, container: &ContainerRecord, pid: Option<u32>, paused: bool) -> u32 {
        let pid = pid.unwrap_or_else(|| self.next_pid.fetch_add(1, Ordering::Relaxed));
        let workload = self.workload_for(&container.command);
        let (tx, _) = watch::channel(None);
        let exit = Arc::new(tx);

        if let Some(after) = workload.run_for {
            let exit = Arc::clone(&exit);
            let code = workload.exit_code;
            let _ = tokio::spawn(async move {
                tokio::time::sleep(after).await;
                let _ = terminate(&exit, code);
            });
        }

        let process = SimProcess {
            pid,
            command: container.command.clone(),
            started: Instant::now(),
            paused,
            workload,
            exit,
        };
        let _ = self.lock().processes.insert(container.id.clone(), process);
        pid
    }

    /// Makes the main process of `id` exit with `code`.
    ///
    /// # Errors
    ///
    /// Returns an error if no process is tracked for the container.
    pub fn exit(&self, id: &ContainerId, code: i32) -> Result<()> {
        let state = self.lock();
        let process = state.processes.get(id).ok_or_else(|| unknown_process(id))?;
        let _ = terminate(&process.exit, code);
        Ok(())
    }

    /// Returns true when the container's process exists and has not exited.
    #[must_use]
    pub fn is_alive(&self, id: &ContainerId) -> bool {
        self.lock().processes.get(id).is_some_and(|p| !p.exited())
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn init(&self, container: &ContainerRecord, _workdir: &Path) -> Result<()> {
        let _ = self.lock().prepared.insert(container.id.clone());
        Ok(())
    }

    async fn start(&self, container: &ContainerRecord, _workdir: &Path) -> Result<u32> {
        if !self.lock().prepared.contains(&container.id) {
            return Err(BerthError::runtime(format!(
                "container {} was not initialized",
                container.id
            )));
        }
        let pid = self.spawn_process(container, None, false);
        tracing::debug!(id = %container.id, pid, "simulated process started");
        Ok(pid)
    }

    async fn pause(&self, id: &ContainerId) -> Result<()> {
        let mut state = self.lock();
        let process = state
            .processes
            .get_mut(id)
            .ok_or_else(|| unknown_process(id))?;
        process.paused = true;
        Ok(())
    }

    async fn resume(&self, id: &ContainerId) -> Result<()> {
        let mut state = self.lock();
        let process = state
            .processes
            .get_mut(id)
            .ok_or_else(|| unknown_process(id))?;
        process.paused = false;
        Ok(())
    }

    async fn signal(&self, id: &ContainerId, signal: Signal) -> Result<()> {
        let state = self.lock();
        let process = state.processes.get(id).ok_or_else(|| unknown_process(id))?;
        if process.exited() {
            return Ok(());
        }
        let honoured = signal == Signal::SIGKILL
            || (!process.paused
                && is_terminating(signal)
                && !process.workload.ignored_signals.contains(&signal));
        if honoured {
            let _ = terminate(&process.exit, exit_code_for(signal));
        }
        tracing::debug!(id = %id, signal = %signal, honoured, "simulated signal delivered");
        Ok(())
    }

    async fn wait_exit(&self, id: &ContainerId) -> Result<i32> {
        let exit = {
            let state = self.lock();
            state
                .processes
                .get(id)
                .ok_or_else(|| unknown_process(id))?
                .exit
                .subscribe()
        };
        await_exit(id, exit).await
    }

    async fn processes(&self, id: &ContainerId) -> Result<Vec<ProcessInfo>> {
        let state = self.lock();
        let process = state
            .processes
            .get(id)
            .filter(|p| !p.exited())
            .ok_or_else(|| unknown_process(id))?;
        Ok(vec![ProcessInfo {
            pid: 1,
            host_pid: process.pid,
            ppid: 0,
            user: "root".into(),
            host_user: "root".into(),
            cpu_percent: 0.0,
            elapsed: process.started.elapsed(),
            state: if process.paused { "T" } else { "S" }.into(),
            comm: program_name(&process.command),
            args: process.command.join(" "),
            nice: 0,
        }])
    }

    async fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecOutput> {
        let (exit_code, duration) = {
            let state = self.lock();
            let process = state
                .processes
                .get(id)
                .filter(|p| !p.exited())
                .ok_or_else(|| unknown_process(id))?;
            if process.paused {
                return Err(BerthError::runtime(format!("container {id} is paused")));
            }
            (process.workload.exec_exit_code, process.workload.exec_duration)
        };
        tracing::debug!(id = %id, cmd = ?command, "simulated exec");
        if let Some(duration) = duration {
            tokio::time::sleep(duration).await;
        }
        Ok(ExecOutput {
            exit_code,
            ..ExecOutput::default()
        })
    }

    async fn adopt(&self, container: &ContainerRecord, _workdir: &Path) -> Result<()> {
        let paused = container.state == ContainerState::Paused;
        let _ = self.lock().prepared.insert(container.id.clone());
        let pid = self.spawn_process(container, container.pid, paused);
        tracing::debug!(id = %container.id, pid, "simulated process adopted");
        Ok(())
    }

    async fn cleanup(&self, id: &ContainerId) -> Result<()> {
        let mut state = self.lock();
        let _ = state.prepared.remove(id);
        if let Some(process) = state.processes.remove(id) {
            let _ = terminate(&process.exit, exit_code_for(Signal::SIGKILL));
        }
        Ok(())
    }
}
