//! Backend running containers as host processes.
//!
//! Each main process is spawned in its own process group so signals,
//! SIGSTOP-based pause, and SIGCONT-based unpause reach the whole tree.
//! Output is appended to `output.log` in the container directory.

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use berth_common::constants::NO_EXIT_CODE;
use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg};
use nix::unistd::Pid;
use sysinfo::{Pid as SysPid, Process, ProcessStatus, System, Users};
use tokio::process::Command;
use tokio::sync::watch;

use super::{ExecOutput, ProcessInfo, RuntimeBackend, await_exit, unknown_process};
use crate::container::ContainerRecord;
use crate::signal::{Signal, is_terminating};

/// File receiving the main process's stdout and stderr.
pub const LOG_FILE: &str = "output.log";

const ADOPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct HostProcess {
    pid: u32,
    workdir: PathBuf,
    env: Vec<(String, String)>,
    exit: Arc<watch::Sender<Option<i32>>>,
    last_signal: Arc<AtomicI32>,
}

/// Backend that runs each container as a host process group.
#[derive(Debug, Default)]
pub struct HostBackend {
    processes: Mutex<HashMap<ContainerId, HostProcess>>,
}

impl HostBackend {
    /// Creates a backend with no tracked processes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ContainerId, HostProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pid_of(&self, id: &ContainerId) -> Result<u32> {
        self.lock()
            .get(id)
            .map(|p| p.pid)
            .ok_or_else(|| unknown_process(id))
    }

    fn track(&self, id: &ContainerId, process: HostProcess) {
        let _ = self.lock().insert(id.clone(), process);
    }
}

fn to_pid(pid: u32) -> Result<Pid> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| BerthError::runtime(format!("PID {pid} is out of range")))
}

fn signal_group(pid: u32, signal: Signal) -> Result<()> {
    match killpg(to_pid(pid)?, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(BerthError::runtime(format!(
            "failed to send {signal} to process group {pid}: {e}"
        ))),
    }
}

fn is_alive(pid: u32) -> bool {
    to_pid(pid).is_ok_and(|pid| !matches!(kill(pid, None::<Signal>), Err(Errno::ESRCH)))
}

fn exit_status_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signo| 128 + signo))
        .unwrap_or(NO_EXIT_CODE)
}

fn io_error(path: &Path, source: std::io::Error) -> BerthError {
    BerthError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn status_letter(status: ProcessStatus) -> &'static str {
    match status {
        ProcessStatus::Run => "R",
        ProcessStatus::Sleep => "S",
        ProcessStatus::Idle => "I",
        ProcessStatus::Stop | ProcessStatus::Tracing => "T",
        ProcessStatus::Zombie => "Z",
        ProcessStatus::UninterruptibleDiskSleep => "D",
        ProcessStatus::Dead => "X",
        _ => "?",
    }
}

/// Reads the nice value from `/proc/<pid>/stat`, or 0 when unavailable.
fn nice_of(pid: u32) -> i32 {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return 0;
    };
    // The command name may contain spaces, so fields are counted after ')'.
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().nth(16))
        .and_then(|field| field.parse().ok())
        .unwrap_or(0)
}

fn describe(process: &Process, users: &Users) -> ProcessInfo {
    let user = process
        .user_id()
        .and_then(|uid| users.get_user_by_id(uid))
        .map_or_else(|| "?".to_string(), |u| u.name().to_string());
    let pid = process.pid().as_u32();
    ProcessInfo {
        pid,
        host_pid: pid,
        ppid: process.parent().map_or(0, SysPid::as_u32),
        host_user: user.clone(),
        user,
        cpu_percent: process.cpu_usage(),
        elapsed: Duration::from_secs(process.run_time()),
        state: status_letter(process.status()).to_string(),
        comm: process.name().to_string(),
        args: process.cmd().join(" "),
        nice: nice_of(pid),
    }
}

/// Collects `root` and all of its descendants.
fn process_tree(root: u32) -> Vec<ProcessInfo> {
    let mut system = System::new();
    system.refresh_processes();
    let users = Users::new_with_refreshed_list();

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(pid.as_u32());
        }
    }

    let mut members = vec![root];
    let mut next = 0;
    while next < members.len() {
        if let Some(kids) = children.get(&members[next]) {
            members.extend(kids.iter().copied());
        }
        next += 1;
    }

    members
        .into_iter()
        .filter_map(|pid| system.process(SysPid::from_u32(pid)))
        .map(|process| describe(process, &users))
        .collect()
}

#[async_trait]
impl RuntimeBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn init(&self, container: &ContainerRecord, workdir: &Path) -> Result<()> {
        let program = container
            .command
            .first()
            .ok_or_else(|| BerthError::invalid_argument("container command is empty"))?;
        let resolved = which::which(program)
            .map_err(|e| BerthError::runtime(format!("executable {program:?} not found: {e}")))?;
        std::fs::create_dir_all(workdir).map_err(|e| io_error(workdir, e))?;
        tracing::debug!(id = %container.id, program = %resolved.display(), "host container prepared");
        Ok(())
    }

    async fn start(&self, container: &ContainerRecord, workdir: &Path) -> Result<u32> {
        let program = container
            .command
            .first()
            .ok_or_else(|| BerthError::invalid_argument("container command is empty"))?;
        let log_path = workdir.join(LOG_FILE);
        let stdout = File::options()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| io_error(&log_path, e))?;
        let stderr = stdout.try_clone().map_err(|e| io_error(&log_path, e))?;

        let mut child = Command::new(program)
            .args(container.command.iter().skip(1))
            .envs(container.env.iter().map(|(k, v)| (k, v)))
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .spawn()
            .map_err(|e| BerthError::runtime(format!("failed to spawn {program:?}: {e}")))?;
        let pid = child
            .id()
            .ok_or_else(|| BerthError::runtime("process exited before its PID was read"))?;

        let (tx, _) = watch::channel(None);
        let exit = Arc::new(tx);
        let reaper = Arc::clone(&exit);
        let id = container.id.clone();
        let _ = tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_status_code(status),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "failed to reap container process");
                    NO_EXIT_CODE
                }
            };
            let _ = reaper.send_replace(Some(code));
        });

        self.track(
            &container.id,
            HostProcess {
                pid,
                workdir: workdir.to_path_buf(),
                env: container.env.clone(),
                exit,
                last_signal: Arc::new(AtomicI32::new(0)),
            },
        );
        tracing::info!(id = %container.id, pid, "host process started");
        Ok(pid)
    }

    async fn pause(&self, id: &ContainerId) -> Result<()> {
        signal_group(self.pid_of(id)?, Signal::SIGSTOP)
    }

    async fn resume(&self, id: &ContainerId) -> Result<()> {
        signal_group(self.pid_of(id)?, Signal::SIGCONT)
    }

    async fn signal(&self, id: &ContainerId, signal: Signal) -> Result<()> {
        let pid = {
            let processes = self.lock();
            let process = processes.get(id).ok_or_else(|| unknown_process(id))?;
            if is_terminating(signal) {
                process.last_signal.store(signal as i32, Ordering::Relaxed);
            }
            process.pid
        };
        signal_group(pid, signal)
    }

    async fn wait_exit(&self, id: &ContainerId) -> Result<i32> {
        let exit = self
            .lock()
            .get(id)
            .map(|p| p.exit.subscribe())
            .ok_or_else(|| unknown_process(id))?;
        await_exit(id, exit).await
    }

    async fn processes(&self, id: &ContainerId) -> Result<Vec<ProcessInfo>> {
        let root = self.pid_of(id)?;
        tokio::task::spawn_blocking(move || process_tree(root))
            .await
            .map_err(|e| BerthError::runtime(format!("process listing failed: {e}")))
    }

    async fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecOutput> {
        let (workdir, env) = {
            let processes = self.lock();
            let process = processes.get(id).ok_or_else(|| unknown_process(id))?;
            (process.workdir.clone(), process.env.clone())
        };
        let program = command
            .first()
            .ok_or_else(|| BerthError::invalid_argument("exec command is empty"))?;
        tracing::debug!(id = %id, cmd = ?command, "exec in container");

        let output = Command::new(program)
            .args(command.iter().skip(1))
            .envs(env)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BerthError::runtime(format!("failed to exec {program:?}: {e}")))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: exit_status_code(output.status),
        })
    }

    async fn adopt(&self, container: &ContainerRecord, workdir: &Path) -> Result<()> {
        let pid = container.pid.ok_or_else(|| {
            BerthError::runtime(format!("container {} has no recorded PID", container.id))
        })?;
        let last_signal = Arc::new(AtomicI32::new(container.last_signal.unwrap_or(0)));
        let (tx, _) = watch::channel(None);
        let exit = Arc::new(tx);

        // Not our child: poll for disappearance and derive the exit code
        // from the last terminating signal we know of.
        let watcher: Weak<_> = Arc::downgrade(&exit);
        let signal_seen = Arc::clone(&last_signal);
        let _ = tokio::spawn(async move {
            while is_alive(pid) {
                tokio::time::sleep(ADOPT_POLL_INTERVAL).await;
                if watcher.strong_count() == 0 {
                    return;
                }
            }
            if let Some(exit) = watcher.upgrade() {
                let code = match signal_seen.load(Ordering::Relaxed) {
                    0 => 0,
                    signo => 128 + signo,
                };
                let _ = exit.send_replace(Some(code));
            }
        });

        self.track(
            &container.id,
            HostProcess {
                pid,
                workdir: workdir.to_path_buf(),
                env: container.env.clone(),
                exit,
                last_signal,
            },
        );
        tracing::info!(id = %container.id, pid, "adopted host process");
        Ok(())
    }

    async fn cleanup(&self, id: &ContainerId) -> Result<()> {
        let Some(process) = self.lock().remove(id) else {
            return Ok(());
        };
        if process.exit.borrow().is_none() && is_alive(process.pid) {
            tracing::warn!(id = %id, pid = process.pid, "killing leftover process group");
            signal_group(process.pid, Signal::SIGKILL)?;
        }
        Ok(())
    }
}
