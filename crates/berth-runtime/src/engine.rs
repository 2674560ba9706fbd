//! Lifecycle controller.
//!
//! [`Engine`] resolves references through the store, checks every
//! transition against the container's state while holding its record lock,
//! drives the backend, and publishes the committed status. Long waits
//! (stop grace periods, forced removal) run with the lock released; the
//! exit monitor spawned by `start` commits the `Stopped` transition.

use std::fmt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use berth_common::config::BerthConfig;
use berth_common::constants::{APP_NAME, EVENT_CHANNEL_CAPACITY, NO_EXIT_CODE};
use berth_common::error::{BerthError, Result};
use berth_common::types::{ContainerId, ContainerState};
use chrono::Utc;
use tokio::sync::{broadcast, watch};

use crate::backend::RuntimeBackend;
use crate::container::{ContainerRecord, CreateOptions, validate_name};
use crate::event::{ContainerEvent, EventAction};
use crate::pod::PodRegistry;
use crate::report::RemoveReport;
use crate::signal::{Signal, parse_deliverable, parse_signal};
use crate::store::{Entry, StatusSnapshot, Store};
use crate::volume::VolumeRegistry;

/// Options for removing containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Kill live containers instead of refusing them.
    pub force: bool,
    /// Also remove anonymous volumes no other container uses.
    pub volumes: bool,
}

impl RemoveOptions {
    /// Kills live containers before removing them.
    #[must_use]
    pub const fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Removes anonymous volumes along with the container.
    #[must_use]
    pub const fn with_volumes(mut self) -> Self {
        self.volumes = true;
        self
    }
}

pub(crate) struct EngineInner {
    pub(crate) config: BerthConfig,
    pub(crate) store: Store,
    pub(crate) backend: Arc<dyn RuntimeBackend>,
    pub(crate) pods: PodRegistry,
    pub(crate) volumes: VolumeRegistry,
    events: broadcast::Sender<ContainerEvent>,
}

/// Container lifecycle engine.
///
/// Cheap to clone; clones share the same store and backend.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.inner.backend.name())
            .field("data_dir", &self.inner.config.data_dir)
            .field("containers", &self.inner.store.len())
            .finish_non_exhaustive()
    }
}

/// Fails with `NotFound` for a container being removed and with
/// `InvalidState` when its state is not in `allowed`.
pub(crate) fn require_state(
    record: &ContainerRecord,
    allowed: &[ContainerState],
    operation: &'static str,
) -> Result<()> {
    if record.state == ContainerState::Removing {
        return Err(BerthError::container_not_found(record.id.as_str()));
    }
    if allowed.contains(&record.state) {
        Ok(())
    } else {
        Err(BerthError::InvalidState {
            id: record.id.to_string(),
            state: record.state,
            operation,
        })
    }
}

/// Returns true if the container leaves the live states within `limit`.
async fn exited_within(status: &mut watch::Receiver<StatusSnapshot>, limit: Duration) -> bool {
    matches!(
        tokio::time::timeout(limit, status.wait_for(|s| !s.state.is_live())).await,
        Ok(Ok(_))
    )
}

fn remove_dir_quietly(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == IoErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove directory");
        }
    }
}

impl Engine {
    /// Creates an engine over `backend` with an empty store.
    #[must_use]
    pub fn new(config: BerthConfig, backend: Arc<dyn RuntimeBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                store: Store::new(config.min_prefix_len),
                volumes: VolumeRegistry::new(config.volumes_dir()),
                pods: PodRegistry::default(),
                backend,
                config,
                events,
            }),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &BerthConfig {
        &self.inner.config
    }

    /// Name of the execution backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    /// Subscribes to lifecycle events emitted from now on.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ContainerEvent> {
        self.inner.events.subscribe()
    }

    /// Resource directory of a container.
    #[must_use]
    pub fn container_dir(&self, id: &ContainerId) -> PathBuf {
        self.inner.config.containers_dir().join(id.as_str())
    }

    pub(crate) fn emit(&self, id: &ContainerId, name: &str, action: EventAction) {
        let _ = self.inner.events.send(ContainerEvent::now(id, name, action));
    }

    /// Registers a new container in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error for an empty command, a malformed
    /// name, or an unknown stop signal; `NotFound` for an unknown pod;
    /// `NameInUse` if a live container already has the name.
    pub fn create(&self, options: CreateOptions) -> Result<ContainerId> {
        let CreateOptions {
            name,
            image,
            command,
            env,
            labels,
            pod,
            volumes,
            healthcheck,
            stop_signal,
            stop_timeout,
        } = options;

        if command.is_empty() {
            return Err(BerthError::invalid_argument("a command is required"));
        }
        let stop_signal = stop_signal
            .as_deref()
            .map_or(Ok(Signal::SIGTERM), parse_deliverable)?;
        let pod = pod
            .as_deref()
            .map(|reference| self.inner.pods.resolve(reference))
            .transpose()?
            .map(|pod| pod.id);

        let id = ContainerId::generate();
        let name = match name.filter(|n| !n.is_empty()) {
            Some(name) => {
                validate_name("container", &name)?;
                name
            }
            None => format!("{APP_NAME}_{}", id.short()),
        };
        if self.inner.store.name_in_use(&name) {
            return Err(BerthError::NameInUse {
                kind: "container",
                name,
            });
        }

        let mut record = ContainerRecord::new(id.clone(), name, command);
        record.image = image;
        record.env = env;
        record.labels = labels;
        record.pod = pod;
        record.healthcheck = healthcheck;
        record.stop_signal = stop_signal.as_str().to_string();
        record.stop_timeout_secs = stop_timeout.map(|d| d.as_secs());

        let workdir = self.container_dir(&id);
        std::fs::create_dir_all(&workdir).map_err(|source| BerthError::Io {
            path: workdir.clone(),
            source,
        })?;
        record.volumes = match self.inner.volumes.attach(&volumes) {
            Ok(mounts) => mounts,
            Err(e) => {
                remove_dir_quietly(&workdir);
                return Err(e);
            }
        };

        let mounts = record.volumes.clone();
        let entry = match self.inner.store.insert(record) {
            Ok(entry) => entry,
            Err(e) => {
                self.inner.volumes.release_anonymous(&mounts);
                remove_dir_quietly(&workdir);
                return Err(e);
            }
        };
        tracing::info!(id = %entry.id(), name = %entry.name(), "container created");
        self.emit(entry.id(), entry.name(), EventAction::Create);
        Ok(id)
    }

    /// Prepares runtime resources without starting the process.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reference, `InvalidState` unless
    /// the container is `Created`, or the backend's error.
    pub async fn init(&self, reference: &str) -> Result<()> {
        let entry = self.inner.store.resolve(reference)?;
        let mut record = entry.lock().await;
        require_state(&record, &[ContainerState::Created], "init")?;

        self.inner
            .backend
            .init(&record, &self.container_dir(&record.id))
            .await?;
        record.state = ContainerState::Initialized;
        entry.publish(&record);
        self.emit(entry.id(), entry.name(), EventAction::Init);
        drop(record);

        tracing::info!(id = %entry.id(), "container initialized");
        Ok(())
    }

    /// Starts the main process. Starting a running container is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reference, `InvalidState` for a
    /// paused or stopped container, or the backend's error.
    pub async fn start(&self, reference: &str) -> Result<()> {
        let entry = self.inner.store.resolve(reference)?;
        let mut record = entry.lock().await;
        if record.state == ContainerState::Running {
            tracing::debug!(id = %entry.id(), "container already running");
            return Ok(());
        }
        require_state(
            &record,
            &[ContainerState::Created, ContainerState::Initialized],
            "start",
        )?;

        let workdir = self.container_dir(&record.id);
        if record.state == ContainerState::Created {
            self.inner.backend.init(&record, &workdir).await?;
            record.state = ContainerState::Initialized;
            entry.publish(&record);
        }

        let pid = self.inner.backend.start(&record, &workdir).await?;
        record.state = ContainerState::Running;
        record.pid = Some(pid);
        record.exit_code = NO_EXIT_CODE;
        record.started_at = Some(Utc::now());
        entry.publish(&record);
        self.emit(entry.id(), entry.name(), EventAction::Start);
        drop(record);

        tracing::info!(id = %entry.id(), pid, "container started");
        self.spawn_monitor(entry.id().clone());
        Ok(())
    }

    /// Watches the backend for the main process's exit and records it.
    pub(crate) fn spawn_monitor(&self, id: ContainerId) {
        let engine = self.clone();
        let _ = tokio::spawn(async move {
            match engine.inner.backend.wait_exit(&id).await {
                Ok(exit_code) => engine.record_exit(&id, exit_code).await,
                Err(e) => tracing::warn!(id = %id, error = %e, "exit monitor failed"),
            }
        });
    }

    /// Commits the `Stopped` transition for an exited main process.
    pub(crate) async fn record_exit(&self, id: &ContainerId, exit_code: i32) {
        let Some(entry) = self.inner.store.get(id) else {
            return;
        };
        let mut record = entry.lock().await;
        if !record.state.is_live() {
            tracing::debug!(id = %id, state = %record.state, "exit observed outside a live state");
            return;
        }
        record.state = ContainerState::Stopped;
        record.exit_code = exit_code;
        record.pid = None;
        record.finished_at = Some(Utc::now());
        entry.publish(&record);
        self.emit(id, entry.name(), EventAction::Died { exit_code });
        drop(record);

        tracing::info!(id = %id, exit_code, "container exited");
    }

    /// Freezes a running container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reference, `InvalidState` unless
    /// the container is `Running`, or the backend's error.
    pub async fn pause(&self, reference: &str) -> Result<()> {
        let entry = self.inner.store.resolve(reference)?;
        let mut record = entry.lock().await;
        require_state(&record, &[ContainerState::Running], "pause")?;

        self.inner.backend.pause(&record.id).await?;
        record.state = ContainerState::Paused;
        entry.publish(&record);
        self.emit(entry.id(), entry.name(), EventAction::Pause);
        drop(record);

        tracing::info!(id = %entry.id(), "container paused");
        Ok(())
    }

    /// Thaws a paused container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reference, `InvalidState` unless
    /// the container is `Paused`, or the backend's error.
    pub async fn unpause(&self, reference: &str) -> Result<()> {
        let entry = self.inner.store.resolve(reference)?;
        let mut record = entry.lock().await;
        require_state(&record, &[ContainerState::Paused], "unpause")?;

        self.inner.backend.resume(&record.id).await?;
        record.state = ContainerState::Running;
        entry.publish(&record);
        self.emit(entry.id(), entry.name(), EventAction::Unpause);
        drop(record);

        tracing::info!(id = %entry.id(), "container unpaused");
        Ok(())
    }

    /// Sends the container's stop signal and waits for it to exit,
    /// escalating to SIGKILL after the grace period.
    ///
    /// `timeout` overrides the per-container and default grace periods.
    /// Returns once the container is `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reference, `InvalidState` unless
    /// the container is `Running` (including when it was paused during the
    /// grace period), or an internal error if the process survives SIGKILL.
    pub async fn stop(&self, reference: &str, timeout: Option<Duration>) -> Result<()> {
        let entry = self.inner.store.resolve(reference)?;
        let mut status = entry.subscribe();

        let grace = {
            let mut record = entry.lock().await;
            require_state(&record, &[ContainerState::Running], "stop")?;
            let signal = parse_signal(&record.stop_signal)?;
            let grace = timeout
                .or_else(|| record.stop_timeout_secs.map(Duration::from_secs))
                .unwrap_or_else(|| self.inner.config.stop_timeout());
            self.inner.backend.signal(&record.id, signal).await?;
            record.last_signal = Some(signal as i32);
            tracing::info!(id = %record.id, signal = %signal, grace_secs = grace.as_secs(), "stopping container");
            grace
        };

        if exited_within(&mut status, grace).await {
            return Ok(());
        }

        {
            let mut record = entry.lock().await;
            if !record.state.is_live() {
                return Ok(());
            }
            // A pause that committed during the grace period is never escalated.
            require_state(&record, &[ContainerState::Running], "stop")?;
            tracing::warn!(id = %record.id, "grace period elapsed, sending SIGKILL");
            self.inner.backend.signal(&record.id, Signal::SIGKILL).await?;
            record.last_signal = Some(Signal::SIGKILL as i32);
        }

        if exited_within(&mut status, self.inner.config.kill_timeout()).await {
            Ok(())
        } else {
            Err(BerthError::runtime(format!(
                "container {} did not exit after SIGKILL",
                entry.id()
            )))
        }
    }

    /// Delivers a signal to a running container without waiting for it to
    /// exit.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reference, an invalid-argument
    /// error for an unknown or job-control signal, `InvalidState` unless the
    /// container is `Running`, or the backend's error.
    pub async fn kill(&self, reference: &str, signal: &str) -> Result<()> {
        let entry = self.inner.store.resolve(reference)?;
        let signal = parse_deliverable(signal)?;
        let mut record = entry.lock().await;
        require_state(&record, &[ContainerState::Running], "kill")?;

        self.inner.backend.signal(&record.id, signal).await?;
        record.last_signal = Some(signal as i32);
        self.emit(
            entry.id(),
            entry.name(),
            EventAction::Kill {
                signal: signal.as_str().to_string(),
            },
        );
        drop(record);

        tracing::info!(id = %entry.id(), signal = %signal, "signal delivered");
        Ok(())
    }

    /// Removes one container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reference or a container already
    /// being removed, `InvalidState` for a live container without `force`,
    /// or an internal error if a forced kill does not take effect.
    pub async fn remove(&self, reference: &str, options: RemoveOptions) -> Result<ContainerId> {
        let entry = self.inner.store.resolve(reference)?;
        self.remove_entry(&entry, options).await?;
        Ok(entry.id().clone())
    }

    /// Removes several containers, recording an outcome for each.
    pub async fn remove_many<S: AsRef<str>>(
        &self,
        references: &[S],
        options: RemoveOptions,
    ) -> RemoveReport {
        let mut report = RemoveReport::default();
        for reference in references {
            let reference = reference.as_ref();
            match self.remove(reference, options).await {
                Ok(id) => report.push_success(id.as_str(), None),
                Err(e) => {
                    tracing::debug!(reference, error = %e, "remove failed");
                    report.push_failure(reference, &e);
                }
            }
        }
        report
    }

    pub(crate) async fn remove_entry(&self, entry: &Arc<Entry>, options: RemoveOptions) -> Result<()> {
        let id = entry.id().clone();
        let mut status = entry.subscribe();

        let killed = {
            let mut record = entry.lock().await;
            if record.state == ContainerState::Removing {
                return Err(BerthError::container_not_found(id.as_str()));
            }
            if record.state.is_live() {
                if !options.force {
                    return Err(BerthError::InvalidState {
                        id: id.to_string(),
                        state: record.state,
                        operation: "remove",
                    });
                }
                self.inner.backend.signal(&id, Signal::SIGKILL).await?;
                record.last_signal = Some(Signal::SIGKILL as i32);
                true
            } else {
                false
            }
        };

        if killed {
            tracing::debug!(id = %id, "waiting for killed container to exit");
            if !exited_within(&mut status, self.inner.config.kill_timeout()).await {
                return Err(BerthError::runtime(format!(
                    "container {id} did not exit after SIGKILL"
                )));
            }
        }

        let record = {
            let mut record = entry.lock().await;
            let allowed = [
                ContainerState::Created,
                ContainerState::Initialized,
                ContainerState::Stopped,
            ];
            require_state(&record, &allowed, "remove")?;
            record.state = ContainerState::Removing;
            entry.publish(&record);
            record.clone()
        };

        if let Err(e) = self.inner.backend.cleanup(&id).await {
            tracing::warn!(id = %id, error = %e, "backend cleanup failed");
        }
        remove_dir_quietly(&self.container_dir(&id));
        let _ = self.inner.store.remove(&id);
        if options.volumes {
            self.release_volumes(&record).await;
        }

        tracing::info!(id = %id, name = %record.name, "container removed");
        self.emit(&id, &record.name, EventAction::Remove);
        Ok(())
    }

    async fn release_volumes(&self, record: &ContainerRecord) {
        for name in record.anonymous_volumes() {
            if self.volume_in_use(name).await {
                tracing::debug!(volume = %name, "volume still in use, keeping it");
                continue;
            }
            if let Err(e) = self.inner.volumes.remove(name) {
                tracing::warn!(volume = %name, error = %e, "failed to remove volume");
            }
        }
    }

    async fn volume_in_use(&self, name: &str) -> bool {
        for entry in self.inner.store.entries() {
            if entry.lock().await.uses_volume(name) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use berth_common::error::ErrorKind;

    use super::*;
    use crate::backend::SimulatedBackend;

    fn engine(dir: &Path) -> Engine {
        Engine::new(
            BerthConfig::with_data_dir(dir),
            Arc::new(SimulatedBackend::new()),
        )
    }

    fn top() -> CreateOptions {
        CreateOptions::new("alpine", vec!["top".into()])
    }

    #[tokio::test]
    async fn create_assigns_name_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let id = engine.create(top()).unwrap();

        let entry = engine.inner.store.resolve(id.as_str()).unwrap();
        assert!(entry.name().starts_with("berth_"));
        assert!(engine.container_dir(&id).is_dir());
        assert_eq!(entry.status().state, ContainerState::Created);
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());

        let empty = CreateOptions::new("alpine", Vec::new());
        assert_eq!(
            engine.create(empty).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        let bad_signal = top().stop_signal("SIGNOPE");
        assert_eq!(
            engine.create(bad_signal).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        let freezing_signal = top().stop_signal("SIGSTOP");
        assert_eq!(
            engine.create(freezing_signal).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        let missing_pod = top().pod("nope");
        assert!(engine.create(missing_pod).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn start_twice_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let id = engine.create(top().name("web")).unwrap();

        engine.start("web").await.unwrap();
        engine.start(id.as_str()).await.unwrap();
        let entry = engine.inner.store.resolve("web").unwrap();
        assert_eq!(entry.status().state, ContainerState::Running);
        assert!(entry.lock().await.pid.is_some());
    }

    #[tokio::test]
    async fn stop_records_sigterm_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let _ = engine.create(top().name("web")).unwrap();
        engine.start("web").await.unwrap();

        engine.stop("web", None).await.unwrap();
        let entry = engine.inner.store.resolve("web").unwrap();
        let record = entry.lock().await;
        assert_eq!(record.state, ContainerState::Stopped);
        assert_eq!(record.exit_code, 143);
        assert!(record.pid.is_none());
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn remove_refuses_running_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let id = engine.create(top().name("web")).unwrap();
        engine.start("web").await.unwrap();

        let err = engine.remove("web", RemoveOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let removed = engine
            .remove("web", RemoveOptions::default().forced())
            .await
            .unwrap();
        assert_eq!(removed, id);
        assert!(engine.inner.store.resolve("web").unwrap_err().is_not_found());
        assert!(!engine.container_dir(&id).exists());
    }

    #[tokio::test]
    async fn events_follow_the_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let mut events = engine.subscribe_events();

        let _ = engine.create(top().name("web")).unwrap();
        engine.start("web").await.unwrap();
        engine.kill("web", "KILL").await.unwrap();

        assert_eq!(events.recv().await.unwrap().action, EventAction::Create);
        assert_eq!(events.recv().await.unwrap().action, EventAction::Start);
        assert_eq!(
            events.recv().await.unwrap().action,
            EventAction::Kill {
                signal: "SIGKILL".into()
            }
        );
        assert_eq!(
            events.recv().await.unwrap().action,
            EventAction::Died { exit_code: 137 }
        );
    }
}
