//! Persistent state management.
//!
//! Maintains a local JSON index of all containers, pods, and volumes,
//! enabling daemon-less lifecycle management: each process restores the
//! engine from the index, re-adopts live containers through the backend,
//! and writes the index back when it is done.

use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::sync::Arc;

use berth_common::config::BerthConfig;
use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerState;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::backend::RuntimeBackend;
use crate::container::ContainerRecord;
use crate::engine::Engine;
use crate::pod::PodRecord;
use crate::volume::Volume;

/// On-disk snapshot of the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateFile {
    /// Every container not being removed.
    #[serde(default)]
    pub containers: Vec<ContainerRecord>,
    /// Registered pods.
    #[serde(default)]
    pub pods: Vec<PodRecord>,
    /// Registered volumes.
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

fn io_error(path: &Path, source: std::io::Error) -> BerthError {
    BerthError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Loads the state index from disk. A missing file is an empty state.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_state(path: &Path) -> Result<StateFile> {
    tracing::debug!(path = %path.display(), "loading state index");
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(StateFile::default()),
        Err(e) => Err(io_error(path, e)),
    }
}

/// Persists the state index to disk atomically.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_state(path: &Path, state: &StateFile) -> Result<()> {
    tracing::debug!(
        path = %path.display(),
        containers = state.containers.len(),
        "saving state index"
    );
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let json = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

impl Engine {
    /// Captures every container, pod, and volume.
    pub async fn snapshot(&self) -> StateFile {
        let mut containers = Vec::new();
        for entry in self.inner.store.entries() {
            let record = entry.lock().await;
            if record.state != ContainerState::Removing {
                containers.push(record.clone());
            }
        }
        StateFile {
            containers,
            pods: self.inner.pods.list(),
            volumes: self.inner.volumes.list(),
        }
    }

    /// Rebuilds an engine from a snapshot.
    ///
    /// Live containers are re-adopted by the backend and monitored again;
    /// one that cannot be adopted is recorded as stopped. Prepared
    /// containers are prepared again, falling back to `Created`.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be registered.
    pub async fn restore(
        config: BerthConfig,
        backend: Arc<dyn RuntimeBackend>,
        state: StateFile,
    ) -> Result<Self> {
        let engine = Self::new(config, backend);
        engine.inner.pods.restore(state.pods);
        engine.inner.volumes.restore(state.volumes);

        for mut record in state.containers {
            let workdir = engine.container_dir(&record.id);
            match record.state {
                ContainerState::Running | ContainerState::Paused => {
                    if let Err(e) = engine.inner.backend.adopt(&record, &workdir).await {
                        tracing::warn!(id = %record.id, error = %e, "container lost, marking it stopped");
                        record.state = ContainerState::Stopped;
                        record.pid = None;
                        record.finished_at = Some(Utc::now());
                    }
                }
                ContainerState::Initialized => {
                    if let Err(e) = engine.inner.backend.init(&record, &workdir).await {
                        tracing::warn!(id = %record.id, error = %e, "re-initialization failed");
                        record.state = ContainerState::Created;
                    }
                }
                ContainerState::Removing => {
                    tracing::debug!(id = %record.id, "dropping half-removed container");
                    continue;
                }
                ContainerState::Created | ContainerState::Stopped => {}
            }

            let live = record.state.is_live();
            let entry = engine.inner.store.insert(record)?;
            if live {
                engine.spawn_monitor(entry.id().clone());
            }
        }

        tracing::debug!(containers = engine.inner.store.len(), "engine restored");
        Ok(engine)
    }

    /// Restores the engine from the configured state file.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read or restored.
    pub async fn open(config: BerthConfig, backend: Arc<dyn RuntimeBackend>) -> Result<Self> {
        let state = load_state(&config.state_file)?;
        Self::restore(config, backend, state).await
    }

    /// Writes the current state to the configured state file.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written.
    pub async fn save(&self) -> Result<()> {
        let state = self.snapshot().await;
        save_state(&self.inner.config.state_file, &state)
    }
}
