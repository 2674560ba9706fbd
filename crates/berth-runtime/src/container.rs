//! Container record and creation options.
//!
//! [`ContainerRecord`] is the durable entry held by the store for every
//! container; [`CreateOptions`] is the fluent description callers hand to
//! [`Engine::create`](crate::engine::Engine::create).

use std::collections::BTreeMap;
use std::time::Duration;

use berth_common::constants::NO_EXIT_CODE;
use berth_common::error::{BerthError, Result};
use berth_common::types::{ContainerId, ContainerState, PodId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::{HealthCheckConfig, HealthState};

/// Checks a container, pod, or volume name: an alphanumeric first
/// character followed by alphanumerics, `_`, `.`, or `-`.
///
/// # Errors
///
/// Returns an invalid-argument error for any other name.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(BerthError::invalid_argument(format!(
            "{name:?} is not a valid {kind} name"
        )))
    }
}

/// A volume requested at create time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Named volume to mount, or `None` for a fresh anonymous volume.
    pub source: Option<String>,
    /// Mount point inside the container.
    pub destination: String,
}

/// A volume attached to a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Volume name in the registry.
    pub name: String,
    /// Mount point inside the container.
    pub destination: String,
    /// Whether the volume was created for (and is owned by) this container.
    pub anonymous: bool,
}

/// Persistent record of a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Unique identifier.
    pub id: ContainerId,
    /// Unique human-readable name.
    pub name: String,
    /// Image reference the container was created from.
    pub image: String,
    /// Command run as the main process.
    pub command: Vec<String>,
    /// Environment variables passed to the process.
    pub env: Vec<(String, String)>,
    /// User labels.
    pub labels: BTreeMap<String, String>,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// Exit code, `-1` until the container has exited.
    pub exit_code: i32,
    /// PID of the main process while it is live.
    pub pid: Option<u32>,
    /// Weak reference to the owning pod.
    pub pod: Option<PodId>,
    /// Attached volumes.
    pub volumes: Vec<VolumeMount>,
    /// Health check configuration, if any.
    pub healthcheck: Option<HealthCheckConfig>,
    /// Result of the most recent health checks.
    pub health: Option<HealthState>,
    /// Signal sent first by `stop`.
    pub stop_signal: String,
    /// Per-container stop grace period, in seconds.
    pub stop_timeout_secs: Option<u64>,
    /// Number of the last signal delivered through kill or stop.
    pub last_signal: Option<i32>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the main process was started.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the main process exited.
    pub finished_at: Option<DateTime<Utc>>,
}

impl ContainerRecord {
    /// Creates a record in the `Created` state.
    #[must_use]
    pub fn new(id: ContainerId, name: String, command: Vec<String>) -> Self {
        Self {
            id,
            name,
            image: String::new(),
            command,
            env: Vec::new(),
            labels: BTreeMap::new(),
            state: ContainerState::Created,
            exit_code: NO_EXIT_CODE,
            pid: None,
            pod: None,
            volumes: Vec::new(),
            healthcheck: None,
            health: None,
            stop_signal: "SIGTERM".into(),
            stop_timeout_secs: None,
            last_signal: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Returns true once the main process has exited at least once.
    #[must_use]
    pub const fn has_exited(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Names of the anonymous volumes this container owns.
    pub fn anonymous_volumes(&self) -> impl Iterator<Item = &str> {
        self.volumes
            .iter()
            .filter(|v| v.anonymous)
            .map(|v| v.name.as_str())
    }

    /// Returns true when the container mounts the named volume.
    #[must_use]
    pub fn uses_volume(&self, name: &str) -> bool {
        self.volumes.iter().any(|v| v.name == name)
    }
}

/// Fluent description of a container to create.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub(crate) name: Option<String>,
    pub(crate) image: String,
    pub(crate) command: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) pod: Option<String>,
    pub(crate) volumes: Vec<VolumeSpec>,
    pub(crate) healthcheck: Option<HealthCheckConfig>,
    pub(crate) stop_signal: Option<String>,
    pub(crate) stop_timeout: Option<Duration>,
}

impl CreateOptions {
    /// Starts a description for a container running `command`.
    #[must_use]
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
            ..Self::default()
        }
    }

    /// Sets the container name. An empty name lets the engine pick one.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.labels.insert(key.into(), value.into());
        self
    }

    /// Places the container in a pod, by pod name or ID.
    #[must_use]
    pub fn pod(mut self, pod: impl Into<String>) -> Self {
        self.pod = Some(pod.into());
        self
    }

    /// Mounts a fresh anonymous volume owned by the container.
    #[must_use]
    pub fn anonymous_volume(mut self, destination: impl Into<String>) -> Self {
        self.volumes.push(VolumeSpec {
            source: None,
            destination: destination.into(),
        });
        self
    }

    /// Mounts a named volume, creating it if needed.
    #[must_use]
    pub fn named_volume(mut self, name: impl Into<String>, destination: impl Into<String>) -> Self {
        self.volumes.push(VolumeSpec {
            source: Some(name.into()),
            destination: destination.into(),
        });
        self
    }

    /// Configures a health check.
    #[must_use]
    pub fn healthcheck(mut self, config: HealthCheckConfig) -> Self {
        self.healthcheck = Some(config);
        self
    }

    /// Overrides the signal `stop` sends first.
    #[must_use]
    pub fn stop_signal(mut self, signal: impl Into<String>) -> Self {
        self.stop_signal = Some(signal.into());
        self
    }

    /// Overrides the stop grace period.
    #[must_use]
    pub const fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }
}
