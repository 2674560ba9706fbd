//! Lifecycle events broadcast by the engine.

use berth_common::types::ContainerId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// What happened to a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EventAction {
    /// The container was registered.
    Create,
    /// Runtime resources were prepared.
    Init,
    /// The main process was started.
    Start,
    /// The container was frozen.
    Pause,
    /// The container was thawed.
    Unpause,
    /// A signal was delivered.
    Kill {
        /// Signal name.
        signal: String,
    },
    /// The main process exited.
    Died {
        /// Recorded exit code.
        exit_code: i32,
    },
    /// The container was erased.
    Remove,
    /// A health check ran.
    HealthStatus {
        /// Resulting status.
        status: String,
    },
}

/// One lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerEvent {
    /// Container the event is about.
    pub id: ContainerId,
    /// Container name at the time of the event.
    pub name: String,
    /// What happened.
    #[serde(flatten)]
    pub action: EventAction,
    /// When it happened.
    pub time: DateTime<Utc>,
}

impl ContainerEvent {
    pub(crate) fn now(id: &ContainerId, name: &str, action: EventAction) -> Self {
        Self {
            id: id.clone(),
            name: name.to_string(),
            action,
            time: Utc::now(),
        }
    }
}
