//! Domain primitive types used across the Berth workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::SHORT_ID_LENGTH;
use crate::error::BerthError;

/// Generates a 64-character lowercase hex identifier.
#[must_use]
pub fn random_hex_id() -> String {
    let seed = uuid::Uuid::new_v4();
    format!("{:x}", Sha256::digest(seed.as_bytes()))
}

/// Unique identifier for a container instance.
///
/// Ordering is lexical so identifiers can key a sorted index for prefix
/// lookups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random 64-character hex container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(random_hex_id())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the display form truncated to [`SHORT_ID_LENGTH`] characters.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..SHORT_ID_LENGTH).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a pod.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodId(String);

impl PodId {
    /// Creates a pod ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random 64-character hex pod ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(random_hex_id())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Registered, no runtime resources prepared yet.
    Created,
    /// Runtime resources prepared, process not started.
    Initialized,
    /// Main process is alive.
    Running,
    /// Main process is frozen.
    Paused,
    /// Main process has exited; the exit code is recorded.
    Stopped,
    /// Removal is in progress; the entry is about to disappear.
    Removing,
}

impl ContainerState {
    /// Returns true while a process exists for the container.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Returns the lowercase name used in reports and filters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Removing => "removing",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerState {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" | "configured" => Ok(Self::Created),
            "initialized" => Ok(Self::Initialized),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "stopped" | "exited" => Ok(Self::Stopped),
            "removing" => Ok(Self::Removing),
            other => Err(BerthError::invalid_argument(format!(
                "unknown container state {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_64_hex_chars() {
        let id = ContainerId::generate();
        assert_eq!(id.as_str().len(), 64);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, ContainerId::generate());
    }

    #[test]
    fn short_id_truncates_to_twelve() {
        let id = ContainerId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(ContainerId::new("abc").short(), "abc");
    }

    #[test]
    fn exited_is_an_alias_for_stopped() {
        assert_eq!(
            "exited".parse::<ContainerState>().unwrap(),
            ContainerState::Stopped
        );
        assert_eq!(
            "RUNNING".parse::<ContainerState>().unwrap(),
            ContainerState::Running
        );
        assert!("dummy".parse::<ContainerState>().is_err());
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&ContainerState::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
    }
}
