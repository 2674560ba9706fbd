//! Global configuration model for the Berth engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration for the Berth engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BerthConfig {
    /// Base directory for container and volume resources.
    pub data_dir: PathBuf,
    /// Path to the state index file.
    pub state_file: PathBuf,
    /// Default grace period for `stop`, in seconds.
    pub stop_timeout_secs: u64,
    /// How long to wait for an exit after SIGKILL, in seconds.
    pub kill_timeout_secs: u64,
    /// Shortest ID prefix accepted when resolving references.
    pub min_prefix_len: usize,
}

impl BerthConfig {
    /// Builds a configuration rooted at `data_dir`, with the state file
    /// placed inside it.
    #[must_use]
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            state_file: data_dir.join(constants::STATE_FILE_NAME),
            data_dir,
            ..Self::default()
        }
    }

    /// Directory holding the per-container resource directories.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.data_dir.join(constants::CONTAINERS_DIR)
    }

    /// Directory holding volume data.
    #[must_use]
    pub fn volumes_dir(&self) -> PathBuf {
        self.data_dir.join(constants::VOLUMES_DIR)
    }

    /// Default stop grace period.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Post-SIGKILL exit deadline.
    #[must_use]
    pub const fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }
}

impl Default for BerthConfig {
    fn default() -> Self {
        let data_dir = constants::data_dir().clone();
        Self {
            state_file: data_dir.join(constants::STATE_FILE_NAME),
            data_dir,
            stop_timeout_secs: constants::DEFAULT_STOP_TIMEOUT_SECS,
            kill_timeout_secs: constants::DEFAULT_KILL_TIMEOUT_SECS,
            min_prefix_len: constants::DEFAULT_MIN_PREFIX_LEN,
        }
    }
}
