//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for Berth data on Linux with root access.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/berth";

/// Returns the data directory, preferring `$HOME/.berth` for non-root
/// or non-Linux environments, falling back to `/var/lib/berth`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".berth");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Name of the state index file inside the data directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Subdirectory holding one resource directory per container.
pub const CONTAINERS_DIR: &str = "containers";

/// Subdirectory holding volume data.
pub const VOLUMES_DIR: &str = "volumes";

/// Number of ID characters shown in listings.
pub const SHORT_ID_LENGTH: usize = 12;

/// Shortest ID prefix accepted for lookups unless configured otherwise.
pub const DEFAULT_MIN_PREFIX_LEN: usize = 3;

/// Exit code reported before a container has exited, and by waits that
/// match a non-exit condition.
pub const NO_EXIT_CODE: i32 = -1;

/// Seconds `stop` waits after the stop signal before sending SIGKILL.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Seconds to wait for an exit after SIGKILL before giving up.
pub const DEFAULT_KILL_TIMEOUT_SECS: u64 = 5;

/// Capacity of the lifecycle event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "berth";

