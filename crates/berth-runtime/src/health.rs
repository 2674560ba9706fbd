//! Container health checks.
//!
//! A check runs the configured test command through the backend. Exit 0 is
//! healthy; any other result extends the failing streak, and the container
//! turns unhealthy once the streak reaches the configured retries.

use std::fmt;
use std::time::Duration;

use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{Engine, require_state};
use crate::event::EventAction;

/// Number of past results kept per container.
const MAX_LOG_ENTRIES: usize = 5;

/// Failing checks tolerated before a container is unhealthy.
pub const DEFAULT_RETRIES: u32 = 3;

/// How long a single check may run before it counts as failed.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Health check definition.
///
/// `test` follows the usual convention: `["CMD", arg0, ...]` runs a
/// command directly, `["CMD-SHELL", script]` runs it through `/bin/sh -c`,
/// and `["NONE"]` disables the check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Test command with its kind prefix.
    pub test: Vec<String>,
    /// Consecutive failures before the container is unhealthy.
    pub retries: u32,
    /// Per-check deadline in seconds; [`DEFAULT_TIMEOUT_SECS`] when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl HealthCheckConfig {
    /// A check run through the shell.
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            test: vec!["CMD-SHELL".into(), script.into()],
            retries: DEFAULT_RETRIES,
            timeout_secs: None,
        }
    }

    /// A check run as a direct command.
    #[must_use]
    pub fn command(argv: Vec<String>) -> Self {
        let mut test = Vec::with_capacity(argv.len() + 1);
        test.push("CMD".to_string());
        test.extend(argv);
        Self {
            test,
            retries: DEFAULT_RETRIES,
            timeout_secs: None,
        }
    }

    /// Overrides the retry count.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Overrides the per-check deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Deadline for one run of the check.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// The argv to execute, or `None` when the check is disabled.
    #[must_use]
    pub fn argv(&self) -> Option<Vec<String>> {
        let (kind, rest) = self.test.split_first()?;
        let argv = match kind.as_str() {
            "NONE" => return None,
            "CMD" => rest.to_vec(),
            "CMD-SHELL" => vec!["/bin/sh".into(), "-c".into(), rest.join(" ")],
            _ => self.test.clone(),
        };
        if argv.is_empty() { None } else { Some(argv) }
    }
}

/// Aggregate health of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Failing, but not yet past the retry budget.
    Starting,
    /// The last check passed.
    Healthy,
    /// The failing streak reached the retry budget.
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// One check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthLogEntry {
    /// When the check started.
    pub start: DateTime<Utc>,
    /// When it finished.
    pub end: DateTime<Utc>,
    /// Exit code of the test command, `-1` if it could not run.
    pub exit_code: i32,
    /// Captured output or the failure message.
    pub output: String,
}

/// Health state recorded on a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    /// Current status.
    pub status: HealthStatus,
    /// Consecutive failed checks.
    pub failing_streak: u32,
    /// Most recent results, oldest first.
    pub log: Vec<HealthLogEntry>,
}

impl HealthState {
    fn new() -> Self {
        Self {
            status: HealthStatus::Starting,
            failing_streak: 0,
            log: Vec::new(),
        }
    }

    fn record(&mut self, entry: HealthLogEntry, retries: u32) {
        if entry.exit_code == 0 {
            self.status = HealthStatus::Healthy;
            self.failing_streak = 0;
        } else {
            self.failing_streak += 1;
            if self.failing_streak >= retries {
                self.status = HealthStatus::Unhealthy;
            }
        }
        self.log.push(entry);
        if self.log.len() > MAX_LOG_ENTRIES {
            let excess = self.log.len() - MAX_LOG_ENTRIES;
            let _ = self.log.drain(..excess);
        }
    }
}

impl Engine {
    /// Runs the container's health check once and records the result.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reference or a container being
    /// removed, `PreconditionRequired` when no check is configured, and
    /// `InvalidState` unless the container is `Running` both before and
    /// after the check runs.
    pub async fn healthcheck(&self, reference: &str) -> Result<HealthState> {
        let entry = self.inner.store.resolve(reference)?;
        let (config, argv) = {
            let record = entry.lock().await;
            if record.state == ContainerState::Removing {
                return Err(BerthError::container_not_found(record.id.as_str()));
            }
            let Some(config) = record.healthcheck.clone() else {
                return Err(BerthError::PreconditionRequired {
                    message: format!("container {} has no defined healthcheck", record.name),
                });
            };
            let Some(argv) = config.argv() else {
                return Err(BerthError::PreconditionRequired {
                    message: format!("healthcheck of container {} is disabled", record.name),
                });
            };
            require_state(&record, &[ContainerState::Running], "healthcheck")?;
            (config, argv)
        };

        // The record lock is not held while the check runs.
        let start = Utc::now();
        let deadline = config.timeout();
        let (exit_code, output) =
            match tokio::time::timeout(deadline, self.inner.backend.exec(entry.id(), &argv)).await
            {
                Ok(Ok(out)) => (out.exit_code, out.stdout + &out.stderr),
                Ok(Err(e)) => (-1, e.to_string()),
                Err(_) => (
                    -1,
                    format!("health check exceeded {}s", deadline.as_secs()),
                ),
            };

        let mut record = entry.lock().await;
        require_state(&record, &[ContainerState::Running], "healthcheck")?;
        let health = record.health.get_or_insert_with(HealthState::new);
        health.record(
            HealthLogEntry {
                start,
                end: Utc::now(),
                exit_code,
                output,
            },
            config.retries,
        );
        let health = health.clone();
        self.emit(
            entry.id(),
            entry.name(),
            EventAction::HealthStatus {
                status: health.status.to_string(),
            },
        );
        drop(record);

        tracing::info!(id = %entry.id(), status = %health.status, exit_code, "health check ran");
        Ok(health)
    }
}
