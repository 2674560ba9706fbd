//! Condition waits.
//!
//! A waiter subscribes to the container's status channel and suspends
//! until the published state belongs to its target set. Subscribing marks
//! the current value as seen, but `wait_for` checks it before suspending,
//! so a condition that already holds returns immediately.

use berth_common::constants::NO_EXIT_CODE;
use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerState;

use crate::engine::Engine;
use crate::store::StatusSnapshot;

/// States a waiter is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitCondition {
    targets: Vec<ContainerState>,
}

impl WaitCondition {
    /// Builds a condition; an empty set means "until the container exits".
    #[must_use]
    pub fn new(targets: &[ContainerState]) -> Self {
        let targets = if targets.is_empty() {
            vec![ContainerState::Stopped]
        } else {
            targets.to_vec()
        };
        Self { targets }
    }

    /// Returns true when `state` is one of the targets.
    #[must_use]
    pub fn matches(&self, state: ContainerState) -> bool {
        self.targets.contains(&state)
    }

    fn waits_for_exit(&self) -> bool {
        self.matches(ContainerState::Stopped)
    }

    /// Value returned for a snapshot that satisfied the condition.
    fn result(snapshot: StatusSnapshot) -> i32 {
        if snapshot.state == ContainerState::Stopped {
            snapshot.exit_code
        } else {
            NO_EXIT_CODE
        }
    }
}

impl Engine {
    /// Waits until the container's state is one of `conditions`, or until
    /// it exits when `conditions` is empty.
    ///
    /// Returns the exit code when the matched state is `Stopped` and `-1`
    /// for any other matched state. Dropping the future abandons the wait
    /// without affecting the container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reference, or when the container is
    /// removed before the condition holds. An exit waiter whose container
    /// exited before removal gets the exit code instead.
    pub async fn wait(&self, reference: &str, conditions: &[ContainerState]) -> Result<i32> {
        let condition = WaitCondition::new(conditions);
        let (id, mut status) = {
            let entry = self.inner.store.resolve(reference)?;
            (entry.id().clone(), entry.subscribe())
        };
        tracing::debug!(id = %id, targets = ?condition.targets, "waiting for container");

        let outcome = status
            .wait_for(|s| condition.matches(s.state) || s.state == ContainerState::Removing)
            .await
            .map(|snapshot| *snapshot);

        match outcome {
            Ok(snapshot) if condition.matches(snapshot.state) => Ok(WaitCondition::result(snapshot)),
            Ok(snapshot) if condition.waits_for_exit() && snapshot.exited => Ok(snapshot.exit_code),
            _ => Err(BerthError::container_not_found(id.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: ContainerState, exit_code: i32) -> StatusSnapshot {
        StatusSnapshot {
            state,
            exit_code,
            exited: exit_code != NO_EXIT_CODE,
        }
    }

    #[test]
    fn empty_condition_waits_for_exit() {
        let condition = WaitCondition::new(&[]);
        assert!(condition.matches(ContainerState::Stopped));
        assert!(!condition.matches(ContainerState::Running));
    }

    #[test]
    fn non_exit_matches_return_sentinel() {
        assert_eq!(
            WaitCondition::result(snapshot(ContainerState::Paused, NO_EXIT_CODE)),
            NO_EXIT_CODE
        );
        assert_eq!(
            WaitCondition::result(snapshot(ContainerState::Stopped, 143)),
            143
        );
    }
}
