//! Per-item outcome reports for batch operations.
//!
//! Removing or pruning several containers never aborts on the first
//! failure: every item gets its own entry.

use berth_common::error::{BerthError, ErrorKind};
use serde::{Deserialize, Serialize};

/// Why one item failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl From<&BerthError> for ItemFailure {
    fn from(err: &BerthError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    /// Container ID, or the reference given when it did not resolve.
    pub id: String,
    /// Bytes reclaimed, when measured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Failure, or `None` on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemFailure>,
}

/// Ordered outcomes of a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    items: Vec<ItemReport>,
}

/// Outcome of removing several containers.
pub type RemoveReport = BatchReport;

/// Outcome of pruning stopped containers.
pub type PruneReport = BatchReport;

impl BatchReport {
    pub(crate) fn push_success(&mut self, id: impl Into<String>, size: Option<u64>) {
        self.items.push(ItemReport {
            id: id.into(),
            size,
            error: None,
        });
    }

    pub(crate) fn push_failure(&mut self, id: impl Into<String>, err: &BerthError) {
        self.items.push(ItemReport {
            id: id.into(),
            size: None,
            error: Some(err.into()),
        });
    }

    /// Every outcome, in processing order.
    #[must_use]
    pub fn items(&self) -> &[ItemReport] {
        &self.items
    }

    /// IDs of the items that succeeded.
    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.items
            .iter()
            .filter(|item| item.error.is_none())
            .map(|item| item.id.as_str())
    }

    /// Items that failed, with their failure.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &ItemFailure)> {
        self.items
            .iter()
            .filter_map(|item| item.error.as_ref().map(|e| (item.id.as_str(), e)))
    }

    /// Returns true when every item succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.items.iter().all(|item| item.error.is_none())
    }

    /// Total bytes reclaimed by successful items.
    #[must_use]
    pub fn reclaimed_bytes(&self) -> u64 {
        self.items
            .iter()
            .filter(|item| item.error.is_none())
            .filter_map(|item| item.size)
            .sum()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true when no item was processed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_kept_next_to_successes() {
        let mut report = BatchReport::default();
        report.push_success("aaa", Some(10));
        report.push_failure("bbb", &BerthError::container_not_found("bbb"));
        report.push_success("ccc", Some(5));

        assert_eq!(report.succeeded().collect::<Vec<_>>(), vec!["aaa", "ccc"]);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "bbb");
        assert_eq!(failures[0].1.kind, ErrorKind::NotFound);
        assert_eq!(report.reclaimed_bytes(), 15);
        assert!(!report.is_success());
    }

    #[test]
    fn empty_report_is_a_success() {
        let report = BatchReport::default();
        assert!(report.is_success());
        assert!(report.is_empty());
        assert_eq!(report.reclaimed_bytes(), 0);
    }
}
