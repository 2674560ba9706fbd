//! Bulk removal of stopped containers.

use berth_common::error::Result;
use berth_common::types::ContainerState;

use crate::engine::{Engine, RemoveOptions};
use crate::filter::{FilterContext, FilterSet, Filters, PRUNE_FILTER_KEYS};
use crate::report::PruneReport;

impl Engine {
    /// Removes every stopped container matching `filters`, along with its
    /// anonymous volumes.
    ///
    /// Filters are validated before anything is removed. Each candidate is
    /// removed independently; failures are recorded in the report.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error for a key other than `until` or
    /// `label`, or for a malformed value.
    pub async fn prune(&self, filters: &Filters) -> Result<PruneReport> {
        let filters = FilterSet::parse(filters, PRUNE_FILTER_KEYS, |reference| {
            self.inner.store.resolve(reference).map(|e| e.created_at())
        })?;

        let mut candidates = Vec::new();
        for entry in self.inner.store.entries() {
            let record = entry.lock().await;
            if record.state == ContainerState::Stopped
                && filters.matches(&record, FilterContext::default())
            {
                candidates.push((entry.clone(), record.clone()));
            }
        }

        let mut report = PruneReport::default();
        for (entry, record) in candidates {
            let size = match self.disk_usage(&record).await {
                Ok(size) => size.total(),
                Err(e) => {
                    tracing::warn!(id = %record.id, error = %e, "could not measure container");
                    0
                }
            };
            match self
                .remove_entry(&entry, RemoveOptions::default().with_volumes())
                .await
            {
                Ok(()) => report.push_success(record.id.as_str(), Some(size)),
                Err(e) => {
                    tracing::warn!(id = %record.id, error = %e, "prune failed to remove container");
                    report.push_failure(record.id.as_str(), &e);
                }
            }
        }

        tracing::info!(
            removed = report.succeeded().count(),
            reclaimed = report.reclaimed_bytes(),
            "prune finished"
        );
        Ok(report)
    }
}
