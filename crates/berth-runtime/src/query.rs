//! Read-only views: `list`, `inspect`, and `exists`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use berth_common::error::{BerthError, Result};
use berth_common::types::{ContainerId, ContainerState, PodId};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::container::ContainerRecord;
use crate::engine::Engine;
use crate::filter::{FilterContext, FilterSet, Filters, LIST_FILTER_KEYS};
use crate::volume::dir_size;

/// Options for [`Engine::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Filter request, validated against [`LIST_FILTER_KEYS`].
    pub filters: Filters,
    /// Include containers that are not running.
    pub all: bool,
    /// Keep only the N most recently created matches, in any state; 0
    /// keeps all.
    pub last: usize,
}

/// One row of a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    /// Container ID.
    pub id: ContainerId,
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Main process command.
    pub command: Vec<String>,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Owning pod, if any.
    pub pod_id: Option<PodId>,
    /// Name of the owning pod, empty when there is none.
    pub pod_name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Last exit time.
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code, `-1` until exit.
    pub exit_code: i32,
    /// User labels.
    pub labels: BTreeMap<String, String>,
}

impl ListEntry {
    fn new(record: &ContainerRecord, pod_name: Option<String>) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            image: record.image.clone(),
            command: record.command.clone(),
            state: record.state,
            pod_id: record.pod.clone(),
            pod_name: pod_name.unwrap_or_default(),
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            exit_code: record.exit_code,
            labels: record.labels.clone(),
        }
    }
}

/// On-disk usage of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContainerSize {
    /// Bytes under the container's own directory.
    pub container: u64,
    /// Bytes in the anonymous volumes it owns.
    pub volumes: u64,
}

impl ContainerSize {
    /// Combined size.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.container + self.volumes
    }
}

/// Result of [`Engine::inspect`].
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    /// The full container record.
    #[serde(flatten)]
    pub record: ContainerRecord,
    /// Name of the owning pod, empty when there is none.
    pub pod_name: String,
    /// Backend executing the container.
    pub backend: &'static str,
    /// Disk usage, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<ContainerSize>,
}

impl Engine {
    /// Lists containers, newest first.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error for a bad filter, or `NotFound`
    /// when a `since`/`before` reference does not resolve.
    pub async fn list(&self, options: &ListOptions) -> Result<Vec<ListEntry>> {
        let store = &self.inner.store;
        let filters = FilterSet::parse(&options.filters, LIST_FILTER_KEYS, |reference| {
            store.resolve(reference).map(|e| e.created_at())
        })?;

        let all = options.all || options.last > 0;
        let mut entries = Vec::new();
        for entry in store.entries() {
            let record = entry.lock().await;
            if record.state == ContainerState::Removing {
                continue;
            }
            if !all && record.state != ContainerState::Running {
                continue;
            }
            let pod_name = record.pod.as_ref().and_then(|p| self.inner.pods.name_of(p));
            let context = FilterContext {
                pod_name: pod_name.as_deref(),
            };
            if filters.matches(&record, context) {
                entries.push(ListEntry::new(&record, pod_name));
            }
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        if options.last > 0 {
            entries.truncate(options.last);
        }
        tracing::debug!(count = entries.len(), all, "listed containers");
        Ok(entries)
    }

    /// Returns the full record of a container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reference or a container being
    /// removed.
    pub async fn inspect(&self, reference: &str, with_size: bool) -> Result<InspectReport> {
        let entry = self.inner.store.resolve(reference)?;
        let record = entry.lock().await.clone();
        if record.state == ContainerState::Removing {
            return Err(BerthError::container_not_found(record.id.as_str()));
        }
        let size = if with_size {
            Some(self.disk_usage(&record).await?)
        } else {
            None
        };
        let pod_name = record
            .pod
            .as_ref()
            .and_then(|p| self.inner.pods.name_of(p))
            .unwrap_or_default();
        Ok(InspectReport {
            record,
            pod_name,
            backend: self.backend_name(),
            size,
        })
    }

    /// Returns true when `reference` names a container that is not being
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error for an ambiguous prefix.
    pub fn exists(&self, reference: &str) -> Result<bool> {
        match self.inner.store.resolve(reference) {
            Ok(entry) => Ok(entry.status().state != ContainerState::Removing),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Measures the container directory and its anonymous volumes.
    pub(crate) async fn disk_usage(&self, record: &ContainerRecord) -> Result<ContainerSize> {
        let container_dir = self.container_dir(&record.id);
        let volume_dirs: Vec<PathBuf> = record
            .anonymous_volumes()
            .map(|name| self.inner.volumes.path(name))
            .collect();
        tokio::task::spawn_blocking(move || ContainerSize {
            container: dir_size(&container_dir),
            volumes: volume_dirs.iter().map(PathBuf::as_path).map(dir_size).sum(),
        })
        .await
        .map_err(|e| BerthError::runtime(format!("size computation failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use berth_common::config::BerthConfig;
    use berth_common::error::ErrorKind;

    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::container::CreateOptions;

    fn engine(dir: &Path) -> Engine {
        Engine::new(
            BerthConfig::with_data_dir(dir),
            Arc::new(SimulatedBackend::new()),
        )
    }

    fn create(engine: &Engine, name: &str) -> ContainerId {
        engine
            .create(CreateOptions::new("alpine", vec!["top".into()]).name(name))
            .unwrap()
    }

    fn names(entries: &[ListEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test]
    async fn default_listing_keeps_running_only() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let _ = create(&engine, "idle");
        let _ = create(&engine, "busy");
        engine.start("busy").await.unwrap();

        let running = engine.list(&ListOptions::default()).await.unwrap();
        assert_eq!(names(&running), vec!["busy"]);

        let all = ListOptions {
            all: true,
            ..ListOptions::default()
        };
        assert_eq!(engine.list(&all).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_last_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        for name in ["first", "second", "third"] {
            let _ = create(&engine, name);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let options = ListOptions {
            all: true,
            ..ListOptions::default()
        };
        assert_eq!(
            names(&engine.list(&options).await.unwrap()),
            vec!["third", "second", "first"]
        );
        let last = ListOptions { last: 1, ..options };
        assert_eq!(names(&engine.list(&last).await.unwrap()), vec!["third"]);
    }

    #[tokio::test]
    async fn since_resolves_a_reference() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let _ = create(&engine, "old");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let _ = create(&engine, "new");

        let mut options = ListOptions {
            all: true,
            ..ListOptions::default()
        };
        let _ = options.filters.insert("since".into(), vec!["old".into()]);
        assert_eq!(names(&engine.list(&options).await.unwrap()), vec!["new"]);

        let _ = options.filters.insert("since".into(), vec!["ghost".into()]);
        assert!(engine.list(&options).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn invalid_filter_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let mut options = ListOptions::default();
        let _ = options.filters.insert("color".into(), vec!["red".into()]);
        let err = engine.list(&options).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn inspect_reports_pod_name_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let _ = engine.create_pod("frontend").unwrap();
        let id = engine
            .create(
                CreateOptions::new("alpine", vec!["top".into()])
                    .name("web")
                    .pod("frontend"),
            )
            .unwrap();
        std::fs::write(engine.container_dir(&id).join("blob"), [0u8; 100]).unwrap();

        let report = engine.inspect("web", true).await.unwrap();
        assert_eq!(report.pod_name, "frontend");
        assert_eq!(report.backend, "simulated");
        assert_eq!(report.size.unwrap().total(), 100);
        assert!(engine.inspect("web", false).await.unwrap().size.is_none());
    }

    #[tokio::test]
    async fn exists_reflects_removal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let _ = create(&engine, "web");
        assert!(engine.exists("web").unwrap());
        let _ = engine
            .remove("web", crate::engine::RemoveOptions::default())
            .await
            .unwrap();
        assert!(!engine.exists("web").unwrap());
    }
}
