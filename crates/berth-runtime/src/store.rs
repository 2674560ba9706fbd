//! In-memory container store.
//!
//! The index (sorted ID map plus name map) sits behind a short-held
//! `RwLock` that is never held across an `.await`. Each [`Entry`] owns its
//! record behind its own async mutex, so transitions on one container are
//! serialized while operations on different containers run in parallel.
//! Every entry also carries a `watch` channel publishing a
//! [`StatusSnapshot`] after each committed change.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use berth_common::error::{BerthError, Result};
use berth_common::types::{ContainerId, ContainerState};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, watch};

use crate::container::ContainerRecord;

/// The part of a record observed by waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Current lifecycle state.
    pub state: ContainerState,
    /// Exit code, `-1` until exit.
    pub exit_code: i32,
    /// Whether the main process has exited.
    pub exited: bool,
}

impl StatusSnapshot {
    fn of(record: &ContainerRecord) -> Self {
        Self {
            state: record.state,
            exit_code: record.exit_code,
            exited: record.has_exited(),
        }
    }
}

/// One container slot in the store.
#[derive(Debug)]
pub struct Entry {
    id: ContainerId,
    name: String,
    created_at: DateTime<Utc>,
    record: Mutex<ContainerRecord>,
    status: watch::Sender<StatusSnapshot>,
}

impl Entry {
    fn new(record: ContainerRecord) -> Self {
        let (status, _) = watch::channel(StatusSnapshot::of(&record));
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            created_at: record.created_at,
            record: Mutex::new(record),
            status,
        }
    }

    /// Container identifier.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Container name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation time, readable without taking the record lock.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Locks the record for a transition or a consistent read.
    pub async fn lock(&self) -> MutexGuard<'_, ContainerRecord> {
        self.record.lock().await
    }

    /// Returns a receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// Publishes the record's current status to all subscribers.
    ///
    /// Callers hold the record lock, so the snapshot order matches the
    /// commit order.
    pub fn publish(&self, record: &ContainerRecord) {
        let _ = self.status.send_replace(StatusSnapshot::of(record));
    }

    /// The last published snapshot.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        *self.status.borrow()
    }
}

#[derive(Debug, Default)]
struct Index {
    by_id: BTreeMap<ContainerId, Arc<Entry>>,
    by_name: HashMap<String, ContainerId>,
}

/// Registry of every live container.
#[derive(Debug)]
pub struct Store {
    index: RwLock<Index>,
    min_prefix_len: usize,
}

impl Store {
    /// Creates an empty store accepting ID prefixes of at least
    /// `min_prefix_len` characters.
    #[must_use]
    pub fn new(min_prefix_len: usize) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            min_prefix_len: min_prefix_len.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new record.
    ///
    /// # Errors
    ///
    /// Returns `NameInUse` if a live container already has the name, or a
    /// runtime error if the ID is already registered.
    pub fn insert(&self, record: ContainerRecord) -> Result<Arc<Entry>> {
        let mut index = self.write();
        if index.by_name.contains_key(&record.name) {
            return Err(BerthError::NameInUse {
                kind: "container",
                name: record.name,
            });
        }
        if index.by_id.contains_key(&record.id) {
            return Err(BerthError::runtime(format!(
                "container ID {} is already registered",
                record.id
            )));
        }
        let entry = Arc::new(Entry::new(record));
        let _ = index
            .by_name
            .insert(entry.name.clone(), entry.id.clone());
        let _ = index.by_id.insert(entry.id.clone(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Resolves a full ID, a unique name, or an unambiguous ID prefix.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing matches and `Ambiguous` if a prefix
    /// matches more than one container.
    pub fn resolve(&self, reference: &str) -> Result<Arc<Entry>> {
        if reference.is_empty() {
            return Err(BerthError::container_not_found(reference));
        }
        let index = self.read();

        if let Some(entry) = index.by_id.get(&ContainerId::new(reference)) {
            return Ok(Arc::clone(entry));
        }
        if let Some(entry) = index
            .by_name
            .get(reference)
            .and_then(|id| index.by_id.get(id))
        {
            return Ok(Arc::clone(entry));
        }
        if reference.len() < self.min_prefix_len {
            return Err(BerthError::container_not_found(reference));
        }

        let mut hits = index
            .by_id
            .range(ContainerId::new(reference)..)
            .take_while(|(id, _)| id.as_str().starts_with(reference))
            .take(2)
            .map(|(_, entry)| entry);
        match (hits.next(), hits.next()) {
            (Some(entry), None) => Ok(Arc::clone(entry)),
            (Some(_), Some(_)) => Err(BerthError::Ambiguous {
                kind: "container",
                reference: reference.to_string(),
            }),
            (None, _) => Err(BerthError::container_not_found(reference)),
        }
    }

    /// Looks up an entry by exact ID.
    #[must_use]
    pub fn get(&self, id: &ContainerId) -> Option<Arc<Entry>> {
        self.read().by_id.get(id).cloned()
    }

    /// Erases an entry, releasing its name.
    pub fn remove(&self, id: &ContainerId) -> Option<Arc<Entry>> {
        let mut index = self.write();
        let entry = index.by_id.remove(id)?;
        if index.by_name.get(&entry.name) == Some(id) {
            let _ = index.by_name.remove(&entry.name);
        }
        tracing::debug!(id = %id, name = %entry.name, "entry erased from store");
        Some(entry)
    }

    /// Snapshot of all entries in ID order.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<Entry>> {
        self.read().by_id.values().cloned().collect()
    }

    /// Returns true when a live container holds `name`.
    #[must_use]
    pub fn name_in_use(&self, name: &str) -> bool {
        self.read().by_name.contains_key(name)
    }

    /// Number of registered containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    /// Returns true when no containers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use berth_common::error::ErrorKind;

    use super::*;

    fn record(id: &str, name: &str) -> ContainerRecord {
        ContainerRecord::new(ContainerId::new(id), name.into(), vec!["top".into()])
    }

    #[test]
    fn resolves_by_id_name_and_prefix() {
        let store = Store::new(3);
        let _ = store.insert(record("abcdef0123", "web")).unwrap();

        assert_eq!(store.resolve("abcdef0123").unwrap().name(), "web");
        assert_eq!(store.resolve("web").unwrap().id().as_str(), "abcdef0123");
        assert_eq!(store.resolve("abcd").unwrap().name(), "web");
    }

    #[test]
    fn ambiguous_prefix_fails() {
        let store = Store::new(3);
        let _ = store.insert(record("abc111", "one")).unwrap();
        let _ = store.insert(record("abc222", "two")).unwrap();

        let err = store.resolve("abc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(store.resolve("abc2").unwrap().name(), "two");
    }

    #[test]
    fn short_prefix_and_unknown_reference_are_not_found() {
        let store = Store::new(3);
        let _ = store.insert(record("abcdef", "web")).unwrap();

        assert!(store.resolve("ab").unwrap_err().is_not_found());
        assert!(store.resolve("foobar").unwrap_err().is_not_found());
        assert!(store.resolve("").unwrap_err().is_not_found());
    }

    #[test]
    fn names_are_unique_among_live_containers() {
        let store = Store::new(3);
        let _ = store.insert(record("aaa111", "web")).unwrap();
        let err = store.insert(record("bbb222", "web")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let _ = store.remove(&ContainerId::new("aaa111")).unwrap();
        assert!(!store.name_in_use("web"));
        assert!(store.insert(record("bbb222", "web")).is_ok());
    }

    #[test]
    fn removed_entries_no_longer_resolve() {
        let store = Store::new(3);
        let _ = store.insert(record("abcdef", "web")).unwrap();
        let _ = store.remove(&ContainerId::new("abcdef"));

        assert!(store.resolve("abcdef").is_err());
        assert!(store.resolve("abc").is_err());
        assert!(store.resolve("web").is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let store = Store::new(3);
        let entry = store.insert(record("abcdef", "web")).unwrap();
        let mut rx = entry.subscribe();

        {
            let mut rec = entry.lock().await;
            rec.state = ContainerState::Running;
            entry.publish(&rec);
        }

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, ContainerState::Running);
        assert_eq!(entry.status().state, ContainerState::Running);
    }
}
