//! Minimal pod registry.
//!
//! Pods only group containers for display and filtering. Containers hold a
//! weak [`PodId`]: removing a pod leaves its members alone, and they list
//! with an empty pod name afterwards.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use berth_common::error::{BerthError, Result};
use berth_common::types::PodId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::container::validate_name;
use crate::engine::Engine;

/// A registered pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRecord {
    /// Unique identifier.
    pub id: PodId,
    /// Unique name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Registry of pods.
#[derive(Debug, Default)]
pub struct PodRegistry {
    pods: RwLock<BTreeMap<PodId, PodRecord>>,
}

impl PodRegistry {
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<PodId, PodRecord>> {
        self.pods.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<PodId, PodRecord>> {
        self.pods.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a pod.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error for a malformed name and
    /// `NameInUse` when another pod has it.
    pub fn create(&self, name: &str) -> Result<PodRecord> {
        validate_name("pod", name)?;
        let mut pods = self.write();
        if pods.values().any(|p| p.name == name) {
            return Err(BerthError::NameInUse {
                kind: "pod",
                name: name.to_string(),
            });
        }
        let pod = PodRecord {
            id: PodId::generate(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let _ = pods.insert(pod.id.clone(), pod.clone());
        Ok(pod)
    }

    /// Resolves a pod by ID, name, or unique ID prefix.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing matches and `Ambiguous` when a prefix
    /// matches several pods.
    pub fn resolve(&self, reference: &str) -> Result<PodRecord> {
        let not_found = || BerthError::NotFound {
            kind: "pod",
            id: reference.to_string(),
        };
        if reference.is_empty() {
            return Err(not_found());
        }
        let pods = self.read();
        if let Some(pod) = pods.get(&PodId::new(reference)) {
            return Ok(pod.clone());
        }
        if let Some(pod) = pods.values().find(|p| p.name == reference) {
            return Ok(pod.clone());
        }
        let mut hits = pods
            .values()
            .filter(|p| p.id.as_str().starts_with(reference));
        match (hits.next(), hits.next()) {
            (Some(pod), None) => Ok(pod.clone()),
            (Some(_), Some(_)) => Err(BerthError::Ambiguous {
                kind: "pod",
                reference: reference.to_string(),
            }),
            (None, _) => Err(not_found()),
        }
    }

    /// Name of the pod, if it still exists.
    #[must_use]
    pub fn name_of(&self, id: &PodId) -> Option<String> {
        self.read().get(id).map(|p| p.name.clone())
    }

    fn remove(&self, id: &PodId) -> Option<PodRecord> {
        self.write().remove(id)
    }

    /// All pods in ID order.
    #[must_use]
    pub fn list(&self) -> Vec<PodRecord> {
        self.read().values().cloned().collect()
    }

    /// Replaces the registry contents with previously saved pods.
    pub fn restore(&self, pods: Vec<PodRecord>) {
        let mut map = self.write();
        map.clear();
        map.extend(pods.into_iter().map(|p| (p.id.clone(), p)));
    }
}

impl Engine {
    /// Creates a pod.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error for a malformed name and
    /// `NameInUse` when another pod has it.
    pub fn create_pod(&self, name: &str) -> Result<PodId> {
        let pod = self.inner.pods.create(name)?;
        tracing::info!(pod = %pod.id, name = %pod.name, "pod created");
        Ok(pod.id)
    }

    /// Removes a pod. Member containers are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown pod.
    pub fn remove_pod(&self, reference: &str) -> Result<PodId> {
        let pod = self.inner.pods.resolve(reference)?;
        let _ = self.inner.pods.remove(&pod.id);
        tracing::info!(pod = %pod.id, name = %pod.name, "pod removed");
        Ok(pod.id)
    }

    /// All pods.
    #[must_use]
    pub fn pods(&self) -> Vec<PodRecord> {
        self.inner.pods.list()
    }
}

#[cfg(test)]
mod tests {
    use berth_common::error::ErrorKind;

    use super::*;

    #[test]
    fn pods_resolve_by_name_and_prefix() {
        let registry = PodRegistry::default();
        let pod = registry.create("frontend").unwrap();

        assert_eq!(registry.resolve("frontend").unwrap().id, pod.id);
        assert_eq!(registry.resolve(&pod.id.as_str()[..8]).unwrap().id, pod.id);
        assert!(registry.resolve("backend").unwrap_err().is_not_found());
    }

    #[test]
    fn pod_names_are_unique() {
        let registry = PodRegistry::default();
        let _ = registry.create("frontend").unwrap();
        let err = registry.create("frontend").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
