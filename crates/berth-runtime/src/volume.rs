//! Volume registry.
//!
//! Anonymous volumes are created for, and owned by, a single container.
//! Named volumes are shared and outlive the containers mounting them.
//! Each volume's data lives in `<volumes dir>/<name>`.

use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use berth_common::error::{BerthError, Result};
use berth_common::types::random_hex_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::container::{VolumeMount, VolumeSpec, validate_name};

/// A registered volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Unique name.
    pub name: String,
    /// Whether the volume was created implicitly for one container.
    pub anonymous: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Registry of volumes and their data directories.
#[derive(Debug)]
pub struct VolumeRegistry {
    root: PathBuf,
    volumes: RwLock<BTreeMap<String, Volume>>,
}

impl VolumeRegistry {
    /// Creates an empty registry storing data under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            volumes: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Volume>> {
        self.volumes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Volume>> {
        self.volumes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Data directory of the named volume.
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn register(&self, name: String, anonymous: bool) -> Result<Volume> {
        let path = self.path(&name);
        std::fs::create_dir_all(&path).map_err(|source| BerthError::Io { path, source })?;
        let volume = Volume {
            name,
            anonymous,
            created_at: Utc::now(),
        };
        let _ = self.write().insert(volume.name.clone(), volume.clone());
        tracing::debug!(volume = %volume.name, anonymous, "volume created");
        Ok(volume)
    }

    /// Creates a named volume.
    ///
    /// # Errors
    ///
    /// Returns `NameInUse` if the volume exists, or an error if the name is
    /// invalid or the data directory cannot be created.
    pub fn create(&self, name: &str) -> Result<Volume> {
        validate_name("volume", name)?;
        if self.read().contains_key(name) {
            return Err(BerthError::NameInUse {
                kind: "volume",
                name: name.to_string(),
            });
        }
        self.register(name.to_string(), false)
    }

    fn ensure_named(&self, name: &str) -> Result<Volume> {
        if let Some(volume) = self.get(name) {
            return Ok(volume);
        }
        self.create(name)
    }

    /// Resolves the volumes requested at create time, creating anonymous
    /// volumes and missing named ones.
    ///
    /// # Errors
    ///
    /// Returns the first failure; anonymous volumes created before it are
    /// released again.
    pub fn attach(&self, specs: &[VolumeSpec]) -> Result<Vec<VolumeMount>> {
        let mut mounts = Vec::with_capacity(specs.len());
        for spec in specs {
            let volume = match &spec.source {
                Some(name) => self.ensure_named(name),
                None => self.register(random_hex_id(), true),
            };
            match volume {
                Ok(volume) => mounts.push(VolumeMount {
                    name: volume.name,
                    destination: spec.destination.clone(),
                    anonymous: volume.anonymous,
                }),
                Err(e) => {
                    self.release_anonymous(&mounts);
                    return Err(e);
                }
            }
        }
        Ok(mounts)
    }

    /// Removes the anonymous volumes among `mounts`, logging failures.
    pub fn release_anonymous(&self, mounts: &[VolumeMount]) {
        for mount in mounts.iter().filter(|m| m.anonymous) {
            if let Err(e) = self.remove(&mount.name) {
                tracing::warn!(volume = %mount.name, error = %e, "failed to remove volume");
            }
        }
    }

    /// Removes a volume and its data.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown volume or an error if the data
    /// directory cannot be deleted.
    pub fn remove(&self, name: &str) -> Result<()> {
        if !self.read().contains_key(name) {
            return Err(BerthError::NotFound {
                kind: "volume",
                id: name.to_string(),
            });
        }
        let path = self.path(name);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(source) => return Err(BerthError::Io { path, source }),
        }
        let _ = self.write().remove(name);
        tracing::debug!(volume = %name, "volume removed");
        Ok(())
    }

    /// Looks up a volume by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Volume> {
        self.read().get(name).cloned()
    }

    /// All volumes in name order.
    #[must_use]
    pub fn list(&self) -> Vec<Volume> {
        self.read().values().cloned().collect()
    }

    /// Replaces the registry contents with previously saved volumes.
    pub fn restore(&self, volumes: Vec<Volume>) {
        let mut map = self.write();
        map.clear();
        map.extend(volumes.into_iter().map(|v| (v.name.clone(), v)));
    }
}

/// Total size of the regular files below `path`. Symlinks are not
/// followed and unreadable entries count as zero.
pub(crate) fn dir_size(path: &Path) -> u64 {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return 0;
    };
    if !meta.is_dir() {
        return if meta.is_file() { meta.len() } else { 0 };
    }
    std::fs::read_dir(path).map_or(0, |entries| {
        entries
            .filter_map(std::result::Result::ok)
            .map(|entry| dir_size(&entry.path()))
            .sum()
    })
}
