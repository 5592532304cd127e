//! Model versioning management
//!
//! This module sequences artifact versions per model, tracks which one is
//! active, and supports rollback. Version records live in one JSON document;
//! version directories live in the artifact repository under
//! `<model>/<number>/`, and `<model>/active` points at the active one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::error::{Error, Result};
use storage_adapter::{ArtifactRepository, JsonDocument};

/// File name of the version document
pub const VERSIONS_FILE: &str = "versions.json";

/// Name of the pointer to the active version inside a model directory
pub const ACTIVE_POINTER: &str = "active";

pub(crate) const ACTIVE_POINTER_STAGING: &str = "active.tmp";

/// A stored artifact version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    /// Version number, unique per model
    pub version: u32,

    /// Model the version belongs to
    pub model_name: String,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Evaluation metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BTreeMap<String, f64>>,

    /// Free-form annotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,

    /// Whether this is the version served for the model
    #[serde(default)]
    pub is_active: bool,
}

/// Model versioning manager
pub struct VersionManager {
    /// Where version directories live
    repository: Arc<ArtifactRepository>,

    /// Backing document
    document: JsonDocument<Vec<ModelVersion>>,

    /// Records in insertion order, guarded for the whole load-modify-save cycle
    versions: Mutex<Vec<ModelVersion>>,
}

impl VersionManager {
    /// Opens the version document kept in `metadata_dir`
    pub fn open(repository: Arc<ArtifactRepository>, metadata_dir: impl AsRef<Path>) -> Result<Self> {
        let document = JsonDocument::new(metadata_dir.as_ref().join(VERSIONS_FILE));
        let versions = Self::read(&document)?;

        info!("Opened version document {:?} with {} versions", document.path(), versions.len());

        Ok(Self {
            repository,
            document,
            versions: Mutex::new(versions),
        })
    }

    /// Artifact repository holding the version directories
    pub fn repository(&self) -> &Arc<ArtifactRepository> {
        &self.repository
    }

    /// Stores a copy of `source` as the next version of `model`
    ///
    /// The new version is inactive until activated.
    pub fn add_version(
        &self,
        model: &str,
        source: &Path,
        metrics: Option<BTreeMap<String, f64>>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<ModelVersion> {
        if !source.exists() {
            return Err(Error::NotFound(format!("Source path {:?} does not exist", source)));
        }

        let mut guard = self.versions.lock();
        let number = guard
            .iter()
            .filter(|v| v.model_name == model)
            .map(|v| v.version)
            .max()
            .unwrap_or(0)
            + 1;

        if guard.iter().any(|v| v.model_name == model && v.version == number) {
            return Err(Error::AlreadyExists(format!("Version {} of {} already exists", number, model)));
        }

        let label = number.to_string();
        let target = self.repository.version_path(model, &label)?;
        if target.exists() {
            warn!("Clearing leftover directory {:?} before adding version", target);
            self.repository.delete_all(model, &label)?;
        }
        let target = self.repository.ensure_version_path(model, &label)?;
        let copied = self.repository.copy_tree(source, &target)?;

        let version = ModelVersion {
            version: number,
            model_name: model.to_string(),
            created_at: Utc::now(),
            metrics,
            metadata,
            is_active: false,
        };

        let mut next = guard.clone();
        next.push(version.clone());
        self.document.save(&next)?;
        *guard = next;

        info!("Added version {} of {} ({} bytes)", number, model, copied);

        Ok(version)
    }

    /// Makes `version` the only active version of `model`
    ///
    /// The `active` pointer is swapped before the records are saved. When the
    /// save fails the pointer is moved back to the previously active version.
    pub fn activate_version(&self, model: &str, version: u32) -> Result<ModelVersion> {
        let mut guard = self.versions.lock();
        let activated = self.activate_locked(&mut guard, model, version)?;

        info!("Activated version {} of {}", version, model);

        Ok(activated)
    }

    /// Activates `to_version`, or the version preceding the active one
    pub fn rollback(&self, model: &str, to_version: Option<u32>) -> Result<ModelVersion> {
        let mut guard = self.versions.lock();

        let target = match to_version {
            Some(version) => version,
            None => {
                let mut versions: Vec<&ModelVersion> = guard.iter().filter(|v| v.model_name == model).collect();
                if versions.is_empty() {
                    return Err(Error::NotFound(format!("No versions found for model {}", model)));
                }
                versions.sort_by_key(|v| v.version);

                let index = versions
                    .iter()
                    .position(|v| v.is_active)
                    .ok_or_else(|| Error::NoActiveVersion(model.to_string()))?;

                if index == 0 {
                    return Err(Error::NoEarlierVersion(format!(
                        "Version {} is the earliest version of {}",
                        versions[index].version, model
                    )));
                }

                info!(
                    "Rolling back {} from version {} to {}",
                    model,
                    versions[index].version,
                    versions[index - 1].version
                );
                versions[index - 1].version
            }
        };

        self.activate_locked(&mut guard, model, target)
    }

    /// Version with the highest number
    pub fn get_latest_version(&self, model: &str) -> Option<ModelVersion> {
        self.versions
            .lock()
            .iter()
            .filter(|v| v.model_name == model)
            .max_by_key(|v| v.version)
            .cloned()
    }

    /// Currently active version
    pub fn get_active_version(&self, model: &str) -> Option<ModelVersion> {
        self.versions
            .lock()
            .iter()
            .find(|v| v.model_name == model && v.is_active)
            .cloned()
    }

    pub fn get_version(&self, model: &str, version: u32) -> Option<ModelVersion> {
        self.versions
            .lock()
            .iter()
            .find(|v| v.model_name == model && v.version == version)
            .cloned()
    }

    /// All versions of `model`, ascending by number
    pub fn list_versions(&self, model: &str) -> Vec<ModelVersion> {
        let mut versions: Vec<ModelVersion> = self
            .versions
            .lock()
            .iter()
            .filter(|v| v.model_name == model)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version);
        versions
    }

    /// Models with at least one version
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.versions.lock().iter().map(|v| v.model_name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// Directory of `version`, or of the active version when `None`
    ///
    /// Fails when the record exists but its directory is gone.
    pub fn get_version_path(&self, model: &str, version: Option<u32>) -> Result<PathBuf> {
        let number = match version {
            Some(number) => {
                self.get_version(model, number)
                    .ok_or_else(|| Error::NotFound(format!("Version {} of {} not found", number, model)))?
                    .version
            }
            None => {
                self.get_active_version(model)
                    .ok_or_else(|| Error::NotFound(format!("No active version for model {}", model)))?
                    .version
            }
        };

        let path = self.repository.version_path(model, &number.to_string())?;
        if !path.is_dir() {
            return Err(Error::NotFound(format!(
                "Directory of version {} of {} is missing: {:?}",
                number, model, path
            )));
        }

        Ok(path)
    }

    /// Reads the on-disk active pointer of `model`
    pub fn active_pointer(&self, model: &str) -> Result<Option<u32>> {
        let pointer = self.repository.model_path(model)?.join(ACTIVE_POINTER);

        let metadata = match std::fs::symlink_metadata(&pointer) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::fs(&pointer, e)),
        };

        let raw = if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(&pointer).map_err(|e| Error::fs(&pointer, e))?;
            target
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            std::fs::read_to_string(&pointer)
                .map_err(|e| Error::fs(&pointer, e))?
                .trim()
                .to_string()
        };

        raw.parse::<u32>().map(Some).map_err(|_| Error::CorruptData {
            path: pointer,
            reason: format!("active pointer refers to {:?}", raw),
        })
    }

    /// Deletes an inactive version's record and directory
    pub fn remove_version(&self, model: &str, version: u32) -> Result<ModelVersion> {
        let mut guard = self.versions.lock();

        let index = guard
            .iter()
            .position(|v| v.model_name == model && v.version == version)
            .ok_or_else(|| Error::NotFound(format!("Version {} of {} not found", version, model)))?;

        if guard[index].is_active {
            return Err(Error::InvalidArgument(format!(
                "Version {} of {} is active and cannot be removed",
                version, model
            )));
        }

        let mut next = guard.clone();
        let removed = next.remove(index);
        self.document.save(&next)?;
        *guard = next;

        self.repository.delete_all(model, &version.to_string())?;

        info!("Removed version {} of {}", version, model);

        Ok(removed)
    }

    /// Deletes all but the newest `max_backups` version document backups
    pub fn cleanup_old_backups(&self, max_backups: usize) -> Result<Vec<PathBuf>> {
        self.document.prune_backups(max_backups)
    }

    fn activate_locked(&self, guard: &mut Vec<ModelVersion>, model: &str, version: u32) -> Result<ModelVersion> {
        if !guard.iter().any(|v| v.model_name == model && v.version == version) {
            return Err(Error::NotFound(format!("Version {} of {} not found", version, model)));
        }
        let previous = guard
            .iter()
            .find(|v| v.model_name == model && v.is_active)
            .map(|v| v.version);

        let mut next = guard.clone();
        let mut activated = None;
        for record in next.iter_mut().filter(|v| v.model_name == model) {
            record.is_active = record.version == version;
            if record.is_active {
                activated = Some(record.clone());
            }
        }
        let activated = activated
            .ok_or_else(|| Error::NotFound(format!("Version {} of {} not found", version, model)))?;

        self.write_active_pointer(model, version)?;

        if let Err(e) = self.document.save(&next) {
            let restored = match previous {
                Some(previous) => self.write_active_pointer(model, previous),
                None => self.clear_active_pointer(model),
            };
            if let Err(restore) = restored {
                warn!("Active pointer of {} left at version {}: {}", model, version, restore);
            }
            return Err(e);
        }
        *guard = next;

        Ok(activated)
    }

    fn clear_active_pointer(&self, model: &str) -> Result<()> {
        let pointer = self.repository.model_path(model)?.join(ACTIVE_POINTER);
        match std::fs::remove_file(&pointer) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::fs(&pointer, e)),
        }
    }

    /// Swaps the active pointer to `version` with a rename
    fn write_active_pointer(&self, model: &str, version: u32) -> Result<()> {
        let model_dir = self.repository.model_path(model)?;
        let pointer = model_dir.join(ACTIVE_POINTER);
        let staging = model_dir.join(ACTIVE_POINTER_STAGING);

        if std::fs::symlink_metadata(&staging).is_ok() {
            std::fs::remove_file(&staging).map_err(|e| Error::fs(&staging, e))?;
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(version.to_string(), &staging).map_err(|e| Error::fs(&staging, e))?;

        #[cfg(not(unix))]
        std::fs::write(&staging, version.to_string()).map_err(|e| Error::fs(&staging, e))?;

        std::fs::rename(&staging, &pointer).map_err(|e| Error::fs(&pointer, e))?;

        debug!("Pointed {:?} at version {}", pointer, version);

        Ok(())
    }

    fn read(document: &JsonDocument<Vec<ModelVersion>>) -> Result<Vec<ModelVersion>> {
        let versions = document.load()?.unwrap_or_default();

        let mut seen = std::collections::BTreeSet::new();
        let mut active = std::collections::BTreeSet::new();
        for record in &versions {
            if !seen.insert((record.model_name.as_str(), record.version)) {
                return Err(Error::CorruptData {
                    path: document.path().to_path_buf(),
                    reason: format!("duplicate version {} of {}", record.version, record.model_name),
                });
            }
            if record.is_active && !active.insert(record.model_name.as_str()) {
                return Err(Error::CorruptData {
                    path: document.path().to_path_buf(),
                    reason: format!("more than one active version of {}", record.model_name),
                });
            }
        }

        Ok(versions)
    }
}
