//! Storage monitoring implementation
//!
//! This module measures how much space each storage class uses and keeps
//! the most recent measurement around for callers that only need a recent
//! figure.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use common::error::{Error, Result};
use common::types::StorageClass;
use common::utils::{format_bytes, validate_component};
use storage_adapter::{copy_tree_with_cancel, remove_tree};
use store_config::StorageConfig;

/// Usage of one storage class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassUsage {
    /// Storage class
    pub class: StorageClass,

    /// Root directory of the class
    pub path: PathBuf,

    /// Bytes in regular files
    pub usage_bytes: u64,

    /// Number of regular files
    pub file_count: u64,

    /// Number of top-level directories
    pub model_count: u64,
}

impl ClassUsage {
    fn empty(class: StorageClass, path: &Path) -> Self {
        Self {
            class,
            path: path.to_path_buf(),
            usage_bytes: 0,
            file_count: 0,
            model_count: 0,
        }
    }
}

/// Snapshot of storage usage across all classes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    /// Per-class usage, in scan order
    pub classes: Vec<ClassUsage>,

    /// When the snapshot was taken
    pub collected_at: DateTime<Utc>,
}

impl StorageInfo {
    /// Bytes used across all classes
    pub fn total_bytes(&self) -> u64 {
        self.classes.iter().map(|c| c.usage_bytes).sum()
    }

    /// Files across all classes
    pub fn total_files(&self) -> u64 {
        self.classes.iter().map(|c| c.file_count).sum()
    }

    /// Usage of one class
    pub fn class(&self, class: StorageClass) -> Option<&ClassUsage> {
        self.classes.iter().find(|c| c.class == class)
    }
}

/// Storage monitor over a fixed set of class directories
pub struct StorageMonitor {
    /// Class roots, in scan order
    classes: Vec<(StorageClass, PathBuf)>,

    /// Most recent snapshot
    latest: RwLock<Option<StorageInfo>>,
}

impl StorageMonitor {
    /// Creates a monitor over the given class roots
    pub fn new(classes: Vec<(StorageClass, PathBuf)>) -> Self {
        Self {
            classes,
            latest: RwLock::new(None),
        }
    }

    /// Creates a monitor over the class roots of a storage configuration
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.class_paths())
    }

    /// Class roots, in scan order
    pub fn class_paths(&self) -> &[(StorageClass, PathBuf)] {
        &self.classes
    }

    /// Scans every class and records the result as the latest snapshot
    ///
    /// Missing class roots count as empty. Entries that disappear while the
    /// scan runs are skipped.
    pub fn collect(&self) -> Result<StorageInfo> {
        let collected_at = Utc::now();
        let mut classes = Vec::with_capacity(self.classes.len());

        for (class, path) in &self.classes {
            let usage = scan_class(*class, path)?;
            debug!(
                "{} storage at {:?}: {} in {} file(s), {} model(s)",
                class,
                path,
                format_bytes(usage.usage_bytes),
                usage.file_count,
                usage.model_count
            );
            classes.push(usage);
        }

        let info = StorageInfo {
            classes,
            collected_at,
        };
        *self.latest.write() = Some(info.clone());

        Ok(info)
    }

    /// Latest snapshot, if any scan has completed
    pub fn latest(&self) -> Option<StorageInfo> {
        self.latest.read().clone()
    }

    /// Immediate subdirectories of each class root, sorted by name
    pub fn model_directories(&self) -> Result<Vec<(StorageClass, PathBuf)>> {
        let mut found = Vec::new();

        for (class, root) in &self.classes {
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::fs(root, e)),
            };

            let mut dirs = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| Error::fs(root, e))?;
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    dirs.push(entry.path());
                }
            }
            dirs.sort();

            found.extend(dirs.into_iter().map(|dir| (*class, dir)));
        }

        Ok(found)
    }

    /// Root directory of one class
    pub fn class_root(&self, class: StorageClass) -> Result<&Path> {
        self.classes
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, path)| path.as_path())
            .ok_or_else(|| Error::NotFound(format!("Storage class {} is not configured", class)))
    }

    /// Moves a model directory from one storage class to another
    ///
    /// Falls back to copy-then-remove when the classes sit on different
    /// filesystems. Returns the new location.
    pub fn move_model(&self, model: &str, from: StorageClass, to: StorageClass) -> Result<PathBuf> {
        validate_component("model name", model)?;
        if from == to {
            return Err(Error::InvalidArgument(format!("Model {} is already in {} storage", model, to)));
        }

        let source = self.class_root(from)?.join(model);
        let target_root = self.class_root(to)?;
        let target = target_root.join(model);

        if !source.exists() {
            return Err(Error::NotFound(format!("Model not found: {:?}", source)));
        }
        if std::fs::symlink_metadata(&target).is_ok() {
            return Err(Error::AlreadyExists(format!("Target already exists: {:?}", target)));
        }

        std::fs::create_dir_all(target_root).map_err(|e| Error::fs(target_root, e))?;

        if let Err(e) = std::fs::rename(&source, &target) {
            debug!("Rename {:?} -> {:?} failed ({}), copying instead", source, target, e);
            if let Err(e) = copy_tree_with_cancel(&source, &target, &AtomicBool::new(false)) {
                if let Err(cleanup) = remove_tree(&target) {
                    warn!("Could not remove partial copy {:?}: {}", target, cleanup);
                }
                return Err(e);
            }
            remove_tree(&source)?;
        }

        info!("Moved model from {:?} to {:?}", source, target);

        Ok(target)
    }
}

/// Copies the whole storage tree into `backup_dir/storage_backup_<timestamp>`
///
/// `backup_dir` must lie outside `base_path`. Returns the backup location.
pub fn backup_storage(base_path: &Path, backup_dir: &Path) -> Result<PathBuf> {
    if !base_path.is_dir() {
        return Err(Error::NotFound(format!("Storage base path {:?} does not exist", base_path)));
    }
    std::fs::create_dir_all(backup_dir).map_err(|e| Error::fs(backup_dir, e))?;

    let base = base_path.canonicalize().map_err(|e| Error::fs(base_path, e))?;
    let parent = backup_dir.canonicalize().map_err(|e| Error::fs(backup_dir, e))?;
    if parent.starts_with(&base) {
        return Err(Error::InvalidArgument(format!(
            "Backup directory {:?} lies inside storage {:?}",
            backup_dir, base_path
        )));
    }

    let target = backup_dir.join(format!("storage_backup_{}", Utc::now().format("%Y%m%d_%H%M%S")));
    if target.exists() {
        return Err(Error::AlreadyExists(format!("Backup {:?} already exists", target)));
    }

    let copied = copy_tree_with_cancel(base_path, &target, &AtomicBool::new(false))?;

    info!("Created backup at {:?} ({} file(s))", target, copied);

    Ok(target)
}

fn scan_class(class: StorageClass, root: &Path) -> Result<ClassUsage> {
    let mut usage = ClassUsage::empty(class, root);

    if !root.is_dir() {
        return Ok(usage);
    }

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) {
                    trace!("Entry vanished during scan: {:?}", e.path());
                    continue;
                }
                warn!("Skipping unreadable entry under {:?}: {}", root, e);
                continue;
            }
        };

        let file_type = entry.file_type();
        if entry.depth() == 1 && file_type.is_dir() {
            usage.model_count += 1;
        }
        if file_type.is_file() {
            match entry.metadata() {
                Ok(metadata) => {
                    usage.usage_bytes += metadata.len();
                    usage.file_count += 1;
                }
                Err(e) => trace!("Entry vanished during scan: {}", e),
            }
        }
    }

    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> (tempfile::TempDir, StorageMonitor) {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        let repository = dir.path().join("repository");

        std::fs::create_dir_all(raw.join("bert")).unwrap();
        std::fs::write(raw.join("bert").join("model.bin"), vec![0u8; 100]).unwrap();
        std::fs::create_dir_all(raw.join("alexnet").join("weights")).unwrap();
        std::fs::write(raw.join("alexnet").join("weights").join("w.bin"), vec![0u8; 50]).unwrap();
        std::fs::write(raw.join("stray.txt"), b"1234").unwrap();
        std::fs::create_dir_all(&repository).unwrap();

        let monitor = StorageMonitor::new(vec![
            (StorageClass::Raw, raw),
            (StorageClass::Quantized, dir.path().join("quantized")),
            (StorageClass::Repository, repository),
        ]);

        (dir, monitor)
    }

    #[test]
    fn test_collect_counts_per_class() {
        let (_dir, monitor) = layout();
        assert!(monitor.latest().is_none());

        let info = monitor.collect().unwrap();
        let raw = info.class(StorageClass::Raw).unwrap();
        assert_eq!(raw.usage_bytes, 154);
        assert_eq!(raw.file_count, 3);
        assert_eq!(raw.model_count, 2);

        let quantized = info.class(StorageClass::Quantized).unwrap();
        assert_eq!(quantized.usage_bytes, 0);
        assert_eq!(info.total_bytes(), 154);
        assert_eq!(info.total_files(), 3);

        assert_eq!(monitor.latest(), Some(info));
    }

    #[test]
    fn test_model_directories_sorted_by_class_then_name() {
        let (dir, monitor) = layout();
        std::fs::create_dir_all(dir.path().join("repository").join("vit")).unwrap();

        let found: Vec<(StorageClass, String)> = monitor
            .model_directories()
            .unwrap()
            .into_iter()
            .map(|(class, path)| (class, path.file_name().unwrap().to_string_lossy().into_owned()))
            .collect();

        assert_eq!(
            found,
            vec![
                (StorageClass::Raw, "alexnet".to_string()),
                (StorageClass::Raw, "bert".to_string()),
                (StorageClass::Repository, "vit".to_string()),
            ]
        );
    }

    #[test]
    fn test_move_model_between_classes() {
        let (dir, monitor) = layout();

        let moved = monitor
            .move_model("bert", StorageClass::Raw, StorageClass::Quantized)
            .unwrap();
        assert_eq!(moved, dir.path().join("quantized").join("bert"));
        assert_eq!(std::fs::read(moved.join("model.bin")).unwrap().len(), 100);
        assert!(!dir.path().join("raw").join("bert").exists());

        let info = monitor.collect().unwrap();
        assert_eq!(info.class(StorageClass::Quantized).unwrap().usage_bytes, 100);
    }

    #[test]
    fn test_move_model_errors() {
        let (dir, monitor) = layout();
        std::fs::create_dir_all(dir.path().join("repository").join("alexnet")).unwrap();

        let err = monitor
            .move_model("absent", StorageClass::Raw, StorageClass::Repository)
            .unwrap_err();
        assert!(err.is_not_found());

        let err = monitor
            .move_model("alexnet", StorageClass::Raw, StorageClass::Repository)
            .unwrap_err();
        assert!(err.is_already_exists());
        assert!(dir.path().join("raw").join("alexnet").join("weights").exists());

        assert!(matches!(
            monitor.move_model("bert", StorageClass::Raw, StorageClass::Raw),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_backup_storage_copies_tree() {
        let (dir, _monitor) = layout();
        let backups = tempfile::tempdir().unwrap();

        let target = backup_storage(dir.path(), backups.path()).unwrap();
        assert!(target
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("storage_backup_"));
        assert_eq!(std::fs::read(target.join("raw").join("stray.txt")).unwrap(), b"1234");
        assert!(target.join("raw").join("alexnet").join("weights").join("w.bin").exists());
        assert!(dir.path().join("raw").join("bert").join("model.bin").exists());
    }

    #[test]
    fn test_backup_inside_storage_is_rejected() {
        let (dir, _monitor) = layout();

        let err = backup_storage(dir.path(), &dir.path().join("backups")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
