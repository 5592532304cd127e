//! Main integration module for the Model Artifact Store
//!
//! This module wires the catalog, the version manager, the artifact
//! repositories and the cleanup engine from a single [`StoreConfig`].
//! Catalog artifacts live under the metadata directory; numbered versions
//! live in the repository storage class, so the two never share a path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use common::error::Result;
use model_manager::{CatalogEntry, CatalogStore, VersionManager};
use resource_manager::{
    backup_storage, CleanupEngine, NoUsageData, StorageInfo, StorageMonitor, UsageSource,
};
use storage_adapter::ArtifactRepository;
use store_config::{ConfigManager, StoreConfig};

pub use common::StorageClass;

/// The assembled store
pub struct ArtifactStore {
    /// Configuration the store was opened with
    config: StoreConfig,

    /// Files stored alongside catalog entries
    artifacts: Arc<ArtifactRepository>,

    /// Model metadata
    catalog: Arc<CatalogStore>,

    /// Artifact versions
    versions: Arc<VersionManager>,

    /// Storage usage across all classes
    monitor: Arc<StorageMonitor>,

    /// Retention policies
    cleanup: Arc<CleanupEngine>,
}

impl ArtifactStore {
    /// Opens the store without request counts for usage policies
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_with_usage(config, Arc::new(NoUsageData))
    }

    /// Opens the store, feeding usage policies from `usage`
    pub fn open_with_usage(config: &StoreConfig, usage: Arc<dyn UsageSource>) -> Result<Self> {
        let manager = ConfigManager::from_config(config.clone());
        manager.ensure_directories()?;

        let storage = &config.storage;
        let metadata_path = storage.metadata_path();

        let artifacts = Arc::new(ArtifactRepository::new(storage.catalog_artifacts_path())?);
        let repository = Arc::new(ArtifactRepository::new(
            storage.class_path(StorageClass::Repository),
        )?);
        let catalog = Arc::new(CatalogStore::open(&metadata_path)?);
        let versions = Arc::new(VersionManager::open(repository.clone(), &metadata_path)?);
        let monitor = Arc::new(StorageMonitor::from_config(storage));
        let cleanup = Arc::new(CleanupEngine::from_config(
            monitor.clone(),
            &config.cleanup,
            usage,
        ));

        info!("Opened artifact store at {:?}", storage.base_path);

        Ok(Self {
            config: config.clone(),
            artifacts,
            catalog,
            versions,
            monitor,
            cleanup,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.catalog
    }

    pub fn versions(&self) -> &Arc<VersionManager> {
        &self.versions
    }

    /// Repository of catalog artifacts
    pub fn artifacts(&self) -> &Arc<ArtifactRepository> {
        &self.artifacts
    }

    pub fn cleanup(&self) -> &Arc<CleanupEngine> {
        &self.cleanup
    }

    pub fn monitor(&self) -> &Arc<StorageMonitor> {
        &self.monitor
    }

    /// Directory holding the catalog and version documents
    pub fn metadata_path(&self) -> PathBuf {
        self.config.storage.metadata_path()
    }

    /// Removes a model from the catalog, then its stored artifacts
    pub fn delete_model(&self, name: &str, version: &str) -> Result<CatalogEntry> {
        let entry = self.catalog.delete(name, version)?;
        self.artifacts.delete_all(name, version)?;

        info!("Deleted model {}:{}", name, version);

        Ok(entry)
    }

    /// Prunes backups of both documents, keeping the newest `max_backups`
    ///
    /// Both documents are pruned even when the first fails. Returns how many
    /// backups were removed.
    pub fn prune_backups(&self, max_backups: usize) -> Result<usize> {
        let catalog = self.catalog.cleanup_old_backups(max_backups);
        let versions = self.versions.cleanup_old_backups(max_backups);

        match (catalog, versions) {
            (Ok(a), Ok(b)) => Ok(a.len() + b.len()),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            (Err(first), Err(second)) => {
                warn!("Version backup pruning also failed: {}", second);
                Err(first)
            }
        }
    }

    /// Scans storage usage now
    pub fn storage_info(&self) -> Result<StorageInfo> {
        self.monitor.collect()
    }

    /// Moves a model directory between storage classes
    pub fn move_model(&self, model: &str, from: StorageClass, to: StorageClass) -> Result<PathBuf> {
        self.monitor.move_model(model, from, to)
    }

    /// Copies the whole storage tree into a timestamped directory under `backup_dir`
    pub fn backup_storage(&self, backup_dir: &Path) -> Result<PathBuf> {
        backup_storage(&self.config.storage.base_path, backup_dir)
    }
}
