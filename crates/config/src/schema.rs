//! Configuration schema
//!
//! Every section has serde defaults, so an empty source yields a usable
//! configuration.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use common::StorageClass;

/// Top-level configuration for the Model Artifact Store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Storage layout
    pub storage: StorageConfig,

    /// Cleanup policies
    pub cleanup: CleanupConfig,

    /// Logging output
    pub logging: LoggingConfig,
}

/// Storage layout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of all storage
    pub base_path: PathBuf,

    /// Raw artifacts, relative to `base_path`
    pub raw_dir: PathBuf,

    /// Optimized artifacts, relative to `base_path`
    pub quantized_dir: PathBuf,

    /// Versioned artifacts, relative to `base_path`
    pub repository_dir: PathBuf,

    /// Catalog and version documents, relative to `base_path`
    pub metadata_dir: PathBuf,

    /// Number of document backups kept when pruning
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./storage"),
            raw_dir: PathBuf::from("models/raw"),
            quantized_dir: PathBuf::from("models/quantized"),
            repository_dir: PathBuf::from("models/repository"),
            metadata_dir: PathBuf::from("catalog"),
            max_backups: 5,
        }
    }
}

impl StorageConfig {
    /// Absolute directory of a storage class
    pub fn class_path(&self, class: StorageClass) -> PathBuf {
        let relative = match class {
            StorageClass::Raw => &self.raw_dir,
            StorageClass::Quantized => &self.quantized_dir,
            StorageClass::Repository => &self.repository_dir,
        };
        self.base_path.join(relative)
    }

    /// All storage class directories in scan order
    pub fn class_paths(&self) -> Vec<(StorageClass, PathBuf)> {
        StorageClass::ALL
            .iter()
            .map(|class| (*class, self.class_path(*class)))
            .collect()
    }

    /// Directory holding the catalog and version documents
    pub fn metadata_path(&self) -> PathBuf {
        self.base_path.join(&self.metadata_dir)
    }

    /// Root of catalog artifacts, kept apart from numbered versions
    pub fn catalog_artifacts_path(&self) -> PathBuf {
        self.metadata_path().join("models")
    }
}

/// What a usage policy does when no request count is known for a model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingUsage {
    /// Unknown counts are zero, so unmeasured models are evicted
    #[default]
    TreatAsZero,
    /// Unknown counts keep the model until data is available
    Defer,
}

/// A single configured cleanup policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Evict directories older than `max_age_days`
    Age { max_age_days: u64 },

    /// Evict models with fewer than `min_requests` in the window
    Usage {
        min_requests: u64,
        timeframe_days: u64,
        #[serde(default)]
        missing: Option<MissingUsage>,
    },

    /// Evict while total usage exceeds `max_size_mb`
    Size { max_size_mb: u64 },
}

/// Cleanup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Policies in evaluation order
    pub policies: Vec<PolicyConfig>,

    /// Default for usage policies that do not set `missing`
    pub missing_usage: MissingUsage,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            policies: vec![
                PolicyConfig::Age { max_age_days: 30 },
                PolicyConfig::Usage {
                    min_requests: 10,
                    timeframe_days: 7,
                    missing: None,
                },
                PolicyConfig::Size { max_size_mb: 10_000 },
            ],
            missing_usage: MissingUsage::TreatAsZero,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Output format
    pub format: LogFormat,

    /// Directory for daily-rolled log files; stderr only when unset
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_paths() {
        let storage = StorageConfig {
            base_path: PathBuf::from("/srv/store"),
            ..Default::default()
        };
        assert_eq!(
            storage.class_path(StorageClass::Repository),
            PathBuf::from("/srv/store/models/repository")
        );
        assert_eq!(storage.metadata_path(), PathBuf::from("/srv/store/catalog"));
        assert_eq!(storage.catalog_artifacts_path(), PathBuf::from("/srv/store/catalog/models"));

        let classes: Vec<_> = storage.class_paths().into_iter().map(|(c, _)| c).collect();
        assert_eq!(classes, StorageClass::ALL.to_vec());
    }

    #[test]
    fn test_default_policies() {
        let cleanup = CleanupConfig::default();
        assert_eq!(cleanup.policies.len(), 3);
        assert_eq!(cleanup.policies[0], PolicyConfig::Age { max_age_days: 30 });
        assert_eq!(cleanup.policies[2], PolicyConfig::Size { max_size_mb: 10_000 });
    }

    #[test]
    fn test_policies_from_toml() {
        let cleanup: CleanupConfig = toml::from_str(
            r#"
missing_usage = "defer"

[[policies]]
kind = "usage"
min_requests = 3
timeframe_days = 14

[[policies]]
kind = "size"
max_size_mb = 512
"#,
        )
        .unwrap();

        assert_eq!(cleanup.missing_usage, MissingUsage::Defer);
        assert_eq!(
            cleanup.policies,
            vec![
                PolicyConfig::Usage {
                    min_requests: 3,
                    timeframe_days: 14,
                    missing: None,
                },
                PolicyConfig::Size { max_size_mb: 512 },
            ]
        );
    }
}
