//! Configuration loading
//!
//! Sources are layered in this order: serde defaults, an optional file
//! (TOML, YAML or JSON by extension), then `ARTIFACT_STORE__*` environment
//! variables such as `ARTIFACT_STORE__STORAGE__BASE_PATH`.

use std::path::{Path, PathBuf};
use config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

use common::error::{Error, Result};

use crate::schema::StoreConfig;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "ARTIFACT_STORE";

/// Configuration manager
#[derive(Debug, Clone)]
pub struct ConfigManager {
    /// Effective configuration
    config: StoreConfig,

    /// File the configuration was read from, if any
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Loads configuration from defaults, an optional file and the environment
    ///
    /// When `path` is `None`, the per-user default file is used if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_config_path().filter(|p| p.exists()),
        };

        Self::load_with_env_prefix(path.as_deref(), ENV_PREFIX)
    }

    /// Loads configuration reading environment overrides under `prefix`
    pub fn load_with_env_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading configuration from {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = Self::deserialize(builder.build())?;

        Ok(Self {
            config,
            source: path.map(Path::to_path_buf),
        })
    }

    /// Parses configuration from an in-memory TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let built = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build();

        Ok(Self {
            config: Self::deserialize(built)?,
            source: None,
        })
    }

    /// Wraps an already constructed configuration
    pub fn from_config(config: StoreConfig) -> Self {
        Self {
            config,
            source: None,
        }
    }

    fn deserialize(built: std::result::Result<Config, config::ConfigError>) -> Result<StoreConfig> {
        built
            .and_then(|c| c.try_deserialize::<StoreConfig>())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Per-user configuration file location
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("model-store").join("config.toml"))
    }

    /// Effective configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// File the configuration was read from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Creates the base, storage class and metadata directories
    pub fn ensure_directories(&self) -> Result<()> {
        let storage = &self.config.storage;

        let mut directories = vec![
            storage.base_path.clone(),
            storage.metadata_path(),
            storage.catalog_artifacts_path(),
        ];
        directories.extend(storage.class_paths().into_iter().map(|(_, path)| path));

        for directory in directories {
            std::fs::create_dir_all(&directory).map_err(|e| Error::fs(&directory, e))?;
            debug!("Ensured directory exists: {:?}", directory);
        }

        Ok(())
    }
}
