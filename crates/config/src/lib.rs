//! Configuration management for the Model Artifact Store
//!
//! This crate provides the configuration schema and a layered loader
//! (defaults, then an optional file, then environment overrides).

pub mod manager;
pub mod schema;

// Re-export commonly used types
pub use manager::ConfigManager;
pub use schema::{
    CleanupConfig, LogFormat, LoggingConfig, MissingUsage, PolicyConfig, StorageConfig,
    StoreConfig,
};
