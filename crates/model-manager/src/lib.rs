//! Model catalog and artifact versioning for the Model Artifact Store
//!
//! This crate provides the catalog of model metadata and the version manager
//! that sequences, activates and rolls back artifact versions on disk.

pub mod catalog;
pub mod metadata;
pub mod versioning;

// Re-export commonly used types
pub use catalog::{CatalogStore, CATALOG_FILE};
pub use metadata::{
    catalog_key, CatalogEntry, CatalogFilter, Framework, ModelDocumentation, ModelExample,
    ModelMetadata, Precision, ServingHints, TagSet, Task,
};
pub use versioning::{ModelVersion, VersionManager, ACTIVE_POINTER, VERSIONS_FILE};
