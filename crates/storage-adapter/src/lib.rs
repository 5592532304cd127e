//! Persistent storage for the Model Artifact Store
//!
//! This crate provides the file-backed artifact repository and the durable
//! JSON document used by the catalog and the version manager.

pub mod backup;
pub mod document;
pub mod filesystem;

// Re-export commonly used types
pub use document::JsonDocument;
pub use filesystem::{copy_tree_with_cancel, dir_size, remove_tree, ArtifactRepository};
