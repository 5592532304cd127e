//! Common utilities and types for the Model Artifact Store
//!
//! This crate provides shared functionality used across the store,
//! including the error taxonomy, storage classes, and utility functions.

pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
