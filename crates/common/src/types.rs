//! Common types for the Model Artifact Store
//!
//! This module defines the storage classes the store manages on disk.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

/// Class of storage a model directory lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
    /// Uploaded, unprocessed artifacts
    Raw,
    /// Artifacts produced by optimization
    Quantized,
    /// Versioned artifacts served to callers
    Repository,
}

impl StorageClass {
    /// All storage classes in scan order
    pub const ALL: [StorageClass; 3] = [
        StorageClass::Raw,
        StorageClass::Quantized,
        StorageClass::Repository,
    ];

    /// Returns the lowercase label of the class
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Raw => "raw",
            StorageClass::Quantized => "quantized",
            StorageClass::Repository => "repository",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(StorageClass::Raw),
            "quantized" => Ok(StorageClass::Quantized),
            "repository" => Ok(StorageClass::Repository),
            _ => Err(format!("Unknown storage class: {}", s)),
        }
    }
}
