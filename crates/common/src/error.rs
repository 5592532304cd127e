//! Error types for the common crate
//!
//! This module defines the error taxonomy shared by the catalog, the
//! artifact repository, the version manager and the cleanup engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for Model Artifact Store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Model Artifact Store operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error tied to a specific path
    #[error("IO error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A multi-file write stopped part way through
    #[error("Partial write: {} file(s) written before '{failed}' failed: {source}", written.len())]
    PartialWrite {
        written: Vec<String>,
        failed: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted document could not be parsed
    #[error("Corrupt data in {}: {reason}", path.display())]
    CorruptData { path: PathBuf, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Already exists error
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Rollback requested for a model without an active version
    #[error("No active version: {0}")]
    NoActiveVersion(String),

    /// Rollback requested while the oldest version is active
    #[error("No earlier version: {0}")]
    NoEarlierVersion(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Another exclusive operation is in progress
    #[error("Busy: {0}")]
    Busy(String),
}

impl Error {
    /// Attaches a path to an IO error
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true if the error is an already exists error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    /// Returns true if the error came from the filesystem
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Filesystem { .. } | Error::PartialWrite { .. }
        )
    }

    /// Returns true if the error is a corrupt data error
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::CorruptData { .. })
    }

    /// HTTP-equivalent status class for callers that expose the store over a wire
    pub fn status_class(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::AlreadyExists(_) => 409,
            Error::InvalidArgument(_) => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_class() {
        assert_eq!(Error::NotFound("m:1".into()).status_class(), 404);
        assert_eq!(Error::AlreadyExists("m:1".into()).status_class(), 409);
        assert_eq!(Error::NoEarlierVersion("m".into()).status_class(), 500);
        assert_eq!(Error::Busy("cleanup".into()).status_class(), 500);
    }

    #[test]
    fn test_io_classification() {
        let err = Error::PartialWrite {
            written: vec!["a.bin".into()],
            failed: "b.bin".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        assert!(err.is_io());
        assert!(err.to_string().contains("1 file(s) written before 'b.bin'"));

        let err = Error::fs("/tmp/x", std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(err.is_io());
        assert!(!err.is_not_found());
    }
}
