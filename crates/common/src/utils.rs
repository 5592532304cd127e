//! Utility functions for the Model Artifact Store
//!
//! This module provides utility functions used throughout the store.

use bytesize::ByteSize;
use chrono::Utc;

use crate::error::{Error, Result};

/// Formats a byte size into a human-readable string using binary units
pub fn format_bytes(bytes: u64) -> String {
    ByteSize::b(bytes).to_string_as(true)
}

/// Converts a size in megabytes (MiB) into bytes
pub fn mib_to_bytes(mib: u64) -> u64 {
    mib.saturating_mul(1024 * 1024)
}

/// Current time as whole unix seconds
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Validates a single path component such as a model name or version
///
/// Rejects empty names, `.` and `..`, and anything containing a path
/// separator, so a component can never escape the directory it is joined to.
pub fn validate_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." {
        return Err(Error::InvalidArgument(format!("Invalid {}: {:?}", kind, value)));
    }

    if value.contains('/') || value.contains('\\') || value.contains('\0') {
        return Err(Error::InvalidArgument(format!(
            "Invalid {} (contains a path separator): {:?}",
            kind, value
        )));
    }

    Ok(())
}

/// Parses a `key=value` pair
pub fn parse_key_value(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(Error::InvalidArgument(format!("Expected key=value, got {:?}", s))),
    }
}
