//! Timestamped document backups
//!
//! A document `<dir>/<stem>.json` is backed up as
//! `<dir>/<stem>.backup.<unix-seconds>.json`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

use common::error::{Error, Result};

/// Path of the backup taken at `timestamp` for the document at `path`
pub fn backup_path(path: &Path, timestamp: i64) -> PathBuf {
    let stem = document_stem(path);
    path.with_file_name(format!("{}.backup.{}.json", stem, timestamp))
}

/// Lists existing backups of a document, newest first
///
/// Ordering is by modification time, ties broken by the timestamp in the
/// file name.
pub fn list_backups(path: &Path) -> Result<Vec<PathBuf>> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let prefix = format!("{}.backup.", document_stem(path));

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::fs(dir, e)),
    };

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::fs(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if let Some(timestamp) = parse_backup_timestamp(&name, &prefix) {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            backups.push((modified, timestamp, entry.path()));
        }
    }

    backups.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

    Ok(backups.into_iter().map(|(_, _, path)| path).collect())
}

/// Deletes all but the newest `max_backups` backups of a document
///
/// Every eligible backup is attempted; failures are collected and reported
/// together once the pass is done. Returns the removed paths.
pub fn prune_backups(path: &Path, max_backups: usize) -> Result<Vec<PathBuf>> {
    let backups = list_backups(path)?;
    let mut removed = Vec::new();
    let mut failures = Vec::new();

    for backup in backups.into_iter().skip(max_backups) {
        match std::fs::remove_file(&backup) {
            Ok(()) => removed.push(backup),
            Err(e) => {
                warn!("Failed to remove backup {:?}: {}", backup, e);
                failures.push((backup, e));
            }
        }
    }

    if !removed.is_empty() {
        info!("Removed {} old backup(s) of {:?}", removed.len(), path);
    }

    match failures.len() {
        0 => Ok(removed),
        1 => {
            let (backup, source) = failures.remove(0);
            Err(Error::fs(backup, source))
        }
        n => {
            let (backup, source) = failures.remove(0);
            Err(Error::fs(
                backup,
                std::io::Error::new(
                    source.kind(),
                    format!("{} (and {} more backup(s) could not be removed)", source, n - 1),
                ),
            ))
        }
    }
}

fn document_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

fn parse_backup_timestamp(name: &str, prefix: &str) -> Option<i64> {
    name.strip_prefix(prefix)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}
