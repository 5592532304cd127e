//! Durable JSON documents
//!
//! A save serializes into a temporary file next to the live document, syncs
//! it, copies the current live document to a timestamped backup, then
//! atomically renames the temporary file over the live path. The live
//! document is never absent, and a crash mid-write leaves the previous
//! version in place.

use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use common::error::{Error, Result};
use common::utils::unix_timestamp;

use crate::backup;

/// A JSON document persisted at a fixed path
#[derive(Debug)]
pub struct JsonDocument<T> {
    /// Live document path
    path: PathBuf,

    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonDocument<T> {
    fn clone(&self) -> Self {
        Self::new(self.path.clone())
    }
}

impl<T> JsonDocument<T> {
    /// Creates a handle for the document at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    /// Live document path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the live document exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Existing backups, newest first
    pub fn backups(&self) -> Result<Vec<PathBuf>> {
        backup::list_backups(&self.path)
    }

    /// Deletes all but the newest `max_backups` backups
    pub fn prune_backups(&self, max_backups: usize) -> Result<Vec<PathBuf>> {
        backup::prune_backups(&self.path, max_backups)
    }
}

impl<T: Serialize + DeserializeOwned> JsonDocument<T> {
    /// Reads the document, or `None` when it has never been written
    ///
    /// A document that exists but does not parse is reported as corrupt,
    /// never treated as empty.
    pub fn load(&self) -> Result<Option<T>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Document {:?} does not exist yet", self.path);
                return Ok(None);
            }
            Err(e) => return Err(Error::fs(&self.path, e)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| Error::CorruptData {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Persists the document, returning the backup taken of the previous one
    pub fn save(&self, value: &T) -> Result<Option<PathBuf>> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| Error::fs(&dir, e))?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(|e| Error::fs(&dir, e))?;
        serde_json::to_writer_pretty(&mut temp, value)?;
        temp.write_all(b"\n").map_err(|e| Error::fs(temp.path(), e))?;
        temp.as_file().sync_all().map_err(|e| Error::fs(temp.path(), e))?;

        let backup = if self.path.exists() {
            let backup = backup::backup_path(&self.path, unix_timestamp());
            std::fs::copy(&self.path, &backup).map_err(|e| Error::fs(&backup, e))?;
            Some(backup)
        } else {
            None
        };

        temp.persist(&self.path).map_err(|e| Error::fs(&self.path, e.error))?;

        info!("Saved document {:?}", self.path);

        Ok(backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let doc: JsonDocument<Vec<u32>> = JsonDocument::new(dir.path().join("versions.json"));
        assert!(doc.load().unwrap().is_none());
        assert!(!doc.exists());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let doc = JsonDocument::new(dir.path().join("nested").join("catalog.json"));

        let mut value = BTreeMap::new();
        value.insert("bert:1.0.0".to_string(), 3u32);

        assert_eq!(doc.save(&value).unwrap(), None);
        assert_eq!(doc.load().unwrap(), Some(value));
    }

    #[test]
    fn test_second_save_takes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let doc = JsonDocument::new(dir.path().join("versions.json"));

        doc.save(&vec![1u32]).unwrap();
        let backup = doc.save(&vec![1u32, 2]).unwrap().expect("backup of first save");

        let backed_up: Vec<u32> =
            serde_json::from_str(&std::fs::read_to_string(&backup).unwrap()).unwrap();
        assert_eq!(backed_up, vec![1]);
        assert_eq!(doc.load().unwrap(), Some(vec![1, 2]));
        assert_eq!(doc.backups().unwrap(), vec![backup]);
    }

    #[test]
    fn test_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "{ not json").unwrap();

        let doc: JsonDocument<BTreeMap<String, u32>> = JsonDocument::new(&path);
        let err = doc.load().unwrap_err();
        assert!(err.is_corrupt());
        // the corrupt file is left untouched for inspection
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let doc = JsonDocument::new(dir.path().join("versions.json"));
        doc.save(&vec![1u32]).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["versions.json".to_string()]);
    }
}
