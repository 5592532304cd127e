//! File-backed artifact repository
//!
//! Artifacts live under `<base>/<model>/<version>/<filename>`. The repository
//! knows nothing about catalog or version semantics; it only moves bytes.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use common::error::{Error, Result};
use common::utils::validate_component;

/// Repository of artifact files
#[derive(Debug, Clone)]
pub struct ArtifactRepository {
    /// Root directory of all models
    base_path: PathBuf,
}

impl ArtifactRepository {
    /// Creates a repository rooted at `base_path`, creating it if needed
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|e| Error::fs(&base_path, e))?;

        Ok(Self { base_path })
    }

    /// Root directory of the repository
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding every version of a model
    pub fn model_path(&self, name: &str) -> Result<PathBuf> {
        validate_component("model name", name)?;
        Ok(self.base_path.join(name))
    }

    /// Directory of one model version, without touching the filesystem
    pub fn version_path(&self, name: &str, version: &str) -> Result<PathBuf> {
        validate_component("version", version)?;
        Ok(self.model_path(name)?.join(version))
    }

    /// Returns the version directory, creating it if absent
    pub fn ensure_version_path(&self, name: &str, version: &str) -> Result<PathBuf> {
        let path = self.version_path(name, version)?;

        // create_dir_all treats a directory created concurrently as success
        std::fs::create_dir_all(&path).map_err(|e| Error::fs(&path, e))?;

        Ok(path)
    }

    /// Writes files into a version directory
    ///
    /// Files are written in iteration order. A failure stops the loop and
    /// reports the files already written; they stay on disk, so callers
    /// should retry the whole set.
    pub fn save_files<I, K, V>(&self, name: &str, version: &str, files: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let dir = self.ensure_version_path(name, version)?;
        let mut written = Vec::new();

        for (filename, contents) in files {
            let filename = filename.as_ref();
            validate_component("filename", filename)?;

            if let Err(source) = std::fs::write(dir.join(filename), contents.as_ref()) {
                warn!(
                    "Failed to write {} for {}:{} after {} file(s)",
                    filename,
                    name,
                    version,
                    written.len()
                );
                return Err(Error::PartialWrite {
                    written,
                    failed: filename.to_string(),
                    source,
                });
            }

            written.push(filename.to_string());
        }

        info!("Saved {} file(s) for {}:{}", written.len(), name, version);

        Ok(())
    }

    /// Reads one file, or `None` when it does not exist
    pub fn get_file(&self, name: &str, version: &str, filename: &str) -> Result<Option<Vec<u8>>> {
        validate_component("filename", filename)?;
        let path = self.version_path(name, version)?.join(filename);

        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::fs(&path, e)),
        }
    }

    /// Lists regular files of a version with their sizes
    pub fn list_files(&self, name: &str, version: &str) -> Result<BTreeMap<String, u64>> {
        let dir = self.version_path(name, version)?;
        let mut files = BTreeMap::new();

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(Error::fs(&dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| Error::fs(&dir, e))?;
            let metadata = entry.metadata().map_err(|e| Error::fs(entry.path(), e))?;

            if metadata.is_file() {
                files.insert(entry.file_name().to_string_lossy().into_owned(), metadata.len());
            }
        }

        Ok(files)
    }

    /// Total size of a version directory in bytes
    pub fn version_size(&self, name: &str, version: &str) -> Result<u64> {
        dir_size(&self.version_path(name, version)?)
    }

    /// Removes every file of a version, then the directory itself
    ///
    /// Not atomic: the first entry that cannot be removed stops the deletion
    /// and is named in the error, and everything not yet visited stays.
    pub fn delete_all(&self, name: &str, version: &str) -> Result<()> {
        let dir = self.version_path(name, version)?;

        if !dir.exists() {
            debug!("Nothing to delete for {}:{}", name, version);
            return Ok(());
        }

        remove_tree(&dir)?;

        info!("Deleted artifacts for {}:{}", name, version);

        Ok(())
    }

    /// Copies `source` into `dest`, see [`copy_tree_with_cancel`]
    pub fn copy_tree(&self, source: &Path, dest: &Path) -> Result<u64> {
        copy_tree_with_cancel(source, dest, &AtomicBool::new(false))
    }
}

/// Copies a file or directory tree into `dest`
///
/// Existing destination files are overwritten; destination files missing
/// from the source are left alone. `cancel` is only consulted between
/// entries, never during a file copy. Returns the number of files copied.
pub fn copy_tree_with_cancel(source: &Path, dest: &Path, cancel: &AtomicBool) -> Result<u64> {
    let metadata = std::fs::metadata(source).map_err(|e| Error::fs(source, e))?;
    std::fs::create_dir_all(dest).map_err(|e| Error::fs(dest, e))?;

    if metadata.is_file() {
        let file_name = source
            .file_name()
            .ok_or_else(|| Error::InvalidArgument(format!("Source has no file name: {:?}", source)))?;
        let target = dest.join(file_name);
        std::fs::copy(source, &target).map_err(|e| Error::fs(&target, e))?;
        return Ok(1);
    }

    let mut copied = 0;

    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        if cancel.load(Ordering::Relaxed) {
            warn!("Copy from {:?} cancelled after {} file(s)", source, copied);
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Interrupted,
                format!("copy cancelled after {} file(s)", copied),
            )));
        }

        let entry = entry.map_err(walk_error)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::fs(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| Error::fs(&target, e))?;
            copied += 1;
        }
    }

    debug!("Copied {} file(s) from {:?} to {:?}", copied, source, dest);

    Ok(copied)
}

/// Removes a file or directory tree, deepest entries first
///
/// Stops at the first entry that cannot be removed. A missing path is not an
/// error.
pub fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::fs(path, e)),
    }

    for entry in WalkDir::new(path).contents_first(true) {
        let entry = entry.map_err(walk_error)?;
        let entry_path = entry.path();

        let removed = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry_path)
        } else {
            std::fs::remove_file(entry_path)
        };
        removed.map_err(|e| Error::fs(entry_path, e))?;
    }

    Ok(())
}

/// Total size in bytes of all regular files below `path`
///
/// A missing path has size zero.
pub fn dir_size(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }

    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(walk_error)?;
        if entry.file_type().is_file() {
            let metadata = entry.metadata().map_err(walk_error)?;
            total += metadata.len();
        }
    }

    Ok(total)
}

fn walk_error(err: walkdir::Error) -> Error {
    let path = err.path().map(Path::to_path_buf);
    match path {
        Some(path) => Error::fs(path, err.into()),
        None => Error::Io(err.into()),
    }
}
