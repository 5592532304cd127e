//! Model catalog
//!
//! The catalog is a single JSON document mapping `name:version` keys to
//! [`CatalogEntry`] records. The in-memory map is the source of truth while
//! the store is open; every mutation is applied to a copy, persisted, and
//! only then swapped in, so a failed save leaves memory and disk agreeing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use common::error::{Error, Result};
use common::utils::validate_component;
use storage_adapter::JsonDocument;

use crate::metadata::{catalog_key, CatalogEntry, CatalogFilter};
use crate::versioning::{ACTIVE_POINTER, ACTIVE_POINTER_STAGING};

const RESERVED_VERSIONS: [&str; 2] = [ACTIVE_POINTER, ACTIVE_POINTER_STAGING];

/// File name of the catalog document
pub const CATALOG_FILE: &str = "catalog.json";

type CatalogMap = BTreeMap<String, CatalogEntry>;

/// Persistent catalog of model metadata
pub struct CatalogStore {
    /// Backing document
    document: JsonDocument<CatalogMap>,

    /// Entries by key, guarded for the whole load-modify-save cycle
    entries: Mutex<CatalogMap>,
}

impl CatalogStore {
    /// Opens the catalog kept in `metadata_dir`, loading existing entries
    pub fn open(metadata_dir: impl AsRef<Path>) -> Result<Self> {
        let path = metadata_dir.as_ref().join(CATALOG_FILE);
        let document = JsonDocument::new(path);
        let entries = Self::read(&document)?;

        info!("Opened catalog {:?} with {} entries", document.path(), entries.len());

        Ok(Self {
            document,
            entries: Mutex::new(entries),
        })
    }

    /// Path of the catalog document
    pub fn path(&self) -> &Path {
        self.document.path()
    }

    /// Reads the catalog from disk
    ///
    /// A missing document is an empty catalog. This does not touch the
    /// entries held in memory; see [`CatalogStore::reload`].
    pub fn load(&self) -> Result<BTreeMap<String, CatalogEntry>> {
        Self::read(&self.document)
    }

    /// Replaces the in-memory entries with what is on disk
    pub fn reload(&self) -> Result<usize> {
        let mut guard = self.entries.lock();
        *guard = Self::read(&self.document)?;
        Ok(guard.len())
    }

    /// Persists `entries` as the whole catalog
    pub fn save(&self, entries: &BTreeMap<String, CatalogEntry>) -> Result<()> {
        for (key, entry) in entries {
            if *key != entry.key() {
                return Err(Error::InvalidArgument(format!(
                    "Catalog key {} does not match entry {}",
                    key,
                    entry.key()
                )));
            }
        }

        let mut guard = self.entries.lock();
        self.document.save(entries)?;
        *guard = entries.clone();

        Ok(())
    }

    /// Adds a new entry, stamping both timestamps
    pub fn add(&self, mut entry: CatalogEntry) -> Result<CatalogEntry> {
        validate_name(entry.name())?;
        validate_version(entry.version())?;

        let now = Utc::now();
        entry.created_at = now;
        entry.updated_at = now;

        let key = entry.key();
        self.mutate(|entries| {
            if entries.contains_key(&key) {
                return Err(Error::AlreadyExists(format!("Model {} already exists", key)));
            }
            entries.insert(key.clone(), entry.clone());
            Ok(())
        })?;

        info!("Added model {} to catalog", key);

        Ok(entry)
    }

    /// Looks up an entry
    pub fn get(&self, name: &str, version: &str) -> Option<CatalogEntry> {
        self.entries.lock().get(&catalog_key(name, version)).cloned()
    }

    /// Replaces an existing entry, keeping its creation time
    pub fn update(&self, name: &str, version: &str, mut entry: CatalogEntry) -> Result<CatalogEntry> {
        let key = catalog_key(name, version);
        if entry.key() != key {
            return Err(Error::InvalidArgument(format!(
                "Entry {} cannot be stored under {}",
                entry.key(),
                key
            )));
        }

        let updated = self.mutate(|entries| {
            let existing = entries
                .get(&key)
                .ok_or_else(|| Error::NotFound(format!("Model {} not found", key)))?;

            entry.created_at = existing.created_at;
            entry.updated_at = Utc::now().max(existing.created_at);
            entries.insert(key.clone(), entry.clone());
            Ok(entry)
        })?;

        info!("Updated model {} in catalog", key);

        Ok(updated)
    }

    /// Removes an entry and returns it
    ///
    /// Artifacts stored for the model are not touched.
    pub fn delete(&self, name: &str, version: &str) -> Result<CatalogEntry> {
        let key = catalog_key(name, version);

        let removed = self.mutate(|entries| {
            entries
                .remove(&key)
                .ok_or_else(|| Error::NotFound(format!("Model {} not found", key)))
        })?;

        info!("Deleted model {} from catalog", key);

        Ok(removed)
    }

    /// Entries passing `filter`, ordered by key
    pub fn list(&self, filter: &CatalogFilter) -> Vec<CatalogEntry> {
        self.entries
            .lock()
            .values()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect()
    }

    /// Entries whose name, description or tags contain `query`
    pub fn search(&self, query: &str) -> Vec<CatalogEntry> {
        let results: Vec<CatalogEntry> = self
            .entries
            .lock()
            .values()
            .filter(|entry| entry.matches_query(query))
            .cloned()
            .collect();

        debug!("Search {:?} matched {} entries", query, results.len());

        results
    }

    /// How many entries carry each tag
    pub fn tag_frequencies(&self) -> BTreeMap<String, usize> {
        let mut frequencies = BTreeMap::new();
        for entry in self.entries.lock().values() {
            for tag in entry.metadata.tags.iter() {
                *frequencies.entry(tag.to_string()).or_insert(0) += 1;
            }
        }
        frequencies
    }

    /// Every tag in use
    pub fn all_tags(&self) -> BTreeSet<String> {
        self.entries
            .lock()
            .values()
            .flat_map(|entry| entry.metadata.tags.iter().map(str::to_string))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Deletes all but the newest `max_backups` catalog backups
    pub fn cleanup_old_backups(&self, max_backups: usize) -> Result<Vec<PathBuf>> {
        self.document.prune_backups(max_backups)
    }

    /// Applies `f` to a copy of the catalog, persists it, then publishes it
    fn mutate<R>(&self, f: impl FnOnce(&mut CatalogMap) -> Result<R>) -> Result<R> {
        let mut guard = self.entries.lock();
        let mut next = guard.clone();

        let out = f(&mut next)?;
        self.document.save(&next)?;
        *guard = next;

        Ok(out)
    }

    fn read(document: &JsonDocument<CatalogMap>) -> Result<CatalogMap> {
        let entries = document.load()?.unwrap_or_default();

        for (key, entry) in &entries {
            if *key != entry.key() {
                return Err(Error::CorruptData {
                    path: document.path().to_path_buf(),
                    reason: format!("key {} holds entry {}", key, entry.key()),
                });
            }
        }

        Ok(entries)
    }
}

/// Model names become directory names and the first half of a catalog key
fn validate_name(name: &str) -> Result<()> {
    validate_component("model name", name)?;
    if name.contains(':') {
        return Err(Error::InvalidArgument(format!(
            "Invalid model name (contains ':'): {:?}",
            name
        )));
    }
    Ok(())
}

/// Versions share a directory level with the active pointer
fn validate_version(version: &str) -> Result<()> {
    validate_component("version", version)?;
    if RESERVED_VERSIONS.contains(&version) {
        return Err(Error::InvalidArgument(format!("Version name {:?} is reserved", version)));
    }
    Ok(())
}
