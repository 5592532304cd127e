//! Cleanup policies
//!
//! A policy decides whether a model directory should be reclaimed and knows
//! how to reclaim it. Policies are immutable once built; everything a
//! verdict depends on besides the directory itself comes from the
//! [`StorageInfo`] snapshot of the current run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use common::error::{Error, Result};
use common::utils::mib_to_bytes;
use storage_adapter::remove_tree;
use store_config::MissingUsage;

use crate::monitor::StorageInfo;

/// A rule for reclaiming model directories
pub trait CleanupPolicy: Send + Sync + fmt::Debug {
    /// Short label used in logs and reports
    fn name(&self) -> &str;

    /// Whether `path` should be reclaimed
    fn should_cleanup(&self, path: &Path, storage: &StorageInfo) -> bool;

    /// Reclaims `path`
    fn cleanup(&self, path: &Path) -> Result<()> {
        remove_tree(path)
    }
}

/// Reclaims directories not modified for more than `max_age_days`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeBasedCleanup {
    pub max_age_days: u64,
}

impl AgeBasedCleanup {
    pub fn new(max_age_days: u64) -> Self {
        Self { max_age_days }
    }

    /// Whole days between the last modification of `path` and `now`
    pub fn age_days(path: &Path, now: DateTime<Utc>) -> Option<i64> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
        let modified: DateTime<Utc> = modified.into();
        Some((now - modified).num_days())
    }
}

impl CleanupPolicy for AgeBasedCleanup {
    fn name(&self) -> &str {
        "age"
    }

    fn should_cleanup(&self, path: &Path, storage: &StorageInfo) -> bool {
        match Self::age_days(path, storage.collected_at) {
            Some(age) => {
                trace!("{:?} is {} day(s) old", path, age);
                age > 0 && age as u64 > self.max_age_days
            }
            None => false,
        }
    }
}

/// Source of request counts per model
pub trait UsageSource: Send + Sync {
    /// Requests served for `model` in the last `window_days`, if known
    fn request_count(&self, model: &str, window_days: u64) -> Option<u64>;
}

/// A usage source that knows nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUsageData;

impl UsageSource for NoUsageData {
    fn request_count(&self, _model: &str, _window_days: u64) -> Option<u64> {
        None
    }
}

/// Fixed request counts, typically exported by the serving layer
///
/// The counts are assumed to already cover the policy window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticUsage {
    counts: BTreeMap<String, u64>,
}

impl StaticUsage {
    pub fn new(counts: BTreeMap<String, u64>) -> Self {
        Self { counts }
    }

    /// Reads a JSON object mapping model names to request counts
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::fs(path, e))?;
        let counts = serde_json::from_str(&contents).map_err(|e| Error::CorruptData {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self { counts })
    }

    pub fn insert(&mut self, model: impl Into<String>, count: u64) {
        self.counts.insert(model.into(), count);
    }
}

impl UsageSource for StaticUsage {
    fn request_count(&self, model: &str, _window_days: u64) -> Option<u64> {
        self.counts.get(model).copied()
    }
}

/// Reclaims models requested fewer than `min_requests` times in the window
#[derive(Clone)]
pub struct UsageBasedCleanup {
    pub min_requests: u64,
    pub timeframe_days: u64,
    pub missing: MissingUsage,
    usage: Arc<dyn UsageSource>,
}

impl UsageBasedCleanup {
    pub fn new(min_requests: u64, timeframe_days: u64, usage: Arc<dyn UsageSource>) -> Self {
        Self {
            min_requests,
            timeframe_days,
            missing: MissingUsage::default(),
            usage,
        }
    }

    pub fn with_missing(mut self, missing: MissingUsage) -> Self {
        self.missing = missing;
        self
    }
}

impl fmt::Debug for UsageBasedCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageBasedCleanup")
            .field("min_requests", &self.min_requests)
            .field("timeframe_days", &self.timeframe_days)
            .field("missing", &self.missing)
            .finish()
    }
}

impl CleanupPolicy for UsageBasedCleanup {
    fn name(&self) -> &str {
        "usage"
    }

    fn should_cleanup(&self, path: &Path, _storage: &StorageInfo) -> bool {
        let model = match path.file_name() {
            Some(name) => name.to_string_lossy(),
            None => return false,
        };

        let count = match self.usage.request_count(&model, self.timeframe_days) {
            Some(count) => count,
            None => match self.missing {
                MissingUsage::TreatAsZero => 0,
                MissingUsage::Defer => {
                    debug!("No usage data for {}, deferring", model);
                    return false;
                }
            },
        };

        count < self.min_requests
    }
}

/// Reclaims directories while total usage exceeds `max_size_mb`
///
/// The verdict is global: when the snapshot is over the limit every
/// directory qualifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeBasedCleanup {
    pub max_size_mb: u64,
}

impl SizeBasedCleanup {
    pub fn new(max_size_mb: u64) -> Self {
        Self { max_size_mb }
    }

    pub fn max_bytes(&self) -> u64 {
        mib_to_bytes(self.max_size_mb)
    }
}

impl CleanupPolicy for SizeBasedCleanup {
    fn name(&self) -> &str {
        "size"
    }

    fn should_cleanup(&self, _path: &Path, storage: &StorageInfo) -> bool {
        storage.total_bytes() > self.max_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ClassUsage;
    use chrono::Duration;
    use common::types::StorageClass;

    fn snapshot(at: DateTime<Utc>, usage_bytes: u64) -> StorageInfo {
        StorageInfo {
            classes: vec![ClassUsage {
                class: StorageClass::Raw,
                path: "raw".into(),
                usage_bytes,
                file_count: 1,
                model_count: 1,
            }],
            collected_at: at,
        }
    }

    #[test]
    fn test_age_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();

        let fresh = AgeBasedCleanup::new(0);
        assert!(!fresh.should_cleanup(dir.path(), &snapshot(now, 0)));

        let later = now + Duration::days(1) + Duration::hours(1);
        assert!(fresh.should_cleanup(dir.path(), &snapshot(later, 0)));
        assert!(!AgeBasedCleanup::new(1).should_cleanup(dir.path(), &snapshot(later, 0)));

        let much_later = now + Duration::days(31);
        assert!(AgeBasedCleanup::new(30).should_cleanup(dir.path(), &snapshot(much_later, 0)));
    }

    #[test]
    fn test_age_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let policy = AgeBasedCleanup::new(0);
        let later = Utc::now() + Duration::days(10);
        assert!(!policy.should_cleanup(&dir.path().join("gone"), &snapshot(later, 0)));
    }

    #[test]
    fn test_usage_threshold() {
        let mut usage = StaticUsage::default();
        usage.insert("popular", 50);
        usage.insert("rare", 3);
        let policy = UsageBasedCleanup::new(10, 7, Arc::new(usage));
        let info = snapshot(Utc::now(), 0);

        assert!(!policy.should_cleanup(Path::new("/raw/popular"), &info));
        assert!(policy.should_cleanup(Path::new("/raw/rare"), &info));
    }

    #[test]
    fn test_usage_missing_data() {
        let info = snapshot(Utc::now(), 0);
        let evicting = UsageBasedCleanup::new(10, 7, Arc::new(NoUsageData));
        assert!(evicting.should_cleanup(Path::new("/raw/unknown"), &info));

        let deferring = evicting.clone().with_missing(MissingUsage::Defer);
        assert!(!deferring.should_cleanup(Path::new("/raw/unknown"), &info));
    }

    #[test]
    fn test_static_usage_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");
        std::fs::write(&path, r#"{"bert": 12, "vit": 0}"#).unwrap();

        let usage = StaticUsage::from_file(&path).unwrap();
        assert_eq!(usage.request_count("bert", 7), Some(12));
        assert_eq!(usage.request_count("resnet", 7), None);

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(StaticUsage::from_file(&path).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_size_is_global() {
        let policy = SizeBasedCleanup::new(1);
        let now = Utc::now();

        assert!(!policy.should_cleanup(Path::new("/raw/a"), &snapshot(now, 1024 * 1024)));
        assert!(policy.should_cleanup(Path::new("/raw/a"), &snapshot(now, 1024 * 1024 + 1)));
        assert!(policy.should_cleanup(Path::new("/raw/b"), &snapshot(now, 1024 * 1024 + 1)));
    }

    #[test]
    fn test_default_cleanup_removes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("bert");
        std::fs::create_dir_all(target.join("1")).unwrap();
        std::fs::write(target.join("1").join("model.bin"), b"w").unwrap();

        SizeBasedCleanup::new(0).cleanup(&target).unwrap();
        assert!(!target.exists());
    }
}
