//! Cleanup engine implementation
//!
//! The engine evaluates its policies against every model directory of every
//! storage class and reclaims the directories that match. One storage
//! snapshot is taken per run and every verdict in that run is made against
//! it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::error::{Error, Result};
use common::utils::format_bytes;
use storage_adapter::dir_size;
use store_config::{CleanupConfig, PolicyConfig};

use crate::monitor::StorageMonitor;
use crate::policy::{
    AgeBasedCleanup, CleanupPolicy, SizeBasedCleanup, UsageBasedCleanup, UsageSource,
};

/// Outcome of one cleanup run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    /// Directories removed
    pub cleaned_models: Vec<PathBuf>,

    /// Directories that matched but could not be removed
    pub failed_models: Vec<PathBuf>,

    /// Directories that matched during a dry run
    pub skipped_models: Vec<PathBuf>,

    /// Bytes reclaimed, measured before removal
    pub total_space_freed: u64,

    /// Whether this was a dry run
    pub dry_run: bool,
}

impl CleanupResult {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }
}

/// Builds policies from configuration, in configured order
pub fn build_policies(
    config: &CleanupConfig,
    usage: Arc<dyn UsageSource>,
) -> Vec<Box<dyn CleanupPolicy>> {
    config
        .policies
        .iter()
        .map(|policy| -> Box<dyn CleanupPolicy> {
            match policy {
                PolicyConfig::Age { max_age_days } => Box::new(AgeBasedCleanup::new(*max_age_days)),
                PolicyConfig::Usage {
                    min_requests,
                    timeframe_days,
                    missing,
                } => Box::new(
                    UsageBasedCleanup::new(*min_requests, *timeframe_days, usage.clone())
                        .with_missing(missing.unwrap_or(config.missing_usage)),
                ),
                PolicyConfig::Size { max_size_mb } => Box::new(SizeBasedCleanup::new(*max_size_mb)),
            }
        })
        .collect()
}

/// Applies cleanup policies to the monitored storage
pub struct CleanupEngine {
    /// Storage being cleaned
    monitor: Arc<StorageMonitor>,

    /// Policies in evaluation order
    policies: Vec<Box<dyn CleanupPolicy>>,

    /// Set while a run is in progress
    running: AtomicBool,
}

impl CleanupEngine {
    /// Creates an engine with no policies
    pub fn new(monitor: Arc<StorageMonitor>) -> Self {
        Self {
            monitor,
            policies: Vec::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Creates an engine with the policies of a cleanup configuration
    pub fn from_config(
        monitor: Arc<StorageMonitor>,
        config: &CleanupConfig,
        usage: Arc<dyn UsageSource>,
    ) -> Self {
        let mut engine = Self::new(monitor);
        for policy in build_policies(config, usage) {
            engine.add_policy(policy);
        }
        engine
    }

    /// Appends a policy; policies are evaluated in insertion order
    pub fn add_policy(&mut self, policy: Box<dyn CleanupPolicy>) {
        debug!("Adding cleanup policy {:?}", policy);
        self.policies.push(policy);
    }

    /// Names of the configured policies, in evaluation order
    pub fn policy_names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn monitor(&self) -> &Arc<StorageMonitor> {
        &self.monitor
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Evaluates every model directory and reclaims the matching ones
    ///
    /// In a dry run nothing is removed and matches are reported as skipped.
    /// A directory that cannot be removed is reported as failed without
    /// stopping the run. Fails with [`Error::Busy`] when another run is in
    /// progress.
    pub fn run_cleanup(&self, dry_run: bool) -> Result<CleanupResult> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy("A cleanup run is already in progress".to_string()));
        }
        let _guard = RunGuard(&self.running);

        info!("Starting cleanup run (dry run: {})", dry_run);

        let storage = self.monitor.collect()?;
        let candidates = self.monitor.model_directories()?;
        let mut result = CleanupResult::new(dry_run);

        for (class, path) in candidates {
            let first = match self
                .policies
                .iter()
                .position(|policy| policy.should_cleanup(&path, &storage))
            {
                Some(index) => index,
                None => continue,
            };

            debug!(
                "{} model {:?} matched policy {}",
                class,
                path,
                self.policies[first].name()
            );

            if dry_run {
                result.skipped_models.push(path);
                continue;
            }

            let size = dir_size(&path).unwrap_or_else(|e| {
                warn!("Could not measure {:?}: {}", path, e);
                0
            });

            let mut removed = false;
            for (offset, policy) in self.policies[first..].iter().enumerate() {
                if offset > 0 && !policy.should_cleanup(&path, &storage) {
                    continue;
                }
                match policy.cleanup(&path) {
                    Ok(()) => {
                        info!("Policy {} removed {:?} ({})", policy.name(), path, format_bytes(size));
                        removed = true;
                        break;
                    }
                    Err(e) => warn!("Policy {} failed to remove {:?}: {}", policy.name(), path, e),
                }
            }

            if removed {
                result.total_space_freed += size;
                result.cleaned_models.push(path);
            } else {
                result.failed_models.push(path);
            }
        }

        if !dry_run {
            if let Err(e) = self.monitor.collect() {
                warn!("Storage rescan after cleanup failed: {}", e);
            }
        }

        info!(
            "Cleanup finished: {} cleaned, {} failed, {} skipped, {} freed",
            result.cleaned_models.len(),
            result.failed_models.len(),
            result.skipped_models.len(),
            format_bytes(result.total_space_freed)
        );

        Ok(result)
    }
}

/// Clears the running flag when a run ends, including by error
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::StorageInfo;
    use crate::policy::NoUsageData;
    use common::types::StorageClass;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::mpsc;

    fn storage() -> (tempfile::TempDir, Arc<StorageMonitor>) {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        let quantized = dir.path().join("quantized");

        for (root, model, bytes) in [(&raw, "bert", 100usize), (&raw, "alexnet", 40), (&quantized, "bert-int8", 25)] {
            std::fs::create_dir_all(root.join(model)).unwrap();
            std::fs::write(root.join(model).join("model.bin"), vec![1u8; bytes]).unwrap();
        }

        let monitor = Arc::new(StorageMonitor::new(vec![
            (StorageClass::Raw, raw),
            (StorageClass::Quantized, quantized),
            (StorageClass::Repository, dir.path().join("repository")),
        ]));

        (dir, monitor)
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    /// Matches everything; fails to remove directories named in `refuse`
    #[derive(Debug)]
    struct Refusing {
        refuse: Vec<&'static str>,
    }

    impl CleanupPolicy for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        fn should_cleanup(&self, _path: &Path, _storage: &StorageInfo) -> bool {
            true
        }

        fn cleanup(&self, path: &Path) -> Result<()> {
            let name = path.file_name().unwrap().to_string_lossy();
            if self.refuse.iter().any(|r| *r == name) {
                return Err(Error::InvalidArgument(format!("refusing {}", name)));
            }
            storage_adapter::remove_tree(path)
        }
    }

    #[test]
    fn test_fresh_storage_with_age_zero_is_kept() {
        let (_dir, monitor) = storage();
        let mut engine = CleanupEngine::new(monitor);
        engine.add_policy(Box::new(AgeBasedCleanup::new(0)));

        let result = engine.run_cleanup(false).unwrap();
        assert!(result.cleaned_models.is_empty());
        assert!(result.failed_models.is_empty());
        assert_eq!(result.total_space_freed, 0);
    }

    #[test]
    fn test_dry_run_reports_without_removing() {
        let (_dir, monitor) = storage();
        let mut engine = CleanupEngine::new(monitor);
        engine.add_policy(Box::new(SizeBasedCleanup::new(0)));

        let first = engine.run_cleanup(true).unwrap();
        assert!(first.dry_run);
        assert_eq!(names(&first.skipped_models), vec!["alexnet", "bert", "bert-int8"]);
        assert!(first.cleaned_models.is_empty());
        assert_eq!(first.total_space_freed, 0);

        let second = engine.run_cleanup(true).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_real_run_frees_space_and_rescans() {
        let (_dir, monitor) = storage();
        let mut engine = CleanupEngine::new(monitor.clone());
        engine.add_policy(Box::new(SizeBasedCleanup::new(0)));

        let result = engine.run_cleanup(false).unwrap();
        assert_eq!(names(&result.cleaned_models), vec!["alexnet", "bert", "bert-int8"]);
        assert_eq!(result.total_space_freed, 165);
        assert!(result.cleaned_models.iter().all(|p| !p.exists()));

        assert_eq!(monitor.latest().unwrap().total_bytes(), 0);
    }

    #[test]
    fn test_size_policy_under_limit_keeps_everything() {
        let (_dir, monitor) = storage();
        let mut engine = CleanupEngine::new(monitor);
        engine.add_policy(Box::new(SizeBasedCleanup::new(1)));

        let result = engine.run_cleanup(false).unwrap();
        assert_eq!(result, CleanupResult::new(false));
    }

    #[test]
    fn test_failures_are_isolated() {
        let (_dir, monitor) = storage();
        let mut engine = CleanupEngine::new(monitor);
        engine.add_policy(Box::new(Refusing { refuse: vec!["bert"] }));

        let result = engine.run_cleanup(false).unwrap();
        assert_eq!(names(&result.failed_models), vec!["bert"]);
        assert_eq!(names(&result.cleaned_models), vec!["alexnet", "bert-int8"]);
        assert_eq!(result.total_space_freed, 65);
        assert!(result.failed_models[0].exists());
    }

    #[test]
    fn test_later_matching_policy_retries_removal() {
        let (_dir, monitor) = storage();
        let mut engine = CleanupEngine::new(monitor);
        engine.add_policy(Box::new(Refusing { refuse: vec!["bert"] }));
        engine.add_policy(Box::new(SizeBasedCleanup::new(0)));

        let result = engine.run_cleanup(false).unwrap();
        assert!(result.failed_models.is_empty());
        assert_eq!(result.cleaned_models.len(), 3);
    }

    #[test]
    fn test_usage_policy_from_config() {
        let (_dir, monitor) = storage();
        let config = CleanupConfig {
            policies: vec![PolicyConfig::Usage {
                min_requests: 10,
                timeframe_days: 7,
                missing: None,
            }],
            missing_usage: store_config::MissingUsage::Defer,
        };
        let engine = CleanupEngine::from_config(monitor, &config, Arc::new(NoUsageData));

        assert_eq!(engine.policy_names(), vec!["usage"]);
        assert!(engine.run_cleanup(true).unwrap().skipped_models.is_empty());
    }

    #[test]
    fn test_default_config_policy_order() {
        let (_dir, monitor) = storage();
        let engine = CleanupEngine::from_config(monitor, &CleanupConfig::default(), Arc::new(NoUsageData));
        assert_eq!(engine.policy_names(), vec!["age", "usage", "size"]);
    }

    /// Blocks inside the first evaluation until released
    #[derive(Debug)]
    struct Blocking {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl CleanupPolicy for Blocking {
        fn name(&self) -> &str {
            "blocking"
        }

        fn should_cleanup(&self, _path: &Path, _storage: &StorageInfo) -> bool {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv();
            false
        }
    }

    #[test]
    fn test_concurrent_run_is_busy() {
        let (_dir, monitor) = storage();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();

        let mut engine = CleanupEngine::new(monitor);
        engine.add_policy(Box::new(Blocking {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        }));
        let engine = Arc::new(engine);

        let background = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.run_cleanup(true))
        };

        entered_rx.recv().unwrap();
        assert!(engine.is_running());
        assert!(matches!(engine.run_cleanup(true), Err(Error::Busy(_))));

        // one release per candidate directory
        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        background.join().unwrap().unwrap();

        assert!(!engine.is_running());
        drop(release_tx);
        assert!(engine.run_cleanup(true).is_ok());
    }
}
