//! Storage monitoring and cleanup for the Model Artifact Store
//!
//! This crate measures the storage classes, defines the cleanup policies,
//! and runs them through the cleanup engine.

mod cleanup;
mod monitor;
mod policy;

pub use cleanup::{build_policies, CleanupEngine, CleanupResult};
pub use monitor::{backup_storage, ClassUsage, StorageInfo, StorageMonitor};
pub use policy::{
    AgeBasedCleanup, CleanupPolicy, NoUsageData, SizeBasedCleanup, StaticUsage, UsageBasedCleanup,
    UsageSource,
};
