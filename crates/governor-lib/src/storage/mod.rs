//! Storage optimization engine
//!
//! Keeps flash storage healthy on small boards:
//! - RAM-backed tmpfs mounts for temporary files (plain directories when
//!   mounting is not possible)
//! - size-bounded log rotation with oldest-first eviction
//! - round-robin write distribution across several directories
//! - size-tiered caching across RAM, disk and external media
//! - age-based cleanup when the filesystem fills up

mod cache;
mod cleanup;
mod engine;
mod rotation;
mod tmpfs;
mod wear;

pub use cache::{cache_file_name, CacheEntryMeta, CacheTier, CacheUsage};
pub use cleanup::{CleanupMode, CleanupReport, CLEANUP_USAGE_THRESHOLD};
pub use engine::{OptimizationReport, StorageEngine, StorageMetrics};
pub use rotation::{rotate_logs, scan_log_files, LogFileRecord, RotationOutcome};
pub use tmpfs::{is_mounted, parse_mounts, MountEntry, TmpfsMount, TmpfsState};
pub use wear::{WearLeveler, WriteStatistics};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::MIB;

/// Storage engine policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Aggregate bound across all log directories
    pub max_log_size_bytes: u64,
    /// Attempt real tmpfs mounts; when off the mount points are plain directories
    pub tmpfs_enabled: bool,
    pub tmpfs_mounts: Vec<PathBuf>,
    pub log_dirs: Vec<PathBuf>,
    pub cache_dirs: Vec<PathBuf>,
    /// Candidate external media locations, probed with a test write
    pub external_paths: Vec<PathBuf>,
    pub wear_leveling_enabled: bool,
    pub wear_leveling_paths: Vec<PathBuf>,
    /// Write location used when wear leveling is disabled
    pub default_write_path: PathBuf,
    /// Filesystem whose usage drives cleanup
    pub monitored_path: PathBuf,
    pub monitor_interval_ms: u64,
    /// Where write statistics are persisted across restarts
    pub state_path: Option<PathBuf>,
    /// Mount table consulted before mounting
    pub mounts_file: PathBuf,
    pub event_buffer: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_log_size_bytes: 100 * MIB,
            tmpfs_enabled: true,
            tmpfs_mounts: vec![PathBuf::from("/tmp/sbc-governor")],
            log_dirs: vec![PathBuf::from("/var/log/sbc-governor")],
            cache_dirs: vec![PathBuf::from("/var/cache/sbc-governor")],
            external_paths: vec![PathBuf::from("/media/usb"), PathBuf::from("/mnt/external")],
            wear_leveling_enabled: true,
            wear_leveling_paths: vec![
                PathBuf::from("/var/lib/sbc-governor/data0"),
                PathBuf::from("/var/lib/sbc-governor/data1"),
                PathBuf::from("/var/lib/sbc-governor/data2"),
            ],
            default_write_path: PathBuf::from("/var/lib/sbc-governor/data"),
            monitored_path: crate::fsprobe::default_monitored_path(),
            monitor_interval_ms: 60_000,
            state_path: None,
            mounts_file: PathBuf::from("/proc/mounts"),
            event_buffer: 64,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.wear_leveling_enabled && self.wear_leveling_paths.is_empty() {
            return Err("wear leveling is enabled but no wear_leveling_paths are set".to_string());
        }
        if self.max_log_size_bytes == 0 {
            return Err("max_log_size_bytes must be greater than zero".to_string());
        }
        if self.cache_dirs.is_empty() {
            return Err("at least one cache directory is required".to_string());
        }
        Ok(())
    }
}

/// Events published by the storage engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StorageEvent {
    TmpfsMounted { path: PathBuf, size_bytes: u64 },
    /// Mount failed or was disabled; the path is a plain directory
    TmpfsFallback { path: PathBuf, reason: String },
    LogRotationSkipped { total_size: u64 },
    LogRotationCompleted {
        total_size_before: u64,
        total_size_after: u64,
        removed_files: Vec<PathBuf>,
        removed_size: u64,
        rotated_files: Vec<PathBuf>,
    },
    CleanupCompleted {
        cleaned_files: u64,
        cleaned_size: u64,
        usage_percentage_before: f64,
        usage_percentage_after: f64,
    },
    CleanupSkipped { usage_percentage: f64 },
    ExternalStorageDetected { path: PathBuf },
}

impl StorageEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StorageEvent::TmpfsMounted { .. } => "tmpfs_mounted",
            StorageEvent::TmpfsFallback { .. } => "tmpfs_fallback",
            StorageEvent::LogRotationSkipped { .. } => "log_rotation_skipped",
            StorageEvent::LogRotationCompleted { .. } => "log_rotation_completed",
            StorageEvent::CleanupCompleted { .. } => "cleanup_completed",
            StorageEvent::CleanupSkipped { .. } => "cleanup_skipped",
            StorageEvent::ExternalStorageDetected { .. } => "external_storage_detected",
        }
    }
}
