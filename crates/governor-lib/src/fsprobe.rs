//! Filesystem usage queries

use std::path::{Path, PathBuf};

use serde::Serialize;
use sysinfo::Disks;

/// Capacity figures for the filesystem backing a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FsUsage {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

impl FsUsage {
    pub fn new(total: u64, available: u64) -> Self {
        let available = available.min(total);
        Self {
            total,
            used: total - available,
            available,
        }
    }

    pub fn usage_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f64 / self.total as f64 * 100.0
    }
}

/// Source of filesystem usage figures
pub trait FilesystemProbe: Send + Sync {
    /// Usage of the filesystem containing `path`, `None` when unknown
    fn usage(&self, path: &Path) -> Option<FsUsage>;
}

/// Probe backed by the `sysinfo` disk list.
///
/// Picks the mounted disk whose mount point is the longest prefix of the
/// queried path.
#[derive(Debug, Default, Clone)]
pub struct SysinfoProbe;

impl FilesystemProbe for SysinfoProbe {
    fn usage(&self, path: &Path) -> Option<FsUsage> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| FsUsage::new(disk.total_space(), disk.available_space()))
    }
}

/// Probe returning a fixed figure for every path
#[derive(Debug, Clone)]
pub struct StaticProbe {
    usage: Option<FsUsage>,
}

impl StaticProbe {
    pub fn new(usage: Option<FsUsage>) -> Self {
        Self { usage }
    }

    /// Probe reporting `percent` usage of a filesystem of `total` bytes
    pub fn with_percent(total: u64, percent: f64) -> Self {
        let used = (total as f64 * percent / 100.0) as u64;
        Self::new(Some(FsUsage::new(total, total.saturating_sub(used))))
    }
}

impl FilesystemProbe for StaticProbe {
    fn usage(&self, _path: &Path) -> Option<FsUsage> {
        self.usage
    }
}

/// Probe that reports usage from a shared, mutable figure
#[derive(Debug, Default)]
pub struct SharedProbe {
    usage: std::sync::RwLock<Option<FsUsage>>,
}

impl SharedProbe {
    pub fn set(&self, usage: Option<FsUsage>) {
        if let Ok(mut guard) = self.usage.write() {
            *guard = usage;
        }
    }
}

impl FilesystemProbe for SharedProbe {
    fn usage(&self, _path: &Path) -> Option<FsUsage> {
        self.usage.read().ok().and_then(|guard| *guard)
    }
}

/// Mount point used for usage queries when none is configured
pub fn default_monitored_path() -> PathBuf {
    PathBuf::from("/")
}
