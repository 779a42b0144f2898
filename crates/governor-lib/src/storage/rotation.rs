//! Size-bounded log rotation
//!
//! All matched files across every log directory share one aggregate bound.
//! Eviction is strictly oldest-first by modification time; survivors that
//! are individually large are renamed with a timestamp suffix so the next
//! write starts a fresh file.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use super::StorageEvent;

const LOG_SUFFIX: &str = ".log";
const LOG_MARKER: &str = ".log.";

/// One log file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileRecord {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// Result of one rotation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RotationOutcome {
    /// Aggregate size was within the bound; nothing touched
    Skipped { total_size: u64 },
    Completed {
        total_size_before: u64,
        total_size_after: u64,
        removed_files: Vec<PathBuf>,
        removed_size: u64,
        rotated_files: Vec<PathBuf>,
    },
}

impl RotationOutcome {
    pub fn removed_size(&self) -> u64 {
        match self {
            RotationOutcome::Skipped { .. } => 0,
            RotationOutcome::Completed { removed_size, .. } => *removed_size,
        }
    }

    pub fn removed_count(&self) -> usize {
        match self {
            RotationOutcome::Skipped { .. } => 0,
            RotationOutcome::Completed { removed_files, .. } => removed_files.len(),
        }
    }

    pub fn to_event(&self) -> StorageEvent {
        match self.clone() {
            RotationOutcome::Skipped { total_size } => {
                StorageEvent::LogRotationSkipped { total_size }
            }
            RotationOutcome::Completed {
                total_size_before,
                total_size_after,
                removed_files,
                removed_size,
                rotated_files,
            } => StorageEvent::LogRotationCompleted {
                total_size_before,
                total_size_after,
                removed_files,
                removed_size,
                rotated_files,
            },
        }
    }
}

fn is_log_file(name: &str) -> bool {
    name.ends_with(LOG_SUFFIX) || name.contains(LOG_MARKER)
}

/// Log files in `dirs`, in directory order then file-name order.
/// Missing directories are skipped.
pub async fn scan_log_files(dirs: &[PathBuf]) -> Vec<LogFileRecord> {
    let mut records = Vec::new();

    for dir in dirs {
        let Ok(mut entries) = fs::read_dir(dir).await else {
            debug!(dir = %dir.display(), "Log directory not readable, skipping");
            continue;
        };

        let mut found = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_log_file(&name) {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            found.push(LogFileRecord {
                path: entry.path(),
                size_bytes: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        found.sort_by(|a, b| a.path.cmp(&b.path));
        records.extend(found);
    }

    records
}

fn rotated_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}.{}", name, stamp))
}

/// Bound the aggregate size of log files in `dirs` to `max_bytes`
pub async fn rotate_logs(dirs: &[PathBuf], max_bytes: u64) -> RotationOutcome {
    let files = scan_log_files(dirs).await;
    let total: u64 = files.iter().map(|f| f.size_bytes).sum();

    if total <= max_bytes {
        debug!(total_bytes = total, max_bytes, "Log size within bound");
        return RotationOutcome::Skipped { total_size: total };
    }

    // Stable sort keeps scan order among equal timestamps
    let mut by_age: Vec<&LogFileRecord> = files.iter().collect();
    by_age.sort_by_key(|f| f.modified);

    let mut remaining = total;
    let mut removed_files = Vec::new();
    let mut removed_size = 0u64;
    for file in by_age {
        if remaining <= max_bytes {
            break;
        }
        match fs::remove_file(&file.path).await {
            Ok(()) => {
                remaining -= file.size_bytes;
                removed_size += file.size_bytes;
                removed_files.push(file.path.clone());
            }
            Err(e) => warn!(path = %file.path.display(), error = %e, "Failed to remove log file"),
        }
    }

    let single_file_cap = max_bytes / 10;
    let mut rotated_files = Vec::new();
    for file in files.iter().filter(|f| !removed_files.contains(&f.path)) {
        let active = file
            .path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(LOG_SUFFIX));
        if !active || file.size_bytes <= single_file_cap {
            continue;
        }
        let target = rotated_path(&file.path);
        match fs::rename(&file.path, &target).await {
            Ok(()) => rotated_files.push(target),
            Err(e) => warn!(path = %file.path.display(), error = %e, "Failed to rotate log file"),
        }
    }

    info!(
        total_before = total,
        total_after = remaining,
        removed = removed_files.len(),
        rotated = rotated_files.len(),
        "Log rotation complete"
    );

    RotationOutcome::Completed {
        total_size_before: total,
        total_size_after: remaining,
        removed_files,
        removed_size,
        rotated_files,
    }
}
