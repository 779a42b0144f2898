//! Age-based removal of cache and temporary files

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::fs;
use tracing::warn;

use super::RotationOutcome;

/// Filesystem usage (percent) at which cleanup runs
pub const CLEANUP_USAGE_THRESHOLD: f64 = 80.0;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupMode {
    /// Only when usage is at or above the threshold
    Normal,
    /// Regardless of usage
    Forced,
    /// Regardless of usage, with shorter ages and an unconditional log rotation
    Aggressive,
}

impl CleanupMode {
    /// Maximum age of (cache, temp) files that survive this mode
    pub fn max_ages(&self) -> (Duration, Duration) {
        match self {
            CleanupMode::Normal | CleanupMode::Forced => (7 * DAY, DAY),
            CleanupMode::Aggressive => (DAY, Duration::ZERO),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub mode: CleanupMode,
    /// False when usage was below the threshold in normal mode
    pub performed: bool,
    pub cleaned_files: u64,
    pub cleaned_size: u64,
    pub usage_percentage_before: f64,
    pub usage_percentage_after: f64,
    pub rotation: Option<RotationOutcome>,
}

impl CleanupReport {
    pub(crate) fn skipped(mode: CleanupMode, usage: f64) -> Self {
        Self {
            mode,
            performed: false,
            cleaned_files: 0,
            cleaned_size: 0,
            usage_percentage_before: usage,
            usage_percentage_after: usage,
            rotation: None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AgedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Regular files under `dirs` last modified more than `max_age` before `now`
pub(crate) async fn collect_expired(
    dirs: &[PathBuf],
    max_age: Duration,
    now: SystemTime,
) -> Vec<AgedFile> {
    let mut expired = Vec::new();
    let mut pending: Vec<PathBuf> = dirs.to_vec();

    while let Some(dir) = pending.pop() {
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_dir() {
                pending.push(entry.path());
                continue;
            }
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(now);
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= max_age {
                expired.push(AgedFile {
                    path: entry.path(),
                    size: metadata.len(),
                    modified,
                });
            }
        }
    }

    expired
}

/// Delete `files` oldest first; returns (files removed, bytes removed)
pub(crate) async fn remove_oldest_first(mut files: Vec<AgedFile>) -> (u64, u64) {
    files.sort_by_key(|f| f.modified);

    let mut count = 0;
    let mut bytes = 0;
    for file in files {
        match fs::remove_file(&file.path).await {
            Ok(()) => {
                count += 1;
                bytes += file.size;
            }
            Err(e) => warn!(path = %file.path.display(), error = %e, "Failed to remove file"),
        }
    }
    (count, bytes)
}
