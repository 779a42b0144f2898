//! Round-robin write distribution across several directories

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{GovernorError, Result};
use crate::persist;

/// Observable write distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteStatistics {
    pub enabled: bool,
    pub total_writes: u64,
    pub current_index: usize,
    pub current_path: PathBuf,
    pub path_count: usize,
    /// Writes attributed to each path, keyed by path
    pub per_path: BTreeMap<String, u64>,
}

/// Persisted cursor and counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WearState {
    cursor: usize,
    write_count: u64,
    per_path: BTreeMap<String, u64>,
}

/// Cursor over the configured write locations
///
/// Only [`WearLeveler::optimize_writes`] mutates the cursor and counters;
/// [`WearLeveler::next_write_path`] is a pure read.
#[derive(Debug)]
pub struct WearLeveler {
    enabled: bool,
    paths: Vec<PathBuf>,
    default_path: PathBuf,
    cursor: usize,
    write_count: u64,
    per_path: Vec<u64>,
    created: Vec<bool>,
}

impl WearLeveler {
    pub fn new(enabled: bool, paths: Vec<PathBuf>, default_path: PathBuf) -> Self {
        let enabled = enabled && !paths.is_empty();
        let count = paths.len();
        Self {
            enabled,
            paths,
            default_path,
            cursor: 0,
            write_count: 0,
            per_path: vec![0; count],
            created: vec![false; count],
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Path the next write should go to
    pub fn next_write_path(&self) -> &Path {
        if !self.enabled {
            return &self.default_path;
        }
        &self.paths[self.cursor]
    }

    /// Record one write to the current path and advance the cursor.
    ///
    /// The current directory is created on first use; if that fails the
    /// cursor and counters are left untouched.
    pub async fn optimize_writes(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let index = self.cursor;
        if !self.created[index] {
            let path = &self.paths[index];
            fs::create_dir_all(path)
                .await
                .map_err(|source| GovernorError::DirectoryCreation {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), "Created wear-leveling directory");
            self.created[index] = true;
        }

        self.write_count += 1;
        self.per_path[index] += 1;
        self.cursor = (index + 1) % self.paths.len();
        Ok(())
    }

    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    pub fn statistics(&self) -> WriteStatistics {
        WriteStatistics {
            enabled: self.enabled,
            total_writes: self.write_count,
            current_index: if self.enabled { self.cursor } else { 0 },
            current_path: self.next_write_path().to_path_buf(),
            path_count: if self.enabled { self.paths.len() } else { 1 },
            per_path: self
                .paths
                .iter()
                .zip(&self.per_path)
                .map(|(p, c)| (p.display().to_string(), *c))
                .collect(),
        }
    }

    /// Persist cursor and counters
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let state = WearState {
            cursor: self.cursor,
            write_count: self.write_count,
            per_path: self.statistics().per_path,
        };
        persist::save_json(path, &state)?;
        debug!(path = %path.display(), writes = self.write_count, "Saved write statistics");
        Ok(())
    }

    /// Restore state written by [`WearLeveler::save`]. Counts for paths no
    /// longer configured are dropped; a missing file leaves fresh state.
    pub fn load(&mut self, path: &Path) {
        if !path.exists() {
            return;
        }
        let state: WearState = match persist::load_json(path) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable write statistics");
                return;
            }
        };

        self.write_count = state.write_count;
        for (index, configured) in self.paths.iter().enumerate() {
            if let Some(count) = state.per_path.get(&configured.display().to_string()) {
                self.per_path[index] = *count;
            }
        }
        if !self.paths.is_empty() {
            self.cursor = state.cursor % self.paths.len();
        }
        info!(
            path = %path.display(),
            writes = self.write_count,
            cursor = self.cursor,
            "Restored write statistics"
        );
    }
}
