//! RAM-backed mounts for temporary files

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One line of a mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TmpfsState {
    /// Mounted by the governor
    Mounted,
    /// Something was already mounted there
    AlreadyMounted,
    /// Mounting failed or is disabled; a regular directory on the backing disk
    PlainDirectory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TmpfsMount {
    pub path: PathBuf,
    pub state: TmpfsState,
    pub size_bytes: u64,
    pub ram_backed: bool,
}

/// Undo the octal escapes the kernel uses for whitespace in mount paths
fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Parse `/proc/mounts` content
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                device: device.to_string(),
                mount_point: PathBuf::from(unescape_mount_path(mount_point)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

pub fn is_mounted<'a>(entries: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    entries.iter().find(|entry| entry.mount_point == path)
}

/// tmpfs size for a board with `ram_total` bytes of RAM
pub fn tmpfs_size(ram_total: u64) -> u64 {
    ram_total / 10
}

/// Ensure `path` exists and, when enabled, is a tmpfs mount.
///
/// Never fails: on any mount problem the directory is used as is. The
/// second value carries the fallback reason.
pub(crate) async fn provision(
    path: &Path,
    size_bytes: u64,
    mount_enabled: bool,
    mounts_file: &Path,
) -> (TmpfsMount, Option<String>) {
    let plain = |reason: String| {
        (
            TmpfsMount {
                path: path.to_path_buf(),
                state: TmpfsState::PlainDirectory,
                size_bytes: 0,
                ram_backed: false,
            },
            Some(reason),
        )
    };

    if let Err(e) = fs::create_dir_all(path).await {
        warn!(path = %path.display(), error = %e, "Failed to create tmpfs mount point");
        return plain(format!("cannot create directory: {}", e));
    }

    if let Ok(table) = fs::read_to_string(mounts_file).await {
        let entries = parse_mounts(&table);
        if let Some(existing) = is_mounted(&entries, path) {
            debug!(path = %path.display(), fs_type = %existing.fs_type, "Mount point already in use");
            return (
                TmpfsMount {
                    path: path.to_path_buf(),
                    state: TmpfsState::AlreadyMounted,
                    size_bytes: 0,
                    ram_backed: existing.fs_type == "tmpfs",
                },
                None,
            );
        }
    }

    if !mount_enabled {
        return plain("tmpfs mounting disabled".to_string());
    }

    let options = format!("size={},mode=1777", size_bytes);
    let output = Command::new("mount")
        .arg("-t")
        .arg("tmpfs")
        .arg("-o")
        .arg(&options)
        .arg("tmpfs")
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            info!(path = %path.display(), size_bytes, "Mounted tmpfs");
            (
                TmpfsMount {
                    path: path.to_path_buf(),
                    state: TmpfsState::Mounted,
                    size_bytes,
                    ram_backed: true,
                },
                None,
            )
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(path = %path.display(), error = %stderr, "tmpfs mount failed, using plain directory");
            plain(stderr)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "mount unavailable, using plain directory");
            plain(e.to_string())
        }
    }
}
