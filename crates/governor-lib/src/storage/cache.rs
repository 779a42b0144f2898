//! Size-tiered cache placement
//!
//! Entries are stored as a `<key>.cache` payload next to a `<key>.meta`
//! JSON record carrying an optional expiry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{GovernorError, Result};
use crate::models::MIB;

/// Largest payload placed in the RAM tier
pub const RAM_TIER_MAX_BYTES: u64 = MIB;
/// Largest payload placed on the primary disk cache
pub const DISK_TIER_MAX_BYTES: u64 = 50 * MIB;

const PROBE_FILE: &str = ".sbc-governor-write-test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Ram,
    Disk,
    External,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryMeta {
    pub key: String,
    pub size: u64,
    pub tier: CacheTier,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntryMeta {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Bytes held by each tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheUsage {
    pub ram: u64,
    pub disk: u64,
    pub external: u64,
}

/// File stem for a cache key. Bytes outside `[A-Za-z0-9-]` are written as
/// `_xx` (lowercase hex), so distinct keys never share a stem.
pub fn cache_file_name(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{:02x}", byte));
        }
    }
    stem
}

/// Known cache directories, in lookup priority order
#[derive(Debug, Clone)]
pub(crate) struct CacheRoots {
    pub ram: Option<PathBuf>,
    pub disk: PathBuf,
    pub external: Option<PathBuf>,
}

impl CacheRoots {
    pub fn location_for(&self, size: u64) -> (CacheTier, PathBuf) {
        if size < RAM_TIER_MAX_BYTES {
            if let Some(ram) = &self.ram {
                return (CacheTier::Ram, ram.clone());
            }
        } else if size > DISK_TIER_MAX_BYTES {
            if let Some(external) = &self.external {
                return (CacheTier::External, external.clone());
            }
        }
        (CacheTier::Disk, self.disk.clone())
    }

    pub fn ordered(&self) -> Vec<(CacheTier, &Path)> {
        let mut roots = Vec::with_capacity(3);
        if let Some(ram) = &self.ram {
            roots.push((CacheTier::Ram, ram.as_path()));
        }
        roots.push((CacheTier::Disk, self.disk.as_path()));
        if let Some(external) = &self.external {
            roots.push((CacheTier::External, external.as_path()));
        }
        roots
    }
}

pub(crate) async fn write_entry(
    root: &Path,
    tier: CacheTier,
    key: &str,
    data: &[u8],
    ttl: Option<Duration>,
) -> Result<PathBuf> {
    fs::create_dir_all(root)
        .await
        .map_err(|source| GovernorError::DirectoryCreation {
            path: root.to_path_buf(),
            source,
        })?;

    let stem = cache_file_name(key);
    let data_path = root.join(format!("{}.cache", stem));
    let meta_path = root.join(format!("{}.meta", stem));

    let now = Utc::now();
    let meta = CacheEntryMeta {
        key: key.to_string(),
        size: data.len() as u64,
        tier,
        created_at: now,
        expires_at: ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl),
    };

    fs::write(&data_path, data)
        .await
        .map_err(|e| GovernorError::io(&data_path, e))?;
    fs::write(&meta_path, serde_json::to_vec(&meta)?)
        .await
        .map_err(|e| GovernorError::io(&meta_path, e))?;

    Ok(data_path)
}

/// Outcome of looking up one key in one root
#[derive(Debug, PartialEq)]
pub(crate) enum Lookup {
    Hit(Vec<u8>),
    Expired,
    Absent,
}

pub(crate) async fn read_entry(root: &Path, key: &str) -> Lookup {
    let stem = cache_file_name(key);
    let data_path = root.join(format!("{}.cache", stem));
    let meta_path = root.join(format!("{}.meta", stem));

    let Ok(raw_meta) = fs::read(&meta_path).await else {
        return Lookup::Absent;
    };
    let meta: CacheEntryMeta = match serde_json::from_slice(&raw_meta) {
        Ok(meta) => meta,
        Err(e) => {
            warn!(path = %meta_path.display(), error = %e, "Corrupt cache metadata");
            return Lookup::Absent;
        }
    };
    if meta.key != key {
        return Lookup::Absent;
    }

    if meta.is_expired(Utc::now()) {
        let _ = fs::remove_file(&data_path).await;
        let _ = fs::remove_file(&meta_path).await;
        debug!(key = %key, "Removed expired cache entry");
        return Lookup::Expired;
    }

    match fs::read(&data_path).await {
        Ok(data) => Lookup::Hit(data),
        Err(_) => Lookup::Absent,
    }
}

/// First candidate where a test file can be written and removed
pub(crate) async fn detect_external(candidates: &[PathBuf]) -> Option<PathBuf> {
    for candidate in candidates {
        if !fs::metadata(candidate).await.is_ok_and(|m| m.is_dir()) {
            continue;
        }
        let probe = candidate.join(PROBE_FILE);
        if fs::write(&probe, b"probe").await.is_ok() && fs::remove_file(&probe).await.is_ok() {
            return Some(candidate.clone());
        }
        debug!(path = %candidate.display(), "External path not writable");
    }
    None
}

/// Total size of regular files under `root`
pub(crate) async fn dir_size(root: &Path) -> u64 {
    let mut total = 0;
    let mut pending = vec![root.to_path_buf()];
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
            } else if metadata.is_file() {
                total += metadata.len();
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn roots(root: &Path, ram: bool, external: bool) -> CacheRoots {
        CacheRoots {
            ram: ram.then(|| root.join("ram")),
            disk: root.join("disk"),
            external: external.then(|| root.join("external")),
        }
    }

    #[test]
    fn test_location_by_size() {
        let temp_dir = TempDir::new().unwrap();
        let all = roots(temp_dir.path(), true, true);

        assert_eq!(all.location_for(512).0, CacheTier::Ram);
        assert_eq!(all.location_for(MIB).0, CacheTier::Disk);
        assert_eq!(all.location_for(50 * MIB).0, CacheTier::Disk);
        assert_eq!(all.location_for(50 * MIB + 1).0, CacheTier::External);
    }

    #[test]
    fn test_location_falls_back_to_disk() {
        let temp_dir = TempDir::new().unwrap();
        let disk_only = roots(temp_dir.path(), false, false);

        assert_eq!(disk_only.location_for(10).0, CacheTier::Disk);
        assert_eq!(disk_only.location_for(80 * MIB).0, CacheTier::Disk);
        assert_eq!(disk_only.ordered().len(), 1);
    }

    #[test]
    fn test_cache_file_name_escapes() {
        assert_eq!(cache_file_name("models/tiny v1"), "models_2ftiny_20v1");
        assert_eq!(cache_file_name("abc-1_2"), "abc-1_5f2");
        assert_eq!(cache_file_name("greeting"), "greeting");

        let stems = ["user/1", "user.1", "user_1"].map(cache_file_name);
        assert_ne!(stems[0], stems[1]);
        assert_ne!(stems[0], stems[2]);
        assert_ne!(stems[1], stems[2]);
    }

    #[tokio::test]
    async fn test_write_then_read_entry() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("disk");

        write_entry(&root, CacheTier::Disk, "greeting", b"hello", None)
            .await
            .unwrap();

        assert_eq!(
            read_entry(&root, "greeting").await,
            Lookup::Hit(b"hello".to_vec())
        );
        assert_eq!(read_entry(&root, "other").await, Lookup::Absent);
    }

    #[tokio::test]
    async fn test_similar_keys_do_not_alias() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("disk");

        write_entry(&root, CacheTier::Disk, "user_1", b"alice", None)
            .await
            .unwrap();

        assert_eq!(read_entry(&root, "user/1").await, Lookup::Absent);
        assert_eq!(read_entry(&root, "user.1").await, Lookup::Absent);
        assert_eq!(
            read_entry(&root, "user_1").await,
            Lookup::Hit(b"alice".to_vec())
        );
    }

    #[tokio::test]
    async fn test_meta_for_another_key_is_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();

        write_entry(&root, CacheTier::Disk, "first", b"one", None)
            .await
            .unwrap();
        std::fs::copy(root.join("first.meta"), root.join("second.meta")).unwrap();
        std::fs::copy(root.join("first.cache"), root.join("second.cache")).unwrap();

        assert_eq!(read_entry(&root, "second").await, Lookup::Absent);
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();

        write_entry(&root, CacheTier::Disk, "stale", b"old", Some(Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(read_entry(&root, "stale").await, Lookup::Expired);
        assert!(!root.join("stale.cache").exists());
        assert!(!root.join("stale.meta").exists());
    }

    #[tokio::test]
    async fn test_detect_external_requires_writable_dir() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let usable = temp_dir.path().join("usb");
        std::fs::create_dir_all(&usable).unwrap();

        let found = detect_external(&[missing.clone(), usable.clone()]).await;
        assert_eq!(found, Some(usable.clone()));
        assert!(!usable.join(PROBE_FILE).exists());

        assert_eq!(detect_external(&[missing]).await, None);
    }

    #[tokio::test]
    async fn test_dir_size_is_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp_dir.path().join("top"), vec![0u8; 10]).unwrap();
        std::fs::write(nested.join("deep"), vec![0u8; 5]).unwrap();

        assert_eq!(dir_size(temp_dir.path()).await, 15);
    }
}
