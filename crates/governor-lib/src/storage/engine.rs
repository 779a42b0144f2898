use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::cache::{self, CacheRoots, CacheTier, CacheUsage, Lookup};
use super::cleanup::{collect_expired, remove_oldest_first, CleanupMode, CleanupReport};
use super::rotation::{self, RotationOutcome};
use super::tmpfs::{self, TmpfsMount};
use super::wear::{WearLeveler, WriteStatistics};
use super::{StorageConfig, StorageEvent, CLEANUP_USAGE_THRESHOLD};
use crate::error::{GovernorError, Result};
use crate::fsprobe::{FilesystemProbe, FsUsage};
use crate::observability::GovernorMetrics;

const RAM_CACHE_SUBDIR: &str = "cache";
const EXTERNAL_CACHE_SUBDIR: &str = "sbc-governor-cache";

/// Result of a full optimization pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub rotation: RotationOutcome,
    pub cleanup: CleanupReport,
}

/// Snapshot returned by `storage_metrics`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetrics {
    pub filesystem: Option<FsUsage>,
    pub usage_percent: Option<f64>,
    pub log_total_size: u64,
    pub log_file_count: usize,
    pub tmpfs: Vec<TmpfsMount>,
    pub external_path: Option<PathBuf>,
    pub cache: CacheUsage,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub writes: WriteStatistics,
}

/// Storage optimization engine
pub struct StorageEngine {
    config: StorageConfig,
    fs_probe: Arc<dyn FilesystemProbe>,
    ram_total: u64,
    wear: Mutex<WearLeveler>,
    tmpfs: RwLock<Vec<TmpfsMount>>,
    external: RwLock<Option<PathBuf>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    monitoring: AtomicBool,
    events_tx: broadcast::Sender<StorageEvent>,
    metrics: GovernorMetrics,
}

impl StorageEngine {
    /// Create the engine. `ram_total` sizes the tmpfs mounts.
    pub fn new(
        config: StorageConfig,
        fs_probe: Arc<dyn FilesystemProbe>,
        ram_total: u64,
    ) -> Result<Self> {
        config.validate().map_err(GovernorError::Config)?;

        let mut wear = WearLeveler::new(
            config.wear_leveling_enabled,
            config.wear_leveling_paths.clone(),
            config.default_write_path.clone(),
        );
        if let Some(state_path) = &config.state_path {
            wear.load(state_path);
        }

        let (events_tx, _) = broadcast::channel(config.event_buffer.max(16));

        Ok(Self {
            fs_probe,
            ram_total,
            wear: Mutex::new(wear),
            tmpfs: RwLock::new(Vec::new()),
            external: RwLock::new(None),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            monitoring: AtomicBool::new(false),
            events_tx,
            metrics: GovernorMetrics::new(),
            config,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events_tx.subscribe()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn publish(&self, event: StorageEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Provision tmpfs mounts and look for external media
    pub async fn initialize(&self) {
        let size = tmpfs::tmpfs_size(self.ram_total);
        let mut mounts = Vec::with_capacity(self.config.tmpfs_mounts.len());

        for path in &self.config.tmpfs_mounts {
            let (mount, fallback) = tmpfs::provision(
                path,
                size,
                self.config.tmpfs_enabled,
                &self.config.mounts_file,
            )
            .await;
            match fallback {
                Some(reason) => self.publish(StorageEvent::TmpfsFallback {
                    path: path.clone(),
                    reason,
                }),
                None => self.publish(StorageEvent::TmpfsMounted {
                    path: path.clone(),
                    size_bytes: mount.size_bytes,
                }),
            }
            mounts.push(mount);
        }
        *self.tmpfs.write().await = mounts;

        let external = cache::detect_external(&self.config.external_paths).await;
        if let Some(path) = &external {
            info!(path = %path.display(), "External storage detected");
            self.publish(StorageEvent::ExternalStorageDetected { path: path.clone() });
        }
        *self.external.write().await = external;
    }

    /// Filesystem usage of the monitored path, off the async workers
    pub async fn filesystem_usage(&self) -> Option<FsUsage> {
        let probe = Arc::clone(&self.fs_probe);
        let path = self.config.monitored_path.clone();
        tokio::task::spawn_blocking(move || probe.usage(&path))
            .await
            .ok()
            .flatten()
    }

    pub async fn usage_percent(&self) -> Option<f64> {
        self.filesystem_usage().await.map(|u| u.usage_percent())
    }

    pub async fn rotate_logs(&self) -> RotationOutcome {
        let outcome =
            rotation::rotate_logs(&self.config.log_dirs, self.config.max_log_size_bytes).await;
        self.metrics.add_log_bytes_removed(outcome.removed_size());
        self.publish(outcome.to_event());
        outcome
    }

    /// Record one write and advance the wear-leveling cursor
    pub async fn optimize_writes(&self) -> Result<()> {
        self.wear.lock().await.optimize_writes().await
    }

    /// Directory the next write should land in
    pub async fn next_write_path(&self) -> PathBuf {
        self.wear.lock().await.next_write_path().to_path_buf()
    }

    pub async fn write_statistics(&self) -> WriteStatistics {
        self.wear.lock().await.statistics()
    }

    async fn tmpfs_dirs(&self) -> Vec<PathBuf> {
        self.tmpfs.read().await.iter().map(|m| m.path.clone()).collect()
    }

    async fn cache_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.config.cache_dirs.clone();
        if let Some(external) = self.external.read().await.as_ref() {
            dirs.push(external.join(EXTERNAL_CACHE_SUBDIR));
        }
        dirs
    }

    pub async fn cleanup(&self, mode: CleanupMode) -> CleanupReport {
        let before = self.usage_percent().await.unwrap_or(0.0);

        if mode == CleanupMode::Normal && before < CLEANUP_USAGE_THRESHOLD {
            debug!(usage_percent = before, "Storage usage below cleanup threshold");
            self.publish(StorageEvent::CleanupSkipped {
                usage_percentage: before,
            });
            return CleanupReport::skipped(mode, before);
        }

        let (cache_age, temp_age) = mode.max_ages();
        let now = SystemTime::now();
        let mut files = collect_expired(&self.cache_dirs().await, cache_age, now).await;
        files.extend(collect_expired(&self.tmpfs_dirs().await, temp_age, now).await);
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);

        let (cleaned_files, cleaned_size) = remove_oldest_first(files).await;
        self.metrics.add_cleanup_files_removed(cleaned_files);

        let mut after = self.usage_percent().await.unwrap_or(before);
        let rotation = if after >= CLEANUP_USAGE_THRESHOLD || mode == CleanupMode::Aggressive {
            let outcome = self.rotate_logs().await;
            after = self.usage_percent().await.unwrap_or(after);
            Some(outcome)
        } else {
            None
        };

        info!(
            mode = ?mode,
            cleaned_files,
            cleaned_size,
            usage_before = before,
            usage_after = after,
            "Storage cleanup complete"
        );
        self.publish(StorageEvent::CleanupCompleted {
            cleaned_files,
            cleaned_size,
            usage_percentage_before: before,
            usage_percentage_after: after,
        });

        CleanupReport {
            mode,
            performed: true,
            cleaned_files,
            cleaned_size,
            usage_percentage_before: before,
            usage_percentage_after: after,
            rotation,
        }
    }

    /// Log rotation followed by a normal cleanup
    pub async fn optimize(&self) -> OptimizationReport {
        let rotation = self.rotate_logs().await;
        let cleanup = self.cleanup(CleanupMode::Normal).await;
        OptimizationReport { rotation, cleanup }
    }

    async fn cache_roots(&self) -> CacheRoots {
        let ram = self
            .tmpfs
            .read()
            .await
            .iter()
            .find(|m| m.ram_backed)
            .map(|m| m.path.join(RAM_CACHE_SUBDIR));
        let external = self
            .external
            .read()
            .await
            .as_ref()
            .map(|p| p.join(EXTERNAL_CACHE_SUBDIR));
        CacheRoots {
            ram,
            disk: self.config.cache_dirs[0].clone(),
            external,
        }
    }

    /// Tier and directory a payload of `size` bytes would be cached in
    pub async fn cache_location_for(&self, size: u64) -> (CacheTier, PathBuf) {
        self.cache_roots().await.location_for(size)
    }

    pub async fn cache_put(
        &self,
        key: &str,
        data: &[u8],
        ttl: Option<Duration>,
    ) -> Result<CacheTier> {
        let (tier, root) = self.cache_location_for(data.len() as u64).await;
        let path = cache::write_entry(&root, tier, key, data, ttl).await?;
        debug!(key = %key, tier = ?tier, path = %path.display(), "Cached entry");
        Ok(tier)
    }

    /// Look `key` up in RAM, disk and external order
    pub async fn cache_get(&self, key: &str) -> Option<Vec<u8>> {
        let roots = self.cache_roots().await;
        for (tier, root) in roots.ordered() {
            match cache::read_entry(root, key).await {
                Lookup::Hit(data) => {
                    debug!(key = %key, tier = ?tier, "Cache hit");
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    self.metrics.inc_cache_hit();
                    return Some(data);
                }
                Lookup::Expired => break,
                Lookup::Absent => continue,
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_cache_miss();
        None
    }

    pub async fn storage_metrics(&self) -> StorageMetrics {
        let filesystem = self.filesystem_usage().await;
        let logs = rotation::scan_log_files(&self.config.log_dirs).await;
        let roots = self.cache_roots().await;

        let mut cache = CacheUsage::default();
        for (tier, root) in roots.ordered() {
            let size = cache::dir_size(root).await;
            match tier {
                CacheTier::Ram => cache.ram = size,
                CacheTier::Disk => cache.disk = size,
                CacheTier::External => cache.external = size,
            }
        }

        StorageMetrics {
            filesystem,
            usage_percent: filesystem.map(|u| u.usage_percent()),
            log_total_size: logs.iter().map(|f| f.size_bytes).sum(),
            log_file_count: logs.len(),
            tmpfs: self.tmpfs.read().await.clone(),
            external_path: self.external.read().await.clone(),
            cache,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            writes: self.write_statistics().await,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// Periodic optimization until `shutdown` fires
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_millis(self.config.monitor_interval_ms.max(1));
        info!(interval_ms = period.as_millis() as u64, "Starting storage monitoring");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.monitoring.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.optimize().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down storage monitoring");
                    break;
                }
            }
        }

        self.monitoring.store(false, Ordering::SeqCst);
    }

    /// Flush write statistics if persistence is configured
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(state_path) = &self.config.state_path {
            if let Err(e) = self.wear.lock().await.save(state_path) {
                warn!(path = %state_path.display(), error = %e, "Failed to persist write statistics");
                return Err(e);
            }
        }
        Ok(())
    }
}
