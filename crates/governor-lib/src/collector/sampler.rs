//! Metrics collector: sampling, caching and threshold evaluation

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::classifier::{hardware_memory_limit, PressureClassifier};
use super::network::{LatencyProbe, PingProbe};
use super::procfs::{self, HostPaths};
use super::scaling::{adaptive_response, GcReport, MemoryReclaimer, ScalingAction};
use super::ResourceEvent;
use crate::error::{GovernorError, Result};
use crate::fsprobe::{FilesystemProbe, SysinfoProbe};
use crate::models::{
    CpuMetrics, DiskMetrics, MemoryMetrics, NetworkMetrics, PressureLevel, ResourceThresholds,
    SystemMetrics, GIB,
};
use crate::observability::GovernorMetrics;

/// Configuration for the metrics collector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Sampling interval in milliseconds
    pub interval_ms: u64,
    /// Interval used while an aggressive service reduction is in effect
    pub slow_interval_ms: u64,
    /// Window between the two CPU counter reads
    pub cpu_sample_window_ms: u64,
    /// React to own pressure events (reclaim, reduction requests)
    pub adaptive_scaling: bool,
    /// Installed RAM in bytes; read from the host when unset
    pub hardware_total_memory: Option<u64>,
    /// Host used for the round-trip latency probe
    pub probe_host: String,
    /// Mount whose usage is reported as storage
    pub monitored_path: PathBuf,
    pub host_paths: HostPaths,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            slow_interval_ms: 30_000,
            cpu_sample_window_ms: 100,
            adaptive_scaling: false,
            hardware_total_memory: None,
            probe_host: "8.8.8.8".to_string(),
            monitored_path: crate::fsprobe::default_monitored_path(),
            host_paths: HostPaths::default(),
            event_buffer: 256,
        }
    }
}

/// Samples host state and classifies pressure
pub struct MetricsCollector {
    config: CollectorConfig,
    fs_probe: Arc<dyn FilesystemProbe>,
    latency_probe: Arc<dyn LatencyProbe>,
    hardware_total: u64,
    memory_limit: u64,
    default_thresholds: ResourceThresholds,
    classifier: Mutex<PressureClassifier>,
    latest: RwLock<Option<SystemMetrics>>,
    reclaimers: RwLock<Vec<Arc<dyn MemoryReclaimer>>>,
    events_tx: broadcast::Sender<ResourceEvent>,
    interval_ms: AtomicU64,
    polling: AtomicBool,
    samples_taken: AtomicU64,
    last_sample: std::sync::Mutex<Option<Instant>>,
    metrics: GovernorMetrics,
}

impl MetricsCollector {
    pub fn builder() -> MetricsCollectorBuilder {
        MetricsCollectorBuilder::new()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.events_tx.subscribe()
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn hardware_total_memory(&self) -> u64 {
        self.hardware_total
    }

    /// Hardware-tier memory limit, fixed at construction
    pub fn memory_limit(&self) -> u64 {
        self.memory_limit
    }

    pub fn default_thresholds(&self) -> ResourceThresholds {
        self.default_thresholds
    }

    pub async fn thresholds(&self) -> ResourceThresholds {
        self.classifier.lock().await.thresholds()
    }

    pub async fn set_thresholds(&self, thresholds: ResourceThresholds) {
        debug!(
            memory_gc = thresholds.memory_gc,
            cpu_critical = thresholds.cpu_critical,
            "Updating pressure thresholds"
        );
        self.classifier.lock().await.set_thresholds(thresholds);
    }

    pub async fn restore_thresholds(&self) {
        self.set_thresholds(self.default_thresholds).await;
    }

    pub async fn pressure_level(&self) -> PressureLevel {
        self.classifier.lock().await.level()
    }

    pub async fn is_pressure_active(&self) -> bool {
        self.classifier.lock().await.is_pressure_active()
    }

    pub async fn register_reclaimer(&self, reclaimer: Arc<dyn MemoryReclaimer>) {
        info!(reclaimer = %reclaimer.name(), "Registered memory reclaimer");
        self.reclaimers.write().await.push(reclaimer);
    }

    /// Most recent sample, if any has been taken
    pub async fn latest(&self) -> Option<SystemMetrics> {
        self.latest.read().await.clone()
    }

    /// Latest cached sample; samples once if none exists yet
    pub async fn get_metrics(&self) -> SystemMetrics {
        if let Some(metrics) = self.latest().await {
            return metrics;
        }
        let metrics = self.sample().await;
        *self.latest.write().await = Some(metrics.clone());
        metrics
    }

    /// Take one complete sample. Never fails; unreadable sources fall back
    /// to their documented defaults.
    pub async fn sample(&self) -> SystemMetrics {
        let (cpu, memory, storage, network) = tokio::join!(
            self.sample_cpu(),
            self.sample_memory(),
            self.sample_storage(),
            self.sample_network()
        );

        SystemMetrics {
            timestamp: Utc::now(),
            cpu,
            memory,
            storage,
            network,
        }
    }

    /// Sample, publish, and evaluate thresholds
    pub async fn tick(&self) -> SystemMetrics {
        let start = Instant::now();
        let metrics = self.sample().await;
        self.metrics
            .observe_sample_latency(start.elapsed().as_secs_f64());
        self.metrics.set_usage(
            metrics.memory.usage_ratio() * 100.0,
            metrics.cpu.usage,
            metrics.storage.usage_ratio() * 100.0,
        );
        self.metrics.set_temperature(metrics.cpu.temperature);

        *self.latest.write().await = Some(metrics.clone());
        if let Ok(mut last) = self.last_sample.lock() {
            *last = Some(Instant::now());
        }
        self.samples_taken.fetch_add(1, Ordering::Relaxed);
        self.publish(ResourceEvent::Metrics(Box::new(metrics.clone())));

        // Thresholds are evaluated only once the full sample exists
        let (events, level) = {
            let mut classifier = self.classifier.lock().await;
            let events = classifier.evaluate(&metrics, self.memory_limit);
            (events, classifier.level())
        };
        self.metrics.set_pressure_level(level as i64);

        for event in events {
            self.publish(event.clone());
            if self.config.adaptive_scaling {
                self.adapt(&event, &metrics).await;
            }
        }

        metrics
    }

    /// Run every registered reclaimer and report the measured change
    pub async fn garbage_collect(&self) -> GcReport {
        let before = self.current_memory_used().await;
        let reclaimers = self.reclaimers.read().await.clone();

        let mut reported = 0u64;
        for reclaimer in &reclaimers {
            let freed = reclaimer.reclaim().await;
            debug!(reclaimer = %reclaimer.name(), freed_bytes = freed, "Reclaimer finished");
            reported += freed;
        }

        let after = self.current_memory_used().await;
        let report = GcReport {
            before,
            after,
            freed: before.saturating_sub(after),
            reported,
            reclaimers: reclaimers.len(),
        };

        info!(
            before_bytes = before,
            after_bytes = after,
            freed_bytes = report.freed,
            "Memory reclamation pass complete"
        );
        self.publish(ResourceEvent::GarbageCollectionTriggered {
            memory_freed: report.freed,
            before_gc: before,
            after_gc: after,
        });
        report
    }

    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed).max(1))
    }

    pub fn set_interval(&self, interval: Duration) {
        info!(interval_ms = interval.as_millis() as u64, "Changing sampling interval");
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// Switch to the slow interval used under aggressive reduction
    pub fn slow_down(&self) {
        self.set_interval(Duration::from_millis(self.config.slow_interval_ms));
    }

    pub fn reset_interval(&self) {
        self.set_interval(Duration::from_millis(self.config.interval_ms));
    }

    pub fn stop_polling(&self) {
        if self.polling.swap(false, Ordering::SeqCst) {
            warn!("Metrics polling stopped");
        }
    }

    pub fn resume_polling(&self) {
        if !self.polling.swap(true, Ordering::SeqCst) {
            info!("Metrics polling resumed");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    pub fn samples_taken(&self) -> u64 {
        self.samples_taken.load(Ordering::Relaxed)
    }

    /// Time since the last completed tick
    pub fn last_sample_age(&self) -> Option<Duration> {
        self.last_sample
            .lock()
            .ok()
            .and_then(|last| last.map(|at| at.elapsed()))
    }

    fn publish(&self, event: ResourceEvent) {
        // No subscribers is not an error
        let _ = self.events_tx.send(event);
    }

    async fn adapt(&self, event: &ResourceEvent, metrics: &SystemMetrics) {
        for action in adaptive_response(event, &metrics.memory, self.memory_limit) {
            match action {
                ScalingAction::CollectGarbage => {
                    self.garbage_collect().await;
                }
                ScalingAction::Publish(reaction) => {
                    debug!(event = reaction.name(), "Adaptive scaling response");
                    self.publish(reaction);
                }
            }
        }
    }

    async fn current_memory_used(&self) -> u64 {
        match procfs::read_meminfo(&self.config.host_paths).await {
            Some(info) => info.total.saturating_sub(info.available),
            None => self
                .latest()
                .await
                .map(|m| m.memory.used)
                .unwrap_or_default(),
        }
    }

    async fn sample_cpu(&self) -> CpuMetrics {
        let paths = &self.config.host_paths;
        let mut cpu = CpuMetrics::default();

        if let Some(before) = procfs::read_cpu_times(paths).await {
            tokio::time::sleep(Duration::from_millis(self.config.cpu_sample_window_ms)).await;
            if let Some(after) = procfs::read_cpu_times(paths).await {
                cpu.usage = procfs::cpu_usage_between(before, after);
            }
        }

        if let Some(temperature) = procfs::read_temperature(paths).await {
            cpu.temperature = temperature;
        }

        if let Some((current, max)) = procfs::read_frequency(paths).await {
            cpu.frequency = current;
            cpu.throttled = (current as f64) < max as f64 * 0.9;
        }

        cpu
    }

    async fn sample_memory(&self) -> MemoryMetrics {
        match procfs::read_meminfo(&self.config.host_paths).await {
            Some(info) => MemoryMetrics {
                total: info.total,
                used: info.total.saturating_sub(info.available),
                available: info.available,
                swap_used: info.swap_total.saturating_sub(info.swap_free),
            },
            None => MemoryMetrics::unavailable(self.hardware_total),
        }
    }

    async fn sample_storage(&self) -> DiskMetrics {
        let probe = Arc::clone(&self.fs_probe);
        let path = self.config.monitored_path.clone();
        let usage = tokio::task::spawn_blocking(move || probe.usage(&path))
            .await
            .ok()
            .flatten();

        let mut storage = match usage {
            Some(usage) => DiskMetrics {
                total: usage.total,
                used: usage.used,
                available: usage.available,
                write_count: 0,
            },
            None => DiskMetrics::default(),
        };
        if let Some(writes) = procfs::read_write_count(&self.config.host_paths).await {
            storage.write_count = writes;
        }
        storage
    }

    async fn sample_network(&self) -> NetworkMetrics {
        let paths = &self.config.host_paths;
        let mut network = NetworkMetrics::default();

        if let Some(iface) = procfs::read_default_interface(paths).await {
            network.interface_kind = procfs::interface_kind(paths, &iface).await;
            if let Some(speed) = procfs::read_interface_speed(paths, &iface).await {
                network.bandwidth_mbps = speed;
            }
            if let Some(lost) = procfs::read_packets_lost(paths, &iface).await {
                network.packets_lost = lost;
            }
        }

        if let Some(latency) = self
            .latency_probe
            .round_trip(&self.config.probe_host)
            .await
        {
            network.latency_ms = latency;
        }

        network
    }
}

/// Builder for the metrics collector
pub struct MetricsCollectorBuilder {
    config: CollectorConfig,
    thresholds: ResourceThresholds,
    fs_probe: Option<Arc<dyn FilesystemProbe>>,
    latency_probe: Option<Arc<dyn LatencyProbe>>,
}

impl MetricsCollectorBuilder {
    pub fn new() -> Self {
        Self {
            config: CollectorConfig::default(),
            thresholds: ResourceThresholds::default(),
            fs_probe: None,
            latency_probe: None,
        }
    }

    pub fn config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn thresholds(mut self, thresholds: ResourceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn filesystem_probe(mut self, probe: Arc<dyn FilesystemProbe>) -> Self {
        self.fs_probe = Some(probe);
        self
    }

    pub fn latency_probe(mut self, probe: Arc<dyn LatencyProbe>) -> Self {
        self.latency_probe = Some(probe);
        self
    }

    pub fn build(self) -> Result<MetricsCollector> {
        self.thresholds.validate().map_err(GovernorError::Config)?;

        let hardware_total = self
            .config
            .hardware_total_memory
            .or_else(|| procfs::read_total_memory_sync(&self.config.host_paths))
            .unwrap_or(GIB);
        let memory_limit = hardware_memory_limit(hardware_total);
        let (events_tx, _) = broadcast::channel(self.config.event_buffer.max(16));

        Ok(MetricsCollector {
            interval_ms: AtomicU64::new(self.config.interval_ms),
            fs_probe: self.fs_probe.unwrap_or_else(|| Arc::new(SysinfoProbe)),
            latency_probe: self.latency_probe.unwrap_or_else(|| Arc::new(PingProbe)),
            hardware_total,
            memory_limit,
            default_thresholds: self.thresholds,
            classifier: Mutex::new(PressureClassifier::new(self.thresholds)),
            latest: RwLock::new(None),
            reclaimers: RwLock::new(Vec::new()),
            events_tx,
            polling: AtomicBool::new(true),
            samples_taken: AtomicU64::new(0),
            last_sample: std::sync::Mutex::new(None),
            metrics: GovernorMetrics::new(),
            config: self.config,
        })
    }
}

impl Default for MetricsCollectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
