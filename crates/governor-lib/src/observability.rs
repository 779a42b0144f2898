//! Observability infrastructure for the governor
//!
//! Provides:
//! - Prometheus metrics (sample latency, usage gauges, queue and storage counters)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for sampling latency (in seconds); a sample blocks for
/// the CPU window, so buckets start near 100ms
const SAMPLE_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 2.0, 5.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<GovernorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct GovernorMetricsInner {
    sample_latency_seconds: Histogram,
    memory_usage_percent: Gauge,
    cpu_usage_percent: Gauge,
    storage_usage_percent: Gauge,
    cpu_temperature_celsius: Gauge,
    pressure_level: IntGauge,
    queue_length: IntGauge,
    queue_active: IntGauge,
    queue_cancelled: IntCounterVec,
    queue_completed: IntCounter,
    log_bytes_removed: IntCounter,
    cleanup_files_removed: IntCounter,
    cache_requests: IntCounterVec,
    events_recorded: IntCounter,
    emergencies: IntCounter,
}

impl GovernorMetricsInner {
    fn new() -> Self {
        Self {
            sample_latency_seconds: register_histogram!(
                "sbc_governor_sample_latency_seconds",
                "Time spent taking one host metrics sample",
                SAMPLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sample_latency_seconds"),

            memory_usage_percent: register_gauge!(
                "sbc_governor_memory_usage_percent",
                "Memory in use as a percentage of total"
            )
            .expect("Failed to register memory_usage_percent"),

            cpu_usage_percent: register_gauge!(
                "sbc_governor_cpu_usage_percent",
                "CPU utilisation over the last sampling window"
            )
            .expect("Failed to register cpu_usage_percent"),

            storage_usage_percent: register_gauge!(
                "sbc_governor_storage_usage_percent",
                "Filesystem usage of the monitored mount"
            )
            .expect("Failed to register storage_usage_percent"),

            cpu_temperature_celsius: register_gauge!(
                "sbc_governor_cpu_temperature_celsius",
                "Temperature of the first thermal zone"
            )
            .expect("Failed to register cpu_temperature_celsius"),

            pressure_level: register_int_gauge!(
                "sbc_governor_memory_pressure_level",
                "Memory pressure level (0 normal, 1 gc, 2 critical)"
            )
            .expect("Failed to register memory_pressure_level"),

            queue_length: register_int_gauge!(
                "sbc_governor_queue_length",
                "Requests waiting in the admission queue"
            )
            .expect("Failed to register queue_length"),

            queue_active: register_int_gauge!(
                "sbc_governor_queue_active",
                "Requests currently running"
            )
            .expect("Failed to register queue_active"),

            queue_cancelled: register_int_counter_vec!(
                "sbc_governor_queue_cancelled_total",
                "Requests cancelled, by reason",
                &["reason"]
            )
            .expect("Failed to register queue_cancelled_total"),

            queue_completed: register_int_counter!(
                "sbc_governor_queue_completed_total",
                "Requests that ran to completion"
            )
            .expect("Failed to register queue_completed_total"),

            log_bytes_removed: register_int_counter!(
                "sbc_governor_log_bytes_removed_total",
                "Bytes of log files deleted by rotation"
            )
            .expect("Failed to register log_bytes_removed_total"),

            cleanup_files_removed: register_int_counter!(
                "sbc_governor_cleanup_files_removed_total",
                "Cache and temp files removed by cleanup"
            )
            .expect("Failed to register cleanup_files_removed_total"),

            cache_requests: register_int_counter_vec!(
                "sbc_governor_cache_requests_total",
                "Tiered cache lookups, by result",
                &["result"]
            )
            .expect("Failed to register cache_requests_total"),

            events_recorded: register_int_counter!(
                "sbc_governor_events_recorded_total",
                "System events appended to the history"
            )
            .expect("Failed to register events_recorded_total"),

            emergencies: register_int_counter!(
                "sbc_governor_emergencies_total",
                "System emergencies raised"
            )
            .expect("Failed to register emergencies_total"),
        }
    }
}

/// Governor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct GovernorMetrics {
    _private: (),
}

impl Default for GovernorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GovernorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(GovernorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &GovernorMetricsInner {
        GLOBAL_METRICS.get_or_init(GovernorMetricsInner::new)
    }

    pub fn observe_sample_latency(&self, duration_secs: f64) {
        self.inner().sample_latency_seconds.observe(duration_secs);
    }

    pub fn set_usage(&self, memory_percent: f64, cpu_percent: f64, storage_percent: f64) {
        let inner = self.inner();
        inner.memory_usage_percent.set(memory_percent);
        inner.cpu_usage_percent.set(cpu_percent);
        inner.storage_usage_percent.set(storage_percent);
    }

    pub fn set_temperature(&self, celsius: f64) {
        self.inner().cpu_temperature_celsius.set(celsius);
    }

    pub fn set_pressure_level(&self, level: i64) {
        self.inner().pressure_level.set(level);
    }

    pub fn set_queue_depth(&self, queued: i64, active: i64) {
        self.inner().queue_length.set(queued);
        self.inner().queue_active.set(active);
    }

    pub fn inc_queue_cancelled(&self, reason: &str) {
        self.inner()
            .queue_cancelled
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_queue_completed(&self) {
        self.inner().queue_completed.inc();
    }

    pub fn add_log_bytes_removed(&self, bytes: u64) {
        self.inner().log_bytes_removed.inc_by(bytes);
    }

    pub fn add_cleanup_files_removed(&self, files: u64) {
        self.inner().cleanup_files_removed.inc_by(files);
    }

    pub fn inc_cache_hit(&self) {
        self.inner().cache_requests.with_label_values(&["hit"]).inc();
    }

    pub fn inc_cache_miss(&self) {
        self.inner().cache_requests.with_label_values(&["miss"]).inc();
    }

    pub fn inc_events_recorded(&self) {
        self.inner().events_recorded.inc();
    }

    pub fn inc_emergencies(&self) {
        self.inner().emergencies.inc();
    }
}

/// Structured logger for governor events
///
/// Emits stable, JSON-friendly records for lifecycle changes, pressure
/// transitions, storage work and emergencies.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, memory_limit_bytes: u64) {
        info!(
            event = "governor_started",
            node = %self.node_name,
            governor_version = %version,
            memory_limit_bytes = memory_limit_bytes,
            "Resource governor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "governor_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Resource governor shutting down"
        );
    }

    pub fn log_pressure(&self, resource: &str, level: &str, usage_percent: f64) {
        match level {
            "critical" => warn!(
                event = "pressure_changed",
                node = %self.node_name,
                resource = %resource,
                level = %level,
                usage_percent = usage_percent,
                "Resource pressure critical"
            ),
            _ => info!(
                event = "pressure_changed",
                node = %self.node_name,
                resource = %resource,
                level = %level,
                usage_percent = usage_percent,
                "Resource pressure changed"
            ),
        }
    }

    pub fn log_storage_optimization(
        &self,
        removed_log_files: usize,
        removed_log_bytes: u64,
        cleaned_files: u64,
        cleaned_bytes: u64,
    ) {
        info!(
            event = "storage_optimized",
            node = %self.node_name,
            removed_log_files = removed_log_files,
            removed_log_bytes = removed_log_bytes,
            cleaned_files = cleaned_files,
            cleaned_bytes = cleaned_bytes,
            "Storage optimization pass finished"
        );
    }

    pub fn log_request_cancelled(&self, request_id: &str, reason: &str) {
        info!(
            event = "request_cancelled",
            node = %self.node_name,
            request_id = %request_id,
            reason = %reason,
            "Queued request cancelled"
        );
    }

    pub fn log_emergency(&self, reason: &str, temperature: f64) {
        error!(
            event = "system_emergency",
            node = %self.node_name,
            reason = %reason,
            temperature = temperature,
            "System emergency, halting monitoring and forcing cleanup"
        );
    }
}
