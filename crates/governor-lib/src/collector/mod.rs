//! Host metrics sampling and pressure classification
//!
//! This module samples CPU, memory, storage and network state from the
//! kernel's text interfaces, classifies memory pressure with hysteresis and
//! publishes threshold crossings as [`ResourceEvent`]s. Every source is read
//! independently so one unreadable file only degrades that figure.

mod classifier;
mod network;
mod procfs;
mod r#loop;
mod sampler;
mod scaling;


pub use classifier::{hardware_memory_limit, PressureClassifier};
pub use network::{parse_ping_time, FixedLatency, LatencyProbe, PingProbe};
pub use procfs::{
    cpu_usage_between, parse_cpu_times, parse_meminfo, read_temperature, CpuTimes, HostPaths,
    MemInfo,
};
pub use sampler::{CollectorConfig, MetricsCollector, MetricsCollectorBuilder};
pub use scaling::{reduction_level, GcReport, MemoryReclaimer};

use serde::{Deserialize, Serialize};

use crate::models::{PressureLevel, ReductionLevel, SystemMetrics};

/// Events published by the metrics collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ResourceEvent {
    /// Fresh sample, published before threshold evaluation
    Metrics(Box<SystemMetrics>),
    /// Memory pressure level transition; `usage` in percent
    MemoryPressure { level: PressureLevel, usage: f64 },
    CpuPressure { usage: f64 },
    StoragePressure { usage: f64 },
    NetworkPressure { latency: f64 },
    /// Used memory is above the hardware-tier limit
    MemoryLimitExceeded { used: u64, limit: u64 },
    GarbageCollectionTriggered {
        memory_freed: u64,
        #[serde(rename = "beforeGC")]
        before_gc: u64,
        #[serde(rename = "afterGC")]
        after_gc: u64,
    },
    ServiceReductionRequested { reason: String, level: ReductionLevel },
    ServiceRestorationRequested { reason: String },
    /// Consumers should defer CPU-heavy work
    CpuReductionRequested { usage: f64 },
    /// Consumers should release storage
    StorageCleanupRequested { usage: f64 },
}

impl ResourceEvent {
    /// Stable snake_case name used in logs and audit records
    pub fn name(&self) -> &'static str {
        match self {
            ResourceEvent::Metrics(_) => "metrics",
            ResourceEvent::MemoryPressure { .. } => "memory_pressure",
            ResourceEvent::CpuPressure { .. } => "cpu_pressure",
            ResourceEvent::StoragePressure { .. } => "storage_pressure",
            ResourceEvent::NetworkPressure { .. } => "network_pressure",
            ResourceEvent::MemoryLimitExceeded { .. } => "memory_limit_exceeded",
            ResourceEvent::GarbageCollectionTriggered { .. } => "garbage_collection_triggered",
            ResourceEvent::ServiceReductionRequested { .. } => "service_reduction_requested",
            ResourceEvent::ServiceRestorationRequested { .. } => "service_restoration_requested",
            ResourceEvent::CpuReductionRequested { .. } => "cpu_reduction_requested",
            ResourceEvent::StorageCleanupRequested { .. } => "storage_cleanup_requested",
        }
    }
}
