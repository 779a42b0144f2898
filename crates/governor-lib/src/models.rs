//! Core data models for the resource governor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// One sampling snapshot of the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub storage: DiskMetrics,
    pub network: NetworkMetrics,
}

impl SystemMetrics {
    /// True when every field except the timestamp matches
    pub fn same_readings(&self, other: &SystemMetrics) -> bool {
        self.cpu == other.cpu
            && self.memory == other.memory
            && self.storage == other.storage
            && self.network == other.network
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetrics {
    /// Utilisation in percent, clamped to [0, 100]
    pub usage: f64,
    /// Degrees Celsius
    pub temperature: f64,
    /// Current frequency in MHz
    pub frequency: u32,
    pub throttled: bool,
}

impl Default for CpuMetrics {
    fn default() -> Self {
        Self {
            usage: 0.0,
            temperature: 45.0,
            frequency: 1500,
            throttled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub swap_used: u64,
}

impl MemoryMetrics {
    /// Fallback used when the memory-info source cannot be read
    pub fn unavailable(hardware_total: u64) -> Self {
        Self {
            total: hardware_total,
            used: 0,
            available: hardware_total,
            swap_used: 0,
        }
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskMetrics {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    /// Completed writes across physical block devices
    pub write_count: u64,
}

impl Default for DiskMetrics {
    fn default() -> Self {
        Self {
            total: 32 * GIB,
            used: 0,
            available: 32 * GIB,
            write_count: 0,
        }
    }
}

impl DiskMetrics {
    pub fn usage_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Wifi,
    Ethernet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    pub interface_kind: InterfaceKind,
    pub bandwidth_mbps: u32,
    pub latency_ms: f64,
    pub packets_lost: u64,
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self {
            interface_kind: InterfaceKind::Wifi,
            bandwidth_mbps: 100,
            latency_ms: 10.0,
            packets_lost: 0,
        }
    }
}

/// Policy knobs for pressure classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceThresholds {
    /// Memory ratio at which reclamation starts
    pub memory_gc: f64,
    /// Memory ratio considered critical
    pub memory_critical: f64,
    pub cpu_critical: f64,
    pub storage_cleanup: f64,
    pub network_latency_ms: f64,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            memory_gc: 0.80,
            memory_critical: 0.90,
            cpu_critical: 0.80,
            storage_cleanup: 0.85,
            network_latency_ms: 500.0,
        }
    }
}

impl ResourceThresholds {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("memory_gc", self.memory_gc),
            ("memory_critical", self.memory_critical),
            ("cpu_critical", self.cpu_critical),
            ("storage_cleanup", self.storage_cleanup),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within 0..=1, got {}", name, value));
            }
        }
        if self.memory_gc >= self.memory_critical {
            return Err(format!(
                "memory_gc ({}) must be below memory_critical ({})",
                self.memory_gc, self.memory_critical
            ));
        }
        if self.network_latency_ms <= 0.0 {
            return Err("network_latency_ms must be positive".to_string());
        }
        Ok(())
    }

    /// Lower the CPU and GC thresholds by `reduction` (0..1).
    ///
    /// Never drops below half of the original value.
    pub fn scaled_down(&self, reduction: f64) -> Self {
        let factor = (1.0 - reduction.clamp(0.0, 1.0)).max(0.5);
        Self {
            memory_gc: self.memory_gc * factor,
            cpu_critical: self.cpu_critical * factor,
            ..*self
        }
    }
}

/// Memory pressure state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Normal,
    Gc,
    Critical,
}

impl PressureLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Gc => "gc",
            PressureLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How hard consumers are asked to shed work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionLevel {
    Light,
    Moderate,
    Aggressive,
}

/// Result of an administrative command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
