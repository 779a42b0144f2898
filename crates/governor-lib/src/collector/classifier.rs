//! Pressure classification with memory hysteresis
//!
//! Memory pressure moves between `normal`, `gc` and `critical` and only
//! reports transitions. CPU, storage and network pressure have no state and
//! fire on every sample that is over its threshold.

use super::ResourceEvent;
use crate::models::{PressureLevel, ResourceThresholds, SystemMetrics, GIB, MIB};

/// Cap on memory the service may use, derived from the installed RAM tier
pub fn hardware_memory_limit(total: u64) -> u64 {
    let limit = if total <= GIB {
        512 * MIB
    } else if total <= 2 * GIB {
        GIB
    } else {
        2 * GIB
    };
    limit.min(total)
}

/// Memory pressure state machine plus stateless threshold checks
#[derive(Debug, Clone)]
pub struct PressureClassifier {
    thresholds: ResourceThresholds,
    level: PressureLevel,
    pressure_active: bool,
}

impl PressureClassifier {
    pub fn new(thresholds: ResourceThresholds) -> Self {
        Self {
            thresholds,
            level: PressureLevel::Normal,
            pressure_active: false,
        }
    }

    pub fn thresholds(&self) -> ResourceThresholds {
        self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: ResourceThresholds) {
        self.thresholds = thresholds;
    }

    pub fn level(&self) -> PressureLevel {
        self.level
    }

    /// Set once critical is reached, cleared only below the GC threshold
    pub fn is_pressure_active(&self) -> bool {
        self.pressure_active
    }

    /// Evaluate a complete sample and return the events it triggers
    pub fn evaluate(&mut self, metrics: &SystemMetrics, memory_limit: u64) -> Vec<ResourceEvent> {
        let mut events = Vec::new();
        self.evaluate_memory(metrics.memory.usage_ratio(), &mut events);

        let cpu_ratio = metrics.cpu.usage / 100.0;
        if cpu_ratio >= self.thresholds.cpu_critical {
            events.push(ResourceEvent::CpuPressure {
                usage: metrics.cpu.usage,
            });
        }

        let storage_ratio = metrics.storage.usage_ratio();
        if storage_ratio >= self.thresholds.storage_cleanup {
            events.push(ResourceEvent::StoragePressure {
                usage: storage_ratio * 100.0,
            });
        }

        if metrics.network.latency_ms >= self.thresholds.network_latency_ms {
            events.push(ResourceEvent::NetworkPressure {
                latency: metrics.network.latency_ms,
            });
        }

        if metrics.memory.used > memory_limit {
            events.push(ResourceEvent::MemoryLimitExceeded {
                used: metrics.memory.used,
                limit: memory_limit,
            });
        }

        events
    }

    fn evaluate_memory(&mut self, ratio: f64, events: &mut Vec<ResourceEvent>) {
        let usage = ratio * 100.0;

        if ratio >= self.thresholds.memory_gc {
            if self.level == PressureLevel::Normal {
                self.level = PressureLevel::Gc;
                events.push(ResourceEvent::MemoryPressure {
                    level: PressureLevel::Gc,
                    usage,
                });
            }
            if ratio >= self.thresholds.memory_critical && self.level != PressureLevel::Critical {
                self.level = PressureLevel::Critical;
                self.pressure_active = true;
                events.push(ResourceEvent::MemoryPressure {
                    level: PressureLevel::Critical,
                    usage,
                });
            }
        } else if self.level != PressureLevel::Normal {
            self.level = PressureLevel::Normal;
            self.pressure_active = false;
            events.push(ResourceEvent::MemoryPressure {
                level: PressureLevel::Normal,
                usage,
            });
        }
    }
}
