//! Memory reclamation and adaptive scaling responses

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ResourceEvent;
use crate::models::{MemoryMetrics, PressureLevel, ReductionLevel};

/// Something in the process that can release memory on request
/// (caches, buffers, pooled allocations).
#[async_trait]
pub trait MemoryReclaimer: Send + Sync {
    fn name(&self) -> &str;

    /// Release what can be released; returns the bytes it believes it freed
    async fn reclaim(&self) -> u64;
}

/// Outcome of a reclamation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcReport {
    pub before: u64,
    pub after: u64,
    /// Measured drop in used memory
    pub freed: u64,
    /// Sum of what the reclaimers reported
    pub reported: u64,
    pub reclaimers: usize,
}

/// Service reduction level for a memory reading
pub fn reduction_level(memory: &MemoryMetrics, limit: u64) -> ReductionLevel {
    let ratio = memory.usage_ratio();
    if memory.used > limit || ratio >= 0.95 {
        ReductionLevel::Aggressive
    } else if ratio >= 0.90 {
        ReductionLevel::Moderate
    } else {
        ReductionLevel::Light
    }
}

/// What the collector does in response to one of its own events
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScalingAction {
    CollectGarbage,
    Publish(ResourceEvent),
}

pub(crate) fn adaptive_response(
    event: &ResourceEvent,
    memory: &MemoryMetrics,
    limit: u64,
) -> Vec<ScalingAction> {
    match event {
        ResourceEvent::MemoryPressure {
            level: PressureLevel::Gc,
            ..
        } => vec![ScalingAction::CollectGarbage],
        ResourceEvent::MemoryPressure {
            level: PressureLevel::Critical,
            ..
        } => vec![ScalingAction::Publish(
            ResourceEvent::ServiceReductionRequested {
                reason: "critical memory pressure".to_string(),
                level: reduction_level(memory, limit),
            },
        )],
        ResourceEvent::MemoryPressure {
            level: PressureLevel::Normal,
            ..
        } => vec![ScalingAction::Publish(
            ResourceEvent::ServiceRestorationRequested {
                reason: "memory pressure relieved".to_string(),
            },
        )],
        ResourceEvent::CpuPressure { usage } => vec![ScalingAction::Publish(
            ResourceEvent::CpuReductionRequested { usage: *usage },
        )],
        ResourceEvent::StoragePressure { usage } => vec![ScalingAction::Publish(
            ResourceEvent::StorageCleanupRequested { usage: *usage },
        )],
        ResourceEvent::MemoryLimitExceeded { .. } => vec![
            ScalingAction::CollectGarbage,
            ScalingAction::Publish(ResourceEvent::ServiceReductionRequested {
                reason: "hardware memory limit exceeded".to_string(),
                level: ReductionLevel::Aggressive,
            }),
        ],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GIB;

    fn memory(ratio: f64) -> MemoryMetrics {
        let total = 4 * GIB;
        let used = (total as f64 * ratio).ceil() as u64;
        MemoryMetrics {
            total,
            used,
            available: total - used,
            swap_used: 0,
        }
    }

    #[test]
    fn test_reduction_level_by_ratio() {
        assert_eq!(reduction_level(&memory(0.91), u64::MAX), ReductionLevel::Moderate);
        assert_eq!(reduction_level(&memory(0.96), u64::MAX), ReductionLevel::Aggressive);
        assert_eq!(reduction_level(&memory(0.85), u64::MAX), ReductionLevel::Light);
    }

    #[test]
    fn test_reduction_level_over_limit_is_aggressive() {
        assert_eq!(reduction_level(&memory(0.50), GIB), ReductionLevel::Aggressive);
    }

    #[test]
    fn test_gc_level_collects_garbage() {
        let event = ResourceEvent::MemoryPressure {
            level: PressureLevel::Gc,
            usage: 81.0,
        };
        assert_eq!(
            adaptive_response(&event, &memory(0.81), u64::MAX),
            vec![ScalingAction::CollectGarbage]
        );
    }

    #[test]
    fn test_limit_exceeded_forces_gc_and_aggressive_reduction() {
        let event = ResourceEvent::MemoryLimitExceeded {
            used: 2 * GIB,
            limit: GIB,
        };
        let actions = adaptive_response(&event, &memory(0.5), GIB);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0], ScalingAction::CollectGarbage);
        assert!(matches!(
            &actions[1],
            ScalingAction::Publish(ResourceEvent::ServiceReductionRequested {
                level: ReductionLevel::Aggressive,
                ..
            })
        ));
    }

    #[test]
    fn test_normal_requests_restoration() {
        let event = ResourceEvent::MemoryPressure {
            level: PressureLevel::Normal,
            usage: 40.0,
        };
        let actions = adaptive_response(&event, &memory(0.4), u64::MAX);
        assert!(matches!(
            &actions[0],
            ScalingAction::Publish(ResourceEvent::ServiceRestorationRequested { .. })
        ));
    }

    #[test]
    fn test_network_pressure_has_no_response() {
        let event = ResourceEvent::NetworkPressure { latency: 900.0 };
        assert!(adaptive_response(&event, &memory(0.4), u64::MAX).is_empty());
    }
}
