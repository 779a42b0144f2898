//! Cross-component feedback rules
//!
//! Rules are pure: an event maps to zero or more directives, which the
//! orchestrator executes from its private bus.

use super::translate::ComponentEvent;
use crate::collector::ResourceEvent;
use crate::models::{PressureLevel, ReductionLevel, SystemMetrics};
use crate::storage::CleanupMode;
use crate::thermal::ThermalEvent;

/// An action one component takes on behalf of another
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Scale the collector's CPU and GC thresholds down from their defaults
    ScaleThresholds { reduction: f64 },
    RestoreThresholds,
    StopPolling,
    ResumePolling,
    SlowPolling,
    ResetPolling,
    Cleanup(CleanupMode),
    GarbageCollect,
    Emergency { reason: String, temperature: f64 },
    QueueThermal(ThermalEvent),
    QueueMetrics(Box<SystemMetrics>),
}

#[derive(Debug, Clone, Copy)]
pub struct FeedbackPolicy {
    pub thermal_reduction_factor: f64,
    /// The collector already reclaims memory on its own pressure events
    pub collector_adaptive: bool,
}

pub fn directives_for(event: &ComponentEvent, policy: &FeedbackPolicy) -> Vec<Directive> {
    match event {
        ComponentEvent::Thermal(thermal) => thermal_rules(thermal, policy),
        ComponentEvent::Resource(resource) => resource_rules(resource, policy),
        ComponentEvent::Storage(_) | ComponentEvent::Queue(_) => Vec::new(),
    }
}

fn thermal_rules(event: &ThermalEvent, policy: &FeedbackPolicy) -> Vec<Directive> {
    let forward = Directive::QueueThermal(event.clone());
    match event {
        ThermalEvent::ThermalThrottling {
            reduction_level, ..
        } => vec![
            Directive::ScaleThresholds {
                reduction: (reduction_level * policy.thermal_reduction_factor).clamp(0.0, 1.0),
            },
            forward,
        ],
        ThermalEvent::ThermalRecovery { .. } => vec![
            Directive::RestoreThresholds,
            Directive::ResumePolling,
            forward,
        ],
        ThermalEvent::ThermalEmergency {
            temperature,
            emergency_level,
        } => vec![
            Directive::StopPolling,
            Directive::Cleanup(CleanupMode::Aggressive),
            Directive::Emergency {
                reason: format!("thermal emergency level {}", emergency_level),
                temperature: *temperature,
            },
            forward,
        ],
    }
}

fn resource_rules(event: &ResourceEvent, policy: &FeedbackPolicy) -> Vec<Directive> {
    match event {
        ResourceEvent::Metrics(metrics) => vec![Directive::QueueMetrics(metrics.clone())],
        ResourceEvent::ServiceReductionRequested {
            level: ReductionLevel::Aggressive,
            ..
        } => vec![
            Directive::SlowPolling,
            Directive::Cleanup(CleanupMode::Forced),
        ],
        ResourceEvent::ServiceRestorationRequested { .. } => vec![Directive::ResetPolling],
        ResourceEvent::MemoryPressure {
            level: PressureLevel::Critical,
            ..
        } if !policy.collector_adaptive => vec![Directive::GarbageCollect],
        ResourceEvent::StoragePressure { .. } | ResourceEvent::StorageCleanupRequested { .. } => {
            vec![Directive::Cleanup(CleanupMode::Normal)]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FeedbackPolicy {
        FeedbackPolicy {
            thermal_reduction_factor: 1.0,
            collector_adaptive: false,
        }
    }

    #[test]
    fn test_throttling_scales_thresholds_and_informs_queue() {
        let event = ThermalEvent::ThermalThrottling {
            temperature: 75.0,
            threshold: 70.0,
            action: "reduce_cpu_frequency".to_string(),
            reduction_level: 0.3,
        };
        let halved = FeedbackPolicy {
            thermal_reduction_factor: 0.5,
            ..policy()
        };

        let directives = directives_for(&ComponentEvent::Thermal(event.clone()), &halved);
        assert_eq!(
            directives,
            vec![
                Directive::ScaleThresholds { reduction: 0.15 },
                Directive::QueueThermal(event),
            ]
        );
    }

    #[test]
    fn test_emergency_stops_polling_and_cleans_aggressively() {
        let event = ComponentEvent::Thermal(ThermalEvent::ThermalEmergency {
            temperature: 91.0,
            emergency_level: 2,
        });
        let directives = directives_for(&event, &policy());

        assert_eq!(directives[0], Directive::StopPolling);
        assert_eq!(directives[1], Directive::Cleanup(CleanupMode::Aggressive));
        assert_eq!(
            directives[2],
            Directive::Emergency {
                reason: "thermal emergency level 2".to_string(),
                temperature: 91.0,
            }
        );
    }

    #[test]
    fn test_only_aggressive_reduction_slows_polling() {
        let moderate = ComponentEvent::Resource(ResourceEvent::ServiceReductionRequested {
            reason: "memory".to_string(),
            level: ReductionLevel::Moderate,
        });
        assert!(directives_for(&moderate, &policy()).is_empty());

        let aggressive = ComponentEvent::Resource(ResourceEvent::ServiceReductionRequested {
            reason: "memory".to_string(),
            level: ReductionLevel::Aggressive,
        });
        assert_eq!(
            directives_for(&aggressive, &policy()),
            vec![Directive::SlowPolling, Directive::Cleanup(CleanupMode::Forced)]
        );
    }

    #[test]
    fn test_critical_memory_reclaims_unless_collector_adapts() {
        let event = ComponentEvent::Resource(ResourceEvent::MemoryPressure {
            level: PressureLevel::Critical,
            usage: 92.0,
        });
        assert_eq!(
            directives_for(&event, &policy()),
            vec![Directive::GarbageCollect]
        );

        let adaptive = FeedbackPolicy {
            collector_adaptive: true,
            ..policy()
        };
        assert!(directives_for(&event, &adaptive).is_empty());
    }
}
