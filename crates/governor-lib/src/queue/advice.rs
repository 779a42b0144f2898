//! Advisory recommendations for callers about to submit work.
//! Nothing here is applied automatically.

use serde::Serialize;

use super::QueueConfig;

/// Shrink factor suggested for size hints under memory pressure
pub const ESTIMATE_REDUCTION_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Recommendation {
    /// Prefer a lighter payload variant (smaller model, shorter message)
    UseLighterVariant { reason: String },
    ReduceEstimate {
        factor: f64,
        suggested_size: Option<u64>,
    },
    Delay { reason: String },
    Cancel { reason: String },
}

/// Inputs for [`recommendations`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PressureView {
    pub memory_ratio: f64,
    pub cpu_ratio: f64,
    pub thermally_reduced: bool,
    pub suspended: bool,
    pub active: usize,
    pub effective_concurrency: usize,
}

pub fn recommendations(
    view: &PressureView,
    config: &QueueConfig,
    estimated_size: Option<u64>,
) -> Vec<Recommendation> {
    let memory_pressure = view.memory_ratio >= config.advisory_memory_ratio;
    let thermal_pressure = view.thermally_reduced || view.suspended;
    let mut advice = Vec::new();

    if memory_pressure || thermal_pressure {
        let reason = if memory_pressure {
            "memory pressure"
        } else {
            "thermal pressure"
        };
        advice.push(Recommendation::UseLighterVariant {
            reason: reason.to_string(),
        });
    }

    if memory_pressure {
        advice.push(Recommendation::ReduceEstimate {
            factor: ESTIMATE_REDUCTION_FACTOR,
            suggested_size: estimated_size
                .map(|size| (size as f64 * ESTIMATE_REDUCTION_FACTOR).round() as u64),
        });
    }

    if view.suspended {
        advice.push(Recommendation::Delay {
            reason: "execution suspended for thermal protection".to_string(),
        });
    }

    if view.active >= view.effective_concurrency && view.cpu_ratio >= config.advisory_cpu_ratio {
        advice.push(Recommendation::Cancel {
            reason: "all execution slots busy and CPU over threshold".to_string(),
        });
    }

    advice
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> PressureView {
        PressureView {
            memory_ratio: 0.4,
            cpu_ratio: 0.3,
            active: 0,
            effective_concurrency: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_advice_when_idle() {
        assert!(recommendations(&view(), &QueueConfig::default(), None).is_empty());
    }

    #[test]
    fn test_memory_pressure_suggests_lighter_and_smaller() {
        let pressured = PressureView {
            memory_ratio: 0.85,
            ..view()
        };
        let advice = recommendations(&pressured, &QueueConfig::default(), Some(1000));

        assert!(matches!(advice[0], Recommendation::UseLighterVariant { .. }));
        assert_eq!(
            advice[1],
            Recommendation::ReduceEstimate {
                factor: 0.7,
                suggested_size: Some(700),
            }
        );
    }

    #[test]
    fn test_suspension_suggests_delay() {
        let suspended = PressureView {
            suspended: true,
            ..view()
        };
        let advice = recommendations(&suspended, &QueueConfig::default(), None);

        assert!(advice
            .iter()
            .any(|a| matches!(a, Recommendation::Delay { .. })));
        assert!(!advice
            .iter()
            .any(|a| matches!(a, Recommendation::ReduceEstimate { .. })));
    }

    #[test]
    fn test_full_and_busy_suggests_cancel() {
        let busy = PressureView {
            cpu_ratio: 0.9,
            active: 2,
            ..view()
        };
        let advice = recommendations(&busy, &QueueConfig::default(), None);
        assert_eq!(advice.len(), 1);
        assert!(matches!(advice[0], Recommendation::Cancel { .. }));

        let spare_slot = PressureView { active: 1, ..busy };
        assert!(recommendations(&spare_slot, &QueueConfig::default(), None).is_empty());
    }
}
