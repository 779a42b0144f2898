//! Thermal monitor backed by the sysfs thermal zone

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{ThermalConfig, ThermalController, ThermalEvent, ThermalStatus};
use crate::collector::{read_temperature, HostPaths};

const ACTION_REDUCE_FREQUENCY: &str = "reduce_cpu_frequency";
const ACTION_PAUSE_BACKGROUND: &str = "pause_background_work";
const ACTION_EMERGENCY: &str = "emergency";

/// Throttling state derived from successive readings
#[derive(Debug, Clone, Default)]
struct ThermalState {
    temperature: Option<f64>,
    action: Option<&'static str>,
    emergency_level: Option<u8>,
    band: usize,
}

impl ThermalState {
    fn evaluate(&mut self, temperature: f64, config: &ThermalConfig) -> Option<ThermalEvent> {
        self.temperature = Some(temperature);
        let band = config.band_of(temperature);
        let crossed = band != self.band;
        self.band = band;

        if temperature >= config.emergency_temp {
            let level = (1.0 + ((temperature - config.emergency_temp) / 5.0).floor()).min(3.0) as u8;
            let escalated = self.emergency_level.map_or(true, |current| level > current);
            self.emergency_level = Some(self.emergency_level.map_or(level, |c| c.max(level)));
            self.action = Some(ACTION_EMERGENCY);
            return (escalated || crossed).then_some(ThermalEvent::ThermalEmergency {
                temperature,
                emergency_level: level,
            });
        }

        if temperature >= config.throttle_temp {
            let span = config.emergency_temp - config.throttle_temp;
            let overshoot = ((temperature - config.throttle_temp) / span).clamp(0.0, 1.0);
            let action = if overshoot < 0.5 {
                ACTION_REDUCE_FREQUENCY
            } else {
                ACTION_PAUSE_BACKGROUND
            };
            let changed = self.action != Some(action) || crossed;
            self.emergency_level = None;
            self.action = Some(action);
            return changed.then(|| ThermalEvent::ThermalThrottling {
                temperature,
                threshold: config.throttle_temp,
                action: action.to_string(),
                reduction_level: 0.1 + 0.4 * overshoot,
            });
        }

        if self.action.is_some() && temperature < config.throttle_temp - config.hysteresis {
            self.action = None;
            self.emergency_level = None;
            return Some(ThermalEvent::ThermalRecovery {
                temperature,
                threshold: config.throttle_temp,
            });
        }

        None
    }

    fn status(&self) -> ThermalStatus {
        ThermalStatus {
            current_temperature: self.temperature.unwrap_or(45.0),
            active_throttling: self.action.is_some(),
            current_action: self.action.map(str::to_string),
        }
    }
}

struct Inner {
    config: ThermalConfig,
    paths: HostPaths,
    state: Mutex<ThermalState>,
    events_tx: broadcast::Sender<ThermalEvent>,
}

impl Inner {
    async fn check(&self) {
        let Some(temperature) = read_temperature(&self.paths).await else {
            debug!(path = %self.paths.thermal_zone().display(), "Thermal zone unreadable");
            return;
        };

        let event = match self.state.lock() {
            Ok(mut state) => state.evaluate(temperature, &self.config),
            Err(_) => return,
        };

        if let Some(event) = event {
            match &event {
                ThermalEvent::ThermalEmergency { emergency_level, .. } => error!(
                    temperature,
                    emergency_level = *emergency_level,
                    "Thermal emergency"
                ),
                ThermalEvent::ThermalThrottling { action, .. } => {
                    warn!(temperature, action = %action, "Thermal throttling")
                }
                ThermalEvent::ThermalRecovery { .. } => info!(temperature, "Thermal recovery"),
            }
            let _ = self.events_tx.send(event);
        }
    }
}

/// Polls `thermal_zone0/temp` and reports throttling, emergency and recovery
pub struct SysfsThermalMonitor {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SysfsThermalMonitor {
    pub fn new(config: ThermalConfig, paths: HostPaths) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_buffer.max(16));
        Self {
            inner: Arc::new(Inner {
                config,
                paths,
                state: Mutex::new(ThermalState::default()),
                events_tx,
            }),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ThermalController for SysfsThermalMonitor {
    fn subscribe(&self) -> broadcast::Receiver<ThermalEvent> {
        self.inner.events_tx.subscribe()
    }

    async fn start_monitoring(&self) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let period = Duration::from_millis(inner.config.poll_interval_ms.max(1));
        info!(
            interval_ms = period.as_millis() as u64,
            throttle_temp = inner.config.throttle_temp,
            emergency_temp = inner.config.emergency_temp,
            "Starting thermal monitoring"
        );
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.check().await;
            }
        }));
    }

    async fn stop_monitoring(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                info!("Stopped thermal monitoring");
            }
        }
    }

    async fn force_thermal_check(&self) {
        self.inner.check().await;
    }

    async fn status(&self) -> ThermalStatus {
        self.inner
            .state
            .lock()
            .map(|state| state.status())
            .unwrap_or_default()
    }

    fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_state_throttles_then_recovers_with_hysteresis() {
        let config = ThermalConfig::default();
        let mut state = ThermalState::default();

        assert!(state.evaluate(60.0, &config).is_none());

        let event = state.evaluate(72.0, &config).unwrap();
        assert!(matches!(
            event,
            ThermalEvent::ThermalThrottling { ref action, .. } if action == ACTION_REDUCE_FREQUENCY
        ));
        // Same band again: no repeat
        assert!(state.evaluate(73.0, &config).is_none());

        // Inside the hysteresis band: still throttled
        assert!(state.evaluate(67.0, &config).is_none());
        assert!(state.status().active_throttling);

        let event = state.evaluate(64.0, &config).unwrap();
        assert!(matches!(event, ThermalEvent::ThermalRecovery { .. }));
        assert!(!state.status().active_throttling);
    }

    #[test]
    fn test_state_reduction_scales_with_overshoot() {
        let config = ThermalConfig::default();
        let mut state = ThermalState::default();

        let mild = state.evaluate(71.0, &config).unwrap();
        let severe = state.evaluate(82.0, &config).unwrap();
        let level = |event: &ThermalEvent| match event {
            ThermalEvent::ThermalThrottling {
                reduction_level, ..
            } => *reduction_level,
            _ => panic!("expected throttling"),
        };
        assert!(level(&severe) > level(&mild));
        assert!(level(&severe) <= 0.5);
    }

    #[test]
    fn test_state_emergency_escalates_once_per_level() {
        let config = ThermalConfig::default();
        let mut state = ThermalState::default();

        assert!(matches!(
            state.evaluate(86.0, &config),
            Some(ThermalEvent::ThermalEmergency {
                emergency_level: 1,
                ..
            })
        ));
        assert!(state.evaluate(87.0, &config).is_none());
        assert!(matches!(
            state.evaluate(91.0, &config),
            Some(ThermalEvent::ThermalEmergency {
                emergency_level: 2,
                ..
            })
        ));
        // Cooling into the throttle band reports throttling again
        assert!(matches!(
            state.evaluate(80.0, &config),
            Some(ThermalEvent::ThermalThrottling { .. })
        ));
    }

    #[test]
    fn test_state_reports_notify_boundary_crossings() {
        let config = ThermalConfig::default().with_notify_temp(80.0);
        let mut state = ThermalState::default();

        assert!(matches!(
            state.evaluate(78.0, &config),
            Some(ThermalEvent::ThermalThrottling { ref action, .. }) if action == ACTION_PAUSE_BACKGROUND
        ));
        // Same action, but 80°C was crossed
        assert!(matches!(
            state.evaluate(82.0, &config),
            Some(ThermalEvent::ThermalThrottling { temperature, .. }) if temperature == 82.0
        ));
        assert!(state.evaluate(83.0, &config).is_none());
        assert!(matches!(
            state.evaluate(79.0, &config),
            Some(ThermalEvent::ThermalThrottling { temperature, .. }) if temperature == 79.0
        ));

        // Without the boundary the climb stays silent
        let mut plain = ThermalState::default();
        let defaults = ThermalConfig::default();
        assert!(plain.evaluate(78.0, &defaults).is_some());
        assert!(plain.evaluate(82.0, &defaults).is_none());
    }

    #[tokio::test]
    async fn test_force_check_reads_thermal_zone() {
        let temp_dir = TempDir::new().unwrap();
        let paths = HostPaths::new(temp_dir.path().join("proc"), temp_dir.path().join("sys"));
        let zone = paths.thermal_zone();
        std::fs::create_dir_all(zone.parent().unwrap()).unwrap();
        std::fs::write(&zone, "76000\n").unwrap();

        let monitor = SysfsThermalMonitor::new(ThermalConfig::default(), paths);
        let mut rx = monitor.subscribe();
        monitor.force_thermal_check().await;

        assert!(matches!(
            rx.try_recv().unwrap(),
            ThermalEvent::ThermalThrottling { temperature, .. } if temperature == 76.0
        ));
        let status = monitor.status().await;
        assert_eq!(status.current_temperature, 76.0);
        assert!(status.active_throttling);
    }

    #[tokio::test]
    async fn test_missing_sensor_publishes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let paths = HostPaths::new(temp_dir.path(), temp_dir.path());
        let monitor = SysfsThermalMonitor::new(ThermalConfig::default(), paths);
        let mut rx = monitor.subscribe();

        monitor.force_thermal_check().await;

        assert!(rx.try_recv().is_err());
        assert_eq!(monitor.status().await, ThermalStatus::default());
    }

    #[tokio::test]
    async fn test_start_and_stop_monitoring() {
        let temp_dir = TempDir::new().unwrap();
        let paths = HostPaths::new(temp_dir.path(), temp_dir.path());
        let monitor = SysfsThermalMonitor::new(ThermalConfig::default(), paths);

        monitor.start_monitoring().await;
        assert!(monitor.is_monitoring());
        monitor.stop_monitoring().await;
        assert!(!monitor.is_monitoring());
    }
}
