use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{ThermalController, ThermalEvent, ThermalStatus};

/// Controller whose events are pushed in by the caller
///
/// Used where no sensor is available and by tests that need exact control
/// over the thermal stream.
pub struct ManualThermalController {
    events_tx: broadcast::Sender<ThermalEvent>,
    status: Mutex<ThermalStatus>,
    monitoring: AtomicBool,
    forced_checks: AtomicUsize,
}

impl Default for ManualThermalController {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualThermalController {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            events_tx,
            status: Mutex::new(ThermalStatus::default()),
            monitoring: AtomicBool::new(false),
            forced_checks: AtomicUsize::new(0),
        }
    }

    /// Publish an event and fold it into the reported status
    pub fn emit(&self, event: ThermalEvent) {
        if let Ok(mut status) = self.status.lock() {
            status.current_temperature = event.temperature();
            match &event {
                ThermalEvent::ThermalThrottling { action, .. } => {
                    status.active_throttling = true;
                    status.current_action = Some(action.clone());
                }
                ThermalEvent::ThermalEmergency { .. } => {
                    status.active_throttling = true;
                    status.current_action = Some("emergency".to_string());
                }
                ThermalEvent::ThermalRecovery { .. } => {
                    status.active_throttling = false;
                    status.current_action = None;
                }
            }
        }
        let _ = self.events_tx.send(event);
    }

    pub fn forced_checks(&self) -> usize {
        self.forced_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThermalController for ManualThermalController {
    fn subscribe(&self) -> broadcast::Receiver<ThermalEvent> {
        self.events_tx.subscribe()
    }

    async fn start_monitoring(&self) {
        self.monitoring.store(true, Ordering::SeqCst);
    }

    async fn stop_monitoring(&self) {
        self.monitoring.store(false, Ordering::SeqCst);
    }

    async fn force_thermal_check(&self) {
        self.forced_checks.fetch_add(1, Ordering::SeqCst);
    }

    async fn status(&self) -> ThermalStatus {
        self.status
            .lock()
            .map(|status| status.clone())
            .unwrap_or_default()
    }

    fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }
}
