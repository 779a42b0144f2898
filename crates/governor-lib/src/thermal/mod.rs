//! Thermal collaborator contract
//!
//! The governor consumes temperature decisions as an event stream plus a
//! small command surface. [`SysfsThermalMonitor`] is the default
//! implementation for boards exposing `thermal_zone0`; [`ManualThermalController`]
//! lets an embedding application drive the stream itself.

mod manual;
mod sysfs;

pub use manual::ManualThermalController;
pub use sysfs::SysfsThermalMonitor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events published by a thermal controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ThermalEvent {
    /// Temperature at or above the throttle threshold. `reduction_level` is
    /// the fraction (0 to 1) by which load should be reduced.
    ThermalThrottling {
        temperature: f64,
        threshold: f64,
        action: String,
        reduction_level: f64,
    },
    ThermalRecovery { temperature: f64, threshold: f64 },
    /// Temperature at or above the emergency threshold; level 1 to 3
    ThermalEmergency { temperature: f64, emergency_level: u8 },
}

impl ThermalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ThermalEvent::ThermalThrottling { .. } => "thermal_throttling",
            ThermalEvent::ThermalRecovery { .. } => "thermal_recovery",
            ThermalEvent::ThermalEmergency { .. } => "thermal_emergency",
        }
    }

    pub fn temperature(&self) -> f64 {
        match self {
            ThermalEvent::ThermalThrottling { temperature, .. }
            | ThermalEvent::ThermalRecovery { temperature, .. }
            | ThermalEvent::ThermalEmergency { temperature, .. } => *temperature,
        }
    }
}

/// Snapshot returned by [`ThermalController::status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermalStatus {
    pub current_temperature: f64,
    pub active_throttling: bool,
    pub current_action: Option<String>,
}

impl Default for ThermalStatus {
    fn default() -> Self {
        Self {
            current_temperature: 45.0,
            active_throttling: false,
            current_action: None,
        }
    }
}

/// Thermal policy for the sysfs monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    /// Throttling starts at this temperature (°C)
    pub throttle_temp: f64,
    pub emergency_temp: f64,
    /// Degrees below `throttle_temp` required before recovery is reported
    pub hysteresis: f64,
    pub poll_interval_ms: u64,
    pub event_buffer: usize,
    /// Extra boundaries (°C); crossing one re-reports the current state even
    /// when the throttling action is unchanged
    pub notify_temps: Vec<f64>,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            throttle_temp: 70.0,
            emergency_temp: 85.0,
            hysteresis: 5.0,
            poll_interval_ms: 5_000,
            event_buffer: 64,
            notify_temps: Vec::new(),
        }
    }
}

impl ThermalConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.throttle_temp >= self.emergency_temp {
            return Err(format!(
                "throttle_temp ({}) must be below emergency_temp ({})",
                self.throttle_temp, self.emergency_temp
            ));
        }
        if self.hysteresis < 0.0 {
            return Err("hysteresis must not be negative".to_string());
        }
        Ok(())
    }

    /// Number of notify boundaries at or below `temperature`
    pub fn band_of(&self, temperature: f64) -> usize {
        self.notify_temps
            .iter()
            .filter(|&&boundary| temperature >= boundary)
            .count()
    }

    /// Add `temperature` as a notify boundary unless already present
    pub fn with_notify_temp(mut self, temperature: f64) -> Self {
        if !self.notify_temps.contains(&temperature) {
            self.notify_temps.push(temperature);
        }
        self
    }
}

/// External thermal sensor driver as seen by the governor
#[async_trait]
pub trait ThermalController: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ThermalEvent>;

    async fn start_monitoring(&self);

    async fn stop_monitoring(&self);

    /// Read the sensor now and publish whatever the reading implies
    async fn force_thermal_check(&self);

    async fn status(&self) -> ThermalStatus;

    fn is_monitoring(&self) -> bool;
}
