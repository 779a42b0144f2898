//! Top-level governor configuration
//!
//! Every section carries defaults, so an empty document yields a working
//! governor. Loading from files and the environment lives in the binary.

use serde::{Deserialize, Serialize};

use crate::collector::CollectorConfig;
use crate::events::DEFAULT_HISTORY_CAPACITY;
use crate::models::ResourceThresholds;
use crate::queue::QueueConfig;
use crate::storage::StorageConfig;
use crate::thermal::ThermalConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub health_interval_ms: u64,
    /// Events retained for `recent_events`
    pub history_capacity: usize,
    /// Multiplies a throttling event's reduction level before thresholds are scaled
    pub thermal_reduction_factor: f64,
    /// Memory or CPU percent treated as a critical health condition
    pub critical_usage_percent: f64,
    /// Consecutive health checks at or above `critical_usage_percent` before
    /// usage counts as sustained
    pub critical_checks: u32,
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_interval_ms: 30_000,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            thermal_reduction_factor: 1.0,
            critical_usage_percent: 95.0,
            critical_checks: 2,
            event_buffer: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub node_name: String,
    /// Port for health, readiness and metrics endpoints
    pub api_port: u16,
    pub thresholds: ResourceThresholds,
    pub collector: CollectorConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub thermal: ThermalConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            node_name: "sbc".to_string(),
            api_port: 9100,
            thresholds: ResourceThresholds::default(),
            collector: CollectorConfig::default(),
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            thermal: ThermalConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl GovernorConfig {
    /// Validate every section, prefixing errors with the section name
    pub fn validate(&self) -> Result<(), String> {
        self.thresholds
            .validate()
            .map_err(|e| format!("thresholds: {}", e))?;
        self.storage
            .validate()
            .map_err(|e| format!("storage: {}", e))?;
        self.queue.validate().map_err(|e| format!("queue: {}", e))?;
        self.thermal
            .validate()
            .map_err(|e| format!("thermal: {}", e))?;

        if self.orchestrator.history_capacity == 0 {
            return Err("orchestrator: history_capacity must be at least 1".to_string());
        }
        if self.orchestrator.critical_checks == 0 {
            return Err("orchestrator: critical_checks must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.orchestrator.thermal_reduction_factor) {
            return Err("orchestrator: thermal_reduction_factor must be within 0..=1".to_string());
        }
        if self.collector.interval_ms == 0 {
            return Err("collector: interval_ms must be positive".to_string());
        }
        if self.queue.thermal_reduce_temp < self.thermal.throttle_temp {
            return Err(format!(
                "queue: thermal_reduce_temp ({}) is below thermal.throttle_temp ({}), where no readings are reported",
                self.queue.thermal_reduce_temp, self.thermal.throttle_temp
            ));
        }
        Ok(())
    }

    /// Thermal monitor policy that also reports crossings of the queue's
    /// reduce and pause temperatures
    pub fn thermal_monitor_config(&self) -> ThermalConfig {
        self.thermal
            .clone()
            .with_notify_temp(self.queue.thermal_reduce_temp)
            .with_notify_temp(self.queue.thermal_pause_temp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(GovernorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_thermal_monitor_reports_queue_temperatures() {
        let config = GovernorConfig::default();
        let monitor = config.thermal_monitor_config();
        assert_eq!(monitor.notify_temps, vec![70.0, 80.0]);
        assert_eq!(monitor.throttle_temp, config.thermal.throttle_temp);
    }

    #[test]
    fn test_queue_reduce_below_throttle_is_rejected() {
        let mut config = GovernorConfig::default();
        config.queue.thermal_reduce_temp = 60.0;
        let err = config.validate().unwrap_err();
        assert!(err.starts_with("queue:"));
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: GovernorConfig = serde_json::from_value(serde_json::json!({
            "node_name": "pi-kitchen",
            "queue": { "max_concurrent": 4 },
            "thresholds": { "memory_gc": 0.75 }
        }))
        .unwrap();

        assert_eq!(config.node_name, "pi-kitchen");
        assert_eq!(config.queue.max_concurrent, 4);
        assert_eq!(config.queue.max_queue_size, 10);
        assert_eq!(config.thresholds.memory_gc, 0.75);
        assert_eq!(config.thresholds.memory_critical, 0.90);
        assert_eq!(config.orchestrator.history_capacity, 1000);
    }

    #[test]
    fn test_validation_names_section() {
        let mut config = GovernorConfig::default();
        config.queue.max_concurrent = 0;
        let err = config.validate().unwrap_err();
        assert!(err.starts_with("queue:"), "{}", err);
    }
}
