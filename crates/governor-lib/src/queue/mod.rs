//! Admission-controlled execution queue
//!
//! A bounded priority queue for units of work whose payload the governor
//! never interprets. Requests wait in the queue until a concurrency slot is
//! free and the board is not thermally suspended, then are handed to the
//! executor over a channel together with a cancellation signal.

mod admission;
mod advice;

pub use admission::{
    AdmissionQueue, Dispatched, QueueCounters, QueueSnapshot, QueueStatus, QueuedSummary,
};
pub use advice::{recommendations, PressureView, Recommendation};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Queued => "queued",
            RequestStatus::Running => "running",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }

    /// Forward-only transitions; cancellation from any live state
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Queued, RequestStatus::Running)
                | (RequestStatus::Queued, RequestStatus::Cancelled)
                | (RequestStatus::Running, RequestStatus::Completed)
                | (RequestStatus::Running, RequestStatus::Failed)
                | (RequestStatus::Running, RequestStatus::Cancelled)
        )
    }
}

/// One schedulable unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest<P> {
    pub id: String,
    /// 1 (lowest) to the configured number of priority levels
    pub priority: u8,
    pub payload: P,
    pub thermal_sensitive: bool,
    pub memory_intensive: bool,
    /// Caller's size hint, used only for recommendations
    pub estimated_size: Option<u64>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RequestStatus,
}

impl<P> AdmissionRequest<P> {
    pub fn new(id: impl Into<String>, priority: u8, payload: P) -> Self {
        Self {
            id: id.into(),
            priority,
            payload,
            thermal_sensitive: false,
            memory_intensive: false,
            estimated_size: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: RequestStatus::Queued,
        }
    }

    pub fn thermal_sensitive(mut self, sensitive: bool) -> Self {
        self.thermal_sensitive = sensitive;
        self
    }

    pub fn memory_intensive(mut self, intensive: bool) -> Self {
        self.memory_intensive = intensive;
        self
    }

    pub fn estimated_size(mut self, bytes: u64) -> Self {
        self.estimated_size = Some(bytes);
        self
    }
}

/// Why a request was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    QueueFull,
    Timeout,
    ThermalProtection,
    ResourcePressure,
    User,
    Shutdown,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::QueueFull => "queue full",
            CancelReason::Timeout => "timeout",
            CancelReason::ThermalProtection => "thermal protection",
            CancelReason::ResourcePressure => "resource pressure",
            CancelReason::User => "cancelled by user",
            CancelReason::Shutdown => "system shutdown",
        }
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub enabled: bool,
    pub max_queue_size: usize,
    pub max_concurrent: usize,
    pub priority_levels: u8,
    /// Maximum time a request may wait before it is cancelled
    pub item_timeout_ms: u64,
    pub tick_interval_ms: u64,
    /// Concurrency is halved at or above this temperature
    pub thermal_reduce_temp: f64,
    /// Dispatch stops at or above this temperature
    pub thermal_pause_temp: f64,
    /// Time below `thermal_reduce_temp` before dispatch resumes
    pub thermal_cooldown_ms: u64,
    /// Memory or CPU usage (percent) at which low-priority work is shed
    pub resource_pressure_percent: f64,
    /// Ratios above which recommendations consider memory or CPU busy
    pub advisory_memory_ratio: f64,
    pub advisory_cpu_ratio: f64,
    /// Written on shutdown when set
    pub snapshot_path: Option<PathBuf>,
    pub event_buffer: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_queue_size: 10,
            max_concurrent: 2,
            priority_levels: 10,
            item_timeout_ms: 300_000,
            tick_interval_ms: 1_000,
            thermal_reduce_temp: 70.0,
            thermal_pause_temp: 80.0,
            thermal_cooldown_ms: 30_000,
            resource_pressure_percent: 90.0,
            advisory_memory_ratio: 0.8,
            advisory_cpu_ratio: 0.8,
            snapshot_path: None,
            event_buffer: 256,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be at least 1".to_string());
        }
        if self.priority_levels == 0 {
            return Err("priority_levels must be at least 1".to_string());
        }
        if self.thermal_reduce_temp > self.thermal_pause_temp {
            return Err(format!(
                "thermal_reduce_temp ({}) must not exceed thermal_pause_temp ({})",
                self.thermal_reduce_temp, self.thermal_pause_temp
            ));
        }
        Ok(())
    }
}

/// Events published by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum QueueEvent {
    Queued { id: String, priority: u8, queue_length: usize },
    Started { id: String, priority: u8 },
    Completed { id: String, duration_ms: u64 },
    Failed { id: String, error: String },
    Cancelled { id: String, reason: String, was_running: bool },
    /// Dispatch halted by a thermal signal
    Suspended { temperature: f64 },
    ConcurrencyReduced { max_concurrent: usize, temperature: f64 },
    /// Cooldown elapsed; full concurrency restored
    Resumed,
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Queued { .. } => "queued",
            QueueEvent::Started { .. } => "started",
            QueueEvent::Completed { .. } => "completed",
            QueueEvent::Failed { .. } => "failed",
            QueueEvent::Cancelled { .. } => "cancelled",
            QueueEvent::Suspended { .. } => "suspended",
            QueueEvent::ConcurrencyReduced { .. } => "concurrency_reduced",
            QueueEvent::Resumed => "resumed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_only_forward() {
        use RequestStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Completed));
        assert!(Cancelled.is_terminal());
    }

    #[test]
    fn test_cancel_reason_strings() {
        assert_eq!(CancelReason::QueueFull.as_str(), "queue full");
        assert_eq!(CancelReason::Shutdown.to_string(), "system shutdown");
    }

    #[test]
    fn test_config_validation() {
        assert!(QueueConfig::default().validate().is_ok());
        let config = QueueConfig {
            thermal_reduce_temp: 90.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_builder() {
        let request = AdmissionRequest::new("job-1", 7, "payload")
            .thermal_sensitive(true)
            .estimated_size(1024);
        assert_eq!(request.status, RequestStatus::Queued);
        assert!(request.thermal_sensitive);
        assert!(!request.memory_intensive);
        assert_eq!(request.estimated_size, Some(1024));
    }
}
