//! Event contract shared by all governor components
//!
//! Every component publishes its own typed events on a broadcast channel.
//! The orchestrator fans them in, records a uniform [`SystemEvent`] in a
//! bounded [`EventHistory`] and re-publishes a [`GovernorEvent`].

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collector::ResourceEvent;
use crate::models::SystemMetrics;
use crate::queue::QueueEvent;
use crate::storage::StorageEvent;
use crate::thermal::ThermalEvent;

/// Default number of events retained by the orchestrator
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
            Severity::Emergency => write!(f, "emergency"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Resource,
    Thermal,
    Storage,
    Integration,
    System,
}

/// Orchestrator audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub subtype: String,
    pub severity: Severity,
    pub source: String,
    pub message: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Externally observable event stream
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum GovernorEvent {
    /// Uniform audit record, one per recorded component event
    System(SystemEvent),
    /// Periodic sampling snapshot
    Metrics(SystemMetrics),
    Resource(ResourceEvent),
    Storage(StorageEvent),
    Queue(QueueEvent),
    Thermal(ThermalEvent),
    /// Process-wide emergency signal
    SystemEmergency { reason: String, temperature: f64 },
}

/// Partially built event; the history assigns id and timestamp
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub subtype: String,
    pub severity: Severity,
    pub source: String,
    pub message: String,
    pub data: serde_json::Value,
}

impl EventDraft {
    pub fn new(
        event_type: EventType,
        subtype: impl Into<String>,
        severity: Severity,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            subtype: subtype.into(),
            severity,
            source: source.into(),
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Append-only ring buffer of recorded events; the oldest entry is dropped
/// once capacity is reached.
#[derive(Debug)]
pub struct EventHistory {
    events: VecDeque<SystemEvent>,
    capacity: usize,
    next_id: u64,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
            next_id: 0,
        }
    }

    /// Stamp a draft and append it, returning the stored record
    pub fn record(&mut self, draft: EventDraft) -> SystemEvent {
        self.next_id += 1;
        let timestamp = Utc::now();
        let event = SystemEvent {
            id: format!("evt-{}-{}", timestamp.timestamp_millis(), self.next_id),
            event_type: draft.event_type,
            subtype: draft.subtype,
            severity: draft.severity,
            source: draft.source,
            message: draft.message,
            data: draft.data,
            timestamp,
        };

        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());
        event
    }

    /// The most recent `limit` events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<SystemEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of events ever recorded, including evicted ones
    pub fn total_recorded(&self) -> u64 {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(subtype: &str) -> EventDraft {
        EventDraft::new(
            EventType::System,
            subtype,
            Severity::Info,
            "test",
            format!("event {}", subtype),
        )
    }

    #[test]
    fn test_history_drops_oldest_at_capacity() {
        let mut history = EventHistory::new(3);
        for i in 0..5 {
            history.record(draft(&i.to_string()));
        }

        assert_eq!(history.len(), 3);
        let subtypes: Vec<String> = history.recent(10).into_iter().map(|e| e.subtype).collect();
        assert_eq!(subtypes, vec!["2", "3", "4"]);
        assert_eq!(history.total_recorded(), 5);
    }

    #[test]
    fn test_recent_limit_returns_newest() {
        let mut history = EventHistory::new(10);
        for i in 0..4 {
            history.record(draft(&i.to_string()));
        }

        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].subtype, "2");
        assert_eq!(recent[1].subtype, "3");
        assert!(history.recent(0).is_empty());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let mut history = EventHistory::new(10);
        let a = history.record(draft("a"));
        let b = history.record(draft("b"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_system_event_wire_format() {
        let mut history = EventHistory::new(2);
        let event = history.record(
            EventDraft::new(
                EventType::Thermal,
                "thermal_emergency",
                Severity::Emergency,
                "thermal",
                "Thermal emergency",
            )
            .with_data(serde_json::json!({ "temperature": 86.0 })),
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "thermal");
        assert_eq!(json["severity"], "emergency");
        assert_eq!(json["data"]["temperature"], 86.0);
    }
}
