//! Component events to uniform audit records

use crate::collector::ResourceEvent;
use crate::events::{EventDraft, EventType, GovernorEvent, Severity};
use crate::models::{PressureLevel, ReductionLevel};
use crate::queue::QueueEvent;
use crate::storage::StorageEvent;
use crate::thermal::ThermalEvent;

/// An event as received from one of the component channels
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentEvent {
    Resource(ResourceEvent),
    Storage(StorageEvent),
    Queue(QueueEvent),
    Thermal(ThermalEvent),
}

impl ComponentEvent {
    pub fn source(&self) -> &'static str {
        match self {
            ComponentEvent::Resource(_) => "collector",
            ComponentEvent::Storage(_) => "storage",
            ComponentEvent::Queue(_) => "queue",
            ComponentEvent::Thermal(_) => "thermal",
        }
    }

    pub fn into_governor_event(self) -> GovernorEvent {
        match self {
            ComponentEvent::Resource(ResourceEvent::Metrics(metrics)) => {
                GovernorEvent::Metrics(*metrics)
            }
            ComponentEvent::Resource(event) => GovernorEvent::Resource(event),
            ComponentEvent::Storage(event) => GovernorEvent::Storage(event),
            ComponentEvent::Queue(event) => GovernorEvent::Queue(event),
            ComponentEvent::Thermal(event) => GovernorEvent::Thermal(event),
        }
    }
}

fn draft<T: serde::Serialize>(
    event_type: EventType,
    subtype: &str,
    severity: Severity,
    source: &str,
    message: String,
    payload: &T,
) -> EventDraft {
    EventDraft::new(event_type, subtype, severity, source, message)
        .with_data(serde_json::to_value(payload).unwrap_or(serde_json::Value::Null))
}

/// Audit record for an event; periodic metrics snapshots are not recorded
pub fn draft_for(event: &ComponentEvent) -> Option<EventDraft> {
    let source = event.source();
    match event {
        ComponentEvent::Resource(ResourceEvent::Metrics(_)) => None,
        ComponentEvent::Resource(e) => {
            let (severity, message) = resource_summary(e);
            Some(draft(EventType::Resource, e.name(), severity, source, message, e))
        }
        ComponentEvent::Storage(e) => {
            let (severity, message) = storage_summary(e);
            Some(draft(EventType::Storage, e.name(), severity, source, message, e))
        }
        ComponentEvent::Queue(e) => {
            let (severity, message) = queue_summary(e);
            Some(draft(EventType::Integration, e.name(), severity, source, message, e))
        }
        ComponentEvent::Thermal(e) => {
            let (severity, message) = thermal_summary(e);
            Some(draft(EventType::Thermal, e.name(), severity, source, message, e))
        }
    }
}

fn resource_summary(event: &ResourceEvent) -> (Severity, String) {
    match event {
        ResourceEvent::Metrics(_) => (Severity::Info, "Metrics sample".to_string()),
        ResourceEvent::MemoryPressure { level, usage } => {
            let severity = match level {
                PressureLevel::Normal => Severity::Info,
                PressureLevel::Gc => Severity::Warning,
                PressureLevel::Critical => Severity::Critical,
            };
            (severity, format!("Memory pressure {} at {:.1}%", level, usage))
        }
        ResourceEvent::CpuPressure { usage } => {
            (Severity::Warning, format!("CPU usage high at {:.1}%", usage))
        }
        ResourceEvent::StoragePressure { usage } => {
            (Severity::Warning, format!("Storage usage high at {:.1}%", usage))
        }
        ResourceEvent::NetworkPressure { latency } => {
            (Severity::Warning, format!("Network latency high at {:.0} ms", latency))
        }
        ResourceEvent::MemoryLimitExceeded { used, limit } => (
            Severity::Critical,
            format!("Memory use {} bytes exceeds limit {} bytes", used, limit),
        ),
        ResourceEvent::GarbageCollectionTriggered { memory_freed, .. } => (
            Severity::Info,
            format!("Memory reclamation freed {} bytes", memory_freed),
        ),
        ResourceEvent::ServiceReductionRequested { reason, level } => {
            let severity = if *level == ReductionLevel::Aggressive {
                Severity::Critical
            } else {
                Severity::Warning
            };
            (severity, format!("Service reduction requested: {}", reason))
        }
        ResourceEvent::ServiceRestorationRequested { reason } => {
            (Severity::Info, format!("Service restoration requested: {}", reason))
        }
        ResourceEvent::CpuReductionRequested { usage } => (
            Severity::Warning,
            format!("CPU reduction requested at {:.1}%", usage),
        ),
        ResourceEvent::StorageCleanupRequested { usage } => (
            Severity::Warning,
            format!("Storage cleanup requested at {:.1}%", usage),
        ),
    }
}

fn storage_summary(event: &StorageEvent) -> (Severity, String) {
    match event {
        StorageEvent::TmpfsMounted { path, size_bytes } => (
            Severity::Info,
            format!("tmpfs mounted at {} ({} bytes)", path.display(), size_bytes),
        ),
        StorageEvent::TmpfsFallback { path, reason } => (
            Severity::Warning,
            format!("{} is a plain directory: {}", path.display(), reason),
        ),
        StorageEvent::LogRotationSkipped { total_size } => (
            Severity::Info,
            format!("Log rotation skipped, {} bytes within bound", total_size),
        ),
        StorageEvent::LogRotationCompleted {
            removed_files,
            removed_size,
            ..
        } => (
            Severity::Info,
            format!(
                "Log rotation removed {} files ({} bytes)",
                removed_files.len(),
                removed_size
            ),
        ),
        StorageEvent::CleanupCompleted {
            cleaned_files,
            cleaned_size,
            ..
        } => (
            Severity::Info,
            format!("Cleanup removed {} files ({} bytes)", cleaned_files, cleaned_size),
        ),
        StorageEvent::CleanupSkipped { usage_percentage } => (
            Severity::Info,
            format!("Cleanup skipped at {:.1}% usage", usage_percentage),
        ),
        StorageEvent::ExternalStorageDetected { path } => (
            Severity::Info,
            format!("External storage available at {}", path.display()),
        ),
    }
}

fn queue_summary(event: &QueueEvent) -> (Severity, String) {
    match event {
        QueueEvent::Queued {
            id, queue_length, ..
        } => (
            Severity::Info,
            format!("Request {} queued ({} waiting)", id, queue_length),
        ),
        QueueEvent::Started { id, priority } => (
            Severity::Info,
            format!("Request {} started at priority {}", id, priority),
        ),
        QueueEvent::Completed { id, duration_ms } => (
            Severity::Info,
            format!("Request {} completed in {} ms", id, duration_ms),
        ),
        QueueEvent::Failed { id, error } => {
            (Severity::Warning, format!("Request {} failed: {}", id, error))
        }
        QueueEvent::Cancelled { id, reason, .. } => {
            (Severity::Info, format!("Request {} cancelled: {}", id, reason))
        }
        QueueEvent::Suspended { temperature } => (
            Severity::Critical,
            format!("Dispatch suspended at {:.1}°C", temperature),
        ),
        QueueEvent::ConcurrencyReduced {
            max_concurrent,
            temperature,
        } => (
            Severity::Warning,
            format!(
                "Concurrency reduced to {} at {:.1}°C",
                max_concurrent, temperature
            ),
        ),
        QueueEvent::Resumed => (Severity::Info, "Dispatch resumed".to_string()),
    }
}

fn thermal_summary(event: &ThermalEvent) -> (Severity, String) {
    match event {
        ThermalEvent::ThermalThrottling {
            temperature,
            action,
            ..
        } => (
            Severity::Warning,
            format!("Thermal throttling at {:.1}°C: {}", temperature, action),
        ),
        ThermalEvent::ThermalRecovery { temperature, .. } => (
            Severity::Info,
            format!("Thermal recovery at {:.1}°C", temperature),
        ),
        ThermalEvent::ThermalEmergency {
            temperature,
            emergency_level,
        } => (
            Severity::Emergency,
            format!(
                "Thermal emergency level {} at {:.1}°C",
                emergency_level, temperature
            ),
        ),
    }
}
