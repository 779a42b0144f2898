//! Resource governor library for single-board computers
//!
//! This crate provides the core functionality for:
//! - Host metrics sampling and pressure classification
//! - Storage optimization (log rotation, cleanup, tmpfs, wear leveling, tiered cache)
//! - Admission-controlled execution of queued work
//! - Thermal collaboration and cross-component feedback
//! - Health checks and observability

pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod fsprobe;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod persist;
pub mod queue;
pub mod storage;
pub mod thermal;

pub use config::{GovernorConfig, OrchestratorConfig};
pub use error::{GovernorError, Result};
pub use events::{GovernorEvent, Severity, SystemEvent};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{GovernorMetrics, StructuredLogger};
pub use orchestrator::{GovernorStatus, OptimizationSummary, Orchestrator, OrchestratorBuilder};
pub use queue::{AdmissionRequest, Dispatched};
pub use thermal::{ManualThermalController, SysfsThermalMonitor, ThermalController};
