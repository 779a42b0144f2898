//! Orchestrator: wires the collector, storage engine, queue and thermal
//! controller together.
//!
//! Component events are fanned in on one router task, recorded as
//! [`SystemEvent`]s and re-published as [`GovernorEvent`]s. Feedback rules
//! turn events into [`Directive`]s which a second task executes from a
//! private channel, so slow work (cleanup, reclamation) never stalls routing.

mod feedback;
mod translate;

pub use feedback::{Directive, FeedbackPolicy};
pub use translate::ComponentEvent;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::collector::{GcReport, LatencyProbe, MemoryReclaimer, MetricsCollector, ResourceEvent};
use crate::config::GovernorConfig;
use crate::error::{GovernorError, Result};
use crate::events::{EventDraft, EventHistory, EventType, GovernorEvent, Severity, SystemEvent};
use crate::fsprobe::{FilesystemProbe, SysinfoProbe};
use crate::health::{components, ComponentHealth, HealthRegistry, HealthResponse};
use crate::models::{CommandResult, PressureLevel, ResourceThresholds, SystemMetrics};
use crate::observability::{GovernorMetrics, StructuredLogger};
use crate::queue::{
    AdmissionQueue, AdmissionRequest, Dispatched, QueueEvent, QueueStatus, Recommendation,
};
use crate::storage::{
    OptimizationReport, StorageEngine, StorageEvent, StorageMetrics, WriteStatistics,
};
use crate::thermal::{ThermalController, ThermalEvent, ThermalStatus};

const GOVERNOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result of [`Orchestrator::trigger_optimization`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationSummary {
    #[serde(flatten)]
    pub result: CommandResult,
    pub storage: OptimizationReport,
    /// Present when memory usage was at or above the GC threshold
    pub garbage_collection: Option<GcReport>,
    pub thermal_checked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    pub polling: bool,
    pub interval_ms: u64,
    pub samples_taken: u64,
    pub pressure_level: PressureLevel,
    pub memory_limit: u64,
    pub thresholds: ResourceThresholds,
}

/// Snapshot returned by [`Orchestrator::get_status`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorStatus {
    pub node_name: String,
    pub version: &'static str,
    pub running: bool,
    pub collector: CollectorStatus,
    pub storage_monitoring: bool,
    pub queue: QueueStatus,
    pub thermal: ThermalStatus,
    pub health: HealthResponse,
    pub events_recorded: u64,
}

/// Builder for the orchestrator
pub struct OrchestratorBuilder {
    config: GovernorConfig,
    thermal: Option<Arc<dyn ThermalController>>,
    fs_probe: Option<Arc<dyn FilesystemProbe>>,
    latency_probe: Option<Arc<dyn LatencyProbe>>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: GovernorConfig::default(),
            thermal: None,
            fs_probe: None,
            latency_probe: None,
        }
    }

    pub fn config(mut self, config: GovernorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn thermal(mut self, controller: Arc<dyn ThermalController>) -> Self {
        self.thermal = Some(controller);
        self
    }

    pub fn filesystem_probe(mut self, probe: Arc<dyn FilesystemProbe>) -> Self {
        self.fs_probe = Some(probe);
        self
    }

    pub fn latency_probe(mut self, probe: Arc<dyn LatencyProbe>) -> Self {
        self.latency_probe = Some(probe);
        self
    }

    /// Build every component. The receiver yields dispatched requests and
    /// belongs to whatever executes them.
    pub fn build<P: Send + 'static>(
        self,
    ) -> Result<(Orchestrator<P>, mpsc::UnboundedReceiver<Dispatched<P>>)> {
        let config = self.config;
        config.validate().map_err(GovernorError::Config)?;

        let thermal = self
            .thermal
            .ok_or_else(|| GovernorError::Config("a thermal controller is required".to_string()))?;
        let fs_probe = self.fs_probe.unwrap_or_else(|| Arc::new(SysinfoProbe));

        let mut collector = MetricsCollector::builder()
            .config(config.collector.clone())
            .thresholds(config.thresholds)
            .filesystem_probe(Arc::clone(&fs_probe));
        if let Some(probe) = self.latency_probe {
            collector = collector.latency_probe(probe);
        }
        let collector = collector.build()?;

        let storage = StorageEngine::new(
            config.storage.clone(),
            fs_probe,
            collector.hardware_total_memory(),
        )?;
        let (queue, dispatch_rx) = AdmissionQueue::new(config.queue.clone())?;

        let (events_tx, _) = broadcast::channel(config.orchestrator.event_buffer.max(16));
        let (shutdown_tx, _) = broadcast::channel(1);
        let (directives_tx, directives_rx) = mpsc::unbounded_channel();

        let orchestrator = Orchestrator {
            policy: FeedbackPolicy {
                thermal_reduction_factor: config.orchestrator.thermal_reduction_factor,
                collector_adaptive: config.collector.adaptive_scaling,
            },
            history: Mutex::new(EventHistory::new(config.orchestrator.history_capacity)),
            logger: StructuredLogger::new(config.node_name.clone()),
            collector: Arc::new(collector),
            storage: Arc::new(storage),
            queue: Arc::new(queue),
            thermal,
            events_tx,
            directives_tx,
            directives_rx: std::sync::Mutex::new(Some(directives_rx)),
            shutdown_tx,
            tasks: std::sync::Mutex::new(Vec::new()),
            health: HealthRegistry::new(),
            metrics: GovernorMetrics::new(),
            started: AtomicBool::new(false),
            critical_streak: AtomicU32::new(0),
            config,
        };
        Ok((orchestrator, dispatch_rx))
    }
}

/// Owns one of each component and the feedback between them
pub struct Orchestrator<P = serde_json::Value> {
    config: GovernorConfig,
    policy: FeedbackPolicy,
    collector: Arc<MetricsCollector>,
    storage: Arc<StorageEngine>,
    queue: Arc<AdmissionQueue<P>>,
    thermal: Arc<dyn ThermalController>,
    history: Mutex<EventHistory>,
    events_tx: broadcast::Sender<GovernorEvent>,
    directives_tx: mpsc::UnboundedSender<Directive>,
    directives_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Directive>>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: std::sync::Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    health: HealthRegistry,
    metrics: GovernorMetrics,
    logger: StructuredLogger,
    started: AtomicBool,
    /// Consecutive health checks that saw critical usage
    critical_streak: AtomicU32,
}

impl<P: Send + 'static> Orchestrator<P> {
    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn queue(&self) -> &Arc<AdmissionQueue<P>> {
        &self.queue
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Externally observable event stream
    pub fn subscribe(&self) -> broadcast::Receiver<GovernorEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub async fn register_reclaimer(&self, reclaimer: Arc<dyn MemoryReclaimer>) {
        self.collector.register_reclaimer(reclaimer).await;
    }

    fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push((name, handle));
        }
    }

    fn task_active(&self, name: &str) -> bool {
        self.tasks
            .lock()
            .map(|tasks| {
                tasks
                    .iter()
                    .any(|(task, handle)| *task == name && !handle.is_finished())
            })
            .unwrap_or(false)
    }

    /// Initialize components in dependency order and start their loops
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Governor already started");
            return Ok(());
        }

        for name in components::ALL {
            self.health.register(name).await;
        }

        // Subscribe before anything runs so initialization events are routed
        let resource_rx = self.collector.subscribe();
        let storage_rx = self.storage.subscribe();
        let queue_rx = self.queue.subscribe();
        let thermal_rx = self.thermal.subscribe();
        self.spawn(
            "router",
            Arc::clone(self).route_events(
                resource_rx,
                storage_rx,
                queue_rx,
                thermal_rx,
                self.shutdown_tx.subscribe(),
            ),
        );

        let directives_rx = self
            .directives_rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .ok_or_else(|| GovernorError::Config("directive bus already taken".to_string()))?;
        self.spawn(
            "directives",
            Arc::clone(self).apply_directives(directives_rx, self.shutdown_tx.subscribe()),
        );

        self.storage.initialize().await;
        self.spawn(
            components::STORAGE,
            Arc::clone(&self.storage).run(self.shutdown_tx.subscribe()),
        );
        self.spawn(
            components::COLLECTOR,
            Arc::clone(&self.collector).run(self.shutdown_tx.subscribe()),
        );
        self.thermal.start_monitoring().await;
        self.spawn(
            components::QUEUE,
            Arc::clone(&self.queue).run(self.shutdown_tx.subscribe()),
        );
        self.spawn(
            "health",
            Arc::clone(self).health_loop(self.shutdown_tx.subscribe()),
        );

        self.health.set_ready(true).await;
        self.logger
            .log_startup(GOVERNOR_VERSION, self.collector.memory_limit());
        self.record(EventDraft::new(
            EventType::System,
            "governor_started",
            Severity::Info,
            "orchestrator",
            format!("Governor {} started", GOVERNOR_VERSION),
        ))
        .await;
        Ok(())
    }

    async fn route_events(
        self: Arc<Self>,
        mut resource_rx: broadcast::Receiver<ResourceEvent>,
        mut storage_rx: broadcast::Receiver<StorageEvent>,
        mut queue_rx: broadcast::Receiver<QueueEvent>,
        mut thermal_rx: broadcast::Receiver<ThermalEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Starting event router");
        loop {
            let received = tokio::select! {
                r = resource_rx.recv() => r.map(ComponentEvent::Resource).map_err(|e| (components::COLLECTOR, e)),
                r = storage_rx.recv() => r.map(ComponentEvent::Storage).map_err(|e| (components::STORAGE, e)),
                r = queue_rx.recv() => r.map(ComponentEvent::Queue).map_err(|e| (components::QUEUE, e)),
                r = thermal_rx.recv() => r.map(ComponentEvent::Thermal).map_err(|e| (components::THERMAL, e)),
                _ = shutdown.recv() => {
                    info!("Shutting down event router");
                    break;
                }
            };

            match received {
                Ok(event) => {
                    for directive in self.process(event).await {
                        if self.directives_tx.send(directive).is_err() {
                            warn!("Directive bus closed, dropping directive");
                        }
                    }
                }
                Err((source, RecvError::Lagged(skipped))) => {
                    warn!(source, skipped, "Event router fell behind, events dropped");
                }
                Err((source, RecvError::Closed)) => {
                    error!(source, "Event source closed, stopping router");
                    break;
                }
            }
        }
    }

    async fn apply_directives(
        self: Arc<Self>,
        mut directives: mpsc::UnboundedReceiver<Directive>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                directive = directives.recv() => match directive {
                    Some(directive) => self.apply(directive).await,
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Record, log and re-publish one component event; returns the
    /// directives its feedback rules produce
    pub async fn process(&self, event: ComponentEvent) -> Vec<Directive> {
        let directives = feedback::directives_for(&event, &self.policy);

        match &event {
            ComponentEvent::Resource(ResourceEvent::MemoryPressure { level, usage }) => {
                self.logger.log_pressure("memory", level.as_str(), *usage)
            }
            ComponentEvent::Resource(ResourceEvent::CpuPressure { usage }) => {
                self.logger.log_pressure("cpu", "critical", *usage)
            }
            ComponentEvent::Queue(QueueEvent::Cancelled { id, reason, .. }) => {
                self.logger.log_request_cancelled(id, reason)
            }
            _ => {}
        }

        if let Some(draft) = translate::draft_for(&event) {
            self.record(draft).await;
        }
        let _ = self.events_tx.send(event.into_governor_event());
        directives
    }

    /// Execute one directive against the owning component
    pub async fn apply(&self, directive: Directive) {
        debug!(directive = ?directive, "Applying directive");
        match directive {
            Directive::ScaleThresholds { reduction } => {
                let scaled = self.collector.default_thresholds().scaled_down(reduction);
                info!(
                    reduction,
                    memory_gc = scaled.memory_gc,
                    cpu_critical = scaled.cpu_critical,
                    "Scaling thresholds for thermal throttling"
                );
                self.collector.set_thresholds(scaled).await;
            }
            Directive::RestoreThresholds => self.collector.restore_thresholds().await,
            Directive::StopPolling => self.collector.stop_polling(),
            Directive::ResumePolling => self.collector.resume_polling(),
            Directive::SlowPolling => self.collector.slow_down(),
            Directive::ResetPolling => self.collector.reset_interval(),
            Directive::Cleanup(mode) => {
                self.storage.cleanup(mode).await;
            }
            Directive::GarbageCollect => {
                self.collector.garbage_collect().await;
            }
            Directive::Emergency {
                reason,
                temperature,
            } => {
                self.metrics.inc_emergencies();
                self.logger.log_emergency(&reason, temperature);
                self.record(
                    EventDraft::new(
                        EventType::System,
                        "system_emergency",
                        Severity::Emergency,
                        "orchestrator",
                        format!("System emergency: {}", reason),
                    )
                    .with_data(serde_json::json!({
                        "reason": reason,
                        "temperature": temperature,
                    })),
                )
                .await;
                let _ = self.events_tx.send(GovernorEvent::SystemEmergency {
                    reason,
                    temperature,
                });
            }
            Directive::QueueThermal(event) => self.queue.on_thermal_event(&event).await,
            Directive::QueueMetrics(metrics) => self.queue.observe_metrics(&metrics).await,
        }
    }

    async fn record(&self, draft: EventDraft) -> SystemEvent {
        let event = self.history.lock().await.record(draft);
        self.metrics.inc_events_recorded();
        let _ = self.events_tx.send(GovernorEvent::System(event.clone()));
        event
    }

    async fn health_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_millis(self.config.orchestrator.health_interval_ms.max(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_health().await;
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Flag inactive components and critical resource usage
    pub async fn check_health(&self) -> HealthResponse {
        let critical = self.config.orchestrator.critical_usage_percent;
        let latest = self.collector.latest().await;
        let over = latest.as_ref().and_then(|metrics| {
            let memory = metrics.memory.usage_ratio() * 100.0;
            let cpu = metrics.cpu.usage;
            (memory >= critical || cpu >= critical).then_some((memory, cpu))
        });
        let streak = if over.is_some() {
            self.critical_streak.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.critical_streak.store(0, Ordering::SeqCst);
            0
        };
        // A single sample over the line is not yet sustained
        let high_usage = over.filter(|_| streak >= self.config.orchestrator.critical_checks);

        if let Some((memory, cpu)) = high_usage {
            self.record(
                EventDraft::new(
                    EventType::Resource,
                    "critical_usage",
                    Severity::Critical,
                    "orchestrator",
                    format!("Resource usage critical: memory {:.1}%, cpu {:.1}%", memory, cpu),
                )
                .with_data(serde_json::json!({ "memory": memory, "cpu": cpu })),
            )
            .await;
        }

        let collector = if !self.task_active(components::COLLECTOR) {
            ComponentHealth::unhealthy("sampling loop not running")
        } else if let Some((memory, cpu)) = high_usage {
            ComponentHealth::degraded(format!(
                "memory {:.1}%, cpu {:.1}% at or above {:.0}%",
                memory, cpu, critical
            ))
        } else if !self.collector.is_polling() {
            ComponentHealth::degraded("polling halted")
        } else {
            ComponentHealth::healthy()
        };
        self.health.update(components::COLLECTOR, collector).await;

        let storage = if self.storage.is_monitoring() {
            ComponentHealth::healthy()
        } else {
            ComponentHealth::unhealthy("storage monitoring not running")
        };
        self.health.update(components::STORAGE, storage).await;

        let queue = if self.queue.is_running() {
            ComponentHealth::healthy()
        } else {
            ComponentHealth::unhealthy("dispatch loop not running")
        };
        self.health.update(components::QUEUE, queue).await;

        let thermal = if self.thermal.is_monitoring() {
            ComponentHealth::healthy()
        } else {
            ComponentHealth::unhealthy("thermal monitoring stopped")
        };
        self.health.update(components::THERMAL, thermal).await;

        self.health.health().await
    }

    /// Storage optimization, reclamation when memory is high, and a forced
    /// thermal check
    pub async fn trigger_optimization(&self) -> OptimizationSummary {
        info!("Manual optimization requested");
        let storage = self.storage.optimize().await;
        self.logger.log_storage_optimization(
            storage.rotation.removed_count(),
            storage.rotation.removed_size(),
            storage.cleanup.cleaned_files,
            storage.cleanup.cleaned_size,
        );

        let metrics = self.collector.get_metrics().await;
        let gc_threshold = self.collector.thresholds().await.memory_gc;
        let garbage_collection = if metrics.memory.usage_ratio() >= gc_threshold {
            Some(self.collector.garbage_collect().await)
        } else {
            None
        };

        self.thermal.force_thermal_check().await;

        let mut message = format!(
            "Optimization complete: {} log files removed, {} files cleaned",
            storage.rotation.removed_count(),
            storage.cleanup.cleaned_files
        );
        if let Some(gc) = &garbage_collection {
            message.push_str(&format!(", {} bytes reclaimed", gc.freed));
        }

        OptimizationSummary {
            result: CommandResult::ok(message),
            storage,
            garbage_collection,
            thermal_checked: true,
        }
    }

    pub async fn get_metrics(&self) -> SystemMetrics {
        self.collector.get_metrics().await
    }

    pub async fn get_status(&self) -> GovernorStatus {
        let collector = CollectorStatus {
            polling: self.collector.is_polling(),
            interval_ms: self.collector.current_interval().as_millis() as u64,
            samples_taken: self.collector.samples_taken(),
            pressure_level: self.collector.pressure_level().await,
            memory_limit: self.collector.memory_limit(),
            thresholds: self.collector.thresholds().await,
        };

        GovernorStatus {
            node_name: self.config.node_name.clone(),
            version: GOVERNOR_VERSION,
            running: self.is_running(),
            collector,
            storage_monitoring: self.storage.is_monitoring(),
            queue: self.queue.status().await,
            thermal: self.thermal.status().await,
            health: self.health.health().await,
            events_recorded: self.history.lock().await.total_recorded(),
        }
    }

    /// Most recent `limit` events, oldest first
    pub async fn get_recent_events(&self, limit: usize) -> Vec<SystemEvent> {
        self.history.lock().await.recent(limit)
    }

    pub async fn get_queue_status(&self) -> QueueStatus {
        self.queue.status().await
    }

    pub async fn get_write_statistics(&self) -> WriteStatistics {
        self.storage.write_statistics().await
    }

    pub async fn get_storage_metrics(&self) -> StorageMetrics {
        self.storage.storage_metrics().await
    }

    pub async fn submit(&self, request: AdmissionRequest<P>) -> Result<()> {
        self.queue.submit(request).await
    }

    pub async fn cancel_execution(&self, id: &str) -> CommandResult {
        self.queue.cancel(id).await
    }

    pub async fn complete_execution(&self, id: &str) -> Result<()> {
        self.queue.complete(id).await
    }

    pub async fn fail_execution(&self, id: &str, error: impl Into<String>) -> Result<()> {
        self.queue.fail(id, error).await
    }

    pub async fn recommendations(&self, estimated_size: Option<u64>) -> Vec<Recommendation> {
        self.queue.recommendations(estimated_size).await
    }

    /// Drain the queue, stop every loop, flush storage state and stop the
    /// thermal controller
    pub async fn shutdown(&self, reason: &str) -> anyhow::Result<()> {
        self.logger.log_shutdown(reason);
        self.health.set_ready(false).await;

        let queue_result = self.queue.shutdown().await;
        if let Ok(snapshot) = &queue_result {
            info!(
                cancelled = snapshot.cancelled_at_shutdown.len(),
                still_running = snapshot.still_running.len(),
                "Queue drained"
            );
        }

        let _ = self.shutdown_tx.send(());
        let tasks = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Task ended abnormally");
            }
        }

        let storage_result = self.storage.shutdown().await;
        self.thermal.stop_monitoring().await;
        self.started.store(false, Ordering::SeqCst);
        info!("Governor stopped");

        queue_result?;
        storage_result
    }
}

#[cfg(test)]
mod tests;
