use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::advice::{self, PressureView, Recommendation};
use super::{AdmissionRequest, CancelReason, QueueConfig, QueueEvent, RequestStatus};
use crate::error::{GovernorError, Result};
use crate::models::{CommandResult, SystemMetrics};
use crate::observability::GovernorMetrics;
use crate::persist;
use crate::thermal::ThermalEvent;

/// Requests at or below this priority are shed under resource pressure
const SHEDDABLE_PRIORITY: u8 = 3;
/// Requests shed per pressure signal
const SHED_PER_SIGNAL: usize = 2;

/// A request handed to the executor
#[derive(Debug)]
pub struct Dispatched<P> {
    pub request: AdmissionRequest<P>,
    /// Flips to `true` if the queue cancels the request while it runs
    pub cancelled: watch::Receiver<bool>,
}

impl<P> Dispatched<P> {
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

/// Aggregate lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounters {
    pub submitted: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub evicted: u64,
    pub timed_out: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSummary {
    pub id: String,
    pub priority: u8,
    pub thermal_sensitive: bool,
    pub waited_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub enabled: bool,
    pub queue_length: usize,
    pub active_count: usize,
    pub max_queue_size: usize,
    pub max_concurrent: usize,
    pub effective_concurrency: usize,
    pub suspended: bool,
    pub thermally_reduced: bool,
    pub counters: QueueCounters,
    pub queued: Vec<QueuedSummary>,
    pub active: Vec<String>,
}

/// Written to `snapshot_path` on shutdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub taken_at: DateTime<Utc>,
    pub counters: QueueCounters,
    pub cancelled_at_shutdown: Vec<String>,
    pub still_running: Vec<String>,
}

struct QueuedEntry<P> {
    request: AdmissionRequest<P>,
    enqueued: Instant,
}

struct ActiveEntry {
    id: String,
    priority: u8,
    thermal_sensitive: bool,
    started: Instant,
    cancel_tx: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct ThermalGate {
    suspended: bool,
    reduced: bool,
    /// Set once a recovery below the reduce temperature is seen
    recovery_started: Option<Instant>,
}

struct QueueState<P> {
    queued: Vec<QueuedEntry<P>>,
    active: Vec<ActiveEntry>,
    effective_concurrency: usize,
    gate: ThermalGate,
    counters: QueueCounters,
    memory_ratio: f64,
    cpu_ratio: f64,
    closed: bool,
}

/// Bounded priority queue with thermal and resource aware dispatch
pub struct AdmissionQueue<P> {
    config: QueueConfig,
    state: Mutex<QueueState<P>>,
    dispatch_tx: mpsc::UnboundedSender<Dispatched<P>>,
    events_tx: broadcast::Sender<QueueEvent>,
    running: AtomicBool,
    metrics: GovernorMetrics,
}

fn lowest_priority<P>(queued: &[QueuedEntry<P>]) -> Option<usize> {
    // min_by_key keeps the first of equal elements: earliest in queue order
    queued
        .iter()
        .enumerate()
        .min_by_key(|(_, e)| e.request.priority)
        .map(|(i, _)| i)
}

fn highest_priority<P>(queued: &[QueuedEntry<P>]) -> Option<usize> {
    queued
        .iter()
        .enumerate()
        .min_by_key(|(_, e)| Reverse(e.request.priority))
        .map(|(i, _)| i)
}

impl<P: Send + 'static> AdmissionQueue<P> {
    /// Create the queue and the receiving end the executor reads from
    pub fn new(config: QueueConfig) -> Result<(Self, mpsc::UnboundedReceiver<Dispatched<P>>)> {
        config.validate().map_err(GovernorError::Config)?;

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(config.event_buffer.max(16));

        let queue = Self {
            state: Mutex::new(QueueState {
                queued: Vec::with_capacity(config.max_queue_size),
                active: Vec::with_capacity(config.max_concurrent),
                effective_concurrency: config.max_concurrent,
                gate: ThermalGate::default(),
                counters: QueueCounters::default(),
                memory_ratio: 0.0,
                cpu_ratio: 0.0,
                closed: false,
            }),
            dispatch_tx,
            events_tx,
            running: AtomicBool::new(false),
            metrics: GovernorMetrics::new(),
            config,
        };
        Ok((queue, dispatch_rx))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events_tx.subscribe()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn publish(&self, event: QueueEvent) {
        let _ = self.events_tx.send(event);
    }

    fn record_depth(&self, state: &QueueState<P>) {
        self.metrics
            .set_queue_depth(state.queued.len() as i64, state.active.len() as i64);
    }

    fn cancel_queued(&self, state: &mut QueueState<P>, index: usize, reason: CancelReason) -> String {
        let entry = state.queued.remove(index);
        let id = entry.request.id;

        state.counters.cancelled += 1;
        match reason {
            CancelReason::QueueFull => state.counters.evicted += 1,
            CancelReason::Timeout => state.counters.timed_out += 1,
            _ => {}
        }
        self.metrics.inc_queue_cancelled(reason.as_str());
        debug!(request_id = %id, reason = %reason, "Cancelled queued request");
        self.publish(QueueEvent::Cancelled {
            id: id.clone(),
            reason: reason.as_str().to_string(),
            was_running: false,
        });
        id
    }

    fn cancel_active(&self, state: &mut QueueState<P>, index: usize, reason: CancelReason) {
        let entry = state.active.remove(index);
        let _ = entry.cancel_tx.send(true);

        state.counters.cancelled += 1;
        self.metrics.inc_queue_cancelled(reason.as_str());
        info!(request_id = %entry.id, reason = %reason, "Cancelled running request");
        self.publish(QueueEvent::Cancelled {
            id: entry.id,
            reason: reason.as_str().to_string(),
            was_running: true,
        });
    }

    /// Admit a request, evicting the lowest-priority queued one when full
    pub async fn submit(&self, mut request: AdmissionRequest<P>) -> Result<()> {
        if !self.config.enabled {
            return Err(GovernorError::QueueDisabled);
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(GovernorError::QueueDisabled);
        }
        if state.queued.iter().any(|e| e.request.id == request.id)
            || state.active.iter().any(|a| a.id == request.id)
        {
            return Err(GovernorError::DuplicateRequest(request.id));
        }
        if self.config.max_queue_size == 0 {
            return Err(GovernorError::QueueFull { capacity: 0 });
        }

        if state.queued.len() >= self.config.max_queue_size {
            if let Some(victim) = lowest_priority(&state.queued) {
                self.cancel_queued(&mut state, victim, CancelReason::QueueFull);
            }
        }

        request.priority = request.priority.clamp(1, self.config.priority_levels);
        request.status = RequestStatus::Queued;
        request.queued_at = Utc::now();

        let id = request.id.clone();
        let priority = request.priority;
        state.queued.push(QueuedEntry {
            request,
            enqueued: Instant::now(),
        });
        state.counters.submitted += 1;

        debug!(request_id = %id, priority, queue_length = state.queued.len(), "Request queued");
        self.publish(QueueEvent::Queued {
            id,
            priority,
            queue_length: state.queued.len(),
        });
        self.record_depth(&state);
        Ok(())
    }

    /// One scheduling pass: timeouts, thermal recovery, then dispatch
    pub async fn tick(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let timeout = Duration::from_millis(self.config.item_timeout_ms);
        let mut index = 0;
        while index < state.queued.len() {
            if now.duration_since(state.queued[index].enqueued) >= timeout {
                self.cancel_queued(&mut state, index, CancelReason::Timeout);
            } else {
                index += 1;
            }
        }

        let cooldown = Duration::from_millis(self.config.thermal_cooldown_ms);
        if let Some(since) = state.gate.recovery_started {
            if now.duration_since(since) >= cooldown {
                state.gate = ThermalGate::default();
                state.effective_concurrency = self.config.max_concurrent;
                info!(
                    max_concurrent = self.config.max_concurrent,
                    "Thermal cooldown elapsed, dispatch resumed"
                );
                self.publish(QueueEvent::Resumed);
            }
        }

        while !state.gate.suspended && state.active.len() < state.effective_concurrency {
            let Some(index) = highest_priority(&state.queued) else {
                break;
            };
            let entry = state.queued.remove(index);
            self.start(&mut state, entry.request);
        }

        self.record_depth(&state);
    }

    fn start(&self, state: &mut QueueState<P>, mut request: AdmissionRequest<P>) {
        request.status = RequestStatus::Running;
        request.started_at = Some(Utc::now());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let id = request.id.clone();
        let priority = request.priority;
        state.active.push(ActiveEntry {
            id: id.clone(),
            priority,
            thermal_sensitive: request.thermal_sensitive,
            started: Instant::now(),
            cancel_tx,
        });
        state.counters.started += 1;
        self.publish(QueueEvent::Started {
            id: id.clone(),
            priority,
        });

        let dispatched = Dispatched {
            request,
            cancelled: cancel_rx,
        };
        if self.dispatch_tx.send(dispatched).is_err() {
            warn!(request_id = %id, "No executor attached, failing request");
            state.active.retain(|a| a.id != id);
            state.counters.failed += 1;
            self.publish(QueueEvent::Failed {
                id,
                error: "no executor attached".to_string(),
            });
        }
    }

    /// Apply a thermal signal from the thermal controller
    pub async fn on_thermal_event(&self, event: &ThermalEvent) {
        match event {
            ThermalEvent::ThermalThrottling { temperature, .. }
            | ThermalEvent::ThermalEmergency { temperature, .. } => {
                self.apply_temperature(*temperature).await
            }
            ThermalEvent::ThermalRecovery { temperature, .. } => {
                self.begin_recovery(*temperature).await
            }
        }
    }

    async fn apply_temperature(&self, temperature: f64) {
        let mut state = self.state.lock().await;

        if temperature >= self.config.thermal_pause_temp {
            state.gate.recovery_started = None;
            if !state.gate.suspended {
                state.gate.suspended = true;
                warn!(temperature, "Suspending dispatch for thermal protection");
                self.publish(QueueEvent::Suspended { temperature });
            }

            let mut index = 0;
            while index < state.queued.len() {
                if state.queued[index].request.thermal_sensitive {
                    self.cancel_queued(&mut state, index, CancelReason::ThermalProtection);
                } else {
                    index += 1;
                }
            }
        } else if temperature >= self.config.thermal_reduce_temp {
            state.gate.recovery_started = None;
            state.gate.reduced = true;

            let reduced = (self.config.max_concurrent / 2).max(1);
            if state.effective_concurrency != reduced {
                state.effective_concurrency = reduced;
                info!(temperature, max_concurrent = reduced, "Reducing concurrency");
                self.publish(QueueEvent::ConcurrencyReduced {
                    max_concurrent: reduced,
                    temperature,
                });
            }

            while state.active.len() > reduced {
                let victim = state
                    .active
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| a.thermal_sensitive)
                    .min_by_key(|(_, a)| a.priority)
                    .map(|(i, _)| i);
                let Some(victim) = victim else {
                    break;
                };
                self.cancel_active(&mut state, victim, CancelReason::ThermalProtection);
            }
        }

        self.record_depth(&state);
    }

    async fn begin_recovery(&self, temperature: f64) {
        let mut state = self.state.lock().await;
        if temperature >= self.config.thermal_reduce_temp {
            debug!(temperature, "Recovery reported above reduce temperature, ignoring");
            return;
        }
        if (state.gate.suspended || state.gate.reduced) && state.gate.recovery_started.is_none() {
            info!(
                temperature,
                cooldown_ms = self.config.thermal_cooldown_ms,
                "Thermal recovery, starting cooldown"
            );
            state.gate.recovery_started = Some(Instant::now());
        }
    }

    /// Track the latest sample; shed low-priority work under heavy pressure
    pub async fn observe_metrics(&self, metrics: &SystemMetrics) {
        let mut state = self.state.lock().await;
        state.memory_ratio = metrics.memory.usage_ratio();
        state.cpu_ratio = metrics.cpu.usage / 100.0;

        let threshold = self.config.resource_pressure_percent;
        if state.memory_ratio * 100.0 < threshold && metrics.cpu.usage < threshold {
            return;
        }

        for _ in 0..SHED_PER_SIGNAL {
            let victim = state
                .queued
                .iter()
                .enumerate()
                .filter(|(_, e)| e.request.priority <= SHEDDABLE_PRIORITY)
                .min_by_key(|(_, e)| e.request.priority)
                .map(|(i, _)| i);
            let Some(victim) = victim else {
                break;
            };
            self.cancel_queued(&mut state, victim, CancelReason::ResourcePressure);
        }
        self.record_depth(&state);
    }

    /// Cancel a queued or running request on behalf of a caller
    pub async fn cancel(&self, id: &str) -> CommandResult {
        let mut state = self.state.lock().await;

        if let Some(index) = state.queued.iter().position(|e| e.request.id == id) {
            self.cancel_queued(&mut state, index, CancelReason::User);
            self.record_depth(&state);
            return CommandResult::ok(format!("request {} cancelled", id));
        }
        if let Some(index) = state.active.iter().position(|a| a.id == id) {
            self.cancel_active(&mut state, index, CancelReason::User);
            self.record_depth(&state);
            return CommandResult::ok(format!("running request {} cancelled", id));
        }
        CommandResult::failed(format!("request {} not found or already finished", id))
    }

    async fn finish(&self, id: &str, outcome: RequestStatus, error: Option<String>) -> Result<()> {
        let mut state = self.state.lock().await;

        let Some(index) = state.active.iter().position(|a| a.id == id) else {
            if state.queued.iter().any(|e| e.request.id == id) {
                return Err(GovernorError::InvalidTransition {
                    id: id.to_string(),
                    from: RequestStatus::Queued.as_str(),
                    to: outcome.as_str(),
                });
            }
            return Err(GovernorError::NotFound(id.to_string()));
        };

        let entry = state.active.remove(index);
        let duration_ms = entry.started.elapsed().as_millis() as u64;
        match error {
            None => {
                state.counters.completed += 1;
                self.metrics.inc_queue_completed();
                debug!(request_id = %id, duration_ms, "Request completed");
                self.publish(QueueEvent::Completed {
                    id: entry.id,
                    duration_ms,
                });
            }
            Some(error) => {
                state.counters.failed += 1;
                warn!(request_id = %id, error = %error, "Request failed");
                self.publish(QueueEvent::Failed {
                    id: entry.id,
                    error,
                });
            }
        }
        self.record_depth(&state);
        Ok(())
    }

    /// Mark a running request as completed
    pub async fn complete(&self, id: &str) -> Result<()> {
        self.finish(id, RequestStatus::Completed, None).await
    }

    pub async fn fail(&self, id: &str, error: impl Into<String>) -> Result<()> {
        self.finish(id, RequestStatus::Failed, Some(error.into()))
            .await
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        let now = Instant::now();
        QueueStatus {
            enabled: self.config.enabled,
            queue_length: state.queued.len(),
            active_count: state.active.len(),
            max_queue_size: self.config.max_queue_size,
            max_concurrent: self.config.max_concurrent,
            effective_concurrency: state.effective_concurrency,
            suspended: state.gate.suspended,
            thermally_reduced: state.gate.reduced,
            counters: state.counters,
            queued: state
                .queued
                .iter()
                .map(|e| QueuedSummary {
                    id: e.request.id.clone(),
                    priority: e.request.priority,
                    thermal_sensitive: e.request.thermal_sensitive,
                    waited_ms: now.duration_since(e.enqueued).as_millis() as u64,
                })
                .collect(),
            active: state.active.iter().map(|a| a.id.clone()).collect(),
        }
    }

    /// Non-binding advice for a caller about to submit work
    pub async fn recommendations(&self, estimated_size: Option<u64>) -> Vec<Recommendation> {
        let view = {
            let state = self.state.lock().await;
            PressureView {
                memory_ratio: state.memory_ratio,
                cpu_ratio: state.cpu_ratio,
                thermally_reduced: state.gate.reduced,
                suspended: state.gate.suspended,
                active: state.active.len(),
                effective_concurrency: state.effective_concurrency,
            }
        };
        advice::recommendations(&view, &self.config, estimated_size)
    }

    /// Dispatch loop until `shutdown` fires
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_millis(self.config.tick_interval_ms.max(1));
        info!(
            interval_ms = period.as_millis() as u64,
            max_concurrent = self.config.max_concurrent,
            "Starting queue dispatch loop"
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.running.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    info!("Shutting down queue dispatch loop");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Cancel everything still queued and write the snapshot if configured
    pub async fn shutdown(&self) -> anyhow::Result<QueueSnapshot> {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.closed = true;

            let mut cancelled = Vec::with_capacity(state.queued.len());
            while !state.queued.is_empty() {
                cancelled.push(self.cancel_queued(&mut state, 0, CancelReason::Shutdown));
            }
            self.record_depth(&state);

            QueueSnapshot {
                taken_at: Utc::now(),
                counters: state.counters,
                cancelled_at_shutdown: cancelled,
                still_running: state.active.iter().map(|a| a.id.clone()).collect(),
            }
        };

        if let Some(path) = &self.config.snapshot_path {
            persist::save_json(path, &snapshot)
                .with_context(|| format!("Failed to write queue snapshot to {:?}", path))?;
            info!(path = %path.display(), "Queue snapshot written");
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CpuMetrics, DiskMetrics, MemoryMetrics, NetworkMetrics, GIB};
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn config(capacity: usize, concurrent: usize) -> QueueConfig {
        QueueConfig {
            max_queue_size: capacity,
            max_concurrent: concurrent,
            ..Default::default()
        }
    }

    fn request(id: &str, priority: u8) -> AdmissionRequest<u32> {
        AdmissionRequest::new(id, priority, 0)
    }

    fn drain(rx: &mut broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn throttle(temperature: f64) -> ThermalEvent {
        ThermalEvent::ThermalThrottling {
            temperature,
            threshold: 70.0,
            action: "reduce_cpu_frequency".to_string(),
            reduction_level: 0.3,
        }
    }

    #[tokio::test]
    async fn test_full_queue_evicts_lowest_priority() {
        let (queue, _rx) = AdmissionQueue::new(config(3, 1)).unwrap();
        let mut events = queue.subscribe();

        for (id, priority) in [("a", 1), ("b", 1), ("c", 1), ("d", 9)] {
            assert_ok!(queue.submit(request(id, priority)).await);
        }

        let status = queue.status().await;
        let ids: Vec<&str> = status.queued.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
        assert_eq!(status.counters.evicted, 1);

        let cancelled: Vec<QueueEvent> = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, QueueEvent::Cancelled { .. }))
            .collect();
        assert_eq!(
            cancelled,
            vec![QueueEvent::Cancelled {
                id: "a".to_string(),
                reason: "queue full".to_string(),
                was_running: false,
            }]
        );
    }

    #[tokio::test]
    async fn test_dispatch_highest_priority_first_fifo_on_ties() {
        let (queue, mut rx) = AdmissionQueue::new(config(10, 2)).unwrap();
        for (id, priority) in [("low", 3), ("first-nine", 9), ("mid", 5), ("second-nine", 9)] {
            queue.submit(request(id, priority)).await.unwrap();
        }

        queue.tick().await;

        assert_eq!(rx.try_recv().unwrap().request.id, "first-nine");
        assert_eq!(rx.try_recv().unwrap().request.id, "second-nine");
        assert!(rx.try_recv().is_err());

        queue.complete("first-nine").await.unwrap();
        queue.tick().await;
        let next = rx.try_recv().unwrap();
        assert_eq!(next.request.id, "mid");
        assert_eq!(next.request.status, RequestStatus::Running);
    }

    #[tokio::test]
    async fn test_duplicate_and_disabled_rejections() {
        let (queue, _rx) = AdmissionQueue::new(config(5, 1)).unwrap();
        queue.submit(request("job", 5)).await.unwrap();
        assert!(matches!(
            queue.submit(request("job", 5)).await,
            Err(GovernorError::DuplicateRequest(_))
        ));

        let disabled = QueueConfig {
            enabled: false,
            ..Default::default()
        };
        let (queue, _rx) = AdmissionQueue::<u32>::new(disabled).unwrap();
        assert!(matches!(
            queue.submit(request("job", 5)).await,
            Err(GovernorError::QueueDisabled)
        ));
    }

    #[tokio::test]
    async fn test_priority_clamped_to_levels() {
        let (queue, _rx) = AdmissionQueue::new(config(5, 1)).unwrap();
        queue.submit(request("zero", 0)).await.unwrap();
        queue.submit(request("huge", 200)).await.unwrap();

        let status = queue.status().await;
        assert_eq!(status.queued[0].priority, 1);
        assert_eq!(status.queued[1].priority, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_eviction() {
        let (queue, mut rx) = AdmissionQueue::new(config(5, 1)).unwrap();
        queue.submit(request("slow", 5)).await.unwrap();

        tokio::time::advance(Duration::from_millis(300_001)).await;
        queue.tick().await;

        assert!(rx.try_recv().is_err());
        let status = queue.status().await;
        assert_eq!(status.queue_length, 0);
        assert_eq!(status.counters.timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_temperature_suspends_until_cooldown() {
        let (queue, mut rx) = AdmissionQueue::new(config(5, 2)).unwrap();
        queue
            .submit(request("sensitive", 5).thermal_sensitive(true))
            .await
            .unwrap();
        queue.submit(request("robust", 5)).await.unwrap();

        queue.on_thermal_event(&throttle(80.0)).await;
        let status = queue.status().await;
        assert!(status.suspended);
        assert_eq!(status.queued.len(), 1);
        assert_eq!(status.queued[0].id, "robust");

        queue.tick().await;
        assert!(rx.try_recv().is_err());

        // Recovery above the reduce temperature does not start the cooldown
        queue
            .on_thermal_event(&ThermalEvent::ThermalRecovery {
                temperature: 72.0,
                threshold: 70.0,
            })
            .await;
        tokio::time::advance(Duration::from_millis(40_000)).await;
        queue.tick().await;
        assert!(rx.try_recv().is_err());

        queue
            .on_thermal_event(&ThermalEvent::ThermalRecovery {
                temperature: 60.0,
                threshold: 70.0,
            })
            .await;
        tokio::time::advance(Duration::from_millis(29_000)).await;
        queue.tick().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(1_000)).await;
        queue.tick().await;
        assert_eq!(rx.try_recv().unwrap().request.id, "robust");
        assert!(!queue.status().await.suspended);
    }

    #[tokio::test]
    async fn test_reduce_temperature_halves_concurrency() {
        let (queue, mut rx) = AdmissionQueue::new(config(10, 4)).unwrap();
        queue
            .submit(request("hot-low", 1).thermal_sensitive(true))
            .await
            .unwrap();
        queue
            .submit(request("hot-mid", 4).thermal_sensitive(true))
            .await
            .unwrap();
        queue.submit(request("cool-a", 6)).await.unwrap();
        queue.submit(request("cool-b", 7)).await.unwrap();
        queue.tick().await;

        let mut dispatched = Vec::new();
        while let Ok(item) = rx.try_recv() {
            dispatched.push(item);
        }
        assert_eq!(dispatched.len(), 4);

        queue.on_thermal_event(&throttle(72.0)).await;

        let status = queue.status().await;
        assert_eq!(status.effective_concurrency, 2);
        assert_eq!(status.active, vec!["cool-b".to_string(), "cool-a".to_string()]);
        let hot_low = dispatched
            .iter()
            .find(|d| d.request.id == "hot-low")
            .unwrap();
        assert!(hot_low.is_cancelled());
        assert_err!(queue.complete("hot-low").await);
    }

    #[tokio::test]
    async fn test_resource_pressure_sheds_two_low_priority_items() {
        let (queue, _rx) = AdmissionQueue::new(config(10, 1)).unwrap();
        for (id, priority) in [("p2", 2), ("p8", 8), ("p1", 1), ("p3", 3)] {
            queue.submit(request(id, priority)).await.unwrap();
        }

        let metrics = SystemMetrics {
            timestamp: Utc::now(),
            cpu: CpuMetrics::default(),
            memory: MemoryMetrics {
                total: GIB,
                used: GIB / 100 * 95,
                available: GIB - GIB / 100 * 95,
                swap_used: 0,
            },
            storage: DiskMetrics::default(),
            network: NetworkMetrics::default(),
        };
        queue.observe_metrics(&metrics).await;

        let ids: Vec<String> = queue.status().await.queued.into_iter().map(|q| q.id).collect();
        assert_eq!(ids, vec!["p8".to_string(), "p3".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_command_results() {
        let (queue, mut rx) = AdmissionQueue::new(config(5, 1)).unwrap();
        queue.submit(request("run", 9)).await.unwrap();
        queue.submit(request("wait", 1)).await.unwrap();
        queue.tick().await;
        let running = rx.try_recv().unwrap();

        assert!(queue.cancel("wait").await.success);
        assert!(queue.cancel("run").await.success);
        assert!(running.is_cancelled());
        assert!(!queue.cancel("run").await.success);
        assert!(!queue.cancel("unknown").await.success);
    }

    #[tokio::test]
    async fn test_completion_requires_running() {
        let (queue, _rx) = AdmissionQueue::new(config(5, 1)).unwrap();
        queue.submit(request("queued", 5)).await.unwrap();

        assert!(matches!(
            queue.complete("queued").await,
            Err(GovernorError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.fail("ghost", "boom").await,
            Err(GovernorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_and_writes_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot_path = temp_dir.path().join("queue.json");
        let (queue, mut rx) = AdmissionQueue::new(QueueConfig {
            max_concurrent: 1,
            snapshot_path: Some(snapshot_path.clone()),
            ..Default::default()
        })
        .unwrap();
        queue.submit(request("running", 9)).await.unwrap();
        queue.submit(request("left-a", 5)).await.unwrap();
        queue.submit(request("left-b", 5)).await.unwrap();
        queue.tick().await;
        let _running = rx.try_recv().unwrap();

        let snapshot = queue.shutdown().await.unwrap();

        assert_eq!(snapshot.cancelled_at_shutdown, vec!["left-a", "left-b"]);
        assert_eq!(snapshot.still_running, vec!["running"]);
        let stored: QueueSnapshot = persist::load_json(&snapshot_path).unwrap();
        assert_eq!(stored, snapshot);
        assert!(matches!(
            queue.submit(request("late", 5)).await,
            Err(GovernorError::QueueDisabled)
        ));
    }

    #[tokio::test]
    async fn test_dropped_executor_fails_dispatch() {
        let (queue, rx) = AdmissionQueue::new(config(5, 1)).unwrap();
        drop(rx);
        queue.submit(request("orphan", 5)).await.unwrap();
        queue.tick().await;

        let status = queue.status().await;
        assert_eq!(status.active_count, 0);
        assert_eq!(status.counters.failed, 1);
    }
}
