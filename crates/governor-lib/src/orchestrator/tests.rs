use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::fs;
use tokio::sync::mpsc;

use super::*;
use crate::collector::{CollectorConfig, FixedLatency, HostPaths};
use crate::fsprobe::StaticProbe;
use crate::health::ComponentStatus;
use crate::models::{ReductionLevel, GIB};
use crate::storage::{CleanupMode, StorageConfig};
use crate::thermal::{ManualThermalController, SysfsThermalMonitor};

type TestOrchestrator = Arc<Orchestrator<String>>;

async fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    fs::write(path, content).await.unwrap();
}

/// Minimal host: CPU counters and memory with the given kB figures
async fn mock_host(root: &Path, total_kb: u64, available_kb: u64) -> HostPaths {
    let proc_root = root.join("proc");
    write(&proc_root, "stat", "cpu  100 0 50 800 50 0 0 0 0 0\n").await;
    write(
        &proc_root,
        "meminfo",
        &format!(
            "MemTotal:       {} kB\nMemAvailable:   {} kB\nSwapTotal:      0 kB\nSwapFree:       0 kB\n",
            total_kb, available_kb
        ),
    )
    .await;
    HostPaths::new(proc_root, root.join("sys"))
}

fn test_config(root: &Path, host: HostPaths) -> GovernorConfig {
    let mut config = GovernorConfig {
        node_name: "test-board".to_string(),
        ..Default::default()
    };
    config.collector = CollectorConfig {
        interval_ms: 50,
        cpu_sample_window_ms: 1,
        hardware_total_memory: Some(2 * GIB),
        monitored_path: root.to_path_buf(),
        host_paths: host,
        ..Default::default()
    };
    config.storage = StorageConfig {
        tmpfs_enabled: false,
        tmpfs_mounts: vec![root.join("tmpfs")],
        log_dirs: vec![root.join("logs")],
        cache_dirs: vec![root.join("cache")],
        external_paths: vec![root.join("usb")],
        wear_leveling_paths: vec![root.join("w0"), root.join("w1")],
        default_write_path: root.join("data"),
        monitored_path: root.to_path_buf(),
        mounts_file: root.join("mounts"),
        state_path: None,
        ..Default::default()
    };
    config.queue.tick_interval_ms = 10;
    config
}

fn build(
    config: GovernorConfig,
) -> (
    TestOrchestrator,
    mpsc::UnboundedReceiver<Dispatched<String>>,
    Arc<ManualThermalController>,
) {
    let thermal = Arc::new(ManualThermalController::new());
    let (orchestrator, dispatch_rx) = OrchestratorBuilder::new()
        .config(config)
        .thermal(thermal.clone())
        .filesystem_probe(Arc::new(StaticProbe::with_percent(16 * GIB, 40.0)))
        .latency_probe(Arc::new(FixedLatency(Some(12.0))))
        .build::<String>()
        .unwrap();
    (Arc::new(orchestrator), dispatch_rx, thermal)
}

type Fixture = (
    TempDir,
    TestOrchestrator,
    mpsc::UnboundedReceiver<Dispatched<String>>,
    Arc<ManualThermalController>,
);

async fn setup(total_kb: u64, available_kb: u64) -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let host = mock_host(temp_dir.path(), total_kb, available_kb).await;
    let (orchestrator, rx, thermal) = build(test_config(temp_dir.path(), host));
    (temp_dir, orchestrator, rx, thermal)
}

async fn feed(orchestrator: &TestOrchestrator, event: ComponentEvent) {
    for directive in orchestrator.process(event).await {
        orchestrator.apply(directive).await;
    }
}

fn throttling(temperature: f64, reduction_level: f64) -> ComponentEvent {
    ComponentEvent::Thermal(ThermalEvent::ThermalThrottling {
        temperature,
        threshold: 70.0,
        action: "reduce_cpu_frequency".to_string(),
        reduction_level,
    })
}

async fn wait_for_event(orchestrator: &TestOrchestrator, subtype: &str) -> bool {
    for _ in 0..500 {
        let events = orchestrator.get_recent_events(1000).await;
        if events.iter().any(|e| e.subtype == subtype) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[test]
fn test_build_requires_thermal_controller() {
    let result = OrchestratorBuilder::new()
        .filesystem_probe(Arc::new(StaticProbe::new(None)))
        .build::<String>();
    assert!(matches!(result, Err(GovernorError::Config(_))));
}

#[tokio::test]
async fn test_throttling_scales_thresholds_and_recovery_restores() {
    let (_dir, orchestrator, _rx, _thermal) = setup(2_000_000, 1_000_000).await;
    let defaults = orchestrator.collector().default_thresholds();

    feed(&orchestrator, throttling(74.0, 0.25)).await;
    let scaled = orchestrator.collector().thresholds().await;
    assert!((scaled.memory_gc - defaults.memory_gc * 0.75).abs() < 1e-9);
    assert!((scaled.cpu_critical - defaults.cpu_critical * 0.75).abs() < 1e-9);
    assert_eq!(scaled.memory_critical, defaults.memory_critical);

    // A second throttling signal scales from the defaults, not cumulatively
    feed(&orchestrator, throttling(76.0, 0.25)).await;
    let again = orchestrator.collector().thresholds().await;
    assert!((again.memory_gc - scaled.memory_gc).abs() < 1e-9);

    feed(
        &orchestrator,
        ComponentEvent::Thermal(ThermalEvent::ThermalRecovery {
            temperature: 60.0,
            threshold: 70.0,
        }),
    )
    .await;
    assert_eq!(orchestrator.collector().thresholds().await, defaults);
    assert!(orchestrator.collector().is_polling());
}

#[tokio::test]
async fn test_emergency_halts_polling_and_signals() {
    let (_dir, orchestrator, _rx, _thermal) = setup(2_000_000, 1_000_000).await;
    let mut events = orchestrator.subscribe();
    orchestrator
        .submit(AdmissionRequest::new("inference", 5, "prompt".to_string()).thermal_sensitive(true))
        .await
        .unwrap();

    feed(
        &orchestrator,
        ComponentEvent::Thermal(ThermalEvent::ThermalEmergency {
            temperature: 88.0,
            emergency_level: 1,
        }),
    )
    .await;

    assert!(!orchestrator.collector().is_polling());

    let mut saw_emergency = false;
    while let Ok(event) = events.try_recv() {
        if let GovernorEvent::SystemEmergency {
            reason,
            temperature,
        } = event
        {
            assert_eq!(reason, "thermal emergency level 1");
            assert_eq!(temperature, 88.0);
            saw_emergency = true;
        }
    }
    assert!(saw_emergency);

    let recent = orchestrator.get_recent_events(10).await;
    let last = recent.last().unwrap();
    assert_eq!(last.subtype, "system_emergency");
    assert_eq!(last.severity, Severity::Emergency);

    let queue = orchestrator.get_queue_status().await;
    assert!(queue.suspended);
    assert_eq!(queue.queue_length, 0);
    assert_eq!(queue.counters.cancelled, 1);
}

#[tokio::test]
async fn test_aggressive_reduction_slows_polling_until_restored() {
    let (_dir, orchestrator, _rx, _thermal) = setup(2_000_000, 1_000_000).await;

    feed(
        &orchestrator,
        ComponentEvent::Resource(ResourceEvent::ServiceReductionRequested {
            reason: "memory above limit".to_string(),
            level: ReductionLevel::Aggressive,
        }),
    )
    .await;
    assert_eq!(
        orchestrator.collector().current_interval(),
        Duration::from_millis(orchestrator.config().collector.slow_interval_ms)
    );

    feed(
        &orchestrator,
        ComponentEvent::Resource(ResourceEvent::ServiceRestorationRequested {
            reason: "memory normal".to_string(),
        }),
    )
    .await;
    assert_eq!(
        orchestrator.collector().current_interval(),
        Duration::from_millis(50)
    );
}

#[tokio::test]
async fn test_history_keeps_newest_events() {
    let temp_dir = TempDir::new().unwrap();
    let host = mock_host(temp_dir.path(), 2_000_000, 1_000_000).await;
    let mut config = test_config(temp_dir.path(), host);
    config.orchestrator.history_capacity = 3;
    let (orchestrator, _rx, _thermal) = build(config);

    for i in 0..5 {
        orchestrator
            .process(ComponentEvent::Queue(QueueEvent::Queued {
                id: format!("job-{}", i),
                priority: 5,
                queue_length: i + 1,
            }))
            .await;
    }

    let recent = orchestrator.get_recent_events(10).await;
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].message, "Request job-2 queued (3 waiting)");
    assert_eq!(orchestrator.get_status().await.events_recorded, 5);
}

#[tokio::test]
async fn test_metrics_snapshots_are_published_not_recorded() {
    let (_dir, orchestrator, _rx, _thermal) = setup(2_000_000, 1_000_000).await;
    let mut events = orchestrator.subscribe();
    let metrics = orchestrator.get_metrics().await;

    let directives = orchestrator
        .process(ComponentEvent::Resource(ResourceEvent::Metrics(Box::new(
            metrics.clone(),
        ))))
        .await;

    assert_eq!(directives, vec![Directive::QueueMetrics(Box::new(metrics))]);
    assert!(orchestrator.get_recent_events(10).await.is_empty());
    assert!(matches!(events.try_recv(), Ok(GovernorEvent::Metrics(_))));
}

#[tokio::test]
async fn test_trigger_optimization_runs_every_pass() {
    // 90% of memory in use, above the 80% reclamation threshold
    let (_dir, orchestrator, _rx, thermal) = setup(2_000_000, 200_000).await;

    let summary = orchestrator.trigger_optimization().await;

    assert!(summary.result.success);
    assert!(summary
        .result
        .message
        .starts_with("Optimization complete: 0 log files removed, 0 files cleaned"));
    assert!(summary.result.message.contains("bytes reclaimed"));
    assert_eq!(summary.storage.cleanup.mode, CleanupMode::Normal);
    assert!(!summary.storage.cleanup.performed);
    assert!(summary.garbage_collection.is_some());
    assert!(summary.thermal_checked);
    assert_eq!(thermal.forced_checks(), 1);
}

#[tokio::test]
async fn test_sysfs_monitor_suspends_queue_past_pause_temperature() {
    let temp_dir = TempDir::new().unwrap();
    let host = mock_host(temp_dir.path(), 2_000_000, 1_000_000).await;
    let config = test_config(temp_dir.path(), host.clone());
    let monitor = Arc::new(SysfsThermalMonitor::new(config.thermal_monitor_config(), host.clone()));
    let (orchestrator, _rx) = OrchestratorBuilder::new()
        .config(config)
        .thermal(monitor.clone())
        .filesystem_probe(Arc::new(StaticProbe::with_percent(16 * GIB, 40.0)))
        .latency_probe(Arc::new(FixedLatency(Some(12.0))))
        .build::<String>()
        .unwrap();
    let orchestrator = Arc::new(orchestrator);
    let mut thermal_rx = monitor.subscribe();

    orchestrator
        .submit(AdmissionRequest::new("render", 6, "frame".to_string()).thermal_sensitive(true))
        .await
        .unwrap();
    orchestrator
        .submit(AdmissionRequest::new("backup", 6, "files".to_string()))
        .await
        .unwrap();

    for (reading, suspended) in [("78000", false), ("82000", true)] {
        write(&host.sys_root, "class/thermal/thermal_zone0/temp", reading).await;
        monitor.force_thermal_check().await;
        let event = thermal_rx.try_recv().unwrap();
        feed(&orchestrator, ComponentEvent::Thermal(event)).await;

        let queue = orchestrator.get_queue_status().await;
        assert_eq!(queue.suspended, suspended, "at {} m°C", reading);
        assert!(queue.thermally_reduced);
    }

    let queue = orchestrator.get_queue_status().await;
    assert_eq!(queue.queue_length, 1);
    assert_eq!(queue.queued[0].id, "backup");
    assert_eq!(queue.counters.cancelled, 1);
}

#[tokio::test]
async fn test_trigger_optimization_skips_reclaim_when_memory_low() {
    let (_dir, orchestrator, _rx, _thermal) = setup(2_000_000, 1_500_000).await;
    let summary = orchestrator.trigger_optimization().await;
    assert!(summary.garbage_collection.is_none());
}

#[tokio::test]
async fn test_health_check_flags_inactive_and_critical_usage() {
    // 98% memory in use
    let (_dir, orchestrator, _rx, _thermal) = setup(1_000_000, 20_000).await;
    orchestrator.collector().tick().await;

    // First critical reading alone is not sustained
    orchestrator.check_health().await;
    assert!(!orchestrator
        .get_recent_events(100)
        .await
        .iter()
        .any(|e| e.subtype == "critical_usage"));

    orchestrator.collector().tick().await;
    let health = orchestrator.check_health().await;

    assert_eq!(health.status, ComponentStatus::Unhealthy);
    assert_eq!(
        health.components[components::STORAGE].status,
        ComponentStatus::Unhealthy
    );
    let critical = orchestrator
        .get_recent_events(100)
        .await
        .into_iter()
        .find(|e| e.subtype == "critical_usage")
        .unwrap();
    assert_eq!(critical.severity, Severity::Critical);
}

#[tokio::test]
async fn test_critical_usage_streak_resets_on_normal_sample() {
    let temp_dir = TempDir::new().unwrap();
    let host = mock_host(temp_dir.path(), 1_000_000, 20_000).await;
    let (orchestrator, _rx, _thermal) = build(test_config(temp_dir.path(), host));

    orchestrator.collector().tick().await;
    orchestrator.check_health().await;

    // Usage drops back to 50% before the next check
    mock_host(temp_dir.path(), 1_000_000, 500_000).await;
    orchestrator.collector().tick().await;
    orchestrator.check_health().await;

    mock_host(temp_dir.path(), 1_000_000, 20_000).await;
    orchestrator.collector().tick().await;
    orchestrator.check_health().await;

    let critical = orchestrator
        .get_recent_events(100)
        .await
        .into_iter()
        .filter(|e| e.subtype == "critical_usage")
        .count();
    assert_eq!(critical, 0);
}

#[tokio::test]
async fn test_cancel_execution_reports_outcome() {
    let (_dir, orchestrator, _rx, _thermal) = setup(2_000_000, 1_000_000).await;
    orchestrator
        .submit(AdmissionRequest::new("sms-1", 3, "hello".to_string()))
        .await
        .unwrap();

    assert!(orchestrator.cancel_execution("sms-1").await.success);
    let missing = orchestrator.cancel_execution("sms-1").await;
    assert!(!missing.success);
    assert!(missing.message.contains("not found"));
}

#[tokio::test]
async fn test_start_dispatch_and_shutdown() {
    let (_dir, orchestrator, mut dispatch_rx, _thermal) = setup(2_000_000, 1_000_000).await;

    orchestrator.start().await.unwrap();
    assert!(orchestrator.is_running());
    assert!(orchestrator.health().readiness().await.ready);

    orchestrator
        .submit(AdmissionRequest::new("agent-run", 7, "task".to_string()))
        .await
        .unwrap();
    let dispatched = tokio::time::timeout(Duration::from_secs(5), dispatch_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dispatched.request.id, "agent-run");
    orchestrator.complete_execution("agent-run").await.unwrap();

    assert!(wait_for_event(&orchestrator, "completed").await);
    assert!(wait_for_event(&orchestrator, "governor_started").await);

    for _ in 0..500 {
        if orchestrator.collector().samples_taken() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(orchestrator.collector().samples_taken() >= 1);
    let health = orchestrator.check_health().await;
    assert_eq!(health.status, ComponentStatus::Healthy, "{:?}", health);

    orchestrator
        .submit(AdmissionRequest::new("left-behind", 1, "later".to_string()))
        .await
        .unwrap();
    orchestrator.shutdown("test finished").await.unwrap();

    assert!(!orchestrator.is_running());
    assert!(!orchestrator.health().readiness().await.ready);
    let queue = orchestrator.get_queue_status().await;
    assert_eq!(queue.queue_length, 0);
    assert!(matches!(
        orchestrator
            .submit(AdmissionRequest::new("too-late", 5, "x".to_string()))
            .await,
        Err(GovernorError::QueueDisabled)
    ));
}
