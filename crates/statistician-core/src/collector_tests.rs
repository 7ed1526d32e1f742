use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::collector::{CollectorError, StatisticsCollector};
use crate::config::{CollectorConfig, ErrorTextPolicy};
use crate::registry::{DeviceClass, NodeValue, Scope};
use crate::sim::SimulatedDevice;
use crate::snapshot::{SessionEnd, Snapshot, UNSET_COUNT};

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn collector() -> StatisticsCollector<SimulatedDevice> {
    StatisticsCollector::new(CollectorConfig::default())
}

#[test]
fn stop_before_start_returns_immediately() {
    // Arrange
    let mut fresh = collector();
    let mut bound = collector();
    bound
        .initialize(Arc::new(SimulatedDevice::typical(DeviceClass::GigE)))
        .expect("initialize");

    // Act
    let started = Instant::now();
    let fresh_report = fresh.stop();
    let bound_report = bound.stop();

    // Assert
    assert!(fresh_report.is_none());
    assert!(bound_report.is_none());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(bound.snapshot().is_some(), "stop without a session keeps the snapshot");
}

#[test]
fn start_requires_initialize() {
    // Arrange
    let mut collector = collector();

    // Act
    let result = collector.start();

    // Assert
    assert!(matches!(result, Err(CollectorError::NotInitialized)));
    assert!(!collector.is_running());
    assert!(collector.snapshot().is_none());
}

#[test]
fn failed_initialize_leaves_collector_unbound() {
    // Arrange
    let mut collector = collector();
    let device = Arc::new(SimulatedDevice::typical(DeviceClass::GigE).with_failing_class());

    // Act
    let init = collector.initialize(device);
    let start = collector.start();

    // Assert
    assert!(matches!(init, Err(CollectorError::Initialization(_))));
    assert!(matches!(start, Err(CollectorError::NotInitialized)));
    assert!(!collector.is_initialized());
    assert!(!collector.is_running());
    assert_eq!(collector.device_class(), None);
}

#[test]
fn failed_initialize_can_be_retried_with_a_working_device() {
    // Arrange
    let mut collector = collector();
    let broken = Arc::new(SimulatedDevice::typical(DeviceClass::Usb).with_failing_port());
    let working = Arc::new(SimulatedDevice::typical(DeviceClass::Usb));

    // Act
    let first = collector.initialize(broken);
    let second = collector.initialize(working);

    // Assert
    assert!(matches!(first, Err(CollectorError::Initialization(_))));
    assert_eq!(second.expect("second initialize"), DeviceClass::Usb);
    assert!(collector.is_initialized());
}

#[test]
fn gige_device_does_not_need_a_control_port() {
    // Arrange
    let mut collector = collector();
    let device = Arc::new(SimulatedDevice::typical(DeviceClass::GigE).with_failing_port());

    // Act
    let class = collector.initialize(device);

    // Assert
    assert_eq!(class.expect("initialize"), DeviceClass::GigE);
}

#[test]
fn second_start_is_rejected_while_running() {
    // Arrange
    let mut collector = collector();
    collector
        .initialize(Arc::new(SimulatedDevice::typical(DeviceClass::GigE)))
        .expect("initialize");
    collector.start().expect("first start");

    // Act
    let second = collector.start();
    let first_stop = collector.stop();
    let second_stop = collector.stop();

    // Assert
    assert!(matches!(second, Err(CollectorError::AlreadyRunning)));
    assert!(first_stop.expect("session report").is_clean());
    assert!(second_stop.is_none());
    assert!(!collector.is_running());
}

#[test]
fn snapshot_is_withheld_while_poller_runs() {
    // Arrange
    let mut collector = collector();
    collector
        .initialize(Arc::new(SimulatedDevice::typical(DeviceClass::Usb)))
        .expect("initialize");

    // Act
    collector.start().expect("start");
    let while_running = collector.snapshot().cloned();
    wait_until("first sweep", || collector.sweep_count() >= 1);
    collector.stop();

    // Assert
    assert!(while_running.is_none());
    let snapshot = collector.snapshot().expect("snapshot after stop");
    assert!(snapshot.total_buffers >= 0);
}

#[test]
fn start_stop_cycles_reuse_the_same_snapshot() {
    // Arrange
    let mut collector = collector();
    collector
        .initialize(Arc::new(SimulatedDevice::typical(DeviceClass::GigE)))
        .expect("initialize");
    let mut last_total = UNSET_COUNT;

    for _ in 0..20 {
        // Act
        collector.start().expect("start");
        assert!(matches!(collector.start(), Err(CollectorError::AlreadyRunning)));
        wait_until("a sweep", || collector.sweep_count() >= 1);
        let report = collector.stop().expect("report");

        // Assert
        assert!(report.is_clean());
        assert!(report.sweeps >= 1);
        let total = collector.snapshot().expect("snapshot").total_buffers;
        assert!(total > last_total, "counter keeps advancing across sessions");
        last_total = total;
    }
}

#[test]
fn initialize_again_resets_statistics() {
    // Arrange
    let mut collector = collector();
    let device = Arc::new(SimulatedDevice::typical(DeviceClass::GigE));
    collector.initialize(Arc::clone(&device)).expect("initialize");
    collector.start().expect("start");
    wait_until("sweeps", || collector.sweep_count() >= 3);
    collector.stop();

    // Act
    let class = collector.initialize(device).expect("re-initialize");

    // Assert
    assert_eq!(class, DeviceClass::GigE);
    assert_eq!(collector.snapshot(), Some(&Snapshot::new(DeviceClass::GigE)));
    assert!(collector.last_session().is_none());
    assert_eq!(collector.sweep_count(), 0);
}

#[test]
fn initialize_while_running_stops_the_previous_poller() {
    // Arrange
    let mut collector = collector();
    let first = Arc::new(SimulatedDevice::typical(DeviceClass::GigE));
    let second = Arc::new(SimulatedDevice::typical(DeviceClass::Usb));
    collector.initialize(Arc::clone(&first)).expect("initialize");
    collector.start().expect("start");
    wait_until("sweeps", || collector.sweep_count() >= 1);

    // Act
    let class = collector.initialize(second).expect("re-initialize");
    let reads_after = first.reads();
    thread::sleep(Duration::from_millis(20));

    // Assert
    assert_eq!(class, DeviceClass::Usb);
    assert!(!collector.is_running());
    assert_eq!(first.reads(), reads_after, "old poller no longer reads the first device");
}

#[test]
fn dropping_the_collector_joins_the_poller() {
    // Arrange
    let device = Arc::new(SimulatedDevice::typical(DeviceClass::Usb));
    let mut collector = collector();
    collector.initialize(Arc::clone(&device)).expect("initialize");
    collector.start().expect("start");
    wait_until("sweeps", || collector.sweep_count() >= 1);

    // Act
    drop(collector);
    let reads_after_drop = device.reads();
    thread::sleep(Duration::from_millis(20));

    // Assert
    assert_eq!(device.reads(), reads_after_drop);
}

#[test]
fn poller_exit_is_visible_before_stop() {
    // Arrange
    let device = Arc::new(SimulatedDevice::typical(DeviceClass::GigE));
    let mut collector = collector();
    collector.initialize(Arc::clone(&device)).expect("initialize");
    collector.start().expect("start");
    wait_until("sweeps", || collector.sweep_count() >= 1);

    // Act
    device.disconnect();
    wait_until("poller exit", || collector.poller_exited());
    let restart = collector.start();
    let report = collector.stop().expect("report");

    // Assert
    assert!(matches!(restart, Err(CollectorError::AlreadyRunning)));
    assert!(matches!(report.end, SessionEnd::DeviceLost(_)));
    assert!(!collector.poller_exited());
}

#[test]
fn panicking_registry_ends_session_with_last_known_values() {
    // Arrange
    let device = Arc::new(
        SimulatedDevice::typical(DeviceClass::GigE)
            .with_value(
                Scope::Transport,
                "Statistic_Last_Error_Status_Text",
                NodeValue::String("LinkDown\n".to_string()),
            )
            .panic_after(40),
    );
    let mut collector = collector();
    collector.initialize(device).expect("initialize");
    collector.start().expect("start");

    // Act
    wait_until("poller exit", || collector.poller_exited());
    let report = collector.stop().expect("report");

    // Assert
    assert_eq!(report.end, SessionEnd::Panicked);
    assert_eq!(report.sweeps, 2, "two full sweeps fit before the fault");
    assert!(!collector.is_running());
    let snapshot = collector.snapshot().expect("snapshot");
    assert!(snapshot.total_buffers >= 1, "completed sweeps are kept");
    assert_eq!(snapshot.current_temperature, 41);
    assert_eq!(snapshot.tl_error_status_texts, BTreeSet::from(["LinkDown\n".to_string()]));
    assert_eq!(snapshot.last_errors, BTreeSet::from(["Overtrigger".to_string()]));
}

#[test]
fn collector_can_restart_after_a_panicked_session() {
    // Arrange
    let device = Arc::new(SimulatedDevice::typical(DeviceClass::Usb).panic_after(30));
    let mut collector = collector();
    collector.initialize(Arc::clone(&device)).expect("initialize");
    collector.start().expect("start");
    wait_until("poller exit", || collector.poller_exited());
    collector.stop();

    // Act
    let restarted = collector.start();
    wait_until("poller exit", || collector.poller_exited());
    let report = collector.stop().expect("report");

    // Assert
    assert!(restarted.is_ok());
    assert_eq!(report.end, SessionEnd::Panicked);
    assert!(collector.snapshot().expect("snapshot").total_buffers >= 0);
}

#[test]
fn configuration_survives_reinitialization() {
    // Arrange
    let config = CollectorConfig {
        error_text: ErrorTextPolicy::KeepLastError,
        ..CollectorConfig::default()
    };
    let mut collector = StatisticsCollector::<SimulatedDevice>::new(config);

    // Act
    collector
        .initialize(Arc::new(SimulatedDevice::typical(DeviceClass::GigE)))
        .expect("initialize");
    collector
        .initialize(Arc::new(SimulatedDevice::typical(DeviceClass::Usb)))
        .expect("re-initialize");

    // Assert
    assert_eq!(collector.config().error_text, ErrorTextPolicy::KeepLastError);
}
