//! Scan coordinator against mock hardware.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bench_core::{
    AcquisitionParams, AxisBinding, AxisMapping, BenchError, CalibrationCurve, DeviceCategory,
    InstrumentBinding, PointFailure, ScanConfig, ScanEvent, ScanResult, ScanSink,
};
use bench_driver_mock::{ErrorConfig, MockPowerMeter, MockRotator, MockSpectrometer};
use bench_engine::{AbortSignal, Axis, Instrument, ScanCoordinator};
use parking_lot::Mutex;
use tracing_test::traced_test;

type EventLog = Arc<Mutex<Vec<ScanEvent>>>;

fn recorder() -> (EventLog, impl Fn(ScanEvent) + Send + Sync + 'static) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |event: ScanEvent| sink.lock().push(event))
}

async fn meter(id: &str, power: f64, errors: ErrorConfig) -> Instrument {
    let driver = MockPowerMeter::new(power).with_error_config(errors);
    let mut instrument = Instrument::new(id, DeviceCategory::PowerMeter, Arc::new(driver));
    instrument.activate().await.unwrap();
    instrument
}

async fn rotator_axis(id: &str, driver: Arc<MockRotator>) -> Axis {
    let mut axis = Axis::new(id, driver);
    axis.activate(false).await.unwrap();
    axis
}

/// Captures what the coordinator hands to persistence.
#[derive(Default)]
struct CapturingSink {
    saved: Mutex<Vec<ScanResult>>,
}

#[async_trait]
impl ScanSink for CapturingSink {
    async fn save(&self, result: &ScanResult, _config: &ScanConfig) -> anyhow::Result<()> {
        self.saved.lock().push(result.clone());
        Ok(())
    }
}

struct FailingSink;

#[async_trait]
impl ScanSink for FailingSink {
    async fn save(&self, _result: &ScanResult, _config: &ScanConfig) -> anyhow::Result<()> {
        Err(anyhow!("disk full"))
    }
}

#[tokio::test]
async fn test_sweep_collects_every_point() {
    let config = ScanConfig::builder()
        .points([0.0, 1.0, 2.0])
        .instrument(InstrumentBinding::new("pm"))
        .build()
        .unwrap();
    let (events, progress) = recorder();

    let outcome = ScanCoordinator::new()
        .run(
            config,
            Vec::new(),
            vec![meter("pm", 0.25, ErrorConfig::none()).await],
            AbortSignal::new(),
            progress,
        )
        .await
        .unwrap();

    let result = &outcome.result;
    assert_eq!(result.samples("pm").len(), 3);
    assert_eq!(result.timestamps.len(), 3);
    assert_eq!(result.completed_points, vec![0, 1, 2]);
    assert!(result.gaps.is_empty());
    assert!(!result.aborted);
    assert!(outcome.persistence_error.is_none());

    let events = events.lock();
    assert_eq!(events.len(), 7);
    assert_eq!(events[0], ScanEvent::PointStarted { index: 0, point: 0.0 });
    assert!(matches!(events[1], ScanEvent::ReadingAcquired { index: 0, .. }));
    assert_eq!(events[6], ScanEvent::Completed { completed: 3 });
}

#[tokio::test]
async fn test_failure_on_last_point_isolated() {
    let config = ScanConfig::builder()
        .points([0.0, 1.0, 2.0])
        .instrument(InstrumentBinding::new("a"))
        .instrument(InstrumentBinding::new("b"))
        .build()
        .unwrap();
    let (events, progress) = recorder();
    let instruments = vec![
        meter("a", 0.1, ErrorConfig::none()).await,
        meter("b", 0.2, ErrorConfig::fail_on_call("acquire", 3)).await,
    ];

    let outcome = ScanCoordinator::new()
        .run(config, Vec::new(), instruments, AbortSignal::new(), progress)
        .await
        .unwrap();

    let result = &outcome.result;
    assert_eq!(result.samples("a").len(), 3);
    assert_eq!(result.samples("b").len(), 2);
    assert_eq!(result.gaps.len(), 1);
    assert_eq!(result.gaps[0].point_index, 2);
    assert_eq!(result.gaps[0].instrument.as_deref(), Some("b"));
    assert_eq!(result.timestamps.len(), 3);

    let failed: Vec<_> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            ScanEvent::PointFailed { index, cause, .. } => Some((*index, cause.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, 2);
    assert!(matches!(failed[0].1, PointFailure::Instrument { ref instrument, .. } if instrument == "b"));

    let b = &outcome.instruments[1];
    assert_eq!(b.id(), "b");
    assert!(!b.is_available());
}

#[tokio::test]
#[traced_test]
async fn test_unavailable_instrument_skipped() {
    let config = ScanConfig::builder()
        .points([0.0, 1.0, 2.0])
        .instrument(InstrumentBinding::new("a"))
        .instrument(InstrumentBinding::new("b"))
        .build()
        .unwrap();
    let instruments = vec![
        meter("a", 0.1, ErrorConfig::none()).await,
        meter("b", 0.2, ErrorConfig::fail_on_call("acquire", 1)).await,
    ];

    let outcome = ScanCoordinator::new()
        .run(config, Vec::new(), instruments, AbortSignal::new(), |_| {})
        .await
        .unwrap();

    let result = &outcome.result;
    assert_eq!(result.samples("a").len(), 3);
    assert!(result.samples("b").is_empty());
    assert_eq!(result.gaps.len(), 3);
    assert_eq!(result.gaps[1].reason, "unavailable");
    assert!(logs_contain("skipping"));
}

#[tokio::test]
async fn test_background_scan_polls_unavailable_instruments() {
    let config = ScanConfig::builder()
        .points([0.0, 1.0, 2.0])
        .instrument(InstrumentBinding::new("b"))
        .background(true)
        .build()
        .unwrap();
    let instruments = vec![meter("b", 0.2, ErrorConfig::fail_on_call("acquire", 1)).await];

    let outcome = ScanCoordinator::new()
        .run(config, Vec::new(), instruments, AbortSignal::new(), |_| {})
        .await
        .unwrap();

    assert!(outcome.result.background);
    assert_eq!(outcome.result.samples("b").len(), 2);
    assert_eq!(outcome.result.gaps.len(), 1);
}

#[tokio::test]
async fn test_abort_after_first_point() {
    let config = ScanConfig::builder()
        .linspace(0.0, 4.0, 5)
        .instrument(InstrumentBinding::new("pm"))
        .build()
        .unwrap();
    let abort = AbortSignal::new();
    let trigger = abort.clone();
    let (events, record) = recorder();
    let progress = move |event: ScanEvent| {
        if matches!(event, ScanEvent::ReadingAcquired { index: 0, .. }) {
            trigger.abort();
        }
        record(event);
    };
    let sink = Arc::new(CapturingSink::default());

    let outcome = ScanCoordinator::with_sink(sink.clone())
        .run(
            config,
            Vec::new(),
            vec![meter("pm", 0.3, ErrorConfig::none()).await],
            abort,
            progress,
        )
        .await
        .unwrap();

    let result = &outcome.result;
    assert!(result.aborted);
    assert!((1..=2).contains(&result.completed_points.len()));
    assert_eq!(result.samples("pm").len(), result.completed_points.len());

    let events = events.lock();
    assert!(matches!(events.last(), Some(ScanEvent::Aborted { .. })));
    assert!(!events.iter().any(|e| matches!(e, ScanEvent::Completed { .. })));

    // Partial result still reaches the sink
    let saved = sink.saved.lock();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].aborted);
}

#[tokio::test]
async fn test_abort_between_instruments() {
    let config = ScanConfig::builder()
        .points([0.0, 1.0])
        .instrument(InstrumentBinding::new("a"))
        .instrument(InstrumentBinding::new("b"))
        .build()
        .unwrap();
    let abort = AbortSignal::new();
    let trigger = abort.clone();
    let progress = move |event: ScanEvent| {
        if matches!(event, ScanEvent::ReadingAcquired { ref instrument, .. } if instrument == "a") {
            trigger.abort();
        }
    };
    let instruments = vec![
        meter("a", 0.1, ErrorConfig::none()).await,
        meter("b", 0.2, ErrorConfig::none()).await,
    ];

    let outcome = ScanCoordinator::new()
        .run(config, Vec::new(), instruments, abort, progress)
        .await
        .unwrap();

    assert!(outcome.result.aborted);
    assert_eq!(outcome.result.samples("a").len(), 1);
    assert!(outcome.result.samples("b").is_empty());
    assert!(outcome.result.timestamps.is_empty());
}

#[tokio::test]
async fn test_power_sweep_moves_axis_before_polling() {
    let rotator = Arc::new(MockRotator::new());
    let curve = CalibrationCurve::new(0.5, 0.0).unwrap();
    let axis = rotator_axis("wp", rotator.clone())
        .await
        .with_calibration(Some(Arc::new(curve)));

    let driver = MockPowerMeter::behind_waveplate(rotator.clone(), curve);
    let mut pm = Instrument::new("pm", DeviceCategory::PowerMeter, Arc::new(driver));
    pm.activate().await.unwrap();

    let config = ScanConfig::builder()
        .points([0.2, 0.5, 0.8])
        .axis(AxisBinding::power("wp"))
        .instrument(InstrumentBinding::new("pm").with_params(AcquisitionParams::default()))
        .settle_time(Duration::from_millis(1))
        .build()
        .unwrap();
    let (events, progress) = recorder();

    let outcome = ScanCoordinator::new()
        .run(config, vec![axis], vec![pm], AbortSignal::new(), progress)
        .await
        .unwrap();

    for sample in outcome.result.samples("pm") {
        let measured = sample.reading.as_scalar().unwrap();
        assert!((measured - sample.point).abs() < 1e-9, "{measured} vs {}", sample.point);
    }
    assert_eq!(rotator.move_count(), 3);
    assert!(outcome.axes[0].is_activated());

    let events = events.lock();
    let kinds: Vec<&str> = events
        .iter()
        .take(3)
        .map(|e| match e {
            ScanEvent::PointStarted { .. } => "started",
            ScanEvent::AxisMoved { .. } => "moved",
            ScanEvent::ReadingAcquired { .. } => "reading",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["started", "moved", "reading"]);
}

#[tokio::test]
async fn test_failed_move_skips_point() {
    let rotator = Arc::new(MockRotator::new().with_range(0.0, 90.0));
    let axis = rotator_axis("wp", rotator).await;
    let config = ScanConfig::builder()
        .points([10.0, 120.0, 30.0])
        .axis(AxisBinding::angle("wp"))
        .instrument(InstrumentBinding::new("pm"))
        .build()
        .unwrap();
    let (events, progress) = recorder();

    let outcome = ScanCoordinator::new()
        .run(
            config,
            vec![axis],
            vec![meter("pm", 0.1, ErrorConfig::none()).await],
            AbortSignal::new(),
            progress,
        )
        .await
        .unwrap();

    let result = &outcome.result;
    assert_eq!(result.completed_points, vec![0, 2]);
    assert_eq!(result.samples("pm").len(), 2);
    assert_eq!(result.gaps.len(), 1);
    assert_eq!(result.gaps[0].instrument, None);
    assert_eq!(outcome.axes[0].position(), Some(30.0));
    assert!(events.lock().iter().any(|e| matches!(
        e,
        ScanEvent::PointFailed { index: 1, cause: PointFailure::AxisMove { .. }, .. }
    )));
}

#[tokio::test]
async fn test_axes_only_scan_with_mapping() {
    let rotator = Arc::new(MockRotator::new());
    let axis = rotator_axis("wp", rotator.clone()).await;
    let config = ScanConfig::builder()
        .points([1.0, 2.0])
        .axis(AxisBinding::angle("wp").with_mapping(AxisMapping::Linear {
            scale: 10.0,
            offset: 5.0,
        }))
        .build()
        .unwrap();

    let outcome = ScanCoordinator::new()
        .run(config, vec![axis], Vec::new(), AbortSignal::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome.result.completed_points, vec![0, 1]);
    assert_eq!(outcome.result.sample_count(), 0);
    assert_eq!(outcome.axes[0].position(), Some(25.0));
}

#[tokio::test]
async fn test_binding_params_configure_once() {
    let driver = Arc::new(MockSpectrometer::new().with_pixels(8));
    let mut spectrometer = Instrument::new("spec", DeviceCategory::Spectrometer, driver.clone());
    spectrometer.activate().await.unwrap();
    let params = AcquisitionParams::default().with_exposure(Duration::from_millis(5));
    let config = ScanConfig::builder()
        .linspace(0.0, 1.0, 4)
        .instrument(InstrumentBinding::new("spec").with_params(params))
        .build()
        .unwrap();

    let outcome = ScanCoordinator::new()
        .run(config, Vec::new(), vec![spectrometer], AbortSignal::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome.result.samples("spec").len(), 4);
    assert_eq!(driver.lifecycle().configure_count(), 1);
    assert_eq!(driver.lifecycle().acquisitions(), 4);
}

#[tokio::test]
async fn test_unknown_binding_rejected_with_handles() {
    let config = ScanConfig::builder()
        .points([0.0])
        .instrument(InstrumentBinding::new("missing"))
        .build()
        .unwrap();

    let rejected = ScanCoordinator::new()
        .start(
            config,
            Vec::new(),
            vec![meter("pm", 0.1, ErrorConfig::none()).await],
            AbortSignal::new(),
            |_| {},
        )
        .err()
        .unwrap();

    assert!(matches!(rejected.error, BenchError::InvalidScanConfig(_)));
    assert_eq!(rejected.instruments.len(), 1);
    assert_eq!(rejected.instruments[0].id(), "pm");
}

#[tokio::test]
async fn test_duplicate_handle_ids_rejected() {
    let config = ScanConfig::builder()
        .points([0.0])
        .instrument(InstrumentBinding::new("pm"))
        .build()
        .unwrap();
    let instruments = vec![
        meter("pm", 0.1, ErrorConfig::none()).await,
        meter("pm", 0.2, ErrorConfig::none()).await,
    ];

    let err = ScanCoordinator::new()
        .run(config, Vec::new(), instruments, AbortSignal::new(), |_| {})
        .await
        .unwrap_err();
    assert!(err.to_string().contains("share the id"));
}

#[tokio::test]
#[traced_test]
async fn test_persistence_failure_reported_not_fatal() {
    let config = ScanConfig::builder()
        .points([0.0])
        .instrument(InstrumentBinding::new("pm"))
        .build()
        .unwrap();
    let (events, progress) = recorder();

    let outcome = ScanCoordinator::with_sink(Arc::new(FailingSink))
        .run(
            config,
            Vec::new(),
            vec![meter("pm", 0.1, ErrorConfig::none()).await],
            AbortSignal::new(),
            progress,
        )
        .await
        .unwrap();

    assert_eq!(outcome.result.samples("pm").len(), 1);
    assert!(matches!(
        outcome.persistence_error,
        Some(BenchError::PersistenceFailed(ref msg)) if msg.contains("disk full")
    ));
    assert!(matches!(events.lock().last(), Some(ScanEvent::Completed { completed: 1 })));
    assert!(logs_contain("Failed to save scan result"));
}

#[tokio::test]
async fn test_handle_abort_and_join() {
    let config = ScanConfig::builder()
        .linspace(0.0, 1.0, 50)
        .instrument(InstrumentBinding::new("pm"))
        .settle_time(Duration::from_millis(5))
        .build()
        .unwrap();

    let handle = ScanCoordinator::new()
        .start(
            config,
            Vec::new(),
            vec![meter("pm", 0.1, ErrorConfig::none()).await],
            AbortSignal::new(),
            |_| {},
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.abort();

    let outcome = handle.join().await.unwrap();
    assert!(outcome.result.aborted);
    assert!(outcome.result.completed_points.len() < 50);
    assert_eq!(outcome.instruments.len(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_unactivated_instrument_skipped_after_first_point() {
    let config = ScanConfig::builder()
        .points([0.0, 1.0, 2.0])
        .instrument(InstrumentBinding::new("a"))
        .instrument(InstrumentBinding::new("pm"))
        .build()
        .unwrap();
    let (events, progress) = recorder();
    let idle = Instrument::new("pm", DeviceCategory::PowerMeter, Arc::new(MockPowerMeter::new(0.3)));
    let instruments = vec![meter("a", 0.1, ErrorConfig::none()).await, idle];

    let outcome = ScanCoordinator::new()
        .run(config, Vec::new(), instruments, AbortSignal::new(), progress)
        .await
        .unwrap();

    assert_eq!(outcome.result.samples("a").len(), 3);
    assert!(outcome.result.samples("pm").is_empty());
    assert_eq!(outcome.result.gaps.len(), 3);
    assert!(!outcome.instruments[1].is_available());

    let causes: Vec<_> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            ScanEvent::PointFailed { index, cause, .. } => Some((*index, cause.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(causes.len(), 3);
    assert!(matches!(causes[0], (0, PointFailure::Instrument { .. })));
    assert!(matches!(causes[1], (1, PointFailure::InstrumentSkipped { .. })));
    assert!(matches!(causes[2], (2, PointFailure::InstrumentSkipped { .. })));
    assert!(logs_contain("skipping"));
}

#[tokio::test(start_paused = true)]
async fn test_inter_instrument_delay_not_applied_after_last() {
    let config = ScanConfig::builder()
        .points([0.0, 1.0])
        .instrument(InstrumentBinding::new("a"))
        .instrument(InstrumentBinding::new("b"))
        .instrument(InstrumentBinding::new("c"))
        .inter_instrument_delay(Duration::from_millis(100))
        .build()
        .unwrap();
    let instruments = vec![
        meter("a", 0.1, ErrorConfig::none()).await,
        meter("b", 0.2, ErrorConfig::none()).await,
        meter("c", 0.3, ErrorConfig::none()).await,
    ];

    let start = tokio::time::Instant::now();
    let outcome = ScanCoordinator::new()
        .run(config, Vec::new(), instruments, AbortSignal::new(), |_| {})
        .await
        .unwrap();

    // Two delays per point: after "a" and after "b"
    assert_eq!(start.elapsed(), Duration::from_millis(400));
    assert_eq!(outcome.result.sample_count(), 6);
}
