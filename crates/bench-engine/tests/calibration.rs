//! Automated calibration against a simulated waveplate.

use std::sync::Arc;
use std::time::Duration;

use bench_core::{BenchError, CalibrationCurve, DeviceCategory};
use bench_driver_mock::{MockPowerMeter, MockRotator};
use bench_engine::{calibrate_axis, AbortSignal, Axis, CalibrationSweep, Instrument, ScanCoordinator};
use bench_storage::{CalibrationSink, CALIBRATION_COLUMNS};
use tempfile::TempDir;
use tracing_test::traced_test;

async fn bench(truth: CalibrationCurve) -> (Arc<MockRotator>, Axis, Instrument) {
    let rotator = Arc::new(MockRotator::new());
    let mut axis = Axis::new("wp_red", rotator.clone());
    axis.activate(true).await.unwrap();
    let mut meter = Instrument::new(
        "pm",
        DeviceCategory::PowerMeter,
        Arc::new(MockPowerMeter::behind_waveplate(rotator.clone(), truth)),
    );
    meter.activate().await.unwrap();
    (rotator, axis, meter)
}

#[tokio::test]
async fn test_calibration_sweep_fits_and_installs_curve() {
    let dir = TempDir::new().unwrap();
    let truth = CalibrationCurve::new(0.8, 12.0).unwrap();
    let (rotator, axis, meter) = bench(truth).await;

    let sink = Arc::new(CalibrationSink::new(dir.path()));
    let sweep = CalibrationSweep::linspace(0.0, 90.0, 37)
        .with_settle_time(Duration::from_millis(1))
        .with_comment("after realignment");
    let run = calibrate_axis(
        &ScanCoordinator::with_sink(sink.clone()),
        &sweep,
        axis,
        meter,
        AbortSignal::new(),
        |_| {},
    )
    .await
    .unwrap();

    let curve = run.curve.as_ref().unwrap().clone();
    assert!((curve.amplitude() - 0.8).abs() < 0.008, "{curve:?}");
    assert!((curve.phase() - 12.0).abs() < 0.12, "{curve:?}");
    assert_eq!(rotator.move_count(), 37);

    // The written file fits to the same curve
    let path = sink.last_written().unwrap();
    assert!(path.starts_with(dir.path().join("wp_red")));
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("# Axis: wp_red\n# Instrument: pm\n"));
    assert!(text.contains("# after realignment\n"));
    assert_eq!(text.matches(CALIBRATION_COLUMNS).count(), 1);
    let reloaded = CalibrationCurve::from_file(&path).unwrap();
    assert!((reloaded.amplitude() - curve.amplitude()).abs() < 1e-6);

    // The axis now accepts power targets
    let (mut axis, _meter) = run.into_handles().unwrap();
    assert_eq!(axis.calibration().map(|c| **c), Some(*curve));
    axis.move_to(0.8, true).await.unwrap();
    assert!((axis.current_power().unwrap() - 0.8).abs() < 1e-6);
}

#[tokio::test]
#[traced_test]
async fn test_aborted_sweep_keeps_previous_curve() {
    let truth = CalibrationCurve::new(0.5, 30.0).unwrap();
    let (_rotator, axis, meter) = bench(truth).await;
    let previous = Arc::new(CalibrationCurve::new(1.0, 0.0).unwrap());
    let axis = axis.with_calibration(Some(previous.clone()));

    let abort = AbortSignal::new();
    abort.abort();
    let run = calibrate_axis(
        &ScanCoordinator::new(),
        &CalibrationSweep::linspace(0.0, 90.0, 10).with_settle_time(Duration::ZERO),
        axis,
        meter,
        abort,
        |_| {},
    )
    .await
    .unwrap();

    assert!(matches!(run.curve, Err(BenchError::CalibrationFit(_))));
    assert!(run.scan.result.aborted);
    let (axis, _meter) = run.into_handles().unwrap();
    assert_eq!(axis.calibration(), Some(&previous));
    assert!(logs_contain("keeping previous curve"));
}

#[tokio::test]
async fn test_empty_sweep_rejected() {
    let truth = CalibrationCurve::new(0.5, 30.0).unwrap();
    let (_rotator, axis, meter) = bench(truth).await;
    let sweep = CalibrationSweep::linspace(0.0, 90.0, 0);

    let err = calibrate_axis(&ScanCoordinator::new(), &sweep, axis, meter, AbortSignal::new(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, BenchError::InvalidScanConfig(_)));
}
