//! Integration tests for the mock driver set
//!
//! Drives the mocks through the `bench-core` trait objects the engine uses.

use std::sync::Arc;

use bench_core::error::{DriverError, DriverErrorKind};
use bench_core::{AcquisitionParams, CalibrationCurve, InstrumentDriver, StageDriver};
use bench_driver_mock::*;

/// All instruments work behind `Arc<dyn InstrumentDriver>`
#[tokio::test]
async fn test_instruments_as_trait_objects() {
    let instruments: Vec<Arc<dyn InstrumentDriver>> = vec![
        Arc::new(MockPowerMeter::new(0.2)),
        Arc::new(MockSpectrometer::new().with_pixels(32)),
        Arc::new(MockCamera::new(8, 8)),
    ];

    let mut kinds = Vec::new();
    for instrument in &instruments {
        instrument.activate().await.unwrap();
        instrument
            .configure(&AcquisitionParams::default())
            .await
            .unwrap();
        kinds.push(instrument.acquire().await.unwrap().value.kind());
        instrument.deactivate().await.unwrap();
    }
    assert_eq!(kinds, vec!["scalar", "vector", "matrix"]);
}

/// Power meter and camera both see the waveplate angle
#[tokio::test]
async fn test_shared_waveplate_source() {
    let rotator = Arc::new(MockRotator::new());
    rotator.activate(true).await.unwrap();
    let curve = CalibrationCurve::new(0.5, 0.0).unwrap();

    let meter = MockPowerMeter::behind_waveplate(rotator.clone(), curve);
    let camera = MockCamera::builder(16, 16)
        .source(PowerSource::waveplate(rotator.clone(), curve))
        .build();
    meter.activate().await.unwrap();
    camera.activate().await.unwrap();

    let bright_power = meter.acquire().await.unwrap().as_scalar().unwrap();
    let bright_frame = camera.acquire().await.unwrap().summary();

    rotator.move_to(30.0, true).await.unwrap();
    let dim_power = meter.acquire().await.unwrap().as_scalar().unwrap();
    let dim_frame = camera.acquire().await.unwrap().summary();

    assert!((bright_power - 1.0).abs() < 1e-12);
    assert!((dim_power - curve.angle_to_power(30.0)).abs() < 1e-12);
    assert!(dim_frame < bright_frame);
}

/// Injected failures surface as downcastable driver errors
#[tokio::test]
async fn test_driver_error_downcast() {
    let rotator = MockRotator::new().with_error_config(ErrorConfig::scenario(
        ErrorScenario::HardwareFault { code: 7 },
    ));
    let err = rotator.activate(false).await.unwrap_err();
    let driver_err = err.downcast_ref::<DriverError>().unwrap();
    assert_eq!(driver_err.kind, DriverErrorKind::Hardware);
    assert_eq!(driver_err.driver_type, "mock_rotator");
}

/// Persistent failures clear once the device is "reconnected"
#[tokio::test]
async fn test_failures_clear_after_reset() {
    let errors = ErrorConfig::scenarios(vec![ErrorScenario::FailAfterN {
        operation: "acquire",
        count: 1,
    }]);
    let meter = MockPowerMeter::new(1.0).with_error_config(errors.clone());
    meter.activate().await.unwrap();

    assert!(meter.acquire().await.is_ok());
    assert!(meter.acquire().await.is_err());
    assert!(meter.acquire().await.is_err());

    errors.reset();
    assert!(meter.acquire().await.is_ok());
}
