//! Instrument handle against the mock detectors.

use std::sync::Arc;
use std::time::Duration;

use bench_core::{AcquisitionParams, BenchError, DeviceCategory};
use bench_driver_mock::{ErrorConfig, MockCamera, MockPowerMeter, MockSpectrometer};
use bench_engine::Instrument;

#[tokio::test]
async fn test_acquire_requires_activation() {
    let mut meter = Instrument::new("pm", DeviceCategory::PowerMeter, Arc::new(MockPowerMeter::new(0.4)));

    let err = meter.acquire().await.unwrap_err();
    assert!(matches!(err, BenchError::NotActivated { .. }));
    assert!(!meter.is_available());

    meter.activate().await.unwrap();
    assert!(meter.is_available());
    let reading = meter.acquire().await.unwrap();
    assert_eq!(reading.as_scalar(), Some(0.4));
    assert_eq!(meter.last_reading(), Some(&reading));
}

#[tokio::test]
async fn test_configure_only_forwarded_on_change() {
    let driver = Arc::new(MockSpectrometer::new().with_pixels(16));
    let mut spectrometer = Instrument::new("spec", DeviceCategory::Spectrometer, driver.clone());
    spectrometer.activate().await.unwrap();

    let params = AcquisitionParams::default().with_exposure(Duration::from_millis(20));
    spectrometer.configure(&params).await.unwrap();
    spectrometer.configure(&params).await.unwrap();
    spectrometer.configure(&params).await.unwrap();
    assert_eq!(driver.lifecycle().configure_count(), 1);

    spectrometer.configure(&params.with_averages(3)).await.unwrap();
    assert_eq!(driver.lifecycle().configure_count(), 2);
    assert_eq!(spectrometer.applied_params().map(|p| p.averages), Some(3));
}

#[tokio::test]
async fn test_reactivation_forgets_applied_params() {
    let driver = Arc::new(MockPowerMeter::new(0.1));
    let mut meter = Instrument::new("pm", DeviceCategory::PowerMeter, driver.clone());
    let params = AcquisitionParams::default();

    meter.activate().await.unwrap();
    meter.configure(&params).await.unwrap();
    meter.deactivate().await.unwrap();
    assert!(!meter.is_activated());

    meter.activate().await.unwrap();
    assert_eq!(meter.applied_params(), None);
    meter.configure(&params).await.unwrap();
    assert_eq!(driver.lifecycle().configure_count(), 2);
}

#[tokio::test]
async fn test_acquire_failure_marks_unavailable() {
    let errors = ErrorConfig::fail_on_call("acquire", 1);
    let driver = MockCamera::builder(8, 8).error_config(errors).build();
    let mut camera = Instrument::new("cam", DeviceCategory::Camera, Arc::new(driver));
    camera.activate().await.unwrap();

    let err = camera.acquire().await.unwrap_err();
    assert!(matches!(err, BenchError::InstrumentUnavailable { .. }));
    assert!(!camera.is_available());

    // Acquisition still works but does not restore availability
    assert!(camera.acquire().await.is_ok());
    assert!(!camera.is_available());

    camera.activate().await.unwrap();
    assert!(camera.is_available());
}

#[tokio::test]
async fn test_activate_failure_marks_unavailable() {
    let driver = MockPowerMeter::new(0.1).with_error_config(ErrorConfig::fail_on_call("activate", 1));
    let mut meter = Instrument::new("pm", DeviceCategory::PowerMeter, Arc::new(driver));

    assert!(meter.activate().await.is_err());
    assert!(!meter.is_activated());
    assert!(!meter.is_available());
}

#[tokio::test]
async fn test_deactivate_error_still_deactivates() {
    let driver = MockPowerMeter::new(0.1).with_error_config(ErrorConfig::fail_on_call("deactivate", 1));
    let mut meter = Instrument::new("pm", DeviceCategory::PowerMeter, Arc::new(driver));
    meter.activate().await.unwrap();

    assert!(meter.deactivate().await.is_err());
    assert!(!meter.is_activated());
    assert!(matches!(
        meter.acquire().await.unwrap_err(),
        BenchError::NotActivated { .. }
    ));
    assert!(!meter.is_available());
}

#[tokio::test]
async fn test_configure_before_activation_marks_unavailable() {
    let driver = Arc::new(MockSpectrometer::new().with_pixels(16));
    let mut spectrometer = Instrument::new("spec", DeviceCategory::Spectrometer, driver.clone());

    let err = spectrometer.configure(&AcquisitionParams::default()).await.unwrap_err();
    assert!(matches!(err, BenchError::NotActivated { .. }));
    assert!(!spectrometer.is_available());
    assert_eq!(driver.lifecycle().configure_count(), 0);
}
