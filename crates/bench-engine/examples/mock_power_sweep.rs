//! Power sweep over simulated hardware.
//!
//! ```text
//! RUST_LOG=info cargo run -p bench-engine --example mock_power_sweep [bench.toml]
//! ```
//!
//! Loads the bench configuration (optional file plus `BENCH_` environment),
//! drives a mock waveplate through a power sweep while polling a power meter
//! and a spectrometer, writes the table log under `data_root`, then runs the
//! live loop for one second.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bench_core::{
    AxisBinding, BenchConfig, CalibrationCurve, DeviceCategory, InstrumentBinding, ScanConfig,
    ScanEvent,
};
use bench_driver_mock::{
    MockMode, MockPowerMeter, MockRotator, MockSpectrometer, NoiseModel, PowerSource,
};
use bench_engine::{AbortSignal, Axis, Instrument, LiveLoop, ScanCoordinator};
use bench_storage::TableSink;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .try_init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let bench = BenchConfig::load(config_path.as_deref())?;

    // Simulated waveplate: 0.5 W amplitude, 7° phase
    let waveplate = CalibrationCurve::new(0.5, 7.0)?;
    let rotator = Arc::new(MockRotator::new().with_mode(MockMode::Realistic));

    let calibration = match bench.load_calibrations().remove("wp") {
        Some(curve) => curve,
        None => {
            // No file configured: calibrate against the simulated meter
            let angles: Vec<f64> = (0..=45).map(|i| f64::from(i) * 2.0).collect();
            let powers: Vec<f64> = angles.iter().map(|&a| waveplate.angle_to_power(a)).collect();
            Some(Arc::new(CalibrationCurve::fit(&angles, &powers)?))
        }
    };

    let mut axis = Axis::new("wp", rotator.clone()).with_calibration(calibration);
    axis.activate(true).await?;

    let mut meter = Instrument::new(
        "pm",
        DeviceCategory::PowerMeter,
        Arc::new(
            MockPowerMeter::behind_waveplate(rotator.clone(), waveplate)
                .with_noise(NoiseModel::default_noise(), Some(7))
                .with_mode(MockMode::Realistic),
        ),
    );
    let mut spectrometer = Instrument::new(
        "spec",
        DeviceCategory::Spectrometer,
        Arc::new(
            MockSpectrometer::new()
                .with_source(PowerSource::waveplate(rotator.clone(), waveplate))
                .with_mode(MockMode::Realistic),
        ),
    );
    meter.activate().await?;
    spectrometer.activate().await?;

    let scan = bench
        .scan
        .apply(ScanConfig::builder())
        .name("mock_power_sweep")
        .linspace(0.05, 0.95, 10)
        .axis(AxisBinding::power("wp"))
        .instrument(InstrumentBinding::new("pm"))
        .instrument(InstrumentBinding::new("spec").with_params(bench.live))
        .comment("simulated hardware")
        .build()?;

    let coordinator = ScanCoordinator::with_sink(Arc::new(TableSink::new(&bench.data_root)));
    let outcome = coordinator
        .run(
            scan,
            vec![axis],
            vec![meter, spectrometer],
            AbortSignal::new(),
            |event| {
                if let ScanEvent::ReadingAcquired {
                    index,
                    instrument,
                    reading,
                } = event
                {
                    info!(index, instrument = %instrument, value = reading.summary(), "reading");
                }
            },
        )
        .await?;

    info!(
        points = outcome.result.completed_points.len(),
        gaps = outcome.result.gaps.len(),
        "Sweep finished"
    );

    let mut instruments = outcome.instruments;
    let meter = instruments.remove(0);
    let live = LiveLoop::start(
        meter,
        bench.live,
        |reading| info!(power = reading.summary(), "live"),
        |err| tracing::warn!(error = %err, "live loop failed"),
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    let mut meter = live.stop().await?;

    meter.deactivate().await?;
    for mut instrument in instruments {
        instrument.deactivate().await?;
    }
    for mut axis in outcome.axes {
        axis.disable().await?;
    }
    Ok(())
}
