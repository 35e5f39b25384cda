//! Automated waveplate calibration.
//!
//! A calibration is an ordinary scan: the axis is swept in raw-angle mode,
//! a power meter is read at every angle after the settle time, and the
//! samples are fitted with [`CalibrationCurve::fit_scan`]. A successful fit
//! is installed on the axis before the handles are returned.
//!
//! Pair it with `bench_storage::CalibrationSink` to keep the sample file:
//!
//! ```rust,ignore
//! let sink = Arc::new(CalibrationSink::new(config.calibration_dir()));
//! let coordinator = ScanCoordinator::with_sink(sink.clone());
//! let run = calibrate_axis(&coordinator, &CalibrationSweep::default(), axis, meter,
//!     AbortSignal::new(), |_| {}).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use bench_core::{
    linspace, AxisBinding, BenchError, BenchResult, CalibrationCurve, InstrumentBinding,
    ScanConfig, ScanEvent,
};
use tracing::{info, warn};

use crate::abort::AbortSignal;
use crate::axis::Axis;
use crate::instrument::Instrument;
use crate::scan::{ScanCoordinator, ScanOutcome};

/// Angles and timing of a calibration sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSweep {
    /// Stage angles in degrees, visited in order
    pub angles: Vec<f64>,
    /// Wait after each move before reading the meter
    pub settle_time: Duration,
    /// Written into the sample file header
    pub comment: String,
}

impl Default for CalibrationSweep {
    /// One period in 1° steps with a one-second settle.
    fn default() -> Self {
        Self {
            angles: linspace(0.0, 90.0, 91),
            settle_time: Duration::from_secs(1),
            comment: String::new(),
        }
    }
}

impl CalibrationSweep {
    /// `points` evenly spaced angles from `start` to `stop` inclusive.
    pub fn linspace(start: f64, stop: f64, points: usize) -> Self {
        Self {
            angles: linspace(start, stop, points),
            ..Self::default()
        }
    }

    /// Replace the settle time.
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// Attach a comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// The raw-angle scan that measures `instrument_id` behind `axis_id`.
    pub fn scan_config(&self, axis_id: &str, instrument_id: &str) -> BenchResult<ScanConfig> {
        ScanConfig::builder()
            .name(format!("calib_{axis_id}"))
            .points(self.angles.iter().copied())
            .axis(AxisBinding::angle(axis_id))
            .instrument(InstrumentBinding::new(instrument_id))
            .settle_time(self.settle_time)
            .comment(self.comment.clone())
            .build()
    }
}

/// Result of [`calibrate_axis`].
#[derive(Debug)]
pub struct CalibrationRun {
    /// The fitted curve, already installed on the axis when `Ok`
    pub curve: BenchResult<Arc<CalibrationCurve>>,
    /// The calibration sweep itself, handles included
    pub scan: ScanOutcome,
}

impl CalibrationRun {
    /// Take back the swept axis and the power meter.
    pub fn into_handles(self) -> Option<(Axis, Instrument)> {
        let ScanOutcome {
            mut axes,
            mut instruments,
            ..
        } = self.scan;
        Some((axes.pop()?, instruments.pop()?))
    }
}

/// Sweep `axis` over `sweep.angles`, read `meter` at every angle and fit the
/// readings.
///
/// The axis keeps its previous calibration when the sweep is aborted or the
/// fit fails; the failure is reported in [`CalibrationRun::curve`]. Only a
/// misconfigured sweep returns an error.
pub async fn calibrate_axis<F>(
    coordinator: &ScanCoordinator,
    sweep: &CalibrationSweep,
    axis: Axis,
    meter: Instrument,
    abort: AbortSignal,
    progress: F,
) -> BenchResult<CalibrationRun>
where
    F: Fn(ScanEvent) + Send + Sync + 'static,
{
    let axis_id = axis.id().to_string();
    let meter_id = meter.id().to_string();
    let config = sweep.scan_config(&axis_id, &meter_id)?;

    info!(axis = %axis_id, instrument = %meter_id, points = config.points.len(), "Starting calibration");
    let mut scan = coordinator
        .run(config, vec![axis], vec![meter], abort, progress)
        .await?;

    let curve = if scan.result.aborted {
        Err(BenchError::CalibrationFit(
            "calibration sweep was aborted".to_string(),
        ))
    } else {
        CalibrationCurve::fit_scan(&scan.result, &meter_id).map(Arc::new)
    };

    match (&curve, scan.axes.first_mut()) {
        (Ok(curve), Some(axis)) => axis.set_calibration(Some(Arc::clone(curve))),
        (Err(err), _) => {
            warn!(axis = %axis_id, error = %err, "Calibration failed, keeping previous curve")
        }
        (Ok(_), None) => {}
    }

    Ok(CalibrationRun { curve, scan })
}
