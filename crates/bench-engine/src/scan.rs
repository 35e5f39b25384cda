//! Scan coordinator.
//!
//! Runs a [`ScanConfig`] on a dedicated tokio task. The coordinator takes
//! ownership of the [`Axis`] and [`Instrument`] handles for the duration of
//! the sweep and hands them back untouched in the [`ScanOutcome`]; lifecycle
//! (activation, deactivation) stays with the caller.
//!
//! # Per-point flow
//!
//! ```text
//! abort? ──yes──▶ Aborted ──▶ save ──▶ return
//!   │no
//!   ▼
//! PointStarted ─▶ move every bound axis ─(fail)─▶ PointFailed, next point
//!   │
//!   ▼
//! settle ─▶ poll instruments in order ─▶ timestamp
//! ```
//!
//! Single-point and single-instrument failures are isolated: they show up as
//! [`ScanEvent::PointFailed`] and as gaps in the result, never as an error
//! from the scan itself.

use std::collections::HashSet;
use std::sync::Arc;

use bench_core::{
    BenchError, BenchResult, PointFailure, Sample, ScanConfig, ScanEvent, ScanResult, ScanSink,
};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::abort::AbortSignal;
use crate::axis::Axis;
use crate::instrument::Instrument;

/// Everything a finished (or aborted) sweep hands back.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Samples, gaps and timestamps collected so far
    pub result: ScanResult,
    /// Axis handles, in the order they were passed in
    pub axes: Vec<Axis>,
    /// Instrument handles, in the order they were passed in
    pub instruments: Vec<Instrument>,
    /// Set when the sink failed; the scan itself still counts as successful
    pub persistence_error: Option<BenchError>,
}

/// A scan that could not be started.
///
/// Carries the handles back so the caller keeps ownership of the hardware.
#[derive(Debug)]
pub struct ScanRejected {
    /// Why the scan was rejected
    pub error: BenchError,
    /// Axis handles, untouched
    pub axes: Vec<Axis>,
    /// Instrument handles, untouched
    pub instruments: Vec<Instrument>,
}

impl std::fmt::Display for ScanRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scan rejected: {}", self.error)
    }
}

impl std::error::Error for ScanRejected {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<ScanRejected> for BenchError {
    fn from(rejected: ScanRejected) -> Self {
        rejected.error
    }
}

/// Handle to a running scan.
pub struct ScanHandle {
    abort: AbortSignal,
    task: JoinHandle<ScanOutcome>,
}

impl ScanHandle {
    /// Request a cooperative stop; the in-flight move or acquisition finishes
    /// first.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// True once the scan task returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the scan task and take back the result and the handles.
    pub async fn join(self) -> BenchResult<ScanOutcome> {
        self.task
            .await
            .map_err(|e| BenchError::Worker(format!("scan task failed: {e}")))
    }
}

/// Executes scans and forwards finished results to an optional sink.
#[derive(Clone, Default)]
pub struct ScanCoordinator {
    sink: Option<Arc<dyn ScanSink>>,
}

impl ScanCoordinator {
    /// Coordinator without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinator that hands every finished result to `sink`.
    pub fn with_sink(sink: Arc<dyn ScanSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Validate `config` against the handed-in devices and spawn the sweep.
    ///
    /// Misconfiguration is the only error returned here. Must be called from
    /// within a tokio runtime.
    pub fn start<F>(
        &self,
        config: ScanConfig,
        axes: Vec<Axis>,
        instruments: Vec<Instrument>,
        abort: AbortSignal,
        progress: F,
    ) -> Result<ScanHandle, ScanRejected>
    where
        F: Fn(ScanEvent) + Send + Sync + 'static,
    {
        if let Err(error) = check_devices(&config, &axes, &instruments) {
            return Err(ScanRejected {
                error,
                axes,
                instruments,
            });
        }

        let axis_slots = slots(config.axes.iter().map(|b| b.axis_id.as_str()), &axes, Axis::id);
        let instrument_slots = slots(
            config.instruments.iter().map(|b| b.instrument_id.as_str()),
            &instruments,
            Instrument::id,
        );

        info!(
            scan = %config.name,
            points = config.points.len(),
            axes = config.axes.len(),
            instruments = config.instruments.len(),
            background = config.background,
            "Starting scan"
        );

        let run = ScanRun {
            config,
            axes,
            instruments,
            axis_slots,
            instrument_slots,
            abort: abort.clone(),
            sink: self.sink.clone(),
            progress,
        };
        let task = tokio::spawn(run.execute());

        Ok(ScanHandle { abort, task })
    }

    /// Start the scan and wait for it to finish.
    pub async fn run<F>(
        &self,
        config: ScanConfig,
        axes: Vec<Axis>,
        instruments: Vec<Instrument>,
        abort: AbortSignal,
        progress: F,
    ) -> BenchResult<ScanOutcome>
    where
        F: Fn(ScanEvent) + Send + Sync + 'static,
    {
        self.start(config, axes, instruments, abort, progress)?
            .join()
            .await
    }
}

fn check_devices(config: &ScanConfig, axes: &[Axis], instruments: &[Instrument]) -> BenchResult<()> {
    config.validate()?;

    let mut seen = HashSet::new();
    if let Some(dup) = axes.iter().find(|a| !seen.insert(a.id())) {
        return Err(BenchError::InvalidScanConfig(format!(
            "two axes share the id '{}'",
            dup.id()
        )));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = instruments.iter().find(|i| !seen.insert(i.id())) {
        return Err(BenchError::InvalidScanConfig(format!(
            "two instruments share the id '{}'",
            dup.id()
        )));
    }

    config.check_bindings(
        axes.iter().map(Axis::id),
        instruments.iter().map(Instrument::id),
    )
}

/// Position of each bound device in its handle list. Bindings were checked,
/// so every id resolves.
fn slots<'a, T>(
    ids: impl Iterator<Item = &'a str>,
    handles: &[T],
    id_of: impl Fn(&T) -> &str,
) -> Vec<usize> {
    ids.filter_map(|id| handles.iter().position(|h| id_of(h) == id))
        .collect()
}

struct ScanRun<F> {
    config: ScanConfig,
    axes: Vec<Axis>,
    instruments: Vec<Instrument>,
    axis_slots: Vec<usize>,
    instrument_slots: Vec<usize>,
    abort: AbortSignal,
    sink: Option<Arc<dyn ScanSink>>,
    progress: F,
}

/// How a single point ended.
enum PointEnd {
    Polled,
    MoveFailed,
    Aborted,
}

impl<F> ScanRun<F>
where
    F: Fn(ScanEvent) + Send + Sync + 'static,
{
    async fn execute(mut self) -> ScanOutcome {
        let mut result = ScanResult::for_config(&self.config);

        for index in 0..self.config.points.len() {
            if self.abort.is_aborted() {
                result.aborted = true;
                break;
            }
            match self.run_point(index, &mut result).await {
                PointEnd::Polled => result.complete_point(index, Utc::now()),
                PointEnd::MoveFailed => {}
                PointEnd::Aborted => {
                    result.aborted = true;
                    break;
                }
            }
        }

        let completed = result.completed_points.len();
        if result.aborted {
            info!(scan = %self.config.name, completed, "Scan aborted");
            (self.progress)(ScanEvent::Aborted { completed });
        }

        let persistence_error = self.persist(&result).await;

        if !result.aborted {
            info!(
                scan = %self.config.name,
                completed,
                samples = result.sample_count(),
                gaps = result.gaps.len(),
                "Scan completed"
            );
            (self.progress)(ScanEvent::Completed { completed });
        }

        ScanOutcome {
            result,
            axes: self.axes,
            instruments: self.instruments,
            persistence_error,
        }
    }

    async fn run_point(&mut self, index: usize, result: &mut ScanResult) -> PointEnd {
        let point = self.config.points[index];
        (self.progress)(ScanEvent::PointStarted { index, point });
        debug!(scan = %self.config.name, index, point, "Point started");

        for (binding, &slot) in self.config.axes.iter().zip(&self.axis_slots) {
            let axis = &mut self.axes[slot];
            let target = binding.mapping.target(index, point);
            match axis.move_to(target, binding.power_mode).await {
                Ok(outcome) => (self.progress)(ScanEvent::AxisMoved {
                    index,
                    axis: binding.axis_id.clone(),
                    target: outcome.target,
                    angle: outcome.angle,
                    position: outcome.position,
                    capped: outcome.capped,
                }),
                Err(err) => {
                    warn!(
                        axis = %binding.axis_id,
                        index,
                        target,
                        error = %err,
                        "Move failed, skipping point"
                    );
                    result.record_gap(index, None, err.to_string());
                    (self.progress)(ScanEvent::PointFailed {
                        index,
                        point,
                        cause: PointFailure::AxisMove {
                            axis: binding.axis_id.clone(),
                            message: err.to_string(),
                        },
                    });
                    return PointEnd::MoveFailed;
                }
            }
        }

        if !self.config.settle_time.is_zero() {
            sleep(self.config.settle_time).await;
        }

        let last = self.config.instruments.len().saturating_sub(1);
        for (order, (binding, &slot)) in self
            .config
            .instruments
            .iter()
            .zip(&self.instrument_slots)
            .enumerate()
        {
            if order > 0 && self.abort.is_aborted() {
                return PointEnd::Aborted;
            }

            let instrument = &mut self.instruments[slot];
            if !self.config.background && !instrument.is_available() {
                warn!(
                    instrument = %binding.instrument_id,
                    index,
                    "Instrument unavailable, skipping"
                );
                result.record_gap(index, Some(&binding.instrument_id), "unavailable".to_string());
                (self.progress)(ScanEvent::PointFailed {
                    index,
                    point,
                    cause: PointFailure::InstrumentSkipped {
                        instrument: binding.instrument_id.clone(),
                    },
                });
                continue;
            }

            let polled = match &binding.params {
                Some(params) => match instrument.configure(params).await {
                    Ok(()) => instrument.acquire().await,
                    Err(err) => Err(err),
                },
                None => instrument.acquire().await,
            };

            match polled {
                Ok(reading) => {
                    result.push_sample(
                        &binding.instrument_id,
                        Sample {
                            point_index: index,
                            point,
                            reading: reading.clone(),
                        },
                    );
                    (self.progress)(ScanEvent::ReadingAcquired {
                        index,
                        instrument: binding.instrument_id.clone(),
                        reading,
                    });
                    if order < last && !self.config.inter_instrument_delay.is_zero() {
                        sleep(self.config.inter_instrument_delay).await;
                    }
                }
                Err(err) => {
                    warn!(
                        instrument = %binding.instrument_id,
                        index,
                        error = %err,
                        "Acquisition failed"
                    );
                    result.record_gap(index, Some(&binding.instrument_id), err.to_string());
                    (self.progress)(ScanEvent::PointFailed {
                        index,
                        point,
                        cause: PointFailure::Instrument {
                            instrument: binding.instrument_id.clone(),
                            message: err.to_string(),
                        },
                    });
                }
            }
        }

        PointEnd::Polled
    }

    async fn persist(&self, result: &ScanResult) -> Option<BenchError> {
        let sink = self.sink.as_ref()?;
        match sink.save(result, &self.config).await {
            Ok(()) => None,
            Err(err) => {
                let err = BenchError::PersistenceFailed(format!("{err:#}"));
                error!(scan = %self.config.name, error = %err, "Failed to save scan result");
                Some(err)
            }
        }
    }
}
