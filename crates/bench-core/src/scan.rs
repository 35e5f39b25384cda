//! Scan description, progress events and results.
//!
//! A [`ScanConfig`] is pure data: which points to visit, how each point maps
//! onto every bound axis, and which instruments to poll once the axes have
//! arrived. The engine executes it and accumulates a [`ScanResult`], emitting
//! [`ScanEvent`]s in algorithm order as it goes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};
use crate::params::AcquisitionParams;
use crate::reading::Reading;

// =============================================================================
// Axis mapping
// =============================================================================

/// Beam selected by a [`AxisMapping::RedGreenRatio`] mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Beam {
    /// Red arm, `P_red`
    Red,
    /// Green arm, `P_green`
    Green,
}

/// Per-axis transform from a sweep point to an axis target.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AxisMapping {
    /// Target equals the point value
    #[default]
    Identity,
    /// `scale * point + offset`
    Linear { scale: f64, offset: f64 },
    /// Two-colour power split driven by the red/green power ratio `r`.
    ///
    /// `P_red = constant / (1 + r)`, `P_green = r * P_red / focus_ratio²`
    RedGreenRatio {
        constant: f64,
        focus_ratio: f64,
        beam: Beam,
    },
    /// Target taken from a table indexed by point index
    Lookup { values: Vec<f64> },
    /// Arbitrary closure of `(point_index, point)`
    #[serde(skip)]
    Custom(Arc<dyn Fn(usize, f64) -> f64 + Send + Sync>),
}

impl std::fmt::Debug for AxisMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => f.write_str("Identity"),
            Self::Linear { scale, offset } => f
                .debug_struct("Linear")
                .field("scale", scale)
                .field("offset", offset)
                .finish(),
            Self::RedGreenRatio {
                constant,
                focus_ratio,
                beam,
            } => f
                .debug_struct("RedGreenRatio")
                .field("constant", constant)
                .field("focus_ratio", focus_ratio)
                .field("beam", beam)
                .finish(),
            Self::Lookup { values } => f.debug_struct("Lookup").field("values", values).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl AxisMapping {
    /// Wrap a closure of `(point_index, point)`.
    pub fn custom(f: impl Fn(usize, f64) -> f64 + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Axis target for point `index` with value `point`.
    ///
    /// A lookup table shorter than the point list yields NaN, which the axis
    /// rejects as a failed move.
    pub fn target(&self, index: usize, point: f64) -> f64 {
        match self {
            Self::Identity => point,
            Self::Linear { scale, offset } => scale * point + offset,
            Self::RedGreenRatio {
                constant,
                focus_ratio,
                beam,
            } => {
                let red = constant / (1.0 + point);
                match beam {
                    Beam::Red => red,
                    Beam::Green => point * red / (focus_ratio * focus_ratio),
                }
            }
            Self::Lookup { values } => values.get(index).copied().unwrap_or(f64::NAN),
            Self::Custom(f) => f(index, point),
        }
    }
}

// =============================================================================
// Bindings
// =============================================================================

/// Binds one axis into a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisBinding {
    /// Id of the bound axis handle
    pub axis_id: String,
    /// Point to target transform
    #[serde(default)]
    pub mapping: AxisMapping,
    /// Interpret targets as optical power rather than raw angle
    #[serde(default)]
    pub power_mode: bool,
}

impl AxisBinding {
    /// Drive the axis by raw angle.
    pub fn angle(axis_id: impl Into<String>) -> Self {
        Self {
            axis_id: axis_id.into(),
            mapping: AxisMapping::Identity,
            power_mode: false,
        }
    }

    /// Drive the axis by calibrated power.
    pub fn power(axis_id: impl Into<String>) -> Self {
        Self {
            power_mode: true,
            ..Self::angle(axis_id)
        }
    }

    /// Replace the identity mapping.
    pub fn with_mapping(mut self, mapping: AxisMapping) -> Self {
        self.mapping = mapping;
        self
    }
}

/// Binds one instrument into a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentBinding {
    /// Id of the bound instrument handle
    pub instrument_id: String,
    /// Applied through `configure` before each poll
    #[serde(default)]
    pub params: Option<AcquisitionParams>,
}

impl InstrumentBinding {
    /// Poll `instrument_id` without reconfiguring it.
    pub fn new(instrument_id: impl Into<String>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            params: None,
        }
    }

    /// Configure these parameters before the first poll.
    pub fn with_params(mut self, params: AcquisitionParams) -> Self {
        self.params = Some(params);
        self
    }
}

// =============================================================================
// ScanConfig
// =============================================================================

fn default_name() -> String {
    "scan".to_string()
}

/// Complete description of one sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Used by sinks for directory and file naming
    #[serde(default = "default_name")]
    pub name: String,
    /// Sweep values, visited in order
    pub points: Vec<f64>,
    /// Axes moved at every point, in order
    #[serde(default)]
    pub axes: Vec<AxisBinding>,
    /// Instruments polled at every point, in order
    #[serde(default)]
    pub instruments: Vec<InstrumentBinding>,
    /// Pause after all moves of a point, before polling
    #[serde(default, with = "humantime_serde")]
    pub settle_time: Duration,
    /// Pause between consecutive instrument polls of one point
    #[serde(default, with = "humantime_serde")]
    pub inter_instrument_delay: Duration,
    /// Background measurement: unavailable instruments are still polled
    #[serde(default)]
    pub background: bool,
    /// Free text carried into the result and the log
    #[serde(default)]
    pub comment: String,
}

impl ScanConfig {
    /// Start an empty [`ScanConfigBuilder`].
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Cartesian product of per-axis position lists.
    ///
    /// The last axis varies fastest. Points are the flat point indices and
    /// every axis is bound through a lookup table.
    pub fn grid(axes: Vec<GridAxis>) -> ScanConfigBuilder {
        let total: usize = if axes.is_empty() {
            0
        } else {
            axes.iter().map(|a| a.positions.len()).product()
        };

        let mut tables: Vec<Vec<f64>> = vec![Vec::with_capacity(total); axes.len()];
        for flat in 0..total {
            let mut rest = flat;
            for (slot, axis) in axes.iter().enumerate().rev() {
                let n = axis.positions.len();
                tables[slot].push(axis.positions[rest % n]);
                rest /= n;
            }
        }

        let mut builder = ScanConfigBuilder::default().points((0..total).map(|i| i as f64));
        for (axis, values) in axes.into_iter().zip(tables) {
            let binding = AxisBinding {
                axis_id: axis.axis_id,
                mapping: AxisMapping::Lookup { values },
                power_mode: axis.power_mode,
            };
            builder = builder.axis(binding);
        }
        builder
    }

    /// Structural checks that need no hardware.
    pub fn validate(&self) -> BenchResult<()> {
        if self.points.is_empty() {
            return Err(BenchError::InvalidScanConfig(
                "scan has no points".to_string(),
            ));
        }
        if self.axes.is_empty() && self.instruments.is_empty() {
            return Err(BenchError::InvalidScanConfig(
                "scan binds neither axes nor instruments".to_string(),
            ));
        }
        if let Some(bad) = self.points.iter().find(|p| !p.is_finite()) {
            return Err(BenchError::InvalidScanConfig(format!(
                "non-finite scan point {bad}"
            )));
        }

        let mut seen = HashSet::new();
        for binding in &self.axes {
            if !seen.insert(binding.axis_id.as_str()) {
                return Err(BenchError::InvalidScanConfig(format!(
                    "axis '{}' is bound twice",
                    binding.axis_id
                )));
            }
            if let AxisMapping::Lookup { values } = &binding.mapping {
                if values.len() != self.points.len() {
                    return Err(BenchError::InvalidScanConfig(format!(
                        "lookup table for axis '{}' has {} entries for {} points",
                        binding.axis_id,
                        values.len(),
                        self.points.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check that every binding names a device handed to the engine.
    pub fn check_bindings<'a>(
        &self,
        axis_ids: impl IntoIterator<Item = &'a str>,
        instrument_ids: impl IntoIterator<Item = &'a str>,
    ) -> BenchResult<()> {
        let axis_ids: HashSet<&str> = axis_ids.into_iter().collect();
        let instrument_ids: HashSet<&str> = instrument_ids.into_iter().collect();

        if let Some(b) = self
            .axes
            .iter()
            .find(|b| !axis_ids.contains(b.axis_id.as_str()))
        {
            return Err(BenchError::InvalidScanConfig(format!(
                "unknown axis '{}'",
                b.axis_id
            )));
        }
        if let Some(b) = self
            .instruments
            .iter()
            .find(|b| !instrument_ids.contains(b.instrument_id.as_str()))
        {
            return Err(BenchError::InvalidScanConfig(format!(
                "unknown instrument '{}'",
                b.instrument_id
            )));
        }
        Ok(())
    }
}

/// `steps` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (steps - 1) as f64;
            (0..steps).map(|i| start + step * i as f64).collect()
        }
    }
}

/// One axis of a [`ScanConfig::grid`].
#[derive(Debug, Clone)]
pub struct GridAxis {
    /// Axis stepped by this grid dimension
    pub axis_id: String,
    /// Positions are powers rather than angles
    pub power_mode: bool,
    /// Values visited along this dimension
    pub positions: Vec<f64>,
}

impl GridAxis {
    /// Raw-angle grid dimension.
    pub fn new(axis_id: impl Into<String>, positions: Vec<f64>) -> Self {
        Self {
            axis_id: axis_id.into(),
            power_mode: false,
            positions,
        }
    }

    /// Interpret the positions as powers.
    pub fn power(mut self) -> Self {
        self.power_mode = true;
        self
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug, Clone, Default)]
pub struct ScanConfigBuilder {
    name: Option<String>,
    points: Vec<f64>,
    axes: Vec<AxisBinding>,
    instruments: Vec<InstrumentBinding>,
    settle_time: Duration,
    inter_instrument_delay: Duration,
    background: bool,
    comment: String,
}

impl ScanConfigBuilder {
    /// Scan name, used for the log directory.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append sweep points.
    pub fn points(mut self, points: impl IntoIterator<Item = f64>) -> Self {
        self.points.extend(points);
        self
    }

    /// Append `steps` evenly spaced points from `start` to `stop`.
    pub fn linspace(self, start: f64, stop: f64, steps: usize) -> Self {
        self.points(linspace(start, stop, steps))
    }

    /// Bind an axis.
    pub fn axis(mut self, binding: AxisBinding) -> Self {
        self.axes.push(binding);
        self
    }

    /// Bind an instrument.
    pub fn instrument(mut self, binding: InstrumentBinding) -> Self {
        self.instruments.push(binding);
        self
    }

    /// Wait after the moves of each point.
    pub fn settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// Wait between consecutive instrument polls.
    pub fn inter_instrument_delay(mut self, delay: Duration) -> Self {
        self.inter_instrument_delay = delay;
        self
    }

    /// Mark the scan as a background (dark) measurement.
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Attach a free-text comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Build and validate.
    pub fn build(self) -> BenchResult<ScanConfig> {
        let config = ScanConfig {
            name: self.name.unwrap_or_else(default_name),
            points: self.points,
            axes: self.axes,
            instruments: self.instruments,
            settle_time: self.settle_time,
            inter_instrument_delay: self.inter_instrument_delay,
            background: self.background,
            comment: self.comment,
        };
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Progress events
// =============================================================================

/// Why a point (or one instrument of a point) produced no reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointFailure {
    /// A move failed; the rest of the point was skipped
    AxisMove { axis: String, message: String },
    /// Configure or acquire failed
    Instrument { instrument: String, message: String },
    /// Instrument was already unavailable and the scan is not a background scan
    InstrumentSkipped { instrument: String },
}

impl std::fmt::Display for PointFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AxisMove { axis, message } => write!(f, "axis '{axis}' move failed: {message}"),
            Self::Instrument {
                instrument,
                message,
            } => write!(f, "instrument '{instrument}' failed: {message}"),
            Self::InstrumentSkipped { instrument } => {
                write!(f, "instrument '{instrument}' unavailable, skipped")
            }
        }
    }
}

/// Progress notification, delivered in algorithm order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    /// Point `index` is about to be moved to
    PointStarted {
        index: usize,
        point: f64,
    },
    /// An axis reached its target for point `index`
    AxisMoved {
        index: usize,
        axis: String,
        target: f64,
        angle: f64,
        position: f64,
        capped: bool,
    },
    /// An instrument delivered a reading
    ReadingAcquired {
        index: usize,
        instrument: String,
        reading: Reading,
    },
    /// A move or an instrument failed; the reading is recorded as a gap
    PointFailed {
        index: usize,
        point: f64,
        cause: PointFailure,
    },
    /// The run stopped on an abort request after `completed` points
    Aborted {
        completed: usize,
    },
    /// Every point was visited
    Completed {
        completed: usize,
    },
}

// =============================================================================
// ScanResult
// =============================================================================

/// A reading tagged with the point it was taken at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Position in [`ScanConfig::points`]
    pub point_index: usize,
    /// Sweep value at that position
    pub point: f64,
    /// The acquisition
    pub reading: Reading,
}

/// A reading that is missing from the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    /// Point that is missing the reading
    pub point_index: usize,
    /// `None` when the whole point was lost to a failed move
    pub instrument: Option<String>,
    /// Why nothing was recorded
    pub reason: String,
}

/// Data accumulated by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Samples by instrument id, in acquisition order
    pub per_instrument: BTreeMap<String, Vec<Sample>>,
    /// Completion time of every fully polled point
    pub timestamps: Vec<DateTime<Utc>>,
    /// Point index of every entry in `timestamps`
    pub completed_points: Vec<usize>,
    /// Missing readings, in the order they occurred
    pub gaps: Vec<Gap>,
    /// The run stopped early on an abort request
    pub aborted: bool,
    /// Copied from the configuration
    pub background: bool,
    /// Copied from the configuration
    pub comment: String,
}

impl ScanResult {
    /// Empty result for `config`, with one (empty) series per bound instrument.
    pub fn for_config(config: &ScanConfig) -> Self {
        Self {
            per_instrument: config
                .instruments
                .iter()
                .map(|b| (b.instrument_id.clone(), Vec::new()))
                .collect(),
            background: config.background,
            comment: config.comment.clone(),
            ..Self::default()
        }
    }

    /// Samples of one instrument; empty when it never delivered.
    pub fn samples(&self, instrument_id: &str) -> &[Sample] {
        self.per_instrument
            .get(instrument_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of samples over all instruments.
    pub fn sample_count(&self) -> usize {
        self.per_instrument.values().map(Vec::len).sum()
    }

    /// Append a sample for `instrument_id`.
    pub fn push_sample(&mut self, instrument_id: &str, sample: Sample) {
        self.per_instrument
            .entry(instrument_id.to_string())
            .or_default()
            .push(sample);
    }

    /// Record a missing reading; `instrument` is `None` when the whole point was lost.
    pub fn record_gap(&mut self, point_index: usize, instrument: Option<&str>, reason: String) {
        self.gaps.push(Gap {
            point_index,
            instrument: instrument.map(str::to_string),
            reason,
        });
    }

    /// Mark `point_index` as fully polled at `at`.
    pub fn complete_point(&mut self, point_index: usize, at: DateTime<Utc>) {
        self.completed_points.push(point_index);
        self.timestamps.push(at);
    }

    /// Serialize the whole result, samples included.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// Destination for finished scans.
///
/// Called exactly once per run, after the last point or after an abort.
#[async_trait]
pub trait ScanSink: Send + Sync {
    async fn save(&self, result: &ScanResult, config: &ScanConfig) -> anyhow::Result<()>;
}
