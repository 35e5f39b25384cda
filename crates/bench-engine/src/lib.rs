//! Scan engine for the waveplate bench.
//!
//! - [`Axis`]: a rotation stage, optionally driven by calibrated power
//! - [`Instrument`]: a detector with availability tracking
//! - [`ScanCoordinator`]: runs a [`bench_core::ScanConfig`] on its own task
//! - [`LiveLoop`]: continuous acquisition from one instrument
//! - [`calibrate_axis`]: sweep an axis against a power meter and fit its curve
//!
//! Workers take ownership of the handles they drive and return them when
//! they finish, so no device is ever driven from two tasks at once.

pub mod abort;
pub mod axis;
pub mod calibrate;
pub mod instrument;
pub mod live;
pub mod scan;

pub use abort::AbortSignal;
pub use axis::{normalize_angle, Axis, AxisState, MoveOutcome};
pub use calibrate::{calibrate_axis, CalibrationRun, CalibrationSweep};
pub use instrument::Instrument;
pub use live::{LiveLoop, MIN_INTERVAL};
pub use scan::{ScanCoordinator, ScanHandle, ScanOutcome, ScanRejected};
