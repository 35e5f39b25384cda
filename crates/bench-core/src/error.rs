//! Error types for the scan bench.
//!
//! `BenchError` is the single error type returned by the engine's own
//! operations. Driver implementations keep returning `anyhow::Result` (see
//! [`crate::capabilities`]); the engine wraps those failures into the variant
//! that describes what the failure means for a running sweep.
//!
//! ## Error Hierarchy
//!
//! - **Calibration**: `CalibrationFit`, `NoCalibration`. A failed fit is
//!   non-fatal: the caller falls back to raw-angle mode.
//! - **Motion**: `AxisNotActivated`, `AxisFault`, `AxisMoveFailed`. A failed
//!   move aborts the current sweep point only.
//! - **Acquisition**: `NotActivated`, `InstrumentUnavailable`. The instrument is
//!   skipped for the rest of the run until it is re-activated externally.
//! - **Persistence**: `PersistenceFailed`. Logged, never changes the outcome of
//!   a scan.
//! - **Caller configuration**: `InvalidScanConfig`, `Configuration`. These are
//!   the only errors a scan returns before it starts.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// What kind of driver operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Device could not be opened or initialized
    Initialization,
    /// Parameters were rejected
    Configuration,
    /// Link to the device failed
    Communication,
    /// Release or disable failed
    Shutdown,
    /// Device reported a fault
    Hardware,
    /// No answer in time
    Timeout,
    /// Argument outside the supported range
    InvalidParameter,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Shutdown => "shutdown",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Categorised failure reported by a device driver.
///
/// Drivers return `anyhow::Error`; wrapping a `DriverError` inside it lets
/// callers downcast and inspect the failure kind.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver that raised the error, e.g. `mock_power_meter`
    pub driver_type: String,
    /// Failure category
    pub kind: DriverErrorKind,
    /// Driver-specific detail
    pub message: String,
}

impl DriverError {
    /// Build a driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the bench error type.
pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Primary error type for the scan bench.
#[derive(Error, Debug)]
pub enum BenchError {
    /// The cosine calibration fit could not be produced.
    ///
    /// Occurs when fewer than three samples are supplied, when the samples are
    /// not finite, or when the optimizer does not converge to a positive
    /// amplitude.
    ///
    /// **Error Type**: Non-fatal.
    ///
    /// **Recovery Strategy**: Drive the axis in raw-angle mode and report the
    /// missing calibration to the user.
    #[error("Calibration fit failed: {0}")]
    CalibrationFit(String),

    /// Power mode was requested on an axis that has no fitted curve.
    ///
    /// **Error Type**: Caller configuration error.
    ///
    /// **Recovery Strategy**: Load a calibration for the axis or drive it by
    /// raw angle.
    #[error("Axis '{axis}' has no calibration; power mode unavailable")]
    NoCalibration { axis: String },

    /// A move was requested before the axis was activated.
    #[error("Axis '{axis}' is not activated")]
    AxisNotActivated { axis: String },

    /// The stage driver failed to activate, home or disable.
    ///
    /// **Recovery Strategy**: The axis stays (or becomes) uninitialized; call
    /// `activate` again once the controller responds.
    #[error("Axis '{axis}' fault: {message}")]
    AxisFault { axis: String, message: String },

    /// The stage driver rejected or failed a move.
    ///
    /// **Error Type**: Transient or permanent depending on the stage.
    ///
    /// **Recovery Strategy**: Inside a sweep the current point is skipped and
    /// the sweep continues at the next point.
    #[error("Axis '{axis}' failed to move to {target:.4}: {message}")]
    AxisMoveFailed {
        axis: String,
        target: f64,
        message: String,
    },

    /// Acquisition was requested on an instrument that is not activated.
    ///
    /// **Recovery Strategy**: Same as `InstrumentUnavailable`.
    #[error("Instrument '{instrument}' is not activated")]
    NotActivated { instrument: String },

    /// The instrument failed to activate, configure or acquire.
    ///
    /// **Recovery Strategy**: The instrument is skipped for the remainder of
    /// the run; re-activate it once the hardware is back.
    #[error("Instrument '{instrument}' unavailable: {message}")]
    InstrumentUnavailable { instrument: String, message: String },

    /// The persistence sink failed to store a scan result.
    ///
    /// **Error Type**: Logged only. A sweep that succeeded in hardware terms is
    /// never reported as failed because disk I/O failed.
    #[error("Failed to persist scan result: {0}")]
    PersistenceFailed(String),

    /// The scan configuration cannot be run.
    ///
    /// Occurs for an empty point list, for a scan with neither axes nor
    /// instruments, or for bindings that reference unknown devices.
    #[error("Invalid scan configuration: {0}")]
    InvalidScanConfig(String),

    /// Bench configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A worker task panicked or was cancelled before handing its result back.
    #[error("Worker task failed: {0}")]
    Worker(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// True for errors that take an instrument out of a running scan until
    /// it is re-activated.
    pub fn is_instrument_failure(&self) -> bool {
        matches!(
            self,
            BenchError::NotActivated { .. } | BenchError::InstrumentUnavailable { .. }
        )
    }
}

impl From<figment::Error> for BenchError {
    fn from(err: figment::Error) -> Self {
        BenchError::Configuration(err.to_string())
    }
}
