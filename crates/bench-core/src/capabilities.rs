//! Driver Capabilities
//!
//! The engine talks to hardware through two narrow traits:
//!
//! - [`StageDriver`]: a rotation stage (waveplate mount, polarizer mount)
//! - [`InstrumentDriver`]: anything that produces a [`Reading`] on request
//!   (power meter, spectrometer, camera)
//!
//! Vendor SDK wrappers implement these; the engine wraps them in `Axis` and
//! `Instrument` handles that add state tracking, calibration and failure
//! isolation.
//!
//! # Design Philosophy
//!
//! Each driver trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; drivers use interior mutability for their state
//!
//! # Example
//!
//! ```rust,ignore
//! struct BenchPowerMeter {
//!     port: Mutex<SerialPort>,
//! }
//!
//! #[async_trait]
//! impl InstrumentDriver for BenchPowerMeter {
//!     async fn activate(&self) -> Result<()> { self.port.lock().await.open() }
//!     async fn configure(&self, params: &AcquisitionParams) -> Result<()> {
//!         self.port.lock().await.write(&format!("AVG {}", params.averages))
//!     }
//!     async fn acquire(&self) -> Result<Reading> {
//!         let watts = self.port.lock().await.query_f64("PW?")?;
//!         Ok(Reading::scalar(watts))
//!     }
//!     async fn deactivate(&self) -> Result<()> { Ok(()) }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::params::AcquisitionParams;
use crate::reading::Reading;

// =============================================================================
// Device Category
// =============================================================================

/// Instrument category for logging and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    /// Power meters and energy sensors (scalar readings)
    PowerMeter,
    /// Spectrometers (vector readings)
    Spectrometer,
    /// Cameras and imaging devices (matrix readings)
    Camera,
    /// Devices that don't fit other categories
    #[default]
    Other,
}

impl DeviceCategory {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::PowerMeter => "Power Meter",
            Self::Spectrometer => "Spectrometer",
            Self::Camera => "Camera",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Stage
// =============================================================================

/// Capability: Rotation Stage
///
/// Positions are in degrees.
///
/// # Contract
/// - `activate` powers the controller and optionally homes it
/// - `move_to` with `blocking = true` returns once the stage has settled
/// - `position` returns the encoder read-back
/// - `disable` releases the motor; a later `activate` is required
#[async_trait]
pub trait StageDriver: Send + Sync {
    /// Enable the controller, homing first when `homing` is set.
    async fn activate(&self, homing: bool) -> Result<()>;

    /// Run the homing sequence.
    async fn home(&self) -> Result<()>;

    /// Move to an absolute angle in degrees.
    ///
    /// # Returns
    /// - Ok(()) once motion completed (blocking) or was initiated
    /// - Err if the angle is out of range or on hardware error
    async fn move_to(&self, angle: f64, blocking: bool) -> Result<()>;

    /// Current angle in degrees.
    async fn position(&self) -> Result<f64>;

    /// Release the motor.
    async fn disable(&self) -> Result<()>;
}

// =============================================================================
// Instrument
// =============================================================================

/// Capability: Single Acquisition
///
/// Devices that return one [`Reading`] per `acquire` call.
///
/// # Contract
/// - `acquire` is only called after a successful `activate`
/// - `configure` may be called between acquisitions; the engine only calls it
///   when parameters actually changed
/// - Acquisition should respect `exposure * averages` as its nominal duration
#[async_trait]
pub trait InstrumentDriver: Send + Sync {
    /// Open the device.
    async fn activate(&self) -> Result<()>;

    /// Apply exposure / averaging parameters.
    async fn configure(&self, params: &AcquisitionParams) -> Result<()>;

    /// Perform one acquisition.
    ///
    /// # Returns
    /// - Ok(reading) on success
    /// - Err on timeout, disconnect or hardware error
    async fn acquire(&self) -> Result<Reading>;

    /// Close the device.
    async fn deactivate(&self) -> Result<()>;
}
