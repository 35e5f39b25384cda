//! Mock Hardware Drivers for the scan bench
//!
//! Simulated devices implementing the `bench-core` driver traits, for tests
//! and demos without hardware. All delays use `tokio::time::sleep` and only
//! happen in [`MockMode::Realistic`].
//!
//! # Available Mock Drivers
//!
//! - [`MockRotator`] - waveplate rotation mount (`StageDriver`), 0-360°
//! - [`MockPowerMeter`] - scalar readings, fixed or following a waveplate
//! - [`MockSpectrometer`] - vector readings with a single emission line
//! - [`MockCamera`] - matrix readings of a Gaussian beam spot
//!
//! # Performance Characteristics (realistic mode)
//!
//! - MockRotator: 10 ms per degree plus 30 ms settling
//! - MockPowerMeter: `exposure * averages`
//! - MockSpectrometer: `exposure * averages` plus 8 ms readout
//! - MockCamera: 33 ms readout per frame
//!
//! # Error Injection
//!
//! Every driver accepts an [`ErrorConfig`]; operations are named `activate`,
//! `configure`, `acquire`, `deactivate` for instruments and `activate`,
//! `home`, `move`, `position`, `disable` for the rotator.
//!
//! ```rust,ignore
//! let flaky = MockPowerMeter::new(0.5)
//!     .with_error_config(ErrorConfig::fail_on_call("acquire", 2));
//! ```

pub mod common;
mod mock_camera;
mod mock_power_meter;
mod mock_rotator;
mod mock_spectrometer;
mod pattern;
pub mod source;

// Re-export common types
pub use common::{ErrorConfig, ErrorScenario, InstrumentLifecycle, MockMode, MockRng, TimingConfig};

// Re-export driver types
pub use mock_camera::{MockCamera, MockCameraBuilder};
pub use mock_power_meter::MockPowerMeter;
pub use mock_rotator::MockRotator;
pub use mock_spectrometer::MockSpectrometer;
pub use source::{NoiseModel, PowerSource};

pub use pattern::beam_profile;
