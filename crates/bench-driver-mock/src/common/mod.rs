//! Common infrastructure for mock devices.
//!
//! - **mode**: Operational modes (Instant, Realistic)
//! - **timing**: Hardware-like delays used in realistic mode
//! - **errors**: Error injection framework
//! - **rng**: Seeded random number generator
//! - **lifecycle**: Activation and parameter bookkeeping shared by the
//!   acquirable mocks

pub mod errors;
pub mod lifecycle;
pub mod mode;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use lifecycle::InstrumentLifecycle;
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;
