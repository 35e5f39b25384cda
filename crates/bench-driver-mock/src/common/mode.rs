//! Operational modes for mock devices.
//!
//! - **Instant**: Zero delays, deterministic behavior for unit tests
//! - **Realistic**: Hardware-like timing for demos and integration tests

use std::time::Duration;

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Zero delays - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing
    Realistic,
}

impl MockMode {
    /// Sleep for `duration` in realistic mode; return immediately otherwise.
    pub async fn pause(self, duration: Duration) {
        if self == MockMode::Realistic && !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
