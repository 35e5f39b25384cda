//! Acquisition parameters shared by scans and the live loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exposure, averaging and cycle interval for one instrument.
///
/// `PartialEq` is what decides whether a `configure` call reaches the driver:
/// identical parameters are never re-applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParams {
    /// Integration time per acquisition
    #[serde(with = "humantime_serde")]
    pub exposure: Duration,
    /// Number of acquisitions averaged into one reading
    pub averages: u32,
    /// Delay between live-loop cycles
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        Self {
            exposure: Duration::from_millis(100),
            averages: 1,
            interval: Duration::from_millis(200),
        }
    }
}

impl AcquisitionParams {
    /// Parameters from explicit values.
    pub fn new(exposure: Duration, averages: u32, interval: Duration) -> Self {
        Self {
            exposure,
            averages,
            interval,
        }
    }

    /// Replace the exposure time.
    pub fn with_exposure(mut self, exposure: Duration) -> Self {
        self.exposure = exposure;
        self
    }

    /// Replace the number of averaged acquisitions.
    pub fn with_averages(mut self, averages: u32) -> Self {
        self.averages = averages;
        self
    }

    /// Replace the live-loop interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}
