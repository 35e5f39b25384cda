//! Mock camera producing matrix readings.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use bench_core::{AcquisitionParams, InstrumentDriver, Reading};

use crate::common::{ErrorConfig, InstrumentLifecycle, MockMode, TimingConfig};
use crate::pattern::beam_profile;
use crate::source::PowerSource;

const DRIVER_TYPE: &str = "mock_camera";

// =============================================================================
// MockCameraBuilder - Builder Pattern
// =============================================================================

/// Builder for MockCamera
pub struct MockCameraBuilder {
    width: usize,
    height: usize,
    mode: MockMode,
    error_config: ErrorConfig,
    timing_config: TimingConfig,
    source: PowerSource,
    /// Counts per watt per millisecond of exposure at the spot peak
    responsivity: f64,
}

impl MockCameraBuilder {
    /// Builder for a `width` x `height` camera.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            mode: MockMode::Instant,
            error_config: ErrorConfig::none(),
            timing_config: TimingConfig::camera(),
            source: PowerSource::fixed(1.0),
            responsivity: 10.0,
        }
    }

    /// Timing mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Failure injection.
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Replace the timing preset.
    pub fn timing_config(mut self, config: TimingConfig) -> Self {
        self.timing_config = config;
        self
    }

    /// Where the incident power comes from.
    pub fn source(mut self, source: PowerSource) -> Self {
        self.source = source;
        self
    }

    /// Peak counts per watt per millisecond of exposure.
    pub fn responsivity(mut self, counts_per_watt_ms: f64) -> Self {
        self.responsivity = counts_per_watt_ms;
        self
    }

    /// Finish the camera.
    pub fn build(self) -> MockCamera {
        MockCamera {
            width: self.width,
            height: self.height,
            mode: self.mode,
            error_config: self.error_config,
            timing: self.timing_config,
            source: self.source,
            responsivity: self.responsivity,
            frame_count: AtomicU64::new(0),
            lifecycle: InstrumentLifecycle::default(),
        }
    }
}

// =============================================================================
// MockCamera - Simulated Camera
// =============================================================================

/// Mock camera.
///
/// Simulates a beam-profiling camera with:
/// - Configurable resolution
/// - Spot brightness proportional to incident power and exposure
/// - Frame averaging (`averages` frames summed and divided)
/// - 33 ms readout in realistic mode
/// - Error injection on `activate`, `configure`, `acquire`, `deactivate`
///
/// # Example
///
/// ```rust,ignore
/// let camera = MockCamera::new(64, 48);
/// camera.activate().await?;
/// let frame = camera.acquire().await?;
/// assert_eq!(frame.len(), 64 * 48);
/// ```
pub struct MockCamera {
    width: usize,
    height: usize,
    mode: MockMode,
    error_config: ErrorConfig,
    timing: TimingConfig,
    source: PowerSource,
    responsivity: f64,
    frame_count: AtomicU64,
    lifecycle: InstrumentLifecycle,
}

impl MockCamera {
    /// Camera with default settings.
    pub fn new(width: usize, height: usize) -> Self {
        MockCameraBuilder::new(width, height).build()
    }

    /// Start a [`MockCameraBuilder`].
    pub fn builder(width: usize, height: usize) -> MockCameraBuilder {
        MockCameraBuilder::new(width, height)
    }

    /// `(width, height)` in pixels.
    pub fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Frames read out so far, including averaged sub-frames.
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    /// Activation state and counters.
    pub fn lifecycle(&self) -> &InstrumentLifecycle {
        &self.lifecycle
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(64, 48)
    }
}

#[async_trait]
impl InstrumentDriver for MockCamera {
    async fn activate(&self) -> Result<()> {
        self.error_config.check_operation(DRIVER_TYPE, "activate")?;
        self.mode.pause(self.timing.communication_delay).await;
        self.lifecycle.activate();
        Ok(())
    }

    async fn configure(&self, params: &AcquisitionParams) -> Result<()> {
        self.error_config.check_operation(DRIVER_TYPE, "configure")?;
        self.lifecycle.ensure_active(DRIVER_TYPE)?;
        self.lifecycle.configure(params);
        Ok(())
    }

    async fn acquire(&self) -> Result<Reading> {
        self.error_config.check_operation(DRIVER_TYPE, "acquire")?;
        self.lifecycle.ensure_active(DRIVER_TYPE)?;

        let params = self.lifecycle.params();
        let averages = params.averages.max(1);
        self.mode
            .pause((params.exposure + self.timing.readout) * averages)
            .await;

        let power = self.source.power().await?;
        let peak = power * self.responsivity * params.exposure.as_secs_f64() * 1000.0;

        let mut sum = vec![vec![0.0; self.width]; self.height];
        for _ in 0..averages {
            let frame_nr = self.frame_count.fetch_add(1, Ordering::SeqCst);
            let frame = beam_profile(self.width, self.height, frame_nr, peak);
            for (acc_row, row) in sum.iter_mut().zip(frame) {
                for (acc, px) in acc_row.iter_mut().zip(row) {
                    *acc += px;
                }
            }
        }
        let scale = 1.0 / f64::from(averages);
        for px in sum.iter_mut().flatten() {
            *px *= scale;
        }

        self.lifecycle.next_acquisition();
        Ok(Reading::matrix(sum))
    }

    async fn deactivate(&self) -> Result<()> {
        self.lifecycle.deactivate();
        self.error_config.check_operation(DRIVER_TYPE, "deactivate")?;
        Ok(())
    }
}
