//! Mock optical power meter.
//!
//! Returns scalar readings in watts. The incident power is either fixed or
//! follows a waveplate on a [`MockRotator`](crate::MockRotator) through a
//! calibration curve, which lets tests close the loop between a power-mode
//! axis and the detector behind it.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bench_core::{
    AcquisitionParams, CalibrationCurve, InstrumentDriver, Reading, StageDriver,
};

use crate::common::{ErrorConfig, InstrumentLifecycle, MockMode, MockRng, TimingConfig};
use crate::source::{NoiseModel, PowerSource};

const DRIVER_TYPE: &str = "mock_power_meter";

/// Mock power meter.
///
/// Each reading is the mean of `averages` noisy samples. In realistic mode an
/// acquisition takes `exposure * averages`.
pub struct MockPowerMeter {
    source: PowerSource,
    noise: NoiseModel,
    rng: MockRng,
    lifecycle: InstrumentLifecycle,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
}

impl MockPowerMeter {
    /// Power meter reading a constant `power` (watts) without noise.
    pub fn new(power: f64) -> Self {
        Self::with_source(PowerSource::fixed(power))
    }

    /// Power meter behind a waveplate mounted on `stage`.
    pub fn behind_waveplate(stage: Arc<dyn StageDriver>, curve: CalibrationCurve) -> Self {
        Self::with_source(PowerSource::waveplate(stage, curve))
    }

    fn with_source(source: PowerSource) -> Self {
        Self {
            source,
            noise: NoiseModel::none(),
            rng: MockRng::new(None),
            lifecycle: InstrumentLifecycle::default(),
            mode: MockMode::default(),
            timing: TimingConfig::power_meter(),
            error_config: ErrorConfig::default(),
        }
    }

    /// Add noise; `seed` makes it reproducible.
    pub fn with_noise(mut self, noise: NoiseModel, seed: Option<u64>) -> Self {
        self.noise = noise;
        self.rng = MockRng::new(seed);
        self
    }

    /// Timing mode.
    pub fn with_mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Failure injection.
    pub fn with_error_config(mut self, error_config: ErrorConfig) -> Self {
        self.error_config = error_config;
        self
    }

    /// Change the power of a fixed source.
    pub fn set_power(&self, power: f64) {
        self.source.set(power);
    }

    /// Activation state and counters.
    pub fn lifecycle(&self) -> &InstrumentLifecycle {
        &self.lifecycle
    }
}

impl Default for MockPowerMeter {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[async_trait]
impl InstrumentDriver for MockPowerMeter {
    async fn activate(&self) -> Result<()> {
        self.error_config.check_operation(DRIVER_TYPE, "activate")?;
        self.mode.pause(self.timing.communication_delay).await;
        self.lifecycle.activate();
        Ok(())
    }

    async fn configure(&self, params: &AcquisitionParams) -> Result<()> {
        self.error_config.check_operation(DRIVER_TYPE, "configure")?;
        self.lifecycle.ensure_active(DRIVER_TYPE)?;
        self.mode.pause(self.timing.settling).await;
        self.lifecycle.configure(params);
        Ok(())
    }

    async fn acquire(&self) -> Result<Reading> {
        self.error_config.check_operation(DRIVER_TYPE, "acquire")?;
        self.lifecycle.ensure_active(DRIVER_TYPE)?;

        let params = self.lifecycle.params();
        let averages = params.averages.max(1);
        self.mode
            .pause(params.exposure * averages + self.timing.communication_delay)
            .await;

        let incident = self.source.power().await?;
        let total: f64 = (0..averages)
            .map(|_| self.noise.apply(incident, &self.rng))
            .sum();

        self.lifecycle.next_acquisition();
        Ok(Reading::scalar(total / f64::from(averages)))
    }

    async fn deactivate(&self) -> Result<()> {
        self.lifecycle.deactivate();
        self.error_config.check_operation(DRIVER_TYPE, "deactivate")?;
        Ok(())
    }
}
