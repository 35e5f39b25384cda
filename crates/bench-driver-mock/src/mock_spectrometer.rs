//! Mock grating spectrometer.

use anyhow::Result;
use async_trait::async_trait;
use bench_core::{AcquisitionParams, InstrumentDriver, Reading};

use crate::common::{ErrorConfig, InstrumentLifecycle, MockMode, MockRng, TimingConfig};
use crate::source::{NoiseModel, PowerSource};

const DRIVER_TYPE: &str = "mock_spectrometer";

/// Mock spectrometer producing one vector reading per acquisition.
///
/// The spectrum is a single Gaussian emission line on a dark-count offset.
/// The line height scales with the incident power and the exposure time, so
/// a spectrometer behind a power-mode axis sees its line grow along a sweep.
pub struct MockSpectrometer {
    pixels: usize,
    start_nm: f64,
    end_nm: f64,
    line_nm: f64,
    line_width_nm: f64,
    /// Counts per watt per millisecond of exposure
    responsivity: f64,
    dark_counts: f64,
    source: PowerSource,
    noise: NoiseModel,
    rng: MockRng,
    lifecycle: InstrumentLifecycle,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
}

impl MockSpectrometer {
    /// 256-pixel spectrometer covering 400-800 nm with a 532 nm line.
    pub fn new() -> Self {
        Self {
            pixels: 256,
            start_nm: 400.0,
            end_nm: 800.0,
            line_nm: 532.0,
            line_width_nm: 2.0,
            responsivity: 1000.0,
            dark_counts: 10.0,
            source: PowerSource::fixed(1.0),
            noise: NoiseModel::none(),
            rng: MockRng::new(None),
            lifecycle: InstrumentLifecycle::default(),
            mode: MockMode::default(),
            timing: TimingConfig::spectrometer(),
            error_config: ErrorConfig::default(),
        }
    }

    /// Number of spectral channels.
    pub fn with_pixels(mut self, pixels: usize) -> Self {
        self.pixels = pixels;
        self
    }

    /// Emission line centre and Gaussian standard deviation in nanometres.
    pub fn with_line(mut self, center_nm: f64, width_nm: f64) -> Self {
        self.line_nm = center_nm;
        self.line_width_nm = width_nm;
        self
    }

    /// Where the incident power comes from.
    pub fn with_source(mut self, source: PowerSource) -> Self {
        self.source = source;
        self
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

    /// Activation state and counters.
    pub fn lifecycle(&self) -> &InstrumentLifecycle {
        &self.lifecycle
    }

    /// Center wavelength of every pixel.
    pub fn wavelengths(&self) -> Vec<f64> {
        if self.pixels < 2 {
            return vec![self.start_nm; self.pixels];
        }
        let step = (self.end_nm - self.start_nm) / (self.pixels - 1) as f64;
        (0..self.pixels)
            .map(|i| self.start_nm + step * i as f64)
            .collect()
    }

    fn spectrum(&self, power: f64, params: &AcquisitionParams) -> Vec<f64> {
        let exposure_ms = params.exposure.as_secs_f64() * 1000.0;
        let peak = power * self.responsivity * exposure_ms;
        let averages = params.averages.max(1);

        self.wavelengths()
            .into_iter()
            .map(|nm| {
                let x = (nm - self.line_nm) / self.line_width_nm;
                let signal = self.dark_counts + peak * (-0.5 * x * x).exp();
                let total: f64 = (0..averages)
                    .map(|_| self.noise.apply(signal, &self.rng))
                    .sum();
                total / f64::from(averages)
            })
            .collect()
    }
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstrumentDriver for MockSpectrometer {
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
        self.mode
            .pause(params.exposure * params.averages.max(1) + self.timing.readout)
            .await;

        let power = self.source.power().await?;
        let spectrum = self.spectrum(power, &params);
        self.lifecycle.next_acquisition();
        Ok(Reading::vector(spectrum))
    }

    async fn deactivate(&self) -> Result<()> {
        self.lifecycle.deactivate();
        self.error_config.check_operation(DRIVER_TYPE, "deactivate")?;
        Ok(())
    }
}
