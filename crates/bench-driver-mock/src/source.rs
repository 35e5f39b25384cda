//! Simulated optical power reaching a detector.

use std::sync::Arc;

use anyhow::Result;
use bench_core::{CalibrationCurve, StageDriver};
use parking_lot::Mutex;

use crate::common::MockRng;

/// Where a mock detector's incident power comes from.
pub enum PowerSource {
    /// Constant power, adjustable from the test
    Fixed(Mutex<f64>),
    /// Power transmitted through a waveplate on a rotation stage, following
    /// the cosine calibration model at the stage's current angle
    Waveplate {
        stage: Arc<dyn StageDriver>,
        curve: CalibrationCurve,
    },
}

impl PowerSource {
    /// Constant `power` in watts.
    pub fn fixed(power: f64) -> Self {
        Self::Fixed(Mutex::new(power))
    }

    /// Power behind a waveplate on `stage`.
    pub fn waveplate(stage: Arc<dyn StageDriver>, curve: CalibrationCurve) -> Self {
        Self::Waveplate { stage, curve }
    }

    /// Incident power right now.
    pub async fn power(&self) -> Result<f64> {
        match self {
            Self::Fixed(power) => Ok(*power.lock()),
            Self::Waveplate { stage, curve } => {
                let angle = stage.position().await?;
                Ok(curve.angle_to_power(angle))
            }
        }
    }

    /// Change a fixed source; no effect on a waveplate source.
    pub fn set(&self, power: f64) {
        if let Self::Fixed(current) = self {
            *current.lock() = power;
        }
    }
}

/// Noise model for detector simulation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NoiseModel {
    /// Uniform noise proportional to the signal (0.01 = ±1%)
    pub relative: f64,
    /// Constant noise floor in signal units
    pub floor: f64,
}

impl NoiseModel {
    /// 1% proportional noise, 1 nW floor
    pub fn default_noise() -> Self {
        Self {
            relative: 0.01,
            floor: 1e-9,
        }
    }

    /// No noise.
    pub fn none() -> Self {
        Self::default()
    }

    /// Add noise to `signal`.
    pub fn apply(&self, signal: f64, rng: &MockRng) -> f64 {
        signal + rng.jitter(self.relative * signal.abs()) + rng.jitter(self.floor)
    }
}
