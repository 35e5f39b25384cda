//! Timing configuration for realistic mode.

use std::time::Duration;

/// Hardware-like delays of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Time to traverse one degree (stages)
    pub per_degree: Duration,
    /// Settling after motion or after a configuration change
    pub settling: Duration,
    /// Round trip of one command
    pub communication_delay: Duration,
    /// Sensor readout after integration (cameras, spectrometers)
    pub readout: Duration,
}

impl TimingConfig {
    /// Waveplate rotation mount: ~100°/s plus settling
    pub fn rotator() -> Self {
        Self {
            per_degree: Duration::from_millis(10),
            settling: Duration::from_millis(30),
            communication_delay: Duration::from_millis(3),
            readout: Duration::ZERO,
        }
    }

    /// Thermopile-like settling, no readout.
    pub fn power_meter() -> Self {
        Self {
            settling: Duration::from_millis(10),
            communication_delay: Duration::from_millis(2),
            ..Self::default()
        }
    }

    /// Short settle plus a CCD readout.
    pub fn spectrometer() -> Self {
        Self {
            settling: Duration::from_millis(5),
            communication_delay: Duration::from_millis(2),
            readout: Duration::from_millis(8),
            ..Self::default()
        }
    }

    /// 30 fps readout
    pub fn camera() -> Self {
        Self {
            communication_delay: Duration::from_millis(2),
            readout: Duration::from_millis(33),
            ..Self::default()
        }
    }

    /// Nominal duration of a move over `distance` degrees.
    pub fn move_duration(&self, distance: f64) -> Duration {
        self.per_degree.mul_f64(distance.abs()) + self.settling
    }
}
