//! Mock waveplate rotation mount.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bench_core::StageDriver;
use tokio::sync::RwLock;
use tracing::debug;

use crate::common::{ErrorConfig, MockMode, TimingConfig};

const DRIVER_TYPE: &str = "mock_rotator";

/// Mock rotation stage.
///
/// Simulates a motorized waveplate mount with:
/// - Position control over 0-360 degrees (or a custom range)
/// - Homing to mechanical zero
/// - Enable/disable lifecycle: moves are rejected while disabled
/// - Distance-dependent motion time in [`MockMode::Realistic`]
/// - Error injection on `activate`, `home`, `move`, `position`, `disable`
///
/// # Example
///
/// ```rust,ignore
/// let rotator = MockRotator::new();
/// rotator.activate(true).await?;
/// rotator.move_to(45.0, true).await?;
/// assert_eq!(rotator.position().await?, 45.0);
/// ```
pub struct MockRotator {
    position_degrees: RwLock<f64>,
    min_position: f64,
    max_position: f64,
    enabled: AtomicBool,
    homed: AtomicBool,
    moves: AtomicU32,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
}

impl MockRotator {
    /// Rotator at 0° over 0-360°, instant mode.
    pub fn new() -> Self {
        Self {
            position_degrees: RwLock::new(0.0),
            min_position: 0.0,
            max_position: 360.0,
            enabled: AtomicBool::new(false),
            homed: AtomicBool::new(false),
            moves: AtomicU32::new(0),
            mode: MockMode::default(),
            timing: TimingConfig::rotator(),
            error_config: ErrorConfig::default(),
        }
    }

    /// Start at `degrees`.
    pub fn with_initial_position(mut self, degrees: f64) -> Self {
        self.position_degrees = RwLock::new(degrees);
        self
    }

    /// Reject moves outside `[min, max]`.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min_position = min;
        self.max_position = max;
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

    /// True between `activate` and `disable`.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// True once homing completed.
    pub fn is_homed(&self) -> bool {
        self.homed.load(Ordering::SeqCst)
    }

    /// Number of completed moves.
    pub fn move_count(&self) -> u32 {
        self.moves.load(Ordering::SeqCst)
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(anyhow!("{DRIVER_TYPE}: motor disabled"))
        }
    }
}

impl Default for MockRotator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageDriver for MockRotator {
    async fn activate(&self, homing: bool) -> Result<()> {
        self.error_config.check_operation(DRIVER_TYPE, "activate")?;
        self.mode.pause(self.timing.communication_delay).await;
        self.enabled.store(true, Ordering::SeqCst);
        if homing {
            self.home().await?;
        }
        Ok(())
    }

    async fn home(&self) -> Result<()> {
        self.error_config.check_operation(DRIVER_TYPE, "home")?;
        self.ensure_enabled()?;

        let current = *self.position_degrees.read().await;
        self.mode.pause(self.timing.move_duration(current)).await;

        *self.position_degrees.write().await = 0.0;
        self.homed.store(true, Ordering::SeqCst);
        debug!(driver = DRIVER_TYPE, "homed");
        Ok(())
    }

    async fn move_to(&self, angle: f64, blocking: bool) -> Result<()> {
        self.error_config.check_operation(DRIVER_TYPE, "move")?;
        self.ensure_enabled()?;

        if !angle.is_finite() || !(self.min_position..=self.max_position).contains(&angle) {
            return Err(anyhow!(
                "Position {} outside range ({}-{})",
                angle,
                self.min_position,
                self.max_position
            ));
        }

        let current = *self.position_degrees.read().await;
        if blocking {
            self.mode.pause(self.timing.move_duration(angle - current)).await;
        }

        *self.position_degrees.write().await = angle;
        self.moves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        self.error_config.check_operation(DRIVER_TYPE, "position")?;
        Ok(*self.position_degrees.read().await)
    }

    async fn disable(&self) -> Result<()> {
        self.error_config.check_operation(DRIVER_TYPE, "disable")?;
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }
}
