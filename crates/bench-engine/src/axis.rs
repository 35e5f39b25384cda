//! Motion axis handle.
//!
//! An [`Axis`] wraps one [`StageDriver`] and adds the state machine, the
//! reported position and optional power mode through a
//! [`CalibrationCurve`].
//!
//! # State Machine
//!
//! ```text
//! ┌───────────────┐  activate()  ┌───────────┐          ┌───────┐
//! │ Uninitialized │─────────────▶│ Activated │─────────▶│ Ready │
//! └───────────────┘              └─────┬─────┘          └───┬───┘
//!         ▲                            │ homing             │
//!         │                            ▼                    │
//!         │                       ┌───────┐                 │
//!         │                       │ Homed │─────────────────┘
//!         │                       └───────┘
//!         │                   disable()                     │
//!         └─────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use bench_core::{BenchError, BenchResult, CalibrationCurve, StageDriver};
use tracing::{debug, info, warn};

/// Lifecycle of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisState {
    /// Not activated, or disabled
    Uninitialized,
    /// Driver activated, homing pending or skipped
    Activated,
    /// Homing finished
    Homed,
    /// Accepts moves
    Ready,
}

impl std::fmt::Display for AxisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxisState::Uninitialized => write!(f, "uninitialized"),
            AxisState::Activated => write!(f, "activated"),
            AxisState::Homed => write!(f, "homed"),
            AxisState::Ready => write!(f, "ready"),
        }
    }
}

/// What a successful [`Axis::move_to`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveOutcome {
    /// Requested target (power or angle, before clamping)
    pub target: f64,
    /// Commanded stage angle in `[0, 360)`
    pub angle: f64,
    /// Position read back from the stage
    pub position: f64,
    /// The power target exceeded the calibrated maximum
    pub capped: bool,
}

/// Normalize an angle into `[0, 360)`.
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid of a tiny negative value rounds up to exactly 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// A motion stage with optional power-mode calibration.
///
/// Exclusively owned: a scan or the caller holds it, never both.
pub struct Axis {
    id: String,
    driver: Arc<dyn StageDriver>,
    state: AxisState,
    position_reported: Option<f64>,
    target_requested: Option<f64>,
    power_mode: bool,
    calibration: Option<Arc<CalibrationCurve>>,
}

impl std::fmt::Debug for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Axis")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("position_reported", &self.position_reported)
            .field("target_requested", &self.target_requested)
            .field("power_mode", &self.power_mode)
            .field("calibration", &self.calibration)
            .finish()
    }
}

impl Axis {
    /// Wrap `driver` as an uninitialized axis without calibration.
    pub fn new(id: impl Into<String>, driver: Arc<dyn StageDriver>) -> Self {
        Self {
            id: id.into(),
            driver,
            state: AxisState::Uninitialized,
            position_reported: None,
            target_requested: None,
            power_mode: false,
            calibration: None,
        }
    }

    /// Start with `calibration` installed.
    pub fn with_calibration(mut self, calibration: Option<Arc<CalibrationCurve>>) -> Self {
        self.calibration = calibration;
        self
    }

    /// Axis id used in scan bindings.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AxisState {
        self.state
    }

    /// True in any state but `Uninitialized`.
    pub fn is_activated(&self) -> bool {
        self.state != AxisState::Uninitialized
    }

    /// Last position read back from the stage.
    pub fn position(&self) -> Option<f64> {
        self.position_reported
    }

    /// Last requested target, in the units of the mode it was requested in.
    pub fn target(&self) -> Option<f64> {
        self.target_requested
    }

    /// Whether the last move was requested in power mode.
    pub fn power_mode(&self) -> bool {
        self.power_mode
    }

    /// Installed calibration curve, if any.
    pub fn calibration(&self) -> Option<&Arc<CalibrationCurve>> {
        self.calibration.as_ref()
    }

    /// Replace the calibration wholesale (`None` drops back to raw angle).
    pub fn set_calibration(&mut self, calibration: Option<Arc<CalibrationCurve>>) {
        info!(
            axis = %self.id,
            max_power = calibration.as_ref().map(|c| c.max_power()),
            "Calibration replaced"
        );
        self.calibration = calibration;
    }

    /// Power at the reported position, if calibrated.
    pub fn current_power(&self) -> Option<f64> {
        let curve = self.calibration.as_ref()?;
        Some(curve.angle_to_power(self.position_reported?))
    }

    /// Activate the driver, optionally homing, and read the start position.
    pub async fn activate(&mut self, homing: bool) -> BenchResult<()> {
        if let Err(err) = self.driver.activate(homing).await {
            self.state = AxisState::Uninitialized;
            return Err(self.fault(err));
        }
        self.state = AxisState::Activated;
        if homing {
            self.state = AxisState::Homed;
        }
        self.refresh_position().await;
        self.state = AxisState::Ready;
        info!(axis = %self.id, homing, position = ?self.position_reported, "Axis activated");
        Ok(())
    }

    /// Home an activated axis.
    pub async fn home(&mut self) -> BenchResult<()> {
        self.ensure_activated()?;
        self.driver.home().await.map_err(|err| self.fault(err))?;
        self.state = AxisState::Homed;
        self.refresh_position().await;
        self.state = AxisState::Ready;
        debug!(axis = %self.id, "Axis homed");
        Ok(())
    }

    /// Release the stage. The axis is uninitialized afterwards even if the
    /// driver reports an error.
    pub async fn disable(&mut self) -> BenchResult<()> {
        let result = self.driver.disable().await;
        self.state = AxisState::Uninitialized;
        info!(axis = %self.id, "Axis disabled");
        result.map_err(|err| self.fault(err))
    }

    /// Move to `target`, a power when `power_mode` is set, otherwise an
    /// angle in degrees.
    ///
    /// Power targets are clamped into `[0, max_power]` before conversion.
    /// A failed move leaves the reported position unchanged.
    pub async fn move_to(&mut self, target: f64, power_mode: bool) -> BenchResult<MoveOutcome> {
        self.ensure_activated()?;

        if !target.is_finite() {
            return Err(BenchError::AxisMoveFailed {
                axis: self.id.clone(),
                target,
                message: "target is not a finite number".to_string(),
            });
        }

        let (raw_angle, capped) = if power_mode {
            let curve = self
                .calibration
                .as_ref()
                .ok_or_else(|| BenchError::NoCalibration {
                    axis: self.id.clone(),
                })?;
            let max_power = curve.max_power();
            let clamped = target.clamp(0.0, max_power);
            let setpoint = curve.power_to_angle(clamped);
            let capped = setpoint.capped || target > max_power;
            if capped {
                warn!(axis = %self.id, requested = target, max_power, "Power target capped");
            } else if target < 0.0 {
                debug!(axis = %self.id, requested = target, "Negative power target raised to 0");
            }
            (setpoint.angle, capped)
        } else {
            (target, false)
        };
        let angle = normalize_angle(raw_angle);

        self.target_requested = Some(target);
        self.power_mode = power_mode;

        self.driver
            .move_to(angle, true)
            .await
            .map_err(|err| BenchError::AxisMoveFailed {
                axis: self.id.clone(),
                target,
                message: err.to_string(),
            })?;

        let position = match self.driver.position().await {
            Ok(position) => position,
            Err(err) => {
                warn!(
                    axis = %self.id,
                    error = %err,
                    "Position read-back failed, assuming commanded angle"
                );
                angle
            }
        };
        self.position_reported = Some(position);

        debug!(axis = %self.id, target, angle, position, power_mode, "Axis moved");
        Ok(MoveOutcome {
            target,
            angle,
            position,
            capped,
        })
    }

    fn ensure_activated(&self) -> BenchResult<()> {
        if self.is_activated() {
            Ok(())
        } else {
            Err(BenchError::AxisNotActivated {
                axis: self.id.clone(),
            })
        }
    }

    fn fault(&self, err: anyhow::Error) -> BenchError {
        BenchError::AxisFault {
            axis: self.id.clone(),
            message: err.to_string(),
        }
    }

    async fn refresh_position(&mut self) {
        match self.driver.position().await {
            Ok(position) => self.position_reported = Some(position),
            Err(err) => warn!(axis = %self.id, error = %err, "Position read-back failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_angle() {
        assert_eq!(normalize_angle(370.0), 10.0);
        assert_eq!(normalize_angle(-30.0), 330.0);
        assert_eq!(normalize_angle(360.0), 0.0);
        assert_eq!(normalize_angle(-1e-17), 0.0);
        assert!((0.0..360.0).contains(&normalize_angle(-1e-12)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AxisState::Ready.to_string(), "ready");
    }
}
