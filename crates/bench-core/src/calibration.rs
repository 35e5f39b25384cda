//! Waveplate power calibration.
//!
//! A half-wave plate in front of a polarizer transmits a power that varies
//! with the plate angle as
//!
//! ```text
//! power(angle) = amplitude * cos(2π/90 * (angle - phase)) + amplitude
//! ```
//!
//! so the curve is periodic with a 90° period and peaks at `2 * amplitude`.
//! [`CalibrationCurve::fit`] recovers `(amplitude, phase)` from measured
//! `(angle, power)` samples with a Levenberg–Marquardt least-squares fit, and
//! [`CalibrationCurve::power_to_angle`] inverts the model so an axis can be
//! driven by a power target.
//!
//! Curves are immutable. Loading a new calibration file produces a new curve
//! that replaces the old one wholesale, so a sweep that holds an
//! `Arc<CalibrationCurve>` never observes a half-updated model.
//!
//! # Example
//!
//! ```rust,ignore
//! let curve = CalibrationCurve::from_file(Path::new("calib/wp_red.txt"))?;
//! let setpoint = curve.power_to_angle(0.8);
//! if setpoint.capped {
//!     warn!("requested power above calibrated maximum");
//! }
//! stage.move_to(setpoint.angle).await?;
//! ```

use std::f64::consts::PI;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BenchError, BenchResult};
use crate::scan::ScanResult;

/// Angular period of the calibration model in degrees.
pub const PERIOD_DEG: f64 = 90.0;

/// Minimum number of samples accepted by [`CalibrationCurve::fit`].
pub const MIN_FIT_SAMPLES: usize = 3;

const WAVE_NUMBER: f64 = 2.0 * PI / PERIOD_DEG;
const MAX_ITERATIONS: usize = 500;
const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e12;
const DIAGONAL_FLOOR: f64 = 1e-12;
const RELATIVE_TOLERANCE: f64 = 1e-12;
const MAX_RESIDUAL_FRACTION: f64 = 0.1;

/// Initial phases tried by [`CalibrationCurve::fit`], a quarter period apart.
pub const PHASE_STARTS: [f64; 4] = [0.0, 22.5, 45.0, 67.5];

/// Fitted power/angle relationship of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCurve {
    amplitude: f64,
    phase: f64,
}

/// Angle to command for a requested power.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleSetpoint {
    /// Stage angle in degrees (not yet normalized to `[0, 360)`)
    pub angle: f64,
    /// True when the requested power exceeded the calibrated maximum and was
    /// clamped to it
    pub capped: bool,
}

impl CalibrationCurve {
    /// Build a curve from known parameters.
    ///
    /// The amplitude must be finite and strictly positive; the phase is
    /// normalized into `[0, 90)`.
    pub fn new(amplitude: f64, phase: f64) -> BenchResult<Self> {
        if !amplitude.is_finite() || amplitude <= 0.0 {
            return Err(BenchError::CalibrationFit(format!(
                "amplitude must be positive and finite, got {amplitude}"
            )));
        }
        if !phase.is_finite() {
            return Err(BenchError::CalibrationFit(format!(
                "phase must be finite, got {phase}"
            )));
        }
        Ok(Self {
            amplitude,
            phase: phase.rem_euclid(PERIOD_DEG),
        })
    }

    /// Cosine amplitude in watts; half the peak power.
    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    /// Phase offset in degrees, within `[0, 90)`.
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Highest power reachable on this axis (`2 * amplitude`).
    pub fn max_power(&self) -> f64 {
        2.0 * self.amplitude
    }

    /// Evaluate the model at `angle` (degrees).
    pub fn angle_to_power(&self, angle: f64) -> f64 {
        self.amplitude * (WAVE_NUMBER * (angle - self.phase)).cos() + self.amplitude
    }

    /// Invert the model.
    ///
    /// Powers above [`max_power`](Self::max_power) are clamped and reported
    /// through [`AngleSetpoint::capped`]. The `arccos` argument is clamped to
    /// `[-1, 1]` so rounding at either end of the range cannot produce NaN.
    pub fn power_to_angle(&self, power: f64) -> AngleSetpoint {
        let max_power = self.max_power();
        let capped = power > max_power;
        let power = if capped { max_power } else { power };
        let angle = -(45.0 / PI) * self.arccos_argument(power).acos() + self.phase;
        AngleSetpoint { angle, capped }
    }

    fn arccos_argument(&self, power: f64) -> f64 {
        (power / self.amplitude - 1.0).clamp(-1.0, 1.0)
    }

    /// Least-squares fit of the cosine model.
    ///
    /// Starts from `amplitude = max(powers) / 2` at each phase in
    /// [`PHASE_STARTS`] and keeps the lowest residual. A fit that explains
    /// less than 90% of the sample variance is rejected.
    pub fn fit(angles: &[f64], powers: &[f64]) -> BenchResult<Self> {
        if angles.len() != powers.len() {
            return Err(BenchError::CalibrationFit(format!(
                "{} angles but {} powers",
                angles.len(),
                powers.len()
            )));
        }
        if angles.len() < MIN_FIT_SAMPLES {
            return Err(BenchError::CalibrationFit(format!(
                "need at least {MIN_FIT_SAMPLES} samples, got {}",
                angles.len()
            )));
        }
        if angles.iter().chain(powers).any(|v| !v.is_finite()) {
            return Err(BenchError::CalibrationFit(
                "samples contain non-finite values".into(),
            ));
        }

        let peak = powers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if peak <= 0.0 {
            return Err(BenchError::CalibrationFit(
                "maximum sampled power must be positive".into(),
            ));
        }

        let amplitude0 = peak / 2.0;
        let best = PHASE_STARTS
            .iter()
            .filter_map(|&phase0| descend(angles, powers, amplitude0, phase0))
            .min_by(|a, b| a.cost.total_cmp(&b.cost))
            .ok_or_else(|| {
                BenchError::CalibrationFit(format!(
                    "optimizer did not converge within {MAX_ITERATIONS} iterations"
                ))
            })?;

        let mean = powers.iter().sum::<f64>() / powers.len() as f64;
        let spread: f64 = powers.iter().map(|p| (p - mean).powi(2)).sum();
        if best.cost > MAX_RESIDUAL_FRACTION * spread {
            return Err(BenchError::CalibrationFit(format!(
                "samples do not follow the cosine model (residual {:.3e}, spread {spread:.3e})",
                best.cost
            )));
        }

        Self::from_fit(best.amplitude, best.phase)
    }

    fn from_fit(amplitude: f64, phase: f64) -> BenchResult<Self> {
        Self::new(amplitude, phase).map_err(|_| {
            BenchError::CalibrationFit(format!(
                "fit converged to an invalid curve (amplitude {amplitude}, phase {phase})"
            ))
        })
    }

    /// Fit the power readings of `instrument_id` from a raw-angle sweep.
    ///
    /// Each sample's sweep point is taken as the stage angle, so the sweep
    /// must drive the axis in angle mode with the identity mapping.
    /// Non-scalar readings are ignored and missing points simply leave gaps.
    pub fn fit_scan(result: &ScanResult, instrument_id: &str) -> BenchResult<Self> {
        let (angles, powers): (Vec<f64>, Vec<f64>) = result
            .samples(instrument_id)
            .iter()
            .filter_map(|sample| Some((sample.point, sample.reading.as_scalar()?)))
            .unzip();
        if angles.is_empty() {
            return Err(BenchError::CalibrationFit(format!(
                "no power readings from '{instrument_id}' in the sweep"
            )));
        }
        let curve = Self::fit(&angles, &powers)?;
        info!(
            instrument = %instrument_id,
            samples = angles.len(),
            max_power = curve.max_power(),
            phase = curve.phase(),
            "Calibrated from sweep"
        );
        Ok(curve)
    }

    /// Load `(angle, power)` samples from a calibration file and fit them.
    pub fn from_file(path: &Path) -> BenchResult<Self> {
        let (angles, powers) = load_samples(path)?;
        if angles.is_empty() {
            return Err(BenchError::CalibrationFit(format!(
                "empty calibration file: {}",
                path.display()
            )));
        }
        let curve = Self::fit(&angles, &powers)?;
        info!(
            path = %path.display(),
            max_power = curve.max_power(),
            phase = curve.phase(),
            "Loaded calibration"
        );
        Ok(curve)
    }
}

/// Read calibration samples from a text file.
///
/// See [`parse_samples`] for the accepted format.
pub fn load_samples(path: &Path) -> BenchResult<(Vec<f64>, Vec<f64>)> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_samples(&text))
}

/// Parse `angle power` pairs, one per line.
///
/// Columns may be separated by `;`, `,`, tabs or spaces. Blank lines, lines
/// starting with `#` and lines whose first two tokens are not numbers are
/// skipped; extra columns are ignored.
pub fn parse_samples(text: &str) -> (Vec<f64>, Vec<f64>) {
    let mut angles = Vec::new();
    let mut powers = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line
            .split(|c: char| c == ';' || c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty());
        let (Some(angle), Some(power)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        if let (Ok(angle), Ok(power)) = (angle.parse::<f64>(), power.parse::<f64>()) {
            angles.push(angle);
            powers.push(power);
        }
    }

    (angles, powers)
}

/// Converged Levenberg–Marquardt solution.
struct FitPoint {
    amplitude: f64,
    phase: f64,
    cost: f64,
}

/// Levenberg–Marquardt descent from one starting point. `None` when the
/// iteration budget runs out.
fn descend(angles: &[f64], powers: &[f64], amplitude: f64, phase: f64) -> Option<FitPoint> {
    let mut amplitude = amplitude;
    let mut phase = phase;
    let mut cost = sum_of_squares(angles, powers, amplitude, phase);
    let mut damping = INITIAL_DAMPING;

    for iteration in 0..MAX_ITERATIONS {
        let normal = NormalEquations::build(angles, powers, amplitude, phase);
        let mut improved = false;

        while damping <= MAX_DAMPING {
            let Some((d_amplitude, d_phase)) = normal.solve(damping) else {
                damping *= 10.0;
                continue;
            };

            let candidate_cost =
                sum_of_squares(angles, powers, amplitude + d_amplitude, phase + d_phase);
            if !candidate_cost.is_finite() || candidate_cost >= cost {
                damping *= 10.0;
                continue;
            }

            let decrease = cost - candidate_cost;
            amplitude += d_amplitude;
            phase += d_phase;
            cost = candidate_cost;
            damping = (damping / 10.0).max(DIAGONAL_FLOOR);
            improved = true;

            let small_step = d_amplitude.abs() <= RELATIVE_TOLERANCE * amplitude.abs()
                && d_phase.abs() <= RELATIVE_TOLERANCE * (phase.abs() + 1.0);
            if small_step || decrease <= RELATIVE_TOLERANCE * (cost + decrease) {
                debug!(iteration, cost, "calibration fit converged");
                return Some(FitPoint { amplitude, phase, cost });
            }
            break;
        }

        // No damping level reduces the cost
        if !improved {
            debug!(iteration, cost, "calibration fit reached stationary point");
            return Some(FitPoint { amplitude, phase, cost });
        }
    }

    None
}

fn sum_of_squares(angles: &[f64], powers: &[f64], amplitude: f64, phase: f64) -> f64 {
    angles
        .iter()
        .zip(powers)
        .map(|(&angle, &power)| {
            let model = amplitude * (WAVE_NUMBER * (angle - phase)).cos() + amplitude;
            (power - model).powi(2)
        })
        .sum()
}

/// Gauss-Newton normal equations `JᵀJ · δ = Jᵀr` for the two fit parameters.
struct NormalEquations {
    jtj: [[f64; 2]; 2],
    jtr: [f64; 2],
}

impl NormalEquations {
    fn build(angles: &[f64], powers: &[f64], amplitude: f64, phase: f64) -> Self {
        let mut jtj = [[0.0; 2]; 2];
        let mut jtr = [0.0; 2];

        for (&angle, &power) in angles.iter().zip(powers) {
            let x = WAVE_NUMBER * (angle - phase);
            let residual = power - (amplitude * x.cos() + amplitude);
            let d_amplitude = x.cos() + 1.0;
            let d_phase = amplitude * WAVE_NUMBER * x.sin();

            jtj[0][0] += d_amplitude * d_amplitude;
            jtj[0][1] += d_amplitude * d_phase;
            jtj[1][1] += d_phase * d_phase;
            jtr[0] += d_amplitude * residual;
            jtr[1] += d_phase * residual;
        }
        jtj[1][0] = jtj[0][1];

        Self { jtj, jtr }
    }

    /// Solve the Marquardt-damped system; `None` when it is singular.
    fn solve(&self, damping: f64) -> Option<(f64, f64)> {
        let a00 = self.jtj[0][0] + damping * self.jtj[0][0].max(DIAGONAL_FLOOR);
        let a11 = self.jtj[1][1] + damping * self.jtj[1][1].max(DIAGONAL_FLOOR);
        let a01 = self.jtj[0][1];

        let det = a00 * a11 - a01 * a01;
        if !det.is_finite() || det.abs() < f64::MIN_POSITIVE {
            return None;
        }

        let d0 = (self.jtr[0] * a11 - a01 * self.jtr[1]) / det;
        let d1 = (a00 * self.jtr[1] - a01 * self.jtr[0]) / det;
        (d0.is_finite() && d1.is_finite()).then_some((d0, d1))
    }
}
