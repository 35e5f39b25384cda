//! Bench configuration.
//!
//! Layered with figment:
//! 1. Base Layer: `BenchConfig::default()`
//! 2. File Layer: an optional TOML file
//! 3. Environment Layer: variables prefixed with `BENCH_`, nested fields
//!    separated by double underscores
//!
//! ```toml
//! data_root = "/data/bench"
//!
//! [calibration]
//! output_dir = "calib/auto"
//!
//! [calibration.files]
//! wp_red = "calib/wp_red.txt"
//! wp_green = "calib/wp_green.txt"
//!
//! [scan]
//! settle_time = "200ms"
//! inter_instrument_delay = "50ms"
//!
//! [live]
//! exposure = "20ms"
//! averages = 4
//! interval = "100ms"
//! ```
//!
//! `BENCH_LIVE__AVERAGES=8` overrides `live.averages`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calibration::CalibrationCurve;
use crate::error::{BenchError, BenchResult};
use crate::params::AcquisitionParams;
use crate::scan::ScanConfigBuilder;

/// Default environment prefix.
pub const ENV_PREFIX: &str = "BENCH_";

/// Top-level bench configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Root directory for scan logs
    pub data_root: PathBuf,
    /// Calibration files and output directory
    pub calibration: CalibrationSettings,
    /// Timing applied to new scans
    pub scan: ScanDefaults,
    /// Initial live-view parameters
    pub live: AcquisitionParams,
    /// Directory of the loaded config file; relative calibration paths
    /// resolve against it
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            calibration: CalibrationSettings::default(),
            scan: ScanDefaults::default(),
            live: AcquisitionParams::default(),
            base_dir: None,
        }
    }
}

/// Per-axis calibration files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Axis id -> sample file
    pub files: BTreeMap<String, PathBuf>,
    /// Where calibration sweeps write new sample files
    pub output_dir: Option<PathBuf>,
}

/// Timing defaults applied to new scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanDefaults {
    /// Wait after the last move of a point
    #[serde(with = "humantime_serde")]
    pub settle_time: Duration,
    /// Wait between two instrument polls of one point
    #[serde(with = "humantime_serde")]
    pub inter_instrument_delay: Duration,
}

impl ScanDefaults {
    /// Copy the defaults into a scan builder.
    pub fn apply(&self, builder: ScanConfigBuilder) -> ScanConfigBuilder {
        builder
            .settle_time(self.settle_time)
            .inter_instrument_delay(self.inter_instrument_delay)
    }
}

impl BenchConfig {
    /// Load from an optional TOML file plus `BENCH_` environment overrides.
    pub fn load(path: Option<&Path>) -> BenchResult<Self> {
        Self::load_with_env(path, ENV_PREFIX)
    }

    /// Load with a custom environment prefix.
    pub fn load_with_env(path: Option<&Path>, env_prefix: &str) -> BenchResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(BenchConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(BenchError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(env_prefix).split("__"));

        let mut config: BenchConfig = figment.extract()?;
        config.base_dir = path.and_then(Path::parent).map(Path::to_path_buf);
        config.validate()?;

        info!(
            data_root = %config.data_root.display(),
            calibrations = config.calibration.files.len(),
            "Loaded bench configuration"
        );
        Ok(config)
    }

    /// Check values that deserialization alone cannot reject.
    pub fn validate(&self) -> BenchResult<()> {
        if self.data_root.as_os_str().is_empty() {
            return Err(BenchError::Configuration(
                "data_root must not be empty".to_string(),
            ));
        }
        if self.live.averages == 0 {
            return Err(BenchError::Configuration(
                "live.averages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Calibration file for `axis_id`, resolved against the config directory.
    pub fn calibration_path(&self, axis_id: &str) -> Option<PathBuf> {
        let path = self.calibration.files.get(axis_id)?;
        Some(self.resolve(path))
    }

    /// Output directory for calibration sweeps; `<data_root>/calibration`
    /// unless `calibration.output_dir` is set.
    pub fn calibration_dir(&self) -> PathBuf {
        match &self.calibration.output_dir {
            Some(dir) => self.resolve(dir),
            None => self.data_root.join("calibration"),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Fit every configured calibration file.
    ///
    /// An axis whose file is missing or does not fit maps to `None` and runs
    /// in raw-angle mode.
    pub fn load_calibrations(&self) -> BTreeMap<String, Option<Arc<CalibrationCurve>>> {
        self.calibration
            .files
            .keys()
            .map(|axis| {
                let curve = self
                    .calibration_path(axis)
                    .map(|path| (CalibrationCurve::from_file(&path), path));
                let curve = match curve {
                    Some((Ok(curve), _)) => Some(Arc::new(curve)),
                    Some((Err(err), path)) => {
                        warn!(
                            axis = %axis,
                            path = %path.display(),
                            error = %err,
                            "Calibration unavailable, axis falls back to raw angle"
                        );
                        None
                    }
                    None => None,
                };
                (axis.clone(), curve)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = BenchConfig::load_with_env(None, "BENCH_TEST_DEFAULTS_").unwrap();
        assert_eq!(config.data_root, PathBuf::from("data"));
        assert_eq!(config.live, AcquisitionParams::default());
        assert!(config.calibration.files.is_empty());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "bench.toml",
            r#"
                data_root = "/srv/bench"

                [calibration.files]
                wp_red = "calib/red.txt"

                [scan]
                settle_time = "200ms"

                [live]
                exposure = "20ms"
                averages = 4
                interval = "100ms"
            "#,
        );

        let config = BenchConfig::load_with_env(Some(&path), "BENCH_TEST_TOML_").unwrap();
        assert_eq!(config.data_root, PathBuf::from("/srv/bench"));
        assert_eq!(config.scan.settle_time, Duration::from_millis(200));
        assert_eq!(config.scan.inter_instrument_delay, Duration::ZERO);
        assert_eq!(config.live.averages, 4);
        assert_eq!(
            config.calibration_path("wp_red"),
            Some(dir.path().join("calib/red.txt"))
        );
        assert_eq!(config.calibration_path("wp_green"), None);
        assert_eq!(config.calibration_dir(), PathBuf::from("/srv/bench/calibration"));
    }

    #[test]
    fn test_calibration_output_dir_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bench.toml", "[calibration]\noutput_dir = \"calib/auto\"\n");

        let config = BenchConfig::load_with_env(Some(&path), "BENCH_TEST_OUTDIR_").unwrap();
        assert_eq!(config.calibration_dir(), dir.path().join("calib/auto"));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bench.toml", "[live]\naverages = 4\n");

        std::env::set_var("BENCH_TEST_ENV_LIVE__AVERAGES", "16");
        std::env::set_var("BENCH_TEST_ENV_SCAN__SETTLE_TIME", "1s");
        let config = BenchConfig::load_with_env(Some(&path), "BENCH_TEST_ENV_").unwrap();
        std::env::remove_var("BENCH_TEST_ENV_LIVE__AVERAGES");
        std::env::remove_var("BENCH_TEST_ENV_SCAN__SETTLE_TIME");

        assert_eq!(config.live.averages, 16);
        assert_eq!(config.scan.settle_time, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BenchConfig::load_with_env(Some(&dir.path().join("nope.toml")), "BENCH_TEST_MISSING_")
            .unwrap_err();
        assert!(matches!(err, BenchError::Configuration(_)));
    }

    #[test]
    fn test_zero_averages_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bench.toml", "[live]\naverages = 0\n");
        assert!(BenchConfig::load_with_env(Some(&path), "BENCH_TEST_ZERO_").is_err());
    }

    #[test]
    #[traced_test]
    fn test_load_calibrations_falls_back_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let samples: String = (0..=18)
            .map(|i| {
                let angle = i as f64 * 5.0;
                let curve = CalibrationCurve::new(1.0, 10.0).unwrap();
                format!("{angle};{}\n", curve.angle_to_power(angle))
            })
            .collect();
        write(dir.path(), "red.txt", &samples);
        write(dir.path(), "green.txt", "# two samples only\n0 1\n10 2\n");
        let path = write(
            dir.path(),
            "bench.toml",
            "[calibration.files]\nwp_red = \"red.txt\"\nwp_green = \"green.txt\"\nwp_blue = \"missing.txt\"\n",
        );

        let config = BenchConfig::load_with_env(Some(&path), "BENCH_TEST_CALIB_").unwrap();
        let curves = config.load_calibrations();

        let red = curves["wp_red"].as_ref().unwrap();
        assert!((red.max_power() - 2.0).abs() < 0.02);
        assert!(curves["wp_green"].is_none());
        assert!(curves["wp_blue"].is_none());
        assert!(logs_contain("falls back to raw angle"));
    }

    #[test]
    fn test_scan_defaults_apply() {
        let defaults = ScanDefaults {
            settle_time: Duration::from_millis(10),
            inter_instrument_delay: Duration::from_millis(5),
        };
        let config = defaults
            .apply(crate::scan::ScanConfig::builder())
            .points([0.0])
            .instrument(crate::scan::InstrumentBinding::new("pm"))
            .build()
            .unwrap();
        assert_eq!(config.settle_time, Duration::from_millis(10));
        assert_eq!(config.inter_instrument_delay, Duration::from_millis(5));
    }
}
