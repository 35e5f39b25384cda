//! Calibration sample files.
//!
//! A calibration sweep drives one axis in raw-angle mode and reads one power
//! meter at every angle. [`CalibrationSink`] writes the result as a sample
//! file that [`CalibrationCurve::from_file`](bench_core::CalibrationCurve::from_file)
//! reads back:
//!
//! ```text
//! <dir>/<axis>/calib_<YYYY_MM_DD>.txt      (then -2, -3, ... on the same day)
//!
//! # Date: 2024-03-05T14:03:11
//! # Axis: wp_red
//! # Instrument: pm
//! # Settle_s: 0.200
//! Angle_deg	Power_W
//! 0.000000	1.234000000
//! ```
//!
//! Only the first axis and the first instrument of the scan are recorded.
//! Points without a reading are left out; the file never contains NaN.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bench_core::{ScanConfig, ScanResult, ScanSink};
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::table_writer::check_name;

/// Column line preceding the samples.
pub const CALIBRATION_COLUMNS: &str = "Angle_deg\tPower_W";

/// Writes calibration sweeps as sample files, one new file per run.
#[derive(Debug)]
pub struct CalibrationSink {
    dir: PathBuf,
    date: Option<NaiveDate>,
    written: Mutex<Vec<PathBuf>>,
}

impl CalibrationSink {
    /// Write under `dir`, one subdirectory per axis.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            date: None,
            written: Mutex::new(Vec::new()),
        }
    }

    /// Use `date` in file names instead of the current local date.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Files written so far, oldest first.
    pub fn written(&self) -> Vec<PathBuf> {
        self.written.lock().clone()
    }

    /// Most recently written file.
    pub fn last_written(&self) -> Option<PathBuf> {
        self.written.lock().last().cloned()
    }

    /// File contents for one sweep.
    pub fn render(result: &ScanResult, config: &ScanConfig) -> Result<String> {
        let (axis, instrument) = sweep_devices(config)?;

        let mut out = format!(
            "# Date: {}\n# Axis: {axis}\n# Instrument: {instrument}\n# Settle_s: {:.3}\n",
            Local::now().format("%Y-%m-%dT%H:%M:%S"),
            config.settle_time.as_secs_f64(),
        );
        for line in result.comment.lines() {
            out.push_str(&format!("# {line}\n"));
        }
        if result.aborted {
            out.push_str("# Aborted\n");
        }
        out.push_str(CALIBRATION_COLUMNS);
        out.push('\n');

        for sample in result.samples(instrument) {
            if let Some(power) = sample.reading.as_scalar() {
                out.push_str(&format!("{:.6}\t{power:.9}\n", sample.point));
            }
        }
        Ok(out)
    }

    fn base_name(&self) -> String {
        let day = self.date.unwrap_or_else(|| Local::now().date_naive());
        format!("calib_{}", day.format("%Y_%m_%d"))
    }

    /// Create the first free `calib_<day>[-n].txt` in `dir`.
    async fn create_unique(&self, dir: &Path) -> Result<(PathBuf, fs::File)> {
        let base = self.base_name();
        for n in 1usize.. {
            let name = if n == 1 {
                format!("{base}.txt")
            } else {
                format!("{base}-{n}.txt")
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("Failed to create {}", path.display()))
                }
            }
        }
        Err(anyhow!("no free calibration file name in {}", dir.display()))
    }
}

fn sweep_devices(config: &ScanConfig) -> Result<(&str, &str)> {
    let axis = config
        .axes
        .first()
        .ok_or_else(|| anyhow!("calibration scan '{}' drives no axis", config.name))?;
    let instrument = config
        .instruments
        .first()
        .ok_or_else(|| anyhow!("calibration scan '{}' reads no instrument", config.name))?;
    if axis.power_mode {
        return Err(anyhow!(
            "calibration scan '{}' must drive '{}' by angle",
            config.name,
            axis.axis_id
        ));
    }
    Ok((axis.axis_id.as_str(), instrument.instrument_id.as_str()))
}

#[async_trait]
impl ScanSink for CalibrationSink {
    async fn save(&self, result: &ScanResult, config: &ScanConfig) -> Result<()> {
        let text = Self::render(result, config)?;
        let (axis, _) = sweep_devices(config)?;
        check_name(axis)?;

        let dir = self.dir.join(axis);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let (path, mut file) = self.create_unique(&dir).await?;
        file.write_all(text.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        file.flush().await?;

        info!(axis = %axis, path = %path.display(), "Calibration saved");
        self.written.lock().push(path);
        Ok(())
    }
}
