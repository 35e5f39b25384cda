//! Tab-separated scan log.
//!
//! One file per scan name and day:
//!
//! ```text
//! <data_root>/<YYYY-MM-DD>/Scans/<name>/<name>_log_<YYYY-MM-DD>.log
//! ```
//!
//! The column header is written once when the file is created. Every run
//! appends an optional `# <comment>` line, a `# Background` line for
//! background scans, `# Aborted` for an interrupted run and one
//! `# Missing: point <i> <instrument>: <reason>` line per gap, then one row
//! per sample.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bench_storage::TableSink;
//!
//! let sink = Arc::new(TableSink::new(&config.data_root));
//! let coordinator = ScanCoordinator::with_sink(sink);
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bench_core::{ScanConfig, ScanResult, ScanSink};
use chrono::{Local, NaiveDate, SecondsFormat};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Column names, tab-separated.
pub const HEADER: &str = "point_index\tpoint\tinstrument\ttag\tkind\tvalue\ttimestamp";

/// Writes scan results as tab-separated text under a data root.
#[derive(Debug, Clone)]
pub struct TableSink {
    data_root: PathBuf,
    /// Fixed date for the directory and file name; today when unset
    date: Option<NaiveDate>,
}

impl TableSink {
    /// Log under `data_root`.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            date: None,
        }
    }

    /// Use `date` instead of the current local date.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Root directory of all scan logs.
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Log file for scan `name`.
    pub fn log_path(&self, name: &str) -> PathBuf {
        let day = self
            .date
            .unwrap_or_else(|| Local::now().date_naive())
            .format("%Y-%m-%d")
            .to_string();
        self.data_root
            .join(&day)
            .join("Scans")
            .join(name)
            .join(format!("{name}_log_{day}.log"))
    }

    /// Lines appended for one run.
    pub fn render(result: &ScanResult) -> String {
        let mut out = String::new();
        if !result.comment.is_empty() {
            for line in result.comment.lines() {
                out.push_str(&format!("# {line}\n"));
            }
        }
        if result.background {
            out.push_str("# Background\n");
        }
        if result.aborted {
            out.push_str("# Aborted\n");
        }
        for gap in &result.gaps {
            let instrument = gap.instrument.as_deref().unwrap_or("all");
            out.push_str(&format!(
                "# Missing: point {} {instrument}: {}\n",
                gap.point_index,
                gap.reason.replace('\n', " ")
            ));
        }

        let tag = if result.background { "Background" } else { "Image" };
        let mut rows: Vec<_> = result
            .per_instrument
            .iter()
            .flat_map(|(instrument, samples)| samples.iter().map(move |s| (instrument, s)))
            .collect();
        rows.sort_by_key(|(_, s)| s.point_index);

        for (instrument, sample) in rows {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
                sample.point_index,
                sample.point,
                instrument,
                tag,
                sample.reading.value.kind(),
                sample.reading.summary(),
                sample
                    .reading
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }
        out
    }
}

/// Reject names that would escape or collapse a directory level.
pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(anyhow!("{name:?} cannot be used as a directory name"));
    }
    Ok(())
}

#[async_trait]
impl ScanSink for TableSink {
    async fn save(&self, result: &ScanResult, config: &ScanConfig) -> Result<()> {
        check_name(&config.name)?;
        let path = self.log_path(&config.name);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let is_new = match fs::metadata(&path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut text = String::new();
        if is_new {
            text.push_str(HEADER);
            text.push('\n');
            debug!(path = %path.display(), "Creating scan log");
        }
        text.push_str(&Self::render(result));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(text.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        file.flush().await?;

        info!(
            scan = %config.name,
            path = %path.display(),
            samples = result.sample_count(),
            "Scan saved"
        );
        Ok(())
    }
}
