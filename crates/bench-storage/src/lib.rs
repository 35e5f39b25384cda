//! Persistence for finished scans.
//!
//! [`TableSink`] implements [`bench_core::ScanSink`] and appends every run to
//! a per-day, per-scan tab-separated log under the configured data root.
//! [`CalibrationSink`] writes calibration sweeps as sample files that
//! `CalibrationCurve::from_file` can fit.

pub mod calibration_writer;
pub mod table_writer;

pub use calibration_writer::{CalibrationSink, CALIBRATION_COLUMNS};
pub use table_writer::{TableSink, HEADER};
