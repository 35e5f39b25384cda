//! `bench-core`
//!
//! Core types for the calibrated multi-instrument scan engine.
//!
//! This crate holds everything that does not need a runtime: the waveplate
//! calibration model, the driver capability traits implemented by hardware
//! wrappers, the scan description and result types, errors and the layered
//! bench configuration. The engine that executes scans lives in
//! `bench-engine`.
//!
//! ## Key Types
//!
//! - [`CalibrationCurve`]: cosine power/angle model with a Levenberg–Marquardt fit
//! - [`StageDriver`] / [`InstrumentDriver`]: the driver boundary
//! - [`Reading`]: scalar, vector or matrix acquisition with a UTC timestamp
//! - [`ScanConfig`] / [`ScanResult`] / [`ScanEvent`]: what to sweep and what came back
//! - [`BenchError`]: error type with recovery notes per variant
//! - [`BenchConfig`]: figment-backed configuration

pub mod calibration;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod params;
pub mod reading;
pub mod scan;

pub use calibration::{AngleSetpoint, CalibrationCurve};
pub use capabilities::{DeviceCategory, InstrumentDriver, StageDriver};
pub use config::BenchConfig;
pub use error::{BenchError, BenchResult, DriverError, DriverErrorKind};
pub use params::AcquisitionParams;
pub use reading::{Reading, ReadingValue};
pub use scan::{
    linspace, AxisBinding, AxisMapping, Beam, Gap, GridAxis, InstrumentBinding, PointFailure,
    Sample, ScanConfig, ScanConfigBuilder, ScanEvent, ScanResult, ScanSink,
};
