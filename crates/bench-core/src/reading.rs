//! Instrument readings.
//!
//! A power meter produces a scalar, a spectrometer a vector (one intensity per
//! wavelength bin) and a camera a matrix (rows of pixels). All three share the
//! acquisition timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload of a single acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ReadingValue {
    /// Single value (power meter sample)
    Scalar(f64),
    /// One-dimensional trace (spectrum)
    Vector(Vec<f64>),
    /// Two-dimensional frame, row-major (camera image)
    Matrix(Vec<Vec<f64>>),
}

impl ReadingValue {
    /// Short label used in logs and table columns.
    pub fn kind(&self) -> &'static str {
        match self {
            ReadingValue::Scalar(_) => "scalar",
            ReadingValue::Vector(_) => "vector",
            ReadingValue::Matrix(_) => "matrix",
        }
    }
}

/// One timestamped acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Acquired data
    pub value: ReadingValue,
    /// Acquisition time
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Reading stamped with the current time.
    pub fn now(value: ReadingValue) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
        }
    }

    /// Scalar reading stamped now.
    pub fn scalar(value: f64) -> Self {
        Self::now(ReadingValue::Scalar(value))
    }

    /// Vector reading stamped now.
    pub fn vector(values: Vec<f64>) -> Self {
        Self::now(ReadingValue::Vector(values))
    }

    /// Matrix reading stamped now.
    pub fn matrix(rows: Vec<Vec<f64>>) -> Self {
        Self::now(ReadingValue::Matrix(rows))
    }

    /// Scalar payload, if this is a scalar reading.
    pub fn as_scalar(&self) -> Option<f64> {
        match self.value {
            ReadingValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Reduce the reading to one number for table logging.
    ///
    /// Scalars are returned as-is; spectra and frames are integrated (summed).
    pub fn summary(&self) -> f64 {
        match &self.value {
            ReadingValue::Scalar(v) => *v,
            ReadingValue::Vector(values) => values.iter().sum(),
            ReadingValue::Matrix(rows) => rows.iter().flat_map(|row| row.iter()).sum(),
        }
    }

    /// Number of samples carried by the reading.
    pub fn len(&self) -> usize {
        match &self.value {
            ReadingValue::Scalar(_) => 1,
            ReadingValue::Vector(values) => values.len(),
            ReadingValue::Matrix(rows) => rows.iter().map(Vec::len).sum(),
        }
    }

    /// True when the reading carries no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
