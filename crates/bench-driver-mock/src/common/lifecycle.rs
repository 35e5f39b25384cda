//! Activation and parameter bookkeeping shared by the acquirable mocks.
//!
//! Tests inspect this to assert what the engine actually sent to a driver:
//! how often it was configured, with which parameters, and how many
//! acquisitions happened.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use anyhow::Result;
use bench_core::error::{DriverError, DriverErrorKind};
use bench_core::AcquisitionParams;
use parking_lot::Mutex;

/// Activation state and call counters shared by the mock detectors.
#[derive(Debug, Default)]
pub struct InstrumentLifecycle {
    active: AtomicBool,
    acquisitions: AtomicU32,
    current: Mutex<AcquisitionParams>,
    /// Every parameter set received through `configure`, in order
    history: Mutex<Vec<AcquisitionParams>>,
}

impl InstrumentLifecycle {
    /// Mark active.
    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Mark inactive.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Whether the device is active.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Fail unless activated.
    pub fn ensure_active(&self, driver_type: &str) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DriverError::new(
                driver_type,
                DriverErrorKind::Initialization,
                "device not activated",
            )
            .into())
        }
    }

    /// Record and apply a parameter set.
    pub fn configure(&self, params: &AcquisitionParams) {
        *self.current.lock() = *params;
        self.history.lock().push(*params);
    }

    /// Parameters currently applied to the device.
    pub fn params(&self) -> AcquisitionParams {
        *self.current.lock()
    }

    /// Record one acquisition and return its 0-based sequence number.
    pub fn next_acquisition(&self) -> u32 {
        self.acquisitions.fetch_add(1, Ordering::SeqCst)
    }

    /// Successful acquisitions so far.
    pub fn acquisitions(&self) -> u32 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of `configure` calls that reached the driver.
    pub fn configure_count(&self) -> usize {
        self.history.lock().len()
    }

    /// Every parameter set received, oldest first.
    pub fn configured(&self) -> Vec<AcquisitionParams> {
        self.history.lock().clone()
    }
}
