//! Instrument handle.

use std::sync::Arc;

use bench_core::{AcquisitionParams, BenchError, BenchResult, DeviceCategory, InstrumentDriver, Reading};
use tracing::{debug, info, warn};

/// A detector (power meter, spectrometer or camera) wrapped with
/// availability tracking.
///
/// `configure` only reaches the driver when the parameters differ from the
/// ones last applied. Any failed `activate`, `configure` or `acquire`,
/// including a call before activation, marks the instrument unavailable; a
/// scan then skips it until it is activated again.
pub struct Instrument {
    id: String,
    category: DeviceCategory,
    driver: Arc<dyn InstrumentDriver>,
    activated: bool,
    available: bool,
    last_reading: Option<Reading>,
    last_applied: Option<AcquisitionParams>,
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("activated", &self.activated)
            .field("available", &self.available)
            .field("last_applied", &self.last_applied)
            .finish_non_exhaustive()
    }
}

impl Instrument {
    /// Wrap `driver`; the instrument starts deactivated but available.
    pub fn new(
        id: impl Into<String>,
        category: DeviceCategory,
        driver: Arc<dyn InstrumentDriver>,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            driver,
            activated: false,
            available: true,
            last_reading: None,
            last_applied: None,
        }
    }

    /// Instrument id used in scan bindings.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Device category.
    pub fn category(&self) -> DeviceCategory {
        self.category
    }

    /// True after a successful `activate` and before `deactivate`.
    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// False after a failure until the next successful `activate`.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Most recent successful reading.
    pub fn last_reading(&self) -> Option<&Reading> {
        self.last_reading.as_ref()
    }

    /// Parameters most recently forwarded to the driver.
    pub fn applied_params(&self) -> Option<AcquisitionParams> {
        self.last_applied
    }

    /// Activate the driver. Success makes the instrument available again and
    /// forgets the applied parameters.
    pub async fn activate(&mut self) -> BenchResult<()> {
        match self.driver.activate().await {
            Ok(()) => {
                self.activated = true;
                self.available = true;
                self.last_applied = None;
                info!(instrument = %self.id, category = %self.category, "Instrument activated");
                Ok(())
            }
            Err(err) => {
                self.activated = false;
                let err = self.driver_error("activate", err);
                self.track("activate", Err(err))
            }
        }
    }

    /// Apply acquisition parameters, skipping the driver when unchanged.
    pub async fn configure(&mut self, params: &AcquisitionParams) -> BenchResult<()> {
        let activated = self.ensure_activated();
        self.track("configure", activated)?;
        if self.last_applied.as_ref() == Some(params) {
            return Ok(());
        }
        let result = match self.driver.configure(params).await {
            Ok(()) => {
                debug!(
                    instrument = %self.id,
                    exposure = ?params.exposure,
                    averages = params.averages,
                    "Parameters applied"
                );
                self.last_applied = Some(*params);
                Ok(())
            }
            Err(err) => Err(self.driver_error("configure", err)),
        };
        self.track("configure", result)
    }

    /// Take one reading. Calling this before a successful `activate` fails
    /// with `NotActivated` and marks the instrument unavailable.
    pub async fn acquire(&mut self) -> BenchResult<Reading> {
        let activated = self.ensure_activated();
        self.track("acquire", activated)?;
        let result = match self.driver.acquire().await {
            Ok(reading) => {
                self.last_reading = Some(reading.clone());
                Ok(reading)
            }
            Err(err) => Err(self.driver_error("acquire", err)),
        };
        self.track("acquire", result)
    }

    /// Release the device. The handle is deactivated afterwards even if the
    /// driver reports an error.
    pub async fn deactivate(&mut self) -> BenchResult<()> {
        let result = self.driver.deactivate().await;
        self.activated = false;
        info!(instrument = %self.id, "Instrument deactivated");
        result.map_err(|err| BenchError::InstrumentUnavailable {
            instrument: self.id.clone(),
            message: err.to_string(),
        })
    }

    fn ensure_activated(&self) -> BenchResult<()> {
        if self.activated {
            Ok(())
        } else {
            Err(BenchError::NotActivated {
                instrument: self.id.clone(),
            })
        }
    }

    fn driver_error(&self, operation: &str, err: anyhow::Error) -> BenchError {
        BenchError::InstrumentUnavailable {
            instrument: self.id.clone(),
            message: format!("{operation} failed: {err}"),
        }
    }

    /// Clear availability on any failure that takes the instrument out of a
    /// running scan.
    fn track<T>(&mut self, operation: &str, result: BenchResult<T>) -> BenchResult<T> {
        if let Err(err) = &result {
            if err.is_instrument_failure() {
                if self.available {
                    warn!(instrument = %self.id, operation, error = %err, "Instrument marked unavailable");
                }
                self.available = false;
            }
        }
        result
    }
}
