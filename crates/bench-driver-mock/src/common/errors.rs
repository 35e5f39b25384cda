//! Error injection framework for mock devices.
//!
//! Failures are reported as [`DriverError`]s so tests can downcast the
//! `anyhow::Error` coming out of a driver and inspect the failure kind.

use std::collections::HashMap;
use std::sync::Arc;

use bench_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;

use super::rng::MockRng;

/// Error injection configuration for mock devices.
///
/// Cloning shares the counters, so a test can keep a handle and `reset()` it
/// while the driver is owned by a scan.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0), `"*"` matches every operation
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

/// Deterministic failure pattern.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Every call after the first `count` fails
    FailAfterN {
        operation: &'static str,
        count: u32,
    },
    /// Only the listed calls (1-based) fail
    FailOnCalls {
        operation: &'static str,
        calls: Vec<u32>,
    },
    /// Operation always times out
    Timeout { operation: &'static str },
    /// First call of any operation loses the link; every later call fails
    /// until [`ErrorConfig::reset`]
    CommunicationLoss,
    /// Hardware fault latched on the first call
    HardwareFault { code: u32 },
}

#[derive(Default, Debug)]
struct ErrorState {
    /// Calls seen per operation, including failed ones
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
    /// 0 = no fault
    hardware_fault_code: u32,
}

impl ErrorConfig {
    /// No injected errors
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    /// Uniform random failures on every operation
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(Vec::new()),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Inject a single scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Inject several scenarios; the first match wins.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            failure_rates: Arc::new(HashMap::new()),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(None)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Fail only the `call`-th invocation (1-based) of `operation`.
    pub fn fail_on_call(operation: &'static str, call: u32) -> Self {
        Self::scenario(ErrorScenario::FailOnCalls {
            operation,
            calls: vec![call],
        })
    }

    /// Check if an operation should fail and return the injected error.
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: &'static str,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        let call = {
            let count = state.operation_counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        if state.communication_lost {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Communication,
                "Communication lost",
            ));
        }
        if state.hardware_fault_code != 0 {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Hardware fault: {}", state.hardware_fault_code),
            ));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation && call > *count => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Injected failure after {count} operations"),
                    ));
                }
                ErrorScenario::FailOnCalls {
                    operation: op,
                    calls,
                } if *op == operation && calls.contains(&call) => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Injected failure on '{operation}' call {call}"),
                    ));
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Timeout,
                        format!("Operation '{operation}' timed out"),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Communication,
                        "Communication lost",
                    ));
                }
                ErrorScenario::HardwareFault { code } => {
                    state.hardware_fault_code = *code;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Hardware fault: {code}"),
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Random failure on operation '{operation}'"),
            ));
        }

        Ok(())
    }

    /// Number of times `operation` has been checked.
    pub fn calls(&self, operation: &'static str) -> u32 {
        self.state
            .lock()
            .operation_counts
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Clear counters and latched faults (simulates reconnecting the device).
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
