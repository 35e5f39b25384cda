//! Continuous acquisition loop.
//!
//! A [`LiveLoop`] polls one instrument on a dedicated task until it is
//! stopped. Parameters live behind a `parking_lot::Mutex` so the caller can
//! change them at any time; each cycle snapshots them, so a change is picked
//! up on the next cycle without waiting for the current one.
//!
//! # Usage
//!
//! ```rust,ignore
//! let live = LiveLoop::start(
//!     power_meter,
//!     config.live,
//!     |reading| println!("{:.3} W", reading.summary()),
//!     |err| eprintln!("live loop stopped: {err}"),
//! );
//! live.update_parameters(params.with_averages(10));
//! let mut power_meter = live.stop().await?;
//! power_meter.deactivate().await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bench_core::{AcquisitionParams, BenchError, BenchResult, Reading};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::instrument::Instrument;

/// Shortest pause between two acquisitions.
pub const MIN_INTERVAL: Duration = Duration::from_millis(20);

/// Handle to a running live acquisition.
pub struct LiveLoop {
    id: String,
    params: Arc<Mutex<AcquisitionParams>>,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: Option<JoinHandle<Instrument>>,
}

impl std::fmt::Debug for LiveLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveLoop")
            .field("id", &self.id)
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("params", &*self.params.lock())
            .finish()
    }
}

impl LiveLoop {
    /// Spawn the loop. Must be called from within a tokio runtime.
    ///
    /// `on_reading` runs once per successful cycle. `on_error` runs at most
    /// once, after which the loop stops by itself; `stop()` still returns the
    /// instrument.
    pub fn start<R, E>(
        instrument: Instrument,
        params: AcquisitionParams,
        on_reading: R,
        on_error: E,
    ) -> Self
    where
        R: FnMut(Reading) + Send + 'static,
        E: FnOnce(BenchError) + Send + 'static,
    {
        let id = instrument.id().to_string();
        let params = Arc::new(Mutex::new(params));
        let running = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());

        info!(instrument = %id, "Live loop started");
        let task = tokio::spawn(live_task(
            instrument,
            Arc::clone(&params),
            Arc::clone(&running),
            Arc::clone(&wake),
            on_reading,
            on_error,
        ));

        Self {
            id,
            params,
            running,
            wake,
            task: Some(task),
        }
    }

    /// Id of the polled instrument.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the parameters used from the next cycle on.
    pub fn update_parameters(&self, params: AcquisitionParams) {
        *self.params.lock() = params;
    }

    /// Current parameter snapshot.
    pub fn params(&self) -> AcquisitionParams {
        *self.params.lock()
    }

    /// False once stopped, including after an acquisition error.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the loop and wait for the task to exit.
    ///
    /// No reading is delivered after this returns.
    pub async fn stop(mut self) -> BenchResult<Instrument> {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();

        let task = self
            .task
            .take()
            .ok_or_else(|| BenchError::Worker("live loop already stopped".to_string()))?;
        let instrument = task
            .await
            .map_err(|e| BenchError::Worker(format!("live loop task failed: {e}")))?;
        info!(instrument = %self.id, "Live loop stopped");
        Ok(instrument)
    }
}

impl Drop for LiveLoop {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.running.store(false, Ordering::SeqCst);
            self.wake.notify_one();
        }
    }
}

async fn live_task<R, E>(
    mut instrument: Instrument,
    params: Arc<Mutex<AcquisitionParams>>,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    mut on_reading: R,
    on_error: E,
) -> Instrument
where
    R: FnMut(Reading) + Send + 'static,
    E: FnOnce(BenchError) + Send + 'static,
{
    let mut cycles: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let snapshot = *params.lock();

        let polled = match instrument.configure(&snapshot).await {
            Ok(()) => instrument.acquire().await,
            Err(err) => Err(err),
        };

        match polled {
            Ok(reading) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                cycles += 1;
                on_reading(reading);
            }
            Err(err) => {
                warn!(instrument = %instrument.id(), error = %err, "Live loop stopped on error");
                running.store(false, Ordering::SeqCst);
                on_error(err);
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(snapshot.interval.max(MIN_INTERVAL)) => {}
            _ = wake.notified() => {}
        }
    }

    debug!(instrument = %instrument.id(), cycles, "Live loop task exiting");
    instrument
}
