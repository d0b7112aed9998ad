//! Flush timers for the telemetry hub
//!
//! The hub starts its timer on the first enqueue and stops it the first time a
//! flush finds nothing pending. Both calls happen under the hub's lock, so a
//! timer never has to reason about concurrent start/stop.

use super::hub::TelemetryHub;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Drives `TelemetryHub::flush` while events are pending
pub trait FlushTimer: Send + Sync {
    /// Begin ticking. Each tick calls `flush` on the hub.
    fn start(&self, hub: Weak<TelemetryHub>);

    /// Stop ticking
    fn stop(&self);
}

/// Tokio interval timer
pub struct IntervalFlushTimer {
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalFlushTimer {
    /// Create a timer that ticks every `period`
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            task: Mutex::new(None),
        }
    }

    /// Whether a ticking task exists and has not finished
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl FlushTimer for IntervalFlushTimer {
    fn start(&self, hub: Weak<TelemetryHub>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "No tokio runtime, telemetry flush timer not started");
                return;
            }
        };

        let period = self.period;
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the first
            // flush happens one full period after the first enqueue.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else { break };
                if !hub.flush() {
                    break;
                }
            }
            debug!("Telemetry flush timer stopped");
        });

        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for IntervalFlushTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Timer that never ticks on its own; tests call `TelemetryHub::flush` by hand
#[derive(Debug, Default)]
pub struct ManualFlushTimer {
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl ManualFlushTimer {
    /// Create a stopped timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the hub currently wants ticks
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// How many times the hub started the timer
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// How many times the hub stopped the timer
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl FlushTimer for ManualFlushTimer {
    fn start(&self, _hub: Weak<TelemetryHub>) {
        self.running.store(true, Ordering::SeqCst);
        let _ = self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
