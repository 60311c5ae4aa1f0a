//! Stall detector for pipe channels.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::error;

use crate::lifecycle::Worker;

use super::channel::{epoch_millis, PipeShared};

/// How often the watchdog inspects the in-flight operation, in millis.
pub(super) const WATCHDOG_INTERVAL_MS: u64 = 2_000;

/// Periodically checks the channel's operation timestamp and restarts
/// the handle when a transfer has been blocked past the configured
/// maximum. Runs as a [`Worker`] with the interval as its loop sleep.
pub(super) struct WatchdogWorker {
    shared: Arc<PipeShared>,
}

impl WatchdogWorker {
    pub(super) fn new(shared: Arc<PipeShared>) -> Self {
        Self { shared }
    }
}

impl Worker for WatchdogWorker {
    fn execute(&mut self) {
        if !self.shared.is_running() {
            return;
        }
        let started = self.shared.op_started_ms.load(Ordering::Acquire);
        if started == 0 {
            return;
        }
        let elapsed = epoch_millis().saturating_sub(started);
        if elapsed < self.shared.max_op_time_ms {
            return;
        }
        // Re-check right before acting so a transfer that just finished,
        // or a channel mid-shutdown, is left alone.
        if !self.shared.is_running() || self.shared.op_started_ms.load(Ordering::Acquire) == 0 {
            return;
        }
        error!(
            path = %self.shared.path.display(),
            elapsed_ms = elapsed,
            max_ms = self.shared.max_op_time_ms,
            "pipe operation exceeded the maximum operation time; restarting channel"
        );
        if let Err(err) = self.shared.restart() {
            error!(
                path = %self.shared.path.display(),
                error = %err,
                "pipe restart failed; will retry on the next interval"
            );
        }
    }
}
