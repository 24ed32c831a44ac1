#[cfg(test)]
#[path = "timeout_guard_test.rs"]
mod tests;

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use super::CancelReason;
use super::OperationHandle;

/// First-byte and inactivity timers for one streaming request. Either one
/// firing cancels the operation with its own reason. Dropping the guard
/// clears both.
pub struct TimeoutGuard {
    operation: OperationHandle,
    first_byte_after: Duration,
    progress_after: Duration,
    first_byte: Option<JoinHandle<()>>,
    progress: Option<JoinHandle<()>>,
    received_any: bool,
}

impl TimeoutGuard {
    pub fn new(
        operation: OperationHandle,
        first_byte_after: Duration,
        progress_after: Duration,
    ) -> TimeoutGuard {
        return TimeoutGuard {
            operation,
            first_byte_after,
            progress_after,
            first_byte: None,
            progress: None,
            received_any: false,
        };
    }

    pub fn arm_first_byte(&mut self) {
        if self.received_any {
            return;
        }
        self.clear_first_byte();
        self.first_byte = Some(spawn_timer(
            self.operation.clone(),
            self.first_byte_after,
            CancelReason::FirstByteTimeout,
        ));
    }

    /// Called whenever bytes arrive. The first call retires the first-byte
    /// timer for good; every call restarts the inactivity timer.
    pub fn record_progress(&mut self) {
        if !self.received_any {
            self.received_any = true;
            self.clear_first_byte();
        }

        self.clear_progress();
        self.progress = Some(spawn_timer(
            self.operation.clone(),
            self.progress_after,
            CancelReason::Inactivity,
        ));
    }

    pub fn clear_first_byte(&mut self) {
        if let Some(timer) = self.first_byte.take() {
            timer.abort();
        }
    }

    pub fn clear_progress(&mut self) {
        if let Some(timer) = self.progress.take() {
            timer.abort();
        }
    }

    pub fn clear(&mut self) {
        self.clear_first_byte();
        self.clear_progress();
    }

    pub fn received_any(&self) -> bool {
        return self.received_any;
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.clear();
    }
}

fn spawn_timer(operation: OperationHandle, after: Duration, reason: CancelReason) -> JoinHandle<()> {
    return tokio::spawn(async move {
        time::sleep(after).await;
        tracing::warn!(
            operation = operation.id(),
            reason = ?reason,
            after_ms = after.as_millis() as u64,
            "stream timer fired"
        );
        operation.cancel(reason);
    });
}
