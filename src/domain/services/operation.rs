#[cfg(test)]
#[path = "operation_test.rs"]
mod tests;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::WaitForCancellationFuture;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// The user asked to stop the reply.
    UserStop,
    /// Another thread became active.
    ThreadSwitch,
    /// A newer send in the same thread replaced this one.
    Superseded,
    FirstByteTimeout,
    Inactivity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Hydrate,
    Stream,
    Poll,
}

/// Cancellation handle for one network operation. Clones share the same
/// token and the first recorded reason wins.
#[derive(Clone, Debug)]
pub struct OperationHandle {
    id: u64,
    kind: OperationKind,
    token: CancellationToken,
    reason: Arc<OnceCell<CancelReason>>,
    stop_requested: Arc<AtomicBool>,
    placeholder_id: Option<String>,
}

impl OperationHandle {
    fn new(id: u64, kind: OperationKind, placeholder_id: Option<String>) -> OperationHandle {
        return OperationHandle {
            id,
            kind,
            token: CancellationToken::new(),
            reason: Arc::new(OnceCell::new()),
            stop_requested: Arc::new(AtomicBool::new(false)),
            placeholder_id,
        };
    }

    pub fn id(&self) -> u64 {
        return self.id;
    }

    pub fn kind(&self) -> OperationKind {
        return self.kind;
    }

    pub fn placeholder_id(&self) -> Option<&str> {
        return self.placeholder_id.as_deref();
    }

    pub fn cancel(&self, reason: CancelReason) {
        // Remembered even when another reason got there first.
        if reason == CancelReason::UserStop {
            self.stop_requested.store(true, Ordering::SeqCst);
        }
        if self.reason.set(reason).is_ok() {
            tracing::debug!(operation = self.id, reason = ?reason, "cancelling operation");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        return self.token.is_cancelled();
    }

    pub fn reason(&self) -> Option<CancelReason> {
        return self.reason.get().copied();
    }

    pub fn stop_requested(&self) -> bool {
        return self.stop_requested.load(Ordering::SeqCst);
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        return self.token.cancelled();
    }
}

/// Holds the single in-flight operation of a session. Starting a new one
/// always cancels whatever was there.
#[derive(Debug, Default)]
pub struct OperationSlot {
    current: Option<OperationHandle>,
    next_id: u64,
}

impl OperationSlot {
    pub fn start(
        &mut self,
        kind: OperationKind,
        placeholder_id: Option<String>,
        reason: CancelReason,
    ) -> OperationHandle {
        self.cancel(reason);
        self.next_id += 1;
        let handle = OperationHandle::new(self.next_id, kind, placeholder_id);
        self.current = Some(handle.clone());

        return handle;
    }

    /// Swaps a cancelled handle for a fresh one under the same id, so a
    /// follow-up phase of the same operation can still be stopped. Returns
    /// `None` when `id` is no longer the current operation. A stop that
    /// arrived after the original cancellation carries over, so the renewed
    /// handle starts out stopped.
    pub fn renew(&mut self, id: u64, kind: OperationKind) -> Option<OperationHandle> {
        let current = self.current.as_ref()?;
        if current.id != id {
            return None;
        }

        let handle = OperationHandle::new(id, kind, current.placeholder_id.clone());
        if current.stop_requested() {
            handle.cancel(CancelReason::UserStop);
        }
        self.current = Some(handle.clone());
        return Some(handle);
    }

    /// Cancels and removes the current operation, returning it.
    pub fn cancel(&mut self, reason: CancelReason) -> Option<OperationHandle> {
        let previous = self.current.take()?;
        previous.cancel(reason);
        return Some(previous);
    }

    /// Cancels the current operation but keeps it in the slot so its own
    /// continuation can observe the reason and release it.
    pub fn interrupt(&self, reason: CancelReason) -> bool {
        if let Some(current) = &self.current {
            current.cancel(reason);
            return true;
        }

        return false;
    }

    /// Clears the slot only if it still refers to `id`.
    pub fn release(&mut self, id: u64) -> bool {
        let is_current = self.is_current(id);
        if is_current {
            self.current = None;
        }

        return is_current;
    }

    pub fn is_current(&self, id: u64) -> bool {
        return self
            .current
            .as_ref()
            .map(|current| {
                return current.id == id;
            })
            .unwrap_or(false);
    }

    pub fn current(&self) -> Option<&OperationHandle> {
        return self.current.as_ref();
    }
}

/// Captured by every continuation when it starts; compared against the
/// session before any mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken {
    pub epoch: u64,
    pub thread_id: String,
}

#[derive(Debug, Default)]
pub struct ActiveThread {
    thread_id: Option<String>,
    epoch: u64,
}

impl ActiveThread {
    pub fn thread_id(&self) -> Option<&str> {
        return self.thread_id.as_deref();
    }

    /// Moves to `thread_id` and invalidates every token handed out so far.
    pub fn activate(&mut self, thread_id: &str) -> SessionToken {
        self.thread_id = Some(thread_id.to_string());
        self.epoch += 1;

        return SessionToken {
            epoch: self.epoch,
            thread_id: thread_id.to_string(),
        };
    }

    /// Invalidates earlier tokens while staying on the same thread.
    pub fn advance(&mut self) -> Option<SessionToken> {
        let thread_id = self.thread_id.clone()?;
        self.epoch += 1;

        return Some(SessionToken {
            epoch: self.epoch,
            thread_id,
        });
    }

    pub fn is_current(&self, token: &SessionToken) -> bool {
        return self.epoch == token.epoch && self.thread_id.as_deref() == Some(&token.thread_id);
    }
}
