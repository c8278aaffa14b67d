//! Cooperative cancellation shared between the foreground and the running
//! operation.
//!
//! The flag is best-effort: long operations poll it between units of work and
//! never interrupt a probe that is already running. Setting it is
//! fire-and-forget; nobody acknowledges it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A cloneable handle to one shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    flag: Arc<AtomicBool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that the current operation stop at its next checkpoint.
    pub fn set(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Only the operation runner calls this, right before a new operation
    /// starts. Operations themselves never clear the flag.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}

/// Guards the "one operation at a time" rule on the foreground side.
#[derive(Debug, Clone, Default)]
pub struct OperationGuard {
    running: Arc<AtomicBool>,
}

impl OperationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an operation as running. Returns `None` if one already is.
    pub fn try_begin(&self) -> Option<RunningOperation> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningOperation {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the guard when dropped, including on panic unwinding.
#[derive(Debug)]
pub struct RunningOperation {
    running: Arc<AtomicBool>,
}

impl Drop for RunningOperation {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
