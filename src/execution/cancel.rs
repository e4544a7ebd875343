//! Cooperative cancellation flag shared between a run and its caller

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle that flips a run's cancel intent.
///
/// Setting the flag never interrupts an in-flight batch; the scheduler
/// checks it between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    requested: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop before its next batch
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
