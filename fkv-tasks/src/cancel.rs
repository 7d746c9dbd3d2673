//! Cooperative cancellation for batch operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fkv_common::{FkvError, FkvResult};

/// Cloneable flag checked between batch items.
///
/// Cancelling never interrupts a store call that is already in flight.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns `FkvError::Cancelled` once `cancel` has been called.
    pub fn check(&self) -> FkvResult<()> {
        if self.is_cancelled() {
            return Err(FkvError::Cancelled);
        }
        Ok(())
    }
}
