//! Adapter between buffer accounting and the system memory tracker

use exchange_core::SystemMemoryUsageListener;
use std::sync::Arc;

/// Forwards signed byte deltas to the injected memory listener.
///
/// Allocations are recorded when a batch is buffered; frees when the
/// consumer dequeues a page or when `close` returns the whole buffer to the
/// pool. The two directions balance to zero over a client's lifetime.
pub(crate) struct MemoryAccountant {
    listener: Arc<dyn SystemMemoryUsageListener>,
}

impl MemoryAccountant {
    pub(crate) fn new(listener: Arc<dyn SystemMemoryUsageListener>) -> Self {
        Self { listener }
    }

    /// Charge newly buffered bytes against the system pool
    pub(crate) fn record_allocated(&self, bytes: u64) {
        self.listener.update_system_memory_usage(bytes as i64);
    }

    /// Return bytes to the system pool
    pub(crate) fn record_freed(&self, bytes: u64) {
        self.listener.update_system_memory_usage(-(bytes as i64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_core::AtomicMemoryTracker;

    #[test]
    fn test_deltas_balance_to_zero() {
        let tracker = Arc::new(AtomicMemoryTracker::new());
        let accountant = MemoryAccountant::new(tracker.clone());

        accountant.record_allocated(700);
        assert_eq!(tracker.reserved_bytes(), 700);

        accountant.record_freed(400);
        accountant.record_freed(300);
        assert_eq!(tracker.reserved_bytes(), 0);
    }
}
