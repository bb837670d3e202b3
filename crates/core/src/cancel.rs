//! Cooperative cancellation for long-running operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DomainError, DomainResult};

/// Cloneable cancellation signal.
///
/// Operations accept a flag and check it between per-item processing steps so
/// a cancelled operation stops promptly and rolls back cleanly instead of
/// partially committing. Cancellation is sticky: once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`DomainError::Cancelled`] if cancellation was requested.
    pub fn ensure_active(&self) -> DomainResult<()> {
        if self.is_cancelled() {
            Err(DomainError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_active() {
        let flag = CancellationFlag::new();
        assert!(!flag.is_cancelled());
        assert!(flag.ensure_active().is_ok());
    }

    #[test]
    fn cancel_is_sticky_and_visible_to_clones() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
        assert_eq!(flag.ensure_active(), Err(DomainError::Cancelled));
    }
}
