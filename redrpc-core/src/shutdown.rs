//! Cooperative shutdown flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable stop flag observed by worker and heartbeat loops.
///
/// Loops check it at every iteration boundary; since every blocking wait is
/// bounded, a trigger is observed within one poll quantum.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    ///
    /// Returns `true` if this call was the one that set the flag.
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The underlying flag, for registration with signal handlers.
    pub fn flag(&self) -> &Arc<AtomicBool> {
        &self.flag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_shared_and_idempotent() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        assert!(!clone.is_triggered());

        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());
        assert!(clone.is_triggered());
    }

    #[test]
    fn test_flag_store_is_observed() {
        let shutdown = Shutdown::new();
        shutdown.flag().store(true, Ordering::SeqCst);
        assert!(shutdown.is_triggered());
    }
}
