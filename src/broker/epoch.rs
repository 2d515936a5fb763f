//! Conversation turn counter

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic turn number stamped on every write.
///
/// Only `reset` moves it backwards.
#[derive(Debug, Default)]
pub struct EpochCounter {
    value: AtomicU64,
}

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::SeqCst);
    }

    /// Advance by one and return the new value
    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}
