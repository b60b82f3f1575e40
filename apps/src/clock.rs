//! Time source for timestamps and restart deadlines.

use core::sync::atomic::{AtomicU64, Ordering};

/// Monotonic milliseconds since boot.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Clock advanced by hand. Used by simulators and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub const fn new(start_ms: u64) -> Self {
        ManualClock {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
