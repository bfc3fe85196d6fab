//! Host platform capability layer.
//!
//! The original selects a POSIX/FreeRTOS/macOS/Windows backend at compile
//! time for the millisecond clock, sleeping, thread creation, and
//! mutex/semaphore primitives (spec.md §9). On this target threads, mutexes
//! and sleeping are just `std::thread`/`std::sync`/`std::thread::sleep`, so
//! the only capability worth abstracting behind a trait is the clock —
//! tests need to control it (see `CfpReassembly` timeout scenario), which a
//! hardwired `Instant::now()` would not allow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A millisecond wall-clock capability, passed by construction rather than
/// read from a process-global (spec.md §9's "global mutable state" note).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Real wall clock, anchored at construction time.
#[derive(Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// A clock tests can advance by hand, so reassembly-timeout behavior
/// (spec.md §8 scenario 3) doesn't require a real 11-second sleep.
#[derive(Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
