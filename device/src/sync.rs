//! Timeline synchronization primitive.
//!
//! A timeline signal is a monotonically increasing counter used to order
//! host-visible completion of enqueued device operations: the queue bumps
//! the signal as each operation retires, and blocking calls (map, barrier)
//! wait for the signal to reach the enqueue ticket they observed.
//!
//! Waits are exposed in timed slices so callers can interleave cancellation
//! and fault checks without holding the signal hostage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Monotonic completion counter with blocking waiters.
#[derive(Debug, Default)]
pub struct TimelineSignal {
    /// Current timeline value; only ever increases.
    value: AtomicU64,
    /// Protects nothing; exists for the condvar.
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl TimelineSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Advance the timeline to at least `value` and wake all waiters.
    pub fn advance_to(&self, value: u64) {
        self.value.fetch_max(value, Ordering::AcqRel);
        self.condvar.notify_all();
    }

    pub fn is_reached(&self, target: u64) -> bool {
        self.value() >= target
    }

    /// Block until the signal reaches `target` or `slice` elapses.
    ///
    /// Returns whether the target was reached. Spurious early returns are
    /// fine; callers loop and re-check their own cancellation conditions.
    pub fn wait_timeout(&self, target: u64, slice: Duration) -> bool {
        if self.is_reached(target) {
            return true;
        }
        let mut guard = self.mutex.lock();
        if self.is_reached(target) {
            return true;
        }
        self.condvar.wait_for(&mut guard, slice);
        self.is_reached(target)
    }
}
