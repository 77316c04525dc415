use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A non-negative blocking counter.
///
/// `release(n)` adds to the count and wakes a waiter; `acquire(n)` blocks
/// until the count reaches `n` and then subtracts it. Releases are strictly
/// additive: nothing ever subtracts from the count except a successful
/// acquire, so the count is never observed negative (it cannot be, being
/// a `usize`, and an acquire only subtracts once its predicate holds).
///
/// The mutex acquire/release pairs inside the gate give release → acquire
/// pairs the usual happens-before edge: everything written before a
/// `release(n)` is visible to the thread whose `acquire(n)` it satisfies.
#[derive(Debug)]
pub struct CountingGate {
    count: Mutex<usize>,
    available: Condvar,
}

impl CountingGate {
    /// Creates a gate holding `initial` units.
    #[must_use]
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            available: Condvar::new(),
        }
    }

    /// Adds `n` units and wakes a waiter, if any.
    pub fn release(&self, n: usize) {
        {
            let mut count = self.count.lock();

            *count = count
                .checked_add(n)
                .expect("gate count overflowed usize - releases no longer match acquires");
        }

        self.available.notify_one();
    }

    /// Blocks until at least `n` units are available, then takes them.
    pub fn acquire(&self, n: usize) {
        let mut count = self.count.lock();

        while *count < n {
            self.available.wait(&mut count);
        }

        *count -= n;
    }

    /// Takes `n` units if they are available right now.
    ///
    /// Never blocks. Returns `true` if the units were taken.
    #[must_use]
    pub fn try_acquire(&self, n: usize) -> bool {
        let mut count = self.count.lock();

        if *count < n {
            return false;
        }

        *count -= n;
        true
    }

    /// Blocks until at least `n` units are available or `timeout` elapses.
    ///
    /// Returns `true` if the units were taken within the timeout.
    #[must_use]
    pub fn acquire_timeout(&self, n: usize, timeout: Duration) -> bool {
        let mut count = self.count.lock();

        let deadline = std::time::Instant::now() + timeout;

        while *count < n {
            if self.available.wait_until(&mut count, deadline).timed_out() {
                // Re-check: the count may have been satisfied between the
                // last wakeup and the timeout firing.
                if *count >= n {
                    break;
                }
                return false;
            }
        }

        *count -= n;
        true
    }

    /// Returns the current count.
    ///
    /// Purely informational: by the time the caller looks at the value,
    /// another thread may already have changed it. The one read that is
    /// dependable is a lower bound seen by the only thread that acquires
    /// from this gate, since nobody else subtracts.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}
