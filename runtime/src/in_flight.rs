use crate::{Clock, Deadline};
use std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

/// Longest a single wait blocks before re-checking its [Deadline].
///
/// Bounding each wait lets deadlines measured against a mocked [Clock] expire
/// without anyone notifying the condition variable.
const WAIT_SLICE: Duration = Duration::from_millis(10);

struct Inner {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Counts outstanding units of work and lets a caller block until all of them finish.
///
/// Each [InFlight] is an independent counter: create one per batch of work (for
/// example, one per discovery round) rather than sharing it across unrelated callers.
#[derive(Clone)]
pub struct InFlight {
    inner: Arc<Inner>,
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlight {
    /// Create a counter with nothing in flight.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                count: Mutex::new(0),
                idle: Condvar::new(),
            }),
        }
    }

    /// Record a new unit of work, which remains in flight until the returned [Guard]
    /// is released or dropped.
    pub fn track(&self) -> Guard {
        *self.inner.count.lock().unwrap() += 1;
        Guard {
            inner: self.inner.clone(),
        }
    }

    /// Number of units of work in flight.
    pub fn count(&self) -> usize {
        *self.inner.count.lock().unwrap()
    }

    /// Block until nothing is in flight or the `deadline` passes.
    ///
    /// Returns `true` if everything completed.
    pub fn wait<C: Clock>(&self, deadline: &Deadline<C>) -> bool {
        let mut count = self.inner.count.lock().unwrap();
        loop {
            if *count == 0 {
                return true;
            }
            if deadline.is_due() {
                return false;
            }
            let slice = deadline.remaining().min(WAIT_SLICE);
            count = self.inner.idle.wait_timeout(count, slice).unwrap().0;
        }
    }
}

/// Marks one unit of work tracked by an [InFlight] as outstanding.
pub struct Guard {
    inner: Arc<Inner>,
}

impl Guard {
    /// Mark the unit of work as complete.
    pub fn release(self) {}
}

impl Drop for Guard {
    fn drop(&mut self) {
        let mut count = self.inner.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.inner.idle.notify_all();
        }
    }
}
