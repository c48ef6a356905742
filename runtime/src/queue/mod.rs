//! Bucket in-flight tasks by outcome and step each pending task once per cycle.
//!
//! A [Queue] owns every [Task] submitted to it. Tasks begin in the pending bucket and
//! are moved to the succeeded, failed, or timed-out bucket once a call to
//! [Task::step] reports that outcome. Callers remove finished tasks with
//! [Queue::take_succeeded] (and friends) so the queue never grows without bound.
//!
//! At any instant, the four buckets partition the set of submitted-but-not-taken tasks.
//! The bucket lock is held for an entire [Queue::drain], so no observer can witness a
//! task outside of a bucket. This requires [Task::step] to be non-blocking and to never
//! call back into the queue that is stepping it.
//!
//! # Failure Boundary
//!
//! An error returned from (or a panic raised by) [Task::step] is logged and the task is
//! moved to the failed bucket. Neither is ever propagated to the caller of [Queue::drain].
//!
//! # Example
//!
//! ```rust
//! use lanes_runtime::{Outcome, Queue, Task};
//!
//! struct Countdown(u8);
//!
//! impl Task for Countdown {
//!     type Error = std::convert::Infallible;
//!
//!     fn step(&mut self) -> Result<Outcome, Self::Error> {
//!         self.0 = self.0.saturating_sub(1);
//!         Ok(if self.0 == 0 { Outcome::Succeeded } else { Outcome::Pending })
//!     }
//! }
//!
//! let queue = Queue::new("countdown");
//! queue.submit(Countdown(2));
//! assert!(queue.drain());
//! assert_eq!(queue.pending(), 1);
//! assert!(queue.drain());
//! assert_eq!(queue.take_succeeded(10).len(), 1);
//! assert!(!queue.drain());
//! ```

use crate::extract_panic_message;
use prometheus_client::registry::Registry;
use std::{
    collections::VecDeque,
    fmt::Display,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Condvar, Mutex},
    time::Duration,
};
use tracing::{debug, error, warn};

mod metrics;

/// Handle assigned to each task submitted to a [Queue].
pub type Id = u64;

/// The result of stepping a [Task].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The task has more work to do.
    Pending,
    /// The task completed successfully.
    Succeeded,
    /// The task completed unsuccessfully.
    Failed,
    /// The task ran out of time.
    TimedOut,
}

/// A unit of work advanced one non-blocking step at a time.
pub trait Task: Send + 'static {
    /// Error returned when a step cannot be performed.
    type Error: Display;

    /// Perform one step of work, returning the resulting [Outcome].
    ///
    /// Must not block.
    fn step(&mut self) -> Result<Outcome, Self::Error>;
}

struct Slot<T> {
    id: Id,
    task: T,
}

struct Buckets<T> {
    next: Id,
    pending: Vec<Slot<T>>,
    succeeded: VecDeque<Slot<T>>,
    failed: VecDeque<Slot<T>>,
    timed_out: VecDeque<Slot<T>>,
}

impl<T> Default for Buckets<T> {
    fn default() -> Self {
        Self {
            next: 0,
            pending: Vec::new(),
            succeeded: VecDeque::new(),
            failed: VecDeque::new(),
            timed_out: VecDeque::new(),
        }
    }
}

/// Holds many concurrently evaluated [Task]s and classifies their outcomes.
pub struct Queue<T: Task> {
    name: String,
    buckets: Mutex<Buckets<T>>,

    woken: Mutex<bool>,
    wake: Condvar,

    metrics: metrics::Metrics,
}

impl<T: Task> Queue<T> {
    /// Create an empty queue. The `name` is used for diagnostics.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            buckets: Mutex::new(Buckets::default()),
            woken: Mutex::new(false),
            wake: Condvar::new(),
            metrics: metrics::Metrics::default(),
        }
    }

    /// The name of the queue.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the queue's metrics with the given registry.
    pub fn register(&self, registry: &mut Registry) {
        self.metrics.register(registry);
    }

    /// Add a task to the pending bucket and wake the thread driving the queue.
    pub fn submit(&self, task: T) -> Id {
        let id = {
            let mut buckets = self.buckets.lock().unwrap();
            let id = buckets.next;
            buckets.next += 1;
            buckets.pending.push(Slot { id, task });
            self.update_metrics(&buckets);
            id
        };
        debug!(queue = %self.name, id, "submitted task");
        self.wake();
        id
    }

    /// Step every pending task exactly once, in submission order.
    ///
    /// Tasks that report an outcome other than [Outcome::Pending] are moved to the
    /// matching bucket. Returns `false` if there was nothing pending.
    pub fn drain(&self) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.pending.is_empty() {
            return false;
        }

        let pending = std::mem::take(&mut buckets.pending);
        for mut slot in pending {
            let outcome = match catch_unwind(AssertUnwindSafe(|| slot.task.step())) {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    warn!(queue = %self.name, id = slot.id, %err, "task failed");
                    Outcome::Failed
                }
                Err(panic) => {
                    let err = extract_panic_message(&*panic);
                    error!(queue = %self.name, id = slot.id, ?err, "task panicked");
                    Outcome::Failed
                }
            };
            match outcome {
                Outcome::Pending => buckets.pending.push(slot),
                Outcome::Succeeded => buckets.succeeded.push_back(slot),
                Outcome::Failed => buckets.failed.push_back(slot),
                Outcome::TimedOut => buckets.timed_out.push_back(slot),
            }
        }
        self.metrics.cycles.inc();
        self.update_metrics(&buckets);
        true
    }

    /// Remove and return up to `limit` succeeded tasks (oldest first).
    pub fn take_succeeded(&self, limit: usize) -> Vec<T> {
        self.take(limit, |buckets| &mut buckets.succeeded)
    }

    /// Remove and return up to `limit` failed tasks (oldest first).
    pub fn take_failed(&self, limit: usize) -> Vec<T> {
        self.take(limit, |buckets| &mut buckets.failed)
    }

    /// Remove and return up to `limit` timed-out tasks (oldest first).
    pub fn take_timed_out(&self, limit: usize) -> Vec<T> {
        self.take(limit, |buckets| &mut buckets.timed_out)
    }

    /// Drop all failed tasks, returning how many were dropped.
    pub fn discard_failed(&self) -> usize {
        self.take_failed(usize::MAX).len()
    }

    /// Drop all timed-out tasks, returning how many were dropped.
    pub fn discard_timed_out(&self) -> usize {
        self.take_timed_out(usize::MAX).len()
    }

    /// Number of pending tasks.
    ///
    /// This is a snapshot: the queue may be mutated concurrently.
    pub fn pending(&self) -> usize {
        self.buckets.lock().unwrap().pending.len()
    }

    /// Number of succeeded tasks not yet taken (snapshot).
    pub fn succeeded(&self) -> usize {
        self.buckets.lock().unwrap().succeeded.len()
    }

    /// Number of failed tasks not yet taken (snapshot).
    pub fn failed(&self) -> usize {
        self.buckets.lock().unwrap().failed.len()
    }

    /// Number of timed-out tasks not yet taken (snapshot).
    pub fn timed_out(&self) -> usize {
        self.buckets.lock().unwrap().timed_out.len()
    }

    /// Wake the thread waiting on the queue (if any).
    pub fn wake(&self) {
        *self.woken.lock().unwrap() = true;
        self.wake.notify_all();
    }

    /// Block until [Queue::wake] is called or `timeout` elapses.
    ///
    /// Returns `true` if the queue was woken. A wake delivered before the wait began
    /// is not lost.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut woken = self.woken.lock().unwrap();
        if !*woken {
            woken = self.wake.wait_timeout(woken, timeout).unwrap().0;
        }
        std::mem::replace(&mut *woken, false)
    }

    fn take<F>(&self, limit: usize, bucket: F) -> Vec<T>
    where
        F: FnOnce(&mut Buckets<T>) -> &mut VecDeque<Slot<T>>,
    {
        let mut buckets = self.buckets.lock().unwrap();
        let selected = bucket(&mut buckets);
        let count = limit.min(selected.len());
        let taken = selected.drain(..count).map(|slot| slot.task).collect();
        self.update_metrics(&buckets);
        taken
    }

    fn update_metrics(&self, buckets: &Buckets<T>) {
        self.metrics.pending.set(buckets.pending.len() as i64);
        self.metrics.succeeded.set(buckets.succeeded.len() as i64);
        self.metrics.failed.set(buckets.failed.len() as i64);
        self.metrics.timed_out.set(buckets.timed_out.len() as i64);
    }
}
