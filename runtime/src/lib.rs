//! Drive non-blocking tasks to completion from dedicated worker threads.
//!
//! A [Queue] holds any number of [Task]s, each of which advances by exactly one
//! non-blocking [Task::step] per drain cycle. A [WorkerThread] owns the thread that
//! repeatedly drains a [Queue], so a single thread can multiplex many in-flight
//! network exchanges without dedicating a thread to each one.
//!
//! Tasks are typically built on a [StateMachine], which restricts a task to the
//! transitions declared when it was constructed, and use a [Deadline] to bound how
//! long they may remain in any non-terminal state. All time is read from a [Clock]
//! so timeout logic can be exercised with [mocks::Clock] instead of real sleeps.
//!
//! # Status
//!
//! `lanes-runtime` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use std::{any::Any, time::Instant};

mod deadline;
pub use deadline::Deadline;
mod in_flight;
pub use in_flight::{Guard, InFlight};
pub mod mocks;
pub mod queue;
pub use queue::{Id, Outcome, Queue, Task};
pub mod state_machine;
pub use state_machine::{Evaluate, StateMachine};
mod worker;
pub use worker::WorkerThread;

/// Source of monotonic time.
///
/// It is necessary to mock time to exercise timeouts without sleeping.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Returns the current time.
    fn current(&self) -> Instant;
}

/// [Clock] backed by the operating system's monotonic clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current(&self) -> Instant {
        Instant::now()
    }
}

/// Extract a printable message from the payload of a caught panic.
pub(crate) fn extract_panic_message(err: &(dyn Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("{err:?}")
    }
}
