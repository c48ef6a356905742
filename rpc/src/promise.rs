//! One-time resolution of a remote call.
//!
//! A call is represented by a [Resolver] (held by whoever completes the call) and any
//! number of [Promise] clones (held by whoever waits for it). The first resolution
//! wins; later attempts are ignored. Dropping a [Resolver] without resolving fails
//! its promises so waiters are never stranded.
//!
//! # Example
//!
//! ```rust
//! use bytes::Bytes;
//! use lanes_rpc::{promise, AsyncResult, State};
//!
//! let (resolver, promise) = promise::channel(1, "current_hash");
//! let result = AsyncResult::<u32>::new(promise.clone());
//! assert_eq!(result.state(), State::Waiting);
//!
//! resolver.resolve(Bytes::from_static(&[0, 0, 0, 7]));
//! assert!(promise.wait());
//! assert_eq!(result.get(), Ok(7));
//! ```

use crate::{codec::Decode, Error};
use bytes::Bytes;
use std::{
    marker::PhantomData,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};
use tracing::trace;

/// Lifecycle of a [Promise].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// No resolution has been recorded yet.
    Waiting,
    /// A response payload has been recorded.
    Succeeded,
    /// The call failed.
    Failed,
    /// The call was abandoned after its deadline.
    TimedOut,
}

#[derive(Clone)]
enum Resolution {
    Value(Bytes),
    Failed(String),
    TimedOut,
}

impl Resolution {
    fn state(&self) -> State {
        match self {
            Self::Value(_) => State::Succeeded,
            Self::Failed(_) => State::Failed,
            Self::TimedOut => State::TimedOut,
        }
    }
}

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Slot {
    resolution: Option<Resolution>,
    on_success: Vec<Callback>,
    on_failure: Vec<Callback>,
}

struct Shared {
    id: u64,
    name: String,
    slot: Mutex<Slot>,
    resolved: Condvar,
}

/// Create a linked [Resolver] and [Promise] for the call `name` with identifier `id`.
pub fn channel(id: u64, name: &str) -> (Resolver, Promise) {
    let shared = Arc::new(Shared {
        id,
        name: name.to_string(),
        slot: Mutex::new(Slot::default()),
        resolved: Condvar::new(),
    });
    (
        Resolver {
            shared: shared.clone(),
        },
        Promise { shared },
    )
}

/// Completes a call exactly once.
pub struct Resolver {
    shared: Arc<Shared>,
}

impl Resolver {
    /// Record a response payload.
    pub fn resolve(&self, value: Bytes) -> bool {
        self.finish(Resolution::Value(value))
    }

    /// Record a failure.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.finish(Resolution::Failed(reason.into()))
    }

    /// Record that the call was abandoned after its deadline.
    pub fn time_out(&self) -> bool {
        self.finish(Resolution::TimedOut)
    }

    /// Returns `true` if this resolution was the first.
    fn finish(&self, resolution: Resolution) -> bool {
        let callbacks = {
            let mut slot = self.shared.slot.lock().unwrap();
            if slot.resolution.is_some() {
                return false;
            }
            let on_success = std::mem::take(&mut slot.on_success);
            let on_failure = std::mem::take(&mut slot.on_failure);
            let callbacks = match resolution {
                Resolution::Value(_) => on_success,
                _ => on_failure,
            };
            trace!(
                id = self.shared.id,
                name = %self.shared.name,
                state = ?resolution.state(),
                "promise resolved"
            );
            slot.resolution = Some(resolution);
            self.shared.resolved.notify_all();
            callbacks
        };

        // Run continuations without holding the lock so they may inspect the promise
        for callback in callbacks {
            callback();
        }
        true
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.fail("resolver dropped");
    }
}

/// Observes the resolution of a call.
#[derive(Clone)]
pub struct Promise {
    shared: Arc<Shared>,
}

impl Promise {
    /// Identifier assigned by whoever issued the call.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Name of the call.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current state (never blocks).
    pub fn state(&self) -> State {
        self.shared
            .slot
            .lock()
            .unwrap()
            .resolution
            .as_ref()
            .map_or(State::Waiting, Resolution::state)
    }

    /// Block until resolved. Returns `true` if the call succeeded.
    pub fn wait(&self) -> bool {
        let mut slot = self.shared.slot.lock().unwrap();
        while slot.resolution.is_none() {
            slot = self.shared.resolved.wait(slot).unwrap();
        }
        matches!(slot.resolution, Some(Resolution::Value(_)))
    }

    /// Block until resolved or `timeout` elapses, returning the state at that point.
    ///
    /// Returning [State::Waiting] does not resolve the promise.
    pub fn wait_for(&self, timeout: Duration) -> State {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.shared.slot.lock().unwrap();
        loop {
            if let Some(resolution) = &slot.resolution {
                return resolution.state();
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                return State::Waiting;
            }
            slot = self.shared.resolved.wait_timeout(slot, remaining).unwrap().0;
        }
    }

    /// The response payload, if the call succeeded.
    pub fn value(&self) -> Option<Bytes> {
        match &self.shared.slot.lock().unwrap().resolution {
            Some(Resolution::Value(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// The error the call resolved to, if it did not succeed.
    pub fn error(&self) -> Option<Error> {
        match &self.shared.slot.lock().unwrap().resolution {
            Some(Resolution::Failed(reason)) => Some(Error::Failed(reason.clone())),
            Some(Resolution::TimedOut) => Some(Error::TimedOut),
            _ => None,
        }
    }

    /// Run `callback` once the call succeeds (immediately if it already has).
    pub fn on_success(&self, callback: impl FnOnce() + Send + 'static) {
        let mut slot = self.shared.slot.lock().unwrap();
        match &slot.resolution {
            None => slot.on_success.push(Box::new(callback)),
            Some(Resolution::Value(_)) => {
                drop(slot);
                callback();
            }
            Some(_) => {}
        }
    }

    /// Run `callback` once the call fails or times out (immediately if it already has).
    pub fn on_failure(&self, callback: impl FnOnce() + Send + 'static) {
        let mut slot = self.shared.slot.lock().unwrap();
        match &slot.resolution {
            None => slot.on_failure.push(Box::new(callback)),
            Some(Resolution::Value(_)) => {}
            Some(_) => {
                drop(slot);
                callback();
            }
        }
    }

    fn resolution(&self) -> Option<Resolution> {
        self.shared.slot.lock().unwrap().resolution.clone()
    }
}

/// A [Promise] whose payload decodes to `T`.
pub struct AsyncResult<T> {
    promise: Promise,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T: Decode> AsyncResult<T> {
    pub fn new(promise: Promise) -> Self {
        Self {
            promise,
            _phantom: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.promise.id()
    }

    pub fn name(&self) -> &str {
        self.promise.name()
    }

    /// The underlying [Promise].
    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    /// Current state (never blocks).
    pub fn state(&self) -> State {
        self.promise.state()
    }

    /// Block until resolved. Returns `true` if the call succeeded.
    pub fn wait(&self) -> bool {
        self.promise.wait()
    }

    /// Block until resolved or `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration) -> State {
        self.promise.wait_for(timeout)
    }

    /// The decoded value, if the call has succeeded (never blocks).
    ///
    /// A payload that fails to decode yields `None`.
    pub fn result(&self) -> Option<T> {
        self.promise.value().and_then(|value| T::decode(value).ok())
    }

    /// Block until resolved and return the decoded value (or why there is none).
    pub fn get(&self) -> Result<T, Error> {
        self.promise.wait();
        self.extract()
    }

    /// Like [AsyncResult::get] but gives up after `timeout`.
    ///
    /// Giving up does not resolve the underlying promise.
    pub fn get_within(&self, timeout: Duration) -> Result<T, Error> {
        if self.promise.wait_for(timeout) == State::Waiting {
            return Err(Error::TimedOut);
        }
        self.extract()
    }

    fn extract(&self) -> Result<T, Error> {
        match self.promise.resolution() {
            Some(Resolution::Value(value)) => T::decode(value),
            Some(Resolution::Failed(reason)) => Err(Error::Failed(reason)),
            Some(Resolution::TimedOut) => Err(Error::TimedOut),
            None => Err(Error::TimedOut),
        }
    }
}
