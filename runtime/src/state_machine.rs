//! Restrict a task to an explicit set of state transitions.
//!
//! A [StateMachine] pairs the current state of some [Evaluate] implementation with
//! the set of edges that state may move along. Each call to [StateMachine::advance]
//! asks the evaluator for (at most) one new state and applies it only if the edge
//! was allowed at construction.
//!
//! # Example
//!
//! ```rust
//! use lanes_runtime::{Evaluate, StateMachine};
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum Light {
//!     Off,
//!     On,
//! }
//!
//! struct Switch;
//!
//! impl Evaluate for Switch {
//!     type State = Light;
//!
//!     fn evaluate(&mut self, current: Light) -> Option<Light> {
//!         match current {
//!             Light::Off => Some(Light::On),
//!             Light::On => None,
//!         }
//!     }
//! }
//!
//! let mut machine = StateMachine::new(Switch, Light::Off).allow(Light::Off, Light::On);
//! assert_eq!(machine.advance().unwrap(), Light::On);
//! assert_eq!(machine.advance().unwrap(), Light::On);
//! ```

use std::{collections::HashSet, fmt::Debug, hash::Hash};
use thiserror::Error;
use tracing::error;

/// Errors that can occur when advancing a [StateMachine].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error<S: Debug> {
    /// The evaluator requested an edge that was never allowed.
    ///
    /// Correct evaluators never trigger this, so it signals a defect rather than
    /// a runtime condition to recover from.
    #[error("illegal transition: {from:?} -> {to:?}")]
    IllegalTransition { from: S, to: S },
}

/// Computes the next state of a [StateMachine].
pub trait Evaluate {
    /// The set of states the machine moves between.
    type State: Copy + Eq + Hash + Debug;

    /// Evaluate the machine in its `current` state.
    ///
    /// Returns the state to move to, or `None` if the state is unchanged.
    fn evaluate(&mut self, current: Self::State) -> Option<Self::State>;
}

/// A current state, a whitelist of transitions, and the [Evaluate] that drives them.
pub struct StateMachine<E: Evaluate> {
    evaluator: E,
    state: E::State,
    allowed: HashSet<(E::State, E::State)>,
}

impl<E: Evaluate> StateMachine<E> {
    /// Create a machine in the `initial` state with no allowed transitions.
    pub fn new(evaluator: E, initial: E::State) -> Self {
        Self {
            evaluator,
            state: initial,
            allowed: HashSet::new(),
        }
    }

    /// Allow the machine to move from `from` to `to`.
    pub fn allow(mut self, from: E::State, to: E::State) -> Self {
        self.allowed.insert((from, to));
        self
    }

    /// Returns `true` if the edge `from -> to` was allowed.
    pub fn is_allowed(&self, from: E::State, to: E::State) -> bool {
        self.allowed.contains(&(from, to))
    }

    /// Evaluate the machine once and apply the resulting transition (if any).
    ///
    /// Returns the state after evaluation. If the evaluator requests an edge that was
    /// not allowed, the state is left unchanged and [Error::IllegalTransition] is returned.
    pub fn advance(&mut self) -> Result<E::State, Error<E::State>> {
        let from = self.state;
        let Some(to) = self.evaluator.evaluate(from) else {
            return Ok(from);
        };
        if to == from {
            return Ok(from);
        }
        if !self.is_allowed(from, to) {
            error!(?from, ?to, "illegal transition requested");
            return Err(Error::IllegalTransition { from, to });
        }
        self.state = to;
        Ok(to)
    }

    /// Move to `state` without consulting the allowed transitions.
    pub fn force(&mut self, state: E::State) {
        self.state = state;
    }

    /// The current state.
    pub fn state(&self) -> E::State {
        self.state
    }

    /// The evaluator driving the machine.
    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Mutable access to the evaluator driving the machine.
    pub fn evaluator_mut(&mut self) -> &mut E {
        &mut self.evaluator
    }

    /// Consume the machine, returning its evaluator.
    pub fn into_inner(self) -> E {
        self.evaluator
    }
}
