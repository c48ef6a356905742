//! Connect to a peer and query it without blocking.
//!
//! A [ConnectWorker] is a [Task] that adds a peer to the [Transport], waits for its
//! address to resolve, issues a set of [Queries] once it does, and waits for their
//! answers, all bounded by a single [Deadline]. Each [Task::step] does one
//! non-blocking unit of that work, so one worker thread can connect to many peers at
//! once.
//!
//! [ShardConnectWorker] asks a storage shard for its index and for how many shards
//! the deployment has.

use lanes_rpc::{
    protocol::identity, Address, AsyncResult, Client, Error, Service, State, Transport, Uri,
};
use lanes_runtime::{
    state_machine, Clock, Deadline, Evaluate, Guard, Outcome, StateMachine, Task,
};
use std::{
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    time::Duration,
};
use tracing::{debug, warn};

/// Progress of a [ConnectWorker].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Initial,
    /// Waiting for the peer's address to resolve.
    Connecting,
    /// Waiting for query answers.
    Querying,
    Succeeded,
    TimedOut,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::TimedOut | Self::Failed)
    }
}

/// The calls a [ConnectWorker] makes once its peer is connected.
pub trait Queries<T: Transport>: Send + 'static {
    /// What the answers combine into.
    type Output: Send + 'static;

    /// Issue every call to `address`.
    fn issue(&mut self, client: &Client<T>, address: &Address);

    /// State of each issued call.
    fn states(&self) -> Vec<State>;

    /// Combine the answers. Only called once every call has succeeded.
    fn collect(&self) -> Result<Self::Output, Error>;
}

/// Where a shard sits in the deployment, as reported by the shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub index: u32,
    pub count: u32,
}

/// Asks a shard for its [Identity].
#[derive(Default)]
pub struct ShardIdentity {
    index: Option<AsyncResult<u32>>,
    count: Option<AsyncResult<u32>>,
}

impl<T: Transport> Queries<T> for ShardIdentity {
    type Output = Identity;

    fn issue(&mut self, client: &Client<T>, address: &Address) {
        self.index = Some(client.call(address, Service::Identity, identity::GET_SHARD_INDEX, &()));
        self.count = Some(client.call(address, Service::Identity, identity::GET_SHARD_COUNT, &()));
    }

    fn states(&self) -> Vec<State> {
        [&self.index, &self.count]
            .into_iter()
            .map(|result| result.as_ref().map_or(State::Waiting, AsyncResult::state))
            .collect()
    }

    fn collect(&self) -> Result<Identity, Error> {
        let answer = |result: &Option<AsyncResult<u32>>| {
            result
                .as_ref()
                .ok_or_else(|| Error::Failed("query not issued".to_string()))?
                .get()
        };
        Ok(Identity {
            index: answer(&self.index)?,
            count: answer(&self.count)?,
        })
    }
}

/// Connects to a storage shard and reports its [Identity].
pub type ShardConnectWorker<T, C> = ConnectWorker<T, C, ShardIdentity>;

/// Everything a [ConnectWorker] evaluates between steps.
struct Progress<T: Transport, C: Clock, Q: Queries<T>> {
    client: Client<T>,
    uri: Uri,
    timeout: Duration,
    deadline: Deadline<C>,
    address: Option<Address>,
    queries: Q,
    output: Option<Q::Output>,
}

impl<T: Transport, C: Clock, Q: Queries<T>> Evaluate for Progress<T, C, Q> {
    type State = Phase;

    fn evaluate(&mut self, current: Phase) -> Option<Phase> {
        if current.is_terminal() {
            return None;
        }
        if self.deadline.is_due() {
            return Some(Phase::TimedOut);
        }
        match current {
            Phase::Initial => {
                self.deadline.rearm(self.timeout);
                self.client.transport().add_peer(&self.uri);
                Some(Phase::Connecting)
            }
            Phase::Connecting => {
                let address = self.client.transport().resolve_direct_address(&self.uri)?;
                debug!(uri = %self.uri, %address, "peer connected");
                self.queries.issue(&self.client, &address);
                self.address = Some(address);
                Some(Phase::Querying)
            }
            Phase::Querying => {
                let states = self.queries.states();
                if states
                    .iter()
                    .any(|state| matches!(state, State::Failed | State::TimedOut))
                {
                    warn!(uri = %self.uri, ?states, "query failed");
                    return Some(Phase::Failed);
                }
                if states.contains(&State::Waiting) {
                    return None;
                }
                match self.queries.collect() {
                    Ok(output) => {
                        self.output = Some(output);
                        Some(Phase::Succeeded)
                    }
                    Err(err) => {
                        warn!(uri = %self.uri, ?err, "unusable query answer");
                        Some(Phase::Failed)
                    }
                }
            }
            Phase::Succeeded | Phase::TimedOut | Phase::Failed => None,
        }
    }
}

/// Connects to a peer and runs [Queries] against it, one non-blocking step at a time.
///
/// Holds a [Guard] until it reaches a terminal [Phase], so a caller can wait on the
/// matching `InFlight` for every worker of a batch to finish.
pub struct ConnectWorker<T: Transport, C: Clock, Q: Queries<T>> {
    machine: StateMachine<Progress<T, C, Q>>,
    guard: Option<Guard>,
}

impl<T: Transport, C: Clock, Q: Queries<T>> ConnectWorker<T, C, Q> {
    /// Create a worker that gives up on `uri` once `timeout` has elapsed.
    pub fn new(
        client: Client<T>,
        clock: C,
        uri: Uri,
        timeout: Duration,
        queries: Q,
        guard: Guard,
    ) -> Self {
        let progress = Progress {
            client,
            uri,
            timeout,
            deadline: Deadline::new(clock, timeout),
            address: None,
            queries,
            output: None,
        };
        let mut machine = StateMachine::new(progress, Phase::Initial)
            .allow(Phase::Initial, Phase::Connecting)
            .allow(Phase::Connecting, Phase::Querying)
            .allow(Phase::Querying, Phase::Succeeded);
        for from in [Phase::Initial, Phase::Connecting, Phase::Querying] {
            machine = machine
                .allow(from, Phase::TimedOut)
                .allow(from, Phase::Failed);
        }
        Self {
            machine,
            guard: Some(guard),
        }
    }

    pub fn phase(&self) -> Phase {
        self.machine.state()
    }

    pub fn uri(&self) -> &Uri {
        &self.machine.evaluator().uri
    }

    /// The peer's address, once connected.
    pub fn address(&self) -> Option<Address> {
        self.machine.evaluator().address
    }

    /// The combined query answers, once succeeded.
    pub fn output(&self) -> Option<&Q::Output> {
        self.machine.evaluator().output.as_ref()
    }

    /// Consume a succeeded worker, returning the peer's address and query answers.
    pub fn into_parts(self) -> Option<(Address, Q::Output)> {
        let progress = self.machine.into_inner();
        Some((progress.address?, progress.output?))
    }
}

impl<T: Transport, C: Clock> ConnectWorker<T, C, ShardIdentity> {
    /// Create a worker that asks the shard at `uri` for its [Identity].
    pub fn shard(client: Client<T>, clock: C, uri: Uri, timeout: Duration, guard: Guard) -> Self {
        Self::new(client, clock, uri, timeout, ShardIdentity::default(), guard)
    }
}

impl<T: Transport, C: Clock, Q: Queries<T>> Task for ConnectWorker<T, C, Q> {
    type Error = state_machine::Error<Phase>;

    fn step(&mut self) -> Result<Outcome, Self::Error> {
        let machine = &mut self.machine;
        let result = match catch_unwind(AssertUnwindSafe(|| machine.advance())) {
            Ok(result) => result,
            Err(panic) => {
                // The queue files a panicking task as failed, so it will never step again
                self.guard.take();
                resume_unwind(panic);
            }
        };
        let outcome = match self.machine.state() {
            Phase::Succeeded => Outcome::Succeeded,
            Phase::TimedOut => Outcome::TimedOut,
            Phase::Failed => Outcome::Failed,
            Phase::Initial | Phase::Connecting | Phase::Querying => Outcome::Pending,
        };
        if result.is_err() || outcome != Outcome::Pending {
            self.guard.take();
        }
        result?;
        Ok(outcome)
    }
}
