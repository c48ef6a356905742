//! Keep every shard of a sharded ledger store in step.
//!
//! # Discovery
//!
//! [ShardedStorageClient::connect] submits one [ShardConnectWorker] per shard URI to a
//! [Queue] driven by a dedicated [WorkerThread] (started on first use), then blocks
//! until every worker has finished or the timeout elapses. Each shard reports its own
//! index, so the routing table is keyed by what the shard says rather than by how the
//! caller labelled its URI (an index already routed to another address keeps its first
//! route and fails the call). Shards that fail or time out are simply not routed: the
//! returned count tells the caller whether the deployment is complete
//! ([ShardedStorageClient::connect_all] turns an incomplete one into an error).
//!
//! # Commit and revert
//!
//! Every multi-shard operation issues all of its calls before waiting on any of them,
//! and no lock is held while waiting.
//!
//! A commit asks every shard to commit and records the digests they return as a
//! [CommitTree]. A revert to a previously recorded root proceeds in two phases:
//!
//! 1. _Due diligence_: every shard is asked whether it still has its own recorded
//!    digest. If any does not (or cannot answer), the revert is abandoned before any
//!    shard is changed.
//! 2. _Apply_: every shard is asked to revert to its recorded digest. A shard that
//!    fails here leaves the deployment inconsistent (shards that already reverted are
//!    not rolled forward), so the failure is returned as [Error::RevertFailed].
//!
//! Reverting to [GENESIS] skips due diligence (every shard can always return to its
//! initial state) and resets the recorded history.
//!
//! # Routing
//!
//! Documents and transactions live on the shard whose index equals their
//! [ResourceId::lane].

use crate::{
    commit::{CommitTree, History, GENESIS},
    connect::{Identity, ShardConnectWorker},
    Error, ResourceId,
};
use bytes::Bytes;
use lanes_rpc::{
    codec::{Decode, Encode},
    protocol::{state, tx_store},
    Address, AsyncResult, Client, Document, Opcode, Service, Transport, Uri,
};
use lanes_runtime::{Clock, Deadline, InFlight, Queue, SystemClock, WorkerThread};
use lanes_utils::Digest;
use prometheus_client::registry::Registry;
use std::{
    collections::BTreeMap,
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, error, info, warn};

mod config;
pub use config::Config;
mod metrics;

/// The most recent commit and everything committed before it.
#[derive(Default)]
struct Commits {
    current: Option<CommitTree>,
    history: History,
}

/// Routes requests to, commits, and reverts a deployment of storage shards.
pub struct ShardedStorageClient<T: Transport, C: Clock = SystemClock> {
    cfg: Config,
    client: Client<T>,
    clock: C,

    /// Address of each shard, by the index the shard reported.
    routing: Mutex<BTreeMap<u32, Address>>,
    commits: Mutex<Commits>,
    discovery: Mutex<Option<WorkerThread<ShardConnectWorker<T, C>>>>,

    metrics: metrics::Metrics,
}

impl<T: Transport, C: Clock> ShardedStorageClient<T, C> {
    /// Create a client that reaches shards over `transport`.
    pub fn new(cfg: Config, transport: Arc<T>, clock: C) -> Result<Self, Error> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            client: Client::new(transport),
            clock,
            routing: Mutex::new(BTreeMap::new()),
            commits: Mutex::new(Commits::default()),
            discovery: Mutex::new(None),
            metrics: metrics::Metrics::default(),
        })
    }

    /// Register metrics with the given registry.
    pub fn register(&self, registry: &mut Registry) {
        self.metrics.register(registry);
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The discovery queue, spawning the thread that drives it if it is not running.
    fn discovery_queue(&self) -> Result<Arc<Queue<ShardConnectWorker<T, C>>>, Error> {
        let mut discovery = self.discovery.lock().unwrap();
        if let Some(worker) = discovery.as_ref() {
            return Ok(worker.queue().clone());
        }
        let queue = Arc::new(Queue::new("discovery"));
        let worker = {
            let queue = queue.clone();
            WorkerThread::spawn(
                queue.clone(),
                "discovery",
                self.cfg.poll_interval,
                move || {
                    queue.drain();
                    Ok::<_, Infallible>(())
                },
            )?
        };
        *discovery = Some(worker);
        Ok(queue)
    }

    /// Connect to the shards at `uris` and route each one that reports its identity
    /// within `timeout`.
    ///
    /// Returns the number of shards routed (including any routed by earlier calls).
    pub fn connect(&self, uris: &BTreeMap<u32, Uri>, timeout: Duration) -> Result<usize, Error> {
        let queue = self.discovery_queue()?;
        let in_flight = InFlight::new();
        for (slot, uri) in uris {
            debug!(slot, %uri, "connecting to shard");
            queue.submit(ShardConnectWorker::shard(
                self.client.clone(),
                self.clock.clone(),
                uri.clone(),
                timeout,
                in_flight.track(),
            ));
        }
        let deadline = Deadline::new(self.clock.clone(), timeout);
        if !in_flight.wait(&deadline) {
            warn!(outstanding = in_flight.count(), "discovery timed out");
        }
        self.harvest(&queue)
    }

    /// Connect to the shards at `uris` within [Config::connect_timeout], failing unless
    /// every configured shard is routed.
    pub fn connect_all(&self, uris: &BTreeMap<u32, Uri>) -> Result<(), Error> {
        let routed = self.connect(uris, self.cfg.connect_timeout)?;
        if routed != self.cfg.shards {
            return Err(Error::IncompleteDiscovery {
                expected: self.cfg.shards,
                routed,
            });
        }
        Ok(())
    }

    /// Route every finished discovery worker and discard the rest.
    fn harvest(&self, queue: &Queue<ShardConnectWorker<T, C>>) -> Result<usize, Error> {
        let failures = queue.discard_failed() + queue.discard_timed_out();
        if failures > 0 {
            warn!(failures, "shards failed discovery");
            self.metrics.discovery_failures.inc_by(failures as u64);
        }

        // Every shard must agree with the configured deployment size
        let expected = self.cfg.shards as u32;
        let mut inconsistency = None;
        let mut routing = self.routing.lock().unwrap();
        loop {
            let workers = queue.take_succeeded(self.cfg.harvest_limit);
            if workers.is_empty() {
                break;
            }
            for worker in workers {
                let uri = worker.uri().clone();
                let Some((address, Identity { index, count })) = worker.into_parts() else {
                    continue;
                };
                if count != expected || index >= count {
                    error!(%uri, index, count, expected, "shard reported inconsistent identity");
                    inconsistency.get_or_insert(Error::ShardCountMismatch {
                        expected,
                        reported: count,
                    });
                    continue;
                }
                let conflict = routing.get(&index).copied().filter(|existing| *existing != address);
                if let Some(existing) = conflict {
                    error!(
                        %uri,
                        shard = index,
                        %existing,
                        %address,
                        "shard index reported by two addresses"
                    );
                    inconsistency.get_or_insert(Error::DuplicateShard { shard: index });
                    continue;
                }
                debug!(shard = index, %address, %uri, "routed shard");
                routing.insert(index, address);
            }
        }
        let routed = routing.len();
        drop(routing);

        self.metrics.routed_shards.set(routed as i64);
        if let Some(err) = inconsistency {
            return Err(err);
        }
        info!(routed, shards = self.cfg.shards, "discovery complete");
        Ok(routed)
    }

    /// Number of shards with a known address.
    pub fn shard_count(&self) -> usize {
        self.routing.lock().unwrap().len()
    }

    /// The address of each routed shard, by shard index.
    pub fn routes(&self) -> BTreeMap<u32, Address> {
        self.routing.lock().unwrap().clone()
    }

    /// The address of every shard, ordered by index.
    fn addresses(&self) -> Result<Vec<Address>, Error> {
        let routing = self.routing.lock().unwrap();
        (0..self.cfg.shards as u32)
            .map(|shard| {
                routing
                    .get(&shard)
                    .copied()
                    .ok_or(Error::UnroutedShard(shard))
            })
            .collect()
    }

    /// The address of the shard storing `lane`.
    fn address(&self, lane: u32) -> Result<Address, Error> {
        self.routing
            .lock()
            .unwrap()
            .get(&lane)
            .copied()
            .ok_or(Error::UnroutedShard(lane))
    }

    /// Issue every call before waiting on any of them.
    fn scatter<A: Encode, R: Decode>(
        &self,
        service: Service,
        opcode: Opcode,
        calls: impl IntoIterator<Item = (Address, A)>,
    ) -> Vec<AsyncResult<R>> {
        calls
            .into_iter()
            .map(|(address, args)| self.client.call(&address, service, opcode, &args))
            .collect()
    }

    /// Wait on each call in turn.
    fn gather<R: Decode>(&self, results: Vec<AsyncResult<R>>) -> Result<Vec<R>, Error> {
        results
            .iter()
            .map(|result| result.get_within(self.cfg.call_timeout).map_err(Error::from))
            .collect()
    }

    /// Make a single call to the shard storing `id`.
    fn call<A: Encode, R: Decode>(
        &self,
        id: &ResourceId,
        service: Service,
        opcode: Opcode,
        args: &A,
    ) -> Result<R, Error> {
        let address = self.address(id.lane(self.cfg.log2_lanes))?;
        let result: AsyncResult<R> = self.client.call(&address, service, opcode, args);
        Ok(result.get_within(self.cfg.call_timeout)?)
    }

    /// The root of every shard's current (uncommitted) digest.
    pub fn current_hash(&self) -> Result<Digest, Error> {
        let addresses = self.addresses()?;
        let results = self.scatter(
            Service::State,
            state::CURRENT_HASH,
            addresses.into_iter().map(|address| (address, ())),
        );
        Ok(CommitTree::new(self.gather(results)?).root())
    }

    /// The root of the most recent commit (or revert), or [GENESIS] if there is none.
    pub fn last_commit_digest(&self) -> Digest {
        self.commits
            .lock()
            .unwrap()
            .current
            .as_ref()
            .map_or(GENESIS, CommitTree::root)
    }

    /// Commit every shard and return the root of their committed digests.
    pub fn commit(&self) -> Result<Digest, Error> {
        let addresses = self.addresses()?;
        let results = self.scatter(
            Service::State,
            state::COMMIT,
            addresses.into_iter().map(|address| (address, ())),
        );
        let tree = CommitTree::new(self.gather(results)?);
        let root = tree.root();

        let mut commits = self.commits.lock().unwrap();
        let recorded = commits.history.push(tree.clone());
        commits.current = Some(tree);
        drop(commits);

        self.metrics.commits.inc();
        info!(%root, recorded, "committed");
        Ok(root)
    }

    /// Revert every shard to the digests recorded for `target`.
    ///
    /// Returns `Ok(false)` without changing any shard if `target` was never recorded or
    /// if some shard no longer has its recorded digest. Returns [Error::RevertFailed] if a
    /// shard fails to revert after confirming that it could.
    pub fn revert_to_hash(&self, target: &Digest) -> Result<bool, Error> {
        let candidate = if *target == GENESIS {
            CommitTree::genesis(self.cfg.shards)
        } else {
            let commits = self.commits.lock().unwrap();
            let found = commits
                .history
                .find(target)
                .and_then(|index| commits.history.get(index))
                .cloned();
            drop(commits);
            let Some(tree) = found else {
                debug!(%target, "revert target not recorded");
                self.metrics.reverts_rejected.inc();
                return Ok(false);
            };
            tree
        };
        let addresses = self.addresses()?;

        // Confirm every shard can revert before asking any shard to do so
        if !candidate.is_genesis() {
            let results: Vec<AsyncResult<bool>> = self.scatter(
                Service::State,
                state::HASH_EXISTS,
                addresses.iter().copied().zip(candidate.leaves().iter().copied()),
            );
            let exists = self.gather(results)?;
            if let Some(shard) = exists.iter().position(|exists| !exists) {
                warn!(%target, shard, "shard no longer has recorded digest");
                self.metrics.reverts_rejected.inc();
                return Ok(false);
            }
        }

        let results: Vec<AsyncResult<bool>> = self.scatter(
            Service::State,
            state::REVERT_TO_HASH,
            addresses.iter().copied().zip(candidate.leaves().iter().copied()),
        );
        for (shard, result) in results.iter().enumerate() {
            let shard = shard as u32;
            match result.get_within(self.cfg.call_timeout) {
                Ok(true) => {}
                Ok(false) => {
                    error!(%target, shard, "shard refused revert after due diligence");
                    return Err(Error::RevertFailed { shard });
                }
                Err(err) => {
                    error!(%target, shard, ?err, "shard failed revert after due diligence");
                    return Err(Error::RevertFailed { shard });
                }
            }
        }

        let mut commits = self.commits.lock().unwrap();
        if candidate.is_genesis() {
            commits.history.reset(candidate.clone());
        } else if let Some(index) = commits.history.find(target) {
            commits.history.truncate_after(index);
        } else {
            commits.history.push(candidate.clone());
        }
        commits.current = Some(candidate);
        drop(commits);

        self.metrics.reverts.inc();
        info!(%target, "reverted");
        Ok(true)
    }

    /// Returns `true` if `target` is a recorded commit root.
    pub fn hash_exists(&self, target: &Digest) -> bool {
        self.commits.lock().unwrap().history.contains(target)
    }

    /// Number of recorded commit roots.
    pub fn history_len(&self) -> usize {
        self.commits.lock().unwrap().history.len()
    }

    /// The document stored under `id`, if any.
    pub fn get(&self, id: &ResourceId) -> Result<Option<Document>, Error> {
        self.call(id, Service::State, state::GET, id.digest())
    }

    /// The document stored under `id`, creating an empty one if there is none.
    pub fn get_or_create(&self, id: &ResourceId) -> Result<Document, Error> {
        self.call(id, Service::State, state::GET_OR_CREATE, id.digest())
    }

    /// Store `value` under `id`.
    pub fn set(&self, id: &ResourceId, value: Bytes) -> Result<bool, Error> {
        self.call(id, Service::State, state::SET, &(*id.digest(), value))
    }

    /// Lock the document stored under `id`. Returns `false` if it was already locked.
    pub fn lock(&self, id: &ResourceId) -> Result<bool, Error> {
        self.call(id, Service::State, state::LOCK, id.digest())
    }

    /// Unlock the document stored under `id`. Returns `false` if it was not locked.
    pub fn unlock(&self, id: &ResourceId) -> Result<bool, Error> {
        self.call(id, Service::State, state::UNLOCK, id.digest())
    }

    /// Store the transaction `tx` identified by `digest`.
    pub fn add_transaction(&self, digest: Digest, tx: Bytes) -> Result<bool, Error> {
        self.call(
            &ResourceId::from(digest),
            Service::TxStore,
            tx_store::SET,
            &(digest, tx),
        )
    }

    /// Store a batch of transactions, sending one request to each lane that stores any
    /// of them.
    ///
    /// Returns `true` if every lane stored its share.
    pub fn add_transactions(&self, batch: Vec<(Digest, Bytes)>) -> Result<bool, Error> {
        let mut lanes: BTreeMap<u32, Vec<(Digest, Bytes)>> = BTreeMap::new();
        for (digest, tx) in batch {
            let lane = ResourceId::from(digest).lane(self.cfg.log2_lanes);
            lanes.entry(lane).or_default().push((digest, tx));
        }
        let calls = lanes
            .into_iter()
            .map(|(lane, txs)| Ok((self.address(lane)?, txs)))
            .collect::<Result<Vec<_>, Error>>()?;
        let results: Vec<AsyncResult<bool>> =
            self.scatter(Service::TxStore, tx_store::SET_BULK, calls);
        Ok(self.gather(results)?.into_iter().all(|stored| stored))
    }

    /// The transaction identified by `digest`, if stored.
    pub fn get_transaction(&self, digest: &Digest) -> Result<Option<Bytes>, Error> {
        self.call(
            &ResourceId::from(*digest),
            Service::TxStore,
            tx_store::GET,
            digest,
        )
    }

    /// Returns `true` if the transaction identified by `digest` is stored.
    pub fn has_transaction(&self, digest: &Digest) -> Result<bool, Error> {
        self.call(
            &ResourceId::from(*digest),
            Service::TxStore,
            tx_store::HAS,
            digest,
        )
    }
}

#[cfg(test)]
mod tests;
