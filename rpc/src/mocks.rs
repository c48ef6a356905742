//! A simulated [Transport] backed by in-memory storage shards.
//!
//! Each registered peer answers the calls listed in [crate::protocol] from local state.
//! Connection establishment is simulated with a per-peer delay measured against a
//! [Clock], so discovery timeouts can be driven without real sleeping. Faults (failed
//! calls, calls that are never answered, unreachable peers, shards that refuse to
//! revert) are injected per peer.

use crate::{
    codec::{Decode, Encode},
    promise::{self, Promise, Resolver},
    protocol::{identity, state, tx_store, Document},
    Address, Opcode, Service, Transport, Uri,
};
use bytes::Bytes;
use lanes_runtime::{Clock, SystemClock};
use lanes_utils::{sha256::hash, Digest};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};
use tracing::debug;

/// How a registered peer answers connection attempts.
#[derive(Clone, Copy, Debug)]
enum Reachability {
    /// Resolvable this long after [Transport::add_peer] is first called.
    After(Duration),
    /// Never resolvable.
    Never,
}

struct Peer {
    address: Address,
    reachability: Reachability,
    added: Option<Instant>,
}

/// Local state of one simulated shard.
struct Shard {
    index: u32,
    count: u32,
    current: Digest,
    committed: HashSet<Digest>,
    documents: HashMap<Digest, Bytes>,
    locks: HashSet<Digest>,
    transactions: HashMap<Digest, Bytes>,
    failing: HashSet<(Service, Opcode)>,
    held: HashSet<(Service, Opcode)>,
    refuse_revert: bool,
}

impl Shard {
    fn new(index: u32, count: u32) -> Self {
        Self {
            index,
            count,
            current: Digest::zero(),
            committed: HashSet::new(),
            documents: HashMap::new(),
            locks: HashSet::new(),
            transactions: HashMap::new(),
            failing: HashSet::new(),
            held: HashSet::new(),
            refuse_revert: false,
        }
    }

    fn knows(&self, digest: &Digest) -> bool {
        *digest == Digest::zero() || self.committed.contains(digest)
    }

    fn handle(
        &mut self,
        service: Service,
        opcode: Opcode,
        payload: Bytes,
    ) -> Result<Bytes, String> {
        let decode_err = |err: crate::Error| err.to_string();
        let response = match (service, opcode) {
            (Service::Identity, identity::GET_SHARD_INDEX) => self.index.encode(),
            (Service::Identity, identity::GET_SHARD_COUNT) => self.count.encode(),
            (Service::State, state::CURRENT_HASH) => self.current.encode(),
            (Service::State, state::COMMIT) => {
                self.committed.insert(self.current);
                self.current.encode()
            }
            (Service::State, state::HASH_EXISTS) => {
                let digest = Digest::decode(payload).map_err(decode_err)?;
                self.knows(&digest).encode()
            }
            (Service::State, state::REVERT_TO_HASH) => {
                let digest = Digest::decode(payload).map_err(decode_err)?;
                let reverted = !self.refuse_revert && self.knows(&digest);
                if reverted {
                    self.current = digest;
                }
                reverted.encode()
            }
            (Service::State, state::GET) => {
                let key = Digest::decode(payload).map_err(decode_err)?;
                self.documents
                    .get(&key)
                    .map(|value| Document {
                        value: value.clone(),
                        created: false,
                    })
                    .encode()
            }
            (Service::State, state::GET_OR_CREATE) => {
                let key = Digest::decode(payload).map_err(decode_err)?;
                let created = !self.documents.contains_key(&key);
                let value = self.documents.entry(key).or_default().clone();
                Document { value, created }.encode()
            }
            (Service::State, state::SET) => {
                let (key, value) = <(Digest, Bytes)>::decode(payload).map_err(decode_err)?;
                self.documents.insert(key, value);
                true.encode()
            }
            (Service::State, state::LOCK) => {
                let key = Digest::decode(payload).map_err(decode_err)?;
                self.locks.insert(key).encode()
            }
            (Service::State, state::UNLOCK) => {
                let key = Digest::decode(payload).map_err(decode_err)?;
                self.locks.remove(&key).encode()
            }
            (Service::TxStore, tx_store::SET) => {
                let (digest, tx) = <(Digest, Bytes)>::decode(payload).map_err(decode_err)?;
                self.transactions.insert(digest, tx);
                true.encode()
            }
            (Service::TxStore, tx_store::SET_BULK) => {
                let batch = Vec::<(Digest, Bytes)>::decode(payload).map_err(decode_err)?;
                self.transactions.extend(batch);
                true.encode()
            }
            (Service::TxStore, tx_store::GET) => {
                let digest = Digest::decode(payload).map_err(decode_err)?;
                self.transactions.get(&digest).cloned().encode()
            }
            (Service::TxStore, tx_store::HAS) => {
                let digest = Digest::decode(payload).map_err(decode_err)?;
                self.transactions.contains_key(&digest).encode()
            }
            (service, opcode) => return Err(format!("unknown operation {service:?}/{opcode}")),
        };
        Ok(response)
    }
}

#[derive(Default)]
struct Inner {
    peers: HashMap<Uri, Peer>,
    shards: HashMap<Address, Shard>,
    calls: HashMap<(Address, Service, Opcode), usize>,
    held: Vec<Resolver>,
}

/// A simulated network of storage shards.
pub struct Network<C: Clock = SystemClock> {
    clock: C,
    next_id: AtomicU64,
    inner: Mutex<Inner>,
}

impl Default for Network<SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl<C: Clock> Network<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            next_id: AtomicU64::new(0),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register a shard reachable at `uri` that reports `index` of `count` shards.
    ///
    /// The shard is resolvable as soon as it is added as a peer. Returns its address.
    pub fn register(&self, uri: &Uri, index: u32, count: u32) -> Address {
        let digest = hash(uri.to_string().as_bytes());
        let address = Address::from(<[u8; 32]>::from(digest));
        let mut inner = self.inner.lock().unwrap();
        inner.peers.insert(
            uri.clone(),
            Peer {
                address,
                reachability: Reachability::After(Duration::ZERO),
                added: None,
            },
        );
        inner.shards.insert(address, Shard::new(index, count));
        address
    }

    /// Delay resolution of `uri` by `delay` after it is added as a peer.
    pub fn delay(&self, uri: &Uri, delay: Duration) {
        self.update_peer(uri, Reachability::After(delay));
    }

    /// Make `uri` permanently unresolvable.
    pub fn disconnect(&self, uri: &Uri) {
        self.update_peer(uri, Reachability::Never);
    }

    fn update_peer(&self, uri: &Uri, reachability: Reachability) {
        if let Some(peer) = self.inner.lock().unwrap().peers.get_mut(uri) {
            peer.reachability = reachability;
        }
    }

    /// Set the working digest of the shard at `address`.
    pub fn set_current(&self, address: &Address, digest: Digest) {
        self.with_shard(address, |shard| shard.current = digest);
    }

    /// The working digest of the shard at `address`.
    pub fn current(&self, address: &Address) -> Option<Digest> {
        self.with_shard(address, |shard| shard.current)
    }

    /// Make the shard at `address` forget that it committed `digest`.
    pub fn forget(&self, address: &Address, digest: &Digest) {
        self.with_shard(address, |shard| {
            shard.committed.remove(digest);
        });
    }

    /// Make the shard at `address` answer every revert with `false`.
    pub fn refuse_revert(&self, address: &Address) {
        self.with_shard(address, |shard| shard.refuse_revert = true);
    }

    /// Fail every call of `opcode` on `service` sent to `address`.
    pub fn fail(&self, address: &Address, service: Service, opcode: Opcode) {
        self.with_shard(address, |shard| {
            shard.failing.insert((service, opcode));
        });
    }

    /// Never answer calls of `opcode` on `service` sent to `address`.
    pub fn hold(&self, address: &Address, service: Service, opcode: Opcode) {
        self.with_shard(address, |shard| {
            shard.held.insert((service, opcode));
        });
    }

    /// The document stored under `key` on the shard at `address`.
    pub fn document(&self, address: &Address, key: &Digest) -> Option<Bytes> {
        self.with_shard(address, |shard| shard.documents.get(key).cloned()).flatten()
    }

    /// The transaction stored under `digest` on the shard at `address`.
    pub fn transaction(&self, address: &Address, digest: &Digest) -> Option<Bytes> {
        self.with_shard(address, |shard| shard.transactions.get(digest).cloned()).flatten()
    }

    /// Number of calls of `opcode` on `service` sent to any shard.
    pub fn calls(&self, service: Service, opcode: Opcode) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|((_, s, o), _)| *s == service && *o == opcode)
            .map(|(_, count)| count)
            .sum()
    }

    /// Number of calls of `opcode` on `service` sent to `address`.
    pub fn calls_to(&self, address: &Address, service: Service, opcode: Opcode) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .get(&(*address, service, opcode))
            .copied()
            .unwrap_or(0)
    }

    fn with_shard<R>(&self, address: &Address, f: impl FnOnce(&mut Shard) -> R) -> Option<R> {
        self.inner.lock().unwrap().shards.get_mut(address).map(f)
    }
}

impl<C: Clock> Transport for Network<C> {
    fn add_peer(&self, uri: &Uri) {
        let now = self.clock.current();
        if let Some(peer) = self.inner.lock().unwrap().peers.get_mut(uri) {
            peer.added.get_or_insert(now);
        }
    }

    fn resolve_direct_address(&self, uri: &Uri) -> Option<Address> {
        let inner = self.inner.lock().unwrap();
        let peer = inner.peers.get(uri)?;
        let added = peer.added?;
        match peer.reachability {
            Reachability::After(delay) if self.clock.current() >= added + delay => {
                Some(peer.address)
            }
            _ => None,
        }
    }

    fn call(&self, address: &Address, service: Service, opcode: Opcode, payload: Bytes) -> Promise {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (resolver, promise) = promise::channel(id, &format!("{service:?}/{opcode}"));
        let result = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            *inner.calls.entry((*address, service, opcode)).or_default() += 1;
            match inner.shards.get_mut(address) {
                None => Err(format!("unknown peer {address}")),
                Some(shard) if shard.held.contains(&(service, opcode)) => {
                    inner.held.push(resolver);
                    return promise;
                }
                Some(shard) if shard.failing.contains(&(service, opcode)) => {
                    Err("injected failure".to_string())
                }
                Some(shard) => shard.handle(service, opcode, payload),
            }
        };

        debug!(%address, ?service, opcode, ok = result.is_ok(), "simulated call");
        match result {
            Ok(response) => resolver.resolve(response),
            Err(reason) => resolver.fail(reason),
        };
        promise
    }
}
