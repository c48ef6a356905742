use super::*;
use lanes_macros::test_traced;
use lanes_rpc::{mocks::Network, protocol::identity};
use lanes_utils::sha256::hash;
use prometheus_client::encoding::text::encode;
use std::{collections::HashSet, time::Instant};

type Storage = ShardedStorageClient<Network>;

fn uri(port: u16) -> Uri {
    Uri::parse(&format!("tcp://127.0.0.1:{port}")).unwrap()
}

/// A simulated deployment of `2^log2_lanes` shards.
struct Deployment {
    network: Arc<Network>,
    uris: BTreeMap<u32, Uri>,
    addresses: Vec<Address>,
}

impl Deployment {
    fn new(log2_lanes: u32) -> Self {
        let network = Arc::new(Network::default());
        let shards = 1u32 << log2_lanes;
        let uris: BTreeMap<u32, Uri> = (0..shards)
            .map(|shard| (shard, uri(8000 + shard as u16)))
            .collect();
        let addresses = uris
            .iter()
            .map(|(shard, uri)| network.register(uri, *shard, shards))
            .collect();
        Self {
            network,
            uris,
            addresses,
        }
    }

    fn client(&self, cfg: Config) -> Storage {
        ShardedStorageClient::new(cfg, self.network.clone(), SystemClock).unwrap()
    }

    /// A client connected to every shard.
    fn connected(&self, log2_lanes: u32) -> Storage {
        let client = self.client(Config::with_lanes(log2_lanes));
        client.connect_all(&self.uris).unwrap();
        client
    }

    /// Set the working digest of each shard.
    fn set_state(&self, labels: &[&[u8]]) {
        for (address, label) in self.addresses.iter().zip(labels) {
            self.network.set_current(address, hash(label));
        }
    }

    fn states(&self) -> Vec<Digest> {
        self.addresses
            .iter()
            .map(|address| self.network.current(address).unwrap())
            .collect()
    }
}

fn tree(labels: &[&[u8]]) -> CommitTree {
    CommitTree::new(labels.iter().map(|label| hash(label)).collect())
}

/// A transaction digest stored in `lane` (for up to 256 lanes).
fn tx_digest(lane: u8, n: u8) -> Digest {
    let mut bytes = [0u8; 32];
    bytes[0] = lane;
    bytes[1] = n;
    Digest::from(bytes)
}

#[test_traced]
fn test_discovery_completeness() {
    let deployment = Deployment::new(2);
    for uri in deployment.uris.values() {
        deployment.network.delay(uri, Duration::from_millis(50));
    }
    let client = deployment.client(Config::with_lanes(2));
    let routed = client
        .connect(&deployment.uris, Duration::from_secs(10))
        .unwrap();
    assert_eq!(routed, 4);
    assert_eq!(client.shard_count(), 4);

    let routes = client.routes();
    assert_eq!(routes.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert_eq!(routes.values().collect::<HashSet<_>>().len(), 4);
    for (shard, address) in routes {
        assert_eq!(address, deployment.addresses[shard as usize]);
    }
}

#[test_traced]
fn test_discovery_routes_by_reported_index() {
    let network = Arc::new(Network::default());
    // Labels are deliberately scrambled relative to what each shard reports
    let uris = BTreeMap::from([(0, uri(1)), (1, uri(2))]);
    let first = network.register(&uri(1), 1, 2);
    let second = network.register(&uri(2), 0, 2);
    let client: Storage =
        ShardedStorageClient::new(Config::with_lanes(1), network.clone(), SystemClock).unwrap();
    assert_eq!(client.connect(&uris, Duration::from_secs(10)).unwrap(), 2);
    assert_eq!(client.routes(), BTreeMap::from([(0, second), (1, first)]));
}

#[test_traced]
fn test_discovery_partial_failure() {
    let deployment = Deployment::new(2);
    deployment.network.disconnect(&deployment.uris[&2]);
    let client = deployment.client(Config {
        connect_timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(10),
        ..Config::with_lanes(2)
    });

    let start = Instant::now();
    let routed = client
        .connect(&deployment.uris, Duration::from_millis(200))
        .unwrap();
    let elapsed = start.elapsed();
    assert_eq!(routed, 3);
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(5), "blocked for {elapsed:?}");
    assert!(!client.routes().contains_key(&2));

    assert!(matches!(
        client.connect_all(&deployment.uris),
        Err(Error::IncompleteDiscovery {
            expected: 4,
            routed: 3
        })
    ));
}

#[test_traced]
fn test_discovery_failed_query() {
    let deployment = Deployment::new(1);
    deployment.network.fail(
        &deployment.addresses[0],
        Service::Identity,
        identity::GET_SHARD_COUNT,
    );
    let client = deployment.client(Config::with_lanes(1));
    // Failures finish early, so discovery does not wait out the timeout
    let start = Instant::now();
    assert_eq!(
        client
            .connect(&deployment.uris, Duration::from_secs(30))
            .unwrap(),
        1
    );
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test_traced]
fn test_discovery_count_mismatch() {
    let network = Arc::new(Network::default());
    let uris: BTreeMap<u32, Uri> = (0..2).map(|shard| (shard, uri(shard as u16))).collect();
    network.register(&uris[&0], 0, 2);
    network.register(&uris[&1], 1, 8);
    let client: Storage =
        ShardedStorageClient::new(Config::with_lanes(1), network.clone(), SystemClock).unwrap();
    assert!(matches!(
        client.connect(&uris, Duration::from_secs(10)),
        Err(Error::ShardCountMismatch {
            expected: 2,
            reported: 8
        })
    ));
    assert_eq!(client.shard_count(), 1);
}

#[test_traced]
fn test_discovery_duplicate_index() {
    let network = Arc::new(Network::default());
    let uris: BTreeMap<u32, Uri> = (0..2).map(|shard| (shard, uri(shard as u16))).collect();
    let first = network.register(&uris[&0], 0, 2);
    let second = network.register(&uris[&1], 0, 2);
    let client: Storage =
        ShardedStorageClient::new(Config::with_lanes(1), network.clone(), SystemClock).unwrap();
    assert!(matches!(
        client.connect(&uris, Duration::from_secs(10)),
        Err(Error::DuplicateShard { shard: 0 })
    ));
    assert_eq!(client.shard_count(), 1);
    let routed = client.routes()[&0];
    assert!(routed == first || routed == second);
}

#[test_traced]
fn test_commit_round_trip() {
    let deployment = Deployment::new(1);
    let client = deployment.connected(1);
    deployment.set_state(&[b"A", b"B"]);

    let root = client.commit().unwrap();
    assert_eq!(root, tree(&[b"A", b"B"]).root());
    assert_eq!(client.current_hash().unwrap(), root);
    assert_eq!(client.last_commit_digest(), root);
    assert!(client.hash_exists(&root));
    assert_eq!(client.history_len(), 1);
}

#[test_traced]
fn test_current_hash_records_nothing() {
    let deployment = Deployment::new(1);
    let client = deployment.connected(1);
    assert_eq!(client.current_hash().unwrap(), GENESIS);

    deployment.set_state(&[b"A", b"B"]);
    let current = client.current_hash().unwrap();
    assert_eq!(current, tree(&[b"A", b"B"]).root());
    assert_eq!(client.last_commit_digest(), GENESIS);
    assert!(!client.hash_exists(&current));
    assert_eq!(client.history_len(), 0);
}

#[test_traced]
fn test_commit_deduplicates() {
    let deployment = Deployment::new(1);
    let client = deployment.connected(1);
    deployment.set_state(&[b"A", b"B"]);

    let first = client.commit().unwrap();
    let second = client.commit().unwrap();
    assert_eq!(first, second);
    assert_eq!(client.history_len(), 1);
}

#[test_traced]
fn test_revert_to_genesis() {
    let deployment = Deployment::new(1);
    let client = deployment.connected(1);
    deployment.set_state(&[b"A", b"B"]);
    let root = client.commit().unwrap();

    assert!(client.revert_to_hash(&GENESIS).unwrap());
    assert!(client.hash_exists(&GENESIS));
    assert!(!client.hash_exists(&root));
    assert_eq!(client.last_commit_digest(), GENESIS);
    assert_eq!(client.history_len(), 1);
    assert_eq!(deployment.states(), vec![GENESIS; 2]);

    // Genesis needs no due diligence
    let network = &deployment.network;
    assert_eq!(network.calls(Service::State, state::HASH_EXISTS), 0);
    assert_eq!(network.calls(Service::State, state::REVERT_TO_HASH), 2);
}

#[test_traced]
fn test_revert_to_genesis_without_history() {
    let deployment = Deployment::new(1);
    let client = deployment.connected(1);
    assert_eq!(client.history_len(), 0);
    assert!(!client.hash_exists(&GENESIS));

    assert!(client.revert_to_hash(&GENESIS).unwrap());
    assert!(client.hash_exists(&GENESIS));
    assert_eq!(client.history_len(), 1);
    assert_eq!(client.last_commit_digest(), GENESIS);
    assert_eq!(deployment.states(), vec![GENESIS; 2]);
    let network = &deployment.network;
    assert_eq!(network.calls(Service::State, state::HASH_EXISTS), 0);
    assert_eq!(network.calls(Service::State, state::REVERT_TO_HASH), 2);
}

#[test_traced]
fn test_revert_to_previous_commit() {
    let deployment = Deployment::new(1);
    let client = deployment.connected(1);
    deployment.set_state(&[b"A", b"B"]);
    let first = client.commit().unwrap();
    deployment.set_state(&[b"C", b"D"]);
    let second = client.commit().unwrap();
    assert_eq!(client.history_len(), 2);

    assert!(client.revert_to_hash(&first).unwrap());
    assert_eq!(deployment.states(), vec![hash(b"A"), hash(b"B")]);
    assert_eq!(client.last_commit_digest(), first);
    assert_eq!(client.current_hash().unwrap(), first);
    assert!(client.hash_exists(&first));
    assert!(!client.hash_exists(&second));
    assert_eq!(client.history_len(), 1);

    // Each shard is asked about its own digest
    let network = &deployment.network;
    for address in &deployment.addresses {
        assert_eq!(
            network.calls_to(address, Service::State, state::HASH_EXISTS),
            1
        );
    }
}

#[test_traced]
fn test_revert_to_unknown_target() {
    let deployment = Deployment::new(1);
    let client = deployment.connected(1);
    deployment.set_state(&[b"A", b"B"]);
    let root = client.commit().unwrap();

    assert!(!client.revert_to_hash(&hash(b"unknown")).unwrap());
    assert_eq!(client.last_commit_digest(), root);
    assert_eq!(client.history_len(), 1);
    let network = &deployment.network;
    assert_eq!(network.calls(Service::State, state::HASH_EXISTS), 0);
    assert_eq!(network.calls(Service::State, state::REVERT_TO_HASH), 0);
}

#[test_traced]
fn test_due_diligence_short_circuits_apply() {
    let deployment = Deployment::new(1);
    let client = deployment.connected(1);
    deployment.set_state(&[b"A", b"B"]);
    let first = client.commit().unwrap();
    deployment.set_state(&[b"C", b"D"]);
    let second = client.commit().unwrap();

    deployment
        .network
        .forget(&deployment.addresses[1], &hash(b"B"));
    assert!(!client.revert_to_hash(&first).unwrap());

    let network = &deployment.network;
    assert_eq!(network.calls(Service::State, state::HASH_EXISTS), 2);
    assert_eq!(network.calls(Service::State, state::REVERT_TO_HASH), 0);
    assert_eq!(deployment.states(), vec![hash(b"C"), hash(b"D")]);
    assert_eq!(client.last_commit_digest(), second);
    assert!(client.hash_exists(&first));
}

#[test_traced]
fn test_due_diligence_call_failure() {
    let deployment = Deployment::new(1);
    let client = deployment.connected(1);
    deployment.set_state(&[b"A", b"B"]);
    let root = client.commit().unwrap();

    deployment
        .network
        .fail(&deployment.addresses[0], Service::State, state::HASH_EXISTS);
    assert!(matches!(
        client.revert_to_hash(&root),
        Err(Error::Rpc(lanes_rpc::Error::Failed(_)))
    ));
    assert_eq!(
        deployment
            .network
            .calls(Service::State, state::REVERT_TO_HASH),
        0
    );
}

#[test_traced]
fn test_revert_failure_after_due_diligence_is_fatal() {
    let deployment = Deployment::new(1);
    let client = deployment.connected(1);
    deployment.set_state(&[b"A", b"B"]);
    let first = client.commit().unwrap();
    deployment.set_state(&[b"C", b"D"]);
    let second = client.commit().unwrap();

    deployment.network.refuse_revert(&deployment.addresses[1]);
    assert!(matches!(
        client.revert_to_hash(&first),
        Err(Error::RevertFailed { shard: 1 })
    ));

    // Shard 0 reverted and shard 1 did not: nothing is rolled forward
    assert_eq!(deployment.states(), vec![hash(b"A"), hash(b"D")]);
    assert_eq!(client.last_commit_digest(), second);
    assert_eq!(client.history_len(), 2);
}

#[test_traced]
fn test_unrouted_shard() {
    let deployment = Deployment::new(1);
    let client = deployment.client(Config::with_lanes(1));
    assert!(matches!(client.commit(), Err(Error::UnroutedShard(0))));
    assert!(matches!(client.current_hash(), Err(Error::UnroutedShard(0))));
    assert_eq!(client.shard_count(), 0);

    let id = ResourceId::new(b"account");
    assert!(matches!(
        client.get(&id),
        Err(Error::UnroutedShard(lane)) if lane == id.lane(1)
    ));
}

#[test_traced]
fn test_unanswered_commit() {
    let deployment = Deployment::new(1);
    let client = deployment.client(Config {
        call_timeout: Duration::from_millis(50),
        ..Config::with_lanes(1)
    });
    client.connect_all(&deployment.uris).unwrap();
    deployment
        .network
        .hold(&deployment.addresses[1], Service::State, state::COMMIT);

    assert!(matches!(
        client.commit(),
        Err(Error::Rpc(lanes_rpc::Error::TimedOut))
    ));
    assert_eq!(client.history_len(), 0);
    assert_eq!(client.last_commit_digest(), GENESIS);
}

#[test_traced]
fn test_documents() {
    let deployment = Deployment::new(2);
    let client = deployment.connected(2);
    let id = ResourceId::new(b"account");
    let lane = id.lane(2) as usize;

    assert_eq!(client.get(&id).unwrap(), None);
    let created = client.get_or_create(&id).unwrap();
    assert!(created.created);
    assert!(created.value.is_empty());

    assert!(client.set(&id, Bytes::from_static(b"balance")).unwrap());
    assert_eq!(
        client.get(&id).unwrap(),
        Some(Document {
            value: Bytes::from_static(b"balance"),
            created: false,
        })
    );
    assert!(!client.get_or_create(&id).unwrap().created);

    // Only the document's lane stores it
    for (shard, address) in deployment.addresses.iter().enumerate() {
        let stored = deployment.network.document(address, id.digest());
        assert_eq!(stored.is_some(), shard == lane);
    }

    assert!(client.lock(&id).unwrap());
    assert!(!client.lock(&id).unwrap());
    assert!(client.unlock(&id).unwrap());
    assert!(!client.unlock(&id).unwrap());
}

#[test_traced]
fn test_transactions() {
    let deployment = Deployment::new(2);
    let client = deployment.connected(2);
    let digest = tx_digest(3, 0);
    let tx = Bytes::from_static(b"transfer");

    assert!(!client.has_transaction(&digest).unwrap());
    assert_eq!(client.get_transaction(&digest).unwrap(), None);
    assert!(client.add_transaction(digest, tx.clone()).unwrap());
    assert!(client.has_transaction(&digest).unwrap());
    assert_eq!(client.get_transaction(&digest).unwrap(), Some(tx.clone()));
    assert_eq!(
        deployment.network.transaction(&deployment.addresses[3], &digest),
        Some(tx)
    );
}

#[test_traced]
fn test_bulk_transactions_one_call_per_lane() {
    let deployment = Deployment::new(2);
    let client = deployment.connected(2);
    let batch = vec![
        (tx_digest(0, 1), Bytes::from_static(b"a")),
        (tx_digest(2, 1), Bytes::from_static(b"b")),
        (tx_digest(0, 2), Bytes::from_static(b"c")),
    ];
    assert!(client.add_transactions(batch.clone()).unwrap());

    let network = &deployment.network;
    assert_eq!(network.calls(Service::TxStore, tx_store::SET_BULK), 2);
    for (lane, expected) in [(0, 1), (1, 0), (2, 1), (3, 0)] {
        assert_eq!(
            network.calls_to(
                &deployment.addresses[lane],
                Service::TxStore,
                tx_store::SET_BULK
            ),
            expected
        );
    }
    for (digest, tx) in batch {
        let lane = digest[0] as usize;
        assert_eq!(
            network.transaction(&deployment.addresses[lane], &digest),
            Some(tx)
        );
    }

    // Nothing to send
    assert!(client.add_transactions(Vec::new()).unwrap());
    assert_eq!(network.calls(Service::TxStore, tx_store::SET_BULK), 2);
}

#[test_traced]
fn test_invalid_config() {
    let network = Arc::new(Network::default());
    let cfg = Config {
        shards: 3,
        ..Config::with_lanes(1)
    };
    assert!(matches!(
        ShardedStorageClient::new(cfg, network, SystemClock),
        Err(Error::InvalidConfig(_))
    ));
}

#[test_traced]
fn test_metrics() {
    let deployment = Deployment::new(1);
    let client = deployment.client(Config::with_lanes(1));
    let mut registry = Registry::default();
    client.register(registry.sub_registry_with_prefix("storage"));

    client.connect_all(&deployment.uris).unwrap();
    deployment.set_state(&[b"A", b"B"]);
    client.commit().unwrap();
    client.revert_to_hash(&hash(b"unknown")).unwrap();
    client.revert_to_hash(&GENESIS).unwrap();

    let mut buffer = String::new();
    encode(&mut buffer, &registry).unwrap();
    assert!(buffer.contains("storage_commits_total 1"));
    assert!(buffer.contains("storage_reverts_total 1"));
    assert!(buffer.contains("storage_reverts_rejected_total 1"));
    assert!(buffer.contains("storage_discovery_failures_total 0"));
    assert!(buffer.contains("storage_routed_shards 2"));
}
