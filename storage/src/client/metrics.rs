//! Metrics for [super::ShardedStorageClient].

use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Metrics for [super::ShardedStorageClient].
#[derive(Default)]
pub struct Metrics {
    /// Successful commits.
    pub commits: Counter,
    /// Successful reverts.
    pub reverts: Counter,
    /// Reverts rejected before any shard was changed.
    pub reverts_rejected: Counter,
    /// Shards that failed or timed out during discovery.
    pub discovery_failures: Counter,
    /// Shards with a known address.
    pub routed_shards: Gauge,
}

impl Metrics {
    /// Register metrics with the given registry.
    pub fn register(&self, registry: &mut Registry) {
        registry.register("commits", "Successful commits", self.commits.clone());
        registry.register("reverts", "Successful reverts", self.reverts.clone());
        registry.register(
            "reverts_rejected",
            "Reverts rejected before any shard was changed",
            self.reverts_rejected.clone(),
        );
        registry.register(
            "discovery_failures",
            "Shards that failed or timed out during discovery",
            self.discovery_failures.clone(),
        );
        registry.register(
            "routed_shards",
            "Shards with a known address",
            self.routed_shards.clone(),
        );
    }
}
