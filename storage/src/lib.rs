//! Commit, revert, and route requests across sharded ledger storage.
//!
//! A ledger's state is split across `2^log2_lanes` storage shards. [ShardedStorageClient]
//! discovers where each shard can be reached (with one [connect::ShardConnectWorker] per
//! shard), keeps every shard's state in step with commits and reverts recorded as
//! [commit::CommitTree]s, and routes document and transaction requests to the shard
//! whose lane matches their [ResourceId].
//!
//! # Status
//!
//! `lanes-storage` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use thiserror::Error;

mod client;
pub use client::{Config, ShardedStorageClient};
pub mod commit;
pub use commit::GENESIS;
pub mod connect;
mod resource;
pub use resource::ResourceId;

/// Errors that can occur when interacting with sharded storage.
#[derive(Error, Debug)]
pub enum Error {
    #[error("rpc error: {0}")]
    Rpc(#[from] lanes_rpc::Error),
    #[error("no address routed for shard {0}")]
    UnroutedShard(u32),
    #[error("shard count mismatch: expected {expected}, reported {reported}")]
    ShardCountMismatch { expected: u32, reported: u32 },
    #[error("shard {shard} reported by more than one address")]
    DuplicateShard { shard: u32 },
    #[error("incomplete discovery: routed {routed} of {expected} shards")]
    IncompleteDiscovery { expected: usize, routed: usize },
    /// Shards that already reverted are left reverted: the deployment may be inconsistent.
    #[error("shard {shard} failed to revert after confirming it could")]
    RevertFailed { shard: u32 },
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}
