//! Record the state of every shard at a point in time.
//!
//! A [CommitTree] holds one digest per shard (its leaves, ordered by shard index) and a
//! single root derived from them. Roots are what callers commit to and revert to; leaves
//! are what each shard is asked to confirm and restore.
//!
//! The root is a binary Merkle root: adjacent leaves are hashed together in pairs,
//! level by level, and a node without a sibling is hashed with itself. A tree whose
//! leaves are all [GENESIS] (the state of never-written shards) has root [GENESIS].

use lanes_utils::{Digest, Sha256};

mod history;
pub use history::History;

/// The digest of the state no shard has ever moved away from.
pub const GENESIS: Digest = Digest::zero();

/// Hashes two nodes into their parent.
fn combine(hasher: &mut Sha256, left: &Digest, right: &Digest) -> Digest {
    hasher.update(left);
    hasher.update(right);
    hasher.finalize()
}

/// Computes the Merkle root of `leaves`.
///
/// Returns `None` if `leaves` is empty.
pub fn root(leaves: &[Digest]) -> Option<Digest> {
    let mut hasher = Sha256::new();
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                combine(&mut hasher, &pair[0], right)
            })
            .collect();
    }
    level.pop()
}

/// The digest of every shard, plus the root they combine into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitTree {
    leaves: Vec<Digest>,
    root: Digest,
}

impl CommitTree {
    /// Build a tree from per-shard digests, ordered by shard index.
    pub fn new(leaves: Vec<Digest>) -> Self {
        let root = if leaves.iter().all(|leaf| *leaf == GENESIS) {
            GENESIS
        } else {
            root(&leaves).unwrap_or(GENESIS)
        };
        Self { leaves, root }
    }

    /// The tree of `shards` shards that have never been written.
    pub fn genesis(shards: usize) -> Self {
        Self {
            leaves: vec![GENESIS; shards],
            root: GENESIS,
        }
    }

    pub fn root(&self) -> Digest {
        self.root
    }

    pub fn leaves(&self) -> &[Digest] {
        &self.leaves
    }

    /// The digest recorded for `shard`.
    pub fn leaf(&self, shard: usize) -> Option<&Digest> {
        self.leaves.get(shard)
    }

    pub fn is_genesis(&self) -> bool {
        self.root == GENESIS
    }
}
