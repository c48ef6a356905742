use lanes_utils::{sha256::hash, Digest};
use std::fmt;

/// Identifies a document or transaction and, through [ResourceId::lane], the shard
/// that stores it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(Digest);

impl ResourceId {
    /// The identifier of the resource named `key`.
    pub fn new(key: &[u8]) -> Self {
        Self(hash(key))
    }

    pub fn digest(&self) -> &Digest {
        &self.0
    }

    /// The lane (shard index) storing this resource in a deployment of `2^log2_lanes` lanes.
    ///
    /// The lane is read from the first four bytes of the digest (little-endian).
    pub fn lane(&self, log2_lanes: u32) -> u32 {
        let value = u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        value & lane_mask(log2_lanes)
    }
}

fn lane_mask(log2_lanes: u32) -> u32 {
    1u32.checked_shl(log2_lanes).map_or(u32::MAX, |lanes| lanes - 1)
}

impl From<Digest> for ResourceId {
    fn from(digest: Digest) -> Self {
        Self(digest)
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
