//! Services exposed by a storage shard and the operations each accepts.

use crate::{
    codec::{Encode, Read},
    Error,
};
use bytes::{Buf, BufMut, Bytes};

/// Selects an operation within a [Service].
pub type Opcode = u8;

/// Services exposed by a storage shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    /// Reports where the shard sits in the deployment.
    Identity,
    /// Versioned document state.
    State,
    /// Transaction blobs.
    TxStore,
}

impl Service {
    /// Wire identifier of the service.
    pub fn id(&self) -> u16 {
        match self {
            Self::Identity => 0,
            Self::State => 1,
            Self::TxStore => 2,
        }
    }
}

/// Operations of [Service::Identity].
pub mod identity {
    use super::Opcode;

    /// `() -> u32`
    pub const GET_SHARD_INDEX: Opcode = 1;
    /// `() -> u32`
    pub const GET_SHARD_COUNT: Opcode = 2;
}

/// Operations of [Service::State].
pub mod state {
    use super::Opcode;

    /// `() -> Digest`
    pub const CURRENT_HASH: Opcode = 1;
    /// `() -> Digest`
    pub const COMMIT: Opcode = 2;
    /// `Digest -> bool`
    pub const HASH_EXISTS: Opcode = 3;
    /// `Digest -> bool`
    pub const REVERT_TO_HASH: Opcode = 4;
    /// `Digest -> Option<Document>`
    pub const GET: Opcode = 5;
    /// `Digest -> Document`
    pub const GET_OR_CREATE: Opcode = 6;
    /// `(Digest, Bytes) -> bool`
    pub const SET: Opcode = 7;
    /// `Digest -> bool`
    pub const LOCK: Opcode = 8;
    /// `Digest -> bool`
    pub const UNLOCK: Opcode = 9;
}

/// Operations of [Service::TxStore].
pub mod tx_store {
    use super::Opcode;

    /// `(Digest, Bytes) -> bool`
    pub const SET: Opcode = 1;
    /// `Vec<(Digest, Bytes)> -> bool`
    pub const SET_BULK: Opcode = 2;
    /// `Digest -> Option<Bytes>`
    pub const GET: Opcode = 3;
    /// `Digest -> bool`
    pub const HAS: Opcode = 4;
}

/// A document as returned by the [Service::State] service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    pub value: Bytes,
    /// Set when the request that returned the document also created it.
    pub created: bool,
}

impl Encode for Document {
    fn len_encoded(&self) -> usize {
        self.value.len_encoded() + self.created.len_encoded()
    }

    fn write(&self, buf: &mut impl BufMut) {
        self.value.write(buf);
        self.created.write(buf);
    }
}

impl Read for Document {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        Ok(Self {
            value: Bytes::read(buf)?,
            created: bool::read(buf)?,
        })
    }
}
