use crate::{
    codec::{Decode, Encode},
    promise::{AsyncResult, Promise},
    Address, Opcode, Service, Uri,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::trace;

/// Interface to the networking layer.
///
/// Implementations own connection management and the wire format; callers only see
/// peers (by [Uri] and [Address]) and calls (as [Promise]s).
pub trait Transport: Send + Sync + 'static {
    /// Begin connecting to `uri`. Connecting happens in the background.
    fn add_peer(&self, uri: &Uri);

    /// The [Address] of the peer at `uri`, once the connection handshake has completed.
    fn resolve_direct_address(&self, uri: &Uri) -> Option<Address>;

    /// Issue a call. The returned promise resolves with the encoded response.
    fn call(&self, address: &Address, service: Service, opcode: Opcode, payload: Bytes)
        -> Promise;
}

/// Issues typed calls over a [Transport].
pub struct Client<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
        }
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Call `opcode` of `service` on `address` with `args`.
    pub fn call<R: Decode>(
        &self,
        address: &Address,
        service: Service,
        opcode: Opcode,
        args: &impl Encode,
    ) -> AsyncResult<R> {
        trace!(%address, ?service, opcode, "issuing call");
        AsyncResult::new(self.transport.call(address, service, opcode, args.encode()))
    }
}
