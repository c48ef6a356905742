//! Track request/response exchanges with remote services.
//!
//! A [Transport] (implemented by the networking layer) issues calls to remote
//! services and hands back a [Promise] for each one. A [Promise] resolves exactly
//! once, to a response payload, a failure, or a timeout. [AsyncResult] adds a
//! response type to a [Promise] so callers can extract a typed value (decoded with
//! [codec::Decode]) once the exchange completes.
//!
//! Promises can be consumed in two ways:
//! - Synchronously, by blocking on [Promise::wait] (or [AsyncResult::get]).
//! - Without blocking, by polling [Promise::state] from a task driven by a
//!   `lanes_runtime::Queue` (or by registering continuations).
//!
//! # Status
//!
//! `lanes-rpc` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use thiserror::Error;

mod address;
pub use address::{Address, Uri, ADDRESS_LENGTH};
mod client;
pub use client::{Client, Transport};
pub mod codec;
pub mod promise;
pub use promise::{AsyncResult, Promise, Resolver, State};
pub mod protocol;
pub use protocol::{Document, Opcode, Service};
pub mod mocks;

/// Errors that can occur when making calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("call failed: {0}")]
    Failed(String),
    #[error("call timed out")]
    TimedOut,
    #[error("decode failed: {0}")]
    Decode(&'static str),
    #[error("unsupported scheme (only tcp is supported): {0}")]
    UnsupportedScheme(String),
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    #[error("invalid address length: {0}")]
    InvalidAddress(usize),
}
