//! Error types shared between client and server.
//!
//! The `CacheError` enum unifies the failure cases of the whole workspace (I/O,
//! serialization, the ordered store, the transport, the upstream market-data source)
//! so every crate can propagate a single error type.
use std::io;
use std::sync::PoisonError;

use thiserror::Error;

/// Unified error type shared by client and server.
#[derive(Error, Debug)]
pub enum CacheError {
    /// I/O error originating from the standard library, sockets or files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic formatting/validation error with a human-readable message.
    #[error("Format error: {0}")]
    Format(String),

    /// Failure while decoding with `bincode` (invalid or truncated frames, etc.).
    #[error("Bincode decode error: {0}")]
    BincodeDecode(#[from] bincode::error::DecodeError),

    /// Failure while encoding with `bincode`.
    #[error("Bincode encode error: {0}")]
    BincodeEncode(#[from] bincode::error::EncodeError),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// The ordered store failed a get/put/scan or holds a corrupt value.
    #[error("Store error: {0}")]
    Store(String),

    /// A request payload could not be decoded into the procedure's request shape.
    #[error("Invalid request format: {0}")]
    Decode(String),

    /// No handler is registered under the requested procedure name.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// The external market-data source was unreachable or returned unusable data.
    #[error("Upstream fetch error: {0}")]
    Upstream(String),

    /// The transport failed to deliver a request or a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No valid response arrived before the deadline.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Key material could not be loaded, parsed or verified.
    #[error("Identity error: {0}")]
    Identity(String),

    /// Instrument id is empty or contains the key separator.
    #[error("Invalid instrument id: {0:?}")]
    InvalidInstrument(String),

    /// Channel receive failed (e.g., sender closed); contains a short context string.
    #[error("Channel receive failed: {0}")]
    ChannelRecv(String),

    /// Error indicating a poisoned mutex/lock was encountered.
    #[error("Mutex Lock Poisoned: {0}")]
    MutexLock(String),
}

impl<T> From<PoisonError<T>> for CacheError {
    fn from(err: PoisonError<T>) -> Self {
        CacheError::MutexLock(err.to_string())
    }
}
