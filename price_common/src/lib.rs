//!
//! Common types and utilities shared by the price cache server and client.
//!
//! This crate aggregates:
//! - `error`: unified error type `CacheError` used across the workspace.
//! - `result`: handy `Result<T, CacheError>` alias.
//! - `instruments`: instrument id validation and list parsing.
//! - `quote`: the `Quote` record stored by the cache and returned by queries.
//! - `protocol`: procedure names and their request/response payloads.
//! - `identity`: seed-derived ed25519 identities that address nodes.
//! - `store`: the ordered key-value store contract and its implementations.
//! - `transport`: identity-addressed UDP request/response frames.
//! - `net`: networking constants and small helpers.
#![warn(missing_docs)]
pub mod error;
pub mod result;
pub mod instruments;
pub mod quote;
pub mod protocol;
pub mod identity;
pub mod store;
pub mod transport;
pub mod net;

pub use error::CacheError;
pub use result::Result;
pub use quote::Quote;
