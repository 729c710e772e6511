//! Price cache server.
//!
//! Polls current instrument prices from a market-data API, keeps the latest value and
//! the full history of every instrument in an ordered store, and answers queries over an
//! identity-addressed UDP transport:
//!
//! - `cache`: `InstrumentCache`, the latest/history write discipline and range queries.
//! - `source`: `QuoteSource` and the CoinGecko client.
//! - `poller`: `RefreshPoller`, the periodic fetch-and-commit task.
//! - `dispatch`: `DispatchTable`, procedure name to handler.
//! - `listener`: `RpcListener`, the UDP receive loop that feeds the dispatch table.
//! - `args`: CLI arguments and `ServerConfig`.
#![warn(missing_docs)]
pub mod args;
pub mod cache;
pub mod dispatch;
pub mod listener;
pub mod poller;
pub mod source;

pub use cache::InstrumentCache;
pub use dispatch::DispatchTable;
pub use listener::{ListenerHandle, RpcListener};
pub use poller::{PollerHandle, RefreshPoller};
