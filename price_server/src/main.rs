//! Price cache RPC server.
//!
//! This binary wires together the building blocks of the `price_server` library:
//!
//! - `LogStore`: the durable ordered store holding quotes and the server seed.
//! - `Identity`: the server key pair; its public key is the address clients use.
//! - `RefreshPoller`: fetches prices from the market-data API on a fixed interval and
//!   records them as latest and historical entries.
//! - `RpcListener`: receives request frames over UDP and answers them through the
//!   `DispatchTable` (`ping`, `getLatestPrices`, `getHistoricalPrices`).
//!
//! Shutdown: Ctrl+C stops the listener, then the poller (an in-flight cycle completes
//! first), then the process exits.
//!
//! Usage example (CLI):
//! ```bash
//! price_server --db-path ./db/rpc-server --interval-millis 30000 --instruments bitcoin,ethereum
//! ```
use std::sync::Arc;

use clap::Parser;
use crossbeam_channel::bounded;
use log::info;
use price_common::identity::{Identity, RPC_SEED_KEY};
use price_common::store::LogStore;
use price_common::{CacheError, Result};
use price_server::args::{Args, ServerConfig};
use price_server::source::CoinGeckoSource;
use price_server::{DispatchTable, InstrumentCache, RefreshPoller, RpcListener};

fn main() -> Result<(), CacheError> {
    init_logger();
    let config = ServerConfig::from_args(Args::parse())?;
    info!("Starting with {:?}", config);

    let store = Arc::new(LogStore::open(&config.db_path)?);
    info!("Store opened at {}", store.path().display());
    let identity = Identity::load_or_create(store.as_ref(), RPC_SEED_KEY)?;

    let cache = Arc::new(InstrumentCache::new(Arc::clone(&store)));
    let source = CoinGeckoSource::new(&config.api_url, config.request_timeout)?;
    let poller = RefreshPoller::new(Arc::clone(&cache), source, config.instruments.clone())
        .start(config.interval)?;

    let listener = RpcListener::bind(&config.bind, identity, DispatchTable::for_cache(cache))?;
    info!("RPC Server started on public key: {}", listener.public_id());
    let listener = listener.start()?;

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Shutting down server...");
        let _ = stop_tx.try_send(());
    })
    .map_err(|e| CacheError::Format(format!("failed to set Ctrl+C handler: {}", e)))?;

    stop_rx
        .recv()
        .map_err(|e| CacheError::ChannelRecv(e.to_string()))?;
    listener.stop()?;
    poller.stop()?;
    info!("Server stopped");
    Ok(())
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
