//! Price Client: calls the price cache server over the identity-addressed UDP transport
//! and prints the answers.
//!
//! The server is addressed by its public key; `--server-addr` tells the client where that
//! key is currently reachable. The client keeps its own seed in a small local store, the
//! same way the server does.
//!
//! Usage example (CLI):
//! ```bash
//! price_client --server-key <hex> --server-addr 127.0.0.1:40001 ping --nonce 126
//! price_client --server-key <hex> --server-addr 127.0.0.1:40001 latest bitcoin ethereum ripple
//! price_client --server-key <hex> --server-addr 127.0.0.1:40001 history bitcoin --last-secs 3600
//! ```
#![warn(missing_docs)]
mod args;
mod sender;

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use clap::Parser;
use log::{info, warn};
use price_common::identity::{CLIENT_SEED_KEY, Identity, PublicId};
use price_common::instruments::{InstrumentList, InstrumentParser};
use price_common::net::{CLIENT_PORT, addr};
use price_common::store::LogStore;
use price_common::transport::{StaticResolver, UdpTransport};
use price_common::{CacheError, Quote, Result};

use crate::args::{Args, Call};
use crate::sender::PriceCaller;

fn main() -> Result<(), CacheError> {
    init_logger();
    let args = Args::parse();

    let server_key: PublicId = args.server_key.trim().replace('"', "").parse()?;
    let server_addr: SocketAddr = args
        .server_addr
        .trim()
        .parse()
        .map_err(|e| CacheError::Format(format!("invalid --server-addr: {}", e)))?;

    let store = LogStore::open(&args.db_path)?;
    let identity = Identity::load_or_create(&store, CLIENT_SEED_KEY)?;
    info!("Client identity: {}", identity.public_id());

    let resolver = StaticResolver::new().with_peer(server_key, server_addr);
    let transport = UdpTransport::bind(
        &addr("0.0.0.0", CLIENT_PORT),
        resolver,
        Duration::from_secs(args.timeout_secs),
    )?;
    info!("UDP client bound on {}", transport.local_addr()?);
    let caller = PriceCaller::new(transport, server_key);

    match args.call {
        Call::Ping { nonce } => {
            let reply = caller.ping(nonce)?;
            info!("Ping response: {{ nonce: {} }}", reply);
        }
        Call::Latest { ids, path } => {
            let ids = collect_ids(ids, path)?;
            let prices = caller.get_latest_prices(ids.clone())?;
            for id in &ids {
                match prices.get(id) {
                    Some(quote) => info!("The Latest price of {} is {}", id, describe(quote)),
                    None => warn!("No price known for {}", id),
                }
            }
        }
        Call::History {
            ids,
            from,
            to,
            last_secs,
        } => {
            let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
            let to = to.unwrap_or(now);
            let from = from.unwrap_or_else(|| to.saturating_sub(last_secs.saturating_mul(1000)));
            let prices = caller.get_historical_prices(ids, from, to)?;
            for (id, quotes) in &prices {
                info!("{}: {} entries between {} and {}", id, quotes.len(), from, to);
                for quote in quotes {
                    info!("  {}", describe(quote));
                }
            }
        }
    }
    Ok(())
}

fn collect_ids(mut ids: Vec<String>, path: Option<String>) -> Result<Vec<String>, CacheError> {
    if let Some(raw) = path {
        let path = normalize_path(&raw);
        if !is_file_exist(&path) {
            return Err(CacheError::Format(format!("no such file: {}", path.display())));
        }
        let file = File::open(&path)?;
        for id in InstrumentList::parse_from_file(BufReader::new(file))? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    if ids.is_empty() {
        return Err(CacheError::Format(String::from("no instrument ids given")));
    }
    Ok(ids)
}

fn describe(quote: &Quote) -> String {
    let time = i64::try_from(quote.timestamp)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| quote.timestamp.to_string());
    format!(
        "{} ({}) price={:.2} time={}",
        quote.name, quote.symbol, quote.price, time
    )
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Normalize a CLI-provided path string by trimming whitespace and matching quotes.
///
/// This allows passing Windows paths in quotes without breaking parsing.
fn normalize_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let no_quotes = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    PathBuf::from(no_quotes)
}

/// Returns `true` if the provided path exists and is a regular file.
fn is_file_exist(path: &PathBuf) -> bool {
    path.exists() && path.is_file()
}
