//! Command-line arguments for the price server.
//!
//! This module defines the CLI interface using `clap` and resolves it into a
//! [`ServerConfig`]. See `main` for end-to-end usage.
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use price_common::CacheError;
use price_common::instruments::{DefaultInstrument, InstrumentList, InstrumentParser};
use price_common::net::{RPC_PORT, addr};

use crate::poller::DEFAULT_INTERVAL_MILLIS;
use crate::source::COINGECKO_API_URL;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory of the persistent store (quotes and the server seed).
    #[clap(long, default_value = "./db/rpc-server")]
    pub db_path: PathBuf,

    /// UDP address the RPC server binds to.
    #[clap(long, default_value_t = addr("0.0.0.0", RPC_PORT))]
    pub bind: String,

    /// Milliseconds between two poll cycles.
    #[clap(long, default_value_t = DEFAULT_INTERVAL_MILLIS)]
    pub interval_millis: u64,

    /// Comma separated instrument ids to poll.
    #[clap(long, conflicts_with = "instruments_file")]
    pub instruments: Option<String>,

    /// File with instrument ids separated by commas, spaces, or new lines.
    #[clap(long)]
    pub instruments_file: Option<PathBuf>,

    /// Base URL of the market-data API.
    #[clap(long, default_value = COINGECKO_API_URL)]
    pub api_url: String,

    /// HTTP timeout for one fetch, in seconds.
    #[clap(long, default_value_t = 10)]
    pub request_timeout_secs: u64,
}

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Store directory.
    pub db_path: PathBuf,
    /// RPC bind address.
    pub bind: String,
    /// Poll interval.
    pub interval: Duration,
    /// Instruments to poll.
    pub instruments: Vec<String>,
    /// Market-data API base URL.
    pub api_url: String,
    /// HTTP timeout for one fetch.
    pub request_timeout: Duration,
}

impl ServerConfig {
    /// Validates `args` and loads the instrument list.
    pub fn from_args(args: Args) -> Result<Self, CacheError> {
        if args.interval_millis == 0 {
            return Err(CacheError::Format(String::from("--interval-millis must be positive")));
        }

        let instruments = match (&args.instruments, &args.instruments_file) {
            (Some(list), _) => InstrumentList::parse_csv(list)?,
            (None, Some(path)) => {
                let file = File::open(path)?;
                InstrumentList::parse_from_file(BufReader::new(file))?
            }
            (None, None) => DefaultInstrument::ids(),
        };
        if instruments.is_empty() {
            return Err(CacheError::Format(String::from("no instruments configured")));
        }

        Ok(Self {
            db_path: args.db_path,
            bind: args.bind,
            interval: Duration::from_millis(args.interval_millis),
            instruments,
            api_url: args.api_url,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["price_server"]);
        let config = ServerConfig::from_args(args).unwrap();
        assert_eq!(config.interval, Duration::from_millis(30_000));
        assert_eq!(config.bind, "0.0.0.0:40001");
        assert_eq!(config.instruments.len(), 5);
        assert_eq!(config.api_url, COINGECKO_API_URL);
    }

    #[test]
    fn instrument_list_from_flag() {
        let args = Args::parse_from(["price_server", "--instruments", "bitcoin,dogecoin"]);
        let config = ServerConfig::from_args(args).unwrap();
        assert_eq!(config.instruments, vec!["bitcoin", "dogecoin"]);
    }

    #[test]
    fn instrument_list_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bitcoin\nethereum solana").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args = Args::parse_from(["price_server", "--instruments-file", path.as_str()]);
        let config = ServerConfig::from_args(args).unwrap();
        assert_eq!(config.instruments, vec!["bitcoin", "ethereum", "solana"]);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let args = Args::parse_from(["price_server", "--interval-millis", "0"]);
        assert!(ServerConfig::from_args(args).is_err());
    }
}
