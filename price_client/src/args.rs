//! Command-line arguments for the price client.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Hex public key printed by the server on start.
    #[clap(long)]
    pub server_key: String,

    /// UDP address (ip:port) where the server with that key is reachable.
    #[clap(long)]
    pub server_addr: String,

    /// Directory of the client's local store (holds the client seed).
    #[clap(long, default_value = "./db/rpc-client")]
    pub db_path: PathBuf,

    /// Seconds to wait for a response.
    #[clap(long, default_value_t = 5)]
    pub timeout_secs: u64,

    /// Procedure to call.
    #[command(subcommand)]
    pub call: Call,
}

/// One remote procedure call.
#[derive(Debug, Subcommand)]
pub enum Call {
    /// Round-trip check; the server answers with nonce + 1.
    Ping {
        /// Value sent to the server.
        #[clap(long, default_value_t = 126, allow_hyphen_values = true)]
        nonce: i64,
    },
    /// Latest price of each instrument.
    Latest {
        /// Instrument ids, e.g. `bitcoin ethereum`.
        ids: Vec<String>,

        /// File with instrument ids separated by commas, spaces, or new lines.
        #[clap(long)]
        path: Option<String>,
    },
    /// Historical prices of each instrument between two timestamps.
    History {
        /// Instrument ids, e.g. `bitcoin ethereum`.
        #[clap(required = true)]
        ids: Vec<String>,

        /// Lower bound, epoch millis (inclusive).
        #[clap(long, conflicts_with = "last_secs")]
        from: Option<u64>,

        /// Upper bound, epoch millis (inclusive). Defaults to now.
        #[clap(long)]
        to: Option<u64>,

        /// Shortcut for `--from now-N*1000 --to now`.
        #[clap(long, default_value_t = 3600)]
        last_secs: u64,
    },
}
