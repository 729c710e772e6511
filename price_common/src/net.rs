//! Shared networking constants and helpers used by client and server.
use std::time::Duration;

/// Default UDP port the RPC server listens on.
pub const RPC_PORT: u16 = 40001;
/// Default local UDP port for the client (0 lets the OS choose).
pub const CLIENT_PORT: u16 = 0;
/// Largest UDP payload we send or accept.
pub const MAX_DATAGRAM: usize = 65_507;
/// How long a client waits for a verified response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// How often blocking socket reads wake up to check for shutdown.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Helper to format an IPv4 address with a port like "ip:port".
pub fn addr(ip: &str, port: u16) -> String {
    format!("{}:{}", ip, port)
}
