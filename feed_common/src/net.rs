//! Shared networking constants and helpers.

/// TCP port of the push-update server.
pub const FEED_PORT: u16 = 4000;

/// Helper to format an IPv4 address with a port like "ip:port".
pub fn addr(ip: &str, port: u16) -> String {
    format!("{}:{}", ip, port)
}
