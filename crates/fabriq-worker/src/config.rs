use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use fabriq_transport::AuthMode;

/// Default heartbeat broadcast interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default bounded wait per loop iteration.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Default handshake timeout per connection.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default send timeout on service connections.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration consumed by [`crate::RequestWorker::start`].
///
/// The worker consumes this surface; it does not own how the values are
/// produced (CLI flags, a config file, an embedding application).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the service endpoint binds to.
    pub service: SocketAddr,
    /// Address the heartbeat endpoint binds to.
    pub heartbeat: SocketAddr,
    /// Worker display name, announced to clients during the handshake.
    pub name: String,
    /// Peer addresses permitted to connect; empty admits any address.
    pub allowlist: Vec<IpAddr>,
    /// Path to the identity file. Missing or corrupt material is a
    /// fatal startup error.
    pub identity: PathBuf,
    /// Client-identity policy. `Any` is the permissive mode.
    pub auth: AuthMode,
    /// Log each dispatched request (command + origin) at debug level.
    pub log_requests: bool,
    /// Beacon interval. Fixed-interval scheduling: the deadline is
    /// recomputed after each beacon, with no catch-up ticks.
    pub heartbeat_interval: Duration,
    /// Bounded wait per loop iteration. One beacon is emitted at most
    /// `heartbeat_interval + poll_timeout` after the previous one.
    pub poll_timeout: Duration,
    /// Timeout covering each connection's handshake.
    pub handshake_timeout: Duration,
    /// Send timeout on service connections; a stalled peer is dropped
    /// rather than allowed to block the loop.
    pub send_timeout: Duration,
}

impl Config {
    /// Configuration with defaults for the given addresses and identity.
    pub fn new(service: SocketAddr, heartbeat: SocketAddr, identity: impl Into<PathBuf>) -> Self {
        Self {
            service,
            heartbeat,
            name: "fabriq-worker".to_string(),
            allowlist: Vec::new(),
            identity: identity.into(),
            auth: AuthMode::Any,
            log_requests: false,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new(
            "127.0.0.1:9091".parse().unwrap(),
            "127.0.0.1:9092".parse().unwrap(),
            "/tmp/id.json",
        );

        assert_eq!(config.name, "fabriq-worker");
        assert!(config.allowlist.is_empty());
        assert!(matches!(config.auth, AuthMode::Any));
        assert!(!config.log_requests);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(1000));
        assert_eq!(config.poll_timeout, Duration::from_millis(250));
    }
}
