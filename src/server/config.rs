//! Server configuration

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default listening port
pub const DEFAULT_PORT: u16 = 3001;

/// Default WebSocket path
pub const DEFAULT_PATH: &str = "/relay";

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// URL path clients must connect to
    pub path: String,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// WebSocket handshake must complete within this time
    pub handshake_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            path: DEFAULT_PATH.to_string(),
            max_connections: 0, // Unlimited
            handshake_timeout: Duration::from_secs(10),
            tcp_nodelay: true, // Signaling is small, latency-sensitive frames
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the WebSocket path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Load from process environment
    ///
    /// Reads `PORT`, `RELAY_BIND_ADDR`, `RELAY_PATH`, `RELAY_MAX_CONNECTIONS`
    /// and `RELAY_HANDSHAKE_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("RELAY_BIND_ADDR") {
            let ip: IpAddr = raw
                .parse()
                .map_err(|_| Error::Config(format!("RELAY_BIND_ADDR is not an IP address: {}", raw)))?;
            config.bind_addr.set_ip(ip);
        }

        if let Some(raw) = lookup("PORT") {
            let port: u16 = raw
                .parse()
                .map_err(|_| Error::Config(format!("PORT is not a valid port: {}", raw)))?;
            config.bind_addr.set_port(port);
        }

        if let Some(path) = lookup("RELAY_PATH") {
            if !path.starts_with('/') {
                return Err(Error::Config(format!("RELAY_PATH must start with '/': {}", path)));
            }
            config.path = path;
        }

        if let Some(raw) = lookup("RELAY_MAX_CONNECTIONS") {
            config.max_connections = raw.parse().map_err(|_| {
                Error::Config(format!("RELAY_MAX_CONNECTIONS is not a number: {}", raw))
            })?;
        }

        if let Some(raw) = lookup("RELAY_HANDSHAKE_TIMEOUT_MS") {
            let millis: u64 = raw.parse().map_err(|_| {
                Error::Config(format!("RELAY_HANDSHAKE_TIMEOUT_MS is not a number: {}", raw))
            })?;
            config.handshake_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }
}
