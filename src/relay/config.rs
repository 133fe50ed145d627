//! Relay configuration

use std::time::Duration;

use crate::engine::{FilterConfig, MediaChain};
use crate::error::{Error, Result};

/// Default Kurento media server address
pub const DEFAULT_MEDIA_SERVER_URI: &str = "ws://localhost:8888/kurento";

/// Session relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Media server WebSocket address
    pub media_server_uri: String,

    /// Per-request engine timeout (None = wait indefinitely)
    pub engine_timeout: Option<Duration>,

    /// Processing stages between the presenter and its viewers
    pub chain: MediaChain,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            media_server_uri: DEFAULT_MEDIA_SERVER_URI.to_string(),
            engine_timeout: None,
            chain: MediaChain::direct(),
        }
    }
}

impl RelayConfig {
    /// Set the media server address
    pub fn media_server_uri(mut self, uri: impl Into<String>) -> Self {
        self.media_server_uri = uri.into();
        self
    }

    /// Set the engine request timeout
    pub fn engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = Some(timeout);
        self
    }

    /// Set the media chain
    pub fn chain(mut self, chain: MediaChain) -> Self {
        self.chain = chain;
        self
    }

    /// Load from process environment
    ///
    /// Reads `KMS_WS_URI`, `RELAY_ENGINE_TIMEOUT_MS` and
    /// `RELAY_OVERLAY_COMMAND` (a GStreamer pipeline description inserted as
    /// a single filter stage).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(uri) = lookup("KMS_WS_URI") {
            if !uri.starts_with("ws://") && !uri.starts_with("wss://") {
                return Err(Error::Config(format!(
                    "KMS_WS_URI must be a ws:// or wss:// address, got {}",
                    uri
                )));
            }
            config.media_server_uri = uri;
        }

        if let Some(raw) = lookup("RELAY_ENGINE_TIMEOUT_MS") {
            let millis: u64 = raw.parse().map_err(|_| {
                Error::Config(format!("RELAY_ENGINE_TIMEOUT_MS is not a number: {}", raw))
            })?;
            config.engine_timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }

        if let Some(command) = lookup("RELAY_OVERLAY_COMMAND") {
            if !command.trim().is_empty() {
                config.chain = MediaChain::direct().with_filter(FilterConfig::gstreamer(command));
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.media_server_uri, DEFAULT_MEDIA_SERVER_URI);
        assert_eq!(config.engine_timeout, None);
        assert!(config.chain.is_direct());
    }

    #[test]
    fn test_from_lookup() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("KMS_WS_URI", "ws://kms:8888/kurento"),
            ("RELAY_ENGINE_TIMEOUT_MS", "2500"),
            ("RELAY_OVERLAY_COMMAND", "textoverlay text=live"),
        ]))
        .unwrap();

        assert_eq!(config.media_server_uri, "ws://kms:8888/kurento");
        assert_eq!(config.engine_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.chain.filters().len(), 1);
        assert_eq!(config.chain.filters()[0].kind, "GStreamerFilter");
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = RelayConfig::from_lookup(lookup(&[("RELAY_ENGINE_TIMEOUT_MS", "0")])).unwrap();
        assert_eq!(config.engine_timeout, None);
    }

    #[test]
    fn test_invalid_values() {
        let bad_uri = RelayConfig::from_lookup(lookup(&[("KMS_WS_URI", "http://kms")]));
        assert!(matches!(bad_uri, Err(Error::Config(_))));

        let bad_timeout = RelayConfig::from_lookup(lookup(&[("RELAY_ENGINE_TIMEOUT_MS", "soon")]));
        assert!(matches!(bad_timeout, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_chaining() {
        let config = RelayConfig::default()
            .media_server_uri("ws://10.0.0.5:8888/kurento")
            .engine_timeout(Duration::from_secs(3))
            .chain(MediaChain::direct().with_filter(FilterConfig::new("FaceOverlayFilter")));

        assert_eq!(config.media_server_uri, "ws://10.0.0.5:8888/kurento");
        assert_eq!(config.engine_timeout, Some(Duration::from_secs(3)));
        assert!(!config.chain.is_direct());
    }
}
