//! Server and client configuration.
//!
//! Every field has a working default, so both structs can be used without
//! a config file. When one is given, missing keys fall back to the
//! defaults too.
//!
//! ```toml
//! bind_addr = "0.0.0.0:8080"
//! allowed_origins = ["https://chat.example.com"]
//! ping_interval_ms = 9000
//! pong_wait_ms = 10000
//! ```

use std::path::Path;
use std::time::Duration;

use chatwire_session::{DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Settings for a [`ChatServer`](crate::ChatServer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,
    /// Origins allowed to upgrade. Empty means any origin, or none.
    pub allowed_origins: Vec<String>,
    /// Largest inbound frame accepted; bigger frames close the connection.
    pub max_frame_bytes: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
    /// How often the server pings each client.
    pub ping_interval_ms: u64,
    /// How long a client may stay silent before it is dropped.
    pub pong_wait_ms: u64,
    /// How long an unredeemed one-time token stays valid.
    pub otp_retention_ms: u64,
    /// How often expired one-time tokens are swept.
    pub otp_sweep_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            allowed_origins: Vec::new(),
            max_frame_bytes: 512,
            outbound_queue: 64,
            ping_interval_ms: 9_000,
            pong_wait_ms: 10_000,
            otp_retention_ms: duration_ms(DEFAULT_RETENTION),
            otp_sweep_interval_ms: duration_ms(DEFAULT_SWEEP_INTERVAL),
        }
    }
}

impl ServerConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads `path`, or returns the defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_or_default(path.as_ref())
    }

    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    pub fn outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity;
        self
    }

    pub fn keepalive(mut self, ping_interval: Duration, pong_wait: Duration) -> Self {
        self.ping_interval_ms = duration_ms(ping_interval);
        self.pong_wait_ms = duration_ms(pong_wait);
        self
    }

    pub fn otp_retention(mut self, retention: Duration) -> Self {
        self.otp_retention_ms = duration_ms(retention);
        self
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn otp_retention_period(&self) -> Duration {
        Duration::from_millis(self.otp_retention_ms)
    }

    pub fn otp_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.otp_sweep_interval_ms.max(1))
    }
}

/// Settings for a [`ChatClient`](crate::ChatClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint; the one-time token is appended as `otp=`.
    pub ws_url: String,
    /// Capacity of the outbound queue.
    pub outbound_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/ws".into(),
            outbound_queue: 64,
        }
    }
}

impl ClientConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_or_default(path.as_ref())
    }

    pub fn outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity;
        self
    }

    /// The upgrade URL carrying `token`.
    pub(crate) fn upgrade_url(&self, token: &str) -> String {
        let separator = if self.ws_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}otp={token}", self.ws_url)
    }
}

fn load_or_default<T>(path: &Path) -> Result<T, ConfigError>
where
    T: Default + serde::de::DeserializeOwned,
{
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Ok(T::default())
        }
        Err(source) => Err(ConfigError::Read {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults_match_keepalive_timings() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.max_frame_bytes, 512);
        assert_eq!(cfg.ping_interval(), Duration::from_secs(9));
        assert_eq!(cfg.pong_wait(), Duration::from_secs(10));
        assert!(cfg.ping_interval() < cfg.pong_wait());
        assert_eq!(cfg.otp_retention_period(), Duration::from_secs(5));
        assert_eq!(cfg.otp_sweep_interval(), Duration::from_millis(400));
    }

    #[test]
    fn test_server_config_from_partial_toml() {
        let cfg = ServerConfig::from_toml_str(
            r#"
            bind_addr = "0.0.0.0:9000"
            allowed_origins = ["https://chat.example.com"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
        assert_eq!(cfg.allowed_origins, vec!["https://chat.example.com"]);
        assert_eq!(cfg.outbound_queue, 64);
    }

    #[test]
    fn test_server_config_rejects_wrong_types() {
        let result = ServerConfig::from_toml_str("max_frame_bytes = \"big\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let cfg = ServerConfig::load("/nonexistent/chatwire.toml").unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_builder_methods_chain() {
        let cfg = ServerConfig::default()
            .bind_addr("127.0.0.1:0")
            .allow_origin("http://localhost")
            .keepalive(Duration::from_millis(50), Duration::from_millis(120));

        assert_eq!(cfg.bind_addr, "127.0.0.1:0");
        assert_eq!(cfg.allowed_origins.len(), 1);
        assert_eq!(cfg.ping_interval_ms, 50);
        assert_eq!(cfg.pong_wait_ms, 120);
    }

    #[test]
    fn test_upgrade_url_appends_token() {
        let cfg = ClientConfig::new("ws://localhost:8080/ws");
        assert_eq!(cfg.upgrade_url("abc"), "ws://localhost:8080/ws?otp=abc");

        let cfg = ClientConfig::new("ws://localhost:8080/ws?v=1");
        assert_eq!(cfg.upgrade_url("abc"), "ws://localhost:8080/ws?v=1&otp=abc");
    }
}
