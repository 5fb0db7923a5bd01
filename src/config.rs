//! Configuration for voice-overlay

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::RpcError;

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voice-overlay")
        .join("config.toml")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application id presented to the RPC endpoint and used for AUTHORIZE
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Host the desktop application listens on
    #[serde(default = "default_host")]
    pub host: String,

    /// First port of the rotation
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Number of consecutive ports tried, starting at `base_port`
    #[serde(default = "default_port_range")]
    pub port_range: u16,

    /// RPC protocol version query parameter
    #[serde(default = "default_rpc_version")]
    pub rpc_version: u32,

    /// Origin header sent on the WebSocket upgrade, also the overlay site root
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Endpoint that trades an authorization code for an access token
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Scopes requested with AUTHORIZE
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Fixed delay before every reconnect
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Upper bound on a single connect attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound on the token exchange HTTP call
    #[serde(default = "default_token_timeout_ms")]
    pub token_timeout_ms: u64,

    /// Reconnect instead of stalling when the handshake is rejected
    #[serde(default)]
    pub reconnect_on_auth_failure: bool,
}

fn default_client_id() -> String {
    "207646673902501888".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_base_port() -> u16 {
    6463
}

fn default_port_range() -> u16 {
    10
}

fn default_rpc_version() -> u32 {
    1
}

fn default_origin() -> String {
    "https://streamkit.discord.com".to_string()
}

fn default_token_url() -> String {
    "https://streamkit.discord.com/overlay/token".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["rpc".to_string(), "messages.read".to_string()]
}

fn default_reconnect_delay_ms() -> u64 {
    250
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_token_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            host: default_host(),
            base_port: default_base_port(),
            port_range: default_port_range(),
            rpc_version: default_rpc_version(),
            origin: default_origin(),
            token_url: default_token_url(),
            scopes: default_scopes(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            token_timeout_ms: default_token_timeout_ms(),
            reconnect_on_auth_failure: false,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RpcError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RpcError::Config(format!("Invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RpcError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RpcError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the supervisor cannot work with.
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.port_range == 0 {
            return Err(RpcError::Config("port_range must be at least 1".into()));
        }
        if self.client_id.is_empty() {
            return Err(RpcError::Config("client_id must not be empty".into()));
        }
        let last_port = u32::from(self.base_port) + u32::from(self.port_range) - 1;
        if last_port > u32::from(u16::MAX) {
            return Err(RpcError::Config(format!(
                "base_port {} + port_range {} exceeds port {}",
                self.base_port,
                self.port_range,
                u16::MAX
            )));
        }
        self.endpoint_url(0)?;
        Ok(())
    }

    /// Port for the given attempt: `base_port + attempt mod port_range`.
    pub fn port_for_attempt(&self, attempt: u64) -> u16 {
        let range = u64::from(self.port_range.max(1));
        let offset = (attempt % range) as u16;
        self.base_port.wrapping_add(offset)
    }

    /// Full WebSocket URL for the given attempt.
    pub fn endpoint_url(&self, attempt: u64) -> Result<String, RpcError> {
        let base = format!("ws://{}:{}/", self.host, self.port_for_attempt(attempt));
        let mut url = Url::parse(&base)
            .map_err(|e| RpcError::Config(format!("Invalid endpoint {}: {}", base, e)))?;
        url.query_pairs_mut()
            .append_pair("v", &self.rpc_version.to_string())
            .append_pair("client_id", &self.client_id);
        Ok(url.to_string())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_millis(self.token_timeout_ms)
    }

    /// Absolute overlay URL for a navigation path.
    pub fn overlay_url(&self, path: &str) -> String {
        format!("{}{}", self.origin.trim_end_matches('/'), path)
    }
}
