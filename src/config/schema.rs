//! Configuration schema definitions.
//!
//! This module defines the structure of the ssproxy configuration files.
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (`config/default.toml`)
//! 2. System config: `/etc/ssproxy/config.toml`
//! 3. User config: `~/.config/ssproxy/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::proxy::ProxyConfig;

/// Defaults compiled into the binary.
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Local listener settings.
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Relay settings.
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Config {
    /// The embedded default configuration.
    pub fn embedded() -> Result<Self, ConfigError> {
        toml::from_str(DEFAULT_CONFIG).map_err(|e| ConfigError::ParseError {
            path: "<embedded:default.toml>".into(),
            source: e,
        })
    }

    /// Merge another config into this one.
    ///
    /// Scalars are overridden when the other side sets them.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.proxy.merge(other.proxy);
        self.relay.merge(other.relay);
    }

    /// Check that the merged configuration can start a proxy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.url.trim().is_empty() {
            return Err(ConfigError::MissingValue {
                field: "relay.url",
                hint: "pass --url, set SSPROXY_URL, or add it to a config file",
            });
        }
        self.listen_addr()?;
        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.proxy
            .listen
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                field: "proxy.listen".to_string(),
                message: format!("'{}': {}", self.proxy.listen, e),
            })
    }

    /// Listener settings for [`crate::proxy::ProxyServer`].
    pub fn proxy_config(&self) -> Result<ProxyConfig, ConfigError> {
        Ok(ProxyConfig {
            listen_addr: self.listen_addr()?,
            strict_connect: self.proxy.strict_connect.unwrap_or(false),
            idle_timeout: secs(self.proxy.idle_timeout_secs),
        })
    }

    /// Relay connect timeout, `None` for the OS default.
    pub fn connect_timeout(&self) -> Option<Duration> {
        secs(self.relay.connect_timeout_secs)
    }
}

fn secs(value: Option<u64>) -> Option<Duration> {
    value.filter(|&v| v > 0).map(Duration::from_secs)
}

/// General application settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub log_level: String,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        // Scalars are overridden if non-default
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
    }
}

/// Local proxy listener settings.
///
/// Unset fields (`None`, empty strings) leave lower layers alone; any set
/// value, including `false` or `0`, replaces them.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProxySettings {
    /// Address to listen on (`ip:port`).
    #[serde(default)]
    pub listen: String,

    /// Dial the relay before answering CONNECT.
    #[serde(default)]
    pub strict_connect: Option<bool>,

    /// Tunnel idle timeout in seconds. 0 = no timeout.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

impl ProxySettings {
    fn merge(&mut self, other: ProxySettings) {
        if !other.listen.is_empty() {
            self.listen = other.listen;
        }
        if other.strict_connect.is_some() {
            self.strict_connect = other.strict_connect;
        }
        if other.idle_timeout_secs.is_some() {
            self.idle_timeout_secs = other.idle_timeout_secs;
        }
    }
}

/// Relay settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RelayConfig {
    /// `ss://` descriptor of the relay.
    #[serde(default)]
    pub url: String,

    /// TCP connect timeout to the relay in seconds. 0 = OS default.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl RelayConfig {
    fn merge(&mut self, other: RelayConfig) {
        if !other.url.is_empty() {
            self.url = other.url;
        }
        if other.connect_timeout_secs.is_some() {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
    }
}
