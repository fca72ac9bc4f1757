//! Configuration system for ssproxy.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (`config/default.toml`)
//! 2. System config: `/etc/ssproxy/config.toml`
//! 3. User config: `~/.config/ssproxy/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags and `SSPROXY_URL` (highest priority)
//!
//! Missing files are skipped, except one named with `--config`.
//!
//! # Example
//!
//! ```toml
//! [proxy]
//! listen = "127.0.0.1:8080"
//! strict_connect = true
//!
//! [relay]
//! url = "ss://YWVzLTI1Ni1nY206c2VjcmV0@relay.example.com:8388"
//! connect_timeout_secs = 10
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{Config, GeneralConfig, ProxySettings, RelayConfig};
