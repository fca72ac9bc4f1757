//! Local HTTP proxy front end.
//!
//! This module provides the listener clients point their HTTP proxy setting
//! at:
//! - HTTP CONNECT tunneling through the relay
//! - Plain HTTP forwarding through the relay
//! - Bidirectional splicing of tunnel bytes
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  HTTP / CONNECT  ┌──────────────┐  AEAD stream  ┌───────┐
//!  │  Client  │─────────────────▶│ ProxyServer  │──────────────▶│ Relay │──▶ destination
//!  └──────────┘                  │ (127.0.0.1)  │  (RelayDialer)└───────┘
//!                                └──────────────┘
//! ```

pub mod connect;
pub mod error;
pub mod forward;
pub mod server;
pub mod splice;

// Re-export main types for convenient access
pub use connect::TunnelOptions;
pub use error::{ForwardError, ProxyError};
pub use forward::ForwardTransport;
pub use server::{DEFAULT_LISTEN_ADDR, ProxyConfig, ProxyServer, ProxyServerBuilder};
pub use splice::{SpliceSummary, splice};
