//! ssproxy: local HTTP proxy over a Shadowsocks relay
//!
//! This crate accepts plain HTTP proxy traffic on a local port and carries
//! every connection to its destination through a remote relay speaking the
//! Shadowsocks AEAD protocol. The relay is described by a single `ss://`
//! descriptor.
//!
//! # Architecture
//!
//! - **Transport**: descriptor parsing, AEAD stream framing and the relay dialer
//! - **Proxy**: hyper-based listener handling `CONNECT` tunnels and absolute-form forwarding
//! - **Config**: Hierarchical TOML configuration with CLI overrides

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod proxy;
pub mod transport;
