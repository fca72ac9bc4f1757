//! Command-line interface definitions for ssproxy.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Local HTTP proxy that tunnels through a Shadowsocks relay.
///
/// ssproxy listens for ordinary HTTP proxy traffic (including CONNECT for
/// HTTPS) and carries every connection to its destination through an
/// encrypted relay described by an `ss://` URL.
#[derive(Parser, Debug)]
#[command(name = "ssproxy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (or omit to start the proxy).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Relay descriptor (`ss://base64(method:password)@host:port`).
    ///
    /// Overrides `relay.url` from the config files.
    #[arg(short = 'u', long = "url", env = "SSPROXY_URL", value_name = "SS_URL")]
    pub url: Option<String>,

    /// Address to listen on (default 127.0.0.1:8080).
    #[arg(short = 'l', long = "listen", value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Dial the relay before answering CONNECT.
    ///
    /// Relay failures are then reported as `502 Bad Gateway` instead of a
    /// tunnel that closes right after `200 Connection Established`.
    #[arg(long = "strict-connect")]
    pub strict_connect: bool,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Subcommands for ssproxy.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse a relay descriptor and print what it contains.
    ///
    /// The password is never printed.
    Inspect {
        /// The `ss://` URL to inspect.
        #[arg(required = true)]
        url: String,
    },
}
