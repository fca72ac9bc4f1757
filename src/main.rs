//! ssproxy: local HTTP proxy over a Shadowsocks relay
//!
//! This is the entry point for the ssproxy binary. It handles CLI argument
//! parsing, configuration loading and logging setup, then runs the proxy
//! until Ctrl-C.
//!
//! Logs go to stderr. stdout is only used by the `inspect` subcommand.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ssproxy::{
    cli::{Cli, Commands},
    config::ConfigLoader,
    proxy::ProxyServer,
    transport::{CipherKind, ConnectionDescriptor, RelayDialer},
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    if let Some(Commands::Inspect { ref url }) = cli.command {
        return inspect(url);
    }

    // Load configuration with hierarchy merging
    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, &config.general.log_level)?;
    debug!(listen = %config.proxy.listen, "Configuration loaded");

    config.validate().context("Invalid configuration")?;

    let descriptor =
        ConnectionDescriptor::parse(&config.relay.url).context("Invalid relay URL")?;
    let mut dialer = RelayDialer::new(&descriptor).context("Unusable relay cipher")?;
    if let Some(timeout) = config.connect_timeout() {
        dialer = dialer.with_connect_timeout(timeout);
    }

    info!(
        method = %dialer.cipher(),
        server = %dialer.server(),
        "Using relay"
    );

    let proxy_config = config.proxy_config()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    ProxyServer::new(proxy_config, Arc::new(dialer), shutdown_rx)
        .run()
        .await
        .context("Proxy server failed")?;

    Ok(())
}

/// Print the parts of a relay descriptor, leaving out the password.
fn inspect(url: &str) -> Result<()> {
    let descriptor = ConnectionDescriptor::parse(url).context("Invalid relay URL")?;

    let method = match CipherKind::from_name(descriptor.cipher()) {
        Ok(kind) => kind.name().to_string(),
        Err(_) => format!("{} (unsupported)", descriptor.cipher()),
    };

    println!("method:  {}", method);
    println!("server:  {}", descriptor.server());
    if let Some(tag) = descriptor.tag() {
        println!("tag:     {}", tag);
    }
    for (key, value) in descriptor.options() {
        println!("option:  {}={}", key, value);
    }

    Ok(())
}

/// Initialize the tracing subscriber.
///
/// Precedence: `-v` flags, then `RUST_LOG`, then `general.log_level`, then `warn`.
///
/// # Verbosity Levels
/// - 0 (default): environment or config
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, log_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let fallback = if log_level.is_empty() { "warn" } else { log_level };

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(fallback))
            .unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
