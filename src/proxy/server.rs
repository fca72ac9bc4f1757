//! HTTP proxy server implementation.
//!
//! This module provides the main proxy server that:
//! - Listens for client connections on a TCP address
//! - Handles HTTP CONNECT by tunneling through the relay
//! - Forwards every other method through the relay
//!
//! # Architecture
//!
//! The proxy uses hyper's HTTP/1.1 server with upgrade support for CONNECT.
//! Each connection is handled in a separate Tokio task. All outbound traffic
//! goes through a single shared [`Dial`] implementation.
//!
//! # Example
//!
//! ```no_run
//! use ssproxy::proxy::{ProxyConfig, ProxyServer};
//! use ssproxy::transport::{ConnectionDescriptor, RelayDialer};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let descriptor: ConnectionDescriptor =
//!     "ss://YWVzLTI1Ni1nY206c2VjcmV0@relay.example.com:8388".parse()?;
//! let dialer = Arc::new(RelayDialer::new(&descriptor)?);
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let server = ProxyServer::new(ProxyConfig::default(), dialer, shutdown_rx);
//! server.run().await?;
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::connect::{TunnelOptions, handle_connect};
use super::error::ProxyError;
use super::forward::{ForwardTransport, handle_forward};
use crate::transport::Dial;

/// Default listen address. Loopback only, since clients are not authenticated.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Dial the relay before answering CONNECT.
    pub strict_connect: bool,
    /// End tunnels idle for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            strict_connect: false,
            idle_timeout: None,
        }
    }
}

impl ProxyConfig {
    fn tunnel_options(&self) -> TunnelOptions {
        TunnelOptions {
            strict_connect: self.strict_connect,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// State shared by every connection handler.
struct Shared<D> {
    dialer: Arc<D>,
    forward: ForwardTransport<D>,
    tunnel: TunnelOptions,
}

/// The main proxy server.
pub struct ProxyServer<D> {
    config: ProxyConfig,
    shared: Arc<Shared<D>>,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl<D: Dial> ProxyServer<D> {
    /// Create a new proxy server.
    ///
    /// # Arguments
    ///
    /// * `config` - Proxy configuration.
    /// * `dialer` - Connection source for both tunnels and forwarded requests.
    /// * `shutdown_rx` - Receiver for shutdown signal.
    pub fn new(config: ProxyConfig, dialer: Arc<D>, shutdown_rx: watch::Receiver<bool>) -> Self {
        let shared = Arc::new(Shared {
            forward: ForwardTransport::new(Arc::clone(&dialer)),
            dialer,
            tunnel: config.tunnel_options(),
        });

        Self {
            config,
            shared,
            shutdown_rx,
        }
    }

    /// The configuration this server was built with.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: self.config.listen_addr.to_string(),
                source,
            })?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        info!("Proxy listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_rx.clone();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("Accepted connection from {}", peer);
                            self.spawn_connection_handler(stream);
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender also means nobody can keep us running.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Proxy shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Spawn a task to handle a single connection.
    fn spawn_connection_handler(&self, stream: TcpStream) {
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, shared).await {
                // Don't log client disconnects as errors - they're common
                if e.is_disconnect() {
                    debug!("Connection ended: {}", e);
                } else {
                    warn!("Connection error: {}", e);
                }
            }
        });
    }
}

/// Handle a single client connection.
async fn handle_connection<D: Dial>(
    stream: TcpStream,
    shared: Arc<Shared<D>>,
) -> Result<(), ProxyError> {
    let _ = stream.set_nodelay(true);
    let io = TokioIo::new(stream);

    // Create the service that handles each request
    let service = service_fn(move |req: Request<Incoming>| {
        let shared = Arc::clone(&shared);
        async move { proxy_request(req, shared).await }
    });

    // Serve HTTP/1.1 with support for upgrades (needed for CONNECT).
    // Forwarded responses keep the upstream's header case and no Date is added.
    http1::Builder::new()
        .preserve_header_case(true)
        .auto_date_header(false)
        .serve_connection(io, service)
        .with_upgrades()
        .await
        .map_err(ProxyError::from)
}

/// Process a single proxy request.
async fn proxy_request<D: Dial>(
    req: Request<Incoming>,
    shared: Arc<Shared<D>>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ProxyError> {
    if req.method() == Method::CONNECT {
        handle_connect(req, Arc::clone(&shared.dialer), shared.tunnel).await
    } else {
        Ok(handle_forward(req, &shared.forward).await)
    }
}

/// Builder for ProxyServer configuration.
#[derive(Debug, Clone, Default)]
pub struct ProxyServerBuilder {
    config: ProxyConfig,
}

impl ProxyServerBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen address.
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.config.listen_addr = addr;
        self
    }

    /// Dial before answering CONNECT.
    pub fn strict_connect(mut self, strict: bool) -> Self {
        self.config.strict_connect = strict;
        self
    }

    /// Set the tunnel idle timeout. `None` disables it.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Build the proxy server.
    ///
    /// # Arguments
    ///
    /// * `dialer` - Connection source.
    /// * `shutdown_rx` - Receiver for shutdown signal.
    pub fn build<D: Dial>(self, dialer: Arc<D>, shutdown_rx: watch::Receiver<bool>) -> ProxyServer<D> {
        ProxyServer::new(self.config, dialer, shutdown_rx)
    }
}
