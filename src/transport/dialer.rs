//! Relay dialer: one fresh encrypted connection per destination.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::address::Address;
use super::cipher::{CipherKind, CipherStreamFactory};
use super::descriptor::ConnectionDescriptor;
use super::error::{CipherError, DialError};
use super::stream::EncryptedStream;

/// Source of connections to a logical destination.
///
/// The proxy front end only ever reaches the outside world through this
/// trait, which keeps it testable against in-process relays.
pub trait Dial: Send + Sync + 'static {
    /// Byte stream to the destination.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a connection that carries bytes to and from `destination`
    /// (`host:port`).
    fn dial(
        &self,
        destination: &str,
    ) -> impl Future<Output = Result<Self::Stream, DialError>> + Send;
}

/// Dials the relay from a connection descriptor.
#[derive(Debug, Clone)]
pub struct RelayDialer {
    descriptor: ConnectionDescriptor,
    factory: CipherStreamFactory,
    connect_timeout: Option<Duration>,
}

impl RelayDialer {
    /// Resolve the descriptor's cipher. Fails for unsupported methods.
    pub fn new(descriptor: &ConnectionDescriptor) -> Result<Self, CipherError> {
        let factory = CipherStreamFactory::new(descriptor.cipher(), descriptor.secret())?;
        Ok(Self {
            descriptor: descriptor.clone(),
            factory,
            connect_timeout: None,
        })
    }

    /// Bound the TCP connect to the relay. Without it the OS default applies.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Relay endpoint (`host:port`).
    pub fn server(&self) -> &str {
        self.descriptor.server()
    }

    /// Cipher negotiated with the relay.
    pub fn cipher(&self) -> CipherKind {
        self.factory.kind()
    }

    /// The descriptor this dialer was built from.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    async fn connect_relay(&self) -> Result<TcpStream, DialError> {
        let server = self.descriptor.server();
        bounded_connect(self.connect_timeout, TcpStream::connect(server))
            .await
            .map_err(|source| DialError::Connect {
                addr: server.to_string(),
                source,
            })
    }
}

/// Run `connect`, failing with `TimedOut` once `limit` passes.
async fn bounded_connect<T>(
    limit: Option<Duration>,
    connect: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    let Some(limit) = limit else {
        return connect.await;
    };
    match tokio::time::timeout(limit, connect).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect timed out after {limit:?}"),
        )),
    }
}

impl Dial for RelayDialer {
    type Stream = EncryptedStream<TcpStream>;

    async fn dial(&self, destination: &str) -> Result<Self::Stream, DialError> {
        let tcp = self.connect_relay().await?;
        let _ = tcp.set_nodelay(true);
        let mut stream = self.factory.wrap(tcp);

        // Dropping `stream` on any error below closes the relay connection.
        let header = Address::parse(destination)?.encode()?;
        trace!(destination, bytes = header.len(), "Sending address record");

        stream
            .write_all(&header)
            .await
            .map_err(DialError::Handshake)?;
        stream.flush().await.map_err(DialError::Handshake)?;

        debug!(
            relay = %self.descriptor.server(),
            destination,
            "Relay connection established"
        );
        Ok(stream)
    }
}
