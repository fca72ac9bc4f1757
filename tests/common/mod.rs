//! Shared helpers for the end-to-end tests: an in-process relay and a proxy
//! wired to it.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use ssproxy::proxy::{ProxyConfig, ProxyServer};
use ssproxy::transport::{
    Address, CipherStreamFactory, ConnectionDescriptor, EncryptedStream, RelayDialer,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

pub const TEST_CIPHER: &str = "chacha20-ietf-poly1305";
pub const TEST_SECRET: &str = "integration-secret";

/// What the mock relay does after reading the address record.
#[derive(Debug, Clone, Copy)]
pub enum RelayMode {
    /// Send every byte straight back.
    Echo,
    /// Read one request head, answer with the given raw response and close.
    Http(&'static str),
}

/// One connection as observed by the relay.
#[derive(Debug)]
pub struct Seen {
    pub destination: Address,
    pub request_head: Option<String>,
}

pub struct MockRelay {
    pub addr: SocketAddr,
    pub seen: mpsc::UnboundedReceiver<Seen>,
}

/// Start a relay on an ephemeral loopback port.
pub async fn spawn_relay(mode: RelayMode) -> MockRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let factory = CipherStreamFactory::new(TEST_CIPHER, TEST_SECRET).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let stream = factory.wrap(tcp);
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = serve_relay_connection(stream, mode, tx).await;
            });
        }
    });

    MockRelay { addr, seen: rx }
}

async fn serve_relay_connection(
    mut stream: EncryptedStream<TcpStream>,
    mode: RelayMode,
    tx: mpsc::UnboundedSender<Seen>,
) -> io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 16 * 1024];

    let (destination, used) = loop {
        if let Some(found) = Address::decode(&buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        {
            break found;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    };
    buf.drain(..used);

    match mode {
        RelayMode::Echo => {
            let _ = tx.send(Seen {
                destination,
                request_head: None,
            });
            if !buf.is_empty() {
                stream.write_all(&buf).await?;
                stream.flush().await?;
            }
            loop {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                stream.write_all(&chunk[..n]).await?;
                stream.flush().await?;
            }
        }
        RelayMode::Http(response) => {
            let end = loop {
                if let Some(pos) = find_head_end(&buf) {
                    break pos;
                }
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Ok(());
                }
                buf.extend_from_slice(&chunk[..n]);
            };
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            let _ = tx.send(Seen {
                destination,
                request_head: Some(head),
            });
            stream.write_all(response.as_bytes()).await?;
            stream.flush().await?;
        }
    }

    stream.shutdown().await
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// A running proxy. Dropping it shuts the listener down.
pub struct TestProxy {
    pub addr: SocketAddr,
    _shutdown: watch::Sender<bool>,
}

/// Start a proxy on an ephemeral port, dialing the relay at `relay`.
pub async fn spawn_proxy(relay: SocketAddr, strict_connect: bool) -> TestProxy {
    let descriptor =
        ConnectionDescriptor::new(TEST_CIPHER, TEST_SECRET, relay.to_string()).unwrap();
    let dialer = Arc::new(RelayDialer::new(&descriptor).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let config = ProxyConfig {
        listen_addr: addr,
        strict_connect,
        idle_timeout: None,
    };
    let server = ProxyServer::new(config, dialer, shutdown_rx);
    tokio::spawn(server.serve(listener));

    TestProxy {
        addr,
        _shutdown: shutdown_tx,
    }
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Read a response head one byte at a time so no body bytes are consumed.
pub async fn read_head<R: AsyncRead + Unpin>(reader: &mut R) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = reader.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed inside response head: {:?}", head);
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Open a CONNECT tunnel through the proxy and return the stream after the
/// response head.
pub async fn open_tunnel(proxy: SocketAddr, target: &str) -> (TcpStream, String) {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();
    let head = read_head(&mut client).await;
    (client, head)
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
