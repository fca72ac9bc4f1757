//! Encrypted transport to the relay.
//!
//! This module turns an `ss://` descriptor into ready-to-use connections:
//! - [`descriptor`] parses the descriptor into cipher, secret and relay endpoint
//! - [`cipher`] resolves the method and derives keys
//! - [`stream`] frames a byte stream into sealed chunks
//! - [`address`] encodes the destination record the relay expects
//! - [`dialer`] ties them together behind the [`Dial`] trait
//!
//! # Example
//!
//! ```no_run
//! use ssproxy::transport::{ConnectionDescriptor, Dial, RelayDialer};
//! use tokio::io::AsyncWriteExt;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let descriptor: ConnectionDescriptor =
//!     "ss://YWVzLTI1Ni1nY206c2VjcmV0@relay.example.com:8388".parse()?;
//! let dialer = RelayDialer::new(&descriptor)?;
//!
//! let mut stream = dialer.dial("example.com:80").await?;
//! stream.write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod cipher;
pub mod descriptor;
pub mod dialer;
pub mod error;
pub mod stream;

pub use address::Address;
pub use cipher::{CipherKind, CipherStreamFactory};
pub use descriptor::ConnectionDescriptor;
pub use dialer::{Dial, RelayDialer};
pub use error::{AddressError, CipherError, DescriptorError, DialError};
pub use stream::EncryptedStream;
