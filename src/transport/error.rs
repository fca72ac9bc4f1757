//! Error types for the relay transport.
//!
//! This module defines structured errors for each stage of reaching the relay:
//! - Descriptor errors (malformed `ss://` URL, bad base64)
//! - Cipher errors (unknown method, key derivation, AEAD failures)
//! - Address errors (destination cannot be framed)
//! - Dial errors (TCP connect or address handshake failed)

use std::io;
use thiserror::Error;

/// Errors from parsing a connection descriptor.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The descriptor does not have the expected shape.
    #[error("Malformed descriptor: {0}")]
    Format(String),

    /// The credentials segment is not valid base64.
    #[error("Failed to decode credentials: {0}")]
    Decode(String),
}

impl DescriptorError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        DescriptorError::Format(msg.into())
    }
}

impl From<base64::DecodeError> for DescriptorError {
    fn from(err: base64::DecodeError) -> Self {
        DescriptorError::Decode(err.to_string())
    }
}

/// Errors from the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The cipher name is not in the registry.
    #[error("Unsupported cipher: {0}")]
    Unsupported(String),

    /// Key material has the wrong length for the cipher.
    #[error("Invalid key length for {cipher}")]
    InvalidKey {
        /// Canonical cipher name.
        cipher: &'static str,
    },

    /// HKDF could not produce the session subkey.
    #[error("Subkey derivation failed")]
    KeyDerivation,

    /// Sealing a chunk failed.
    #[error("Encryption failed")]
    Seal,

    /// A chunk failed authentication.
    #[error("Decryption failed: chunk authentication error")]
    Open,
}

impl From<CipherError> for io::Error {
    fn from(err: CipherError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Errors from encoding a destination address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The destination is not a usable `host:port`.
    #[error("Invalid destination '{addr}': {reason}")]
    Invalid {
        /// The destination as given.
        addr: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Domain names are length-prefixed with a single byte.
    #[error("Domain name is {0} bytes, the limit is 255")]
    DomainTooLong(usize),

    /// Unknown address type tag while decoding.
    #[error("Unknown address type 0x{0:02x}")]
    UnknownType(u8),
}

/// Errors from dialing the relay.
#[derive(Debug, Error)]
pub enum DialError {
    /// TCP connection to the relay failed.
    #[error("Failed to connect to relay '{addr}': {source}")]
    Connect {
        /// Relay address we tried.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The destination could not be encoded.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// Writing the address record failed.
    #[error("Failed to send destination to relay: {0}")]
    Handshake(#[source] io::Error),
}
