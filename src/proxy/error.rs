//! Error types for proxy operations.
//!
//! This module defines structured error types for the front end:
//! - Server errors (binding, serving a client connection)
//! - Tunnel errors (bad CONNECT target)
//! - Forwarding errors (request construction, relay transport)

use hyper::StatusCode;
use thiserror::Error;

use crate::transport::DialError;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The listener could not be bound.
    #[error("Failed to bind proxy listener on {addr}: {source}")]
    Bind {
        /// The address we tried to bind to.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid CONNECT request.
    #[error("Invalid CONNECT request: {0}")]
    InvalidConnect(String),

}

impl ProxyError {
    /// Whether this is the client going away rather than a real fault.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProxyError::Io(e) => is_disconnect(e),
            ProxyError::Http(e) => e.is_incomplete_message() || e.is_canceled(),
            _ => false,
        }
    }
}

/// Connection resets and the like end sessions all the time.
pub fn is_disconnect(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

/// Failures of a forwarded (non-CONNECT) request.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The outbound request could not be constructed.
    #[error("Failed to build upstream request: {0}")]
    BuildRequest(String),

    /// The relay connection could not be opened.
    #[error("Failed to reach upstream through relay: {0}")]
    Dial(#[from] DialError),

    /// The HTTP exchange over the relay connection failed.
    #[error("Upstream HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),
}

impl ForwardError {
    /// Status reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::BuildRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ForwardError::Dial(_) | ForwardError::Http(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}
