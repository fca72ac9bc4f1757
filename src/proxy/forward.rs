//! Plain HTTP forwarding (every method except CONNECT).
//!
//! The client sends an absolute-form request (`GET http://host/path`). We
//! rewrite it to origin form, open a fresh relay connection to `host:port`
//! and run one HTTP/1.1 exchange over it. The upstream response is streamed
//! back unchanged.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, combinators::BoxBody};
use hyper::body::{Body, Incoming};
use hyper::client::conn::http1;
use hyper::header::{HOST, HeaderValue};
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use tracing::{debug, trace, warn};

use super::connect::text_response;
use super::error::ForwardError;
use crate::transport::Dial;

const DEFAULT_HTTP_PORT: u16 = 80;

/// HTTP client whose only connection source is a [`Dial`] implementation.
///
/// Every round trip gets its own relay connection.
pub struct ForwardTransport<D> {
    dialer: Arc<D>,
}

impl<D> Clone for ForwardTransport<D> {
    fn clone(&self) -> Self {
        Self {
            dialer: Arc::clone(&self.dialer),
        }
    }
}

impl<D: Dial> ForwardTransport<D> {
    /// Create a transport dialing through `dialer`.
    pub fn new(dialer: Arc<D>) -> Self {
        Self { dialer }
    }

    /// Send `req` to the host named in its absolute URI and return the
    /// upstream response.
    pub async fn round_trip<B>(&self, req: Request<B>) -> Result<Response<Incoming>, ForwardError>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (target, req) = prepare_request(req)?;
        trace!("Forwarding {} {} via relay to {}", req.method(), req.uri(), target);

        let stream = self.dialer.dial(&target).await?;

        let (mut sender, conn) = http1::Builder::new()
            .preserve_header_case(true)
            .handshake(TokioIo::new(stream))
            .await?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Upstream connection ended: {}", e);
            }
        });

        Ok(sender.send_request(req).await?)
    }
}

/// Rewrite an absolute-form request for the upstream server.
///
/// Returns the `host:port` to dial together with the origin-form request.
/// `Host` is filled in from the URI when the client left it out.
fn prepare_request<B>(mut req: Request<B>) -> Result<(String, Request<B>), ForwardError> {
    let uri = req.uri();

    match uri.scheme_str() {
        Some("http") | None => {}
        Some(other) => {
            return Err(ForwardError::BuildRequest(format!(
                "unsupported scheme '{other}' (use CONNECT for TLS)"
            )));
        }
    }

    let authority = uri
        .authority()
        .ok_or_else(|| ForwardError::BuildRequest("missing host in request URI".into()))?
        .clone();
    if authority.host().is_empty() {
        return Err(ForwardError::BuildRequest("empty host in request URI".into()));
    }

    let port = authority.port_u16().unwrap_or(DEFAULT_HTTP_PORT);
    let target = format!("{}:{}", authority.host(), port);

    let path = match uri.query() {
        Some(query) => format!("{}?{}", uri.path(), query),
        None => uri.path().to_string(),
    };
    let origin: Uri = path
        .parse()
        .map_err(|e| ForwardError::BuildRequest(format!("invalid request path: {e}")))?;

    if !req.headers().contains_key(HOST) {
        let host = HeaderValue::from_str(authority.as_str())
            .map_err(|e| ForwardError::BuildRequest(format!("invalid Host header: {e}")))?;
        req.headers_mut().insert(HOST, host);
    }
    *req.uri_mut() = origin;

    Ok((target, req))
}

/// Forward a request and turn any failure into an error response.
pub async fn handle_forward<D: Dial>(
    req: Request<Incoming>,
    transport: &ForwardTransport<D>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    match transport.round_trip(req).await {
        Ok(response) => {
            debug!("{} {} -> {}", method, uri, response.status());
            response.map(|body| body.boxed())
        }
        Err(e) => {
            warn!("{} {} failed: {}", method, uri, e);
            text_response(e.status(), e.to_string())
        }
    }
}
