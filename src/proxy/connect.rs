//! HTTP CONNECT method handling for tunneling through the relay.
//!
//! The flow is:
//!
//! 1. Client sends: `CONNECT api.example.com:443 HTTP/1.1`
//! 2. Proxy returns `200 Connection Established` and takes over the raw
//!    connection once hyper hands it back
//! 3. Proxy dials the relay for `api.example.com:443`
//! 4. Bytes are spliced between the client and the relay until either side
//!    closes
//!
//! Once the status line is out there is no way to report a failed dial to the
//! client; the connection is simply closed. With strict CONNECT enabled the
//! dial happens before the response instead, and a failure becomes
//! `502 Bad Gateway`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::ext::ReasonPhrase;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::{debug, warn};

use super::error::{ProxyError, is_disconnect};
use super::splice::splice;
use crate::transport::Dial;

/// Port assumed when a CONNECT target omits one.
const DEFAULT_CONNECT_PORT: u16 = 443;

/// Per-tunnel behaviour shared by every CONNECT request.
#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelOptions {
    /// Dial the relay before answering, so failures become `502`.
    pub strict_connect: bool,
    /// End tunnels that move no bytes for this long.
    pub idle_timeout: Option<Duration>,
}

/// Handle an HTTP CONNECT request.
///
/// Returns the response for the CONNECT itself; the tunnel runs in a
/// spawned task once hyper completes the upgrade.
pub async fn handle_connect<D: Dial>(
    req: Request<Incoming>,
    dialer: Arc<D>,
    options: TunnelOptions,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ProxyError> {
    let target = match connect_target(&req) {
        Ok(target) => target,
        Err(e) => {
            debug!("Rejecting CONNECT: {}", e);
            return Ok(text_response(StatusCode::BAD_REQUEST, e.to_string()));
        }
    };

    debug!("CONNECT request to {}", target);

    let relay = if options.strict_connect {
        match dialer.dial(&target).await {
            Ok(relay) => Some(relay),
            Err(e) => {
                warn!("Relay dial for {} failed: {}", target, e);
                return Ok(text_response(StatusCode::BAD_GATEWAY, e.to_string()));
            }
        }
    } else {
        None
    };

    establish_tunnel(req, target, dialer, relay, options.idle_timeout);
    Ok(connection_established())
}

/// Extract `host:port` from the CONNECT authority, defaulting the port.
fn connect_target<B>(req: &Request<B>) -> Result<String, ProxyError> {
    let authority = req
        .uri()
        .authority()
        .ok_or_else(|| ProxyError::InvalidConnect("Missing authority in CONNECT request".into()))?;

    if authority.host().is_empty() {
        return Err(ProxyError::InvalidConnect("Empty host in CONNECT request".into()));
    }

    Ok(match authority.port_u16() {
        Some(_) => authority.as_str().to_string(),
        None => format!("{}:{}", authority.host(), DEFAULT_CONNECT_PORT),
    })
}

/// Spawn the task that waits for the upgrade and runs the tunnel.
///
/// `relay` is the pre-dialed connection in strict mode; otherwise the dial
/// happens after the upgrade.
fn establish_tunnel<D: Dial>(
    req: Request<Incoming>,
    target: String,
    dialer: Arc<D>,
    relay: Option<D::Stream>,
    idle_timeout: Option<Duration>,
) {
    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!("HTTP upgrade failed for {}: {}", target, e);
                return;
            }
        };
        let client = TokioIo::new(upgraded);

        let relay = match relay {
            Some(relay) => relay,
            None => match dialer.dial(&target).await {
                Ok(relay) => relay,
                Err(e) => {
                    // The client already has its 200; dropping closes it.
                    warn!("Relay dial for {} failed: {}", target, e);
                    return;
                }
            },
        };

        debug!("Tunnel open to {}", target);
        let summary = splice(client, relay, idle_timeout).await;

        match &summary.error {
            Some(e) if !is_disconnect(e) => {
                warn!(
                    "Tunnel to {} ended with error after {}/{} bytes: {}",
                    target, summary.a_to_b, summary.b_to_a, e
                );
            }
            _ => {
                debug!(
                    "Tunnel to {} closed ({} bytes up, {} bytes down{})",
                    target,
                    summary.a_to_b,
                    summary.b_to_a,
                    if summary.idle_timeout { ", idle" } else { "" }
                );
            }
        }
    });
}

/// `200 Connection Established` with the reason phrase spelled out.
fn connection_established() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(empty_body());
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(b"Connection Established"));
    response
}

/// Create an empty response body.
pub(crate) fn empty_body() -> BoxBody<Bytes, hyper::Error> {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Create a response body with content.
pub(crate) fn full_body(content: String) -> BoxBody<Bytes, hyper::Error> {
    Full::new(Bytes::from(content))
        .map_err(|never| match never {})
        .boxed()
}

/// Plain-text response carrying an error message.
pub(crate) fn text_response(
    status: StatusCode,
    message: String,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full_body(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;

    fn connect_request(target: &str) -> Request<()> {
        Request::builder()
            .method(Method::CONNECT)
            .uri(target)
            .body(())
            .unwrap()
    }

    #[test]
    fn test_connect_target_with_port() {
        let req = connect_request("api.example.com:8443");
        assert_eq!(connect_target(&req).unwrap(), "api.example.com:8443");
    }

    #[test]
    fn test_connect_target_default_port() {
        let req = connect_request("api.example.com");
        assert_eq!(connect_target(&req).unwrap(), "api.example.com:443");
    }

    #[test]
    fn test_connect_target_ipv6() {
        let req = connect_request("[::1]:443");
        assert_eq!(connect_target(&req).unwrap(), "[::1]:443");
    }

    #[test]
    fn test_connect_target_missing_authority() {
        let req = connect_request("/just/a/path");
        assert!(matches!(
            connect_target(&req),
            Err(ProxyError::InvalidConnect(_))
        ));
    }

    #[test]
    fn test_connection_established_reason() {
        let response = connection_established();
        assert_eq!(response.status(), StatusCode::OK);
        let reason = response.extensions().get::<ReasonPhrase>().unwrap();
        assert_eq!(reason.as_bytes(), b"Connection Established");
    }

    #[test]
    fn test_text_response() {
        let response = text_response(StatusCode::BAD_GATEWAY, "relay down".to_string());
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}
