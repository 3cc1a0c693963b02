//! Error taxonomy for the relay engine and its collaborators.

use hyper::header::{CONNECTION, CONTENT_TYPE, HeaderValue};
use hyper::{Body, Response, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Unparsable method, target or headers. Never forwarded.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Tunnel destination is not on the whitelist.
    #[error("Tunnel to {host}:{port} rejected by whitelist")]
    WhitelistRejected { host: String, port: u16 },

    /// DNS, connect, TLS handshake or timeout failure while reaching the origin.
    #[error("Upstream '{target}' unavailable: {reason}")]
    UpstreamUnavailable { target: String, reason: String },

    /// The outbound TLS policy cannot be built or was installed twice.
    #[error("TLS policy misconfigured: {0}")]
    TlsPolicyMisconfigured(String),

    /// The request already passed through this proxy (its own `Via` entry is present).
    #[error("Forwarding loop detected for {0}")]
    LoopDetected(String),

    /// Mid-transfer failure on either leg of a relay or tunnel.
    #[error("Relay I/O error: {0}")]
    RelayIo(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    pub fn upstream(target: impl ToString, reason: impl ToString) -> Self {
        ProxyError::UpstreamUnavailable { target: target.to_string(), reason: reason.to_string() }
    }

    /// Status code reported to the client for a per-request failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::WhitelistRejected { .. } => StatusCode::FORBIDDEN,
            ProxyError::LoopDetected(_) => StatusCode::LOOP_DETECTED,
            ProxyError::UpstreamUnavailable { .. } | ProxyError::RelayIo(_) => StatusCode::BAD_GATEWAY,
            ProxyError::TlsPolicyMisconfigured(_) | ProxyError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the client connection must be closed after the error response.
    pub fn closes_connection(&self) -> bool {
        matches!(self, ProxyError::MalformedRequest(_) | ProxyError::WhitelistRejected { .. } | ProxyError::LoopDetected(_))
    }

    /// Build the response sent back to the client. The body only carries the canonical
    /// reason so nothing about the origin or the policy leaks to the client.
    pub fn into_response(self) -> Response<Body> {
        let status = self.status();
        let mut response = Response::new(Body::from(status.canonical_reason().unwrap_or("Error")));
        *response.status_mut() = status;
        response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        if self.closes_connection() {
            response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }
}
