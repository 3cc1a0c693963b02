//! Request addressing: what the client asked for and where the proxy sends it.

use crate::error::ProxyError;
use crate::policy::normalize_host;
use hyper::header::HOST;
use hyper::http::uri::Authority;
use hyper::{Body, HeaderMap, Method, Request, Uri, Version};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed plain (non-CONNECT) client request.
///
/// Absolute-form targets (`GET http://host/path`) carry their own authority; origin-form
/// targets (`GET /path`) are addressed by the `Host` header, with the scheme implied by
/// whether the inbound connection is encrypted.
#[derive(Debug)]
pub struct InboundRequest {
    method: Method,
    version: Version,
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Body,
    secure: bool,
}

impl InboundRequest {
    pub fn parse(req: Request<Body>, secure: bool) -> Result<Self, ProxyError> {
        let (parts, body) = req.into_parts();
        let uri = &parts.uri;

        let (scheme, authority) = match uri.authority() {
            Some(authority) => {
                let scheme = match uri.scheme_str() {
                    Some(s) if s.eq_ignore_ascii_case("http") => Scheme::Http,
                    Some(s) if s.eq_ignore_ascii_case("https") => Scheme::Https,
                    Some(other) => return Err(ProxyError::MalformedRequest(format!("unsupported scheme '{}'", other))),
                    None => return Err(ProxyError::MalformedRequest("authority-form target outside of CONNECT".to_string())),
                };
                (scheme, authority.clone())
            }
            None => {
                let value = parts.headers.get(HOST).ok_or_else(|| ProxyError::MalformedRequest("missing Host header".to_string()))?;
                let value = value.to_str().map_err(|_| ProxyError::MalformedRequest("non-ASCII Host header".to_string()))?;
                let authority = value
                    .parse::<Authority>()
                    .map_err(|e| ProxyError::MalformedRequest(format!("invalid Host header '{}': {}", value, e)))?;
                (if secure { Scheme::Https } else { Scheme::Http }, authority)
            }
        };

        let (host, port) = split_authority(&authority, scheme.default_port())?;
        let path = match uri.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };

        Ok(Self {
            method: parts.method,
            version: parts.version,
            scheme,
            host,
            port,
            path,
            query: uri.query().map(str::to_string),
            headers: parts.headers,
            body,
            secure,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// True when the inbound connection itself was encrypted.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Hand the method, headers and body stream over to the outbound leg.
    pub fn into_parts(self) -> (Method, HeaderMap, Body) {
        (self.method, self.headers, self.body)
    }
}

/// Split an authority into a lower-cased host and an explicit or default port.
pub(crate) fn split_authority(authority: &Authority, default_port: u16) -> Result<(String, u16), ProxyError> {
    if authority.as_str().contains('@') {
        return Err(ProxyError::MalformedRequest(format!("userinfo is not allowed in target authority '{}'", authority)));
    }
    let host = normalize_host(authority.host());
    if host.is_empty() {
        return Err(ProxyError::MalformedRequest(format!("empty host in target authority '{}'", authority)));
    }
    let port = authority.port_u16().unwrap_or(default_port);
    if port == 0 {
        return Err(ProxyError::MalformedRequest(format!("invalid port in target authority '{}'", authority)));
    }
    Ok((host, port))
}

/// Where a relayed request is sent. Never mutated: rewriting yields a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundTarget {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    query: Option<String>,
}

impl OutboundTarget {
    pub fn new(scheme: Scheme, host: impl AsRef<str>, port: u16, path: impl Into<String>, query: Option<String>) -> Self {
        Self { scheme, host: normalize_host(host.as_ref()), port, path: path.into(), query }
    }

    pub fn from_inbound(inbound: &InboundRequest) -> Self {
        Self::new(inbound.scheme(), inbound.host(), inbound.port(), inbound.path(), inbound.query().map(str::to_string))
    }

    /// The same resource over HTTPS on the canonical secure port.
    pub fn upgraded(&self) -> Self {
        Self { scheme: Scheme::Https, port: Scheme::Https.default_port(), ..self.clone() }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Value for the outbound `Host` header; the port is omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() { self.host.clone() } else { format!("{}:{}", self.host, self.port) }
    }

    pub fn uri(&self) -> Result<Uri, ProxyError> {
        self.to_string()
            .parse::<Uri>()
            .map_err(|e| ProxyError::MalformedRequest(format!("cannot build outbound URI for {}: {}", self, e)))
    }
}

impl Display for OutboundTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}
