//! Outbound connection manager.
//!
//! A single hyper client, built once from the TLS policy, carries every relayed request.
//! hyper keeps no cookie store and never follows redirects or decodes bodies, so each
//! call is opaque to earlier calls and the origin response comes back byte-for-byte.
//! Pooled connections are keyed by scheme and authority only, never by client.

use crate::error::ProxyError;
use crate::policy::TlsClientConfig;
use crate::proxy::target::OutboundTarget;
use hyper::client::HttpConnector;
use hyper::header::{HOST, HeaderValue};
use hyper::{Body, Client, HeaderMap, Method, Request, Response, Version};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use log::{debug, trace};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OutboundOptions {
    pub connect_timeout: Duration,
    /// Whole-exchange backstop up to the response head; `None` disables it.
    pub request_timeout: Option<Duration>,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for OutboundOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 16,
        }
    }
}

#[derive(Clone)]
pub struct OutboundConnectionManager {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    tls: Arc<TlsClientConfig>,
    request_timeout: Option<Duration>,
}

impl OutboundConnectionManager {
    pub fn new(tls: Arc<TlsClientConfig>, options: OutboundOptions) -> Result<Self, ProxyError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(options.connect_timeout));
        http.set_nodelay(true);

        let https = HttpsConnectorBuilder::new().with_tls_config(tls.to_rustls()?).https_or_http().enable_http1().wrap_connector(http);

        let client = Client::builder()
            .pool_idle_timeout(options.pool_idle_timeout)
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build::<_, Body>(https);

        debug!("Outbound client ready: tls={tls}, options={options:?}", tls = tls, options = options);
        Ok(Self { client, tls, request_timeout: options.request_timeout })
    }

    pub fn tls_policy(&self) -> &TlsClientConfig {
        &self.tls
    }

    /// Send one request to `target` and return the origin response unmodified.
    /// Exactly one outbound request is made; failures are never retried here.
    pub async fn forward(&self, target: &OutboundTarget, method: Method, headers: HeaderMap, body: Body) -> Result<Response<Body>, ProxyError> {
        let mut request = Request::new(body);
        *request.method_mut() = method;
        *request.uri_mut() = target.uri()?;
        *request.version_mut() = Version::HTTP_11;
        *request.headers_mut() = headers;

        let host = HeaderValue::from_str(&target.host_header())
            .map_err(|e| ProxyError::MalformedRequest(format!("invalid outbound host '{}': {}", target.host_header(), e)))?;
        request.headers_mut().insert(HOST, host);

        trace!("Outbound request: {method} {target}", method = request.method(), target = target);
        let exchange = self.client.request(request);
        let result = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| ProxyError::upstream(target, format!("no response within {:?}", limit)))?,
            None => exchange.await,
        };
        result.map_err(|e| ProxyError::upstream(target, describe(&e)))
    }
}

/// hyper wraps the interesting cause (DNS, refused, TLS alert) a level or two down.
fn describe(error: &hyper::Error) -> String {
    use std::error::Error;
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
