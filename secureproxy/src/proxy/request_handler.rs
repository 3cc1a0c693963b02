use crate::config::Config;
use crate::error::ProxyError;
use crate::policy::{TargetRewrite, TlsPolicyProvider};
use crate::proxy::about::{about_response, is_about_request};
use crate::proxy::audit::{AuditHook, AuditRecord, LogAuditHook};
use crate::proxy::headers::{append_via, has_own_via, strip_hop_by_hop};
use crate::proxy::outbound::OutboundConnectionManager;
use crate::proxy::target::InboundRequest;
use crate::proxy::tunnel::TunnelHandler;
use hyper::header::SET_COOKIE;
use hyper::{Body, Method, Request, Response};
use log::{debug, info, trace, warn};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Where an inbound request came from.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    pub client_ip: IpAddr,
    /// True for requests read from the TLS listener.
    pub secure: bool,
}

impl ConnectionInfo {
    pub fn plain(client_ip: IpAddr) -> Self {
        Self { client_ip, secure: false }
    }

    pub fn secure(client_ip: IpAddr) -> Self {
        Self { client_ip, secure: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Received,
    Routed,
    Tunneling,
    Forwarding,
    Responding,
    Done,
    Failed,
}

struct RelaySession {
    id: u64,
    state: RelayState,
}

impl RelaySession {
    fn advance(&mut self, next: RelayState) {
        trace!("Relay #{id}: {from:?} -> {to:?}", id = self.id, from = self.state, to = next);
        self.state = next;
    }
}

/// Per-request orchestrator: routes CONNECT to the tunnel handler and relays everything
/// else through the rewrite hook and the shared outbound client.
pub struct RelayEngine {
    rewrite: Arc<dyn TargetRewrite>,
    outbound: OutboundConnectionManager,
    tunnels: TunnelHandler,
    audit: Option<Arc<dyn AuditHook>>,
    next_id: AtomicU64,
}

impl RelayEngine {
    pub fn new(rewrite: Arc<dyn TargetRewrite>, outbound: OutboundConnectionManager, tunnels: TunnelHandler) -> Self {
        Self { rewrite, outbound, tunnels, audit: None, next_id: AtomicU64::new(1) }
    }

    pub fn with_audit(mut self, hook: Arc<dyn AuditHook>) -> Self {
        self.audit = Some(hook);
        self
    }

    /// Build every policy from a validated configuration. Any policy error is fatal here,
    /// before a single connection is accepted.
    pub fn from_config(config: &Config) -> Result<Self, ProxyError> {
        let provider = TlsPolicyProvider::new();
        let tls = provider.install(config.tls_client_config()?)?;
        let options = config.outbound_options();
        let tunnels = TunnelHandler::new(Arc::new(config.whitelist_policy()?), options.connect_timeout);
        let outbound = OutboundConnectionManager::new(tls, options)?;
        let engine = Self::new(Arc::new(config.upgrade_policy()?), outbound, tunnels);

        info!(
            "Relay engine ready: outbound tls {tls}, {entries} whitelist entries",
            tls = engine.outbound.tls_policy(),
            entries = engine.tunnels.whitelist().len()
        );
        Ok(if config.is_audit_enabled() { engine.with_audit(Arc::new(LogAuditHook)) } else { engine })
    }

    /// Handle one client request. Failures are turned into their client response here,
    /// so a single bad request or origin never affects the connection loop.
    pub async fn handle(&self, conn: ConnectionInfo, req: Request<Body>) -> Response<Body> {
        let mut session = RelaySession { id: self.next_id.fetch_add(1, Ordering::Relaxed), state: RelayState::Received };
        debug!("Request #{id} from {ip}: {method} {uri}", id = session.id, ip = conn.client_ip, method = req.method(), uri = req.uri());

        match self.dispatch(&mut session, conn, req).await {
            Ok(response) => {
                session.advance(RelayState::Done);
                response
            }
            Err(e) => {
                session.advance(RelayState::Failed);
                warn!("Request #{id} from {ip} failed: {e}", id = session.id, ip = conn.client_ip, e = e);
                e.into_response()
            }
        }
    }

    async fn dispatch(&self, session: &mut RelaySession, conn: ConnectionInfo, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        if req.method() == Method::CONNECT {
            session.advance(RelayState::Routed);
            session.advance(RelayState::Tunneling);
            self.tunnels.handle(conn.client_ip, req).await
        } else if is_about_request(&req) {
            session.advance(RelayState::Routed);
            session.advance(RelayState::Responding);
            Ok(about_response(req.method()))
        } else {
            self.relay(session, conn, req).await
        }
    }

    async fn relay(&self, session: &mut RelaySession, conn: ConnectionInfo, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let inbound = InboundRequest::parse(req, conn.secure)?;
        if has_own_via(inbound.headers()) {
            return Err(ProxyError::LoopDetected(format!("{}:{}", inbound.host(), inbound.port())));
        }
        let version = inbound.version();
        let target = self.rewrite.rewrite(&inbound);
        session.advance(RelayState::Routed);

        let (method, mut headers, body) = inbound.into_parts();
        strip_hop_by_hop(&mut headers);
        append_via(&mut headers, version);
        session.advance(RelayState::Forwarding);
        let access_method = method.clone();
        let mut response = self.outbound.forward(&target, method, headers, body).await?;

        session.advance(RelayState::Responding);
        strip_hop_by_hop(response.headers_mut());

        if conn.secure {
            if let Some(hook) = &self.audit {
                let set_cookies = response
                    .headers()
                    .get_all(SET_COOKIE)
                    .iter()
                    .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                    .collect();
                hook.relay_completed(&AuditRecord { host: target.host().to_string(), set_cookies });
            }
        }

        info!(
            "{ip} {method} {target} -> {status}",
            ip = conn.client_ip,
            method = access_method,
            target = target,
            status = response.status().as_u16()
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{SchemeUpgradePolicy, TlsClientConfig, WhitelistPolicy};
    use crate::proxy::outbound::OutboundOptions;
    use hyper::header::CONNECTION;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::StatusCode;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AuditRecord>>);

    impl AuditHook for Recorder {
        fn relay_completed(&self, record: &AuditRecord) {
            self.0.lock().unwrap().push(record.clone());
        }
    }

    fn engine() -> RelayEngine {
        let tls = Arc::new(TlsClientConfig::build_client_policy().unwrap());
        let outbound = OutboundConnectionManager::new(tls, OutboundOptions::default()).unwrap();
        let tunnels = TunnelHandler::new(Arc::new(WhitelistPolicy::parse(["twitter.com:443"]).unwrap()), Duration::from_secs(2));
        RelayEngine::new(Arc::new(SchemeUpgradePolicy::new(["twitter.com"]).unwrap()), outbound, tunnels)
    }

    fn client() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    fn session() -> RelaySession {
        RelaySession { id: 0, state: RelayState::Received }
    }

    /// Origin that echoes back whether hop-by-hop headers reached it and sets a cookie.
    async fn origin() -> SocketAddr {
        counting_origin(Arc::new(AtomicU64::new(0))).await
    }

    /// Same origin, counting every request it answers. The `Via` it received is echoed
    /// back in `x-seen-via`.
    async fn counting_origin(hits: Arc<AtomicU64>) -> SocketAddr {
        let make_svc = make_service_fn(move |_| {
            let hits = hits.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let leaked = req.headers().contains_key("proxy-connection") || req.headers().contains_key("x-hop");
                    let via = req.headers().get("via").and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
                    async move {
                        Ok::<_, Infallible>(
                            Response::builder()
                                .header("set-cookie", "session=abc")
                                .header("keep-alive", "timeout=5")
                                .header("x-seen-via", via)
                                .body(Body::from(if leaked { "leaked" } else { "clean" }))
                                .unwrap(),
                        )
                    }
                }))
            }
        });
        let server = hyper::Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(server);
        addr
    }

    #[tokio::test]
    async fn test_missing_host_is_bad_request() {
        let req = Request::builder().uri("/index.html").body(Body::empty()).unwrap();
        let response = engine().handle(ConnectionInfo::plain(client()), req).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers().get(CONNECTION).unwrap(), "close");
    }

    #[tokio::test]
    async fn test_rejected_tunnel_is_forbidden() {
        let req = Request::builder().method("CONNECT").uri("internal-host:9999").body(Body::empty()).unwrap();
        let response = engine().handle(ConnectionInfo::plain(client()), req).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers().get(CONNECTION).unwrap(), "close");
    }

    #[tokio::test]
    async fn test_about_page_is_not_relayed() {
        let req = Request::builder().uri("/about").header("host", "127.0.0.1:1").body(Body::empty()).unwrap();
        let response = engine().handle(ConnectionInfo::plain(client()), req).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_relay_strips_hop_by_hop_both_ways() {
        let addr = origin().await;
        let req = Request::builder()
            .uri(format!("http://{}/", addr))
            .header("proxy-connection", "keep-alive")
            .header("connection", "x-hop")
            .header("x-hop", "1")
            .body(Body::empty())
            .unwrap();
        let response = engine().handle(ConnectionInfo::plain(client()), req).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("keep-alive"));
        assert_eq!(response.headers().get("set-cookie").unwrap(), "session=abc");
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"clean");
    }

    #[tokio::test]
    async fn test_audit_runs_only_for_secure_connections() {
        let addr = origin().await;
        let recorder = Arc::new(Recorder::default());
        let engine = engine().with_audit(recorder.clone());

        let request = || Request::builder().uri(format!("http://{}/", addr)).body(Body::empty()).unwrap();
        engine.handle(ConnectionInfo::plain(client()), request()).await;
        assert!(recorder.0.lock().unwrap().is_empty());

        engine.handle(ConnectionInfo::secure(client()), request()).await;
        let records = recorder.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].host, "127.0.0.1");
        assert_eq!(records[0].set_cookies, vec!["session=abc".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_bad_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let req = Request::builder().uri(format!("http://{}/", addr)).body(Body::empty()).unwrap();
        let response = engine().handle(ConnectionInfo::plain(client()), req).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_request_carrying_own_via_is_a_loop() {
        let hits = Arc::new(AtomicU64::new(0));
        let addr = counting_origin(hits.clone()).await;
        let req = Request::builder()
            .uri(format!("http://{}/", addr))
            .header("via", "1.0 edge, 1.1 secureproxy")
            .body(Body::empty())
            .unwrap();
        let response = engine().handle(ConnectionInfo::plain(client()), req).await;

        assert_eq!(response.status(), StatusCode::LOOP_DETECTED);
        assert_eq!(response.headers().get(CONNECTION).unwrap(), "close");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forwarded_request_carries_via() {
        let addr = origin().await;
        let req = Request::builder()
            .uri(format!("http://{}/", addr))
            .header("via", "1.0 edge")
            .body(Body::empty())
            .unwrap();
        let response = engine().handle(ConnectionInfo::plain(client()), req).await;

        assert_eq!(response.status(), StatusCode::OK);
        let seen = response.headers().get("x-seen-via").unwrap().to_str().unwrap();
        assert!(seen.contains("1.0 edge"), "{seen}");
        assert!(seen.contains("1.1 secureproxy"), "{seen}");
    }

    #[tokio::test]
    async fn test_upgraded_host_is_dialed_over_https_on_443() {
        let hits = Arc::new(AtomicU64::new(0));
        let addr = counting_origin(hits.clone()).await;
        let tls = Arc::new(TlsClientConfig::build_client_policy().unwrap());
        let outbound = OutboundConnectionManager::new(tls, OutboundOptions::default()).unwrap();
        let tunnels = TunnelHandler::new(Arc::new(WhitelistPolicy::parse(["twitter.com:443"]).unwrap()), Duration::from_secs(2));
        let engine = RelayEngine::new(Arc::new(SchemeUpgradePolicy::new(["localhost"]).unwrap()), outbound, tunnels);

        let req = Request::builder()
            .uri(format!("http://localhost:{}/page?x=1", addr.port()))
            .body(Body::empty())
            .unwrap();
        let mut session = session();
        let err = engine.dispatch(&mut session, ConnectionInfo::plain(client()), req).await.unwrap_err();

        match err {
            ProxyError::UpstreamUnavailable { target, .. } => assert_eq!(target, "https://localhost:443/page?x=1"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.state, RelayState::Forwarding);
        assert_eq!(hits.load(Ordering::SeqCst), 0, "plaintext origin must never be contacted");
    }

    #[tokio::test]
    async fn test_about_passes_through_routed_and_responding() {
        let req = Request::builder().uri("/about").header("host", "127.0.0.1:1").body(Body::empty()).unwrap();
        let mut session = session();
        let response = engine().dispatch(&mut session, ConnectionInfo::plain(client()), req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(session.state, RelayState::Responding);
    }

    #[tokio::test]
    async fn test_connect_is_routed_before_tunneling() {
        let req = Request::builder().method("CONNECT").uri("internal-host:9999").body(Body::empty()).unwrap();
        let mut session = session();
        let err = engine().dispatch(&mut session, ConnectionInfo::plain(client()), req).await.unwrap_err();
        assert!(matches!(err, ProxyError::WhitelistRejected { .. }), "{err}");
        assert_eq!(session.state, RelayState::Tunneling);
    }
}
