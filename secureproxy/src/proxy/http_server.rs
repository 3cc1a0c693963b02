use crate::proxy::request_handler::{ConnectionInfo, RelayEngine};
use anyhow::Result;
use hyper::server::conn::{AddrIncoming, AddrStream};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request};
use log::info;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Start the plaintext proxy listener on `addr`
pub async fn start_http_server(addr: SocketAddr, engine: Arc<RelayEngine>) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|e| anyhow::anyhow!("Failed to bind HTTP proxy on {}: {}", addr, e))?;
    serve_http(listener, engine).await
}

/// Serve plaintext proxy requests from an already bound listener
pub async fn serve_http(listener: TcpListener, engine: Arc<RelayEngine>) -> Result<()> {
    let addr = listener.local_addr()?;
    let mut incoming = AddrIncoming::from_listener(listener)?;
    incoming.set_nodelay(true);

    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let client_ip = conn.remote_addr().ip();
        let engine = engine.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let engine = engine.clone();
                async move { Ok::<_, Infallible>(engine.handle(ConnectionInfo::plain(client_ip), req).await) }
            }))
        }
    });

    let server = hyper::Server::builder(incoming).http1_only(true).http1_keepalive(true).serve(make_svc);

    info!("HTTP Proxy Server running on {}", addr);
    server.await?;
    Ok(())
}
