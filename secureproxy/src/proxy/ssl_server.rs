use crate::error::ProxyError;
use crate::proxy::request_handler::{ConnectionInfo, RelayEngine};
use anyhow::Result;
use hyper::service::service_fn;
use hyper::{Body, Request};
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::{Certificate, PrivateKey, ServerConfig};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::TcpListenerStream;

/// Build the TLS acceptor for the inbound listener from a PEM certificate chain and a
/// PKCS#8 or RSA private key.
pub fn load_tls_acceptor(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<TlsAcceptor, ProxyError> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let cert_pem = std::fs::read(cert_path).map_err(|e| ProxyError::Configuration(format!("Failed to read certificate {}: {}", cert_path.display(), e)))?;
    let certs: Vec<Certificate> = rustls_pemfile::certs(&mut BufReader::new(cert_pem.as_slice()))
        .map_err(|e| ProxyError::Configuration(format!("Invalid certificate {}: {}", cert_path.display(), e)))?
        .into_iter()
        .map(Certificate)
        .collect();
    if certs.is_empty() {
        return Err(ProxyError::Configuration(format!("No certificates found in {}", cert_path.display())));
    }

    let key_pem = std::fs::read(key_path).map_err(|e| ProxyError::Configuration(format!("Failed to read private key {}: {}", key_path.display(), e)))?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key_pem.as_slice()))
        .map_err(|e| ProxyError::Configuration(format!("Invalid private key {}: {}", key_path.display(), e)))?;
    if keys.is_empty() {
        keys = rustls_pemfile::rsa_private_keys(&mut BufReader::new(key_pem.as_slice()))
            .map_err(|e| ProxyError::Configuration(format!("Invalid private key {}: {}", key_path.display(), e)))?;
    }
    let key = keys
        .into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| ProxyError::Configuration(format!("No private key found in {}", key_path.display())))?;

    let mut config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ProxyError::Configuration(format!("Certificate and key rejected: {}", e)))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    debug!("Loaded TLS certificate from {}", cert_path.display());
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Start the TLS-terminating proxy listener on `addr`
pub async fn start_ssl_server(addr: SocketAddr, acceptor: TlsAcceptor, engine: Arc<RelayEngine>) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|e| anyhow::anyhow!("Failed to bind HTTPS proxy on {}: {}", addr, e))?;
    serve_tls(listener, acceptor, engine).await
}

/// Accept loop for the TLS listener. Requests read here are marked as arriving encrypted.
pub async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, engine: Arc<RelayEngine>) -> Result<()> {
    info!("HTTPS Proxy Server running on {}", listener.local_addr()?);
    let mut incoming = TcpListenerStream::new(listener);

    while let Some(stream) = incoming.next().await {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("TCP accept error: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                continue;
            }
        };
        let client_ip = match stream.peer_addr() {
            Ok(addr) => addr.ip(),
            Err(e) => {
                debug!("Dropping connection without peer address: {}", e);
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let acceptor = acceptor.clone();
        let engine = engine.clone();
        tokio::spawn(async move {
            let tls = match acceptor.accept(stream).await {
                Ok(tls) => tls,
                Err(e) => {
                    debug!("TLS handshake with {} failed: {}", client_ip, e);
                    return;
                }
            };
            let service = service_fn(move |req: Request<Body>| {
                let engine = engine.clone();
                async move { Ok::<_, Infallible>(engine.handle(ConnectionInfo::secure(client_ip), req).await) }
            });
            let mut http = hyper::server::conn::Http::new();
            http.http1_only(true);
            http.http1_keep_alive(true);
            let conn = http.serve_connection(tls, service).with_upgrades();
            if let Err(e) = conn.await {
                error!("HTTPS connection error: {}", e);
            }
        });
    }

    warn!("TLS incoming stream ended");
    Ok(())
}
