// Proxy module
//
// This module contains the forward proxy split into focused submodules:
// - http_server: plaintext listener
// - ssl_server: TLS-terminating listener and certificate loading
// - request_handler: relay engine, per-request routing and forwarding
// - tunnel: CONNECT handling and the bidirectional splice
// - outbound: shared outbound HTTP/HTTPS client
// - target: inbound request parsing and outbound target addressing
// - headers: hop-by-hop header stripping
// - audit: post-relay audit hook
// - about: built-in about page

pub mod about;
pub mod audit;
pub mod headers;
pub mod http_server;
pub mod outbound;
pub mod request_handler;
pub mod ssl_server;
pub mod target;
pub mod tunnel;

pub use request_handler::{ConnectionInfo, RelayEngine};

use crate::config::Config;
use anyhow::Result;
use log::info;
use std::sync::Arc;

/// Validate the configuration, build the relay engine and run the listeners until one of
/// them fails or the process receives Ctrl-C.
pub async fn run(config: &Config) -> Result<()> {
    config.validate()?;
    let engine = Arc::new(RelayEngine::from_config(config)?);

    tokio::select! {
        result = serve(config, engine) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

async fn serve(config: &Config, engine: Arc<RelayEngine>) -> Result<()> {
    let http = http_server::start_http_server(config.http_addr()?, engine.clone());
    match config.get_tls() {
        Some(tls) => {
            let acceptor = ssl_server::load_tls_acceptor(&tls.cert_path, &tls.key_path)?;
            let https = ssl_server::start_ssl_server(config.https_addr()?, acceptor, engine);
            tokio::try_join!(http, https)?;
            Ok(())
        }
        None => {
            info!("No inbound TLS material configured; HTTPS listener disabled");
            http.await
        }
    }
}
