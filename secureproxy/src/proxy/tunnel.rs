//! CONNECT tunnel handling.
//!
//! 1. Client sends `CONNECT host:port`.
//! 2. The destination is checked against the whitelist; a miss is answered with 403 and
//!    no outbound connection is ever attempted.
//! 3. A raw TCP connection is opened to the destination; on success the client gets a 200
//!    and the upgraded client connection is spliced to the origin, payload untouched.
//! 4. A half-close is passed through to the other leg; the session ends once both
//!    directions have finished or either leg fails, and both legs are then dropped.

use crate::error::ProxyError;
use crate::policy::WhitelistPolicy;
use crate::proxy::target::split_authority;
use hyper::{Body, Request, Response, StatusCode};
use log::{debug, info, trace, warn};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Pending,
    Whitelisted,
    Connecting,
    Established,
    Closed,
    Rejected,
    Failed,
}

impl TunnelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TunnelState::Closed | TunnelState::Rejected | TunnelState::Failed)
    }
}

/// Lifecycle bookkeeping for one tunnel. The legs themselves live in the splice task.
#[derive(Debug)]
pub struct TunnelSession {
    host: String,
    port: u16,
    state: TunnelState,
}

impl TunnelSession {
    fn new(host: String, port: u16) -> Self {
        Self { host, port, state: TunnelState::Pending }
    }

    fn advance(&mut self, next: TunnelState) {
        debug_assert!(!self.state.is_terminal(), "tunnel already finished");
        trace!("Tunnel {host}:{port}: {from:?} -> {to:?}", host = self.host, port = self.port, from = self.state, to = next);
        self.state = next;
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }
}

#[derive(Debug, Clone)]
pub struct TunnelHandler {
    whitelist: Arc<WhitelistPolicy>,
    connect_timeout: Duration,
}

impl TunnelHandler {
    pub fn new(whitelist: Arc<WhitelistPolicy>, connect_timeout: Duration) -> Self {
        Self { whitelist, connect_timeout }
    }

    pub fn whitelist(&self) -> &WhitelistPolicy {
        &self.whitelist
    }

    /// Answer a CONNECT request. On success the returned 200 completes the handshake and the
    /// splice runs in its own task once hyper hands over the upgraded connection.
    pub async fn handle(&self, client_ip: IpAddr, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let authority = req
            .uri()
            .authority()
            .cloned()
            .ok_or_else(|| ProxyError::MalformedRequest(format!("CONNECT target '{}' has no authority", req.uri())))?;
        if authority.port_u16().is_none() {
            return Err(ProxyError::MalformedRequest(format!("CONNECT target '{}' has no port", authority)));
        }
        let (host, port) = split_authority(&authority, 0)?;
        let mut session = TunnelSession::new(host, port);

        if !self.whitelist.is_allowed(&session.host, session.port) {
            session.advance(TunnelState::Rejected);
            warn!("Rejected tunnel from {ip} to {host}:{port}: not whitelisted", ip = client_ip, host = session.host, port = session.port);
            return Err(ProxyError::WhitelistRejected { host: session.host, port: session.port });
        }
        session.advance(TunnelState::Whitelisted);

        session.advance(TunnelState::Connecting);
        let origin = match self.connect(&session.host, session.port).await {
            Ok(origin) => origin,
            Err(e) => {
                session.advance(TunnelState::Failed);
                warn!("Tunnel from {ip} to {host}:{port} failed: {e}", ip = client_ip, host = session.host, port = session.port, e = e);
                return Err(e);
            }
        };
        session.advance(TunnelState::Established);
        info!("Tunnel established from {ip} to {host}:{port}", ip = client_ip, host = session.host, port = session.port);

        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => match splice(upgraded, origin).await {
                    Ok((up, down)) => {
                        debug!("Tunnel {host}:{port} closed ({up} bytes up, {down} bytes down)", host = session.host, port = session.port, up = up, down = down);
                        session.advance(TunnelState::Closed);
                    }
                    Err(e) => {
                        debug!("Tunnel {host}:{port} aborted: {e}", host = session.host, port = session.port, e = ProxyError::from(e));
                        session.advance(TunnelState::Failed);
                    }
                },
                Err(e) => {
                    warn!("Client upgrade failed for tunnel {host}:{port}: {e}", host = session.host, port = session.port, e = e);
                    session.advance(TunnelState::Failed);
                }
            }
        });

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::OK;
        Ok(response)
    }

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, ProxyError> {
        let target = format!("{}:{}", host, port);
        // IPv6 literals arrive bracketed from the authority.
        let dial_host = host.trim_start_matches('[').trim_end_matches(']');
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect((dial_host, port))).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(e)) => Err(ProxyError::upstream(target, e)),
            Err(_) => Err(ProxyError::upstream(target, format!("connect timed out after {:?}", self.connect_timeout))),
        }
    }
}

/// Copy bytes both ways. EOF on one side shuts down writes on the other, so half-closed
/// exchanges complete; an error on either leg aborts both. Both legs are dropped on
/// return. Returns (client->origin, origin->client) byte counts.
pub async fn splice<C, O>(mut client: C, mut origin: O) -> std::io::Result<(u64, u64)>
where
    C: AsyncRead + AsyncWrite + Unpin,
    O: AsyncRead + AsyncWrite + Unpin,
{
    tokio::io::copy_bidirectional(&mut client, &mut origin).await
}
