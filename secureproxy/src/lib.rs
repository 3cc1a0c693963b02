//! secureproxy
//!
//! A forward HTTP/HTTPS proxy. Plain requests are relayed to their origin (optionally
//! upgraded to HTTPS for configured hosts), CONNECT requests are tunneled to whitelisted
//! destinations, and every outbound TLS connection follows a single restrictive policy.

pub mod config;
pub mod error;
pub mod policy;
pub mod proxy;
pub mod utils;

pub use error::{ProxyError, Result};
