// Policy module
//
// Immutable routing and security policies, built once at startup and shared by `Arc`:
// - tls: outbound TLS client policy (protocol versions, certificate validation)
// - whitelist: default-deny destination set for CONNECT tunnels
// - upgrade: hosts whose plaintext requests are relayed over HTTPS

pub mod tls;
pub mod upgrade;
pub mod whitelist;

pub use tls::{CertificateValidation, TlsClientConfig, TlsPolicyProvider, TlsVersion};
pub use upgrade::{SchemeUpgradePolicy, TargetRewrite};
pub use whitelist::{WhitelistEntry, WhitelistPolicy};

/// Hosts are compared case-insensitively everywhere; normalize once at the edges.
pub(crate) fn normalize_host(host: &str) -> String {
    host.trim().to_ascii_lowercase()
}
