//! Outbound TLS client policy.
//!
//! Every outbound `https` connection is negotiated with the configuration produced here.
//! The default policy only enables TLS 1.3 and validates certificates against the
//! webpki root set. A policy is an immutable value: once a [`TlsPolicyProvider`] has
//! handed it out, installing another one is rejected.

use crate::error::ProxyError;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName, SupportedProtocolVersion};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl TlsVersion {
    fn rustls_version(self) -> &'static SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

impl FromStr for TlsVersion {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "TLSv1.3" | "tlsv1.3" | "1.3" => Ok(TlsVersion::Tls13),
            "TLSv1.2" | "tlsv1.2" | "1.2" => Ok(TlsVersion::Tls12),
            other => Err(ProxyError::TlsPolicyMisconfigured(format!("Unsupported TLS protocol version '{}'", other))),
        }
    }
}

impl Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsVersion::Tls12 => write!(f, "TLSv1.2"),
            TlsVersion::Tls13 => write!(f, "TLSv1.3"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateValidation {
    Strict,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsClientConfig {
    versions: BTreeSet<TlsVersion>,
    validation: CertificateValidation,
}

impl TlsClientConfig {
    /// Build a policy from an explicit version set. An empty set is a fatal misconfiguration.
    pub fn new(versions: impl IntoIterator<Item = TlsVersion>, validation: CertificateValidation) -> Result<Self, ProxyError> {
        let versions: BTreeSet<TlsVersion> = versions.into_iter().collect();
        if versions.is_empty() {
            return Err(ProxyError::TlsPolicyMisconfigured("enabled protocol set is empty".to_string()));
        }
        Ok(Self { versions, validation })
    }

    /// The process default: TLS 1.3 only, strict certificate validation.
    pub fn build_client_policy() -> Result<Self, ProxyError> {
        Self::new([TlsVersion::Tls13], CertificateValidation::Strict)
    }

    pub fn versions(&self) -> &BTreeSet<TlsVersion> {
        &self.versions
    }

    pub fn validation(&self) -> CertificateValidation {
        self.validation
    }

    /// Translate the policy into a rustls client configuration.
    pub fn to_rustls(&self) -> Result<ClientConfig, ProxyError> {
        let versions: Vec<&'static SupportedProtocolVersion> = self.versions.iter().map(|v| v.rustls_version()).collect();
        let builder = ClientConfig::builder()
            .with_safe_default_cipher_suites()
            .with_safe_default_kx_groups()
            .with_protocol_versions(&versions)
            .map_err(|e| ProxyError::TlsPolicyMisconfigured(e.to_string()))?;

        let config = match self.validation {
            CertificateValidation::Strict => {
                let mut roots = RootCertStore::empty();
                roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                    OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
                }));
                builder.with_root_certificates(roots).with_no_client_auth()
            }
            CertificateValidation::Disabled => builder.with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate)).with_no_client_auth(),
        };
        Ok(config)
    }
}

impl Display for TlsClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let versions: Vec<String> = self.versions.iter().map(|v| v.to_string()).collect();
        write!(f, "[{}] validation={:?}", versions.join(", "), self.validation)
    }
}

/// Verifier used when certificate validation is disabled in the configuration.
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Holds the process-wide outbound policy. The first value handed out (or installed)
/// wins; later installs fail instead of silently changing live connection pools.
#[derive(Debug, Default)]
pub struct TlsPolicyProvider {
    policy: OnceLock<Arc<TlsClientConfig>>,
}

impl TlsPolicyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, config: TlsClientConfig) -> Result<Arc<TlsClientConfig>, ProxyError> {
        let config = Arc::new(config);
        self.policy
            .set(config.clone())
            .map_err(|_| ProxyError::TlsPolicyMisconfigured("outbound TLS policy is already initialized and read-only".to_string()))?;
        Ok(config)
    }

    /// Return the installed policy, building the default one on first use.
    pub fn client_policy(&self) -> Result<Arc<TlsClientConfig>, ProxyError> {
        if let Some(policy) = self.policy.get() {
            return Ok(policy.clone());
        }
        let built = Arc::new(TlsClientConfig::build_client_policy()?);
        Ok(self.policy.get_or_init(|| built).clone())
    }
}
