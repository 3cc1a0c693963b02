use crate::config::types::Config;
use crate::error::ProxyError;
use crate::policy::{CertificateValidation, SchemeUpgradePolicy, TlsClientConfig, TlsVersion, WhitelistPolicy};
use crate::proxy::outbound::OutboundOptions;
use crate::utils::validation::{is_empty_or_whitespace, validate_port_range};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

impl Config {
    /// Check every value the proxy depends on. Called once at startup; any error is fatal.
    pub fn validate(&self) -> Result<(), ProxyError> {
        self.bind_ip()?;
        validate_port_range(self.http_port).map_err(|e| ProxyError::Configuration(format!("http_port: {}", e)))?;
        validate_port_range(self.https_port).map_err(|e| ProxyError::Configuration(format!("https_port: {}", e)))?;
        if let Some(tls) = &self.tls {
            if self.http_port == self.https_port {
                return Err(ProxyError::Configuration(format!("http_port and https_port are both {}", self.http_port)));
            }
            if is_empty_or_whitespace(&tls.cert_path) || is_empty_or_whitespace(&tls.key_path) {
                return Err(ProxyError::Configuration("tls.cert_path and tls.key_path must both be set".to_string()));
            }
        }
        if self.outbound.connect_timeout_secs == 0 {
            return Err(ProxyError::Configuration("outbound.connect_timeout_secs must be greater than 0".to_string()));
        }
        self.tls_client_config()?;
        self.whitelist_policy()?;
        self.upgrade_policy()?;
        Ok(())
    }

    pub fn bind_ip(&self) -> Result<IpAddr, ProxyError> {
        self.bind_address
            .trim()
            .parse::<IpAddr>()
            .map_err(|e| ProxyError::Configuration(format!("Invalid bind_address '{}': {}", self.bind_address, e)))
    }

    pub fn http_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.http_port))
    }

    pub fn https_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.https_port))
    }

    pub fn whitelist_policy(&self) -> Result<WhitelistPolicy, ProxyError> {
        WhitelistPolicy::parse(&self.whitelist)
    }

    pub fn upgrade_policy(&self) -> Result<SchemeUpgradePolicy, ProxyError> {
        Ok(SchemeUpgradePolicy::new(&self.upgrade_hosts)?.with_upgrade_all(self.upgrade_all))
    }

    pub fn tls_client_config(&self) -> Result<TlsClientConfig, ProxyError> {
        let versions = self.outbound.protocols.iter().map(|p| p.parse::<TlsVersion>()).collect::<Result<Vec<_>, _>>()?;
        let validation = match self.outbound.validate_certificates {
            Some(true) => CertificateValidation::Strict,
            Some(false) => CertificateValidation::Disabled,
            None => return Err(ProxyError::Configuration("outbound.validate_certificates must be true or false".to_string())),
        };
        TlsClientConfig::new(versions, validation)
    }

    pub fn outbound_options(&self) -> OutboundOptions {
        let outbound = &self.outbound;
        OutboundOptions {
            connect_timeout: Duration::from_secs(outbound.connect_timeout_secs),
            request_timeout: (outbound.request_timeout_secs > 0).then(|| Duration::from_secs(outbound.request_timeout_secs)),
            pool_idle_timeout: Duration::from_secs(outbound.pool_idle_timeout_secs),
            pool_max_idle_per_host: outbound.pool_max_idle_per_host,
        }
    }
}
