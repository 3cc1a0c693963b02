use crate::policy::WhitelistEntry;
use crate::policy::normalize_host;
use crate::utils::validation::validate_policy_host;
use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub(crate) path: PathBuf,
    // Interface both listeners bind to
    #[serde(deserialize_with = "string_or_default", default = "default_bind_address")]
    pub(crate) bind_address: String,
    #[serde(deserialize_with = "u16_or_default", default = "default_http_port")]
    pub(crate) http_port: u16,
    #[serde(deserialize_with = "u16_or_default", default = "default_https_port")]
    pub(crate) https_port: u16,
    // Certificate material for the TLS listener; the listener is off when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) tls: Option<InboundTls>,
    #[serde(default)]
    pub(crate) outbound: OutboundSettings,
    // CONNECT destinations, `host` or `host:port`
    #[serde(default = "default_whitelist")]
    pub(crate) whitelist: Vec<String>,
    // Hosts whose plaintext requests are relayed over HTTPS
    #[serde(default = "default_upgrade_hosts")]
    pub(crate) upgrade_hosts: Vec<String>,
    // Relay every plaintext request over HTTPS, not only `upgrade_hosts`
    #[serde(deserialize_with = "bool_or_default", default)]
    pub(crate) upgrade_all: bool,
    #[serde(deserialize_with = "bool_or_default", default = "default_true")]
    pub(crate) audit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundTls {
    #[serde(deserialize_with = "string_or_default", default)]
    pub cert_path: String,
    #[serde(deserialize_with = "string_or_default", default)]
    pub key_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundSettings {
    #[serde(default = "default_protocols")]
    pub(crate) protocols: Vec<String>,
    // A non-bool value is kept as `None` and rejected by validation
    #[serde(deserialize_with = "bool_or_invalid", default = "default_some_true")]
    pub(crate) validate_certificates: Option<bool>,
    #[serde(deserialize_with = "u64_or_default", default = "default_connect_timeout")]
    pub(crate) connect_timeout_secs: u64,
    // 0 disables the whole-request timeout
    #[serde(deserialize_with = "u64_or_default", default)]
    pub(crate) request_timeout_secs: u64,
    #[serde(deserialize_with = "u64_or_default", default = "default_pool_idle_timeout")]
    pub(crate) pool_idle_timeout_secs: u64,
    #[serde(deserialize_with = "usize_or_default", default = "default_pool_max_idle")]
    pub(crate) pool_max_idle_per_host: usize,
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self {
            protocols: default_protocols(),
            validate_certificates: Some(true),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: 0,
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("./secureproxy.json")
    }
}

impl Config {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().with_extension("json"),
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            https_port: default_https_port(),
            tls: None,
            outbound: OutboundSettings::default(),
            whitelist: default_whitelist(),
            upgrade_hosts: default_upgrade_hosts(),
            upgrade_all: false,
            audit: true,
        }
    }

    pub fn get_path(&self) -> &PathBuf {
        &self.path
    }

    pub fn get_bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn get_http_port(&self) -> u16 {
        self.http_port
    }

    pub fn set_http_port(&mut self, port: u16) {
        self.http_port = port;
    }

    pub fn get_https_port(&self) -> u16 {
        self.https_port
    }

    pub fn set_https_port(&mut self, port: u16) {
        self.https_port = port;
    }

    pub fn get_tls(&self) -> Option<&InboundTls> {
        self.tls.as_ref()
    }

    pub fn set_tls(&mut self, cert_path: impl Into<String>, key_path: impl Into<String>) {
        self.tls = Some(InboundTls { cert_path: cert_path.into(), key_path: key_path.into() });
    }

    pub fn get_outbound(&self) -> &OutboundSettings {
        &self.outbound
    }

    pub fn get_whitelist(&self) -> &[String] {
        &self.whitelist
    }

    pub fn get_upgrade_hosts(&self) -> &[String] {
        &self.upgrade_hosts
    }

    pub fn is_upgrade_all(&self) -> bool {
        self.upgrade_all
    }

    pub fn set_upgrade_all(&mut self, enabled: bool) {
        info!("Setting upgrade_all: {}", enabled);
        self.upgrade_all = enabled;
    }

    pub fn is_audit_enabled(&self) -> bool {
        self.audit
    }

    pub fn add_whitelist_entry(&mut self, entry: impl AsRef<str>) -> Result<()> {
        let parsed = entry.as_ref().parse::<WhitelistEntry>()?;
        let canonical = parsed.to_string();
        if self.whitelist.iter().any(|e| e.parse::<WhitelistEntry>().is_ok_and(|e| e == parsed)) {
            return Err(anyhow::anyhow!("Whitelist entry already exists: {}", canonical));
        }
        info!("Adding whitelist entry: {}", canonical);
        self.whitelist.push(canonical);
        Ok(())
    }

    pub fn remove_whitelist_entry(&mut self, entry: impl AsRef<str>) -> Result<()> {
        let parsed = entry.as_ref().parse::<WhitelistEntry>()?;
        info!("Removing whitelist entry: {}", parsed);
        let before = self.whitelist.len();
        self.whitelist.retain(|e| e.parse::<WhitelistEntry>().map_or(true, |e| e != parsed));
        if self.whitelist.len() == before {
            warn!("Whitelist entry not found: {}", parsed);
        }
        Ok(())
    }

    pub fn add_upgrade_host(&mut self, host: impl AsRef<str>) -> Result<()> {
        let host = normalize_host(host.as_ref());
        if !validate_policy_host(&host) {
            return Err(anyhow::anyhow!("Invalid scheme-upgrade host: {}", host));
        }
        if self.upgrade_hosts.iter().any(|h| normalize_host(h) == host) {
            return Err(anyhow::anyhow!("Upgrade host already exists: {}", host));
        }
        info!("Adding upgrade host: {}", host);
        self.upgrade_hosts.push(host);
        Ok(())
    }

    pub fn remove_upgrade_host(&mut self, host: impl AsRef<str>) -> Result<()> {
        let host = normalize_host(host.as_ref());
        info!("Removing upgrade host: {}", host);
        let before = self.upgrade_hosts.len();
        self.upgrade_hosts.retain(|h| normalize_host(h) != host);
        if self.upgrade_hosts.len() == before {
            warn!("Upgrade host not found: {}", host);
        }
        Ok(())
    }
}

impl OutboundSettings {
    pub fn get_protocols(&self) -> &[String] {
        &self.protocols
    }

    /// `None` when the configured value was not a bool.
    pub fn is_validating_certificates(&self) -> Option<bool> {
        self.validate_certificates
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?;
        writeln!(f, "{}", json)
    }
}

// Helper functions for deserialization
fn string_or_default<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match String::deserialize(deserializer) {
        Ok(s) => Ok(s),
        Err(e) => {
            warn!("Failed to deserialize string value: {}, using default", e);
            Ok(String::default())
        }
    }
}

// Forgiving bool: non-bool types fall back to false.
fn bool_or_default<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match bool::deserialize(deserializer) {
        Ok(b) => Ok(b),
        Err(e) => {
            warn!("Failed to deserialize bool value: {}, using false", e);
            Ok(false)
        }
    }
}

fn bool_or_invalid<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match bool::deserialize(deserializer) {
        Ok(b) => Ok(Some(b)),
        Err(e) => {
            warn!("Failed to deserialize bool value: {}, leaving it unset", e);
            Ok(None)
        }
    }
}

// Forgiving integers: a bad value becomes 0, which validation then rejects where 0 is not allowed.
fn u16_or_default<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match u16::deserialize(deserializer) {
        Ok(n) => Ok(n),
        Err(e) => {
            warn!("Failed to deserialize u16 value: {}, using default", e);
            Ok(u16::default())
        }
    }
}

fn u64_or_default<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match u64::deserialize(deserializer) {
        Ok(n) => Ok(n),
        Err(e) => {
            warn!("Failed to deserialize u64 value: {}, using default", e);
            Ok(u64::default())
        }
    }
}

fn usize_or_default<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    match usize::deserialize(deserializer) {
        Ok(n) => Ok(n),
        Err(e) => {
            warn!("Failed to deserialize usize value: {}, using default", e);
            Ok(usize::default())
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_https_port() -> u16 {
    8443
}

fn default_true() -> bool {
    true
}

fn default_some_true() -> Option<bool> {
    Some(true)
}

fn default_protocols() -> Vec<String> {
    vec!["TLSv1.3".to_string()]
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_pool_max_idle() -> usize {
    16
}

fn default_whitelist() -> Vec<String> {
    ["detectportal.firefox.com:80", "twitter.com:443", "skvazy.com:443", "snowmoscow.ru:443"].map(String::from).to_vec()
}

fn default_upgrade_hosts() -> Vec<String> {
    ["twitter.com", "skvazy.com", "snowmoscow.ru"].map(String::from).to_vec()
}
