use crate::error::ProxyError;
use crate::policy::normalize_host;
use crate::utils::validation::validate_policy_host;
use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;

/// A single allowed tunnel destination. `port == None` matches every port of the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WhitelistEntry {
    host: String,
    port: Option<u16>,
}

impl WhitelistEntry {
    pub fn new(host: impl AsRef<str>, port: Option<u16>) -> Self {
        // Port 0 is the "any port" marker used by the config file.
        Self { host: normalize_host(host.as_ref()), port: port.filter(|p| *p != 0) }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

impl FromStr for WhitelistEntry {
    type Err = ProxyError;

    /// Accepts `host`, `host:port` and `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = if s.starts_with('[') {
            let end = s.find(']').ok_or_else(|| ProxyError::Configuration(format!("Unterminated IPv6 literal in whitelist entry '{}'", s)))?;
            let (host, rest) = s.split_at(end + 1);
            match rest.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if rest.is_empty() => (host, None),
                None => return Err(ProxyError::Configuration(format!("Invalid whitelist entry '{}'", s))),
            }
        } else {
            match s.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if !validate_policy_host(host) {
            return Err(ProxyError::Configuration(format!("Invalid host in whitelist entry '{}'", s)));
        }
        let port = match port {
            Some(port) => Some(port.parse::<u16>().map_err(|e| ProxyError::Configuration(format!("Invalid port in whitelist entry '{}': {}", s, e)))?),
            None => None,
        };
        Ok(Self::new(host, port))
    }
}

impl Display for WhitelistEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

/// Default-deny set of destinations a CONNECT tunnel may be opened to.
///
/// Matching is exact on the (lower-cased) host: no wildcards, no suffix or subdomain
/// matching, so `evil.twitter.com` never rides on an entry for `twitter.com`.
#[derive(Debug, Clone, Default)]
pub struct WhitelistPolicy {
    entries: HashSet<WhitelistEntry>,
}

impl WhitelistPolicy {
    pub fn new(entries: impl IntoIterator<Item = WhitelistEntry>) -> Self {
        Self { entries: entries.into_iter().collect() }
    }

    /// Parse a list of `host[:port]` strings, failing on the first invalid entry.
    pub fn parse<I, S>(entries: I) -> Result<Self, ProxyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries.into_iter().map(|e| e.as_ref().parse::<WhitelistEntry>()).collect::<Result<HashSet<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn is_allowed(&self, host: &str, port: u16) -> bool {
        let host = normalize_host(host);
        self.entries.contains(&WhitelistEntry { host: host.clone(), port: Some(port) }) || self.entries.contains(&WhitelistEntry { host, port: None })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &WhitelistEntry> {
        self.entries.iter()
    }
}
