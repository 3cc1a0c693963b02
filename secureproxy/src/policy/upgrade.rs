use crate::error::ProxyError;
use crate::policy::normalize_host;
use crate::proxy::target::{InboundRequest, OutboundTarget};
use crate::utils::validation::validate_policy_host;
use log::debug;
use std::collections::HashSet;

/// Hook point applied by the relay engine to every plain (non-CONNECT) request before it
/// is forwarded. Implementations must be pure: the same inbound request always maps to
/// the same target.
pub trait TargetRewrite: Send + Sync {
    fn rewrite(&self, inbound: &InboundRequest) -> OutboundTarget;
}

/// Hosts whose plaintext requests are silently relayed over HTTPS on port 443.
/// With `upgrade_all` set, every plaintext request is.
#[derive(Debug, Clone, Default)]
pub struct SchemeUpgradePolicy {
    hosts: HashSet<String>,
    upgrade_all: bool,
}

impl SchemeUpgradePolicy {
    pub fn new<I, S>(hosts: I) -> Result<Self, ProxyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for host in hosts {
            let host = normalize_host(host.as_ref());
            if !validate_policy_host(&host) {
                return Err(ProxyError::Configuration(format!("Invalid scheme-upgrade host '{}'", host)));
            }
            set.insert(host);
        }
        Ok(Self { hosts: set, upgrade_all: false })
    }

    pub fn with_upgrade_all(mut self, upgrade_all: bool) -> Self {
        self.upgrade_all = upgrade_all;
        self
    }

    pub fn upgrades_all(&self) -> bool {
        self.upgrade_all
    }

    pub fn requires_upgrade(&self, host: &str) -> bool {
        self.upgrade_all || self.hosts.contains(&normalize_host(host))
    }

    pub fn hosts(&self) -> impl Iterator<Item = &String> {
        self.hosts.iter()
    }
}

impl TargetRewrite for SchemeUpgradePolicy {
    fn rewrite(&self, inbound: &InboundRequest) -> OutboundTarget {
        let target = OutboundTarget::from_inbound(inbound);
        // Requests that already arrived encrypted are relayed as addressed.
        if inbound.is_secure() || !self.requires_upgrade(target.host()) {
            return target;
        }
        let upgraded = target.upgraded();
        debug!("Upgrading {from} -> {to}", from = target, to = upgraded);
        upgraded
    }
}
