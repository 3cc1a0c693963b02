use log::info;

/// What a relay over an encrypted inbound connection observed on the way back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub host: String,
    pub set_cookies: Vec<String>,
}

/// Receives a record after each relay completes. Implementations must not block; a
/// failing hook never affects the relay it describes.
pub trait AuditHook: Send + Sync {
    fn relay_completed(&self, record: &AuditRecord);
}

/// Writes audit records to the `secureproxy::audit` log target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditHook;

impl AuditHook for LogAuditHook {
    fn relay_completed(&self, record: &AuditRecord) {
        info!(target: "secureproxy::audit", "host={host}", host = record.host);
        for cookie in &record.set_cookies {
            info!(target: "secureproxy::audit", "host={host} set-cookie={cookie}", host = record.host, cookie = cookie);
        }
    }
}
