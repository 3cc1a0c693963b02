//! Common validation utilities shared across modules

/// Validate that a port number is in valid range (1-65535)
pub fn validate_port_range(port: u16) -> Result<(), String> {
    if port == 0 {
        return Err("Port must be between 1 and 65535".to_string());
    }
    Ok(())
}

/// Check if a string is empty or only whitespace
pub fn is_empty_or_whitespace(s: &str) -> bool {
    s.trim().is_empty()
}

/// Validate that a hostname only contains DNS label characters.
/// Wildcards are rejected: policy sets match hosts exactly.
pub fn validate_hostname_chars(hostname: &str) -> bool {
    !hostname.is_empty()
        && hostname.len() <= 253
        && hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        && !hostname.starts_with('-')
        && !hostname.ends_with('-')
        && !hostname.starts_with('.')
        && !hostname.split('.').any(|label| label.len() > 63)
}

/// Validate a policy host: a DNS name, an IPv4 literal or a bracketed IPv6 literal.
pub fn validate_policy_host(host: &str) -> bool {
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return inner.parse::<std::net::Ipv6Addr>().is_ok();
    }
    validate_hostname_chars(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_port_range_valid() {
        assert!(validate_port_range(1).is_ok());
        assert!(validate_port_range(80).is_ok());
        assert!(validate_port_range(443).is_ok());
        assert!(validate_port_range(8080).is_ok());
        assert!(validate_port_range(65535).is_ok());
    }

    #[test]
    fn test_validate_port_range_invalid() {
        assert!(validate_port_range(0).is_err());
        assert_eq!(validate_port_range(0).unwrap_err(), "Port must be between 1 and 65535");
    }

    #[test]
    fn test_is_empty_or_whitespace() {
        assert!(is_empty_or_whitespace(""));
        assert!(is_empty_or_whitespace("  \t\n  "));
        assert!(!is_empty_or_whitespace("  hello  "));
    }

    #[test]
    fn test_validate_hostname_chars_valid() {
        assert!(validate_hostname_chars("twitter.com"));
        assert!(validate_hostname_chars("detectportal.firefox.com"));
        assert!(validate_hostname_chars("snowmoscow.ru"));
        assert!(validate_hostname_chars("127.0.0.1"));
        assert!(validate_hostname_chars("localhost"));
    }

    #[test]
    fn test_validate_hostname_chars_invalid() {
        assert!(!validate_hostname_chars(""));
        assert!(!validate_hostname_chars("*.twitter.com")); // wildcard
        assert!(!validate_hostname_chars("-twitter.com"));
        assert!(!validate_hostname_chars("twitter.com-"));
        assert!(!validate_hostname_chars(".twitter.com"));
        assert!(!validate_hostname_chars("twit ter.com"));
        assert!(!validate_hostname_chars("twitter.com:443"));
        assert!(!validate_hostname_chars(&format!("{}.com", "a".repeat(64))));
    }

    #[test]
    fn test_validate_policy_host_ipv6() {
        assert!(validate_policy_host("[::1]"));
        assert!(!validate_policy_host("[not-an-ip]"));
        assert!(!validate_policy_host("::1"));
    }
}
