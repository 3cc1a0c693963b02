use hyper::header::{CONNECTION, HeaderName, HeaderValue, VIA};
use hyper::{HeaderMap, Version};

/// Name this proxy records in `Via` entries it adds.
pub const VIA_PSEUDONYM: &str = "secureproxy";

/// Headers that only describe a single transport leg and are never relayed.
pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers in place, including any header listed as a `Connection`
/// token. Remaining headers keep their order and multiplicity.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// True if any `Via` entry was added by this proxy, i.e. the request came back around.
pub fn has_own_via(headers: &HeaderMap) -> bool {
    headers
        .get_all(VIA)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|entry| entry.split_whitespace().nth(1))
        .any(|received_by| received_by.eq_ignore_ascii_case(VIA_PSEUDONYM))
}

/// Append this proxy's `Via` entry for a message received with `version`.
pub fn append_via(headers: &mut HeaderMap, version: Version) {
    let protocol = match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    };
    if let Ok(value) = HeaderValue::from_str(&format!("{} {}", protocol, VIA_PSEUDONYM)) {
        headers.append(VIA, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn test_strips_fixed_hop_by_hop_set() {
        let mut headers = HeaderMap::new();
        for name in [
            "Connection",
            "Keep-Alive",
            "Proxy-Authenticate",
            "Proxy-Authorization",
            "TE",
            "Trailer",
            "Transfer-Encoding",
            "Upgrade",
            "Proxy-Connection",
        ] {
            headers.insert(HeaderName::from_bytes(name.as_bytes()).unwrap(), HeaderValue::from_static("x"));
        }
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("content-type"));
    }

    #[test]
    fn test_strips_connection_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("close, X-Session-Hint"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert("x-keep", HeaderValue::from_static("1"));
        strip_hop_by_hop(&mut headers);
        assert!(!headers.contains_key("x-session-hint"));
        assert!(headers.contains_key("x-keep"));
    }

    #[test]
    fn test_via_round_trip_is_detected() {
        let mut headers = HeaderMap::new();
        headers.insert(VIA, HeaderValue::from_static("1.1 corp-cache (Squid/5.7)"));
        assert!(!has_own_via(&headers));

        append_via(&mut headers, Version::HTTP_10);
        let entries: Vec<_> = headers.get_all(VIA).iter().collect();
        assert_eq!(entries, vec!["1.1 corp-cache (Squid/5.7)", "1.0 secureproxy"]);
        assert!(has_own_via(&headers));
    }

    #[test]
    fn test_via_detection_checks_every_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(VIA, HeaderValue::from_static("1.0 fred, 1.1 SecureProxy"));
        assert!(has_own_via(&headers));
    }

    #[test]
    fn test_keeps_end_to_end_headers_and_multiplicity() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert("content-encoding", HeaderValue::from_static("gzip"));
        headers.insert("location", HeaderValue::from_static("http://example.com/next"));
        strip_hop_by_hop(&mut headers);
        let cookies: Vec<_> = headers.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(headers.get("content-encoding").unwrap(), "gzip");
        assert_eq!(headers.get("location").unwrap(), "http://example.com/next");
    }
}
