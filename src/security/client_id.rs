//! Client identification for rate limiting.

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Forwarding headers consulted in order when they are trusted.
const FORWARDED_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// Request extension set by an upstream authentication layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

impl AuthenticatedUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Stable limiter key: `user:<id>` for authenticated callers, else `ip:<addr>`.
pub fn identify_client(
    user: Option<&AuthenticatedUser>,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded: bool,
) -> String {
    if let Some(user) = user.filter(|u| !u.user_id.is_empty()) {
        return format!("user:{}", user.user_id);
    }
    match client_ip(headers, peer, trust_forwarded) {
        Some(ip) => format!("ip:{ip}"),
        None => "ip:unknown".to_string(),
    }
}

/// First valid address from the forwarding headers, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> Option<IpAddr> {
    if trust_forwarded {
        for name in FORWARDED_HEADERS {
            let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            let first = value.split(',').next().unwrap_or_default().trim();
            if let Ok(ip) = first.parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    peer.map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.10:51000".parse().unwrap())
    }

    #[test]
    fn test_authenticated_user_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5"));
        let user = AuthenticatedUser::new("42");
        assert_eq!(identify_client(Some(&user), &headers, peer(), true), "user:42");
    }

    #[test]
    fn test_forwarded_for_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(identify_client(None, &headers, peer(), true), "ip:203.0.113.5");
    }

    #[test]
    fn test_invalid_header_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        headers.insert("x-real-ip", HeaderValue::from_static("2001:db8::1"));
        assert_eq!(identify_client(None, &headers, peer(), true), "ip:2001:db8::1");
    }

    #[test]
    fn test_untrusted_headers_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.5"));
        assert_eq!(identify_client(None, &headers, peer(), false), "ip:192.0.2.10");
    }

    #[test]
    fn test_unknown_without_any_source() {
        assert_eq!(identify_client(None, &HeaderMap::new(), None, true), "ip:unknown");
    }
}
