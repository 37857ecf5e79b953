//! Bearer token checks for the REST API and WebSocket upgrades

use axum::http::HeaderMap;
use tracing::warn;

/// Whether a request may proceed. An empty `configured` token disables auth.
///
/// The token is read from `Authorization: Bearer <token>`, falling back to a
/// `token` query parameter for browser WebSocket clients that cannot set
/// headers.
pub fn authorize(configured: &str, headers: &HeaderMap, query_token: Option<&str>) -> bool {
    if configured.is_empty() {
        return true;
    }

    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
        .or(query_token);

    match provided {
        Some(token) if constant_time_eq(configured.as_bytes(), token.as_bytes()) => true,
        Some(_) => {
            warn!("Gateway auth: token mismatch");
            false
        }
        None => {
            warn!("Gateway auth: no token provided");
            false
        }
    }
}

/// `Bearer <token>`, scheme matched case-insensitively
pub fn extract_bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {}", token).parse().unwrap());
        headers
    }

    #[test]
    fn test_disabled_when_unconfigured() {
        assert!(authorize("", &HeaderMap::new(), None));
    }

    #[test]
    fn test_header_token() {
        assert!(authorize("secret123", &bearer("secret123"), None));
        assert!(!authorize("secret123", &bearer("wrong"), None));
        assert!(!authorize("secret123", &HeaderMap::new(), None));
    }

    #[test]
    fn test_query_token_fallback() {
        assert!(authorize("secret123", &HeaderMap::new(), Some("secret123")));
        assert!(!authorize("secret123", &HeaderMap::new(), Some("nope")));
    }

    #[test]
    fn test_header_wins_over_query() {
        assert!(!authorize("secret123", &bearer("wrong"), Some("secret123")));
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("bearer  spaced "), Some("spaced"));
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Basic abc123"), None);
        assert_eq!(extract_bearer_token(""), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
