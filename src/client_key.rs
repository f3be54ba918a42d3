//! Client identity used to partition rate limit state.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use clap::ValueEnum;
use std::convert::Infallible;
use std::fmt;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const UNKNOWN_CLIENT: &str = "unknown";

/// How the client key is derived from the forwarded-address header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum KeyStrategy {
    /// The whole header value, trimmed.
    #[default]
    ForwardedHeader,
    /// Only the first comma separated address.
    FirstHop,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn from_headers(headers: &HeaderMap, strategy: KeyStrategy) -> Self {
        let value = headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .map(|v| match strategy {
                KeyStrategy::ForwardedHeader => v,
                KeyStrategy::FirstHop => v.split(',').next().unwrap_or("").trim(),
            })
            .filter(|v| !v.is_empty());

        Self(value.unwrap_or(UNKNOWN_CLIENT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracts the key with the strategy stored in request extensions by the
/// router, defaulting to [`KeyStrategy::ForwardedHeader`].
#[async_trait]
impl<S> FromRequestParts<S> for ClientKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let strategy = parts
            .extensions
            .get::<KeyStrategy>()
            .copied()
            .unwrap_or_default();
        Ok(Self::from_headers(&parts.headers, strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_whole_header_value() {
        let key = ClientKey::from_headers(
            &headers(" 192.168.1.1, 10.0.0.1 "),
            KeyStrategy::ForwardedHeader,
        );
        assert_eq!(key.as_str(), "192.168.1.1, 10.0.0.1");
    }

    #[test]
    fn test_first_hop() {
        let key = ClientKey::from_headers(&headers("192.168.1.1, 10.0.0.1"), KeyStrategy::FirstHop);
        assert_eq!(key.as_str(), "192.168.1.1");
    }

    #[test]
    fn test_fallback_when_absent_or_blank() {
        let key = ClientKey::from_headers(&HeaderMap::new(), KeyStrategy::ForwardedHeader);
        assert_eq!(key.as_str(), UNKNOWN_CLIENT);

        let key = ClientKey::from_headers(&headers("   "), KeyStrategy::FirstHop);
        assert_eq!(key.as_str(), UNKNOWN_CLIENT);
    }

    #[tokio::test]
    async fn test_extractor_uses_strategy_extension() {
        let request = axum::http::Request::builder()
            .header(FORWARDED_FOR_HEADER, "203.0.113.1, 10.0.0.1")
            .extension(KeyStrategy::FirstHop)
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let key = ClientKey::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(key.as_str(), "203.0.113.1");
    }
}
