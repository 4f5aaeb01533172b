//! Credential extraction and the rate-limit key.
//!
//! Bearer credentials are forwarded per request (`X-API-Token`,
//! `X-API-Base-URL`) and fall back to the configured defaults. They are
//! never validated here — the downstream platform is the authority — and
//! never persisted.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use dp_domain::chat::Credentials;
use dp_domain::config::Config;

pub const TOKEN_HEADER: &str = "x-api-token";
pub const BASE_URL_HEADER: &str = "x-api-base-url";

pub fn extract_credentials(headers: &HeaderMap, config: &Config) -> Credentials {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| config.platform.token.clone());
    let base_url = headers
        .get(BASE_URL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| config.platform.base_url.clone());
    Credentials { token, base_url }
}

/// Rate-limit bucket key: hash of the presented token (so limits follow
/// the credential, not the source address). Anonymous requests share one
/// bucket.
pub fn credential_key(headers: &HeaderMap) -> String {
    match headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        Some(token) if !token.is_empty() => hex::encode(Sha256::digest(token.as_bytes())),
        _ => "anonymous".to_string(),
    }
}

/// Per-credential key extractor for tower_governor.
#[derive(Clone)]
pub struct CredentialKeyExtractor;

impl tower_governor::key_extractor::KeyExtractor for CredentialKeyExtractor {
    type Key = String;

    fn extract<T>(
        &self,
        req: &axum::http::Request<T>,
    ) -> Result<Self::Key, tower_governor::GovernorError> {
        Ok(credential_key(req.headers()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn headers_override_config_defaults() {
        let mut config = Config::default();
        config.platform.token = "default-token".into();
        config.platform.base_url = "https://default".into();

        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("per-request"));

        let creds = extract_credentials(&headers, &config);
        assert_eq!(creds.token, "per-request");
        assert_eq!(creds.base_url, "https://default");
    }

    #[test]
    fn credential_key_is_stable_and_opaque() {
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("secret"));
        let a = credential_key(&headers);
        let b = credential_key(&headers);
        assert_eq!(a, b);
        assert!(!a.contains("secret"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn missing_token_shares_anonymous_bucket() {
        assert_eq!(credential_key(&HeaderMap::new()), "anonymous");
    }
}
