//! Signing key fetching and caching.
//!
//! Firebase publishes the keys for ID tokens as a JWK set and the keys for
//! session cookies as a `{kid: PEM certificate}` map. [`PublicKeyCache`]
//! fetches either format, caches the parsed keys per URL, and honours
//! `Cache-Control: max-age` within configured bounds.
//!
//! # Security Considerations
//!
//! - Only HTTPS key endpoints are allowed (configurable for testing)
//! - Response size is limited
//! - TTL is bounded so a hostile `Cache-Control` cannot pin keys forever

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use tokio::sync::RwLock;
use url::Url;

/// Configuration for the key cache.
#[derive(Debug, Clone)]
pub struct KeyCacheConfig {
    /// TTL when Cache-Control is absent (default: 1 hour).
    pub default_ttl: Duration,

    /// Upper bound for any TTL (default: 24 hours).
    pub max_ttl: Duration,

    /// Lower bound for any TTL (default: 5 minutes).
    pub min_ttl: Duration,

    /// Per-request timeout (default: 10 seconds).
    pub request_timeout: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Allow plain-HTTP key URLs. Tests only.
    pub allow_http: bool,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(86400),
            min_ttl: Duration::from_secs(300),
            request_timeout: Duration::from_secs(10),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl KeyCacheConfig {
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Wire format of a key endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// RFC 7517 `{"keys": [...]}`.
    JwkSet,
    /// `{"<kid>": "-----BEGIN CERTIFICATE-----..."}`.
    PemMap,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP error: status {0}")]
    HttpError(u16),

    #[error("Failed to parse keys: {0}")]
    ParseError(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Invalid URL scheme: only HTTPS is allowed")]
    InvalidScheme,

    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge { max_size: usize },
}

struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    expires_at: Instant,
}

/// In-memory cache of provider signing keys, keyed by endpoint URL.
pub struct PublicKeyCache {
    http: reqwest::Client,
    cache: RwLock<HashMap<String, CachedKeys>>,
    config: KeyCacheConfig,
}

impl PublicKeyCache {
    #[must_use]
    pub fn new(http: reqwest::Client, config: KeyCacheConfig) -> Self {
        Self {
            http,
            cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Looks up a key by `kid`, refreshing the endpoint on a miss or expiry.
    pub async fn get_key(
        &self,
        url: &Url,
        format: KeyFormat,
        kid: &str,
    ) -> Result<DecodingKey, KeyError> {
        if let Some(key) = self.get_cached_key(url, kid).await {
            tracing::trace!(kid, %url, "signing key cache hit");
            return Ok(key);
        }

        tracing::debug!(kid, %url, "signing key cache miss");
        self.refresh(url, format).await?;

        self.get_cached_key(url, kid)
            .await
            .ok_or_else(|| KeyError::KeyNotFound(kid.to_string()))
    }

    async fn get_cached_key(&self, url: &Url, kid: &str) -> Option<DecodingKey> {
        let cache = self.cache.read().await;
        cache.get(&normalize_url(url)).and_then(|cached| {
            if Instant::now() >= cached.expires_at {
                return None;
            }
            cached.keys.get(kid).cloned()
        })
    }

    /// Fetches the endpoint and replaces its cache entry.
    pub async fn refresh(&self, url: &Url, format: KeyFormat) -> Result<(), KeyError> {
        self.validate_scheme(url)?;

        let response = self
            .http
            .get(url.as_str())
            .header("Accept", "application/json")
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(%url, error = %e, "failed to fetch signing keys");
                KeyError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(KeyError::HttpError(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_response_size
        {
            return Err(KeyError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let ttl = self.parse_cache_control(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| KeyError::NetworkError(e.to_string()))?;
        if body.len() > self.config.max_response_size {
            return Err(KeyError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let keys = parse_keys(&body, format)?;
        tracing::debug!(%url, count = keys.len(), ?ttl, "cached signing keys");

        let mut cache = self.cache.write().await;
        cache.insert(
            normalize_url(url),
            CachedKeys {
                keys,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn validate_scheme(&self, url: &Url) -> Result<(), KeyError> {
        match url.scheme() {
            "https" => Ok(()),
            "http" if self.config.allow_http => Ok(()),
            _ => Err(KeyError::InvalidScheme),
        }
    }

    /// `max-age` clamped to `[min_ttl, max_ttl]`, or `default_ttl`.
    fn parse_cache_control(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let ttl = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split(',').find_map(|directive| {
                    directive
                        .trim()
                        .strip_prefix("max-age=")
                        .and_then(|s| s.parse::<u64>().ok())
                })
            })
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl);

        ttl.min(self.config.max_ttl).max(self.config.min_ttl)
    }

    pub async fn invalidate(&self, url: &Url) {
        self.cache.write().await.remove(&normalize_url(url));
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

/// Parses a key endpoint body. Keys that cannot be used for RSA
/// verification are skipped.
fn parse_keys(body: &[u8], format: KeyFormat) -> Result<HashMap<String, DecodingKey>, KeyError> {
    match format {
        KeyFormat::JwkSet => {
            let set: JwkSet =
                serde_json::from_slice(body).map_err(|e| KeyError::ParseError(e.to_string()))?;
            Ok(set
                .keys
                .iter()
                .filter(|jwk| matches!(jwk.algorithm, AlgorithmParameters::RSA(_)))
                .filter_map(|jwk| {
                    let kid = jwk.common.key_id.clone()?;
                    DecodingKey::from_jwk(jwk).ok().map(|key| (kid, key))
                })
                .collect())
        }
        KeyFormat::PemMap => {
            let map: HashMap<String, String> =
                serde_json::from_slice(body).map_err(|e| KeyError::ParseError(e.to_string()))?;
            Ok(map
                .into_iter()
                .filter_map(|(kid, pem)| match DecodingKey::from_rsa_pem(pem.as_bytes()) {
                    Ok(key) => Some((kid, key)),
                    Err(e) => {
                        tracing::warn!(kid, error = %e, "skipping unparseable certificate");
                        None
                    }
                })
                .collect())
        }
    }
}

fn normalize_url(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}
