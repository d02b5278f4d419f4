//! Key material cache — fetched JWKS documents with expiry-based refresh.
//!
//! Entries are keyed by JWKS source URL and replaced wholesale on refresh,
//! never mutated in place, so concurrent lookups never see a partially
//! updated key set. Stale entries are refreshed lazily on next use; there is
//! no background timer. An unknown `kid` triggers exactly one forced refresh
//! before failing, which prevents indefinite re-fetching when the key truly
//! does not exist.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, JwkSet},
};
use tracing::{debug, warn};

use crate::config::KeyCacheConfig;
use crate::{Error, Result};

/// One cached JWKS document.
struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedKeys {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// Cache of signing key sets, one entry per JWKS source URL.
pub struct KeyCache {
    sets: DashMap<String, CachedKeys>,
    http: reqwest::Client,
    ttl: Duration,
}

impl KeyCache {
    /// Create a cache with the configured TTL and fetch timeout.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` when the HTTP client cannot be built;
    /// a fallback client would silently lose the fetch timeout.
    pub fn new(config: &KeyCacheConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build key fetch client: {e}")))?;
        Ok(Self {
            sets: DashMap::new(),
            http,
            ttl: config.ttl,
        })
    }

    /// Resolve a decoding key by `kid` from the given JWKS source.
    ///
    /// Cache miss or stale entry triggers a fetch; an unknown `kid` in a
    /// fresh document triggers one forced refresh, then fails.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` when the key cannot be resolved, the
    /// fetch fails, or the JWKS endpoint is not HTTPS (loopback excepted).
    pub async fn resolve(&self, jwks_uri: &str, kid: &str) -> Result<DecodingKey> {
        let jwks = self.get_or_fetch(jwks_uri, false).await?;
        if let Some(key) = find_key(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = %kid, "signing key not in cached JWKS, refreshing");
        let jwks = self.get_or_fetch(jwks_uri, true).await?;
        find_key(&jwks, kid)
            .ok_or_else(|| Error::InvalidCredentials(format!("unknown signing key: {kid}")))
    }

    /// Return the cached key set, fetching when stale, missing, or forced.
    async fn get_or_fetch(&self, jwks_uri: &str, force_refresh: bool) -> Result<JwkSet> {
        if !force_refresh {
            if let Some(cached) = self.sets.get(jwks_uri) {
                if !cached.is_stale() {
                    return Ok(cached.keys.clone());
                }
            }
        }

        require_https_or_loopback(jwks_uri)?;

        debug!(uri = %jwks_uri, "fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                warn!(uri = %jwks_uri, error = %e, "JWKS fetch failed");
                Error::InvalidCredentials(format!("signing key fetch failed: {e}"))
            })?
            .json()
            .await
            .map_err(|e| Error::InvalidCredentials(format!("malformed JWKS document: {e}")))?;

        self.sets.insert(
            jwks_uri.to_string(),
            CachedKeys {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
                ttl: self.ttl,
            },
        );

        Ok(jwks)
    }
}

/// Find a JWK by `kid` and convert it to a `DecodingKey`.
fn find_key(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        if jwk.common.key_id.as_deref() != Some(kid) {
            continue;
        }
        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}

/// Reject plain-HTTP endpoints except loopback (local development).
pub(crate) fn require_https_or_loopback(uri: &str) -> Result<()> {
    let parsed = url::Url::parse(uri)
        .map_err(|e| Error::InvalidCredentials(format!("invalid endpoint URL: {e}")))?;
    if parsed.scheme() == "https" {
        return Ok(());
    }
    let is_loopback = matches!(
        parsed.host_str(),
        Some("localhost" | "127.0.0.1" | "[::1]" | "::1")
    );
    if parsed.scheme() == "http" && is_loopback {
        return Ok(());
    }
    Err(Error::InvalidCredentials(format!(
        "endpoint must use HTTPS: {uri}"
    )))
}
