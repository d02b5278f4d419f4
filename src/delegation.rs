//! Delegation — on-behalf-of token exchange (RFC 8693).
//!
//! Exchanges a verified inbound token for a token scoped to the downstream
//! service, keyed by subject + audience + scopes so distinct callers never
//! share a delegated token. Exchanged tokens are cached until they come
//! within the configured margin of expiry; a near-expiry hit triggers
//! exactly one re-exchange. Cache entries are replaced wholesale.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::auth::Identity;
use crate::auth::jwks::require_https_or_loopback;
use crate::config::DelegationConfig;
use crate::{Error, Result};

/// RFC 8693 grant and token type identifiers.
const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// A downstream-scoped bearer token obtained through exchange.
#[derive(Debug, Clone)]
pub struct ExchangedToken {
    /// Bearer token for the downstream service
    pub access_token: String,
    /// Absolute expiry instant
    pub expires_at: SystemTime,
}

impl ExchangedToken {
    /// Whether the token is within `margin` of expiry (or past it).
    #[must_use]
    pub fn is_near_expiry(&self, margin: Duration) -> bool {
        SystemTime::now() + margin >= self.expires_at
    }
}

/// Transport seam for the exchange call itself.
///
/// Production uses [`HttpTokenExchange`]; tests substitute a counting stub.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Exchange `subject_token` for a token scoped to `audience`/`scopes`.
    async fn exchange(
        &self,
        subject_token: &str,
        audience: &str,
        scopes: &str,
    ) -> Result<ExchangedToken>;
}

/// Exchange endpoint response body.
#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// RFC 8693 exchange over HTTP form POST.
pub struct HttpTokenExchange {
    http: reqwest::Client,
    endpoint: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl HttpTokenExchange {
    /// Build the exchange client with a bounded timeout.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for a non-HTTPS endpoint (loopback
    /// excepted) or an unbuildable HTTP client.
    pub fn new(config: &DelegationConfig, endpoint: &str) -> Result<Self> {
        require_https_or_loopback(endpoint)
            .map_err(|e| Error::Config(format!("delegation.token_endpoint: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build exchange client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.resolve_client_secret(),
        })
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn exchange(
        &self,
        subject_token: &str,
        audience: &str,
        scopes: &str,
    ) -> Result<ExchangedToken> {
        let mut params = vec![
            ("grant_type", TOKEN_EXCHANGE_GRANT),
            ("subject_token", subject_token),
            ("subject_token_type", ACCESS_TOKEN_TYPE),
            ("requested_token_type", ACCESS_TOKEN_TYPE),
            ("audience", audience),
        ];
        if !scopes.is_empty() {
            params.push(("scope", scopes));
        }

        let mut request = self.http.post(&self.endpoint).form(&params);
        if let Some(id) = &self.client_id {
            request = request.basic_auth(id, self.client_secret.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::DelegationFailed(format!("exchange endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::DelegationFailed(format!(
                "exchange rejected: HTTP {status} - {body}"
            )));
        }

        let body: ExchangeResponse = response.json().await.map_err(|e| {
            Error::DelegationFailed(format!("malformed exchange response: {e}"))
        })?;

        Ok(ExchangedToken {
            access_token: body.access_token,
            expires_at: SystemTime::now() + Duration::from_secs(body.expires_in.unwrap_or(3600)),
        })
    }
}

/// Exchanges verified identities for downstream tokens, with caching.
pub struct DelegationExchanger {
    audience: String,
    scopes: String,
    expiry_margin: Duration,
    transport: Arc<dyn TokenExchange>,
    cache: DashMap<String, ExchangedToken>,
}

// Hand-written because the transport trait object has no Debug bound.
impl std::fmt::Debug for DelegationExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationExchanger")
            .field("audience", &self.audience)
            .field("scopes", &self.scopes)
            .field("expiry_margin", &self.expiry_margin)
            .field("cached_tokens", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl DelegationExchanger {
    /// Build the exchanger against the resolved exchange endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` when the audience is missing or the
    /// endpoint is unusable; both are checked at startup.
    pub fn new(config: &DelegationConfig, endpoint: &str) -> Result<Self> {
        let transport = Arc::new(HttpTokenExchange::new(config, endpoint)?);
        Self::with_transport(config, transport)
    }

    /// Build with a custom transport (tests count exchanges through this).
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` when the audience is missing.
    pub fn with_transport(
        config: &DelegationConfig,
        transport: Arc<dyn TokenExchange>,
    ) -> Result<Self> {
        let audience = config
            .audience
            .clone()
            .ok_or_else(|| Error::Config("delegation.audience is required".to_string()))?;
        Ok(Self {
            audience,
            scopes: config.scopes.clone(),
            expiry_margin: config.expiry_margin,
            transport,
            cache: DashMap::new(),
        })
    }

    /// Produce a downstream token for the identity, from cache when live.
    ///
    /// # Errors
    ///
    /// `DelegationFailed` when the identity holds no inbound token or the
    /// exchange fails.
    pub async fn delegate(&self, identity: &Identity) -> Result<ExchangedToken> {
        let subject_token = identity.token.as_deref().ok_or_else(|| {
            Error::DelegationFailed("identity holds no inbound token to exchange".to_string())
        })?;

        let key = self.cache_key(&identity.subject);
        if let Some(cached) = self.cache.get(&key) {
            if !cached.is_near_expiry(self.expiry_margin) {
                debug!(subject = %identity.subject, "delegated token served from cache");
                return Ok(cached.clone());
            }
        }

        // Miss or near-expiry: exactly one exchange, then the result (or
        // failure) is what the caller gets.
        let exchanged = self
            .transport
            .exchange(subject_token, &self.audience, &self.scopes)
            .await?;
        debug!(subject = %identity.subject, audience = %self.audience, "token exchanged");
        self.cache.insert(key, exchanged.clone());
        Ok(exchanged)
    }

    /// Drop the cached token for an identity.
    ///
    /// Called when the downstream rejects a delegated token with 401; the
    /// next delegated call re-exchanges.
    pub fn invalidate(&self, identity: &Identity) {
        let key = self.cache_key(&identity.subject);
        if self.cache.remove(&key).is_some() {
            warn!(subject = %identity.subject, "cached delegated token invalidated");
        }
    }

    /// Cache key: digest of subject, audience, and requested scopes.
    fn cache_key(&self, subject: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(subject.as_bytes());
        hasher.update(b":");
        hasher.update(self.audience.as_bytes());
        hasher.update(b":");
        hasher.update(self.scopes.as_bytes());
        hasher
            .finalize()
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts exchanges and returns tokens with a controllable lifetime.
    struct CountingExchange {
        calls: AtomicUsize,
        lifetime: Duration,
    }

    impl CountingExchange {
        fn new(lifetime: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                lifetime,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenExchange for CountingExchange {
        async fn exchange(
            &self,
            _subject_token: &str,
            _audience: &str,
            _scopes: &str,
        ) -> Result<ExchangedToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ExchangedToken {
                access_token: format!("downstream-token-{n}"),
                expires_at: SystemTime::now() + self.lifetime,
            })
        }
    }

    fn delegation_config() -> DelegationConfig {
        DelegationConfig {
            enabled: true,
            audience: Some("servicenow".to_string()),
            scopes: "servicenow.read".to_string(),
            ..DelegationConfig::default()
        }
    }

    fn identity_with_token(subject: &str) -> Identity {
        Identity {
            subject: subject.to_string(),
            token: Some(format!("inbound-{subject}")),
            ..Identity::anonymous()
        }
    }

    #[tokio::test]
    async fn repeated_calls_within_validity_hit_the_cache() {
        let transport = CountingExchange::new(Duration::from_secs(3600));
        let exchanger =
            DelegationExchanger::with_transport(&delegation_config(), transport.clone()).unwrap();
        let identity = identity_with_token("alice");

        let first = exchanger.delegate(&identity).await.unwrap();
        let second = exchanger.delegate(&identity).await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(first.access_token, second.access_token);
    }

    #[tokio::test]
    async fn near_expiry_token_triggers_one_re_exchange() {
        // 10 s lifetime against the default 30 s margin: every cached entry
        // is already near expiry on the next call.
        let transport = CountingExchange::new(Duration::from_secs(10));
        let exchanger =
            DelegationExchanger::with_transport(&delegation_config(), transport.clone()).unwrap();
        let identity = identity_with_token("alice");

        exchanger.delegate(&identity).await.unwrap();
        exchanger.delegate(&identity).await.unwrap();

        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn distinct_subjects_get_distinct_tokens() {
        let transport = CountingExchange::new(Duration::from_secs(3600));
        let exchanger =
            DelegationExchanger::with_transport(&delegation_config(), transport.clone()).unwrap();

        let a = exchanger.delegate(&identity_with_token("alice")).await.unwrap();
        let b = exchanger.delegate(&identity_with_token("bob")).await.unwrap();

        assert_eq!(transport.calls(), 2);
        assert_ne!(a.access_token, b.access_token);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_exchange() {
        let transport = CountingExchange::new(Duration::from_secs(3600));
        let exchanger =
            DelegationExchanger::with_transport(&delegation_config(), transport.clone()).unwrap();
        let identity = identity_with_token("alice");

        exchanger.delegate(&identity).await.unwrap();
        exchanger.invalidate(&identity);
        exchanger.delegate(&identity).await.unwrap();

        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn anonymous_identity_cannot_be_delegated() {
        let transport = CountingExchange::new(Duration::from_secs(3600));
        let exchanger =
            DelegationExchanger::with_transport(&delegation_config(), transport.clone()).unwrap();

        let err = exchanger.delegate(&Identity::anonymous()).await.unwrap_err();
        assert!(matches!(err, Error::DelegationFailed(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn missing_audience_is_a_configuration_error() {
        let config = DelegationConfig {
            enabled: true,
            ..DelegationConfig::default()
        };
        let transport = CountingExchange::new(Duration::from_secs(3600));
        let err = DelegationExchanger::with_transport(&config, transport).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
