//! Authentication: identity model, key material cache, token verification.

pub mod identity;
pub mod jwks;
pub mod verifier;

pub use identity::{ANONYMOUS_SUBJECT, Identity, bearer_token};
pub use jwks::KeyCache;
pub use verifier::TokenVerifier;

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::{Error, Result};

/// Endpoints discovered from an OIDC provider configuration document.
///
/// Fetched once at startup when a strategy carries a configuration URL;
/// explicit configuration values override discovered ones.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcEndpoints {
    /// Token endpoint, used for delegation exchange
    pub token_endpoint: Option<String>,
    /// JWKS endpoint, used for verification
    pub jwks_uri: Option<String>,
}

/// Fetch the OIDC provider configuration document.
///
/// # Errors
///
/// Returns `ConfigurationError` when the document cannot be fetched or
/// parsed; discovery failures are fatal at startup.
pub async fn discover_oidc(config_url: &str, timeout: Duration) -> Result<OidcEndpoints> {
    jwks::require_https_or_loopback(config_url)
        .map_err(|e| Error::Config(format!("auth.config_url: {e}")))?;

    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to build discovery client: {e}")))?;

    let endpoints: OidcEndpoints = http
        .get(config_url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| Error::Config(format!("OIDC discovery failed for {config_url}: {e}")))?
        .json()
        .await
        .map_err(|e| Error::Config(format!("malformed OIDC configuration document: {e}")))?;

    info!(
        config_url = %config_url,
        token_endpoint = endpoints.token_endpoint.as_deref().unwrap_or("-"),
        jwks_uri = endpoints.jwks_uri.as_deref().unwrap_or("-"),
        "discovered OIDC endpoints"
    );
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_failure_is_a_configuration_error() {
        let err = discover_oidc(
            "http://127.0.0.1:1/.well-known/openid-configuration",
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn discovery_rejects_plain_http_outside_loopback() {
        let err = discover_oidc(
            "http://idp.example.com/.well-known/openid-configuration",
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("HTTPS"));
    }
}
