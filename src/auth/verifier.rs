//! Token verification — one closed strategy per authentication mode.
//!
//! # Verification flow (JWT strategies)
//!
//! 1. Pre-check `exp` from the unverified claim set; an expired token is
//!    reported as expired no matter what else is wrong with it.
//! 2. Decode the header and require its algorithm to match configuration
//!    (prevents algorithm-confusion downgrades).
//! 3. Resolve the signing key: shared secret, inline PEM, or a JWKS lookup
//!    by `kid` through the key cache.
//! 4. Verify signature, `exp`/`nbf` (30 s clock-skew leeway), then check
//!    `iss`, `aud` (string or array form) and required scopes manually so
//!    each failure maps to a distinct error kind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use super::identity::{Identity, scopes_from_claims};
use super::jwks::KeyCache;
use crate::config::{AuthConfig, JwtParams, parse_algorithm, resolve_secret};
use crate::{Error, Result};

/// Clock-skew allowance applied to `exp` and `nbf`, in seconds.
const CLOCK_SKEW_LEEWAY: u64 = 30;

/// Verifies inbound bearer tokens against the active strategy.
pub struct TokenVerifier {
    strategy: Strategy,
    key_cache: Arc<KeyCache>,
}

/// Closed set of verification strategies; exactly one is active.
enum Strategy {
    Disabled,
    StaticToken {
        entries: Vec<StaticEntry>,
    },
    Jwt(JwtCheck),
    OauthProxy(JwtCheck),
    OidcProxy(JwtCheck),
    RemoteOauth {
        trusted_issuers: Vec<String>,
        jwks_uris: HashMap<String, String>,
        resource: String,
        required_scopes: Vec<String>,
    },
}

/// One resolved static token entry.
struct StaticEntry {
    token: String,
    client_id: String,
    scopes: Vec<String>,
}

/// Parameters shared by every JWT-shaped verification.
struct JwtCheck {
    algorithm: Algorithm,
    issuer: Option<String>,
    audience: Option<String>,
    required_scopes: Vec<String>,
    key: KeySource,
}

/// Where the signing key comes from.
enum KeySource {
    Secret(Vec<u8>),
    Pem(DecodingKey),
    Jwks(String),
}

impl TokenVerifier {
    /// Build a verifier for the configured strategy.
    ///
    /// Resolves secrets and reads key files up front so no configuration
    /// problem surfaces at request time.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for unusable key material or an
    /// unknown algorithm, `Io` when a key file cannot be read.
    pub fn new(config: &AuthConfig, key_cache: Arc<KeyCache>) -> Result<Self> {
        let strategy = match config {
            AuthConfig::Disabled => Strategy::Disabled,
            AuthConfig::StaticToken { tokens } => {
                let entries = tokens
                    .iter()
                    .map(|entry| {
                        let resolved = entry.resolve_token();
                        if entry.token == "auto" {
                            info!(
                                client_id = %entry.client_id,
                                token = %resolved,
                                "generated static token"
                            );
                        }
                        StaticEntry {
                            token: resolved,
                            client_id: entry.client_id.clone(),
                            scopes: entry.scopes.clone(),
                        }
                    })
                    .collect();
                Strategy::StaticToken { entries }
            }
            AuthConfig::Jwt(params) => Strategy::Jwt(jwt_check(params)?),
            AuthConfig::OauthProxy(params) => Strategy::OauthProxy(local_hmac_check(
                &params.issuer,
                params.audience.as_deref(),
                params.signing_secret.as_deref(),
                &params.required_scopes,
            )),
            AuthConfig::OidcProxy(params) => Strategy::OidcProxy(local_hmac_check(
                &params.issuer,
                params.audience.as_deref(),
                params.signing_secret.as_deref(),
                &params.required_scopes,
            )),
            AuthConfig::RemoteOauth(params) => Strategy::RemoteOauth {
                trusted_issuers: params.authorization_servers.clone(),
                jwks_uris: params.jwks_uris.clone(),
                resource: params.resource.clone(),
                required_scopes: params.required_scopes.clone(),
            },
        };

        Ok(Self {
            strategy,
            key_cache,
        })
    }

    /// Verify a raw bearer token (possibly absent) into an [`Identity`].
    ///
    /// # Errors
    ///
    /// `MissingCredentials` when a token is required but absent;
    /// `TokenExpired`, `InsufficientScope` or `InvalidCredentials` for the
    /// corresponding verification failures.
    pub async fn verify(&self, token: Option<&str>) -> Result<Identity> {
        let Some(token) = token else {
            return if matches!(self.strategy, Strategy::Disabled) {
                Ok(Identity::anonymous())
            } else {
                Err(Error::MissingCredentials)
            };
        };

        match &self.strategy {
            Strategy::Disabled => Ok(Identity::anonymous()),
            Strategy::StaticToken { entries } => verify_static(token, entries),
            Strategy::Jwt(check) | Strategy::OauthProxy(check) | Strategy::OidcProxy(check) => {
                self.verify_jwt(token, check).await
            }
            Strategy::RemoteOauth {
                trusted_issuers,
                jwks_uris,
                resource,
                required_scopes,
            } => {
                let check =
                    remote_check(token, trusted_issuers, jwks_uris, resource, required_scopes)?;
                self.verify_jwt(token, &check).await
            }
        }
    }

    /// Verify a JWT against one resolved check.
    async fn verify_jwt(&self, token: &str, check: &JwtCheck) -> Result<Identity> {
        // Expired tokens report as expired regardless of signature validity.
        let unverified = decode_unverified_claims(token)?;
        if let Some(exp) = unverified.get("exp").and_then(Value::as_u64) {
            if exp.saturating_add(CLOCK_SKEW_LEEWAY) < unix_now() {
                return Err(Error::TokenExpired);
            }
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::InvalidCredentials(format!("malformed token header: {e}")))?;
        if header.alg != check.algorithm {
            return Err(Error::InvalidCredentials(format!(
                "token algorithm {:?} does not match configured {:?}",
                header.alg, check.algorithm
            )));
        }

        let key = match &check.key {
            KeySource::Secret(secret) => DecodingKey::from_secret(secret),
            KeySource::Pem(key) => key.clone(),
            KeySource::Jwks(uri) => {
                let kid = header.kid.as_deref().ok_or_else(|| {
                    Error::InvalidCredentials("token header has no kid".to_string())
                })?;
                self.key_cache.resolve(uri, kid).await?
            }
        };

        let mut validation = Validation::new(check.algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.validate_nbf = true;
        // Issuer and audience are checked manually below so each mismatch
        // maps to a distinct message; arrays are accepted for `aud`.
        validation.validate_aud = false;

        let decoded = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::TokenExpired,
                jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                    Error::InvalidCredentials("token not yet valid".to_string())
                }
                _ => Error::InvalidCredentials(format!("token verification failed: {e}")),
            })?;
        let claims = decoded.claims;

        if let Some(expected) = &check.issuer {
            let iss = claims.get("iss").and_then(Value::as_str).unwrap_or("");
            if iss != expected {
                return Err(Error::InvalidCredentials(format!(
                    "issuer mismatch: expected {expected}, got {iss}"
                )));
            }
        }

        if let Some(expected) = &check.audience {
            check_audience(claims.get("aud"), expected)?;
        }

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let identity = Identity {
            subject,
            issuer: claims
                .get("iss")
                .and_then(Value::as_str)
                .map(str::to_string),
            expires_at: claims
                .get("exp")
                .and_then(Value::as_u64)
                .map(|exp| UNIX_EPOCH + Duration::from_secs(exp)),
            scopes: scopes_from_claims(&claims),
            claims,
            token: Some(token.to_string()),
        };

        let missing = identity.missing_scopes(&check.required_scopes);
        if !missing.is_empty() {
            return Err(Error::InsufficientScope { missing });
        }

        debug!(subject = %identity.subject, "token verified");
        Ok(identity)
    }
}

/// Build the check for the `jwt` strategy from validated parameters.
fn jwt_check(params: &JwtParams) -> Result<JwtCheck> {
    let algorithm = parse_algorithm(&params.algorithm)
        .ok_or_else(|| Error::Config(format!("unknown algorithm: {}", params.algorithm)))?;

    let key = if params.is_hmac() {
        let secret = params
            .resolve_secret()
            .ok_or_else(|| Error::Config("HMAC algorithm requires a secret".to_string()))?;
        KeySource::Secret(secret.into_bytes())
    } else if let Some(pem) = &params.public_key {
        KeySource::Pem(decoding_key_from_pem(algorithm, pem.as_bytes())?)
    } else if let Some(path) = &params.public_key_file {
        let pem = std::fs::read(path)?;
        KeySource::Pem(decoding_key_from_pem(algorithm, &pem)?)
    } else if let Some(uri) = &params.jwks_uri {
        KeySource::Jwks(uri.clone())
    } else {
        return Err(Error::Config(
            "asymmetric algorithm requires a key source".to_string(),
        ));
    };

    Ok(JwtCheck {
        algorithm,
        issuer: params.issuer.clone(),
        audience: params.audience.clone(),
        required_scopes: params.required_scopes.clone(),
        key,
    })
}

/// Build the check for locally minted proxy tokens (HS256 against the
/// configured signing secret; a missing secret is generated at startup).
fn local_hmac_check(
    issuer: &str,
    audience: Option<&str>,
    signing_secret: Option<&str>,
    required_scopes: &[String],
) -> JwtCheck {
    let secret = signing_secret.map_or_else(|| resolve_secret("auto"), resolve_secret);
    JwtCheck {
        algorithm: Algorithm::HS256,
        issuer: Some(issuer.to_string()),
        audience: audience.map(str::to_string),
        required_scopes: required_scopes.to_vec(),
        key: KeySource::Secret(secret.into_bytes()),
    }
}

/// Build a per-issuer check for the `remote-oauth` strategy.
///
/// The issuer from the unverified claims must be one of the trusted
/// authorization servers; the key is then resolved from that issuer's JWKS.
fn remote_check(
    token: &str,
    trusted_issuers: &[String],
    jwks_uris: &HashMap<String, String>,
    resource: &str,
    required_scopes: &[String],
) -> Result<JwtCheck> {
    let unverified = decode_unverified_claims(token)?;
    let issuer = unverified
        .get("iss")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidCredentials("token has no issuer".to_string()))?;

    if !trusted_issuers.iter().any(|t| t == issuer) {
        return Err(Error::InvalidCredentials(format!(
            "untrusted issuer: {issuer}"
        )));
    }

    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| Error::InvalidCredentials(format!("malformed token header: {e}")))?;
    let algorithm = match header.alg {
        alg @ (Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::ES256
        | Algorithm::ES384
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512
        | Algorithm::EdDSA) => alg,
        other => {
            return Err(Error::InvalidCredentials(format!(
                "remote issuers must use asymmetric signatures, got {other:?}"
            )));
        }
    };

    let jwks_uri = jwks_uris
        .get(issuer)
        .cloned()
        .unwrap_or_else(|| default_jwks_uri(issuer));

    Ok(JwtCheck {
        algorithm,
        issuer: Some(issuer.to_string()),
        audience: Some(resource.to_string()),
        required_scopes: required_scopes.to_vec(),
        key: KeySource::Jwks(jwks_uri),
    })
}

/// Verify a static bearer token against the configured entries.
fn verify_static(token: &str, entries: &[StaticEntry]) -> Result<Identity> {
    for entry in entries {
        if constant_time_eq(token, &entry.token) {
            return Ok(Identity {
                subject: entry.client_id.clone(),
                issuer: None,
                scopes: entry.scopes.clone(),
                claims: Map::new(),
                expires_at: None,
                token: Some(token.to_string()),
            });
        }
    }
    Err(Error::InvalidCredentials("unknown token".to_string()))
}

/// Length-guarded constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Decode a JWT payload without signature verification.
///
/// Used only for the expiry pre-check and `remote-oauth` issuer routing.
fn decode_unverified_claims(token: &str) -> Result<Map<String, Value>> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::InvalidCredentials("malformed token".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| Error::InvalidCredentials("malformed token payload".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| Error::InvalidCredentials("malformed token payload".to_string()))
}

/// Validate the `aud` claim, accepting single-string and array forms.
fn check_audience(aud: Option<&Value>, expected: &str) -> Result<()> {
    let matches = match aud {
        Some(Value::String(s)) => s == expected,
        Some(Value::Array(list)) => list.iter().any(|v| v.as_str() == Some(expected)),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(Error::InvalidCredentials(format!(
            "audience mismatch: token is not for {expected}"
        )))
    }
}

/// Convert PEM key material into a decoding key for the algorithm family.
fn decoding_key_from_pem(algorithm: Algorithm, pem: &[u8]) -> Result<DecodingKey> {
    let key = match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            return Err(Error::Config(
                "PEM key material is incompatible with HMAC algorithms".to_string(),
            ));
        }
    };
    key.map_err(|e| Error::Config(format!("unusable public key: {e}")))
}

/// Derive the conventional JWKS URI for an issuer.
fn default_jwks_uri(issuer: &str) -> String {
    format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeyCacheConfig, StaticTokenEntry};
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    const TEST_SECRET: &str = "test-signing-secret";

    fn cache() -> Arc<KeyCache> {
        Arc::new(KeyCache::new(&KeyCacheConfig::default()).unwrap())
    }

    fn verifier(config: &AuthConfig) -> TokenVerifier {
        TokenVerifier::new(config, cache()).unwrap()
    }

    fn hmac_config(required_scopes: &[&str]) -> AuthConfig {
        AuthConfig::Jwt(JwtParams {
            issuer: Some("https://idp.example.com".to_string()),
            audience: Some("snowgate".to_string()),
            algorithm: "HS256".to_string(),
            secret: Some(TEST_SECRET.to_string()),
            required_scopes: required_scopes.iter().map(|s| (*s).to_string()).collect(),
            ..JwtParams::default()
        })
    }

    fn mint(claims: &serde_json::Value, secret: &str) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn valid_claims() -> serde_json::Value {
        json!({
            "sub": "alice",
            "iss": "https://idp.example.com",
            "aud": "snowgate",
            "exp": unix_now() + 3600,
            "scope": "servicenow.read servicenow.write"
        })
    }

    #[tokio::test]
    async fn disabled_strategy_yields_anonymous_identity() {
        let v = verifier(&AuthConfig::Disabled);
        let id = v.verify(None).await.unwrap();
        assert_eq!(id.subject, "anonymous");
        assert!(id.scopes.is_empty());
        // A presented token is ignored, not rejected.
        assert!(v.verify(Some("whatever")).await.is_ok());
    }

    #[tokio::test]
    async fn missing_token_is_missing_credentials() {
        let v = verifier(&hmac_config(&[]));
        assert!(matches!(
            v.verify(None).await.unwrap_err(),
            Error::MissingCredentials
        ));
    }

    #[tokio::test]
    async fn valid_token_yields_identity_with_scopes() {
        let v = verifier(&hmac_config(&["servicenow.read"]));
        let token = mint(&valid_claims(), TEST_SECRET);
        let id = v.verify(Some(&token)).await.unwrap();
        assert_eq!(id.subject, "alice");
        assert_eq!(id.issuer.as_deref(), Some("https://idp.example.com"));
        assert!(id.has_scope("servicenow.write"));
        assert!(id.expires_at.is_some());
        assert_eq!(id.token.as_deref(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn expired_token_reports_expired_even_when_tampered() {
        let v = verifier(&hmac_config(&[]));
        let mut claims = valid_claims();
        claims["exp"] = json!(unix_now() - 3600);
        let token = mint(&claims, TEST_SECRET);

        assert!(matches!(
            v.verify(Some(&token)).await.unwrap_err(),
            Error::TokenExpired
        ));

        // Break the signature; the result must still be TokenExpired.
        let tampered = format!("{}x", token);
        assert!(matches!(
            v.verify(Some(&tampered)).await.unwrap_err(),
            Error::TokenExpired
        ));
    }

    #[tokio::test]
    async fn tampered_payload_is_invalid_credentials() {
        let v = verifier(&hmac_config(&[]));
        let token = mint(&valid_claims(), TEST_SECRET);
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let evil = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&json!({
                "sub": "mallory",
                "iss": "https://idp.example.com",
                "aud": "snowgate",
                "exp": unix_now() + 3600
            }))
            .unwrap(),
        );
        parts[1] = evil;
        let tampered = parts.join(".");

        assert!(matches!(
            v.verify(Some(&tampered)).await.unwrap_err(),
            Error::InvalidCredentials(_)
        ));
    }

    #[tokio::test]
    async fn wrong_signing_secret_is_invalid_credentials() {
        let v = verifier(&hmac_config(&[]));
        let token = mint(&valid_claims(), "a-different-secret");
        assert!(matches!(
            v.verify(Some(&token)).await.unwrap_err(),
            Error::InvalidCredentials(_)
        ));
    }

    #[tokio::test]
    async fn issuer_mismatch_is_invalid_credentials() {
        let v = verifier(&hmac_config(&[]));
        let mut claims = valid_claims();
        claims["iss"] = json!("https://evil.example.com");
        let token = mint(&claims, TEST_SECRET);
        let err = v.verify(Some(&token)).await.unwrap_err();
        assert!(err.to_string().contains("issuer mismatch"));
    }

    #[tokio::test]
    async fn audience_mismatch_is_invalid_credentials() {
        let v = verifier(&hmac_config(&[]));
        let mut claims = valid_claims();
        claims["aud"] = json!("some-other-service");
        let token = mint(&claims, TEST_SECRET);
        let err = v.verify(Some(&token)).await.unwrap_err();
        assert!(err.to_string().contains("audience mismatch"));
    }

    #[tokio::test]
    async fn audience_array_form_is_accepted() {
        let v = verifier(&hmac_config(&[]));
        let mut claims = valid_claims();
        claims["aud"] = json!(["other", "snowgate"]);
        let token = mint(&claims, TEST_SECRET);
        assert!(v.verify(Some(&token)).await.is_ok());
    }

    #[tokio::test]
    async fn missing_required_scope_is_insufficient_scope() {
        let v = verifier(&hmac_config(&["servicenow.admin"]));
        let token = mint(&valid_claims(), TEST_SECRET);
        let Err(Error::InsufficientScope { missing }) = v.verify(Some(&token)).await else {
            panic!("expected InsufficientScope");
        };
        assert_eq!(missing, vec!["servicenow.admin"]);
    }

    #[tokio::test]
    async fn extreme_exp_value_is_handled_without_panicking() {
        // An attacker controls `exp` in the unverified pre-check, so the
        // leeway addition must not overflow on u64::MAX.
        let v = verifier(&hmac_config(&[]));
        let mut claims = valid_claims();
        claims["exp"] = json!(u64::MAX);
        let token = mint(&claims, TEST_SECRET);
        assert!(v.verify(Some(&token)).await.is_ok());
    }

    #[tokio::test]
    async fn list_form_scope_claim_satisfies_required_scopes() {
        let v = verifier(&hmac_config(&["servicenow.read"]));
        let mut claims = valid_claims();
        claims["scope"] = json!(["servicenow.read", "servicenow.write"]);
        let token = mint(&claims, TEST_SECRET);
        let id = v.verify(Some(&token)).await.unwrap();
        assert!(id.has_scope("servicenow.write"));
    }

    #[tokio::test]
    async fn scp_list_claim_satisfies_required_scopes() {
        let v = verifier(&hmac_config(&["servicenow.read"]));
        let mut claims = valid_claims();
        claims.as_object_mut().unwrap().remove("scope");
        claims["scp"] = json!(["servicenow.read"]);
        let token = mint(&claims, TEST_SECRET);
        assert!(v.verify(Some(&token)).await.is_ok());
    }

    #[tokio::test]
    async fn algorithm_mismatch_is_rejected() {
        // Configured for HS512 but presented an HS256 token.
        let config = AuthConfig::Jwt(JwtParams {
            algorithm: "HS512".to_string(),
            secret: Some(TEST_SECRET.to_string()),
            ..JwtParams::default()
        });
        let v = verifier(&config);
        let token = mint(&valid_claims(), TEST_SECRET);
        let err = v.verify(Some(&token)).await.unwrap_err();
        assert!(err.to_string().contains("algorithm"));
    }

    #[tokio::test]
    async fn static_token_maps_to_configured_identity() {
        let config = AuthConfig::StaticToken {
            tokens: vec![StaticTokenEntry {
                token: "s3cret".to_string(),
                client_id: "ci-bot".to_string(),
                scopes: vec!["servicenow.read".to_string()],
            }],
        };
        let v = verifier(&config);
        let id = v.verify(Some("s3cret")).await.unwrap();
        assert_eq!(id.subject, "ci-bot");
        assert!(id.has_scope("servicenow.read"));

        assert!(matches!(
            v.verify(Some("wrong")).await.unwrap_err(),
            Error::InvalidCredentials(_)
        ));
    }

    #[tokio::test]
    async fn oidc_proxy_verifies_locally_minted_tokens() {
        let config = AuthConfig::OidcProxy(crate::config::OidcProxyParams {
            config_url: "https://idp.example.com/.well-known/openid-configuration".to_string(),
            client_id: "snowgate".to_string(),
            client_secret: "upstream".to_string(),
            issuer: "snowgate".to_string(),
            signing_secret: Some(TEST_SECRET.to_string()),
            ..crate::config::OidcProxyParams::default()
        });
        let v = verifier(&config);
        let claims = json!({
            "sub": "alice",
            "iss": "snowgate",
            "exp": unix_now() + 600,
            "scope": "servicenow.read"
        });
        let id = v.verify(Some(&mint(&claims, TEST_SECRET))).await.unwrap();
        assert_eq!(id.issuer.as_deref(), Some("snowgate"));
    }

    #[tokio::test]
    async fn remote_oauth_rejects_untrusted_issuer() {
        let config = AuthConfig::RemoteOauth(crate::config::RemoteOauthParams {
            authorization_servers: vec!["https://trusted.example.com".to_string()],
            resource: "https://snowgate.example.com".to_string(),
            ..crate::config::RemoteOauthParams::default()
        });
        let v = verifier(&config);
        let claims = json!({
            "sub": "alice",
            "iss": "https://evil.example.com",
            "exp": unix_now() + 600
        });
        let err = v.verify(Some(&mint(&claims, TEST_SECRET))).await.unwrap_err();
        assert!(err.to_string().contains("untrusted issuer"));
    }

    #[tokio::test]
    async fn remote_oauth_rejects_hmac_tokens() {
        let config = AuthConfig::RemoteOauth(crate::config::RemoteOauthParams {
            authorization_servers: vec!["https://trusted.example.com".to_string()],
            resource: "https://snowgate.example.com".to_string(),
            ..crate::config::RemoteOauthParams::default()
        });
        let v = verifier(&config);
        let claims = json!({
            "sub": "alice",
            "iss": "https://trusted.example.com",
            "exp": unix_now() + 600
        });
        let err = v.verify(Some(&mint(&claims, TEST_SECRET))).await.unwrap_err();
        assert!(err.to_string().contains("asymmetric"));
    }

    #[test]
    fn constant_time_eq_requires_equal_length_and_bytes() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn default_jwks_uri_follows_discovery_convention() {
        assert_eq!(
            default_jwks_uri("https://idp.example.com/"),
            "https://idp.example.com/.well-known/jwks.json"
        );
    }
}
