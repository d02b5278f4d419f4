//! Configuration management
//!
//! Configuration is layered: YAML file, then environment variables with the
//! `SNOWGATE_` prefix (`__` separates nesting levels). Exactly one
//! authentication strategy is active per instance; `Config::validate` rejects
//! contradictory or incomplete settings at startup so no configuration
//! problem ever surfaces at request time.

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default embedded policy file path
pub const DEFAULT_POLICY_FILE: &str = "mcp_policies.json";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication strategy
    pub auth: AuthConfig,
    /// Token delegation (on-behalf-of exchange) configuration
    pub delegation: DelegationConfig,
    /// Authorization (policy) configuration
    pub authorization: AuthzConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Signing key cache configuration
    pub key_cache: KeyCacheConfig,
    /// Downstream ServiceNow MCP server
    pub downstream: DownstreamConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8960,
            request_timeout: Duration::from_secs(30),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Authentication strategy selection.
///
/// Exactly one variant is active per server instance. Strategy-specific
/// parameters live on the variant; `validate` rejects incomplete or
/// contradictory combinations before the listener binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum AuthConfig {
    /// No authentication; every request gets an anonymous identity
    Disabled,
    /// Fixed bearer tokens mapped to client identities
    StaticToken {
        /// Accepted tokens and the identities they map to
        #[serde(default)]
        tokens: Vec<StaticTokenEntry>,
    },
    /// Bearer JWTs verified against a shared secret or public key material
    Jwt(JwtParams),
    /// Tokens minted by this server fronting a plain OAuth provider
    OauthProxy(OauthProxyParams),
    /// Tokens minted by this server fronting an OIDC provider
    OidcProxy(OidcProxyParams),
    /// Tokens issued by trusted external authorization servers
    RemoteOauth(RemoteOauthParams),
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::Disabled
    }
}

impl AuthConfig {
    /// Strategy name as it appears in configuration
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::StaticToken { .. } => "static-token",
            Self::Jwt(_) => "jwt",
            Self::OauthProxy(_) => "oauth-proxy",
            Self::OidcProxy(_) => "oidc-proxy",
            Self::RemoteOauth(_) => "remote-oauth",
        }
    }
}

/// One accepted static token and the identity it maps to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticTokenEntry {
    /// Token value. Supports a literal, `env:VAR_NAME`, or `auto`
    /// (generates a random token logged once at startup).
    pub token: String,
    /// Subject the token authenticates as
    pub client_id: String,
    /// Scopes granted to this client
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl StaticTokenEntry {
    /// Resolve the token value (expand env vars, generate if `auto`)
    #[must_use]
    pub fn resolve_token(&self) -> String {
        resolve_secret(&self.token)
    }
}

/// Parameters for the `jwt` strategy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct JwtParams {
    /// Expected `iss` claim; checked when set
    pub issuer: Option<String>,
    /// Expected `aud` claim; checked when set
    pub audience: Option<String>,
    /// Signature algorithm (HS256, HS384, HS512, RS256, RS384, RS512,
    /// ES256, ES384, PS256, PS384, PS512, EdDSA)
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Shared secret for HMAC algorithms (supports `env:VAR_NAME`)
    pub secret: Option<String>,
    /// Inline PEM public key for asymmetric algorithms
    pub public_key: Option<String>,
    /// Path to a PEM public key file
    pub public_key_file: Option<String>,
    /// JWKS endpoint for key lookup by `kid`
    pub jwks_uri: Option<String>,
    /// Scopes every token must carry
    pub required_scopes: Vec<String>,
}

fn default_algorithm() -> String {
    "RS256".to_string()
}

impl JwtParams {
    /// Whether the configured algorithm is an HMAC family member
    #[must_use]
    pub fn is_hmac(&self) -> bool {
        self.algorithm.starts_with("HS")
    }

    /// Resolve the shared secret (expand env vars)
    #[must_use]
    pub fn resolve_secret(&self) -> Option<String> {
        self.secret.as_deref().map(resolve_secret)
    }
}

/// Parameters for the `oauth-proxy` strategy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OauthProxyParams {
    /// Client id registered with the upstream provider
    pub upstream_client_id: String,
    /// Client secret registered with the upstream provider (supports `env:VAR_NAME`)
    pub upstream_client_secret: String,
    /// Issuer written into locally minted tokens
    #[serde(default = "default_local_issuer")]
    pub issuer: String,
    /// Audience written into locally minted tokens; checked when set
    pub audience: Option<String>,
    /// HMAC secret the local tokens are signed with
    /// (supports `env:VAR_NAME` or `auto`)
    pub signing_secret: Option<String>,
    /// Scopes every token must carry
    pub required_scopes: Vec<String>,
    /// Public base URL of this gateway, used in resource metadata
    pub base_url: Option<String>,
}

/// Parameters for the `oidc-proxy` strategy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OidcProxyParams {
    /// OIDC discovery document URL
    /// (e.g. `https://idp.example.com/.well-known/openid-configuration`)
    pub config_url: String,
    /// Client id registered with the OIDC provider
    pub client_id: String,
    /// Client secret registered with the OIDC provider (supports `env:VAR_NAME`)
    pub client_secret: String,
    /// Issuer written into locally minted tokens
    #[serde(default = "default_local_issuer")]
    pub issuer: String,
    /// Audience written into locally minted tokens; checked when set
    pub audience: Option<String>,
    /// HMAC secret the local tokens are signed with
    /// (supports `env:VAR_NAME` or `auto`)
    pub signing_secret: Option<String>,
    /// Scopes every token must carry
    pub required_scopes: Vec<String>,
    /// Public base URL of this gateway, used in resource metadata
    pub base_url: Option<String>,
}

fn default_local_issuer() -> String {
    "snowgate".to_string()
}

/// Parameters for the `remote-oauth` strategy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemoteOauthParams {
    /// Issuer URLs of the authorization servers this gateway trusts
    pub authorization_servers: Vec<String>,
    /// Resource identifier tokens must carry in `aud`
    pub resource: String,
    /// Per-issuer JWKS endpoint overrides. Issuers not listed here use
    /// `<issuer>/.well-known/jwks.json`.
    pub jwks_uris: HashMap<String, String>,
    /// Scopes every token must carry
    pub required_scopes: Vec<String>,
}

/// Token delegation (on-behalf-of exchange) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationConfig {
    /// Enable delegation
    pub enabled: bool,
    /// Whether a failed exchange rejects the request.
    /// When false, the request proceeds without a delegated token.
    pub required: bool,
    /// Audience of the downstream service the exchanged token is scoped to
    pub audience: Option<String>,
    /// Space-delimited scopes requested in the exchange
    pub scopes: String,
    /// Token exchange endpoint. Optional under `oidc-proxy`, where it is
    /// discovered from the provider configuration at startup.
    pub token_endpoint: Option<String>,
    /// Client id for exchange-endpoint basic auth
    pub client_id: Option<String>,
    /// Client secret for exchange-endpoint basic auth (supports `env:VAR_NAME`)
    pub client_secret: Option<String>,
    /// Cached tokens are re-exchanged this close to expiry
    #[serde(with = "humantime_serde")]
    pub expiry_margin: Duration,
    /// Exchange request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            required: true,
            audience: None,
            scopes: String::new(),
            token_endpoint: None,
            client_id: None,
            client_secret: None,
            expiry_margin: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

impl DelegationConfig {
    /// Resolve the client secret (expand env vars)
    #[must_use]
    pub fn resolve_client_secret(&self) -> Option<String> {
        self.client_secret.as_deref().map(resolve_secret)
    }
}

/// Authorization (policy) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum AuthzConfig {
    /// No policy evaluation; every operation is allowed
    Disabled,
    /// Policy loaded from a local file at startup, evaluated in-process
    Embedded {
        /// Policy document path (JSON or YAML, chosen by extension)
        #[serde(default = "default_policy_file")]
        policy_file: String,
    },
    /// Each decision delegated to an external decision endpoint
    Remote {
        /// Decision endpoint URL
        endpoint: String,
        /// Decision request timeout; failures past it deny the request
        #[serde(default = "default_decision_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
}

fn default_policy_file() -> String {
    DEFAULT_POLICY_FILE.to_string()
}

fn default_decision_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self::Disabled
    }
}

impl AuthzConfig {
    /// Mode name as it appears in configuration
    #[must_use]
    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Embedded { .. } => "embedded",
            Self::Remote { .. } => "remote",
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Sustained refill rate (tokens per second)
    pub requests_per_second: f64,
    /// Bucket capacity (burst size)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10.0,
            burst_size: 20,
        }
    }
}

/// Signing key cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyCacheConfig {
    /// How long fetched JWKS documents stay fresh
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// JWKS fetch timeout
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Downstream ServiceNow MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Base URL admitted requests are forwarded to
    pub base_url: String,
    /// Forward request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Resolve a secret-bearing config value: expand `env:VAR_NAME`, generate a
/// random value for `auto`, pass literals through.
#[must_use]
pub fn resolve_secret(value: &str) -> String {
    if value == "auto" {
        use rand::Rng;
        let mut random_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut random_bytes);
        format!(
            "sg_{}",
            base64::Engine::encode(
                &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                random_bytes
            )
        )
    } else if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (SNOWGATE_ prefix)
        figment = figment.merge(Env::prefixed("SNOWGATE_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} placeholders in string values
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        match &mut self.auth {
            AuthConfig::Disabled => {}
            AuthConfig::StaticToken { tokens } => {
                for entry in tokens {
                    expand(&re, &mut entry.token);
                }
            }
            AuthConfig::Jwt(params) => {
                expand_opt(&re, &mut params.secret);
                expand_opt(&re, &mut params.public_key_file);
                expand_opt(&re, &mut params.jwks_uri);
                expand_opt(&re, &mut params.issuer);
                expand_opt(&re, &mut params.audience);
            }
            AuthConfig::OauthProxy(params) => {
                expand(&re, &mut params.upstream_client_id);
                expand(&re, &mut params.upstream_client_secret);
                expand_opt(&re, &mut params.signing_secret);
            }
            AuthConfig::OidcProxy(params) => {
                expand(&re, &mut params.config_url);
                expand(&re, &mut params.client_id);
                expand(&re, &mut params.client_secret);
                expand_opt(&re, &mut params.signing_secret);
            }
            AuthConfig::RemoteOauth(params) => {
                for server in &mut params.authorization_servers {
                    expand(&re, server);
                }
                expand(&re, &mut params.resource);
            }
        }

        expand_opt(&re, &mut self.delegation.token_endpoint);
        expand_opt(&re, &mut self.delegation.audience);
        expand_opt(&re, &mut self.delegation.client_id);
        expand_opt(&re, &mut self.delegation.client_secret);
        if let AuthzConfig::Remote { endpoint, .. } = &mut self.authorization {
            expand(&re, endpoint);
        }
        expand(&re, &mut self.downstream.base_url);
    }

    /// Validate the loaded configuration.
    ///
    /// Collects every problem found and returns them in one
    /// `ConfigurationError` so operators fix the whole file in one pass.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming every invalid or missing setting.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        self.validate_auth(&mut problems);
        self.validate_delegation(&mut problems);
        self.validate_authorization(&mut problems);
        self.validate_rate_limit(&mut problems);

        if self.downstream.base_url.is_empty() {
            problems.push("downstream.base_url is required".to_string());
        } else if url::Url::parse(&self.downstream.base_url).is_err() {
            problems.push(format!(
                "downstream.base_url is not a valid URL: {}",
                self.downstream.base_url
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }

    fn validate_auth(&self, problems: &mut Vec<String>) {
        match &self.auth {
            AuthConfig::Disabled => {}
            AuthConfig::StaticToken { tokens } => {
                if tokens.is_empty() {
                    problems.push("auth.tokens must list at least one token".to_string());
                }
                for (i, entry) in tokens.iter().enumerate() {
                    if entry.token.is_empty() {
                        problems.push(format!("auth.tokens[{i}].token is empty"));
                    }
                    if entry.client_id.is_empty() {
                        problems.push(format!("auth.tokens[{i}].client_id is empty"));
                    }
                }
            }
            AuthConfig::Jwt(params) => {
                if parse_algorithm(&params.algorithm).is_none() {
                    problems.push(format!("auth.algorithm is unknown: {}", params.algorithm));
                }
                let key_sources = [
                    params.public_key.is_some(),
                    params.public_key_file.is_some(),
                    params.jwks_uri.is_some(),
                ]
                .iter()
                .filter(|present| **present)
                .count();

                if params.is_hmac() {
                    if params.secret.is_none() {
                        problems.push("auth.secret is required for HMAC algorithms".to_string());
                    }
                    if key_sources > 0 {
                        problems.push(
                            "auth.public_key/public_key_file/jwks_uri are incompatible \
                             with HMAC algorithms"
                                .to_string(),
                        );
                    }
                } else {
                    if params.secret.is_some() {
                        problems.push(
                            "auth.secret is incompatible with asymmetric algorithms".to_string(),
                        );
                    }
                    if key_sources == 0 {
                        problems.push(
                            "auth requires one of public_key, public_key_file, jwks_uri"
                                .to_string(),
                        );
                    } else if key_sources > 1 {
                        problems.push(
                            "auth.public_key, public_key_file and jwks_uri are mutually \
                             exclusive"
                                .to_string(),
                        );
                    }
                    if params.issuer.is_none() {
                        problems
                            .push("auth.issuer is required for asymmetric algorithms".to_string());
                    }
                    if params.audience.is_none() {
                        problems.push(
                            "auth.audience is required for asymmetric algorithms".to_string(),
                        );
                    }
                }
                if let Some(uri) = &params.jwks_uri {
                    if url::Url::parse(uri).is_err() {
                        problems.push(format!("auth.jwks_uri is not a valid URL: {uri}"));
                    }
                }
            }
            AuthConfig::OauthProxy(params) => {
                if params.upstream_client_id.is_empty() {
                    problems.push("auth.upstream_client_id is required".to_string());
                }
                if params.upstream_client_secret.is_empty() {
                    problems.push("auth.upstream_client_secret is required".to_string());
                }
            }
            AuthConfig::OidcProxy(params) => {
                if params.config_url.is_empty() {
                    problems.push("auth.config_url is required".to_string());
                } else if url::Url::parse(&params.config_url).is_err() {
                    problems.push(format!(
                        "auth.config_url is not a valid URL: {}",
                        params.config_url
                    ));
                }
                if params.client_id.is_empty() {
                    problems.push("auth.client_id is required".to_string());
                }
                if params.client_secret.is_empty() {
                    problems.push("auth.client_secret is required".to_string());
                }
            }
            AuthConfig::RemoteOauth(params) => {
                if params.authorization_servers.is_empty() {
                    problems.push(
                        "auth.authorization_servers must list at least one issuer".to_string(),
                    );
                }
                for issuer in &params.authorization_servers {
                    if url::Url::parse(issuer).is_err() {
                        problems.push(format!(
                            "auth.authorization_servers entry is not a valid URL: {issuer}"
                        ));
                    }
                }
                if params.resource.is_empty() {
                    problems.push("auth.resource is required".to_string());
                }
            }
        }
    }

    fn validate_delegation(&self, problems: &mut Vec<String>) {
        if !self.delegation.enabled {
            return;
        }
        if matches!(self.auth, AuthConfig::Disabled) {
            problems.push(
                "delegation.enabled requires an authentication strategy; \
                 there is no inbound token to exchange under strategy=disabled"
                    .to_string(),
            );
        }
        if self.delegation.audience.is_none() {
            problems.push("delegation.audience is required when delegation is enabled".to_string());
        }
        if self.delegation.token_endpoint.is_none()
            && !matches!(self.auth, AuthConfig::OidcProxy(_))
        {
            problems.push(
                "delegation.token_endpoint is required unless the oidc-proxy strategy \
                 discovers it"
                    .to_string(),
            );
        }
        if let Some(endpoint) = &self.delegation.token_endpoint {
            if url::Url::parse(endpoint).is_err() {
                problems.push(format!(
                    "delegation.token_endpoint is not a valid URL: {endpoint}"
                ));
            }
        }
    }

    fn validate_authorization(&self, problems: &mut Vec<String>) {
        match &self.authorization {
            AuthzConfig::Disabled => {}
            AuthzConfig::Embedded { policy_file } => {
                if !Path::new(policy_file).exists() {
                    problems.push(format!("authorization.policy_file not found: {policy_file}"));
                }
            }
            AuthzConfig::Remote { endpoint, .. } => {
                if url::Url::parse(endpoint).is_err() {
                    problems.push(format!(
                        "authorization.endpoint is not a valid URL: {endpoint}"
                    ));
                }
            }
        }
    }

    fn validate_rate_limit(&self, problems: &mut Vec<String>) {
        if !self.rate_limit.enabled {
            return;
        }
        if self.rate_limit.burst_size == 0 {
            problems.push("rate_limit.burst_size must be at least 1".to_string());
        }
        if self.rate_limit.requests_per_second <= 0.0 {
            problems.push("rate_limit.requests_per_second must be positive".to_string());
        }
    }
}

/// Parse an algorithm name into the token library's enum
#[must_use]
pub fn parse_algorithm(name: &str) -> Option<jsonwebtoken::Algorithm> {
    use jsonwebtoken::Algorithm;
    match name {
        "HS256" => Some(Algorithm::HS256),
        "HS384" => Some(Algorithm::HS384),
        "HS512" => Some(Algorithm::HS512),
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "ES256" => Some(Algorithm::ES256),
        "ES384" => Some(Algorithm::ES384),
        "PS256" => Some(Algorithm::PS256),
        "PS384" => Some(Algorithm::PS384),
        "PS512" => Some(Algorithm::PS512),
        "EdDSA" => Some(Algorithm::EdDSA),
        _ => None,
    }
}

fn expand(re: &Regex, value: &mut String) {
    *value = expand_string(re, value);
}

fn expand_opt(re: &Regex, value: &mut Option<String>) {
    if let Some(v) = value {
        *v = expand_string(re, v);
    }
}

/// Expand environment variables in a string
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // Parse "30s", "5m", etc.
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
