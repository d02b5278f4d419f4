//! HTTP boundary: request admission, downstream forwarding, metadata.
//!
//! The server exposes three routes: `POST /mcp` (the guarded MCP endpoint),
//! `GET /health`, and `GET /.well-known/oauth-protected-resource` (RFC 9728,
//! only under the OAuth-flavored strategies). Every `/mcp` request runs the
//! admission pipeline before anything is forwarded downstream.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{KeyCache, TokenVerifier, bearer_token, discover_oidc};
use crate::config::{AuthConfig, Config, DownstreamConfig};
use crate::delegation::DelegationExchanger;
use crate::pipeline::{AdmittedRequest, Pipeline};
use crate::policy::AuthorizationEngine;
use crate::ratelimit::RateLimiter;
use crate::{Error, Result};

/// RFC 9728 protected resource metadata document.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceMetadata {
    /// Resource identifier of this gateway
    pub resource: String,
    /// Authorization servers that may issue tokens for it
    pub authorization_servers: Vec<String>,
    /// Scopes the gateway understands
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    /// How bearer tokens are accepted
    pub bearer_methods_supported: Vec<String>,
}

/// Shared per-request state.
struct AppState {
    pipeline: Pipeline,
    http: reqwest::Client,
    downstream: DownstreamConfig,
    strategy: &'static str,
    authz_mode: &'static str,
    resource_metadata: Option<ResourceMetadata>,
}

/// The admission gateway server.
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
}

impl Gateway {
    /// Wire up the pipeline from configuration.
    ///
    /// Performs OIDC discovery when the strategy carries a configuration
    /// URL, so misconfiguration fails here rather than on the first
    /// request.
    ///
    /// # Errors
    ///
    /// Any configuration, discovery, or policy-load failure is fatal.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let key_cache = Arc::new(KeyCache::new(&config.key_cache)?);
        let verifier = TokenVerifier::new(&config.auth, key_cache)?;
        let rate_limiter = RateLimiter::new(&config.rate_limit);
        let authz = AuthorizationEngine::from_config(&config.authorization)?;

        let delegation = if config.delegation.enabled {
            let endpoint = resolve_exchange_endpoint(&config).await?;
            Some(DelegationExchanger::new(&config.delegation, &endpoint)?)
        } else {
            None
        };

        let pipeline = Pipeline::new(
            rate_limiter,
            verifier,
            delegation,
            config.delegation.required,
            authz,
        );

        let http = reqwest::Client::builder()
            .timeout(config.downstream.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build downstream client: {e}")))?;

        let state = Arc::new(AppState {
            pipeline,
            http,
            downstream: config.downstream.clone(),
            strategy: config.auth.strategy_name(),
            authz_mode: config.authorization.mode_name(),
            resource_metadata: resource_metadata(&config),
        });

        Ok(Self { config, state })
    }

    /// Bind and serve until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Bind and serve failures; per-request failures never surface here.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!(
            host = %self.config.server.host,
            port = self.config.server.port,
            strategy = self.state.strategy,
            authorization = self.state.authz_mode,
            rate_limit = self.config.rate_limit.enabled,
            delegation = self.config.delegation.enabled,
            "snowgate v{} listening", env!("CARGO_PKG_VERSION")
        );
        if self.state.strategy == "disabled" {
            warn!("authentication disabled, all requests are admitted anonymously");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("shutdown complete");
        Ok(())
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/mcp", post(mcp_handler))
            .route(
                "/.well-known/oauth-protected-resource",
                get(metadata_handler),
            )
            .layer(DefaultBodyLimit::max(self.config.server.max_body_size))
            .layer(CatchPanicLayer::new())
            .layer(TimeoutLayer::new(self.config.server.request_timeout))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }
}

/// Exchange endpoint for delegation: explicit configuration wins, the
/// oidc-proxy strategy falls back to the provider's discovered endpoint.
async fn resolve_exchange_endpoint(config: &Config) -> Result<String> {
    if let Some(endpoint) = &config.delegation.token_endpoint {
        return Ok(endpoint.clone());
    }
    if let AuthConfig::OidcProxy(params) = &config.auth {
        let endpoints = discover_oidc(&params.config_url, config.key_cache.fetch_timeout).await?;
        if let Some(endpoint) = endpoints.token_endpoint {
            return Ok(endpoint);
        }
        return Err(Error::Config(
            "OIDC provider advertises no token endpoint for delegation".to_string(),
        ));
    }
    Err(Error::Config(
        "delegation.token_endpoint is required for this strategy".to_string(),
    ))
}

/// Build the RFC 9728 document for the OAuth-flavored strategies.
fn resource_metadata(config: &Config) -> Option<ResourceMetadata> {
    let default_resource = || {
        format!(
            "http://{}:{}",
            config.server.host, config.server.port
        )
    };
    let bearer = vec!["header".to_string()];

    match &config.auth {
        AuthConfig::OauthProxy(params) => Some(ResourceMetadata {
            resource: params.base_url.clone().unwrap_or_else(default_resource),
            authorization_servers: vec![params.issuer.clone()],
            scopes_supported: params.required_scopes.clone(),
            bearer_methods_supported: bearer,
        }),
        AuthConfig::OidcProxy(params) => Some(ResourceMetadata {
            resource: params.base_url.clone().unwrap_or_else(default_resource),
            authorization_servers: vec![params.issuer.clone()],
            scopes_supported: params.required_scopes.clone(),
            bearer_methods_supported: bearer,
        }),
        AuthConfig::RemoteOauth(params) => Some(ResourceMetadata {
            resource: params.resource.clone(),
            authorization_servers: params.authorization_servers.clone(),
            scopes_supported: params.required_scopes.clone(),
            bearer_methods_supported: bearer,
        }),
        _ => None,
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "strategy": state.strategy,
        "authorization": state.authz_mode,
        "rate_limit_buckets": state.pipeline.rate_limit_buckets(),
    }))
}

async fn metadata_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.resource_metadata {
        Some(metadata) => Json(metadata.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// The guarded MCP endpoint. Admission first, then forward.
async fn mcp_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let request_id = body.get("id").cloned().unwrap_or(Value::Null);
    let Some(method) = body.get("method").and_then(Value::as_str) else {
        return rejection(
            request_id,
            StatusCode::BAD_REQUEST,
            -32600,
            "invalid_request",
            "request has no method",
            HeaderMap::new(),
        );
    };

    // The guarded operation: the tool name for tools/call, the JSON-RPC
    // method itself for everything else.
    let tool = match method {
        "tools/call" => body
            .pointer("/params/name")
            .and_then(Value::as_str)
            .unwrap_or(method),
        other => other,
    };

    let token = bearer_token(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    );

    let admitted = match state.pipeline.admit(token, tool).await {
        Ok(admitted) => admitted,
        Err(err) => return rejection_from_error(request_id, &err, &state),
    };

    forward(&state, &admitted, token, &body, request_id).await
}

/// Forward the admitted request downstream with the delegated (or inbound)
/// bearer. A downstream 401 on a delegated token buys exactly one
/// re-exchange and one retry.
async fn forward(
    state: &AppState,
    admitted: &AdmittedRequest,
    inbound_token: Option<&str>,
    body: &Value,
    request_id: Value,
) -> Response {
    let bearer = admitted
        .delegated_token
        .as_ref()
        .map(|t| t.access_token.clone())
        .or_else(|| inbound_token.map(str::to_string));

    let response = send_downstream(state, body, bearer.as_deref()).await;

    let response = match response {
        Ok(r) if r.status() == StatusCode::UNAUTHORIZED && admitted.delegated_token.is_some() => {
            warn!(
                request_id = %admitted.request_id,
                subject = %admitted.identity.subject,
                "downstream rejected delegated token, re-exchanging"
            );
            // The send result drops into the same handling as the first
            // attempt, so a transport failure here is still a 502.
            match state.pipeline.redelegate(&admitted.identity).await {
                Ok(fresh) => send_downstream(state, body, Some(&fresh.access_token)).await,
                Err(err) => return rejection_from_error(request_id, &err, state),
            }
        }
        other => other,
    };

    match response {
        Ok(r) => {
            let status = r.status();
            match r.json::<Value>().await {
                Ok(body) => (status, Json(body)).into_response(),
                Err(e) => rejection(
                    request_id,
                    StatusCode::BAD_GATEWAY,
                    -32000,
                    "internal_error",
                    &format!("malformed downstream response: {e}"),
                    HeaderMap::new(),
                ),
            }
        }
        Err(e) => rejection(
            request_id,
            StatusCode::BAD_GATEWAY,
            -32000,
            "internal_error",
            &format!("downstream unreachable: {e}"),
            HeaderMap::new(),
        ),
    }
}

async fn send_downstream(
    state: &AppState,
    body: &Value,
    bearer: Option<&str>,
) -> std::result::Result<reqwest::Response, reqwest::Error> {
    let mut request = state.http.post(&state.downstream.base_url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    request.send().await
}

/// Map a pipeline rejection onto status, challenge headers, and a JSON-RPC
/// error body.
fn rejection_from_error(request_id: Value, err: &Error, state: &AppState) -> Response {
    let status = err.http_status();
    let mut headers = HeaderMap::new();

    if let Some(retry_after) = err.retry_after() {
        let secs = retry_after.as_secs_f64().ceil() as u64;
        if let Ok(value) = secs.max(1).to_string().parse() {
            headers.insert(header::RETRY_AFTER, value);
        }
    }

    if let Some(challenge) = challenge_for(err, state) {
        if let Ok(value) = challenge.parse() {
            headers.insert(header::WWW_AUTHENTICATE, value);
        }
    }

    let code = match err {
        Error::Throttled { .. } => -32005,
        Error::PolicyDenied(_) | Error::InsufficientScope { .. } => -32003,
        _ => -32001,
    };

    rejection(
        request_id,
        status,
        code,
        err.error_code(),
        &err.to_string(),
        headers,
    )
}

/// `WWW-Authenticate` challenge for credential-related rejections.
fn challenge_for(err: &Error, state: &AppState) -> Option<String> {
    let metadata_hint = state
        .resource_metadata
        .as_ref()
        .map(|m| {
            format!(
                ", resource_metadata=\"{}/.well-known/oauth-protected-resource\"",
                m.resource
            )
        })
        .unwrap_or_default();

    match err {
        Error::MissingCredentials => Some(format!("Bearer{metadata_hint}")),
        Error::InvalidCredentials(_) | Error::DelegationFailed(_) => Some(format!(
            "Bearer error=\"invalid_token\"{metadata_hint}"
        )),
        Error::TokenExpired => Some(format!(
            "Bearer error=\"invalid_token\", error_description=\"token expired\"{metadata_hint}"
        )),
        Error::InsufficientScope { missing } => Some(format!(
            "Bearer error=\"insufficient_scope\", scope=\"{}\"{metadata_hint}",
            missing.join(" ")
        )),
        _ => None,
    }
}

fn rejection(
    request_id: Value,
    status: StatusCode,
    code: i64,
    error_code: &str,
    message: &str,
    headers: HeaderMap,
) -> Response {
    let body = json!({
        "jsonrpc": "2.0",
        "id": request_id,
        "error": {
            "code": code,
            "message": message,
            "data": { "error": error_code },
        },
    });
    (status, headers, Json(body)).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
