//! Error types for the admission gateway
//!
//! Every pipeline stage converts its failures into one of these variants
//! before returning; raw network or parsing errors never cross the request
//! boundary. The infrastructure variants (`Io`, `Json`, `Http`) only occur
//! during startup (configuration and policy loading).

use std::io;
use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the admission gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Admission gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Rate limit exceeded; callers should back off
    #[error("Rate limit exceeded, retry after {}s", retry_after.as_secs())]
    Throttled {
        /// Suggested delay before the next attempt
        retry_after: Duration,
    },

    /// No bearer token presented where one is required
    #[error("Missing credentials")]
    MissingCredentials,

    /// Malformed token, bad signature, unknown signing key, wrong issuer or audience
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Token `exp` is in the past
    #[error("Token expired")]
    TokenExpired,

    /// Token is valid but lacks required scopes
    #[error("Insufficient scope, missing: {}", missing.join(" "))]
    InsufficientScope {
        /// Scopes the token must carry but does not
        missing: Vec<String>,
    },

    /// On-behalf-of token exchange failed
    #[error("Delegation failed: {0}")]
    DelegationFailed(String),

    /// An explicit deny rule matched, or no rule matched (default-deny)
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    /// Invalid or contradictory settings; fatal at startup, never per-request
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Stable snake_case wire code for this error kind.
    ///
    /// Codes are part of the caller-facing contract and never change.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Throttled { .. } => "throttled",
            Self::MissingCredentials => "missing_credentials",
            Self::InvalidCredentials(_) => "invalid_credentials",
            Self::TokenExpired => "token_expired",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::DelegationFailed(_) => "delegation_failed",
            Self::PolicyDenied(_) => "policy_denied",
            Self::Config(_) => "configuration_error",
            Self::Io(_) | Self::Json(_) | Self::Http(_) => "internal_error",
        }
    }

    /// HTTP status the caller-facing boundary maps this error to.
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::MissingCredentials
            | Self::InvalidCredentials(_)
            | Self::TokenExpired
            | Self::DelegationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope { .. } | Self::PolicyDenied(_) => StatusCode::FORBIDDEN,
            Self::Config(_) | Self::Io(_) | Self::Json(_) | Self::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Suggested retry delay, present only for `Throttled`.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
