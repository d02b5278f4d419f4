//! Snowgate - admission gateway for a ServiceNow MCP server
//!
//! Fronts a downstream MCP server with a request-time admission pipeline:
//! rate limiting, authentication, on-behalf-of delegation, and policy
//! authorization, in that order. A request reaches ServiceNow only after
//! every stage has passed, and every decision is logged with a correlation
//! id.
//!
//! # Authentication strategies
//!
//! - **disabled**: anonymous admission
//! - **static-token**: fixed bearer tokens mapped to client identities
//! - **jwt**: JWTs verified against a secret, PEM key, or JWKS endpoint
//! - **oauth-proxy** / **oidc-proxy**: locally minted tokens fronting an
//!   upstream provider
//! - **remote-oauth**: tokens issued by trusted external authorization
//!   servers, verified per-issuer via JWKS

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod delegation;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod ratelimit;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
