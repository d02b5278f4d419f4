//! Authorization engine — disabled, embedded, or remote policy decisions.
//!
//! Embedded policies are loaded once at startup and replaced wholesale on
//! an explicit reload, never mutated live. Remote decisions fail closed:
//! any transport, timeout, or protocol failure denies the request.

pub mod rules;

pub use rules::{Condition, Decision, Policy, Rule};

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::Identity;
use crate::config::AuthzConfig;
use crate::{Error, Result};

/// Reason reported when the remote decision endpoint cannot be consulted.
const REMOTE_UNAVAILABLE: &str = "remote decision unavailable";

/// Decision request sent to a remote decision endpoint.
#[derive(Debug, Serialize)]
struct DecisionRequest<'a> {
    subject: &'a str,
    issuer: Option<&'a str>,
    scopes: &'a [String],
    claims: &'a serde_json::Map<String, serde_json::Value>,
    tool: &'a str,
}

/// Decision endpoint response body.
#[derive(Debug, Deserialize)]
struct DecisionResponse {
    allow: bool,
    reason: Option<String>,
}

/// Evaluates whether a verified identity may invoke a tool.
#[derive(Debug)]
pub enum AuthorizationEngine {
    /// No policy evaluation; every operation is allowed
    Disabled,
    /// In-process evaluation of a policy loaded from a local file
    Embedded {
        /// Loaded rule set; replaced wholesale on reload
        policy: RwLock<Policy>,
        /// Source file, re-read on reload
        path: PathBuf,
    },
    /// Every decision delegated to an external endpoint; fails closed
    Remote {
        /// HTTP client with the configured decision timeout
        http: reqwest::Client,
        /// Decision endpoint URL
        endpoint: String,
    },
}

impl AuthorizationEngine {
    /// Build the engine for the configured mode, loading the embedded
    /// policy file when one is named.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `ConfigurationError` when the policy file or the
    /// remote endpoint configuration is unusable; fatal at startup.
    pub fn from_config(config: &AuthzConfig) -> Result<Self> {
        match config {
            AuthzConfig::Disabled => Ok(Self::Disabled),
            AuthzConfig::Embedded { policy_file } => {
                let path = PathBuf::from(policy_file);
                let policy = Policy::load(&path)?;
                debug!(path = %path.display(), rules = policy.rules.len(), "policy loaded");
                Ok(Self::Embedded {
                    policy: RwLock::new(policy),
                    path,
                })
            }
            AuthzConfig::Remote { endpoint, timeout } => {
                crate::auth::jwks::require_https_or_loopback(endpoint)
                    .map_err(|e| Error::Config(format!("authorization.endpoint: {e}")))?;
                let http = reqwest::Client::builder()
                    .timeout(*timeout)
                    .build()
                    .map_err(|e| Error::Config(format!("failed to build decision client: {e}")))?;
                Ok(Self::Remote {
                    http,
                    endpoint: endpoint.clone(),
                })
            }
        }
    }

    /// Decide whether `identity` may invoke `tool`.
    ///
    /// # Errors
    ///
    /// `PolicyDenied` when a deny rule matches, no rule matches, the
    /// remote endpoint denies, or the remote endpoint cannot be reached.
    pub async fn authorize(&self, identity: &Identity, tool: &str) -> Result<()> {
        match self {
            Self::Disabled => Ok(()),
            Self::Embedded { policy, .. } => match policy.read().evaluate(identity, tool) {
                Decision::Allow => Ok(()),
                Decision::Deny(reason) => Err(Error::PolicyDenied(reason)),
            },
            Self::Remote { http, endpoint } => {
                self.remote_decision(http, endpoint, identity, tool).await
            }
        }
    }

    /// Re-read the embedded policy file and replace the rule set wholesale.
    ///
    /// No-op for the other modes. In-flight evaluations finish against the
    /// rule set they started with.
    ///
    /// # Errors
    ///
    /// Returns the load error; the previous policy stays in effect.
    pub fn reload(&self) -> Result<()> {
        if let Self::Embedded { policy, path } = self {
            let fresh = Policy::load(path)?;
            debug!(path = %path.display(), rules = fresh.rules.len(), "policy reloaded");
            *policy.write() = fresh;
        }
        Ok(())
    }

    /// Mode name for the health summary.
    #[must_use]
    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Embedded { .. } => "embedded",
            Self::Remote { .. } => "remote",
        }
    }

    async fn remote_decision(
        &self,
        http: &reqwest::Client,
        endpoint: &str,
        identity: &Identity,
        tool: &str,
    ) -> Result<()> {
        let request = DecisionRequest {
            subject: &identity.subject,
            issuer: identity.issuer.as_deref(),
            scopes: &identity.scopes,
            claims: &identity.claims,
            tool,
        };

        let response = http
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        let decision: DecisionResponse = match response {
            Ok(r) => match r.json().await {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "malformed remote decision, failing closed");
                    return Err(Error::PolicyDenied(REMOTE_UNAVAILABLE.to_string()));
                }
            },
            Err(e) => {
                warn!(error = %e, "remote decision failed, failing closed");
                return Err(Error::PolicyDenied(REMOTE_UNAVAILABLE.to_string()));
            }
        };

        if decision.allow {
            Ok(())
        } else {
            Err(Error::PolicyDenied(
                decision.reason.unwrap_or_else(|| "denied by remote policy".to_string()),
            ))
        }
    }
}

/// Load a policy document for startup validation (`check` subcommand).
///
/// # Errors
///
/// Same failure modes as [`Policy::load`].
pub fn load_policy(path: &Path) -> Result<Policy> {
    Policy::load(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reader_identity() -> Identity {
        Identity {
            subject: "alice".to_string(),
            scopes: vec!["read".to_string()],
            ..Identity::anonymous()
        }
    }

    #[tokio::test]
    async fn disabled_engine_allows_everything() {
        let engine = AuthorizationEngine::from_config(&AuthzConfig::Disabled).unwrap();
        assert!(engine.authorize(&Identity::anonymous(), "any_tool").await.is_ok());
    }

    #[tokio::test]
    async fn embedded_engine_enforces_the_loaded_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.json");
        std::fs::write(
            &path,
            r#"{"rules": [{"id": "readers", "allow": true,
                "conditions": [{"required_scopes": ["read"]}]}]}"#,
        )
        .unwrap();

        let engine = AuthorizationEngine::from_config(&AuthzConfig::Embedded {
            policy_file: path.to_string_lossy().to_string(),
        })
        .unwrap();

        assert!(engine.authorize(&reader_identity(), "get_incident").await.is_ok());

        let err = engine
            .authorize(&Identity::anonymous(), "get_incident")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyDenied(_)));
    }

    #[tokio::test]
    async fn reload_replaces_the_rule_set_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.json");
        std::fs::write(&path, r#"{"rules": []}"#).unwrap();

        let engine = AuthorizationEngine::from_config(&AuthzConfig::Embedded {
            policy_file: path.to_string_lossy().to_string(),
        })
        .unwrap();
        assert!(engine.authorize(&reader_identity(), "get_incident").await.is_err());

        std::fs::write(
            &path,
            r#"{"rules": [{"id": "allow-all", "allow": true}]}"#,
        )
        .unwrap();
        engine.reload().unwrap();
        assert!(engine.authorize(&reader_identity(), "get_incident").await.is_ok());
    }

    #[tokio::test]
    async fn missing_policy_file_fails_startup() {
        let err = AuthorizationEngine::from_config(&AuthzConfig::Embedded {
            policy_file: "/nonexistent/policies.json".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn unreachable_remote_endpoint_fails_closed() {
        let engine = AuthorizationEngine::from_config(&AuthzConfig::Remote {
            endpoint: "http://127.0.0.1:1/decide".to_string(),
            timeout: Duration::from_millis(200),
        })
        .unwrap();

        let err = engine
            .authorize(&reader_identity(), "get_incident")
            .await
            .unwrap_err();
        let Error::PolicyDenied(reason) = err else {
            panic!("expected PolicyDenied");
        };
        assert_eq!(reason, REMOTE_UNAVAILABLE);
    }
}
