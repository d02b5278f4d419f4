//! Request identity and bearer token extraction

use std::time::SystemTime;

use serde_json::{Map, Value};

/// Subject used for unauthenticated traffic
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// Verified identity for one request.
///
/// Constructed once by the token verifier and immutable afterwards; lives
/// only for the request it was built for.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Subject identifier (`sub` claim, static-token client id, or anonymous)
    pub subject: String,
    /// Issuer of the verified token, when it had one
    pub issuer: Option<String>,
    /// Scopes the identity holds
    pub scopes: Vec<String>,
    /// Full verified claim set (empty for static tokens and anonymous)
    pub claims: Map<String, Value>,
    /// Token expiry, when the token carried one
    pub expires_at: Option<SystemTime>,
    /// Raw inbound bearer token, kept for delegation exchange
    pub token: Option<String>,
}

impl Identity {
    /// Identity for unauthenticated traffic: no scopes, no claims.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            subject: ANONYMOUS_SUBJECT.to_string(),
            issuer: None,
            scopes: Vec::new(),
            claims: Map::new(),
            expires_at: None,
            token: None,
        }
    }

    /// Whether this identity holds a scope.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Scopes from `required` that this identity does not hold.
    #[must_use]
    pub fn missing_scopes(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|s| !self.has_scope(s))
            .cloned()
            .collect()
    }
}

/// Extract the bearer token from an `Authorization` header value.
#[must_use]
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header.and_then(|v| {
        v.strip_prefix("Bearer ")
            .or_else(|| v.strip_prefix("bearer "))
    })
}

/// Read the scope set from a verified claim set.
///
/// Accepts `scope` as a space-delimited string (RFC 8693) or a list of
/// strings (some issuers emit it that way), falling back to `scp` as a
/// list of strings.
#[must_use]
pub fn scopes_from_claims(claims: &Map<String, Value>) -> Vec<String> {
    match claims.get("scope") {
        Some(Value::String(s)) => {
            return s.split_whitespace().map(str::to_string).collect();
        }
        Some(Value::Array(list)) => {
            return string_items(list);
        }
        _ => {}
    }
    if let Some(Value::Array(list)) = claims.get("scp") {
        return string_items(list);
    }
    Vec::new()
}

fn string_items(list: &[Value]) -> Vec<String> {
    list.iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}
