//! Policy document model and rule interpreter.
//!
//! A policy is an ordered rule list evaluated top to bottom; the first
//! matching rule's effect wins and an exhausted scan denies (default-deny).
//! A rule matches when any of its condition objects matches; a condition
//! object's criteria all have to hold. A rule with no conditions matches
//! every request. Conditions are a closed set of predicate kinds, not
//! executable code, so policy files stay statically analyzable.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::auth::Identity;
use crate::{Error, Result};

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The operation may proceed
    Allow,
    /// The operation is rejected, with the reason
    Deny(String),
}

/// An ordered, immutable rule set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Rules in evaluation order
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// One allow/deny rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier, used in deny reasons and logs
    pub id: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Effect when the rule matches: `true` allows, `false` denies
    pub allow: bool,
    /// Condition objects; any one matching fires the rule, none means
    /// the rule matches every request
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// One condition object; all present criteria must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    /// Tool names this condition applies to; empty means any tool
    #[serde(default)]
    pub tools: Vec<String>,
    /// Scopes the identity must hold, all of them
    #[serde(default)]
    pub required_scopes: Vec<String>,
    /// Claim predicates: key to expected value (scalar or list)
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl Policy {
    /// Load a policy document from a JSON or YAML file, chosen by extension.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the file cannot be read and `ConfigurationError`
    /// when it cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let policy: Self = if is_yaml {
            serde_yaml::from_str(&raw)
                .map_err(|e| Error::Config(format!("invalid policy file {}: {e}", path.display())))?
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| Error::Config(format!("invalid policy file {}: {e}", path.display())))?
        };
        Ok(policy)
    }

    /// Evaluate the rule list for an identity and tool name.
    ///
    /// Linear scan in declaration order; short-circuits on the first match.
    #[must_use]
    pub fn evaluate(&self, identity: &Identity, tool: &str) -> Decision {
        for rule in &self.rules {
            if rule.matches(identity, tool) {
                debug!(rule = %rule.id, tool = %tool, allow = rule.allow, "policy rule matched");
                return if rule.allow {
                    Decision::Allow
                } else {
                    Decision::Deny(format!("denied by rule '{}'", rule.id))
                };
            }
        }
        Decision::Deny("default-deny".to_string())
    }
}

impl Rule {
    fn matches(&self, identity: &Identity, tool: &str) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        self.conditions.iter().any(|c| c.matches(identity, tool))
    }
}

impl Condition {
    fn matches(&self, identity: &Identity, tool: &str) -> bool {
        if !self.tools.is_empty() && !self.tools.iter().any(|t| t == tool) {
            return false;
        }
        if !self
            .required_scopes
            .iter()
            .all(|s| identity.has_scope(s))
        {
            return false;
        }
        self.claims
            .iter()
            .all(|(key, expected)| claim_matches(identity.claims.get(key), expected))
    }
}

/// Evaluate one claim predicate.
///
/// Scalar against scalar is equality; a list on either side is membership
/// (the identity's list contains the expected scalar, or the expected list
/// contains the identity's scalar, or the two lists intersect).
fn claim_matches(actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    match (actual, expected) {
        (Value::Array(have), Value::Array(want)) => {
            have.iter().any(|h| want.iter().any(|w| h == w))
        }
        (Value::Array(have), want) => have.iter().any(|h| h == want),
        (have, Value::Array(want)) => want.iter().any(|w| w == have),
        (have, want) => have == want,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(scopes: &[&str]) -> Identity {
        Identity {
            scopes: scopes.iter().map(|s| (*s).to_string()).collect(),
            ..Identity::anonymous()
        }
    }

    fn rule(id: &str, allow: bool, conditions: Vec<Condition>) -> Rule {
        Rule {
            id: id.to_string(),
            description: String::new(),
            allow,
            conditions,
        }
    }

    fn tool_condition(tools: &[&str]) -> Condition {
        Condition {
            tools: tools.iter().map(|t| (*t).to_string()).collect(),
            ..Condition::default()
        }
    }

    #[test]
    fn empty_rule_list_denies_everything() {
        // GIVEN: a policy with no rules
        let policy = Policy::default();

        // WHEN/THEN: any request is denied by default
        assert_eq!(
            policy.evaluate(&identity(&["read"]), "get_incident"),
            Decision::Deny("default-deny".to_string())
        );
    }

    #[test]
    fn earlier_deny_wins_over_later_allow() {
        // GIVEN: a deny on batch_install followed by a broad allow
        let policy = Policy {
            rules: vec![
                rule("no-batch-install", false, vec![tool_condition(&["batch_install"])]),
                rule(
                    "readers",
                    true,
                    vec![Condition {
                        required_scopes: vec!["read".to_string()],
                        ..Condition::default()
                    }],
                ),
            ],
        };

        // WHEN: an identity with scope "read" calls batch_install
        let decision = policy.evaluate(&identity(&["read"]), "batch_install");

        // THEN: the earlier deny fires regardless of the later allow
        assert_eq!(
            decision,
            Decision::Deny("denied by rule 'no-batch-install'".to_string())
        );

        // AND: other tools fall through to the allow
        assert_eq!(policy.evaluate(&identity(&["read"]), "get_incident"), Decision::Allow);
    }

    #[test]
    fn empty_tool_set_matches_any_tool() {
        let policy = Policy {
            rules: vec![rule("allow-all", true, vec![Condition::default()])],
        };
        assert_eq!(policy.evaluate(&identity(&[]), "anything"), Decision::Allow);
    }

    #[test]
    fn rule_without_conditions_matches_every_request() {
        let policy = Policy {
            rules: vec![rule("deny-all", false, vec![])],
        };
        assert_eq!(
            policy.evaluate(&identity(&["read"]), "get_incident"),
            Decision::Deny("denied by rule 'deny-all'".to_string())
        );
    }

    #[test]
    fn required_scopes_must_all_be_held() {
        let policy = Policy {
            rules: vec![rule(
                "writers",
                true,
                vec![Condition {
                    required_scopes: vec!["read".to_string(), "write".to_string()],
                    ..Condition::default()
                }],
            )],
        };

        assert_eq!(
            policy.evaluate(&identity(&["read", "write"]), "update_record"),
            Decision::Allow
        );
        // Holding only one of the two falls through to default-deny.
        assert_eq!(
            policy.evaluate(&identity(&["read"]), "update_record"),
            Decision::Deny("default-deny".to_string())
        );
    }

    #[test]
    fn any_condition_matching_fires_the_rule() {
        let policy = Policy {
            rules: vec![rule(
                "either-tool",
                true,
                vec![tool_condition(&["get_incident"]), tool_condition(&["get_change"])],
            )],
        };
        assert_eq!(policy.evaluate(&identity(&[]), "get_change"), Decision::Allow);
        assert_eq!(
            policy.evaluate(&identity(&[]), "delete_record"),
            Decision::Deny("default-deny".to_string())
        );
    }

    #[test]
    fn claim_predicates_cover_equality_and_membership() {
        // scalar == scalar
        assert!(claim_matches(Some(&json!("ops")), &json!("ops")));
        assert!(!claim_matches(Some(&json!("dev")), &json!("ops")));
        // identity list contains expected scalar
        assert!(claim_matches(Some(&json!(["dev", "ops"])), &json!("ops")));
        // expected list contains identity scalar
        assert!(claim_matches(Some(&json!("ops")), &json!(["ops", "sre"])));
        // list intersection
        assert!(claim_matches(Some(&json!(["dev"])), &json!(["dev", "ops"])));
        assert!(!claim_matches(Some(&json!(["qa"])), &json!(["dev", "ops"])));
        // absent claim never matches
        assert!(!claim_matches(None, &json!("ops")));
    }

    #[test]
    fn claim_condition_evaluates_against_identity_claims() {
        let mut claims = Map::new();
        claims.insert("department".to_string(), json!("ops"));
        let id = Identity {
            claims,
            ..Identity::anonymous()
        };

        let mut predicate = Map::new();
        predicate.insert("department".to_string(), json!("ops"));
        let policy = Policy {
            rules: vec![rule(
                "ops-only",
                true,
                vec![Condition {
                    claims: predicate,
                    ..Condition::default()
                }],
            )],
        };

        assert_eq!(policy.evaluate(&id, "get_incident"), Decision::Allow);
        assert_eq!(
            policy.evaluate(&Identity::anonymous(), "get_incident"),
            Decision::Deny("default-deny".to_string())
        );
    }

    #[test]
    fn policy_loads_from_json_and_yaml_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("policies.json");
        std::fs::write(
            &json_path,
            r#"{"rules": [{"id": "allow-reads", "description": "readers may read",
                "allow": true,
                "conditions": [{"tools": ["get_incident"], "required_scopes": ["read"]}]}]}"#,
        )
        .unwrap();
        let policy = Policy::load(&json_path).unwrap();
        assert_eq!(policy.rules.len(), 1);
        assert_eq!(policy.rules[0].id, "allow-reads");

        let yaml_path = dir.path().join("policies.yaml");
        std::fs::write(
            &yaml_path,
            "rules:\n  - id: deny-all\n    allow: false\n",
        )
        .unwrap();
        let policy = Policy::load(&yaml_path).unwrap();
        assert!(!policy.rules[0].allow);
    }

    #[test]
    fn malformed_policy_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = Policy::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
