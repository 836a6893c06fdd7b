//! Access decision engine: explicit entries first, then prefixes, default-deny.

use serde::{Deserialize, Serialize};

use super::policy::AccessPolicy;

/// Allow or deny, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Allow,
    Deny,
}

impl AccessDecision {
    /// Returns `true` for [`AccessDecision::Allow`].
    pub fn is_allowed(self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

impl std::fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessDecision::Allow => write!(f, "allow"),
            AccessDecision::Deny => write!(f, "deny"),
        }
    }
}

/// Which table entry produced a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MatchedRule {
    ExplicitAllow,
    ExplicitDeny,
    DeniedPrefix { prefix: String },
    SafePrefix { prefix: String },
    Default,
}

impl std::fmt::Display for MatchedRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchedRule::ExplicitAllow => write!(f, "explicit allow"),
            MatchedRule::ExplicitDeny => write!(f, "explicit deny"),
            MatchedRule::DeniedPrefix { prefix } => write!(f, "denied prefix {prefix}"),
            MatchedRule::SafePrefix { prefix } => write!(f, "safe prefix {prefix}"),
            MatchedRule::Default => write!(f, "default deny"),
        }
    }
}

/// A decision plus the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessVerdict {
    pub decision: AccessDecision,
    pub rule: MatchedRule,
}

/// Evaluate `identifier` against `policy`.
///
/// Order:
/// 1. explicit allow-list
/// 2. explicit deny-list
/// 3. denied prefixes
/// 4. safe prefixes
/// 5. deny
///
/// Pure; no logging, no state.
pub fn evaluate_access(policy: &AccessPolicy, identifier: &str) -> AccessVerdict {
    if policy.allowed.contains(identifier) {
        return AccessVerdict {
            decision: AccessDecision::Allow,
            rule: MatchedRule::ExplicitAllow,
        };
    }
    if policy.denied.contains(identifier) {
        return AccessVerdict {
            decision: AccessDecision::Deny,
            rule: MatchedRule::ExplicitDeny,
        };
    }
    if let Some(prefix) = policy
        .denied_prefixes
        .iter()
        .find(|p| identifier.starts_with(p.as_str()))
    {
        return AccessVerdict {
            decision: AccessDecision::Deny,
            rule: MatchedRule::DeniedPrefix {
                prefix: prefix.clone(),
            },
        };
    }
    if let Some(prefix) = policy
        .safe_prefixes
        .iter()
        .find(|p| identifier.starts_with(p.as_str()))
    {
        return AccessVerdict {
            decision: AccessDecision::Allow,
            rule: MatchedRule::SafePrefix {
                prefix: prefix.clone(),
            },
        };
    }

    // Default-deny
    AccessVerdict {
        decision: AccessDecision::Deny,
        rule: MatchedRule::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_deny_when_tables_empty() {
        let policy = AccessPolicy::empty();
        let v = evaluate_access(&policy, "host.util.ArrayList");
        assert_eq!(v.decision, AccessDecision::Deny);
        assert_eq!(v.rule, MatchedRule::Default);
    }

    #[test]
    fn test_explicit_deny_beats_safe_prefix() {
        let policy = AccessPolicy::standard();
        let v = evaluate_access(&policy, "host.lang.System");
        assert_eq!(v.decision, AccessDecision::Deny);
        assert_eq!(v.rule, MatchedRule::ExplicitDeny);
    }

    #[test]
    fn test_explicit_allow_beats_denied_prefix() {
        let policy = AccessPolicy::standard().with_allowed("host.io.StringReader");
        let v = evaluate_access(&policy, "host.io.StringReader");
        assert_eq!(v.decision, AccessDecision::Allow);
        assert_eq!(v.rule, MatchedRule::ExplicitAllow);
    }

    #[test]
    fn test_denied_prefix_beats_safe_prefix() {
        let policy = AccessPolicy::standard();
        let v = evaluate_access(&policy, "host.lang.reflect.Method");
        assert_eq!(v.decision, AccessDecision::Deny);
        assert_eq!(
            v.rule,
            MatchedRule::DeniedPrefix {
                prefix: "host.lang.reflect.".into()
            }
        );
    }

    #[test]
    fn test_safe_prefix_allows_unlisted_class() {
        let policy = AccessPolicy::standard();
        let v = evaluate_access(&policy, "host.util.LinkedList");
        assert_eq!(v.decision, AccessDecision::Allow);
        assert!(matches!(v.rule, MatchedRule::SafePrefix { .. }));
    }

    #[test]
    fn test_prefix_requires_segment_boundary() {
        let policy = AccessPolicy::standard();
        // "host.iox" is not under "host.io."
        assert_eq!(policy.decide("host.iox.Thing"), AccessDecision::Deny);
        assert_eq!(
            evaluate_access(&policy, "host.iox.Thing").rule,
            MatchedRule::Default
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(AccessDecision::Allow.to_string(), "allow");
        assert_eq!(AccessDecision::Deny.to_string(), "deny");
        assert_eq!(
            MatchedRule::DeniedPrefix {
                prefix: "host.net.".into()
            }
            .to_string(),
            "denied prefix host.net."
        );
    }
}
