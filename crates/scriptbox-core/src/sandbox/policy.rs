//! Host access policy tables.
//!
//! An [`AccessPolicy`] is plain data: two explicit identifier sets and two
//! ordered prefix lists. Decisions are made by [`super::engine::evaluate_access`].
//! The standard policy is built once per process and never mutated.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use super::engine::{evaluate_access, AccessDecision};

/// Allow/deny tables consulted before any host class resolution,
/// instantiation, or member access requested by a script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccessPolicy {
    /// Fully-qualified identifiers that are always visible.
    pub allowed: BTreeSet<String>,
    /// Fully-qualified identifiers that are never visible.
    pub denied: BTreeSet<String>,
    /// Namespace prefixes that are never visible (checked after the explicit sets).
    pub denied_prefixes: Vec<String>,
    /// Broad namespace prefixes that are visible unless excluded above.
    pub safe_prefixes: Vec<String>,
}

/// Root of the host namespace as seen from scripts.
pub const HOST_ROOT: &str = "host";

const STANDARD_ALLOWED: &[&str] = &[
    // collections
    "host.util.ArrayList",
    "host.util.HashMap",
    "host.util.HashSet",
    // primitive wrappers and text
    "host.lang.Integer",
    "host.lang.StringBuilder",
    // date/time
    "host.time.Instant",
];

const STANDARD_DENIED: &[&str] = &[
    // process control
    "host.lang.System",
    "host.lang.Runtime",
    "host.lang.ProcessBuilder",
    // thread control
    "host.lang.Thread",
    "host.lang.ThreadGroup",
    "host.util.concurrent.Executors",
    // reflection and class loading
    "host.lang.Class",
    "host.lang.ClassLoader",
    "host.lang.Module",
];

const STANDARD_DENIED_PREFIXES: &[&str] = &[
    // filesystem
    "host.io.",
    "host.nio.",
    // network sockets
    "host.net.",
    // reflection invocation
    "host.lang.reflect.",
    "host.lang.invoke.",
    // native process and script engines
    "host.lang.process.",
    "host.script.",
    // security control
    "host.security.",
    // naming/directory services
    "host.naming.",
    // management introspection
    "host.management.",
    // SQL connectivity
    "host.sql.",
];

const STANDARD_SAFE_PREFIXES: &[&str] = &["host.lang.", "host.util."];

impl AccessPolicy {
    /// A policy with empty tables: every identifier is denied.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard sandbox policy.
    ///
    /// Explicit entries win over prefixes, so a dangerous class living under a
    /// safe namespace (`host.lang.System`) stays hidden.
    pub fn standard() -> Self {
        Self {
            allowed: STANDARD_ALLOWED.iter().map(|s| s.to_string()).collect(),
            denied: STANDARD_DENIED.iter().map(|s| s.to_string()).collect(),
            denied_prefixes: STANDARD_DENIED_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            safe_prefixes: STANDARD_SAFE_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Process-wide shared copy of [`AccessPolicy::standard`], built on first use.
    pub fn shared_standard() -> Arc<AccessPolicy> {
        static STANDARD: OnceLock<Arc<AccessPolicy>> = OnceLock::new();
        STANDARD
            .get_or_init(|| Arc::new(AccessPolicy::standard()))
            .clone()
    }

    /// Add an explicitly allowed identifier (builder pattern).
    pub fn with_allowed(mut self, identifier: impl Into<String>) -> Self {
        self.allowed.insert(identifier.into());
        self
    }

    /// Add an explicitly denied identifier (builder pattern).
    pub fn with_denied(mut self, identifier: impl Into<String>) -> Self {
        self.denied.insert(identifier.into());
        self
    }

    /// Add a denied namespace prefix (builder pattern).
    pub fn with_denied_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.denied_prefixes.push(prefix.into());
        self
    }

    /// Add a safe namespace prefix (builder pattern).
    pub fn with_safe_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.safe_prefixes.push(prefix.into());
        self
    }

    /// Decide whether `identifier` is visible to scripts.
    pub fn decide(&self, identifier: &str) -> AccessDecision {
        evaluate_access(self, identifier).decision
    }

    /// Shorthand for `self.decide(identifier).is_allowed()`.
    pub fn is_allowed(&self, identifier: &str) -> bool {
        self.decide(identifier).is_allowed()
    }
}
