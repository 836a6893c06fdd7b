//! Structured observability hooks for script execution lifecycle events.
//!
//! - Execution-scoped tracing spans via the [`ExecutionSpan`] RAII guard
//! - Emission functions for start, finish, failure and policy denial
//!
//! Script source is never logged; spans carry its SHA-256 digest instead.

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::sandbox::engine::MatchedRule;
use crate::sandbox::error::ScriptFailure;

/// RAII guard that enters an execution-scoped tracing span.
///
/// ```ignore
/// let _span = ExecutionSpan::enter("2f1c…", &source_digest(src));
/// // tracing calls here carry execution_id and source_sha256
/// ```
pub struct ExecutionSpan {
    _span: tracing::span::EnteredSpan,
}

impl ExecutionSpan {
    pub fn enter(execution_id: &str, source_sha256: &str) -> Self {
        let span = tracing::info_span!(
            "scriptbox.execution",
            execution_id = %execution_id,
            source_sha256 = %source_sha256,
        );
        Self {
            _span: span.entered(),
        }
    }
}

/// Hex SHA-256 of script source.
pub fn source_digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

pub fn emit_execution_started(execution_id: &str, source_bytes: usize, parameter_count: usize) {
    info!(
        event = "execution.started",
        execution_id = %execution_id,
        source_bytes = source_bytes,
        parameters = parameter_count,
    );
}

pub fn emit_execution_finished(
    execution_id: &str,
    elapsed_ms: u64,
    memory_delta_bytes: i64,
    console_lines: usize,
) {
    info!(
        event = "execution.finished",
        execution_id = %execution_id,
        elapsed_ms = elapsed_ms,
        memory_delta_bytes = memory_delta_bytes,
        console_lines = console_lines,
    );
}

/// Failure event (warning level).
pub fn emit_execution_failed(execution_id: &str, failure: &ScriptFailure, elapsed_ms: u64) {
    warn!(
        event = "execution.failed",
        execution_id = %execution_id,
        kind = %failure.kind(),
        elapsed_ms = elapsed_ms,
        error = %failure,
    );
}

/// A script reached for a host identifier the policy hides.
pub fn emit_policy_denied(identifier: &str, rule: &MatchedRule) {
    warn!(event = "policy.denied", identifier = %identifier, rule = %rule);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_span_create() {
        let _span = ExecutionSpan::enter("test-execution", "00");
    }

    #[test]
    fn test_source_digest_is_stable_hex() {
        let digest = source_digest("1 + 1");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, source_digest("1 + 1"));
        assert_ne!(digest, source_digest("1 + 2"));
    }
}
