//! Error types for the sandbox module.

use serde::{Deserialize, Serialize};

/// Why a single script execution failed.
///
/// Every variant is terminal for the execution that produced it; the session
/// never retries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptFailure {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        message: String,
        line: u32,
        column: u32,
    },

    #[error("access denied to host identifier '{identifier}'")]
    AccessDenied { identifier: String },

    #[error("script error: {0}")]
    Runtime(String),

    #[error("script execution timeout exceeded: {elapsed_ms}ms > {limit_ms}ms")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("script memory limit exceeded: {used_bytes} bytes > {limit_bytes} bytes")]
    MemoryExceeded { used_bytes: i64, limit_bytes: u64 },

    #[error("internal engine failure: {0}")]
    Internal(String),
}

impl ScriptFailure {
    /// The outward-facing kind of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScriptFailure::BadInput(_) => ErrorKind::BadInput,
            ScriptFailure::Syntax { .. } => ErrorKind::SyntaxError,
            ScriptFailure::AccessDenied { .. } => ErrorKind::AccessDenied,
            ScriptFailure::Runtime(_) => ErrorKind::RuntimeError,
            ScriptFailure::Timeout { .. } => ErrorKind::Timeout,
            ScriptFailure::MemoryExceeded { .. } => ErrorKind::MemoryExceeded,
            ScriptFailure::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for `self.kind().status_code()`.
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// `true` for the budget violations (timeout and memory).
    pub fn is_budget_violation(&self) -> bool {
        matches!(
            self,
            ScriptFailure::Timeout { .. } | ScriptFailure::MemoryExceeded { .. }
        )
    }
}

/// Failure taxonomy exposed to the routing layer as `errorKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    BadInput,
    SyntaxError,
    AccessDenied,
    RuntimeError,
    Timeout,
    MemoryExceeded,
    Internal,
}

impl ErrorKind {
    /// HTTP-equivalent status code for this kind.
    ///
    /// | Kind           | Status |
    /// |----------------|--------|
    /// | BadInput       | 400    |
    /// | SyntaxError    | 400    |
    /// | AccessDenied   | 400    |
    /// | RuntimeError   | 400    |
    /// | Timeout        | 408    |
    /// | MemoryExceeded | 413    |
    /// | Internal       | 500    |
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::BadInput
            | ErrorKind::SyntaxError
            | ErrorKind::AccessDenied
            | ErrorKind::RuntimeError => 400,
            ErrorKind::Timeout => 408,
            ErrorKind::MemoryExceeded => 413,
            ErrorKind::Internal => 500,
        }
    }

    /// Short human-readable title used in error envelopes.
    pub fn title(self) -> &'static str {
        match self {
            ErrorKind::BadInput => "Bad Request",
            ErrorKind::SyntaxError | ErrorKind::RuntimeError => "Script Error",
            ErrorKind::AccessDenied => "Access Denied",
            ErrorKind::Timeout => "Request Timeout",
            ErrorKind::MemoryExceeded => "Payload Too Large",
            ErrorKind::Internal => "Internal Server Error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::BadInput => "BadInput",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::AccessDenied => "AccessDenied",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::MemoryExceeded => "MemoryExceeded",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, ScriptFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(ScriptFailure::BadInput("x".into()).status_code(), 400);
        assert_eq!(
            ScriptFailure::Syntax {
                message: "x".into(),
                line: 1,
                column: 1
            }
            .status_code(),
            400
        );
        assert_eq!(
            ScriptFailure::AccessDenied {
                identifier: "host.io.File".into()
            }
            .status_code(),
            400
        );
        assert_eq!(ScriptFailure::Runtime("boom".into()).status_code(), 400);
        assert_eq!(
            ScriptFailure::Timeout {
                elapsed_ms: 10,
                limit_ms: 5
            }
            .status_code(),
            408
        );
        assert_eq!(
            ScriptFailure::MemoryExceeded {
                used_bytes: 10,
                limit_bytes: 5
            }
            .status_code(),
            413
        );
        assert_eq!(ScriptFailure::Internal("bug".into()).status_code(), 500);
    }

    #[test]
    fn test_display_carries_budget_pairs() {
        let msg = ScriptFailure::Timeout {
            elapsed_ms: 210,
            limit_ms: 200,
        }
        .to_string();
        assert!(msg.contains("timeout exceeded"));
        assert!(msg.contains("210ms > 200ms"));

        let msg = ScriptFailure::MemoryExceeded {
            used_bytes: 2048,
            limit_bytes: 1024,
        }
        .to_string();
        assert!(msg.contains("memory limit exceeded"));
        assert!(msg.contains("2048 bytes > 1024 bytes"));
    }

    #[test]
    fn test_error_kind_serializes_as_name() {
        let json = serde_json::to_string(&ErrorKind::MemoryExceeded).unwrap();
        assert_eq!(json, "\"MemoryExceeded\"");
        assert_eq!(ErrorKind::SyntaxError.to_string(), "SyntaxError");
    }

    #[test]
    fn test_budget_violation_flag() {
        assert!(ScriptFailure::Timeout {
            elapsed_ms: 1,
            limit_ms: 0
        }
        .is_budget_violation());
        assert!(!ScriptFailure::Runtime("x".into()).is_budget_violation());
    }
}
