//! scriptbox core library
//!
//! Sandboxed execution of untrusted scripts inside a request pipeline:
//! default-deny host access, time and memory budgets, and per-execution
//! isolation. Re-exports the pieces a host needs to run scripts
//! programmatically.

pub mod config;
pub mod lang;
pub mod metrics;
pub mod obs;
pub mod processor;
pub mod sandbox;
pub mod telemetry;
pub mod value;

pub use config::{ConfigError, ScriptConfig};
pub use processor::{
    error_envelope, success_envelope, ProcessorRegistry, ProcessorRequest, ProcessorResponse,
    RequestProcessor, ScriptProcessor,
};
pub use sandbox::{
    evaluate_access, AccessDecision, AccessPolicy, AccessVerdict, BudgetLimits, ErrorKind,
    ExecutionOutcome, ExecutionSession, FailedExecution, MatchedRule, RequestMeta, ScriptFailure,
    ScriptRequest,
};
pub use value::PortableValue;

pub use metrics::METRICS;
pub use obs::{
    emit_execution_failed, emit_execution_finished, emit_execution_started, emit_policy_denied,
    ExecutionSpan,
};
pub use telemetry::init_tracing;

/// scriptbox version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
