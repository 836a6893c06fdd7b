//! Sandbox: policy-controlled, resource-bounded script execution.
//!
//! A default-deny policy decides which host identifiers a script may reach,
//! a budget monitor enforces time and memory limits, and a session runs each
//! script on its own worker thread with a fresh scope.
//!
//! # Modules
//!
//! - [`policy`]    - `AccessPolicy` tables, `standard()`
//! - [`engine`]    - `evaluate_access()` (explicit, prefix, default-deny)
//! - [`budget`]    - `BudgetLimits`, `BudgetMonitor`
//! - [`context`]   - `ScriptContextBuilder`, `Scope`, console buffer
//! - [`convert`]   - interpreter values to and from `PortableValue`
//! - [`evaluator`] - `Evaluator` trait, `JsEvaluator`
//! - [`session`]   - `ExecutionSession::run()`
//! - [`request`]   - `ScriptRequest`, `RequestMeta`, `ExecutionOutcome`
//! - [`error`]     - `ScriptFailure` / `ErrorKind` / `SandboxResult`

pub mod budget;
pub mod context;
pub mod convert;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod policy;
pub mod request;
pub mod session;

pub use budget::{BudgetLimits, BudgetMonitor, BudgetUsage};
pub use context::{flatten_query, ConsoleBuffer, Scope, ScopeBinding, ScriptContextBuilder};
pub use convert::{from_portable, to_portable, to_portable_within, OutputTooLarge, CIRCULAR};
pub use engine::{evaluate_access, AccessDecision, AccessVerdict, MatchedRule};
pub use error::{ErrorKind, SandboxResult, ScriptFailure};
pub use evaluator::{Evaluator, JsEvaluator};
pub use policy::{AccessPolicy, HOST_ROOT};
pub use request::{ExecutionOutcome, RequestMeta, ScriptRequest};
pub use session::{ExecutionSession, FailedExecution, DEFAULT_WORKER_STACK_BYTES};
