//! Execution session: the single entry point that turns a [`ScriptRequest`]
//! into an [`ExecutionOutcome`] or a typed failure.
//!
//! Each run gets a dedicated worker thread with a fixed stack. The context
//! builder, interpreter, heap meter and budget state are created on that
//! thread and dropped there; the worker is joined before `run` returns.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::ScriptConfig;
use crate::lang::heap::HeapMeter;
use crate::metrics::METRICS;
use crate::obs::{self, ExecutionSpan};
use crate::value::PortableValue;

use super::budget::{BudgetLimits, BudgetMonitor, BudgetUsage};
use super::context::ScriptContextBuilder;
use super::error::{ErrorKind, SandboxResult, ScriptFailure};
use super::evaluator::{Evaluator, JsEvaluator};
use super::policy::AccessPolicy;
use super::request::{ExecutionOutcome, ScriptRequest};

/// Default worker stack (16 MiB); deep script recursion needs the headroom.
pub const DEFAULT_WORKER_STACK_BYTES: usize = 16 * 1024 * 1024;

const WORKER_THREAD_NAME: &str = "scriptbox-worker";

/// A failed execution together with whatever it produced before failing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{failure}")]
pub struct FailedExecution {
    pub failure: ScriptFailure,
    pub console_lines: Vec<String>,
    pub elapsed_millis: u64,
    pub memory_delta_bytes: i64,
}

impl FailedExecution {
    pub fn kind(&self) -> ErrorKind {
        self.failure.kind()
    }

    pub fn status_code(&self) -> u16 {
        self.failure.status_code()
    }
}

impl From<ScriptFailure> for FailedExecution {
    fn from(failure: ScriptFailure) -> Self {
        Self {
            failure,
            console_lines: Vec::new(),
            elapsed_millis: 0,
            memory_delta_bytes: 0,
        }
    }
}

/// What the worker hands back to the calling thread.
struct WorkerReport {
    result: SandboxResult<PortableValue>,
    console_lines: Vec<String>,
    usage: BudgetUsage,
}

impl WorkerReport {
    fn internal(message: String) -> Self {
        Self {
            result: Err(ScriptFailure::Internal(message)),
            console_lines: Vec::new(),
            usage: BudgetUsage::default(),
        }
    }
}

/// Runs scripts under one policy and one set of budget limits.
pub struct ExecutionSession<E: Evaluator = JsEvaluator> {
    evaluator: E,
    policy: Arc<AccessPolicy>,
    limits: BudgetLimits,
    worker_stack_bytes: usize,
}

impl ExecutionSession<JsEvaluator> {
    /// The standard policy and the built-in evaluator.
    pub fn new(limits: BudgetLimits) -> Self {
        Self::with_evaluator(JsEvaluator::default(), limits)
    }

    pub fn from_config(config: &ScriptConfig) -> Self {
        Self::with_evaluator(JsEvaluator::new(config.max_call_depth), config.limits())
            .with_worker_stack_bytes(config.worker_stack_bytes)
    }
}

impl Default for ExecutionSession<JsEvaluator> {
    fn default() -> Self {
        Self::new(BudgetLimits::default())
    }
}

impl<E: Evaluator> ExecutionSession<E> {
    pub fn with_evaluator(evaluator: E, limits: BudgetLimits) -> Self {
        Self {
            evaluator,
            policy: AccessPolicy::shared_standard(),
            limits,
            worker_stack_bytes: DEFAULT_WORKER_STACK_BYTES,
        }
    }

    pub fn with_policy(mut self, policy: Arc<AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_worker_stack_bytes(mut self, bytes: usize) -> Self {
        self.worker_stack_bytes = bytes;
        self
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Run one script to completion. Never retries.
    pub fn run(&self, request: &ScriptRequest) -> Result<ExecutionOutcome, FailedExecution> {
        let execution_id = Uuid::new_v4().to_string();
        let _span = ExecutionSpan::enter(&execution_id, &obs::source_digest(&request.source));

        if request.source.trim().is_empty() {
            let failure = ScriptFailure::BadInput("script source is empty".to_string());
            METRICS.record_failure(&failure);
            obs::emit_execution_failed(&execution_id, &failure, 0);
            return Err(failure.into());
        }

        METRICS.inc_started();
        obs::emit_execution_started(&execution_id, request.source.len(), request.parameters.len());

        let report = self.run_on_worker(request);
        match report.result {
            Ok(result) => {
                METRICS.inc_succeeded();
                obs::emit_execution_finished(
                    &execution_id,
                    report.usage.elapsed_millis,
                    report.usage.memory_delta_bytes,
                    report.console_lines.len(),
                );
                Ok(ExecutionOutcome {
                    result,
                    console_lines: report.console_lines,
                    elapsed_millis: report.usage.elapsed_millis,
                    memory_delta_bytes: report.usage.memory_delta_bytes,
                })
            }
            Err(failure) => {
                METRICS.record_failure(&failure);
                obs::emit_execution_failed(&execution_id, &failure, report.usage.elapsed_millis);
                Err(FailedExecution {
                    failure,
                    console_lines: report.console_lines,
                    elapsed_millis: report.usage.elapsed_millis,
                    memory_delta_bytes: report.usage.memory_delta_bytes,
                })
            }
        }
    }

    fn run_on_worker(&self, request: &ScriptRequest) -> WorkerReport {
        let evaluator = &self.evaluator;
        let policy: &AccessPolicy = &self.policy;
        let limits = self.limits;
        let span = tracing::Span::current();

        std::thread::scope(|s| {
            let spawned = std::thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_string())
                .stack_size(self.worker_stack_bytes)
                .spawn_scoped(s, move || {
                    let _entered = span.enter();
                    let scope =
                        ScriptContextBuilder::build(&request.parameters, &request.request_meta);
                    let console = scope.console.clone();
                    let mut monitor = BudgetMonitor::start(limits, HeapMeter::new());
                    let result = evaluator.evaluate(scope, &request.source, policy, &mut monitor);
                    WorkerReport {
                        result,
                        console_lines: console.lines(),
                        usage: monitor.usage(),
                    }
                });
            match spawned {
                Ok(handle) => handle.join().unwrap_or_else(|panic| {
                    WorkerReport::internal(format!("worker panicked: {}", panic_message(&*panic)))
                }),
                Err(err) => WorkerReport::internal(format!("failed to spawn worker: {err}")),
            }
        })
    }
}

impl<E: Evaluator + 'static> ExecutionSession<E> {
    /// [`run`](Self::run) on the blocking pool, for task-per-request callers.
    pub async fn run_async(
        self: &Arc<Self>,
        request: ScriptRequest,
    ) -> Result<ExecutionOutcome, FailedExecution> {
        let session = Arc::clone(self);
        match tokio::task::spawn_blocking(move || session.run(&request)).await {
            Ok(result) => result,
            Err(err) => Err(ScriptFailure::Internal(format!("execution task failed: {err}")).into()),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::context::Scope;

    struct PanickingEvaluator;

    impl Evaluator for PanickingEvaluator {
        fn evaluate(
            &self,
            _scope: Scope,
            _source: &str,
            _policy: &AccessPolicy,
            _monitor: &mut BudgetMonitor,
        ) -> SandboxResult<PortableValue> {
            panic!("evaluator bug");
        }
    }

    #[test]
    fn test_sum_scenario() {
        let session = ExecutionSession::default();
        let outcome = session
            .run(&ScriptRequest::new("var s=0; for (var i=1;i<=100;i++){s+=i;} s;"))
            .unwrap();
        assert_eq!(outcome.result, PortableValue::Number(5050.0));
        assert!(outcome.console_lines.is_empty());
    }

    #[test]
    fn test_blank_source_is_bad_input() {
        let session = ExecutionSession::default();
        let err = session.run(&ScriptRequest::new("  \n\t")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.elapsed_millis, 0);
    }

    #[test]
    fn test_failures_keep_console_output() {
        let session = ExecutionSession::default();
        let err = session
            .run(&ScriptRequest::new("console.log('before'); throw new Error('boom');"))
            .unwrap_err();
        assert_eq!(err.console_lines, vec!["before"]);
        assert!(matches!(err.failure, ScriptFailure::Runtime(ref m) if m == "Error: boom"));
    }

    #[test]
    fn test_worker_panic_is_internal() {
        let session = ExecutionSession::with_evaluator(PanickingEvaluator, BudgetLimits::default());
        let err = session.run(&ScriptRequest::new("1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("evaluator bug"));
    }

    #[test]
    fn test_from_config_applies_limits() {
        let config = ScriptConfig {
            timeout_ms: 250,
            ..ScriptConfig::default()
        };
        let session = ExecutionSession::from_config(&config);
        assert_eq!(session.limits().timeout_ms, 250);
    }

    #[tokio::test]
    async fn test_run_async_matches_run() {
        let session = Arc::new(ExecutionSession::default());
        let outcome = session
            .run_async(ScriptRequest::new("[1, 2, 3].length").with_param("unused", true))
            .await
            .unwrap();
        assert_eq!(outcome.result, PortableValue::Number(3.0));
    }
}
