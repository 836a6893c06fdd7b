//! Sandboxed evaluator: runs script source against a [`Scope`] under an
//! access policy and a budget monitor.

use std::rc::Rc;

use crate::lang::value::freeze_deep;
use crate::lang::{parse_program, Interpreter, Value, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_NESTING};
use crate::value::PortableValue;

use super::budget::BudgetMonitor;
use super::context::{Scope, ScopeBinding};
use super::convert::{from_portable, to_portable_within, OutputTooLarge};
use super::error::SandboxResult;
use super::policy::{AccessPolicy, HOST_ROOT};

/// Something that can run a script in isolation.
///
/// Implementations must create all interpreter state inside `evaluate` and
/// drop it before returning; nothing may outlive the call.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        scope: Scope,
        source: &str,
        policy: &AccessPolicy,
        monitor: &mut BudgetMonitor,
    ) -> SandboxResult<PortableValue>;
}

/// The built-in JavaScript-subset evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsEvaluator {
    pub max_call_depth: usize,
    pub max_nesting: usize,
}

impl Default for JsEvaluator {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_nesting: DEFAULT_MAX_NESTING,
        }
    }
}

impl JsEvaluator {
    pub fn new(max_call_depth: usize) -> Self {
        Self {
            max_call_depth,
            ..Self::default()
        }
    }
}

impl Evaluator for JsEvaluator {
    fn evaluate(
        &self,
        scope: Scope,
        source: &str,
        policy: &AccessPolicy,
        monitor: &mut BudgetMonitor,
    ) -> SandboxResult<PortableValue> {
        let program = parse_program(source, self.max_nesting)?;
        // The reported copy of the result may not outgrow the memory budget.
        let result_limit = usize::try_from(monitor.limits().max_memory_bytes).unwrap_or(usize::MAX);

        let mut interp = Interpreter::new(monitor, policy, scope.console.clone(), self.max_call_depth);
        for (name, binding) in &scope.bindings {
            let (value, mutable) = match binding {
                ScopeBinding::Value(v) => (from_portable(&mut interp, v), true),
                ScopeBinding::ReadOnly(v) => {
                    let value = from_portable(&mut interp, v);
                    if let Ok(value) = &value {
                        freeze_deep(value);
                    }
                    (value, false)
                }
                ScopeBinding::Console => (Ok(interp.console_object()), false),
                ScopeBinding::Json => (Ok(interp.json_object()), false),
                ScopeBinding::HostNamespace => (Ok(Value::Namespace(Rc::from(HOST_ROOT))), false),
            };
            let value = value.map_err(|unwind| unwind.into_failure())?;
            interp.define_global(name, value, mutable);
        }

        let result = interp.run(&program);
        // Sample while the result graph is still alive.
        interp.sample_memory();
        let value = result?;
        to_portable_within(&value, result_limit)
            .map_err(|OutputTooLarge| interp.memory_exceeded(result_limit).into_failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::heap::HeapMeter;
    use crate::sandbox::budget::BudgetLimits;
    use crate::sandbox::context::ScriptContextBuilder;
    use crate::sandbox::error::ScriptFailure;
    use crate::sandbox::request::RequestMeta;
    use std::collections::BTreeMap;

    fn eval(source: &str, params: BTreeMap<String, PortableValue>) -> SandboxResult<PortableValue> {
        let source = source.to_string();
        std::thread::Builder::new()
            .stack_size(16 * 1024 * 1024)
            .spawn(move || {
                let meta = RequestMeta::new("POST", "/eval").with_query("q", "first").with_query("q", "second");
                let scope = ScriptContextBuilder::build(&params, &meta);
                let mut monitor = BudgetMonitor::start(BudgetLimits::default(), HeapMeter::new());
                JsEvaluator::default().evaluate(scope, &source, &AccessPolicy::standard(), &mut monitor)
            })
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_parameters_are_visible_as_variables() {
        let params = BTreeMap::from([("n".to_string(), PortableValue::from(41i64))]);
        assert_eq!(eval("n + 1", params).unwrap(), PortableValue::Number(42.0));
    }

    #[test]
    fn test_request_snapshot_is_read_only() {
        let err = eval("request.method = 'GET'; 1", BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ScriptFailure::Runtime(ref m) if m.starts_with("TypeError")));
        assert_eq!(
            eval("request.queryParams.q", BTreeMap::new()).unwrap(),
            PortableValue::from("first")
        );
    }

    #[test]
    fn test_json_round_trips_through_script() {
        let result = eval("JSON.stringify(JSON.parse('{\"a\":[1,2]}'))", BTreeMap::new()).unwrap();
        assert_eq!(result, PortableValue::from("{\"a\":[1,2]}"));
    }

    #[test]
    fn test_syntax_errors_carry_position() {
        let err = eval("1 +", BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ScriptFailure::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_result_objects_become_maps() {
        let result = eval("({total: 3, items: ['a']})", BTreeMap::new()).unwrap();
        let map = result.as_map().unwrap();
        assert_eq!(map["total"], PortableValue::Number(3.0));
        assert_eq!(map["items"], PortableValue::List(vec![PortableValue::from("a")]));
    }
}
