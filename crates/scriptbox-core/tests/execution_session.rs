//! End-to-end execution tests: session, budgets, policy and isolation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scriptbox_core::sandbox::CIRCULAR;
use scriptbox_core::{
    AccessPolicy, BudgetLimits, ErrorKind, ExecutionSession, PortableValue, RequestMeta,
    ScriptFailure, ScriptRequest,
};

fn run(source: &str) -> Result<PortableValue, scriptbox_core::FailedExecution> {
    ExecutionSession::default()
        .run(&ScriptRequest::new(source))
        .map(|outcome| outcome.result)
}

// -------------------------------------------------------------------------
// Results
// -------------------------------------------------------------------------

#[test]
fn test_loop_sum_returns_5050() {
    assert_eq!(
        run("var s=0; for (var i=1;i<=100;i++){s+=i;} s;").unwrap(),
        PortableValue::Number(5050.0)
    );
}

#[test]
fn test_host_list_reports_size() {
    let source = "var l = new host.util.ArrayList(); l.add('a'); l.add('b'); l.size();";
    assert_eq!(run(source).unwrap(), PortableValue::Number(2.0));
}

#[test]
fn test_host_list_result_converts_to_list() {
    let source = "var l = new host.util.ArrayList(); l.add(1); l.add('two'); l;";
    assert_eq!(
        run(source).unwrap(),
        PortableValue::List(vec![PortableValue::Number(1.0), PortableValue::from("two")])
    );
}

#[test]
fn test_parameters_bind_as_variables() {
    let request = ScriptRequest::new("greeting + ', ' + who.name")
        .with_param("greeting", "hello")
        .with_param(
            "who",
            PortableValue::Map(BTreeMap::from([(
                "name".to_string(),
                PortableValue::from("ada"),
            )])),
        );
    let outcome = ExecutionSession::default().run(&request).unwrap();
    assert_eq!(outcome.result, PortableValue::from("hello, ada"));
}

#[test]
fn test_request_snapshot_uses_first_query_value() {
    let meta = RequestMeta::new("GET", "/scripts/run")
        .with_remote_address("127.0.0.1")
        .with_query("mode", "fast")
        .with_query("mode", "slow");
    let request = ScriptRequest::new("request.method + ' ' + request.path + ' ' + request.queryParams.mode")
        .with_meta(meta);
    let outcome = ExecutionSession::default().run(&request).unwrap();
    assert_eq!(outcome.result, PortableValue::from("GET /scripts/run fast"));
}

#[test]
fn test_cyclic_result_is_still_reported() {
    let result = run("var o = {name: 'loop'}; o.self = o; o;").unwrap();
    let map = result.as_map().unwrap();
    assert_eq!(map["name"], PortableValue::from("loop"));
    assert_eq!(map["self"], PortableValue::from(CIRCULAR));
}

#[test]
fn test_function_result_becomes_string() {
    let result = run("function f() { return 1; } f;").unwrap();
    assert!(result.as_str().is_some());
}

// -------------------------------------------------------------------------
// Failures
// -------------------------------------------------------------------------

#[test]
fn test_syntax_error_is_400() {
    let err = run("1 +").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.status_code(), 400);
}

#[test]
fn test_infinite_loop_times_out_with_408() {
    let limits = BudgetLimits {
        timeout_ms: 200,
        ..BudgetLimits::default()
    };
    let started = Instant::now();
    let err = ExecutionSession::new(limits)
        .run(&ScriptRequest::new("while(true){}"))
        .unwrap_err();
    let wall = started.elapsed();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.status_code(), 408);
    assert!(err.elapsed_millis >= 200);
    // Checked on the instruction cadence, so the loop stops soon after the limit.
    assert!(err.elapsed_millis < 200 + 300, "reported {}ms", err.elapsed_millis);
    assert!(wall < Duration::from_millis(200 + 500), "took {wall:?}");
}

#[test]
fn test_memory_growth_fails_with_413() {
    let limits = BudgetLimits {
        max_memory_bytes: 1024 * 1024,
        ..BudgetLimits::default()
    };
    let err = ExecutionSession::new(limits)
        .run(&ScriptRequest::new("var s = 'x'; while (true) { s = s + s; }"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MemoryExceeded);
    assert_eq!(err.status_code(), 413);
}

/// An array holding the same 1 MB string 3000 times renders to 3 GB.
const SHARED_MEGABYTE: &str =
    "var s = 'x'.repeat(1000000); var a = []; for (var i = 0; i < 3000; i++) { a.push(s); }";

fn assert_memory_exceeded(tail: &str) {
    let err = run(&format!("{SHARED_MEGABYTE} {tail}")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MemoryExceeded, "{tail}");
    assert_eq!(err.status_code(), 413);
}

#[test]
fn test_string_conversion_of_shared_strings_is_bounded() {
    assert_memory_exceeded("String(a).length");
}

#[test]
fn test_join_of_shared_strings_is_bounded() {
    assert_memory_exceeded("a.join('').length");
}

#[test]
fn test_console_log_of_shared_strings_is_bounded() {
    assert_memory_exceeded("console.log(a); 0");
}

#[test]
fn test_stringify_and_result_of_shared_strings_are_bounded() {
    assert_memory_exceeded("JSON.stringify(a).length");
    assert_memory_exceeded("a");
}

#[test]
fn test_join_separator_growth_is_bounded() {
    let src = "var sep = 'x'.repeat(100000); var a = [];
               for (var i = 0; i < 1000; i++) { a.push(i); } a.join(sep).length";
    assert_eq!(run(src).unwrap_err().kind(), ErrorKind::MemoryExceeded);
}

#[test]
fn test_huge_repeat_count_is_413() {
    let err = run("'ab'.repeat(1e19)").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MemoryExceeded);
    assert_eq!(err.status_code(), 413);
}

#[test]
fn test_releasing_deep_nesting_survives() {
    let limits = BudgetLimits {
        max_memory_bytes: 64 * 1024 * 1024,
        ..BudgetLimits::default()
    };
    let session = ExecutionSession::new(limits);
    let nested = "var a = []; for (var i = 0; i < 100000; i++) { a = [a]; }";
    let released = session
        .run(&ScriptRequest::new(format!("{nested} a = null; 'survived'")))
        .unwrap();
    assert_eq!(released.result, PortableValue::from("survived"));
    // Left alive for teardown this time.
    let kept = session
        .run(&ScriptRequest::new(format!("{nested} a.length")))
        .unwrap();
    assert_eq!(kept.result, PortableValue::Number(1.0));
}

#[test]
fn test_denied_host_identifier_cannot_be_caught() {
    let err = run("try { host.lang.System.exit(0); } catch (e) { 'swallowed'; }").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    assert!(matches!(
        err.failure,
        ScriptFailure::AccessDenied { ref identifier } if identifier == "host.lang.System"
    ));
}

#[test]
fn test_filesystem_namespace_is_denied() {
    let err = run("new host.io.File('/etc/passwd')").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
}

#[test]
fn test_custom_policy_can_deny_safe_namespace() {
    let policy = AccessPolicy::standard().with_denied("host.util.ArrayList");
    let session = ExecutionSession::default().with_policy(Arc::new(policy));
    let err = session
        .run(&ScriptRequest::new("new host.util.ArrayList()"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
}

#[test]
fn test_uncaught_throw_is_runtime_error() {
    let err = run("throw new TypeError('nope')").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeError);
    assert_eq!(err.status_code(), 400);
}

// -------------------------------------------------------------------------
// Console and isolation
// -------------------------------------------------------------------------

#[test]
fn test_console_lines_keep_call_order() {
    let outcome = ExecutionSession::default()
        .run(&ScriptRequest::new(
            "console.log('one'); console.log('two', 3); console.log({a: 1}); 0",
        ))
        .unwrap();
    assert_eq!(outcome.console_lines.len(), 3);
    assert_eq!(outcome.console_lines[0], "one");
    assert_eq!(outcome.console_lines[1], "two 3");
}

#[test]
fn test_console_log_returns_the_logged_line() {
    let outcome = ExecutionSession::default()
        .run(&ScriptRequest::new("var r = console.log('a', 1); r"))
        .unwrap();
    assert_eq!(outcome.result, PortableValue::from("a 1"));
    assert_eq!(outcome.console_lines, vec!["a 1".to_string()]);
}

#[test]
fn test_large_numbers_use_exponent_form() {
    assert_eq!(run("String(1e21)").unwrap(), PortableValue::from("1e+21"));
    assert_eq!(run("'' + 123456789e20").unwrap(), PortableValue::from("1.23456789e+28"));
    assert_eq!(run("String(1e20)").unwrap(), PortableValue::from("100000000000000000000"));
}

#[test]
fn test_globals_do_not_leak_between_runs() {
    let session = ExecutionSession::default();
    session
        .run(&ScriptRequest::new("var leaked = 42; console.log('first'); leaked"))
        .unwrap();
    let second = session
        .run(&ScriptRequest::new("typeof leaked"))
        .unwrap();
    assert_eq!(second.result, PortableValue::from("undefined"));
    assert!(second.console_lines.is_empty());
}

#[test]
fn test_parameters_are_copied_into_each_run() {
    let session = ExecutionSession::default();
    let request = ScriptRequest::new("items.push(4); items.length")
        .with_param("items", PortableValue::List(vec![PortableValue::Number(1.0)]));
    assert_eq!(session.run(&request).unwrap().result, PortableValue::Number(2.0));
    assert_eq!(session.run(&request).unwrap().result, PortableValue::Number(2.0));
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let session = Arc::new(ExecutionSession::default());
    let mut handles = Vec::new();
    for n in 0..4i64 {
        let session = Arc::clone(&session);
        handles.push(tokio::spawn(async move {
            session
                .run_async(ScriptRequest::new("console.log(n); n * n").with_param("n", n))
                .await
        }));
    }
    for (n, handle) in handles.into_iter().enumerate() {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.result, PortableValue::Number((n * n) as f64));
        assert_eq!(outcome.console_lines, vec![n.to_string()]);
    }
}
