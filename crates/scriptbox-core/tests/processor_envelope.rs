//! Processor adapter tests: content-type routing and JSON envelopes.

use std::sync::Arc;

use scriptbox_core::{
    BudgetLimits, ExecutionSession, ProcessorRegistry, ProcessorRequest, RequestMeta,
    ScriptProcessor,
};
use serde_json::{json, Value};

fn registry_with(limits: BudgetLimits) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(ScriptProcessor::new(Arc::new(
        ExecutionSession::new(limits),
    ))));
    registry
}

fn post(registry: &ProcessorRegistry, body: Value) -> (u16, Value) {
    let request = ProcessorRequest::new("application/javascript; charset=UTF-8", body.to_string())
        .with_meta(RequestMeta::new("POST", "/script").with_query("user", "ada"));
    let response = registry.dispatch(&request).expect("javascript processor registered");
    let json = response.body_json().expect("envelope is JSON");
    (response.status_code, json)
}

// -------------------------------------------------------------------------
// Success envelope
// -------------------------------------------------------------------------

#[test]
fn test_success_envelope_shape() {
    let registry = registry_with(BudgetLimits::default());
    let (status, json) = post(
        &registry,
        json!({"script": "console.log(request.queryParams.user); [x, x * 2]", "params": {"x": 5}}),
    );
    assert_eq!(status, 200);
    assert_eq!(json["status"], "success");
    assert_eq!(json["data"]["result"], json!([5, 10]));
    assert_eq!(json["data"]["console"], json!(["ada"]));
    assert!(json["data"]["memoryUsedBytes"].is_i64());
    assert!(json["timestamp"].as_i64().unwrap() > 0);
}

#[test]
fn test_silent_script_omits_console() {
    let registry = registry_with(BudgetLimits::default());
    let (_, json) = post(&registry, json!({"script": "null"}));
    assert_eq!(json["data"]["result"], Value::Null);
    assert!(json["data"].get("console").is_none());
}

// -------------------------------------------------------------------------
// Error envelopes
// -------------------------------------------------------------------------

#[test]
fn test_missing_script_is_bad_request() {
    let registry = registry_with(BudgetLimits::default());
    let (status, json) = post(&registry, json!({"params": {"a": 1}}));
    assert_eq!(status, 400);
    assert_eq!(json["errorKind"], "BadInput");
    assert_eq!(json["status"], 400);
}

#[test]
fn test_timeout_envelope() {
    let registry = registry_with(BudgetLimits {
        timeout_ms: 100,
        ..BudgetLimits::default()
    });
    let (status, json) = post(&registry, json!({"script": "while (true) {}"}));
    assert_eq!(status, 408);
    assert_eq!(json["error"], "Request Timeout");
    assert_eq!(json["errorKind"], "Timeout");
    assert!(json["message"].as_str().unwrap().contains("timeout exceeded"));
}

#[test]
fn test_memory_envelope() {
    let registry = registry_with(BudgetLimits {
        max_memory_bytes: 1024 * 1024,
        ..BudgetLimits::default()
    });
    let (status, json) = post(
        &registry,
        json!({"script": "var a = []; while (true) { a.push('item-' + a.length); }"}),
    );
    assert_eq!(status, 413);
    assert_eq!(json["error"], "Payload Too Large");
    assert!(json["message"].as_str().unwrap().contains("memory limit exceeded"));
}

#[test]
fn test_access_denied_envelope() {
    let registry = registry_with(BudgetLimits::default());
    let (status, json) = post(&registry, json!({"script": "host.net.Socket"}));
    assert_eq!(status, 400);
    assert_eq!(json["errorKind"], "AccessDenied");
    assert!(json["message"].as_str().unwrap().contains("host.net.Socket"));
}

#[test]
fn test_unregistered_content_type_is_not_dispatched() {
    let registry = registry_with(BudgetLimits::default());
    assert!(registry
        .dispatch(&ProcessorRequest::new("application/json", "{}"))
        .is_none());
}
