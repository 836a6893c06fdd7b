//! Request processor adapter: the content-type keyed contract a routing layer
//! uses to hand request bodies to the engine.
//!
//! [`ScriptProcessor`] accepts `{"script": "...", "params": {...}}` bodies,
//! runs them through an [`ExecutionSession`] and answers with a JSON envelope:
//!
//! ```text
//! {"status":"success","data":{...},"timestamp":1700000000000}
//! {"error":"Request Timeout","errorKind":"Timeout","message":"...","status":408,"timestamp":...}
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::sandbox::error::{ErrorKind, ScriptFailure};
use crate::sandbox::request::{RequestMeta, ScriptRequest};
use crate::sandbox::session::ExecutionSession;
use crate::value::PortableValue;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const JAVASCRIPT_CONTENT_TYPE: &str = "application/javascript";
const TEXT_JAVASCRIPT_CONTENT_TYPE: &str = "text/javascript";

/// A request as seen by a processor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessorRequest {
    pub content_type: String,
    pub body: String,
    pub meta: RequestMeta,
}

impl ProcessorRequest {
    pub fn new(content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
            meta: RequestMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: RequestMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// Status, content type, body and extra headers to send back.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorResponse {
    pub status_code: u16,
    pub content_type: String,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

impl ProcessorResponse {
    /// A JSON response carrying `body`.
    pub fn json(status_code: u16, body: &serde_json::Value) -> Self {
        Self {
            status_code,
            content_type: JSON_CONTENT_TYPE.to_string(),
            body: body.to_string(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// The body parsed back into JSON, if it is JSON.
    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Handles request bodies of one content type.
pub trait RequestProcessor: Send + Sync {
    /// Whether this processor accepts `content_type` (parameters such as
    /// `; charset=UTF-8` included).
    fn supports(&self, content_type: &str) -> bool;

    /// The primary content type this processor is registered under.
    fn content_type(&self) -> &str;

    fn process(&self, request: &ProcessorRequest) -> ProcessorResponse;
}

/// `{"status":"success","data":data,"timestamp":now}`.
pub fn success_envelope(data: serde_json::Value) -> serde_json::Value {
    json!({
        "status": "success",
        "data": data,
        "timestamp": chrono::Utc::now().timestamp_millis(),
    })
}

/// `{"error":title,"errorKind":kind,"message":message,"status":code,"timestamp":now}`.
pub fn error_envelope(kind: ErrorKind, message: &str) -> serde_json::Value {
    json!({
        "error": kind.title(),
        "errorKind": kind.to_string(),
        "message": message,
        "status": kind.status_code(),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    })
}

fn failure_response(failure: &ScriptFailure) -> ProcessorResponse {
    let kind = failure.kind();
    ProcessorResponse::json(kind.status_code(), &error_envelope(kind, &failure.to_string()))
}

/// Runs JavaScript bodies in the sandbox.
pub struct ScriptProcessor {
    session: Arc<ExecutionSession>,
}

impl ScriptProcessor {
    pub fn new(session: Arc<ExecutionSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<ExecutionSession> {
        &self.session
    }

    /// Turn a request body into a script request.
    pub fn parse_body(body: &str, meta: &RequestMeta) -> Result<ScriptRequest, ScriptFailure> {
        if body.trim().is_empty() {
            return Err(ScriptFailure::BadInput("Empty request body".to_string()));
        }
        let json: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| ScriptFailure::BadInput(format!("Malformed request body: {e}")))?;
        let Some(fields) = json.as_object() else {
            return Err(ScriptFailure::BadInput(
                "Request body must be a JSON object".to_string(),
            ));
        };
        let source = match fields.get("script") {
            Some(serde_json::Value::String(source)) => source.clone(),
            Some(_) => {
                return Err(ScriptFailure::BadInput(
                    "'script' field must be a string".to_string(),
                ))
            }
            None => return Err(ScriptFailure::BadInput("Missing 'script' field".to_string())),
        };

        let mut request = ScriptRequest::new(source).with_meta(meta.clone());
        // Non-object params are ignored.
        if let Some(serde_json::Value::Object(params)) = fields.get("params") {
            for (name, value) in params {
                request
                    .parameters
                    .insert(name.clone(), PortableValue::from(value.clone()));
            }
        }
        Ok(request)
    }
}

impl RequestProcessor for ScriptProcessor {
    fn supports(&self, content_type: &str) -> bool {
        let lowered = content_type.trim().to_ascii_lowercase();
        lowered.starts_with(JAVASCRIPT_CONTENT_TYPE)
            || lowered.starts_with(TEXT_JAVASCRIPT_CONTENT_TYPE)
    }

    fn content_type(&self) -> &str {
        JAVASCRIPT_CONTENT_TYPE
    }

    fn process(&self, request: &ProcessorRequest) -> ProcessorResponse {
        let script_request = match Self::parse_body(&request.body, &request.meta) {
            Ok(script_request) => script_request,
            Err(failure) => return failure_response(&failure),
        };
        match self.session.run(&script_request) {
            Ok(outcome) => {
                ProcessorResponse::json(200, &success_envelope(outcome.to_payload()))
            }
            Err(failed) => failure_response(&failed.failure),
        }
    }
}

/// Processors keyed by lower-cased content type.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<String, Arc<dyn RequestProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `processor` under its primary content type, replacing any
    /// previous processor for that type.
    pub fn register(&mut self, processor: Arc<dyn RequestProcessor>) {
        let key = processor.content_type().to_ascii_lowercase();
        debug!(content_type = %key, "registered request processor");
        self.processors.insert(key, processor);
    }

    /// Exact match first, then the first processor whose `supports` accepts
    /// `content_type`.
    pub fn get(&self, content_type: &str) -> Option<Arc<dyn RequestProcessor>> {
        let key = content_type.trim().to_ascii_lowercase();
        if let Some(processor) = self.processors.get(&key) {
            return Some(Arc::clone(processor));
        }
        self.processors
            .values()
            .find(|p| p.supports(content_type))
            .cloned()
    }

    pub fn has_processor(&self, content_type: &str) -> bool {
        self.get(content_type).is_some()
    }

    /// Dispatch `request` to its processor; `None` when nothing handles its
    /// content type.
    pub fn dispatch(&self, request: &ProcessorRequest) -> Option<ProcessorResponse> {
        let processor = self.get(&request.content_type)?;
        Some(processor.process(request))
    }

    pub fn clear(&mut self) {
        self.processors.clear();
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> ScriptProcessor {
        ScriptProcessor::new(Arc::new(ExecutionSession::default()))
    }

    #[test]
    fn test_supports_javascript_variants() {
        let p = processor();
        assert!(p.supports("application/javascript"));
        assert!(p.supports("Application/JavaScript; charset=UTF-8"));
        assert!(p.supports("text/javascript"));
        assert!(!p.supports("application/json"));
    }

    #[test]
    fn test_empty_and_malformed_bodies_are_bad_requests() {
        let p = processor();
        for body in ["", "   ", "{not json", "[1,2]", r#"{"params":{}}"#, r#"{"script":5}"#] {
            let response = p.process(&ProcessorRequest::new(JAVASCRIPT_CONTENT_TYPE, body));
            assert_eq!(response.status_code, 400, "body {body:?}");
            let json = response.body_json().unwrap();
            assert_eq!(json["errorKind"], "BadInput");
            assert_eq!(json["error"], "Bad Request");
            assert_eq!(json["status"], 400);
            assert!(json["timestamp"].as_i64().unwrap() > 0);
        }
    }

    #[test]
    fn test_success_envelope_carries_payload() {
        let body = r#"{"script":"console.log('hi'); a * b","params":{"a":6,"b":7}}"#;
        let response = processor().process(&ProcessorRequest::new(JAVASCRIPT_CONTENT_TYPE, body));
        assert_eq!(response.status_code, 200);
        assert_eq!(response.content_type, JSON_CONTENT_TYPE);
        let json = response.body_json().unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["data"]["result"], 42);
        assert_eq!(json["data"]["console"], json!(["hi"]));
        assert!(json["data"]["executionTimeMs"].is_u64());
    }

    #[test]
    fn test_script_errors_map_to_envelope() {
        let body = r#"{"script":"1 +"}"#;
        let response = processor().process(&ProcessorRequest::new(JAVASCRIPT_CONTENT_TYPE, body));
        assert_eq!(response.status_code, 400);
        let json = response.body_json().unwrap();
        assert_eq!(json["errorKind"], "SyntaxError");
        assert_eq!(json["error"], "Script Error");
    }

    #[test]
    fn test_parse_body_ignores_non_object_params() {
        let request =
            ScriptProcessor::parse_body(r#"{"script":"1","params":[1]}"#, &RequestMeta::default())
                .unwrap();
        assert!(request.parameters.is_empty());
    }

    #[test]
    fn test_registry_exact_then_supports_fallback() {
        let mut registry = ProcessorRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(processor()));
        assert_eq!(registry.len(), 1);

        assert!(registry.has_processor("application/javascript"));
        assert!(registry.has_processor("text/javascript; charset=utf-8"));
        assert!(!registry.has_processor("application/xml"));

        let response = registry
            .dispatch(&ProcessorRequest::new("text/javascript", r#"{"script":"2 + 2"}"#))
            .unwrap();
        assert_eq!(response.body_json().unwrap()["data"]["result"], 4);
        assert!(registry
            .dispatch(&ProcessorRequest::new("text/plain", "x"))
            .is_none());

        registry.clear();
        assert!(!registry.has_processor("application/javascript"));
    }
}
