//! Script request and execution outcome types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::PortableValue;

/// Transport metadata of the request that carried a script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    pub remote_address: String,
    /// Query parameters in arrival order; repeated keys stay repeated.
    #[serde(default)]
    pub query_parameters: Vec<(String, String)>,
}

impl RequestMeta {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = address.into();
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_parameters.push((key.into(), value.into()));
        self
    }
}

/// One script to run, with its parameters and request metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub source: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, PortableValue>,
    #[serde(default)]
    pub request_meta: RequestMeta,
}

impl ScriptRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<PortableValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_meta(mut self, meta: RequestMeta) -> Self {
        self.request_meta = meta;
        self
    }
}

/// Result of a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub result: PortableValue,
    pub console_lines: Vec<String>,
    pub elapsed_millis: u64,
    pub memory_delta_bytes: i64,
}

impl ExecutionOutcome {
    /// The success payload: `{result, console?, executionTimeMs, memoryUsedBytes}`.
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::Map::new();
        payload.insert("result".to_string(), self.result.to_json());
        if !self.console_lines.is_empty() {
            payload.insert(
                "console".to_string(),
                serde_json::Value::from(self.console_lines.clone()),
            );
        }
        payload.insert(
            "executionTimeMs".to_string(),
            serde_json::Value::from(self.elapsed_millis),
        );
        payload.insert(
            "memoryUsedBytes".to_string(),
            serde_json::Value::from(self.memory_delta_bytes),
        );
        serde_json::Value::Object(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_params_and_meta() {
        let req = ScriptRequest::new("a + 1")
            .with_param("a", 41i64)
            .with_meta(RequestMeta::new("POST", "/run").with_query("x", "1"));
        assert_eq!(req.parameters["a"], PortableValue::Number(41.0));
        assert_eq!(req.request_meta.method, "POST");
        assert_eq!(req.request_meta.query_parameters, vec![("x".into(), "1".into())]);
    }

    #[test]
    fn test_payload_omits_empty_console() {
        let outcome = ExecutionOutcome {
            result: PortableValue::Number(5050.0),
            console_lines: Vec::new(),
            elapsed_millis: 3,
            memory_delta_bytes: 128,
        };
        let payload = outcome.to_payload();
        assert_eq!(payload["result"], serde_json::json!(5050));
        assert!(payload.get("console").is_none());
        assert_eq!(payload["executionTimeMs"], serde_json::json!(3));
        assert_eq!(payload["memoryUsedBytes"], serde_json::json!(128));
    }

    #[test]
    fn test_payload_includes_console_lines_in_order() {
        let outcome = ExecutionOutcome {
            result: PortableValue::Null,
            console_lines: vec!["a".into(), "b".into()],
            elapsed_millis: 0,
            memory_delta_bytes: 0,
        };
        assert_eq!(outcome.to_payload()["console"], serde_json::json!(["a", "b"]));
    }
}
