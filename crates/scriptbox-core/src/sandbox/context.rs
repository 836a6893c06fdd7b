//! Script context builder: the isolated top-level scope a script sees.
//!
//! The scope is described as plain data ([`Scope`]); the evaluator
//! materializes it inside a fresh interpreter on the worker thread.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::value::PortableValue;

use super::request::RequestMeta;

/// Lines written by `console.log`, in call order.
#[derive(Debug, Clone, Default)]
pub struct ConsoleBuffer(Rc<RefCell<Vec<String>>>);

impl ConsoleBuffer {
    pub fn push(&self, line: String) {
        self.0.borrow_mut().push(line);
    }

    /// Snapshot of the lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// What a top-level name is bound to.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeBinding {
    /// A writable variable initialized from a portable value.
    Value(PortableValue),
    /// A deeply read-only variable.
    ReadOnly(PortableValue),
    /// The `console` object.
    Console,
    /// The `JSON` object.
    Json,
    /// The root of the host namespace.
    HostNamespace,
}

/// Top-level bindings of one execution, in binding order. Later bindings
/// replace earlier ones with the same name.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub bindings: Vec<(String, ScopeBinding)>,
    /// Where `console.log` writes for this execution.
    pub console: ConsoleBuffer,
}

impl Scope {
    /// The final binding for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&ScopeBinding> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
    }
}

/// Name of the request snapshot binding.
pub const REQUEST_BINDING: &str = "request";
pub const CONSOLE_BINDING: &str = "console";
pub const JSON_BINDING: &str = "JSON";

pub struct ScriptContextBuilder;

impl ScriptContextBuilder {
    /// Parameters first, then `request`, `console`, `JSON` and `host`, which
    /// take precedence over parameters of the same name.
    pub fn build(parameters: &BTreeMap<String, PortableValue>, meta: &RequestMeta) -> Scope {
        let mut bindings: Vec<(String, ScopeBinding)> = parameters
            .iter()
            .map(|(name, value)| (name.clone(), ScopeBinding::Value(value.clone())))
            .collect();
        bindings.push((
            REQUEST_BINDING.to_string(),
            ScopeBinding::ReadOnly(request_snapshot(meta)),
        ));
        bindings.push((CONSOLE_BINDING.to_string(), ScopeBinding::Console));
        bindings.push((JSON_BINDING.to_string(), ScopeBinding::Json));
        bindings.push((
            crate::sandbox::policy::HOST_ROOT.to_string(),
            ScopeBinding::HostNamespace,
        ));
        Scope {
            bindings,
            console: ConsoleBuffer::default(),
        }
    }
}

/// `{method, path, remoteAddr, queryParams}`.
fn request_snapshot(meta: &RequestMeta) -> PortableValue {
    let query = flatten_query(&meta.query_parameters)
        .into_iter()
        .map(|(k, v)| (k, PortableValue::String(v)))
        .collect();
    PortableValue::Map(BTreeMap::from([
        ("method".to_string(), PortableValue::from(meta.method.as_str())),
        ("path".to_string(), PortableValue::from(meta.path.as_str())),
        (
            "remoteAddr".to_string(),
            PortableValue::from(meta.remote_address.as_str()),
        ),
        ("queryParams".to_string(), PortableValue::Map(query)),
    ]))
}

/// One value per key; the first occurrence of a repeated key wins.
pub fn flatten_query(pairs: &[(String, String)]) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();
    for (key, value) in pairs {
        flat.entry(key.clone()).or_insert_with(|| value.clone());
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_query_value_wins() {
        let pairs = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "x".to_string()),
            ("a".to_string(), "2".to_string()),
        ];
        let flat = flatten_query(&pairs);
        assert_eq!(flat["a"], "1");
        assert_eq!(flat["b"], "x");
    }

    #[test]
    fn test_request_binding_overrides_parameter() {
        let params = BTreeMap::from([
            ("request".to_string(), PortableValue::from("shadow")),
            ("n".to_string(), PortableValue::from(3i64)),
        ]);
        let meta = RequestMeta::new("GET", "/script").with_remote_address("10.0.0.1");
        let scope = ScriptContextBuilder::build(&params, &meta);

        assert_eq!(scope.get("n"), Some(&ScopeBinding::Value(PortableValue::Number(3.0))));
        let Some(ScopeBinding::ReadOnly(request)) = scope.get("request") else {
            panic!("request should be a read-only binding");
        };
        let request = request.as_map().unwrap();
        assert_eq!(request["method"], PortableValue::from("GET"));
        assert_eq!(request["remoteAddr"], PortableValue::from("10.0.0.1"));
        assert_eq!(request["queryParams"], PortableValue::Map(BTreeMap::new()));
    }

    #[test]
    fn test_console_json_and_host_are_bound() {
        let scope = ScriptContextBuilder::build(&BTreeMap::new(), &RequestMeta::default());
        assert_eq!(scope.get("console"), Some(&ScopeBinding::Console));
        assert_eq!(scope.get("JSON"), Some(&ScopeBinding::Json));
        assert_eq!(scope.get("host"), Some(&ScopeBinding::HostNamespace));
        assert!(scope.get("require").is_none());
    }

    #[test]
    fn test_console_buffer_is_shared_between_clones() {
        let console = ConsoleBuffer::default();
        let writer = console.clone();
        writer.push("one".into());
        writer.push("two".into());
        assert_eq!(console.lines(), vec!["one", "two"]);
    }
}
