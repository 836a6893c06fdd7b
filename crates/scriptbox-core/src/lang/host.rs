//! Natively implemented host classes.
//!
//! Scripts reach these through the `host` namespace (`new host.util.ArrayList()`).
//! Every reach goes through the access policy first; the interpreter calls in
//! here only after the identifier was allowed.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{SecondsFormat, Utc};

use super::heap::HeapMeter;
use super::interp::{Eval, Interpreter, Unwind};
use super::ops::{strict_equals, to_integer, to_number, type_of};
use super::value::{
    entry_bytes, release_values, string_bytes, Value, HEADER_BYTES, SLOT_BYTES,
};

pub const ARRAY_LIST: &str = "host.util.ArrayList";
pub const HASH_MAP: &str = "host.util.HashMap";
pub const HASH_SET: &str = "host.util.HashSet";
pub const STRING_BUILDER: &str = "host.lang.StringBuilder";
pub const INTEGER: &str = "host.lang.Integer";
pub const INSTANT: &str = "host.time.Instant";

const PROVIDED: &[&str] = &[ARRAY_LIST, HASH_MAP, HASH_SET, STRING_BUILDER, INTEGER, INSTANT];

/// Whether `identifier` has a native implementation.
pub fn is_provided_class(identifier: &str) -> bool {
    PROVIDED.contains(&identifier)
}

/// Static constant `name` of class `identifier`.
pub fn static_field(identifier: &str, name: &str) -> Option<Value> {
    match (identifier, name) {
        (INTEGER, "MAX_VALUE") => Some(Value::Number(f64::from(i32::MAX))),
        (INTEGER, "MIN_VALUE") => Some(Value::Number(f64::from(i32::MIN))),
        _ => None,
    }
}

pub fn has_static_method(identifier: &str, name: &str) -> bool {
    matches!(
        (identifier, name),
        (INTEGER, "parseInt" | "valueOf") | (INSTANT, "now" | "epochMillis")
    )
}

/// State of one host object.
#[derive(Debug)]
pub enum HostKind {
    List(Vec<Value>),
    /// Keys are coerced to strings.
    Map(BTreeMap<Rc<str>, Value>),
    /// Members keyed by type and display text.
    Set(BTreeMap<Rc<str>, Value>),
    StringBuilder(String),
}

impl HostKind {
    pub fn has_method(&self, name: &str) -> bool {
        let methods: &[&str] = match self {
            HostKind::List(_) => &[
                "add", "get", "set", "size", "remove", "clear", "isEmpty", "contains", "indexOf",
                "toArray", "toString",
            ],
            HostKind::Map(_) => &[
                "put",
                "get",
                "getOrDefault",
                "remove",
                "containsKey",
                "size",
                "keySet",
                "values",
                "isEmpty",
                "clear",
                "toString",
            ],
            HostKind::Set(_) => &[
                "add", "contains", "remove", "size", "isEmpty", "clear", "toArray", "toString",
            ],
            HostKind::StringBuilder(_) => &["append", "length", "reverse", "toString"],
        };
        methods.contains(&name)
    }
}

/// Bytes charged for a host object in state `kind`.
pub fn footprint(kind: &HostKind) -> usize {
    HEADER_BYTES
        + match kind {
            HostKind::List(items) => items.len() * SLOT_BYTES,
            HostKind::Map(map) | HostKind::Set(map) => map.keys().map(|k| entry_bytes(k)).sum(),
            HostKind::StringBuilder(text) => string_bytes(text.len()),
        }
}


/// A host object with its heap charge.
pub struct HostObject {
    class: &'static str,
    kind: HostKind,
    charged: usize,
    heap: Rc<HeapMeter>,
}

impl HostObject {
    pub fn new(class: &'static str, kind: HostKind, heap: &Rc<HeapMeter>) -> Self {
        let charged = footprint(&kind);
        heap.charge(charged);
        Self {
            class,
            kind,
            charged,
            heap: heap.clone(),
        }
    }

    pub fn class_name(&self) -> &'static str {
        self.class
    }

    pub fn kind(&self) -> &HostKind {
        &self.kind
    }

    /// Apply `f` to the state and re-charge for its new size.
    pub fn mutate<R>(&mut self, f: impl FnOnce(&mut HostKind) -> R) -> R {
        let out = f(&mut self.kind);
        let charged = footprint(&self.kind);
        self.heap.adjust(self.charged, charged);
        self.charged = charged;
        out
    }

    /// Empty the object, returning the values it held.
    pub fn take_all(&mut self) -> Vec<Value> {
        self.mutate(|kind| match kind {
            HostKind::List(items) => std::mem::take(items),
            HostKind::Map(map) | HostKind::Set(map) => {
                std::mem::take(map).into_values().collect()
            }
            HostKind::StringBuilder(text) => {
                text.clear();
                Vec::new()
            }
        })
    }
}

impl Drop for HostObject {
    fn drop(&mut self) {
        self.heap.release(self.charged);
        match &mut self.kind {
            HostKind::List(items) => release_values(std::mem::take(items)),
            HostKind::Map(map) | HostKind::Set(map) => {
                release_values(std::mem::take(map).into_values())
            }
            HostKind::StringBuilder(_) => {}
        }
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

impl Interpreter<'_> {
    /// `new <identifier>(args)` for an allowed class.
    pub(super) fn host_construct(&mut self, identifier: &str, args: Vec<Value>) -> Eval<Value> {
        match identifier {
            ARRAY_LIST => {
                let items = match args.first() {
                    Some(Value::Array(a)) => a.borrow().items().to_vec(),
                    Some(Value::Host(h)) => match h.borrow().kind() {
                        HostKind::List(items) => items.clone(),
                        HostKind::Set(set) => set.values().cloned().collect(),
                        _ => Vec::new(),
                    },
                    _ => Vec::new(),
                };
                self.new_host(ARRAY_LIST, HostKind::List(items))
            }
            HASH_MAP => self.new_host(HASH_MAP, HostKind::Map(BTreeMap::new())),
            HASH_SET => {
                let mut set = BTreeMap::new();
                if let Some(Value::Array(a)) = args.first() {
                    let room = self.string_room();
                    let mut used = 0usize;
                    for item in a.borrow().items() {
                        let key = self.set_key(item)?;
                        used = used.saturating_add(entry_bytes(&key));
                        if used > room {
                            return Err(self.memory_exceeded(used));
                        }
                        set.entry(key).or_insert_with(|| item.clone());
                    }
                }
                self.new_host(HASH_SET, HostKind::Set(set))
            }
            STRING_BUILDER => {
                let initial = match args.first() {
                    None | Some(Value::Number(_)) => String::new(),
                    Some(other) => self.display(other)?,
                };
                self.new_host(STRING_BUILDER, HostKind::StringBuilder(initial))
            }
            INTEGER | INSTANT => Err(self.type_error(format!("{identifier} is not a constructor"))),
            other => Err(self.type_error(format!("{other} is not available in this sandbox"))),
        }
    }

    /// `<identifier>.name(args)`.
    pub(super) fn host_static(&mut self, identifier: &str, name: &str, args: Vec<Value>) -> Eval<Value> {
        match (identifier, name) {
            (INTEGER, "parseInt" | "valueOf") => {
                let text = self.display(&arg(&args, 0))?;
                let radix = match arg(&args, 1) {
                    Value::Undefined => 10,
                    other => to_integer(to_number(&other)) as u32,
                };
                match parse_java_int(&text, radix) {
                    Some(n) => Ok(Value::Number(f64::from(n))),
                    None => Err(self.number_format_error(&text)),
                }
            }
            (INSTANT, "now") => {
                let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                self.new_string(now)
            }
            (INSTANT, "epochMillis") => Ok(Value::Number(Utc::now().timestamp_millis() as f64)),
            _ => Err(self.type_error(format!("{identifier}.{name} is not a function"))),
        }
    }

    fn number_format_error(&mut self, input: &str) -> Unwind {
        let entries = vec![
            (Rc::from("name"), Value::literal_str("NumberFormatException")),
            (
                Rc::from("message"),
                Value::literal_str(&format!("For input string: \"{input}\"")),
            ),
        ];
        match self.new_object(entries) {
            Ok(object) => Unwind::Throw(object),
            Err(unwind) => unwind,
        }
    }

    fn index_error(&mut self, index: i64, len: usize) -> Unwind {
        self.range_error(format!("Index {index} out of bounds for length {len}"))
    }

    /// `object.name(args)` on a host instance.
    pub(super) fn host_method(
        &mut self,
        object: &Rc<RefCell<HostObject>>,
        name: &str,
        args: Vec<Value>,
    ) -> Eval<Value> {
        let class = object.borrow().class_name();
        if !object.borrow().kind().has_method(name) {
            return Err(self.type_error(format!("{class}.{name} is not a function")));
        }
        match class {
            ARRAY_LIST => self.list_method(object, name, args),
            HASH_MAP => self.map_method(object, name, args),
            HASH_SET => self.set_method(object, name, args),
            _ => self.builder_method(object, name, args),
        }
    }

    fn list_method(
        &mut self,
        object: &Rc<RefCell<HostObject>>,
        name: &str,
        args: Vec<Value>,
    ) -> Eval<Value> {
        let len = match object.borrow().kind() {
            HostKind::List(items) => items.len(),
            _ => 0,
        };
        let index_arg = |i: usize| to_integer(to_number(&arg(&args, i)));
        let value = match name {
            "add" => {
                self.reserve(SLOT_BYTES)?;
                if args.len() >= 2 {
                    let index = index_arg(0);
                    if index < 0 || index as usize > len {
                        return Err(self.index_error(index, len));
                    }
                    let item = arg(&args, 1);
                    object.borrow_mut().mutate(|kind| {
                        if let HostKind::List(items) = kind {
                            items.insert(index as usize, item);
                        }
                    });
                    Value::Undefined
                } else {
                    let item = arg(&args, 0);
                    object.borrow_mut().mutate(|kind| {
                        if let HostKind::List(items) = kind {
                            items.push(item);
                        }
                    });
                    Value::Bool(true)
                }
            }
            "get" | "set" => {
                let index = index_arg(0);
                if index < 0 || index as usize >= len {
                    return Err(self.index_error(index, len));
                }
                let index = index as usize;
                if name == "get" {
                    match object.borrow().kind() {
                        HostKind::List(items) => items[index].clone(),
                        _ => Value::Undefined,
                    }
                } else {
                    let item = arg(&args, 1);
                    object.borrow_mut().mutate(|kind| match kind {
                        HostKind::List(items) => std::mem::replace(&mut items[index], item),
                        _ => Value::Undefined,
                    })
                }
            }
            "remove" => match arg(&args, 0) {
                Value::Number(n) => {
                    let index = to_integer(n);
                    if index < 0 || index as usize >= len {
                        return Err(self.index_error(index, len));
                    }
                    object.borrow_mut().mutate(|kind| match kind {
                        HostKind::List(items) => items.remove(index as usize),
                        _ => Value::Undefined,
                    })
                }
                needle => {
                    let removed = object.borrow_mut().mutate(|kind| match kind {
                        HostKind::List(items) => {
                            match items.iter().position(|v| strict_equals(v, &needle)) {
                                Some(i) => Some(items.remove(i)),
                                None => None,
                            }
                        }
                        _ => None,
                    });
                    Value::Bool(removed.is_some())
                }
            },
            "size" => Value::Number(len as f64),
            "isEmpty" => Value::Bool(len == 0),
            "clear" => {
                let released = object.borrow_mut().take_all();
                drop(released);
                Value::Undefined
            }
            "contains" | "indexOf" => {
                let needle = arg(&args, 0);
                let found = match object.borrow().kind() {
                    HostKind::List(items) => items.iter().position(|v| strict_equals(v, &needle)),
                    _ => None,
                };
                if name == "contains" {
                    Value::Bool(found.is_some())
                } else {
                    Value::Number(found.map(|i| i as f64).unwrap_or(-1.0))
                }
            }
            "toArray" => {
                let items = match object.borrow().kind() {
                    HostKind::List(items) => items.clone(),
                    _ => Vec::new(),
                };
                return self.new_array(items);
            }
            _ => return self.host_to_string(object),
        };
        Ok(value)
    }

    fn map_method(
        &mut self,
        object: &Rc<RefCell<HostObject>>,
        name: &str,
        args: Vec<Value>,
    ) -> Eval<Value> {
        let key: Rc<str> = Rc::from(self.display(&arg(&args, 0))?);
        let lookup = |object: &Rc<RefCell<HostObject>>, key: &str| match object.borrow().kind() {
            HostKind::Map(map) => map.get(key).cloned(),
            _ => None,
        };
        let value = match name {
            "put" => {
                if lookup(object, &key).is_none() {
                    self.reserve(entry_bytes(&key))?;
                }
                let item = arg(&args, 1);
                let previous = object.borrow_mut().mutate(|kind| match kind {
                    HostKind::Map(map) => map.insert(key, item),
                    _ => None,
                });
                previous.unwrap_or(Value::Null)
            }
            "get" => lookup(object, &key).unwrap_or(Value::Null),
            "getOrDefault" => lookup(object, &key).unwrap_or_else(|| arg(&args, 1)),
            "remove" => {
                let previous = object.borrow_mut().mutate(|kind| match kind {
                    HostKind::Map(map) => map.remove(&key),
                    _ => None,
                });
                previous.unwrap_or(Value::Null)
            }
            "containsKey" => Value::Bool(lookup(object, &key).is_some()),
            "size" | "isEmpty" => {
                let len = match object.borrow().kind() {
                    HostKind::Map(map) => map.len(),
                    _ => 0,
                };
                if name == "size" {
                    Value::Number(len as f64)
                } else {
                    Value::Bool(len == 0)
                }
            }
            "keySet" | "values" => {
                let items: Vec<Value> = match object.borrow().kind() {
                    HostKind::Map(map) if name == "keySet" => map
                        .keys()
                        .map(|k| Value::Str(super::value::JsStr::literal(k.clone())))
                        .collect(),
                    HostKind::Map(map) => map.values().cloned().collect(),
                    _ => Vec::new(),
                };
                return self.new_array(items);
            }
            "clear" => {
                let released = object.borrow_mut().take_all();
                drop(released);
                Value::Undefined
            }
            _ => return self.host_to_string(object),
        };
        Ok(value)
    }

    fn set_method(
        &mut self,
        object: &Rc<RefCell<HostObject>>,
        name: &str,
        args: Vec<Value>,
    ) -> Eval<Value> {
        let member = arg(&args, 0);
        let key = self.set_key(&member)?;
        let present = match object.borrow().kind() {
            HostKind::Set(set) => set.contains_key(&key),
            _ => false,
        };
        let value = match name {
            "add" => {
                if present {
                    Value::Bool(false)
                } else {
                    self.reserve(entry_bytes(&key))?;
                    object.borrow_mut().mutate(|kind| {
                        if let HostKind::Set(set) = kind {
                            set.insert(key, member);
                        }
                    });
                    Value::Bool(true)
                }
            }
            "contains" => Value::Bool(present),
            "remove" => {
                let removed = object.borrow_mut().mutate(|kind| match kind {
                    HostKind::Set(set) => set.remove(&key),
                    _ => None,
                });
                Value::Bool(removed.is_some())
            }
            "size" | "isEmpty" => {
                let len = match object.borrow().kind() {
                    HostKind::Set(set) => set.len(),
                    _ => 0,
                };
                if name == "size" {
                    Value::Number(len as f64)
                } else {
                    Value::Bool(len == 0)
                }
            }
            "clear" => {
                let released = object.borrow_mut().take_all();
                drop(released);
                Value::Undefined
            }
            "toArray" => {
                let items = match object.borrow().kind() {
                    HostKind::Set(set) => set.values().cloned().collect(),
                    _ => Vec::new(),
                };
                return self.new_array(items);
            }
            _ => return self.host_to_string(object),
        };
        Ok(value)
    }

    fn builder_method(
        &mut self,
        object: &Rc<RefCell<HostObject>>,
        name: &str,
        args: Vec<Value>,
    ) -> Eval<Value> {
        match name {
            "append" => {
                let text = self.display(&arg(&args, 0))?;
                self.reserve(text.len())?;
                object.borrow_mut().mutate(|kind| {
                    if let HostKind::StringBuilder(buf) = kind {
                        buf.push_str(&text);
                    }
                });
                Ok(Value::Host(object.clone()))
            }
            "reverse" => {
                object.borrow_mut().mutate(|kind| {
                    if let HostKind::StringBuilder(buf) = kind {
                        *buf = buf.chars().rev().collect();
                    }
                });
                Ok(Value::Host(object.clone()))
            }
            "length" => {
                let len = match object.borrow().kind() {
                    HostKind::StringBuilder(buf) => buf.chars().count(),
                    _ => 0,
                };
                Ok(Value::Number(len as f64))
            }
            _ => self.host_to_string(object),
        }
    }

    fn host_to_string(&mut self, object: &Rc<RefCell<HostObject>>) -> Eval<Value> {
        let text = self.display(&Value::Host(object.clone()))?;
        self.new_string(text)
    }

    /// Identity of a set member: equal keys mean equal members.
    fn set_key(&mut self, value: &Value) -> Eval<Rc<str>> {
        let text = self.display(value)?;
        Ok(Rc::from(format!("{}:{}", type_of(value), text)))
    }
}

/// `Integer.parseInt` semantics: optional sign, digits only, 32-bit range.
fn parse_java_int(text: &str, radix: u32) -> Option<i32> {
    if !(2..=36).contains(&radix) {
        return None;
    }
    let digits = text
        .strip_prefix('-')
        .or_else(|| text.strip_prefix('+'))
        .unwrap_or(text);
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    i32::from_str_radix(text.strip_prefix('+').unwrap_or(text), radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_tracks_contents() {
        assert_eq!(footprint(&HostKind::List(Vec::new())), HEADER_BYTES);
        assert_eq!(
            footprint(&HostKind::List(vec![Value::Null; 3])),
            HEADER_BYTES + 3 * SLOT_BYTES
        );
        assert_eq!(
            footprint(&HostKind::StringBuilder("abc".to_string())),
            HEADER_BYTES + string_bytes(3)
        );
    }

    #[test]
    fn host_object_refunds_on_drop() {
        let heap = HeapMeter::new();
        let mut list = HostObject::new(ARRAY_LIST, HostKind::List(Vec::new()), &heap);
        list.mutate(|kind| {
            if let HostKind::List(items) = kind {
                items.push(Value::Bool(true));
            }
        });
        assert_eq!(heap.live_bytes(), (HEADER_BYTES + SLOT_BYTES) as i64);
        let released = list.take_all();
        assert_eq!(released.len(), 1);
        drop(list);
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn java_int_parsing_is_strict() {
        assert_eq!(parse_java_int("42", 10), Some(42));
        assert_eq!(parse_java_int("-17", 10), Some(-17));
        assert_eq!(parse_java_int("+5", 10), Some(5));
        assert_eq!(parse_java_int("ff", 16), Some(255));
        assert_eq!(parse_java_int(" 42", 10), None);
        assert_eq!(parse_java_int("12abc", 10), None);
        assert_eq!(parse_java_int("2147483648", 10), None);
        assert_eq!(parse_java_int("", 10), None);
    }

    #[test]
    fn provided_classes_and_statics() {
        assert!(is_provided_class(ARRAY_LIST));
        assert!(!is_provided_class("host.util.LinkedList"));
        assert!(has_static_method(INTEGER, "parseInt"));
        assert!(!has_static_method(ARRAY_LIST, "parseInt"));
        assert!(matches!(
            static_field(INTEGER, "MAX_VALUE"),
            Some(Value::Number(n)) if n == 2_147_483_647.0
        ));
    }

    #[test]
    fn map_only_exposes_map_methods() {
        let kind = HostKind::Map(BTreeMap::new());
        assert!(kind.has_method("put"));
        assert!(!kind.has_method("append"));
    }
}
