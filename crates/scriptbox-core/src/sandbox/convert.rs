//! Conversion between interpreter values and [`PortableValue`].
//!
//! `to_portable` is total: cycles, functions, host objects and anything else
//! reduce to some portable value, so a script result can always be reported.
//! [`to_portable_within`] additionally caps the size of the copy, since a
//! small graph of shared values can expand into a very large tree.

use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use crate::lang::host::HostKind;
use crate::lang::interp::{Eval, Interpreter};
use crate::lang::ops::to_display_string;
use crate::lang::Value;
use crate::value::PortableValue;

/// Marker substituted for a value that refers back to one of its ancestors.
pub const CIRCULAR: &str = "[Circular]";

/// Values nested deeper than this are cut off with the circular marker.
const MAX_DEPTH: usize = 64;
/// Bytes counted per converted node, on top of its text.
const NODE_BYTES: usize = 16;

/// The converted copy would take more bytes than allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTooLarge;

/// Convert a script value into a portable value.
pub fn to_portable(value: &Value) -> PortableValue {
    to_portable_within(value, usize::MAX).unwrap_or(PortableValue::Null)
}

/// Convert a script value, giving up once the copy passes `max_bytes`.
pub fn to_portable_within(value: &Value, max_bytes: usize) -> Result<PortableValue, OutputTooLarge> {
    let mut converter = Converter {
        visiting: HashSet::new(),
        remaining: max_bytes,
    };
    converter.convert(value, 0)
}

struct Converter {
    visiting: HashSet<usize>,
    remaining: usize,
}

/// Contents copied out of a composite so no borrow is held while converting
/// its members.
enum Snapshot {
    Items(Vec<Value>),
    Entries(Vec<(Rc<str>, Value)>),
    Text(String),
}

impl Converter {
    fn spend(&mut self, bytes: usize) -> Result<(), OutputTooLarge> {
        let bytes = bytes.saturating_add(NODE_BYTES);
        if bytes > self.remaining {
            return Err(OutputTooLarge);
        }
        self.remaining -= bytes;
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<PortableValue, OutputTooLarge> {
        self.spend(text.len())?;
        Ok(PortableValue::String(text.to_string()))
    }

    fn convert(&mut self, value: &Value, depth: usize) -> Result<PortableValue, OutputTooLarge> {
        let snapshot = match value {
            Value::Undefined | Value::Null => {
                self.spend(0)?;
                return Ok(PortableValue::Null);
            }
            Value::Bool(b) => {
                self.spend(0)?;
                return Ok(PortableValue::Bool(*b));
            }
            Value::Number(n) => {
                self.spend(0)?;
                return Ok(PortableValue::Number(*n));
            }
            Value::Str(s) => return self.text(s.as_str()),
            Value::Array(a) => {
                let id = Rc::as_ptr(a) as *const () as usize;
                a.try_borrow()
                    .ok()
                    .map(|data| (id, Snapshot::Items(data.items().to_vec())))
            }
            Value::Object(o) => {
                let id = Rc::as_ptr(o) as *const () as usize;
                o.try_borrow().ok().map(|data| {
                    let entries = data
                        .entries()
                        .iter()
                        .filter(|(_, v)| !v.is_undefined())
                        .cloned()
                        .collect();
                    (id, Snapshot::Entries(entries))
                })
            }
            Value::Host(h) => {
                let id = Rc::as_ptr(h) as *const () as usize;
                h.try_borrow().ok().map(|object| {
                    let snapshot = match object.kind() {
                        HostKind::List(items) => Snapshot::Items(items.clone()),
                        HostKind::Set(set) => Snapshot::Items(set.values().cloned().collect()),
                        HostKind::Map(map) => Snapshot::Entries(
                            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                        ),
                        HostKind::StringBuilder(text) => Snapshot::Text(text.clone()),
                    };
                    (id, snapshot)
                })
            }
            Value::Function(_)
            | Value::Native(_)
            | Value::Method(_)
            | Value::HostClass(_)
            | Value::Namespace(_) => return self.text(&to_display_string(value)),
        };
        // A failed borrow means the value is being mutated further up.
        let Some((id, snapshot)) = snapshot else {
            return self.text(CIRCULAR);
        };
        if depth >= MAX_DEPTH || !self.visiting.insert(id) {
            return self.text(CIRCULAR);
        }
        let converted = self.convert_snapshot(snapshot, depth);
        self.visiting.remove(&id);
        converted
    }

    fn convert_snapshot(&mut self, snapshot: Snapshot, depth: usize) -> Result<PortableValue, OutputTooLarge> {
        self.spend(0)?;
        match snapshot {
            Snapshot::Items(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in &items {
                    list.push(self.convert(item, depth + 1)?);
                }
                Ok(PortableValue::List(list))
            }
            Snapshot::Entries(entries) => {
                let mut map = BTreeMap::new();
                for (key, item) in &entries {
                    self.spend(key.len())?;
                    map.insert(key.to_string(), self.convert(item, depth + 1)?);
                }
                Ok(PortableValue::Map(map))
            }
            Snapshot::Text(text) => self.text(&text),
        }
    }
}

/// Materialize a portable value inside `interp`, charging its heap.
pub fn from_portable(interp: &mut Interpreter<'_>, value: &PortableValue) -> Eval<Value> {
    match value {
        PortableValue::Null => Ok(Value::Null),
        PortableValue::Bool(b) => Ok(Value::Bool(*b)),
        PortableValue::Number(n) => Ok(Value::Number(*n)),
        PortableValue::String(s) => interp.new_string(s.clone()),
        PortableValue::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(from_portable(interp, item)?);
            }
            interp.new_array(values)
        }
        PortableValue::Map(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (key, item) in map {
                entries.push((Rc::from(key.as_str()), from_portable(interp, item)?));
            }
            interp.new_object(entries)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::heap::HeapMeter;
    use crate::lang::value::{ArrayData, JsStr, ObjectData};
    use std::cell::RefCell;

    #[test]
    fn test_primitives_convert_directly() {
        assert_eq!(to_portable(&Value::Undefined), PortableValue::Null);
        assert_eq!(to_portable(&Value::Number(2.5)), PortableValue::Number(2.5));
        assert_eq!(to_portable(&Value::literal_str("x")), PortableValue::from("x"));
    }

    #[test]
    fn test_cycles_become_markers() {
        let heap = HeapMeter::new();
        let array = Rc::new(RefCell::new(ArrayData::new(Vec::new(), &heap)));
        let value = Value::Array(array.clone());
        array
            .borrow_mut()
            .mutate(|items| items.push(value.clone()));

        assert_eq!(
            to_portable(&value),
            PortableValue::List(vec![PortableValue::from(CIRCULAR)])
        );
        array.borrow_mut().take_all();
    }

    #[test]
    fn test_shared_but_acyclic_values_are_repeated() {
        let heap = HeapMeter::new();
        let inner = Value::Array(Rc::new(RefCell::new(ArrayData::new(
            vec![Value::Number(1.0)],
            &heap,
        ))));
        let outer = Value::Array(Rc::new(RefCell::new(ArrayData::new(
            vec![inner.clone(), inner],
            &heap,
        ))));
        let one = PortableValue::List(vec![PortableValue::Number(1.0)]);
        assert_eq!(to_portable(&outer), PortableValue::List(vec![one.clone(), one]));
    }

    #[test]
    fn test_objects_skip_undefined_members() {
        let heap = HeapMeter::new();
        let mut data = ObjectData::new(&heap);
        data.set(Rc::from("a"), Value::Number(1.0));
        data.set(Rc::from("b"), Value::Undefined);
        let converted = to_portable(&Value::Object(Rc::new(RefCell::new(data))));
        let map = converted.as_map().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["a"], PortableValue::Number(1.0));
    }

    #[test]
    fn test_functions_fall_back_to_strings() {
        let converted = to_portable(&Value::HostClass(Rc::from("host.util.ArrayList")));
        assert_eq!(converted, PortableValue::from("[class host.util.ArrayList]"));
    }

    #[test]
    fn test_bounded_conversion_stops_on_shared_expansion() {
        let heap = HeapMeter::new();
        let big = Value::Str(JsStr::charged("x".repeat(10_000), &heap));
        let array = Value::Array(Rc::new(RefCell::new(ArrayData::new(vec![big; 1_000], &heap))));
        assert_eq!(to_portable_within(&array, 100_000), Err(OutputTooLarge));
        let converted = to_portable_within(&array, 20_000_000).unwrap();
        assert_eq!(converted.as_list().map(|items| items.len()), Some(1_000));
    }
}
