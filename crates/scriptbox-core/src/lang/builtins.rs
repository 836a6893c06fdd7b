//! Global functions, intrinsic objects and the native methods of strings,
//! arrays and numbers.

use std::cell::RefCell;
use std::rc::Rc;

use super::interp::{ErrorName, Eval, Interpreter, ERROR_PREVIEW_LEN};
use super::ops::{
    display_summary, number_to_string, relative_index, strict_equals, string_to_number,
    to_boolean, to_integer, to_number,
};
use super::value::{string_bytes, ArrayData, JsStr, Value, SLOT_BYTES, STRING_OVERHEAD_BYTES};
use crate::sandbox::convert::{from_portable, to_portable_within, OutputTooLarge};
use crate::value::PortableValue;

/// Natively implemented functions reachable from script globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    ConsoleLog,
    JsonStringify,
    JsonParse,
    MathAbs,
    MathFloor,
    MathCeil,
    MathRound,
    MathMin,
    MathMax,
    MathPow,
    MathSqrt,
    MathTrunc,
    MathSign,
    StringFn,
    NumberFn,
    BooleanFn,
    ParseInt,
    ParseFloat,
    IsNaN,
    IsFinite,
    ObjectKeys,
    ArrayIsArray,
    /// `Error(message)` and its typed variants; callable with or without `new`.
    ErrorFn(ErrorName),
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::ConsoleLog => "log",
            Builtin::JsonStringify => "stringify",
            Builtin::JsonParse => "parse",
            Builtin::MathAbs => "abs",
            Builtin::MathFloor => "floor",
            Builtin::MathCeil => "ceil",
            Builtin::MathRound => "round",
            Builtin::MathMin => "min",
            Builtin::MathMax => "max",
            Builtin::MathPow => "pow",
            Builtin::MathSqrt => "sqrt",
            Builtin::MathTrunc => "trunc",
            Builtin::MathSign => "sign",
            Builtin::StringFn => "String",
            Builtin::NumberFn => "Number",
            Builtin::BooleanFn => "Boolean",
            Builtin::ParseInt => "parseInt",
            Builtin::ParseFloat => "parseFloat",
            Builtin::IsNaN => "isNaN",
            Builtin::IsFinite => "isFinite",
            Builtin::ObjectKeys => "keys",
            Builtin::ArrayIsArray => "isArray",
            Builtin::ErrorFn(name) => name.as_str(),
        }
    }
}

const STRING_METHODS: &[&str] = &[
    "charAt",
    "charCodeAt",
    "indexOf",
    "includes",
    "startsWith",
    "endsWith",
    "slice",
    "substring",
    "toUpperCase",
    "toLowerCase",
    "trim",
    "split",
    "replace",
    "repeat",
    "toString",
];

const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "slice", "concat", "join", "indexOf", "includes",
    "reverse", "forEach", "map", "filter", "reduce", "some", "every", "sort", "toString",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString"];

pub fn is_string_method(name: &str) -> bool {
    STRING_METHODS.contains(&name)
}

pub fn is_array_method(name: &str) -> bool {
    ARRAY_METHODS.contains(&name)
}

pub fn is_number_method(name: &str) -> bool {
    NUMBER_METHODS.contains(&name)
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

impl Interpreter<'_> {
    /// Bind the language globals every execution starts with.
    pub(super) fn install_intrinsics(&mut self) {
        let math = self.intrinsic_object(vec![
            ("abs", Value::Native(Builtin::MathAbs)),
            ("floor", Value::Native(Builtin::MathFloor)),
            ("ceil", Value::Native(Builtin::MathCeil)),
            ("round", Value::Native(Builtin::MathRound)),
            ("min", Value::Native(Builtin::MathMin)),
            ("max", Value::Native(Builtin::MathMax)),
            ("pow", Value::Native(Builtin::MathPow)),
            ("sqrt", Value::Native(Builtin::MathSqrt)),
            ("trunc", Value::Native(Builtin::MathTrunc)),
            ("sign", Value::Native(Builtin::MathSign)),
            ("PI", Value::Number(std::f64::consts::PI)),
            ("E", Value::Number(std::f64::consts::E)),
        ]);
        let object = self.intrinsic_object(vec![("keys", Value::Native(Builtin::ObjectKeys))]);
        let array = self.intrinsic_object(vec![("isArray", Value::Native(Builtin::ArrayIsArray))]);

        let globals = [
            ("Math", math),
            ("Object", object),
            ("Array", array),
            ("String", Value::Native(Builtin::StringFn)),
            ("Number", Value::Native(Builtin::NumberFn)),
            ("Boolean", Value::Native(Builtin::BooleanFn)),
            ("parseInt", Value::Native(Builtin::ParseInt)),
            ("parseFloat", Value::Native(Builtin::ParseFloat)),
            ("isNaN", Value::Native(Builtin::IsNaN)),
            ("isFinite", Value::Native(Builtin::IsFinite)),
            ("Error", Value::Native(Builtin::ErrorFn(ErrorName::Error))),
            ("TypeError", Value::Native(Builtin::ErrorFn(ErrorName::TypeError))),
            ("RangeError", Value::Native(Builtin::ErrorFn(ErrorName::RangeError))),
            ("NaN", Value::Number(f64::NAN)),
            ("Infinity", Value::Number(f64::INFINITY)),
        ];
        for (name, value) in globals {
            self.define_global(name, value, false);
        }
    }

    /// The `console` object; lines go to this interpreter's console buffer.
    pub fn console_object(&mut self) -> Value {
        self.intrinsic_object(vec![("log", Value::Native(Builtin::ConsoleLog))])
    }

    /// The `JSON` object.
    pub fn json_object(&mut self) -> Value {
        self.intrinsic_object(vec![
            ("stringify", Value::Native(Builtin::JsonStringify)),
            ("parse", Value::Native(Builtin::JsonParse)),
        ])
    }

    pub(super) fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Eval<Value> {
        let num = |i: usize| to_number(&arg(&args, i));
        let value = match builtin {
            Builtin::ConsoleLog => return self.console_log(&args),
            Builtin::JsonStringify => return self.json_stringify(&args),
            Builtin::JsonParse => return self.json_parse(&args),
            Builtin::MathAbs => Value::Number(num(0).abs()),
            Builtin::MathFloor => Value::Number(num(0).floor()),
            Builtin::MathCeil => Value::Number(num(0).ceil()),
            // Halves round toward +Infinity.
            Builtin::MathRound => Value::Number((num(0) + 0.5).floor()),
            Builtin::MathMin => Value::Number(args.iter().map(to_number).fold(
                f64::INFINITY,
                |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.min(n) },
            )),
            Builtin::MathMax => Value::Number(args.iter().map(to_number).fold(
                f64::NEG_INFINITY,
                |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(n) },
            )),
            Builtin::MathPow => Value::Number(num(0).powf(num(1))),
            Builtin::MathSqrt => Value::Number(num(0).sqrt()),
            Builtin::MathTrunc => Value::Number(num(0).trunc()),
            Builtin::MathSign => {
                let n = num(0);
                Value::Number(if n.is_nan() || n == 0.0 { n } else { n.signum() })
            }
            Builtin::StringFn => {
                return match args.first() {
                    Some(Value::Str(s)) => Ok(Value::Str(s.clone())),
                    Some(other) => {
                        let text = self.display(other)?;
                        self.new_string(text)
                    }
                    None => Ok(Value::literal_str("")),
                }
            }
            Builtin::NumberFn => Value::Number(if args.is_empty() { 0.0 } else { num(0) }),
            Builtin::BooleanFn => Value::Bool(to_boolean(&arg(&args, 0))),
            Builtin::ParseInt => {
                let radix = match arg(&args, 1) {
                    Value::Undefined => 0,
                    other => to_integer(to_number(&other)) as u32,
                };
                Value::Number(parse_int(&self.display(&arg(&args, 0))?, radix))
            }
            Builtin::ParseFloat => {
                Value::Number(parse_float(&self.display(&arg(&args, 0))?))
            }
            Builtin::IsNaN => Value::Bool(num(0).is_nan()),
            Builtin::IsFinite => Value::Bool(num(0).is_finite()),
            Builtin::ObjectKeys => return self.object_keys(&arg(&args, 0)),
            Builtin::ArrayIsArray => Value::Bool(matches!(arg(&args, 0), Value::Array(_))),
            Builtin::ErrorFn(name) => {
                let message = match arg(&args, 0) {
                    Value::Undefined => Value::literal_str(""),
                    Value::Str(s) => Value::Str(s),
                    other => {
                        let text = self.display(&other)?;
                        self.new_string(text)?
                    }
                };
                return self.new_object(vec![
                    (Rc::from("name"), Value::literal_str(name.as_str())),
                    (Rc::from("message"), message),
                ]);
            }
        };
        Ok(value)
    }

    fn console_log(&mut self, args: &[Value]) -> Eval<Value> {
        let room = self.string_room();
        let mut line = String::new();
        for (i, value) in args.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            let piece = self.display_within(value, room.saturating_sub(line.len()))?;
            line.push_str(&piece);
        }
        // The buffered copy stays charged for the rest of the execution.
        self.reserve(string_bytes(line.len()))?;
        self.heap.charge(string_bytes(line.len()));
        self.console.push(line.clone());
        self.new_string(line)
    }

    fn json_stringify(&mut self, args: &[Value]) -> Eval<Value> {
        let subject = arg(args, 0);
        if matches!(
            subject,
            Value::Undefined | Value::Function(_) | Value::Native(_) | Value::Method(_)
        ) {
            return Ok(Value::Undefined);
        }
        let room = self.string_room();
        let portable = match to_portable_within(&subject, room) {
            Ok(portable) => portable,
            Err(OutputTooLarge) => return Err(self.memory_exceeded(room.saturating_add(1))),
        };
        let pretty = matches!(arg(args, 2), Value::Number(n) if n >= 1.0)
            || matches!(arg(args, 2), Value::Str(ref s) if !s.as_str().is_empty());
        let text = if pretty {
            serde_json::to_string_pretty(&portable)
        } else {
            serde_json::to_string(&portable)
        };
        match text {
            Ok(text) => self.new_string(text),
            Err(err) => Err(self.type_error(format!("JSON.stringify: {err}"))),
        }
    }

    fn json_parse(&mut self, args: &[Value]) -> Eval<Value> {
        let text = self.display(&arg(args, 0))?;
        // Parsed values cost at least as much as their text.
        self.reserve(text.len())?;
        match serde_json::from_str::<PortableValue>(&text) {
            Ok(portable) => from_portable(self, &portable),
            Err(err) => Err(self.syntax_error(format!("JSON.parse: {err}"))),
        }
    }

    fn object_keys(&mut self, subject: &Value) -> Eval<Value> {
        let keys: Vec<Value> = match subject {
            Value::Object(o) => o
                .borrow()
                .keys()
                .map(|k| Value::Str(JsStr::literal(k.clone())))
                .collect(),
            Value::Array(a) => (0..a.borrow().len())
                .map(|i| Value::literal_str(&i.to_string()))
                .collect(),
            Value::Undefined | Value::Null => {
                return Err(self.type_error("Cannot convert undefined or null to object"))
            }
            _ => Vec::new(),
        };
        self.new_array(keys)
    }

    // -- strings -----------------------------------------------------------

    pub(super) fn string_method(&mut self, s: &JsStr, name: &str, args: Vec<Value>) -> Eval<Value> {
        let text = s.as_str();
        let value = match name {
            "charAt" => {
                let index = to_integer(to_number(&arg(&args, 0)));
                let found = usize::try_from(index).ok().and_then(|i| text.chars().nth(i));
                return match found {
                    Some(c) => self.new_string(c.to_string()),
                    None => Ok(Value::literal_str("")),
                };
            }
            "charCodeAt" => {
                let index = to_integer(to_number(&arg(&args, 0)));
                let found = usize::try_from(index).ok().and_then(|i| text.chars().nth(i));
                Value::Number(found.map(|c| f64::from(u32::from(c))).unwrap_or(f64::NAN))
            }
            "indexOf" => {
                let from = to_integer(to_number(&arg(&args, 1))).max(0) as usize;
                Value::Number(char_index_of(text, &self.display(&arg(&args, 0))?, from))
            }
            "includes" => Value::Bool(text.contains(self.display(&arg(&args, 0))?.as_str())),
            "startsWith" => Value::Bool(text.starts_with(self.display(&arg(&args, 0))?.as_str())),
            "endsWith" => Value::Bool(text.ends_with(self.display(&arg(&args, 0))?.as_str())),
            "slice" => {
                let chars: Vec<char> = text.chars().collect();
                let start = relative_index(&arg(&args, 0), chars.len(), 0);
                let end = relative_index(&arg(&args, 1), chars.len(), chars.len());
                let out: String = chars[start..end.max(start)].iter().collect();
                return self.new_string(out);
            }
            "substring" => {
                let chars: Vec<char> = text.chars().collect();
                let clamp = |v: Value, default: usize| -> usize {
                    if v.is_undefined() {
                        return default;
                    }
                    to_integer(to_number(&v)).clamp(0, chars.len() as i64) as usize
                };
                let a = clamp(arg(&args, 0), 0);
                let b = clamp(arg(&args, 1), chars.len());
                let (start, end) = if a <= b { (a, b) } else { (b, a) };
                let out: String = chars[start..end].iter().collect();
                return self.new_string(out);
            }
            "toUpperCase" => return self.new_string(text.to_uppercase()),
            "toLowerCase" => return self.new_string(text.to_lowercase()),
            "trim" => return self.new_string(text.trim().to_string()),
            "split" => return self.split_string(text, &arg(&args, 0)),
            "replace" => {
                let pattern = self.display(&arg(&args, 0))?;
                let replacement = self.display(&arg(&args, 1))?;
                return self.new_string(text.replacen(pattern.as_str(), &replacement, 1));
            }
            "repeat" => {
                let count = to_number(&arg(&args, 0));
                if count < 0.0 || count.is_infinite() {
                    return Err(self.range_error(format!("Invalid count value: {}", number_to_string(count))));
                }
                let count = to_integer(count) as usize;
                let bytes = text
                    .len()
                    .checked_mul(count)
                    .and_then(|len| len.checked_add(STRING_OVERHEAD_BYTES));
                match bytes {
                    Some(bytes) => self.reserve(bytes)?,
                    None => return Err(self.memory_exceeded(usize::MAX)),
                }
                return self.new_string(text.repeat(count));
            }
            "toString" => Value::Str(s.clone()),
            _ => return Err(self.type_error(format!("{name} is not a function"))),
        };
        Ok(value)
    }

    fn split_string(&mut self, text: &str, separator: &Value) -> Eval<Value> {
        let pieces: Vec<String> = match separator {
            Value::Undefined => vec![text.to_string()],
            other => {
                let sep = self.display(other)?;
                if sep.is_empty() {
                    text.chars().map(String::from).collect()
                } else {
                    text.split(sep.as_str()).map(String::from).collect()
                }
            }
        };
        let mut items = Vec::with_capacity(pieces.len());
        for piece in pieces {
            items.push(self.new_string(piece)?);
        }
        self.new_array(items)
    }

    // -- numbers -----------------------------------------------------------

    pub(super) fn number_method(&mut self, n: f64, name: &str, args: Vec<Value>) -> Eval<Value> {
        match name {
            "toFixed" => {
                let digits = to_integer(to_number(&arg(&args, 0)));
                if !(0..=100).contains(&digits) {
                    return Err(self.range_error("toFixed() digits argument must be between 0 and 100"));
                }
                let text = if n.is_finite() {
                    format!("{:.*}", digits as usize, n)
                } else {
                    number_to_string(n)
                };
                self.new_string(text)
            }
            "toString" => {
                let radix = match arg(&args, 0) {
                    Value::Undefined => 10,
                    other => to_integer(to_number(&other)),
                };
                if !(2..=36).contains(&radix) {
                    return Err(self.range_error("toString() radix must be between 2 and 36"));
                }
                let text = if radix == 10 || n.fract() != 0.0 || !n.is_finite() {
                    number_to_string(n)
                } else {
                    integer_to_radix(n as i64, radix as u32)
                };
                self.new_string(text)
            }
            _ => Err(self.type_error(format!("{name} is not a function"))),
        }
    }

    // -- arrays ------------------------------------------------------------

    pub(super) fn array_method(
        &mut self,
        array: &Rc<RefCell<ArrayData>>,
        name: &str,
        args: Vec<Value>,
    ) -> Eval<Value> {
        let mutating = matches!(name, "push" | "pop" | "shift" | "unshift" | "reverse" | "sort");
        if mutating && array.borrow().is_frozen() {
            return Err(self.type_error(format!("Cannot {name} a read-only array")));
        }
        let len = array.borrow().len();
        let value = match name {
            "push" => {
                self.reserve(args.len() * SLOT_BYTES)?;
                let new_len = array.borrow_mut().mutate(|items| {
                    items.extend(args);
                    items.len()
                });
                Value::Number(new_len as f64)
            }
            "pop" => array.borrow_mut().mutate(Vec::pop).unwrap_or_default(),
            "shift" => array.borrow_mut().mutate(|items| {
                if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                }
            }),
            "unshift" => {
                self.reserve(args.len() * SLOT_BYTES)?;
                let new_len = array.borrow_mut().mutate(|items| {
                    items.splice(0..0, args);
                    items.len()
                });
                Value::Number(new_len as f64)
            }
            "slice" => {
                let start = relative_index(&arg(&args, 0), len, 0);
                let end = relative_index(&arg(&args, 1), len, len);
                let items = array.borrow().items()[start..end.max(start)].to_vec();
                return self.new_array(items);
            }
            "concat" => {
                let mut items = array.borrow().items().to_vec();
                for extra in &args {
                    match extra {
                        Value::Array(other) => items.extend_from_slice(other.borrow().items()),
                        other => items.push(other.clone()),
                    }
                }
                return self.new_array(items);
            }
            "join" | "toString" => {
                let separator = match arg(&args, 0) {
                    Value::Undefined => ",".to_string(),
                    other if name == "join" => self.display(&other)?,
                    _ => ",".to_string(),
                };
                let items = array.borrow().items().to_vec();
                let joined = self.join_items(&items, &separator)?;
                return self.new_string(joined);
            }
            "indexOf" => {
                let needle = arg(&args, 0);
                let found = array
                    .borrow()
                    .items()
                    .iter()
                    .position(|item| strict_equals(item, &needle));
                Value::Number(found.map(|i| i as f64).unwrap_or(-1.0))
            }
            "includes" => {
                let needle = arg(&args, 0);
                let nan = matches!(needle, Value::Number(n) if n.is_nan());
                let found = array.borrow().items().iter().any(|item| {
                    strict_equals(item, &needle) || (nan && matches!(item, Value::Number(n) if n.is_nan()))
                });
                Value::Bool(found)
            }
            "reverse" => {
                array.borrow_mut().mutate(|items| items.reverse());
                Value::Array(array.clone())
            }
            "forEach" | "map" | "filter" | "some" | "every" => {
                return self.array_iteration(array, name, &arg(&args, 0))
            }
            "reduce" => return self.array_reduce(array, &args),
            "sort" => {
                let comparator = arg(&args, 0);
                if !comparator.is_undefined() && !comparator.is_callable() {
                    return Err(self.type_error("The comparison function must be either a function or undefined"));
                }
                let items = array.borrow().items().to_vec();
                let (defined, undefined): (Vec<Value>, Vec<Value>) =
                    items.into_iter().partition(|v| !v.is_undefined());
                let mut sorted = self.merge_sort(defined, &comparator)?;
                sorted.extend(undefined);
                let replaced = array
                    .borrow_mut()
                    .mutate(|items| std::mem::replace(items, sorted));
                drop(replaced);
                Value::Array(array.clone())
            }
            _ => return Err(self.type_error(format!("{name} is not a function"))),
        };
        Ok(value)
    }

    /// `items` rendered and joined with `separator`, `null` and `undefined`
    /// as empty text. Fails with `MemoryExceeded` as soon as the joined text
    /// outgrows the memory budget, before it is built.
    fn join_items(&mut self, items: &[Value], separator: &str) -> Eval<String> {
        let room = self.string_room();
        let mut joined = String::new();
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                let len = joined.len().saturating_add(separator.len());
                if len > room {
                    return Err(self.memory_exceeded(len));
                }
                joined.push_str(separator);
            }
            if !item.is_nullish() {
                let piece = self.display_within(item, room - joined.len())?;
                joined.push_str(&piece);
            }
        }
        Ok(joined)
    }

    fn require_callable(&mut self, callback: &Value) -> Eval<()> {
        if callback.is_callable() {
            Ok(())
        } else {
            let shown = display_summary(callback, ERROR_PREVIEW_LEN);
            Err(self.type_error(format!("{shown} is not a function")))
        }
    }

    fn array_iteration(
        &mut self,
        array: &Rc<RefCell<ArrayData>>,
        name: &str,
        callback: &Value,
    ) -> Eval<Value> {
        self.require_callable(callback)?;
        // Iterate a snapshot; the callback may mutate the array.
        let items = array.borrow().items().to_vec();
        let mut mapped = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let args = vec![item.clone(), Value::Number(i as f64), Value::Array(array.clone())];
            let result = self.call_value(callback, Value::Undefined, args)?;
            match name {
                "map" => mapped.push(result),
                "filter" if to_boolean(&result) => mapped.push(item),
                "some" if to_boolean(&result) => return Ok(Value::Bool(true)),
                "every" if !to_boolean(&result) => return Ok(Value::Bool(false)),
                _ => {}
            }
        }
        match name {
            "map" | "filter" => self.new_array(mapped),
            "some" => Ok(Value::Bool(false)),
            "every" => Ok(Value::Bool(true)),
            _ => Ok(Value::Undefined),
        }
    }

    fn array_reduce(&mut self, array: &Rc<RefCell<ArrayData>>, args: &[Value]) -> Eval<Value> {
        let callback = arg(args, 0);
        self.require_callable(&callback)?;
        let items = array.borrow().items().to_vec();
        let mut iter = items.into_iter().enumerate();
        let mut acc = match args.get(1) {
            Some(initial) => initial.clone(),
            None => match iter.next() {
                Some((_, first)) => first,
                None => {
                    return Err(self.type_error("Reduce of empty array with no initial value"))
                }
            },
        };
        for (i, item) in iter {
            let call_args = vec![acc, item, Value::Number(i as f64), Value::Array(array.clone())];
            acc = self.call_value(&callback, Value::Undefined, call_args)?;
        }
        Ok(acc)
    }

    /// Stable merge sort; comparators may call back into script code, so
    /// the standard library sort (which may panic on inconsistent orderings)
    /// is not used.
    fn merge_sort(&mut self, items: Vec<Value>, comparator: &Value) -> Eval<Vec<Value>> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let mut left = items;
        let right = left.split_off(left.len() / 2);
        let left = self.merge_sort(left, comparator)?;
        let right = self.merge_sort(right, comparator)?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        loop {
            let take_right = match (left.peek(), right.peek()) {
                (Some(a), Some(b)) => {
                    let (a, b) = (a.clone(), b.clone());
                    self.sorts_after(&a, &b, comparator)?
                }
                _ => break,
            };
            let next = if take_right { right.next() } else { left.next() };
            merged.extend(next);
        }
        merged.extend(left);
        merged.extend(right);
        Ok(merged)
    }

    fn sorts_after(&mut self, a: &Value, b: &Value, comparator: &Value) -> Eval<bool> {
        self.monitor.tick()?;
        if comparator.is_undefined() {
            return Ok(self.display(a)? > self.display(b)?);
        }
        let order = self.call_value(comparator, Value::Undefined, vec![a.clone(), b.clone()])?;
        Ok(to_number(&order) > 0.0)
    }
}

/// Character index of `needle` in `hay` at or after character `from`, or -1.
fn char_index_of(hay: &str, needle: &str, from: usize) -> f64 {
    let byte_from = match hay.char_indices().nth(from) {
        Some((b, _)) => b,
        None if needle.is_empty() => return hay.chars().count() as f64,
        None => return -1.0,
    };
    match hay[byte_from..].find(needle) {
        Some(offset) => hay[..byte_from + offset].chars().count() as f64,
        None => -1.0,
    }
}

/// `parseInt`: the longest valid digit prefix in `radix` (0 means auto).
pub fn parse_int(text: &str, radix: u32) -> f64 {
    let t = text.trim_start();
    let (negative, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let (radix, t) = match radix {
        0 | 16 if t.starts_with("0x") || t.starts_with("0X") => (16, &t[2..]),
        0 => (10, t),
        r if (2..=36).contains(&r) => (r, t),
        _ => return f64::NAN,
    };
    let digits: String = t.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d));
    if negative {
        -value
    } else {
        value
    }
}

/// `parseFloat`: the longest prefix that reads as a decimal literal.
pub fn parse_float(text: &str) -> f64 {
    let t = text.trim_start();
    for (prefix, value) in [
        ("Infinity", f64::INFINITY),
        ("+Infinity", f64::INFINITY),
        ("-Infinity", f64::NEG_INFINITY),
    ] {
        if t.starts_with(prefix) {
            return value;
        }
    }
    let bytes = t.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || &t[digits_start..end] == "." {
        return f64::NAN;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    string_to_number(&t[..end])
}

fn integer_to_radix(mut n: i64, radix: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let negative = n < 0;
    let mut digits = Vec::new();
    while n != 0 {
        let d = (n % i64::from(radix)).unsigned_abs() as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('?'));
        n /= i64::from(radix);
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}
