//! Coercions, equality and number formatting.

use std::rc::Rc;

use super::host::HostKind;
use super::value::Value;

/// Composite values nested deeper than this render as an empty string.
const DISPLAY_DEPTH_LIMIT: usize = 32;

pub fn to_boolean(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::Str(s) => !s.as_str().is_empty(),
        _ => true,
    }
}

pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => *n,
        Value::Str(s) => string_to_number(s.as_str()),
        Value::Array(_) => display_bounded(value, NUMERIC_TEXT_LIMIT)
            .map(|text| string_to_number(&text))
            .unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Numeric value of a string the way `Number(s)` reads it.
pub fn string_to_number(text: &str) -> f64 {
    let t = text.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Rust accepts spellings such as "inf" and "nan" that scripts must not.
    if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

/// Canonical text of a number: integral values print without a fraction.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let magnitude = n.abs();
    if !(1e-6..1e21).contains(&magnitude) {
        // Exponent form with an explicit sign: 1e+21, 1.5e-7.
        let text = format!("{n:e}");
        return match text.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => text,
        };
    }
    if n.fract() == 0.0 {
        return format!("{n:.0}");
    }
    format!("{n}")
}

/// Longest array text `to_number` parses; anything longer is not a number.
const NUMERIC_TEXT_LIMIT: usize = 512;
/// Longest text a composite value contributes as a property key.
const PROPERTY_KEY_LIMIT: usize = 64 * 1024;

/// Rendering stopped because the text outgrew its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextTooLong;

/// A string buffer that refuses to grow past `max_len` bytes. On overflow it
/// keeps the prefix that fit.
struct BoundedText {
    buf: String,
    max_len: usize,
}

impl BoundedText {
    fn new(max_len: usize) -> Self {
        Self {
            buf: String::new(),
            max_len,
        }
    }

    fn push(&mut self, text: &str) -> Result<(), TextTooLong> {
        let room = self.max_len.saturating_sub(self.buf.len());
        if text.len() <= room {
            self.buf.push_str(text);
            return Ok(());
        }
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buf.push_str(&text[..cut]);
        Err(TextTooLong)
    }
}

/// The string a value converts to in concatenation and `String(x)`.
///
/// Unbounded; script-facing call sites use [`display_bounded`] so the text is
/// never built past what the memory budget allows.
pub fn to_display_string(value: &Value) -> String {
    let mut out = BoundedText::new(usize::MAX);
    let _ = write_display(value, 0, &mut out);
    out.buf
}

/// The display string of `value` if it fits in `max_len` bytes. Rendering
/// stops as soon as the limit is crossed.
pub fn display_bounded(value: &Value, max_len: usize) -> Result<String, TextTooLong> {
    let mut out = BoundedText::new(max_len);
    write_display(value, 0, &mut out)?;
    Ok(out.buf)
}

/// The display string of `value` cut to about `max_len` bytes, with `...`
/// marking a cut. For error messages.
pub fn display_summary(value: &Value, max_len: usize) -> String {
    let mut out = BoundedText::new(max_len);
    match write_display(value, 0, &mut out) {
        Ok(()) => out.buf,
        Err(TextTooLong) => out.buf + "...",
    }
}

fn write_list<'v>(
    items: impl Iterator<Item = &'v Value>,
    separator: &str,
    skip_nullish: bool,
    depth: usize,
    out: &mut BoundedText,
) -> Result<(), TextTooLong> {
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push(separator)?;
        }
        if !(skip_nullish && item.is_nullish()) {
            write_display(item, depth + 1, out)?;
        }
    }
    Ok(())
}

fn write_display(value: &Value, depth: usize, out: &mut BoundedText) -> Result<(), TextTooLong> {
    match value {
        Value::Undefined => out.push("undefined"),
        Value::Null => out.push("null"),
        Value::Bool(b) => out.push(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push(&number_to_string(*n)),
        Value::Str(s) => out.push(s.as_str()),
        Value::Array(a) => {
            if depth >= DISPLAY_DEPTH_LIMIT {
                return Ok(());
            }
            let Ok(a) = a.try_borrow() else {
                return Ok(());
            };
            write_list(a.items().iter(), ",", true, depth, out)
        }
        Value::Object(_) => out.push("[object Object]"),
        Value::Function(c) => out.push(&format!(
            "function {}() {{ [code] }}",
            c.def.name.as_deref().unwrap_or("")
        )),
        Value::Native(b) => out.push(&format!("function {}() {{ [native code] }}", b.name())),
        Value::Method(m) => out.push(&format!("function {}() {{ [native code] }}", m.name)),
        Value::Host(h) => {
            if depth >= DISPLAY_DEPTH_LIMIT {
                return Ok(());
            }
            let Ok(h) = h.try_borrow() else {
                return Ok(());
            };
            match h.kind() {
                HostKind::List(items) => {
                    out.push("[")?;
                    write_list(items.iter(), ", ", false, depth, out)?;
                    out.push("]")
                }
                HostKind::Map(map) => {
                    out.push("{")?;
                    for (i, (k, v)) in map.iter().enumerate() {
                        if i > 0 {
                            out.push(", ")?;
                        }
                        out.push(k)?;
                        out.push("=")?;
                        write_display(v, depth + 1, out)?;
                    }
                    out.push("}")
                }
                HostKind::Set(set) => {
                    out.push("[")?;
                    write_list(set.values(), ", ", false, depth, out)?;
                    out.push("]")
                }
                HostKind::StringBuilder(text) => out.push(text),
            }
        }
        Value::HostClass(id) => out.push(&format!("[class {id}]")),
        Value::Namespace(path) => out.push(&format!("[namespace {path}]")),
    }
}

/// Property key for a value used in `obj[key]`.
pub fn to_property_key(value: &Value) -> Rc<str> {
    match value {
        Value::Str(s) => s.text(),
        other => Rc::from(display_summary(other, PROPERTY_KEY_LIMIT)),
    }
}

/// Array index denoted by `key`, if it is a canonical non-negative integer.
pub fn as_array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < 4_294_967_295.0 => {
            Some(*n as usize)
        }
        Value::Str(s) => parse_index(s.as_str()),
        _ => None,
    }
}

/// Index denoted by a property name such as `"3"`.
pub fn parse_index(text: &str) -> Option<usize> {
    if text.is_empty() || (text.len() > 1 && text.starts_with('0')) {
        return None;
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

pub fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "undefined",
        Value::Null => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::Str(_) => "string",
        Value::Function(_) | Value::Native(_) | Value::Method(_) | Value::HostClass(_) => {
            "function"
        }
        Value::Array(_) | Value::Object(_) | Value::Host(_) | Value::Namespace(_) => "object",
    }
}

/// `===`
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => x == y,
        (Value::Method(x), Value::Method(y)) => Rc::ptr_eq(x, y),
        (Value::Host(x), Value::Host(y)) => Rc::ptr_eq(x, y),
        (Value::HostClass(x), Value::HostClass(y)) => x == y,
        (Value::Namespace(x), Value::Namespace(y)) => x == y,
        _ => false,
    }
}

/// `==`
pub fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Number(_), Value::Str(_))
        | (Value::Str(_), Value::Number(_))
        | (Value::Bool(_), _)
        | (_, Value::Bool(_)) => to_number(a) == to_number(b),
        (Value::Array(_), Value::Str(s)) | (Value::Str(s), Value::Array(_)) => {
            let array = if matches!(a, Value::Array(_)) { a } else { b };
            display_bounded(array, s.as_str().len()).is_ok_and(|text| text == s.as_str())
        }
        (Value::Array(_), Value::Number(_)) | (Value::Number(_), Value::Array(_)) => {
            to_number(a) == to_number(b)
        }
        _ => strict_equals(a, b),
    }
}

/// Ordering for `<`-family operators: `None` when unordered (NaN involved).
pub fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        return Some(x.as_str().cmp(y.as_str()));
    }
    to_number(a).partial_cmp(&to_number(b))
}

/// Truncate toward zero into an `i64`, mapping NaN to zero.
pub fn to_integer(n: f64) -> i64 {
    if n.is_nan() {
        0
    } else {
        n.trunc() as i64
    }
}

/// Resolve a relative index (negative counts from the end) against `len`.
pub fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if value.is_undefined() {
        return default;
    }
    let n = to_integer(to_number(value));
    let len = len as i64;
    let idx = if n < 0 { (len + n).max(0) } else { n.min(len) };
    idx as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_print_without_fraction() {
        assert_eq!(number_to_string(5050.0), "5050");
        assert_eq!(number_to_string(-3.0), "-3");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn extreme_magnitudes_use_exponent_form() {
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e300), "1.5e+300");
        assert_eq!(number_to_string(-2e22), "-2e+22");
        assert_eq!(number_to_string(1e20), "100000000000000000000");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(1.23e-18), "1.23e-18");
        assert_eq!(number_to_string(0.000001), "0.000001");
    }

    #[test]
    fn bounded_display_stops_at_limit() {
        use crate::lang::heap::HeapMeter;
        use crate::lang::value::{ArrayData, JsStr};
        use std::cell::RefCell;

        let heap = HeapMeter::new();
        let big = Value::Str(JsStr::charged("x".repeat(1_000), &heap));
        let array = Value::Array(Rc::new(RefCell::new(ArrayData::new(vec![big; 1_000], &heap))));
        assert_eq!(display_bounded(&array, 10_000), Err(TextTooLong));
        assert_eq!(display_bounded(&array, 1_000_999).map(|t| t.len()), Ok(1_000_999));
        let summary = display_summary(&array, 8);
        assert_eq!(summary, "xxxxxxxx...");
        assert!(to_number(&array).is_nan());
    }

    #[test]
    fn string_to_number_rules() {
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1F"), 31.0);
        assert_eq!(string_to_number("1e3"), 1000.0);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn loose_equality_coerces() {
        assert!(loose_equals(&Value::Number(1.0), &Value::literal_str("1")));
        assert!(loose_equals(&Value::Null, &Value::Undefined));
        assert!(!loose_equals(&Value::Null, &Value::Number(0.0)));
        assert!(loose_equals(&Value::Bool(true), &Value::Number(1.0)));
        assert!(!strict_equals(&Value::Number(1.0), &Value::literal_str("1")));
    }

    #[test]
    fn array_index_parsing() {
        assert_eq!(parse_index("0"), Some(0));
        assert_eq!(parse_index("12"), Some(12));
        assert_eq!(parse_index("01"), None);
        assert_eq!(parse_index("-1"), None);
        assert_eq!(as_array_index(&Value::Number(2.5)), None);
    }

    #[test]
    fn relative_index_clamps() {
        assert_eq!(relative_index(&Value::Number(-2.0), 5, 0), 3);
        assert_eq!(relative_index(&Value::Number(9.0), 5, 0), 5);
        assert_eq!(relative_index(&Value::Undefined, 5, 5), 5);
    }
}
