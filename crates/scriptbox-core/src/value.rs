//! `PortableValue`: the only shape a value may take when it crosses the
//! sandbox boundary, in either direction.
//!
//! Parameters arrive as portable values (usually deserialized from request
//! JSON) and script results leave as portable values. Nothing that references
//! interpreter state can be expressed here.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};

/// A null/boolean/number/string/list/map value safe to hand to the host.
///
/// Serializes to plain JSON. Integral numbers are written without a fractional
/// part (`5050`, not `5050.0`); non-finite numbers are written as `null`
/// because JSON cannot represent them.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum PortableValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<PortableValue>),
    Map(BTreeMap<String, PortableValue>),
}

impl PortableValue {
    /// Returns `true` for [`PortableValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, PortableValue::Null)
    }

    /// The number held by this value, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PortableValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string held by this value, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PortableValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The list held by this value, if any.
    pub fn as_list(&self) -> Option<&[PortableValue]> {
        match self {
            PortableValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// The map held by this value, if any.
    pub fn as_map(&self) -> Option<&BTreeMap<String, PortableValue>> {
        match self {
            PortableValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Convert into a `serde_json::Value` (non-finite numbers become `null`).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PortableValue::Null => serde_json::Value::Null,
            PortableValue::Bool(b) => serde_json::Value::Bool(*b),
            PortableValue::Number(n) => number_to_json(*n),
            PortableValue::String(s) => serde_json::Value::String(s.clone()),
            PortableValue::List(items) => {
                serde_json::Value::Array(items.iter().map(PortableValue::to_json).collect())
            }
            PortableValue::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Largest magnitude at which every integer is exactly representable in an f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn integral(n: f64) -> Option<i64> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Some(n as i64)
    } else {
        None
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if let Some(i) = integral(n) {
        return serde_json::Value::from(i);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl Serialize for PortableValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PortableValue::Null => serializer.serialize_unit(),
            PortableValue::Bool(b) => serializer.serialize_bool(*b),
            PortableValue::Number(n) => match integral(*n) {
                Some(i) => serializer.serialize_i64(i),
                None if n.is_finite() => serializer.serialize_f64(*n),
                None => serializer.serialize_unit(),
            },
            PortableValue::String(s) => serializer.serialize_str(s),
            PortableValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            PortableValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl From<serde_json::Value> for PortableValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => PortableValue::Null,
            serde_json::Value::Bool(b) => PortableValue::Bool(b),
            serde_json::Value::Number(n) => PortableValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => PortableValue::String(s),
            serde_json::Value::Array(items) => {
                PortableValue::List(items.into_iter().map(PortableValue::from).collect())
            }
            serde_json::Value::Object(map) => PortableValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, PortableValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for PortableValue {
    fn from(b: bool) -> Self {
        PortableValue::Bool(b)
    }
}

impl From<f64> for PortableValue {
    fn from(n: f64) -> Self {
        PortableValue::Number(n)
    }
}

impl From<i64> for PortableValue {
    fn from(n: i64) -> Self {
        PortableValue::Number(n as f64)
    }
}

impl From<&str> for PortableValue {
    fn from(s: &str) -> Self {
        PortableValue::String(s.to_string())
    }
}

impl From<String> for PortableValue {
    fn from(s: String) -> Self {
        PortableValue::String(s)
    }
}

impl From<Vec<PortableValue>> for PortableValue {
    fn from(items: Vec<PortableValue>) -> Self {
        PortableValue::List(items)
    }
}

impl From<BTreeMap<String, PortableValue>> for PortableValue {
    fn from(map: BTreeMap<String, PortableValue>) -> Self {
        PortableValue::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_serialize_without_fraction() {
        let json = serde_json::to_string(&PortableValue::Number(5050.0)).unwrap();
        assert_eq!(json, "5050");
        let json = serde_json::to_string(&PortableValue::Number(0.5)).unwrap();
        assert_eq!(json, "0.5");
    }

    #[test]
    fn non_finite_numbers_serialize_as_null() {
        assert_eq!(
            serde_json::to_string(&PortableValue::Number(f64::NAN)).unwrap(),
            "null"
        );
        assert_eq!(
            PortableValue::Number(f64::INFINITY).to_json(),
            serde_json::Value::Null
        );
    }

    #[test]
    fn nested_json_converts_structurally() {
        let value: PortableValue =
            serde_json::from_str(r#"{"a":[1,"two",true,null],"b":{"c":2.5}}"#).unwrap();
        let map = value.as_map().unwrap();
        let a = map["a"].as_list().unwrap();
        assert_eq!(a[0], PortableValue::Number(1.0));
        assert_eq!(a[1], PortableValue::from("two"));
        assert_eq!(a[2], PortableValue::Bool(true));
        assert!(a[3].is_null());
        assert_eq!(map["b"].as_map().unwrap()["c"].as_f64(), Some(2.5));
    }

    #[test]
    fn to_json_matches_serialize() {
        let value = PortableValue::List(vec![
            PortableValue::from(3i64),
            PortableValue::from("x"),
            PortableValue::Map(BTreeMap::from([(
                "k".to_string(),
                PortableValue::Bool(false),
            )])),
        ]);
        let via_serde: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&value).unwrap()).unwrap();
        assert_eq!(via_serde, value.to_json());
    }
}
