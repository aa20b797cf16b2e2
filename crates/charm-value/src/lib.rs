//! Primitive value model for event snapshots and stored state, plus canonical CBOR helpers.
//!
//! A [`Value`] is the only shape that outlives an invocation: null, booleans, 64-bit
//! integers, finite floats, text, ordered lists and key-ordered maps of the same.

mod de;
mod ser;

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

pub use de::from_value;
pub use ser::to_value;

/// Storage-safe primitive value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    /// Always finite; [`to_value`] rejects NaN and infinities.
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Convert into a JSON value. Fails only for a non-finite float built by hand.
    pub fn to_json(&self) -> Result<serde_json::Value, ValueError> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .ok_or_else(|| ValueError::unsupported(format!("non-finite float {v}")))?,
            Value::Text(v) => serde_json::Value::String(v.clone()),
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| item.to_json().map_err(|err| err.at_index(idx)))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, item)| {
                        item.to_json()
                            .map(|json| (key.clone(), json))
                            .map_err(|err| err.at_field(key))
                    })
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Convert a JSON document (e.g. a trigger payload handed over by an entry point).
    pub fn from_json(json: &serde_json::Value) -> Result<Self, ValueError> {
        to_value(json)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Ok(json) => write!(f, "{json}"),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Text(v) => serializer.serialize_str(v),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, item) in entries {
                    map.serialize_entry(key, item)?;
                }
                map.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

/// Conversion contract every event payload satisfies.
///
/// `restore` ignores keys it does not know and fills `#[serde(default)]` fields that
/// older data lacks. Fields marked `#[serde(skip)]` are transient and come back as
/// their default.
pub trait Snapshot: Sized {
    fn snapshot(&self) -> Result<Value, ValueError>;
    fn restore(data: Value) -> Result<Self, ValueError>;
}

impl<T> Snapshot for T
where
    T: Serialize + DeserializeOwned,
{
    fn snapshot(&self) -> Result<Value, ValueError> {
        to_value(self)
    }

    fn restore(data: Value) -> Result<Self, ValueError> {
        from_value(data)
    }
}

/// Serialize a value into canonical CBOR bytes (sorted map keys, self-describe tag).
pub fn to_canonical_cbor(value: &Value) -> Result<Vec<u8>, ValueError> {
    let mut buf = Vec::with_capacity(128);
    let canonical: serde_cbor::Value = serde_cbor::value::to_value(value)?;
    let mut serializer = serde_cbor::ser::Serializer::new(&mut buf);
    serializer.self_describe()?;
    canonical.serialize(&mut serializer)?;
    Ok(buf)
}

/// Decode bytes produced by [`to_canonical_cbor`].
pub fn from_cbor(bytes: &[u8]) -> Result<Value, ValueError> {
    Ok(serde_cbor::from_slice(bytes)?)
}

#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("unsupported value at {}: {reason}", display_path(.path))]
    Unsupported { path: String, reason: String },
    #[error("cannot restore {target}: {message}")]
    Restore {
        target: &'static str,
        message: String,
    },
    #[error("CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("{0}")]
    Custom(String),
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}

impl ValueError {
    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        ValueError::Unsupported {
            path: String::new(),
            reason: reason.into(),
        }
    }

    /// Location of an unsupported value inside the payload, e.g. `units[2].ratio`.
    pub fn path(&self) -> Option<&str> {
        match self {
            ValueError::Unsupported { path, .. } => Some(path),
            _ => None,
        }
    }

    pub(crate) fn at_field(self, field: &str) -> Self {
        self.prefixed(field)
    }

    pub(crate) fn at_index(self, idx: usize) -> Self {
        self.prefixed(&format!("[{idx}]"))
    }

    fn prefixed(self, segment: &str) -> Self {
        match self {
            ValueError::Unsupported { path, reason } => {
                let path = if path.is_empty() {
                    segment.to_string()
                } else if path.starts_with('[') {
                    format!("{segment}{path}")
                } else {
                    format!("{segment}.{path}")
                };
                ValueError::Unsupported { path, reason }
            }
            other => other,
        }
    }
}

impl serde::ser::Error for ValueError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        ValueError::Custom(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Relation {
        name: String,
        id: i64,
        units: Vec<String>,
        #[serde(default)]
        app: Option<String>,
    }

    #[test]
    fn canonical_cbor_round_trip_keeps_number_kinds() {
        let mut map = BTreeMap::new();
        map.insert("zeta".to_string(), Value::Float(1.0));
        map.insert("alpha".to_string(), Value::Int(1));
        map.insert(
            "list".to_string(),
            Value::List(vec![Value::Null, Value::Bool(true), "x".into()]),
        );
        let value = Value::Map(map);

        let bytes = to_canonical_cbor(&value).unwrap();
        let decoded = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(decoded.as_map().unwrap()["zeta"], Value::Float(1.0));
        assert_eq!(decoded.as_map().unwrap()["alpha"], Value::Int(1));
    }

    #[test]
    fn canonical_encoding_is_independent_of_insertion_order() {
        let mut first = BTreeMap::new();
        first.insert("b".to_string(), Value::Int(2));
        first.insert("a".to_string(), Value::Int(1));
        let mut second = BTreeMap::new();
        second.insert("a".to_string(), Value::Int(1));
        second.insert("b".to_string(), Value::Int(2));
        assert_eq!(
            to_canonical_cbor(&Value::Map(first)).unwrap(),
            to_canonical_cbor(&Value::Map(second)).unwrap()
        );
    }

    #[test]
    fn snapshot_and_restore_struct_payload() {
        let relation = Relation {
            name: "db".into(),
            id: 7,
            units: vec!["mysql/0".into(), "mysql/1".into()],
            app: Some("mysql".into()),
        };
        let snapshot = relation.snapshot().unwrap();
        assert_eq!(snapshot.as_map().unwrap()["id"], Value::Int(7));
        let restored = Relation::restore(snapshot).unwrap();
        assert_eq!(restored, relation);
    }

    #[test]
    fn json_conversion_round_trips() {
        let json = serde_json::json!({"name": "db", "count": 3, "ratio": 0.5, "tags": ["a"]});
        let value = Value::from_json(&json).unwrap();
        assert_eq!(value.as_map().unwrap()["count"], Value::Int(3));
        assert_eq!(value.to_json().unwrap(), json);
        assert_eq!(value.to_string(), json.to_string());
    }

    #[test]
    fn hand_built_nan_cannot_become_json() {
        let value = Value::List(vec![Value::Int(1), Value::Float(f64::NAN)]);
        let err = value.to_json().unwrap_err();
        assert_eq!(err.path(), Some("[1]"));
    }
}
