use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::{Value, ValueError};

/// Restore a typed payload from its snapshot.
///
/// Unknown keys are ignored and fields marked `#[serde(default)]` may be absent, so
/// data written by an older payload schema stays readable.
pub fn from_value<T>(value: Value) -> Result<T, ValueError>
where
    T: DeserializeOwned,
{
    let json = value.to_json()?;
    serde_json::from_value(json).map_err(|err| ValueError::Restore {
        target: std::any::type_name::<T>(),
        message: err.to_string(),
    })
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a primitive value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer {v} exceeds the i64 range")))
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer {v} exceeds the i64 range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        if v.is_finite() {
            Ok(Value::Float(v))
        } else {
            Err(E::custom(format!("non-finite float {v}")))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Text(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
        Err(E::custom(format!(
            "byte string of {} bytes is not a primitive value",
            v.len()
        )))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries = BTreeMap::new();
        while let Some((key, item)) = map.next_entry::<String, Value>()? {
            entries.insert(key, item);
        }
        Ok(Value::Map(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Snapshot, to_value};
    use serde::Serialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct ConfigChangedV1 {
        revision: i64,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct ConfigChangedV2 {
        revision: i64,
        #[serde(default)]
        trusted: bool,
        #[serde(default)]
        keys: Vec<String>,
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct WithTransient {
        unit: String,
        #[serde(skip)]
        cached_status: Option<String>,
    }

    #[test]
    fn restore_fills_defaults_for_fields_added_later() {
        let old = ConfigChangedV1 { revision: 4 }.snapshot().unwrap();
        let restored = ConfigChangedV2::restore(old).unwrap();
        assert_eq!(
            restored,
            ConfigChangedV2 {
                revision: 4,
                trusted: false,
                keys: Vec::new()
            }
        );
    }

    #[test]
    fn restore_ignores_unknown_keys() {
        let newer = ConfigChangedV2 {
            revision: 9,
            trusted: true,
            keys: vec!["a".into()],
        }
        .snapshot()
        .unwrap();
        assert_eq!(
            ConfigChangedV1::restore(newer).unwrap(),
            ConfigChangedV1 { revision: 9 }
        );
    }

    #[test]
    fn transient_fields_are_not_persisted() {
        let event = WithTransient {
            unit: "app/0".into(),
            cached_status: Some("active".into()),
        };
        let snapshot = event.snapshot().unwrap();
        assert!(!snapshot.as_map().unwrap().contains_key("cached_status"));
        let restored = WithTransient::restore(snapshot).unwrap();
        assert_eq!(restored.unit, "app/0");
        assert_eq!(restored.cached_status, None);
    }

    #[test]
    fn restore_reports_shape_mismatch() {
        let err = ConfigChangedV1::restore(Value::from("nope")).unwrap_err();
        assert!(matches!(err, ValueError::Restore { .. }));
    }

    #[test]
    fn value_deserializes_from_json_text() {
        let value: Value = serde_json::from_str(r#"{"a":[1,2.5,null,true,"x"]}"#).unwrap();
        let list = value.as_map().unwrap()["a"].as_list().unwrap();
        assert_eq!(list[0], Value::Int(1));
        assert_eq!(list[1], Value::Float(2.5));
        assert!(list[2].is_null());
        assert_eq!(to_value(&value).unwrap(), value);
    }
}
