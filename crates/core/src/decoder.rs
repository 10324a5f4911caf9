//! Pluggable record decoding
//!
//! A [`RecordDecoder`] maps a [`Record`] into an application type. The client
//! holds an optional decoder; nothing in the command path depends on it.
//! [`serde_decoder`] builds one for any `DeserializeOwned` type by going
//! through a JSON object of the record's bins.

use crate::error::{Error, Result};
use crate::record::Record;
use crate::value::Value;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::sync::Arc;

/// Strategy that turns a record into a boxed application object
pub type RecordDecoder = Arc<dyn Fn(&Record) -> Result<Box<dyn Any + Send>> + Send + Sync>;

/// Convert a value to JSON. Blobs become byte arrays; map keys are stringified.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Nil => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::String(s) | Value::GeoJson(s) => Json::String(s.clone()),
        Value::Blob(b) | Value::Hll(b) => Json::Array(b.iter().map(|x| Json::from(*x)).collect()),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(pairs) => {
            let mut map = serde_json::Map::with_capacity(pairs.len());
            for (k, v) in pairs {
                let name = match k {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                map.insert(name, value_to_json(v));
            }
            Json::Object(map)
        }
    }
}

/// JSON object of a record's bins
pub fn record_to_json(record: &Record) -> serde_json::Value {
    let map = record
        .bins
        .iter()
        .map(|(k, v)| (k.clone(), value_to_json(v)))
        .collect();
    serde_json::Value::Object(map)
}

/// Decoder for any type deserializable from the record's bins.
pub fn serde_decoder<T>() -> RecordDecoder
where
    T: DeserializeOwned + Send + 'static,
{
    Arc::new(|record: &Record| {
        let obj: T = serde_json::from_value(record_to_json(record))
            .map_err(|e| Error::Decode(e.to_string()))?;
        Ok(Box::new(obj) as Box<dyn Any + Send>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        name: String,
        age: i64,
        tags: Vec<String>,
    }

    fn record() -> Record {
        let mut bins = HashMap::new();
        bins.insert("name".to_string(), Value::from("ann"));
        bins.insert("age".to_string(), Value::Int(41));
        bins.insert(
            "tags".to_string(),
            Value::List(vec![Value::from("a"), Value::from("b")]),
        );
        Record::new(bins, 1, 0)
    }

    #[test]
    fn test_serde_decoder_maps_bins() {
        let decoder = serde_decoder::<User>();
        let obj = decoder(&record()).unwrap();
        let user = obj.downcast::<User>().unwrap();
        assert_eq!(user.name, "ann");
        assert_eq!(user.age, 41);
        assert_eq!(user.tags, vec!["a", "b"]);
    }

    #[test]
    fn test_serde_decoder_reports_missing_bin() {
        let decoder = serde_decoder::<User>();
        let mut r = record();
        r.bins.remove("age");
        assert!(matches!(decoder(&r), Err(Error::Decode(_))));
    }

    #[test]
    fn test_map_keys_stringified() {
        let v = Value::Map(vec![(Value::Int(1), Value::from("x"))]);
        assert_eq!(value_to_json(&v), serde_json::json!({"1": "x"}));
    }
}
