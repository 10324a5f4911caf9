//! Value types for Meridian
//!
//! This module defines:
//! - Value: the unified enum for every bin value and user key
//! - ParticleType: the server's type tag for one encoded value
//!
//! ## Type Rules
//!
//! - `Int(1) != Float(1.0)`: different variants are never equal
//! - `Blob` is not `String`
//! - Float uses IEEE-754 equality: `NaN != NaN`, `-0.0 == 0.0`
//! - `Map` keeps insertion order; two maps are equal only if their pairs are
//!   equal in the same order (the server returns maps in stored order)

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Server-side type tag carried in every op block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParticleType {
    /// No value
    Null = 0,
    /// 64-bit signed integer, big-endian
    Integer = 1,
    /// 64-bit IEEE-754 float, big-endian
    Float = 2,
    /// UTF-8 string
    String = 3,
    /// Raw bytes
    Blob = 4,
    /// Boolean (one byte)
    Bool = 17,
    /// HyperLogLog sketch bytes
    Hll = 18,
    /// msgpack-encoded map
    Map = 19,
    /// msgpack-encoded list
    List = 20,
    /// GeoJSON string
    GeoJson = 23,
}

impl ParticleType {
    /// Map a wire byte to a particle type.
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => ParticleType::Null,
            1 => ParticleType::Integer,
            2 => ParticleType::Float,
            3 => ParticleType::String,
            4 => ParticleType::Blob,
            17 => ParticleType::Bool,
            18 => ParticleType::Hll,
            19 => ParticleType::Map,
            20 => ParticleType::List,
            23 => ParticleType::GeoJson,
            _ => return None,
        })
    }
}

/// A bin value, operation argument or user key.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of a value. Writing `Nil` to a bin removes the bin.
    Nil,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Blob(Vec<u8>),
    /// Ordered list of values
    List(Vec<Value>),
    /// Map with insertion-ordered pairs
    Map(Vec<(Value, Value)>),
    /// GeoJSON document
    GeoJson(String),
    /// HyperLogLog sketch
    Hll(Vec<u8>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::GeoJson(a), Value::GeoJson(b)) => a == b,
            (Value::Hll(a), Value::Hll(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Particle type used when this value is written into an op block.
    pub fn particle_type(&self) -> ParticleType {
        match self {
            Value::Nil => ParticleType::Null,
            Value::Bool(_) => ParticleType::Bool,
            Value::Int(_) => ParticleType::Integer,
            Value::Float(_) => ParticleType::Float,
            Value::String(_) => ParticleType::String,
            Value::Blob(_) => ParticleType::Blob,
            Value::List(_) => ParticleType::List,
            Value::Map(_) => ParticleType::Map,
            Value::GeoJson(_) => ParticleType::GeoJson,
            Value::Hll(_) => ParticleType::Hll,
        }
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Blob(_) => "Blob",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::GeoJson(_) => "GeoJson",
            Value::Hll(_) => "Hll",
        }
    }

    /// Check if this is `Nil`
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Integer payload, if any
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String payload, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::GeoJson(s) => Some(s),
            _ => None,
        }
    }

    /// Byte payload, if any
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) | Value::Hll(b) => Some(b),
            _ => None,
        }
    }

    /// List payload, if any
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) | Value::GeoJson(s) => write!(f, "{}", s),
            Value::Blob(b) | Value::Hll(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

// ============================================================================
// msgpack (collection particle) serialization
// ============================================================================

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::String(s) | Value::GeoJson(s) => serializer.serialize_str(s),
            Value::Blob(b) | Value::Hll(b) => serializer.serialize_bytes(b),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (k, v) in pairs {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a msgpack value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        // Values above i64::MAX wrap, matching the server's signed integers.
        Ok(Value::Int(v as i64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
        Ok(Value::Blob(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Blob(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((k, v)) = map.next_entry()? {
            pairs.push((k, v));
        }
        Ok(Value::Map(pairs))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_different_types_never_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Blob(b"a".to_vec()), Value::String("a".into()));
    }

    #[test]
    fn test_float_ieee_equality() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
    }

    #[test]
    fn test_particle_type_round_trip() {
        for v in [
            Value::Nil,
            Value::Bool(true),
            Value::Int(3),
            Value::Float(1.5),
            Value::String("x".into()),
            Value::Blob(vec![1]),
            Value::List(vec![]),
            Value::Map(vec![]),
            Value::GeoJson("{}".into()),
            Value::Hll(vec![]),
        ] {
            let pt = v.particle_type();
            assert_eq!(ParticleType::from_u8(pt as u8), Some(pt));
        }
        assert_eq!(ParticleType::from_u8(99), None);
    }

    #[test]
    fn test_msgpack_nested_collections() {
        let v = Value::List(vec![
            Value::Int(-7),
            Value::String("s".into()),
            Value::Blob(vec![0, 1, 2]),
            Value::Map(vec![(Value::String("k".into()), Value::Float(2.5))]),
            Value::Nil,
            Value::Bool(false),
        ]);
        let bytes = rmp_serde::to_vec(&v).unwrap();
        let back: Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_display_list_and_map() {
        let v = Value::List(vec![Value::Int(1), Value::String("a".into())]);
        assert_eq!(v.to_string(), "[1, a]");
        let m = Value::Map(vec![(Value::Int(1), Value::Bool(true))]);
        assert_eq!(m.to_string(), "{1: true}");
    }
}
