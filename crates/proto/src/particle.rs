//! Particle codec: one [`Value`] ↔ (particle type, payload bytes)
//!
//! Scalars use fixed layouts (integers and floats are 8 bytes big-endian,
//! booleans one byte). Lists and maps are msgpack. GeoJSON carries a
//! one-byte flags field and a two-byte cell count before the text.

use byteorder::{BigEndian, ByteOrder};
use meridian_core::{Error, ParticleType, Result, Value};

/// Payload bytes for a value
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    Ok(match value {
        Value::Nil => Vec::new(),
        Value::Bool(b) => vec![*b as u8],
        Value::Int(i) => i.to_be_bytes().to_vec(),
        Value::Float(f) => f.to_bits().to_be_bytes().to_vec(),
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Blob(b) | Value::Hll(b) => b.clone(),
        Value::GeoJson(s) => {
            let mut out = Vec::with_capacity(3 + s.len());
            out.extend_from_slice(&[0, 0, 0]);
            out.extend_from_slice(s.as_bytes());
            out
        }
        Value::List(_) | Value::Map(_) => msgpack(value)?,
    })
}

/// msgpack encoding of a value (collection particles and CDT arguments)
pub fn msgpack(value: &Value) -> Result<Vec<u8>> {
    rmp_serde::to_vec(value).map_err(|e| Error::InvalidArgument(format!("msgpack encode: {}", e)))
}

/// Decode a payload of the given particle type.
///
/// # Errors
///
/// Returns a protocol error for unknown types or malformed payloads.
pub fn decode(particle_type: u8, payload: &[u8]) -> Result<Value> {
    let pt = ParticleType::from_u8(particle_type)
        .ok_or_else(|| Error::protocol(format!("unknown particle type {}", particle_type)))?;
    Ok(match pt {
        ParticleType::Null => Value::Nil,
        ParticleType::Integer => Value::Int(read_i64(payload)?),
        ParticleType::Float => Value::Float(f64::from_bits(read_i64(payload)? as u64)),
        ParticleType::Bool => Value::Bool(payload.first().map(|b| *b != 0).unwrap_or(false)),
        ParticleType::String => Value::String(utf8(payload)?),
        ParticleType::Blob => Value::Blob(payload.to_vec()),
        ParticleType::Hll => Value::Hll(payload.to_vec()),
        ParticleType::GeoJson => {
            if payload.len() < 3 {
                return Err(Error::protocol("geojson particle too short"));
            }
            let ncells = BigEndian::read_u16(&payload[1..3]) as usize;
            let start = 3 + ncells * 8;
            if payload.len() < start {
                return Err(Error::protocol("geojson cell list truncated"));
            }
            Value::GeoJson(utf8(&payload[start..])?)
        }
        ParticleType::List | ParticleType::Map => rmp_serde::from_slice(payload)
            .map_err(|e| Error::protocol(format!("msgpack decode: {}", e)))?,
    })
}

fn read_i64(payload: &[u8]) -> Result<i64> {
    match payload.len() {
        0 => Ok(0),
        8 => Ok(BigEndian::read_i64(payload)),
        // Short integers are sign-less big-endian
        n if n < 8 => Ok(BigEndian::read_uint(payload, n) as i64),
        n => Err(Error::protocol(format!("integer particle of {} bytes", n))),
    }
}

fn utf8(payload: &[u8]) -> Result<String> {
    String::from_utf8(payload.to_vec()).map_err(|e| Error::protocol(format!("invalid utf-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) {
        let bytes = encode(&v).unwrap();
        let back = decode(v.particle_type() as u8, &bytes).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_scalars() {
        round_trip(Value::Int(-42));
        round_trip(Value::Float(3.25));
        round_trip(Value::Bool(true));
        round_trip(Value::from("hello"));
        round_trip(Value::Blob(vec![0, 255]));
        round_trip(Value::GeoJson("{\"type\":\"Point\"}".into()));
    }

    #[test]
    fn test_collections() {
        round_trip(Value::List(vec![Value::Int(1), Value::from("x")]));
        round_trip(Value::Map(vec![(Value::from("a"), Value::Int(2))]));
    }

    #[test]
    fn test_int_layout_is_big_endian() {
        assert_eq!(encode(&Value::Int(1)).unwrap(), vec![0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(decode(1, &[1, 0]).unwrap(), Value::Int(256));
    }

    #[test]
    fn test_unknown_particle_type() {
        assert!(matches!(decode(99, &[]), Err(Error::Protocol(_))));
    }
}
