//! Op blocks
//!
//! ```text
//! [size: u32 BE][op: u8][particle: u8][unused: u8][name_len: u8][name][payload]
//! ```
//!
//! `size` counts the four single-byte fields, the name and the payload.

use crate::particle;
use byteorder::{BigEndian, ByteOrder};
use meridian_core::{Error, Operation, OperationType, ParticleType, Result, Value};

/// Op block header length (size + op + particle + unused + name length)
pub const OP_HEADER_SIZE: usize = 8;

/// Longest bin name the server accepts
pub const MAX_BIN_NAME: usize = 15;

/// One decoded op block
#[derive(Debug, Clone, PartialEq)]
pub struct OpEntry {
    /// Wire op code
    pub op_type: u8,
    /// Particle type of the payload
    pub particle_type: u8,
    /// Bin name
    pub name: String,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl OpEntry {
    /// Decode the payload
    pub fn value(&self) -> Result<Value> {
        particle::decode(self.particle_type, &self.payload)
    }
}

/// Append a raw op block
pub fn write_raw_op(
    buf: &mut Vec<u8>,
    op_type: u8,
    particle_type: u8,
    name: &str,
    payload: &[u8],
) -> Result<()> {
    if name.len() > MAX_BIN_NAME {
        return Err(Error::InvalidArgument(format!(
            "bin name '{}' longer than {} bytes",
            name, MAX_BIN_NAME
        )));
    }
    let mut head = [0u8; OP_HEADER_SIZE];
    BigEndian::write_u32(&mut head[..4], (4 + name.len() + payload.len()) as u32);
    head[4] = op_type;
    head[5] = particle_type;
    head[7] = name.len() as u8;
    buf.extend_from_slice(&head);
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(payload);
    Ok(())
}

/// Append an operation.
///
/// CDT operations carry their argument list as a msgpack blob.
pub fn write_op(buf: &mut Vec<u8>, op: &Operation) -> Result<()> {
    match op.op_type {
        OperationType::CdtRead | OperationType::CdtModify => {
            let payload = particle::msgpack(&op.value)?;
            write_raw_op(
                buf,
                op.op_type.code(),
                ParticleType::Blob as u8,
                &op.bin_name,
                &payload,
            )
        }
        _ => {
            let payload = particle::encode(&op.value)?;
            write_raw_op(
                buf,
                op.op_type.code(),
                op.value.particle_type() as u8,
                &op.bin_name,
                &payload,
            )
        }
    }
}

/// Read one op block at `offset`; returns the entry and the next offset.
pub fn read_op(buf: &[u8], offset: usize) -> Result<(OpEntry, usize)> {
    let head = buf
        .get(offset..offset + OP_HEADER_SIZE)
        .ok_or_else(|| Error::protocol("op header truncated"))?;
    let size = BigEndian::read_u32(&head[..4]) as usize;
    let name_len = head[7] as usize;
    if size < 4 + name_len {
        return Err(Error::protocol(format!(
            "op size {} smaller than its name ({} bytes)",
            size, name_len
        )));
    }
    let name_start = offset + OP_HEADER_SIZE;
    let payload_start = name_start + name_len;
    let end = offset + 4 + size;
    let name = buf
        .get(name_start..payload_start)
        .ok_or_else(|| Error::protocol("op name truncated"))?;
    let payload = buf
        .get(payload_start..end)
        .ok_or_else(|| Error::protocol("op payload truncated"))?;
    let name = String::from_utf8(name.to_vec())
        .map_err(|e| Error::protocol(format!("bin name not utf-8: {}", e)))?;
    Ok((
        OpEntry {
            op_type: head[4],
            particle_type: head[5],
            name,
            payload: payload.to_vec(),
        },
        end,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::Bin;

    #[test]
    fn test_op_layout() {
        let mut buf = Vec::new();
        write_op(&mut buf, &Operation::put(Bin::new("a", 1i64))).unwrap();
        assert_eq!(&buf[..8], &[0, 0, 0, 13, 2, 1, 0, 1]);
        let (entry, next) = read_op(&buf, 0).unwrap();
        assert_eq!(next, buf.len());
        assert_eq!(entry.name, "a");
        assert_eq!(entry.value().unwrap(), Value::Int(1));
    }

    #[test]
    fn test_long_bin_name_rejected() {
        let mut buf = Vec::new();
        let err = write_op(&mut buf, &Operation::get_bin("a_very_long_bin_name")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_cdt_payload_is_msgpack() {
        let mut buf = Vec::new();
        write_op(&mut buf, &meridian_core::list::size("l")).unwrap();
        let (entry, _) = read_op(&buf, 0).unwrap();
        assert_eq!(entry.op_type, 3);
        let args: Value = rmp_serde::from_slice(&entry.payload).unwrap();
        assert_eq!(args, Value::List(vec![Value::Int(16)]));
    }

    #[test]
    fn test_truncated_op() {
        let mut buf = Vec::new();
        write_op(&mut buf, &Operation::put(Bin::new("bin", "value"))).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(matches!(read_op(&buf, 0), Err(Error::Protocol(_))));
    }
}
