//! Field blocks
//!
//! ```text
//! [length: u32 BE][type: u8][payload]
//! ```
//!
//! `length` counts the type byte plus the payload.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use meridian_core::{Error, Result};

/// Field block header length (size + type)
pub const FIELD_HEADER_SIZE: usize = 5;

/// Field type tags
pub mod field_type {
    /// Namespace name
    pub const NAMESPACE: u8 = 0;
    /// Set name
    pub const SET: u8 = 1;
    /// User key (particle type byte + payload)
    pub const KEY: u8 = 2;
    /// Record version, 7 bytes LE
    pub const RECORD_VERSION: u8 = 3;
    /// Key digest
    pub const DIGEST: u8 = 4;
    /// Transaction id, 8 bytes LE
    pub const MRT_ID: u8 = 5;
    /// Transaction deadline, 4 bytes LE
    pub const MRT_DEADLINE: u8 = 6;
    /// UDF package name
    pub const UDF_PACKAGE_NAME: u8 = 30;
    /// UDF function name
    pub const UDF_FUNCTION: u8 = 31;
    /// UDF argument list (msgpack)
    pub const UDF_ARGLIST: u8 = 32;
    /// UDF operation kind
    pub const UDF_OP: u8 = 33;
    /// Batch entries
    pub const BATCH_INDEX: u8 = 41;
    /// Batch entries with set names
    pub const BATCH_INDEX_WITH_SET: u8 = 42;
}

/// Length of the record version payload
pub const RECORD_VERSION_SIZE: usize = 7;

/// One decoded field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Type tag
    pub field_type: u8,
    /// Payload
    pub data: Vec<u8>,
}

impl Field {
    /// Payload as UTF-8 text
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.data)
            .map_err(|e| Error::protocol(format!("field {} not utf-8: {}", self.field_type, e)))
    }
}

/// Append a field block
pub fn write_field(buf: &mut Vec<u8>, field_type: u8, data: &[u8]) {
    let mut head = [0u8; FIELD_HEADER_SIZE];
    BigEndian::write_u32(&mut head[..4], data.len() as u32 + 1);
    head[4] = field_type;
    buf.extend_from_slice(&head);
    buf.extend_from_slice(data);
}

/// Append a string field
pub fn write_str_field(buf: &mut Vec<u8>, field_type: u8, s: &str) {
    write_field(buf, field_type, s.as_bytes());
}

/// Encode a record version into its 7-byte little-endian payload
pub fn encode_version(version: u64) -> [u8; RECORD_VERSION_SIZE] {
    let mut out = [0u8; RECORD_VERSION_SIZE];
    LittleEndian::write_uint(&mut out, version & 0x00FF_FFFF_FFFF_FFFF, RECORD_VERSION_SIZE);
    out
}

/// Decode a 7-byte little-endian record version
pub fn decode_version(data: &[u8]) -> Result<u64> {
    if data.len() != RECORD_VERSION_SIZE {
        return Err(Error::protocol(format!(
            "record version field of {} bytes",
            data.len()
        )));
    }
    Ok(LittleEndian::read_uint(data, RECORD_VERSION_SIZE))
}

/// Decode a 4-byte little-endian deadline
pub fn decode_deadline(data: &[u8]) -> Result<u32> {
    if data.len() != 4 {
        return Err(Error::protocol(format!(
            "deadline field of {} bytes",
            data.len()
        )));
    }
    Ok(LittleEndian::read_u32(data))
}

/// Read one field block at `offset`; returns the field and the next offset.
pub fn read_field(buf: &[u8], offset: usize) -> Result<(Field, usize)> {
    let head = buf
        .get(offset..offset + FIELD_HEADER_SIZE)
        .ok_or_else(|| Error::protocol("field header truncated"))?;
    let len = BigEndian::read_u32(&head[..4]) as usize;
    if len == 0 {
        return Err(Error::protocol("field length zero"));
    }
    let start = offset + FIELD_HEADER_SIZE;
    let end = start + len - 1;
    let data = buf
        .get(start..end)
        .ok_or_else(|| Error::protocol(format!("field payload truncated ({} bytes)", len - 1)))?;
    Ok((
        Field {
            field_type: head[4],
            data: data.to_vec(),
        },
        end,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_layout() {
        let mut buf = Vec::new();
        write_str_field(&mut buf, field_type::NAMESPACE, "test");
        assert_eq!(buf, vec![0, 0, 0, 5, 0, b't', b'e', b's', b't']);
        let (f, next) = read_field(&buf, 0).unwrap();
        assert_eq!(f.as_str().unwrap(), "test");
        assert_eq!(next, buf.len());
    }

    #[test]
    fn test_version_is_seven_bytes_le() {
        let v = encode_version(0x0102_0304_0506_07);
        assert_eq!(v, [7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(decode_version(&v).unwrap(), 0x0102_0304_0506_07);
        assert!(decode_version(&[1, 2]).is_err());
    }

    #[test]
    fn test_truncated_field() {
        let mut buf = Vec::new();
        write_field(&mut buf, field_type::DIGEST, &[1; 20]);
        buf.truncate(10);
        assert!(matches!(read_field(&buf, 0), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_deadline_le() {
        let mut buf = Vec::new();
        write_field(&mut buf, field_type::MRT_DEADLINE, &0x01020304u32.to_le_bytes());
        let (f, _) = read_field(&buf, 0).unwrap();
        assert_eq!(f.field_type, field_type::MRT_DEADLINE);
        assert_eq!(f.data, vec![4, 3, 2, 1]);
        assert_eq!(decode_deadline(&f.data).unwrap(), 0x01020304);
        assert!(matches!(decode_deadline(&[1, 2, 3]), Err(Error::Protocol(_))));
    }
}
