//! Proto and message headers
//!
//! ## Proto header (8 bytes)
//!
//! ```text
//! [version: u8 = 2][type: u8][size: u48 BE]
//! ```
//!
//! `size` counts the bytes following the proto header.
//!
//! ## Message header (22 bytes)
//!
//! ```text
//!  0  header size (22)
//!  1  info1
//!  2  info2
//!  3  info3
//!  4  info4
//!  5  result code
//!  6  generation      u32 BE
//! 10  expiration      u32 BE
//! 14  batch index / server timeout  u32 BE
//! 18  field count     u16 BE
//! 20  op count        u16 BE
//! ```

use byteorder::{BigEndian, ByteOrder};
use meridian_core::{Error, Result, ResultCode};

/// Proto header length
pub const PROTO_HEADER_SIZE: usize = 8;
/// Message header length
pub const MSG_HEADER_SIZE: usize = 22;
/// Protocol version
pub const PROTO_VERSION: u8 = 2;
/// Largest body a proto header can describe
pub const MAX_PROTO_SIZE: u64 = (1 << 48) - 1;

/// Info command (not used by the core)
pub const MSG_TYPE_INFO: u8 = 1;
/// Plain message
pub const MSG_TYPE_MESSAGE: u8 = 3;
/// zlib-compressed message
pub const MSG_TYPE_COMPRESSED: u8 = 4;

/// `info1` bits
pub mod info1 {
    /// Read
    pub const READ: u8 = 1;
    /// Read all bins
    pub const GET_ALL: u8 = 2;
    /// Batch request
    pub const BATCH: u8 = 8;
    /// Do not return bin data
    pub const NOBINDATA: u8 = 32;
    /// Linearizable SC read
    pub const READ_MODE_SC_LINEARIZE: u8 = 64;
    /// Ask for a compressed response
    pub const COMPRESS_RESPONSE: u8 = 128;
}

/// `info2` bits
pub mod info2 {
    /// Write
    pub const WRITE: u8 = 1;
    /// Delete the record
    pub const DELETE: u8 = 2;
    /// Expect generation equal
    pub const GENERATION: u8 = 4;
    /// Expect generation greater
    pub const GENERATION_GT: u8 = 8;
    /// Leave a tombstone
    pub const DURABLE_DELETE: u8 = 16;
    /// Fail if the record exists
    pub const CREATE_ONLY: u8 = 32;
    /// Return a result for every op
    pub const RESPOND_ALL_OPS: u8 = 128;
}

/// `info3` bits
pub mod info3 {
    /// Last message of a multi-record response
    pub const LAST: u8 = 1;
    /// Commit to master only
    pub const COMMIT_MASTER: u8 = 2;
    /// Fail if the record is missing
    pub const UPDATE_ONLY: u8 = 8;
    /// Create or replace all bins
    pub const CREATE_OR_REPLACE: u8 = 16;
    /// Replace all bins, fail if missing
    pub const REPLACE_ONLY: u8 = 32;
    /// Allow reading from any replica in SC mode
    pub const SC_READ_RELAX: u8 = 64;
}

/// `info4` bits
pub mod info4 {
    /// Verify the read version under a transaction
    pub const MRT_VERIFY_READ: u8 = 1;
    /// Roll the record forward
    pub const MRT_ROLL_FORWARD: u8 = 2;
    /// Roll the record back
    pub const MRT_ROLL_BACK: u8 = 4;
}

/// Proto header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoHeader {
    /// Protocol version
    pub version: u8,
    /// Message type
    pub msg_type: u8,
    /// Body size in bytes
    pub size: u64,
}

impl ProtoHeader {
    /// Header for a plain message body
    pub fn message(size: usize) -> Self {
        ProtoHeader {
            version: PROTO_VERSION,
            msg_type: MSG_TYPE_MESSAGE,
            size: size as u64,
        }
    }

    /// Encode into 8 bytes
    pub fn encode(&self) -> [u8; PROTO_HEADER_SIZE] {
        let mut out = [0u8; PROTO_HEADER_SIZE];
        BigEndian::write_u64(&mut out, self.size & MAX_PROTO_SIZE);
        out[0] = self.version;
        out[1] = self.msg_type;
        out
    }

    /// Decode 8 bytes.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for a short buffer, unknown version or type.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PROTO_HEADER_SIZE {
            return Err(Error::protocol(format!(
                "proto header needs {} bytes, got {}",
                PROTO_HEADER_SIZE,
                buf.len()
            )));
        }
        let version = buf[0];
        if version != PROTO_VERSION {
            return Err(Error::protocol(format!(
                "unsupported proto version {}",
                version
            )));
        }
        let msg_type = buf[1];
        if !matches!(
            msg_type,
            MSG_TYPE_INFO | MSG_TYPE_MESSAGE | MSG_TYPE_COMPRESSED
        ) {
            return Err(Error::protocol(format!("unknown message type {}", msg_type)));
        }
        let size = BigEndian::read_u64(&buf[..PROTO_HEADER_SIZE]) & MAX_PROTO_SIZE;
        Ok(ProtoHeader {
            version,
            msg_type,
            size,
        })
    }

    /// Whether the body is compressed
    pub fn is_compressed(&self) -> bool {
        self.msg_type == MSG_TYPE_COMPRESSED
    }
}

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// `info1` bits
    pub info1: u8,
    /// `info2` bits
    pub info2: u8,
    /// `info3` bits
    pub info3: u8,
    /// `info4` bits
    pub info4: u8,
    /// Result code byte
    pub result_code: u8,
    /// Generation
    pub generation: u32,
    /// Expiration (responses) or TTL (requests)
    pub expiration: u32,
    /// Batch index in batch responses, server timeout in requests
    pub batch_index: u32,
    /// Number of field blocks
    pub n_fields: u16,
    /// Number of op blocks
    pub n_ops: u16,
}

impl MessageHeader {
    /// Encode into 22 bytes
    pub fn encode(&self) -> [u8; MSG_HEADER_SIZE] {
        let mut out = [0u8; MSG_HEADER_SIZE];
        out[0] = MSG_HEADER_SIZE as u8;
        out[1] = self.info1;
        out[2] = self.info2;
        out[3] = self.info3;
        out[4] = self.info4;
        out[5] = self.result_code;
        BigEndian::write_u32(&mut out[6..10], self.generation);
        BigEndian::write_u32(&mut out[10..14], self.expiration);
        BigEndian::write_u32(&mut out[14..18], self.batch_index);
        BigEndian::write_u16(&mut out[18..20], self.n_fields);
        BigEndian::write_u16(&mut out[20..22], self.n_ops);
        out
    }

    /// Decode 22 bytes.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for a short buffer or a wrong header size byte.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < MSG_HEADER_SIZE {
            return Err(Error::protocol(format!(
                "message header needs {} bytes, got {}",
                MSG_HEADER_SIZE,
                buf.len()
            )));
        }
        if buf[0] as usize != MSG_HEADER_SIZE {
            return Err(Error::protocol(format!(
                "invalid message header size {}",
                buf[0]
            )));
        }
        Ok(MessageHeader {
            info1: buf[1],
            info2: buf[2],
            info3: buf[3],
            info4: buf[4],
            result_code: buf[5],
            generation: BigEndian::read_u32(&buf[6..10]),
            expiration: BigEndian::read_u32(&buf[10..14]),
            batch_index: BigEndian::read_u32(&buf[14..18]),
            n_fields: BigEndian::read_u16(&buf[18..20]),
            n_ops: BigEndian::read_u16(&buf[20..22]),
        })
    }

    /// Result code of this message
    pub fn result_code(&self) -> ResultCode {
        ResultCode::from_wire(self.result_code)
    }

    /// Whether this is the terminating message of a multi-record response
    pub fn is_last(&self) -> bool {
        self.info3 & info3::LAST != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proto_header_layout() {
        let h = ProtoHeader::message(0x0102_0304_0506);
        let bytes = h.encode();
        assert_eq!(bytes, [2, 3, 1, 2, 3, 4, 5, 6]);
        assert_eq!(ProtoHeader::decode(&bytes).unwrap(), h);
    }

    #[test]
    fn test_proto_header_rejects_bad_version() {
        let mut bytes = ProtoHeader::message(10).encode();
        bytes[0] = 9;
        assert!(matches!(
            ProtoHeader::decode(&bytes),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_message_header_offsets() {
        let h = MessageHeader {
            info3: info3::LAST,
            result_code: 2,
            generation: 7,
            expiration: 9,
            batch_index: 0xAABB,
            n_fields: 1,
            n_ops: 3,
            ..MessageHeader::default()
        };
        let bytes = h.encode();
        assert_eq!(bytes[0], 22);
        assert_eq!(&bytes[14..18], &[0, 0, 0xAA, 0xBB]);
        let back = MessageHeader::decode(&bytes).unwrap();
        assert_eq!(back, h);
        assert!(back.is_last());
        assert_eq!(back.result_code(), ResultCode::KEY_NOT_FOUND);
    }

    #[test]
    fn test_message_header_short_buffer() {
        assert!(MessageHeader::decode(&[22u8; 10]).is_err());
    }
}
