//! zlib frame compression
//!
//! A compressed frame wraps a complete plain frame:
//!
//! ```text
//! [proto header, type 4][uncompressed size: u64 BE][zlib(plain frame)]
//! ```

use crate::header::{
    ProtoHeader, MAX_PROTO_SIZE, MSG_TYPE_COMPRESSED, PROTO_HEADER_SIZE, PROTO_VERSION,
};
use byteorder::{BigEndian, ByteOrder};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use meridian_core::{Error, Result};
use std::io::{Read, Write};

/// Requests smaller than this are sent uncompressed
pub const COMPRESS_THRESHOLD: usize = 128;

/// Compress a complete plain frame into a compressed frame.
pub fn compress_frame(frame: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(frame)
        .map_err(|e| Error::protocol(format!("zlib compress: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| Error::protocol(format!("zlib compress: {}", e)))?;

    let header = ProtoHeader {
        version: PROTO_VERSION,
        msg_type: MSG_TYPE_COMPRESSED,
        size: (8 + compressed.len()) as u64,
    };
    let mut out = Vec::with_capacity(PROTO_HEADER_SIZE + 8 + compressed.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&(frame.len() as u64).to_be_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Inflate the body of a compressed frame into the plain frame it carries.
///
/// # Errors
///
/// Returns a protocol error when the stream is corrupt or its inflated size
/// differs from the declared size.
pub fn inflate(body: &[u8]) -> Result<Vec<u8>> {
    if body.len() < 8 {
        return Err(Error::protocol("compressed body missing size prefix"));
    }
    let declared = BigEndian::read_u64(&body[..8]);
    if declared > MAX_PROTO_SIZE + PROTO_HEADER_SIZE as u64 {
        return Err(Error::protocol(format!(
            "compressed frame declares {} bytes, limit is {}",
            declared,
            MAX_PROTO_SIZE + PROTO_HEADER_SIZE as u64
        )));
    }
    if declared < PROTO_HEADER_SIZE as u64 {
        return Err(Error::protocol("inflated frame shorter than a proto header"));
    }
    // The declared size is untrusted; grow from the compressed size instead.
    let mut out = Vec::with_capacity(body.len().saturating_mul(4).min(declared as usize));
    ZlibDecoder::new(&body[8..])
        .take(declared + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::protocol(format!("zlib inflate: {}", e)))?;
    if out.len() as u64 != declared {
        return Err(Error::protocol(format!(
            "inflated {} bytes, header declared {}",
            out.len(),
            declared
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_frame(body: &[u8]) -> Vec<u8> {
        let mut frame = ProtoHeader::message(body.len()).encode().to_vec();
        frame.extend_from_slice(body);
        frame
    }

    #[test]
    fn test_compress_inflate() {
        let frame = plain_frame(&[7u8; 500]);
        let compressed = compress_frame(&frame).unwrap();
        let header = ProtoHeader::decode(&compressed).unwrap();
        assert!(header.is_compressed());
        assert_eq!(header.size as usize, compressed.len() - PROTO_HEADER_SIZE);
        assert!(compressed.len() < frame.len());

        let back = inflate(&compressed[PROTO_HEADER_SIZE..]).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_size_mismatch_is_protocol_error() {
        let frame = plain_frame(&[1u8; 64]);
        let mut compressed = compress_frame(&frame).unwrap();
        compressed[PROTO_HEADER_SIZE + 7] ^= 1;
        assert!(matches!(
            inflate(&compressed[PROTO_HEADER_SIZE..]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_declared_size_is_protocol_error() {
        let frame = plain_frame(&[3u8; 64]);
        let mut compressed = compress_frame(&frame).unwrap();
        compressed[PROTO_HEADER_SIZE..PROTO_HEADER_SIZE + 8].copy_from_slice(&[0xFF; 8]);
        assert!(matches!(
            inflate(&compressed[PROTO_HEADER_SIZE..]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_stream_longer_than_declared_is_protocol_error() {
        let frame = plain_frame(&[5u8; 400]);
        let mut compressed = compress_frame(&frame).unwrap();
        compressed[PROTO_HEADER_SIZE..PROTO_HEADER_SIZE + 8].copy_from_slice(&16u64.to_be_bytes());
        assert!(matches!(
            inflate(&compressed[PROTO_HEADER_SIZE..]),
            Err(Error::Protocol(_))
        ));
    }
}
