//! Batch index field codec
//!
//! A batch request is one message whose only field is `BATCH_INDEX`:
//!
//! ```text
//! [count: u32 BE][flags: u8]
//! per entry:
//!   [index: u32 BE][digest: 20]
//!   [attr: u8]                        REPEAT: reuse the previous entry
//!   [info1][info2][info3]             unless REPEAT
//!   [info4]                           when attr has INFO4
//!   [generation: u16 BE]              when attr has GEN
//!   [ttl: u32 BE]                     when attr has TTL
//!   [n_fields: u16 BE][n_ops: u16 BE][fields][ops]
//! ```
//!
//! Entries are correlated with responses by `index`, the position of the key
//! in the caller's slice.

use crate::field::{self, Field};
use crate::op::{self, OpEntry};
use byteorder::{BigEndian, ByteOrder};
use meridian_core::{Digest, Error, Result, DIGEST_SIZE};

/// Entry attribute bits
pub mod attr {
    /// Same attributes, fields and ops as the previous entry
    pub const REPEAT: u8 = 1;
    /// info1..info3 follow
    pub const INFO: u8 = 2;
    /// Generation follows
    pub const GEN: u8 = 4;
    /// TTL follows
    pub const TTL: u8 = 8;
    /// info4 follows
    pub const INFO4: u8 = 16;
}

/// Batch field flag: server may process entries inline
pub const BATCH_ALLOW_INLINE: u8 = 1;
/// Batch field flag: respond for every key, even on errors
pub const BATCH_RESPOND_ALL_KEYS: u8 = 4;

/// Entry count and flags at the start of the payload
pub const BATCH_HEADER_SIZE: usize = 5;
/// Index and digest at the start of every entry
pub const ENTRY_HEADER_SIZE: usize = 4 + DIGEST_SIZE;

/// Per-entry attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryAttr {
    /// `info1`
    pub info1: u8,
    /// `info2`
    pub info2: u8,
    /// `info3`
    pub info3: u8,
    /// `info4` (transaction verify/roll bits)
    pub info4: u8,
    /// Expected generation
    pub generation: Option<u16>,
    /// Expiration
    pub ttl: Option<u32>,
}

impl EntryAttr {
    /// Attribute byte for a non-repeat entry
    pub fn flags(&self) -> u8 {
        let mut flags = attr::INFO;
        if self.info4 != 0 {
            flags |= attr::INFO4;
        }
        if self.generation.is_some() {
            flags |= attr::GEN;
        }
        if self.ttl.is_some() {
            flags |= attr::TTL;
        }
        flags
    }

    /// Encoded length of this attribute block, flags byte included
    pub fn encoded_len(&self) -> usize {
        1 + 3
            + (self.info4 != 0) as usize
            + self.generation.map_or(0, |_| 2)
            + self.ttl.map_or(0, |_| 4)
    }
}

/// Writer for the `BATCH_INDEX` payload
#[derive(Debug, Default)]
pub struct BatchWriter {
    buf: Vec<u8>,
    count: u32,
}

impl BatchWriter {
    /// Start a payload
    pub fn new(flags: u8) -> Self {
        BatchWriter::with_capacity(flags, 256)
    }

    /// Start a payload sized for `capacity` bytes
    pub fn with_capacity(flags: u8, capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity.max(BATCH_HEADER_SIZE));
        buf.extend_from_slice(&[0, 0, 0, 0, flags]);
        BatchWriter { buf, count: 0 }
    }

    /// Start an entry
    pub fn entry(&mut self, index: u32, digest: &Digest) {
        let mut head = [0u8; 4];
        BigEndian::write_u32(&mut head, index);
        self.buf.extend_from_slice(&head);
        self.buf.extend_from_slice(digest.as_bytes());
        self.count += 1;
    }

    /// Mark the current entry as a repeat of the previous one
    pub fn repeat(&mut self) {
        self.buf.push(attr::REPEAT);
    }

    /// Write attributes and counts for the current entry
    pub fn attrs(&mut self, attrs: &EntryAttr, n_fields: u16, n_ops: u16) {
        self.buf.push(attrs.flags());
        self.buf
            .extend_from_slice(&[attrs.info1, attrs.info2, attrs.info3]);
        if attrs.info4 != 0 {
            self.buf.push(attrs.info4);
        }
        if let Some(g) = attrs.generation {
            self.buf.extend_from_slice(&g.to_be_bytes());
        }
        if let Some(t) = attrs.ttl {
            self.buf.extend_from_slice(&t.to_be_bytes());
        }
        self.buf.extend_from_slice(&n_fields.to_be_bytes());
        self.buf.extend_from_slice(&n_ops.to_be_bytes());
    }

    /// Buffer for the current entry's field and op blocks
    pub fn body(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    /// Entries written so far
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Finished payload
    pub fn finish(mut self) -> Vec<u8> {
        BigEndian::write_u32(&mut self.buf[..4], self.count);
        self.buf
    }
}

/// One decoded batch entry; repeats are expanded
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    /// Caller slot
    pub index: u32,
    /// Key digest
    pub digest: Digest,
    /// Attributes
    pub attr: EntryAttr,
    /// Field blocks (namespace, set, transaction fields, UDF fields)
    pub fields: Vec<Field>,
    /// Op blocks
    pub ops: Vec<OpEntry>,
}

impl BatchEntry {
    /// First field of a type
    pub fn field(&self, field_type: u8) -> Option<&Field> {
        self.fields.iter().find(|f| f.field_type == field_type)
    }
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    let out = buf
        .get(*pos..*pos + n)
        .ok_or_else(|| Error::protocol("batch entry truncated"))?;
    *pos += n;
    Ok(out)
}

/// Decode a `BATCH_INDEX` payload into its flags and entries.
pub fn decode_batch_index(buf: &[u8]) -> Result<(u8, Vec<BatchEntry>)> {
    let mut pos = 0;
    let count = BigEndian::read_u32(take(buf, &mut pos, 4)?) as usize;
    let flags = take(buf, &mut pos, 1)?[0];
    let mut entries: Vec<BatchEntry> = Vec::with_capacity(count);

    for _ in 0..count {
        let index = BigEndian::read_u32(take(buf, &mut pos, 4)?);
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(take(buf, &mut pos, DIGEST_SIZE)?);
        let digest = Digest(digest);
        let bits = take(buf, &mut pos, 1)?[0];

        if bits & attr::REPEAT != 0 {
            let prev = entries
                .last()
                .ok_or_else(|| Error::protocol("batch repeat without a previous entry"))?;
            let entry = BatchEntry {
                index,
                digest,
                attr: prev.attr,
                fields: prev.fields.clone(),
                ops: prev.ops.clone(),
            };
            entries.push(entry);
            continue;
        }

        let info = take(buf, &mut pos, 3)?;
        let mut a = EntryAttr {
            info1: info[0],
            info2: info[1],
            info3: info[2],
            ..EntryAttr::default()
        };
        if bits & attr::INFO4 != 0 {
            a.info4 = take(buf, &mut pos, 1)?[0];
        }
        if bits & attr::GEN != 0 {
            a.generation = Some(BigEndian::read_u16(take(buf, &mut pos, 2)?));
        }
        if bits & attr::TTL != 0 {
            a.ttl = Some(BigEndian::read_u32(take(buf, &mut pos, 4)?));
        }
        let n_fields = BigEndian::read_u16(take(buf, &mut pos, 2)?);
        let n_ops = BigEndian::read_u16(take(buf, &mut pos, 2)?);

        let mut fields = Vec::with_capacity(n_fields as usize);
        for _ in 0..n_fields {
            let (f, next) = field::read_field(buf, pos)?;
            fields.push(f);
            pos = next;
        }
        let mut ops = Vec::with_capacity(n_ops as usize);
        for _ in 0..n_ops {
            let (o, next) = op::read_op(buf, pos)?;
            ops.push(o);
            pos = next;
        }
        entries.push(BatchEntry {
            index,
            digest,
            attr: a,
            fields,
            ops,
        });
    }
    Ok((flags, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{field_type, write_str_field};
    use meridian_core::{Operation, Key};

    #[test]
    fn test_entries_with_repeat() {
        let k0 = Key::new("test", "s", 0i64).unwrap();
        let k1 = Key::new("test", "s", 1i64).unwrap();
        let attrs = EntryAttr {
            info1: 1,
            ttl: Some(30),
            ..EntryAttr::default()
        };

        let mut w = BatchWriter::new(BATCH_RESPOND_ALL_KEYS);
        w.entry(0, k0.digest());
        w.attrs(&attrs, 1, 1);
        write_str_field(w.body(), field_type::NAMESPACE, "test");
        op::write_op(w.body(), &Operation::get()).unwrap();
        w.entry(5, k1.digest());
        w.repeat();
        let payload = w.finish();

        let (flags, entries) = decode_batch_index(&payload).unwrap();
        assert_eq!(flags, BATCH_RESPOND_ALL_KEYS);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].index, 5);
        assert_eq!(entries[1].digest, *k1.digest());
        assert_eq!(entries[1].attr, attrs);
        assert_eq!(
            entries[1].field(field_type::NAMESPACE).unwrap().as_str().unwrap(),
            "test"
        );
        assert_eq!(entries[1].ops.len(), 1);
    }

    #[test]
    fn test_attr_len_matches_encoding() {
        let attrs = EntryAttr {
            info4: 2,
            generation: Some(3),
            ttl: Some(1),
            ..EntryAttr::default()
        };
        let mut w = BatchWriter::new(0);
        let before = w.body().len();
        w.attrs(&attrs, 0, 0);
        assert_eq!(w.body().len() - before, attrs.encoded_len() + 4);
    }

    #[test]
    fn test_leading_repeat_is_protocol_error() {
        let mut w = BatchWriter::new(0);
        w.entry(0, &Digest([0; DIGEST_SIZE]));
        w.repeat();
        assert!(decode_batch_index(&w.finish()).is_err());
    }
}
