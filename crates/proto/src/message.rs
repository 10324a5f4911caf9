//! Message building and decoding
//!
//! [`MessageBuilder`] assembles one message (header, field blocks, op blocks)
//! and frames it. [`Message`] is the decoded form of one message read from a
//! response body; a body may hold several messages back to back (batch
//! responses).

use crate::compress::{compress_frame, COMPRESS_THRESHOLD};
use crate::field::{self, field_type, Field};
use crate::header::{info1, info2, info3, MessageHeader, ProtoHeader, MSG_HEADER_SIZE};
use crate::op::{self, OpEntry};
use crate::particle;
use meridian_core::{
    policy::{CommitLevel, GenerationPolicy, ReadModeSc, RecordExistsAction},
    BasePolicy, Error, Key, Operation, OperationType, Record, Result, ResultCode, Value,
    WritePolicy,
};
use smallvec::SmallVec;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

// ============================================================================
// Building
// ============================================================================

/// Builder for one message
#[derive(Debug, Default, Clone)]
pub struct MessageBuilder {
    /// Header; field and op counts are filled in by `finish`
    pub header: MessageHeader,
    fields: Vec<u8>,
    n_fields: u16,
    ops: Vec<u8>,
    n_ops: u16,
}

impl MessageBuilder {
    /// Empty message
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw field
    pub fn field(&mut self, field_type: u8, data: &[u8]) -> &mut Self {
        field::write_field(&mut self.fields, field_type, data);
        self.n_fields += 1;
        self
    }

    /// Namespace, set, digest and (optionally) the user key
    pub fn key_fields(&mut self, key: &Key, send_key: bool) -> Result<&mut Self> {
        self.field(field_type::NAMESPACE, key.namespace().as_bytes());
        if !key.set_name().is_empty() {
            self.field(field_type::SET, key.set_name().as_bytes());
        }
        self.field(field_type::DIGEST, key.digest().as_bytes());
        if send_key {
            if let Some(user_key) = key.user_key() {
                let mut data = vec![user_key.particle_type() as u8];
                data.extend_from_slice(&particle::encode(user_key)?);
                self.field(field_type::KEY, &data);
            }
        }
        Ok(self)
    }

    /// Transaction id, read version and deadline fields
    pub fn txn_fields(&mut self, id: u64, version: Option<u64>, deadline: Option<u32>) -> &mut Self {
        self.field(field_type::MRT_ID, &id.to_le_bytes());
        if let Some(v) = version {
            self.field(field_type::RECORD_VERSION, &field::encode_version(v));
        }
        if let Some(d) = deadline {
            self.field(field_type::MRT_DEADLINE, &d.to_le_bytes());
        }
        self
    }

    /// UDF package, function and msgpack argument list
    pub fn udf_fields(&mut self, package: &str, function: &str, args: &[Value]) -> Result<&mut Self> {
        self.field(field_type::UDF_PACKAGE_NAME, package.as_bytes());
        self.field(field_type::UDF_FUNCTION, function.as_bytes());
        let arglist = particle::msgpack(&Value::List(args.to_vec()))?;
        self.field(field_type::UDF_ARGLIST, &arglist);
        Ok(self)
    }

    /// Append an operation
    pub fn op(&mut self, op: &Operation) -> Result<&mut Self> {
        op::write_op(&mut self.ops, op)?;
        self.n_ops += 1;
        Ok(self)
    }

    /// Append op blocks encoded elsewhere
    pub fn encoded_ops(&mut self, ops: &[u8], count: u16) -> &mut Self {
        self.ops.extend_from_slice(ops);
        self.n_ops += count;
        self
    }

    /// Append a bin as returned in a response
    pub fn bin(&mut self, name: &str, value: &Value) -> Result<&mut Self> {
        let payload = particle::encode(value)?;
        op::write_raw_op(
            &mut self.ops,
            OperationType::Read.code(),
            value.particle_type() as u8,
            name,
            &payload,
        )?;
        self.n_ops += 1;
        Ok(self)
    }

    /// Read attributes from a base policy.
    ///
    /// `all_bins` asks for every bin; `header_only` asks for metadata only.
    pub fn read_attrs(&mut self, policy: &BasePolicy, all_bins: bool, header_only: bool) -> &mut Self {
        self.header.info1 |= info1::READ;
        if header_only {
            self.header.info1 |= info1::NOBINDATA;
        } else if all_bins {
            self.header.info1 |= info1::GET_ALL;
        }
        self.sc_and_compression(policy);
        self.header.batch_index = server_timeout(policy);
        self
    }

    /// Write attributes from a write policy
    pub fn write_attrs(&mut self, policy: &WritePolicy) -> &mut Self {
        self.header.info2 |= info2::WRITE;
        match policy.generation_policy {
            GenerationPolicy::None => {}
            GenerationPolicy::ExpectGenEqual => {
                self.header.generation = policy.generation;
                self.header.info2 |= info2::GENERATION;
            }
            GenerationPolicy::ExpectGenGt => {
                self.header.generation = policy.generation;
                self.header.info2 |= info2::GENERATION_GT;
            }
        }
        match policy.record_exists_action {
            RecordExistsAction::Update => {}
            RecordExistsAction::UpdateOnly => self.header.info3 |= info3::UPDATE_ONLY,
            RecordExistsAction::Replace => self.header.info3 |= info3::CREATE_OR_REPLACE,
            RecordExistsAction::ReplaceOnly => self.header.info3 |= info3::REPLACE_ONLY,
            RecordExistsAction::CreateOnly => self.header.info2 |= info2::CREATE_ONLY,
        }
        if policy.durable_delete {
            self.header.info2 |= info2::DURABLE_DELETE;
        }
        if policy.respond_per_each_op {
            self.header.info2 |= info2::RESPOND_ALL_OPS;
        }
        if policy.commit_level == CommitLevel::CommitMaster {
            self.header.info3 |= info3::COMMIT_MASTER;
        }
        self.header.expiration = policy.expiration.as_u32();
        if policy.base.use_compression {
            self.header.info1 |= info1::COMPRESS_RESPONSE;
        }
        self.header.batch_index = server_timeout(&policy.base);
        self
    }

    fn sc_and_compression(&mut self, policy: &BasePolicy) {
        match policy.read_mode_sc {
            ReadModeSc::Session => {}
            ReadModeSc::Linearize => self.header.info1 |= info1::READ_MODE_SC_LINEARIZE,
            ReadModeSc::AllowReplica | ReadModeSc::AllowUnavailable => {
                self.header.info3 |= info3::SC_READ_RELAX
            }
        }
        if policy.use_compression {
            self.header.info1 |= info1::COMPRESS_RESPONSE;
        }
    }

    /// Encoded message without a proto header
    pub fn finish_message(mut self) -> Vec<u8> {
        self.header.n_fields = self.n_fields;
        self.header.n_ops = self.n_ops;
        let mut out = Vec::with_capacity(MSG_HEADER_SIZE + self.fields.len() + self.ops.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.fields);
        out.extend_from_slice(&self.ops);
        out
    }

    /// Complete frame, compressed when asked and large enough
    pub fn finish(self, compress: bool) -> Result<Vec<u8>> {
        let frame = frame(&self.finish_message());
        if compress && frame.len() > COMPRESS_THRESHOLD {
            return compress_frame(&frame);
        }
        Ok(frame)
    }
}

fn server_timeout(policy: &BasePolicy) -> u32 {
    policy.total_timeout.as_millis().min(u32::MAX as u128) as u32
}

/// Prefix a body with a plain proto header
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&ProtoHeader::message(body.len()).encode());
    out.extend_from_slice(body);
    out
}

// ============================================================================
// Decoding
// ============================================================================

/// One decoded message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Header
    pub header: MessageHeader,
    /// Field blocks
    pub fields: SmallVec<[Field; 4]>,
    /// Op blocks
    pub ops: Vec<OpEntry>,
}

impl Message {
    /// Decode one message starting at `offset`; returns it and the next offset.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when any block runs past the buffer.
    pub fn decode(buf: &[u8], offset: usize) -> Result<(Message, usize)> {
        let head = buf
            .get(offset..)
            .ok_or_else(|| Error::protocol("message offset past end of body"))?;
        let header = MessageHeader::decode(head)?;
        let mut pos = offset + MSG_HEADER_SIZE;
        let mut fields = SmallVec::new();
        for _ in 0..header.n_fields {
            let (f, next) = field::read_field(buf, pos)?;
            fields.push(f);
            pos = next;
        }
        let mut ops = Vec::with_capacity(header.n_ops as usize);
        for _ in 0..header.n_ops {
            let (o, next) = op::read_op(buf, pos)?;
            ops.push(o);
            pos = next;
        }
        Ok((
            Message {
                header,
                fields,
                ops,
            },
            pos,
        ))
    }

    /// Decode every message in a body
    pub fn decode_all(buf: &[u8]) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let (m, next) = Message::decode(buf, pos)?;
            out.push(m);
            pos = next;
        }
        Ok(out)
    }

    /// Result code
    pub fn result_code(&self) -> ResultCode {
        self.header.result_code()
    }

    /// First field of a type
    pub fn field(&self, field_type: u8) -> Option<&Field> {
        self.fields.iter().find(|f| f.field_type == field_type)
    }

    /// Record version returned for transactional commands
    pub fn version(&self) -> Result<Option<u64>> {
        self.field(field_type::RECORD_VERSION)
            .map(|f| field::decode_version(&f.data))
            .transpose()
    }

    /// Transaction deadline returned by the monitor record
    pub fn deadline(&self) -> Result<Option<u32>> {
        self.field(field_type::MRT_DEADLINE)
            .map(|f| field::decode_deadline(&f.data))
            .transpose()
    }

    /// Build a record from the op blocks.
    ///
    /// With `merge_lists`, a bin name that appears more than once yields a
    /// list of its values in op order.
    pub fn record(&self, merge_lists: bool) -> Result<Record> {
        let mut bins: HashMap<String, Value> = HashMap::with_capacity(self.ops.len());
        let mut merged: HashSet<String> = HashSet::new();
        for entry in &self.ops {
            let value = entry.value()?;
            if !merge_lists {
                bins.insert(entry.name.clone(), value);
                continue;
            }
            match bins.entry(entry.name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                Entry::Occupied(mut slot) => {
                    if merged.contains(&entry.name) {
                        if let Value::List(items) = slot.get_mut() {
                            items.push(value);
                        }
                    } else {
                        let prev = std::mem::replace(slot.get_mut(), Value::Nil);
                        *slot.get_mut() = Value::List(vec![prev, value]);
                        merged.insert(entry.name.clone());
                    }
                }
            }
        }
        Ok(Record::new(
            bins,
            self.header.generation,
            self.header.expiration,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::PROTO_HEADER_SIZE;
    use meridian_core::Bin;

    #[test]
    fn test_builder_counts_and_frame() {
        let key = Key::new("test", "s", 1i64).unwrap();
        let mut b = MessageBuilder::new();
        b.key_fields(&key, true).unwrap();
        b.op(&Operation::put(Bin::new("a", 1i64))).unwrap();
        let frame = b.finish(false).unwrap();

        let proto = ProtoHeader::decode(&frame).unwrap();
        assert_eq!(proto.size as usize, frame.len() - PROTO_HEADER_SIZE);
        let (msg, end) = Message::decode(&frame[PROTO_HEADER_SIZE..], 0).unwrap();
        assert_eq!(end, frame.len() - PROTO_HEADER_SIZE);
        assert_eq!(msg.header.n_fields, 4);
        assert_eq!(msg.header.n_ops, 1);
        assert_eq!(
            msg.field(field_type::DIGEST).unwrap().data,
            key.digest().as_bytes().to_vec()
        );
    }

    #[test]
    fn test_write_attrs() {
        let policy = WritePolicy {
            record_exists_action: RecordExistsAction::CreateOnly,
            generation_policy: GenerationPolicy::ExpectGenEqual,
            generation: 4,
            durable_delete: true,
            ..WritePolicy::default()
        };
        let mut b = MessageBuilder::new();
        b.write_attrs(&policy);
        assert_eq!(
            b.header.info2,
            info2::WRITE | info2::GENERATION | info2::CREATE_ONLY | info2::DURABLE_DELETE
        );
        assert_eq!(b.header.generation, 4);
    }

    #[test]
    fn test_record_list_merge_preserves_order() {
        let mut b = MessageBuilder::new();
        b.bin("l", &Value::Int(1)).unwrap();
        b.bin("x", &Value::from("s")).unwrap();
        b.bin("l", &Value::Int(2)).unwrap();
        b.bin("l", &Value::Int(3)).unwrap();
        let body = b.finish_message();
        let (msg, _) = Message::decode(&body, 0).unwrap();

        let merged = msg.record(true).unwrap();
        assert_eq!(
            merged.get("l"),
            Some(&Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
        );
        assert_eq!(merged.get("x"), Some(&Value::from("s")));

        let last_wins = msg.record(false).unwrap();
        assert_eq!(last_wins.get("l"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_txn_fields_round_trip() {
        let mut b = MessageBuilder::new();
        b.txn_fields(99, Some(12345), Some(600));
        let (msg, _) = Message::decode(&b.finish_message(), 0).unwrap();
        assert_eq!(msg.version().unwrap(), Some(12345));
        assert_eq!(msg.deadline().unwrap(), Some(600));
        assert_eq!(
            msg.field(field_type::MRT_ID).unwrap().data,
            99u64.to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_decode_all_batch_body() {
        let mut body = Vec::new();
        for i in 0..3u32 {
            let mut b = MessageBuilder::new();
            b.header.batch_index = i;
            body.extend(b.finish_message());
        }
        let mut last = MessageBuilder::new();
        last.header.info3 = info3::LAST;
        body.extend(last.finish_message());

        let msgs = Message::decode_all(&body).unwrap();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[2].header.batch_index, 2);
        assert!(msgs[3].header.is_last());
    }

    #[test]
    fn test_compressed_finish() {
        let mut b = MessageBuilder::new();
        b.op(&Operation::put(Bin::new("big", "x".repeat(400)))).unwrap();
        let frame = b.finish(true).unwrap();
        assert!(ProtoHeader::decode(&frame).unwrap().is_compressed());
    }
}
