//! Request encoding
//!
//! Every batch record is turned into an [`Entry`]: the attribute block, the
//! fields after the key identity and the encoded op blocks. The same entry
//! feeds both the batch index payload and the plain single-key message used
//! when a node owns only one key.

use crate::record::{BatchOperation, BatchRecord, ReadBins};
use meridian_core::{
    BatchDeletePolicy, BatchPolicy, BatchUdfPolicy, BatchWritePolicy, CommitLevel, Error,
    GenerationPolicy, Key, Operation, OperationType, ReadModeSc, RecordExistsAction, Result, Txn,
    Value,
};
use meridian_executor::commands::operate::OperateFlags;
use meridian_proto::batch::{
    BATCH_ALLOW_INLINE, BATCH_HEADER_SIZE, BATCH_RESPOND_ALL_KEYS, ENTRY_HEADER_SIZE,
};
use meridian_proto::field::{self, FIELD_HEADER_SIZE};
use meridian_proto::{
    field_type, info1, info2, info3, info4, op, particle, BatchWriter, EntryAttr, MessageBuilder,
};

/// Transaction pass a batch runs for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnPass {
    /// Check read versions
    Verify,
    /// Make the transaction's writes permanent
    RollForward,
    /// Undo the transaction's writes
    RollBack,
}

/// Everything an entry needs besides its record
#[derive(Clone, Copy)]
pub(crate) struct EntryContext<'a> {
    pub policy: &'a BatchPolicy,
    pub txn: Option<&'a Txn>,
    pub pass: Option<TxnPass>,
}

impl EntryContext<'_> {
    /// Repeat markers carry no per-key fields, so transactions send full entries
    fn allows_repeat(&self) -> bool {
        self.txn.is_none() && self.pass.is_none()
    }
}

/// One encoded key
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Entry {
    pub attr: EntryAttr,
    pub user_key: Option<Vec<u8>>,
    pub fields: Vec<(u8, Vec<u8>)>,
    pub ops: Vec<u8>,
    pub n_ops: u16,
}

impl Entry {
    fn new(attr: EntryAttr) -> Self {
        Entry {
            attr,
            user_key: None,
            fields: Vec::new(),
            ops: Vec::new(),
            n_ops: 0,
        }
    }

    /// Encode `record` for `ctx`
    pub fn build(record: &BatchRecord, ctx: &EntryContext<'_>) -> Result<Entry> {
        if let (Some(pass), Some(txn)) = (ctx.pass, ctx.txn) {
            return Ok(txn_entry(&record.key, pass, txn));
        }
        let mut entry = match &record.op {
            BatchOperation::Read { policy, bins } => {
                let mode = policy
                    .as_ref()
                    .map_or(ctx.policy.base.read_mode_sc, |p| p.read_mode_sc);
                let mut entry = read_entry(bins, mode)?;
                entry.set_user_key(&record.key, ctx.policy.base.send_key)?;
                entry
            }
            BatchOperation::Write { policy, ops } => {
                let default = BatchWritePolicy::default();
                let p = policy.as_deref().unwrap_or(&default);
                let mut entry = write_entry(p, ops)?;
                entry.set_user_key(&record.key, p.send_key)?;
                entry
            }
            BatchOperation::Delete { policy } => {
                let default = BatchDeletePolicy::default();
                let p = policy.as_deref().unwrap_or(&default);
                let mut entry = delete_entry(p);
                entry.set_user_key(&record.key, p.send_key)?;
                entry
            }
            BatchOperation::Udf { policy, call } => {
                let default = BatchUdfPolicy::default();
                let p = policy.as_deref().unwrap_or(&default);
                let mut entry = udf_entry(p);
                entry.set_user_key(&record.key, p.send_key)?;
                entry.fields.push((
                    field_type::UDF_PACKAGE_NAME,
                    call.package.as_bytes().to_vec(),
                ));
                entry
                    .fields
                    .push((field_type::UDF_FUNCTION, call.function.as_bytes().to_vec()));
                entry.fields.push((
                    field_type::UDF_ARGLIST,
                    particle::msgpack(&Value::List(call.args.clone()))?,
                ));
                entry
            }
        };
        if let Some(txn) = ctx.txn {
            entry.txn_fields(txn, &record.key, record.has_write);
        }
        Ok(entry)
    }

    fn set_user_key(&mut self, key: &Key, send_key: bool) -> Result<()> {
        if let (true, Some(user_key)) = (send_key, key.user_key()) {
            let mut data = vec![user_key.particle_type() as u8];
            data.extend_from_slice(&particle::encode(user_key)?);
            self.user_key = Some(data);
        }
        Ok(())
    }

    fn txn_fields(&mut self, txn: &Txn, key: &Key, is_write: bool) {
        self.fields
            .push((field_type::MRT_ID, txn.id().to_le_bytes().to_vec()));
        if let Some(v) = txn.read_version(key.digest()) {
            self.fields
                .push((field_type::RECORD_VERSION, field::encode_version(v).to_vec()));
        }
        let deadline = txn.deadline();
        if is_write && deadline != 0 {
            self.fields
                .push((field_type::MRT_DEADLINE, deadline.to_le_bytes().to_vec()));
        }
    }

    fn push_op(&mut self, operation: &Operation) -> Result<()> {
        op::write_op(&mut self.ops, operation)?;
        self.n_ops = self
            .n_ops
            .checked_add(1)
            .ok_or_else(|| Error::InvalidArgument("too many operations for one key".into()))?;
        Ok(())
    }

    fn field_count(&self, key: &Key) -> u16 {
        let identity = 1 + !key.set_name().is_empty() as usize + self.user_key.is_some() as usize;
        (identity + self.fields.len()) as u16
    }

    /// Bytes this entry takes in a batch payload, index and digest included
    pub fn wire_size(&self, key: &Key) -> usize {
        let mut size = ENTRY_HEADER_SIZE + self.attr.encoded_len() + 4;
        size += FIELD_HEADER_SIZE + key.namespace().len();
        if !key.set_name().is_empty() {
            size += FIELD_HEADER_SIZE + key.set_name().len();
        }
        if let Some(k) = &self.user_key {
            size += FIELD_HEADER_SIZE + k.len();
        }
        size += self
            .fields
            .iter()
            .map(|(_, data)| FIELD_HEADER_SIZE + data.len())
            .sum::<usize>();
        size + self.ops.len()
    }

    /// Append attributes, fields and ops after `BatchWriter::entry`
    pub fn write_to(&self, w: &mut BatchWriter, key: &Key) {
        w.attrs(&self.attr, self.field_count(key), self.n_ops);
        let body = w.body();
        field::write_str_field(body, field_type::NAMESPACE, key.namespace());
        if !key.set_name().is_empty() {
            field::write_str_field(body, field_type::SET, key.set_name());
        }
        if let Some(k) = &self.user_key {
            field::write_field(body, field_type::KEY, k);
        }
        for (t, data) in &self.fields {
            field::write_field(body, *t, data);
        }
        body.extend_from_slice(&self.ops);
    }

    /// Plain single-key request carrying the same attributes, fields and ops
    pub fn single_request(&self, key: &Key, policy: &BatchPolicy) -> Result<Vec<u8>> {
        let mut b = MessageBuilder::new();
        b.header.info1 = self.attr.info1 | compress_bit(policy);
        b.header.info2 = self.attr.info2;
        b.header.info3 = self.attr.info3;
        b.header.info4 = self.attr.info4;
        if let Some(g) = self.attr.generation {
            b.header.generation = g as u32;
        }
        if let Some(ttl) = self.attr.ttl {
            b.header.expiration = ttl;
        }
        b.header.batch_index = server_timeout(policy);
        b.key_fields(key, false)?;
        if let Some(k) = &self.user_key {
            b.field(field_type::KEY, k);
        }
        for (t, data) in &self.fields {
            b.field(*t, data);
        }
        b.encoded_ops(&self.ops, self.n_ops);
        b.finish(policy.base.use_compression)
    }
}

// ============================================================================
// Attributes per operation
// ============================================================================

fn read_mode_bits(attr: &mut EntryAttr, mode: ReadModeSc) {
    match mode {
        ReadModeSc::Session => {}
        ReadModeSc::Linearize => attr.info1 |= info1::READ_MODE_SC_LINEARIZE,
        ReadModeSc::AllowReplica | ReadModeSc::AllowUnavailable => {
            attr.info3 |= info3::SC_READ_RELAX
        }
    }
}

fn read_entry(bins: &ReadBins, mode: ReadModeSc) -> Result<Entry> {
    let mut entry = Entry::new(EntryAttr {
        info1: info1::READ,
        ..EntryAttr::default()
    });
    read_mode_bits(&mut entry.attr, mode);
    match bins {
        ReadBins::All => entry.attr.info1 |= info1::GET_ALL,
        ReadBins::Header => entry.attr.info1 |= info1::NOBINDATA,
        ReadBins::Names(names) => {
            for name in names.iter() {
                entry.push_op(&Operation::get_bin(name.as_str()))?;
            }
        }
        ReadBins::Ops(ops) => {
            entry.attr.info1 |= OperateFlags::of(ops).info1();
            for o in ops.iter().filter(|o| o.op_type != OperationType::ReadHeader) {
                entry.push_op(o)?;
            }
        }
    }
    Ok(entry)
}

fn generation_bits(attr: &mut EntryAttr, policy: GenerationPolicy, generation: u32) {
    match policy {
        GenerationPolicy::None => {}
        GenerationPolicy::ExpectGenEqual => {
            attr.info2 |= info2::GENERATION;
            attr.generation = Some(generation as u16);
        }
        GenerationPolicy::ExpectGenGt => {
            attr.info2 |= info2::GENERATION_GT;
            attr.generation = Some(generation as u16);
        }
    }
}

fn durability_bits(attr: &mut EntryAttr, durable_delete: bool, commit_level: CommitLevel) {
    if durable_delete {
        attr.info2 |= info2::DURABLE_DELETE;
    }
    if commit_level == CommitLevel::CommitMaster {
        attr.info3 |= info3::COMMIT_MASTER;
    }
}

fn write_entry(policy: &BatchWritePolicy, ops: &[Operation]) -> Result<Entry> {
    let mut entry = Entry::new(EntryAttr {
        info1: OperateFlags::of(ops).info1(),
        info2: info2::WRITE | info2::RESPOND_ALL_OPS,
        ttl: Some(policy.expiration.as_u32()),
        ..EntryAttr::default()
    });
    match policy.record_exists_action {
        RecordExistsAction::Update => {}
        RecordExistsAction::UpdateOnly => entry.attr.info3 |= info3::UPDATE_ONLY,
        RecordExistsAction::Replace => entry.attr.info3 |= info3::CREATE_OR_REPLACE,
        RecordExistsAction::ReplaceOnly => entry.attr.info3 |= info3::REPLACE_ONLY,
        RecordExistsAction::CreateOnly => entry.attr.info2 |= info2::CREATE_ONLY,
    }
    generation_bits(&mut entry.attr, policy.generation_policy, policy.generation);
    durability_bits(&mut entry.attr, policy.durable_delete, policy.commit_level);
    for o in ops.iter().filter(|o| o.op_type != OperationType::ReadHeader) {
        entry.push_op(o)?;
    }
    Ok(entry)
}

fn delete_entry(policy: &BatchDeletePolicy) -> Entry {
    let mut entry = Entry::new(EntryAttr {
        info2: info2::WRITE | info2::DELETE | info2::RESPOND_ALL_OPS,
        ..EntryAttr::default()
    });
    generation_bits(&mut entry.attr, policy.generation_policy, policy.generation);
    durability_bits(&mut entry.attr, policy.durable_delete, policy.commit_level);
    entry
}

fn udf_entry(policy: &BatchUdfPolicy) -> Entry {
    let mut entry = Entry::new(EntryAttr {
        info2: info2::WRITE,
        ttl: Some(policy.expiration.as_u32()),
        ..EntryAttr::default()
    });
    durability_bits(&mut entry.attr, policy.durable_delete, policy.commit_level);
    entry
}

fn txn_entry(key: &Key, pass: TxnPass, txn: &Txn) -> Entry {
    match pass {
        TxnPass::Verify => {
            let mut entry = Entry::new(EntryAttr {
                info1: info1::READ | info1::NOBINDATA,
                info3: info3::SC_READ_RELAX,
                info4: info4::MRT_VERIFY_READ,
                ..EntryAttr::default()
            });
            if let Some(v) = txn.read_version(key.digest()) {
                entry
                    .fields
                    .push((field_type::RECORD_VERSION, field::encode_version(v).to_vec()));
            }
            entry
        }
        TxnPass::RollForward | TxnPass::RollBack => {
            let bit = if pass == TxnPass::RollForward {
                info4::MRT_ROLL_FORWARD
            } else {
                info4::MRT_ROLL_BACK
            };
            let mut entry = Entry::new(EntryAttr {
                info2: info2::WRITE | info2::DURABLE_DELETE,
                info4: bit,
                ..EntryAttr::default()
            });
            entry
                .fields
                .push((field_type::MRT_ID, txn.id().to_le_bytes().to_vec()));
            entry
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

fn compress_bit(policy: &BatchPolicy) -> u8 {
    if policy.base.use_compression {
        info1::COMPRESS_RESPONSE
    } else {
        0
    }
}

fn server_timeout(policy: &BatchPolicy) -> u32 {
    policy.base.total_timeout.as_millis().min(u32::MAX as u128) as u32
}

/// Whether `cur` can be sent as a repeat of `prev`
fn repeats(prev: &BatchRecord, cur: &BatchRecord) -> bool {
    prev.key.namespace() == cur.key.namespace()
        && prev.key.set_name() == cur.key.set_name()
        && prev.op.same_as(&cur.op)
}

/// Batch request for `offsets` of `records`
pub(crate) fn batch_request(
    records: &[BatchRecord],
    offsets: &[usize],
    ctx: &EntryContext<'_>,
) -> Result<Vec<u8>> {
    let mut entries: Vec<Option<Entry>> = Vec::with_capacity(offsets.len());
    let mut size = BATCH_HEADER_SIZE;
    let mut prev: Option<(&BatchRecord, bool)> = None;

    for &i in offsets {
        let record = &records[i];
        let repeat = match prev {
            Some((p, sends_key)) => ctx.allows_repeat() && !sends_key && repeats(p, record),
            None => false,
        };
        if repeat {
            size += ENTRY_HEADER_SIZE + 1;
            entries.push(None);
            prev = prev.map(|(_, sends_key)| (record, sends_key));
        } else {
            let entry = Entry::build(record, ctx)?;
            size += entry.wire_size(&record.key);
            prev = Some((record, entry.user_key.is_some()));
            entries.push(Some(entry));
        }
    }

    let mut w = BatchWriter::with_capacity(BATCH_ALLOW_INLINE | BATCH_RESPOND_ALL_KEYS, size);
    for (&i, entry) in offsets.iter().zip(&entries) {
        let record = &records[i];
        let index = u32::try_from(i)
            .map_err(|_| Error::InvalidArgument(format!("batch index {} out of range", i)))?;
        w.entry(index, record.key.digest());
        match entry {
            Some(e) => e.write_to(&mut w, &record.key),
            None => w.repeat(),
        }
    }
    let payload = w.finish();
    debug_assert_eq!(payload.len(), size);

    let mut b = MessageBuilder::new();
    b.header.info1 = info1::BATCH | compress_bit(ctx.policy);
    b.header.batch_index = server_timeout(ctx.policy);
    b.field(field_type::BATCH_INDEX, &payload);
    b.finish(ctx.policy.base.use_compression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::Bin;
    use meridian_proto::{decode_batch_index, Message, PROTO_HEADER_SIZE};
    use std::sync::Arc;

    fn key(i: i64) -> Key {
        Key::new("test", "s", i).unwrap()
    }

    fn ctx(policy: &BatchPolicy) -> EntryContext<'_> {
        EntryContext {
            policy,
            txn: None,
            pass: None,
        }
    }

    fn payload(request: &[u8]) -> Vec<u8> {
        let (msg, _) = Message::decode(&request[PROTO_HEADER_SIZE..], 0).unwrap();
        assert_ne!(msg.header.info1 & info1::BATCH, 0);
        msg.field(field_type::BATCH_INDEX).unwrap().data.clone()
    }

    #[test]
    fn test_shared_ops_repeat() {
        let ops: Arc<[Operation]> = vec![Operation::put(Bin::new("a", 1i64))].into();
        let records: Vec<_> = (0..3)
            .map(|i| BatchRecord::write(key(i), Arc::clone(&ops)))
            .collect();
        let policy = BatchPolicy::default();
        let request = batch_request(&records, &[0, 1, 2], &ctx(&policy)).unwrap();
        let payload = payload(&request);

        let first = Entry::build(&records[0], &ctx(&policy)).unwrap();
        let expected = BATCH_HEADER_SIZE + first.wire_size(&records[0].key) + 2 * (ENTRY_HEADER_SIZE + 1);
        assert_eq!(payload.len(), expected);

        let (_, entries) = decode_batch_index(&payload).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].index, 2);
        assert_eq!(entries[2].ops.len(), 1);
        assert_eq!(entries[2].attr.info2 & info2::WRITE, info2::WRITE);
    }

    #[test]
    fn test_different_sets_do_not_repeat() {
        let a = BatchRecord::read(key(0), ReadBins::All);
        let b = BatchRecord::read(Key::new("test", "other", 1i64).unwrap(), ReadBins::All);
        let policy = BatchPolicy::default();
        let request = batch_request(&[a.clone(), b.clone()], &[0, 1], &ctx(&policy)).unwrap();
        let payload = payload(&request);
        let c = ctx(&policy);
        let expected = BATCH_HEADER_SIZE
            + Entry::build(&a, &c).unwrap().wire_size(&a.key)
            + Entry::build(&b, &c).unwrap().wire_size(&b.key);
        assert_eq!(payload.len(), expected);
        let (_, entries) = decode_batch_index(&payload).unwrap();
        assert_eq!(entries[1].field(field_type::SET).unwrap().as_str().unwrap(), "other");
    }

    #[test]
    fn test_transaction_disables_repeat() {
        let txn = Txn::new();
        let records: Vec<_> = (0..2)
            .map(|i| BatchRecord::read(key(i), ReadBins::All))
            .collect();
        let policy = BatchPolicy::default();
        let c = EntryContext {
            policy: &policy,
            txn: Some(&txn),
            pass: None,
        };
        let request = batch_request(&records, &[0, 1], &c).unwrap();
        let (_, entries) = decode_batch_index(&payload(&request)).unwrap();
        for e in &entries {
            let id = e.field(field_type::MRT_ID).unwrap();
            assert_eq!(id.data, txn.id().to_le_bytes().to_vec());
        }
    }

    #[test]
    fn test_roll_entries() {
        let txn = Txn::new();
        let records = vec![BatchRecord::write(key(0), Vec::<Operation>::new().into())];
        let policy = BatchPolicy::txn_roll();
        let c = EntryContext {
            policy: &policy,
            txn: Some(&txn),
            pass: Some(TxnPass::RollBack),
        };
        let entry = Entry::build(&records[0], &c).unwrap();
        assert_eq!(entry.attr.info4, info4::MRT_ROLL_BACK);
        assert_eq!(entry.attr.info2, info2::WRITE | info2::DURABLE_DELETE);
        assert_eq!(entry.n_ops, 0);
        assert_eq!(entry.fields[0].0, field_type::MRT_ID);
    }

    #[test]
    fn test_verify_entry_carries_version() {
        let txn = Txn::new();
        txn.on_read(&key(0), Some(77));
        let record = BatchRecord::read(key(0), ReadBins::Header);
        let policy = BatchPolicy::txn_verify();
        let c = EntryContext {
            policy: &policy,
            txn: Some(&txn),
            pass: Some(TxnPass::Verify),
        };
        let entry = Entry::build(&record, &c).unwrap();
        assert_eq!(entry.attr.info4, info4::MRT_VERIFY_READ);
        assert_eq!(
            entry.fields,
            vec![(field_type::RECORD_VERSION, field::encode_version(77).to_vec())]
        );
    }

    #[test]
    fn test_single_request_matches_entry() {
        let policy = Arc::new(BatchWritePolicy {
            generation_policy: GenerationPolicy::ExpectGenEqual,
            generation: 4,
            send_key: true,
            ..BatchWritePolicy::default()
        });
        let ops: Arc<[Operation]> = vec![Operation::put(Bin::new("a", 1i64))].into();
        let record = BatchRecord::write_with(key(9), policy, ops);
        let batch_policy = BatchPolicy::default();
        let entry = Entry::build(&record, &ctx(&batch_policy)).unwrap();
        let request = entry.single_request(&record.key, &batch_policy).unwrap();

        let (msg, _) = Message::decode(&request[PROTO_HEADER_SIZE..], 0).unwrap();
        assert_eq!(msg.header.info2 & info2::GENERATION, info2::GENERATION);
        assert_eq!(msg.header.generation, 4);
        assert!(msg.field(field_type::DIGEST).is_some());
        assert!(msg.field(field_type::KEY).is_some());
        assert_eq!(msg.ops.len(), 1);
    }

    #[test]
    fn test_read_names_become_ops() {
        let record = BatchRecord::read(key(1), ReadBins::names(&["a", "b"]));
        let policy = BatchPolicy::default();
        let entry = Entry::build(&record, &ctx(&policy)).unwrap();
        assert_eq!(entry.n_ops, 2);
        assert_eq!(entry.attr.info1, info1::READ);
    }
}
