//! In-memory server
//!
//! Decodes request frames, applies them to a record map and encodes the
//! responses. Covers single-record reads, writes, deletes and UDF calls,
//! batch requests, transaction versions, the monitor deadline, verify and
//! roll forward/back.

use crate::testing::mock::Reply;
use meridian_core::record::CITRUSLEAF_EPOCH;
use meridian_core::{
    list::write_flags, Digest, Error, Key, OperationType, Result, ResultCode, Value, MONITOR_SET,
};
use meridian_proto::compress::{compress_frame, inflate, COMPRESS_THRESHOLD};
use meridian_proto::field::{decode_version, encode_version};
use meridian_proto::{
    decode_batch_index, field_type, frame, info1, info2, info3, info4, EntryAttr, Message,
    MessageBuilder, OpEntry, ProtoHeader, PROTO_HEADER_SIZE,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Deadline offset given to a monitor record created without a TTL
const DEFAULT_MONITOR_TTL: u32 = 10;

/// UDF body: gets the record's bins (`None` when absent) and the arguments.
///
/// Setting the bins to `None` deletes the record.
pub type UdfFn = dyn Fn(&mut Option<HashMap<String, Value>>, &[Value]) -> std::result::Result<Value, String>
    + Send
    + Sync;

type FaultFn = dyn Fn(&Digest, &EntryAttr) -> Option<ResultCode> + Send + Sync;

/// One stored record
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Bins
    pub bins: HashMap<String, Value>,
    /// Generation
    pub generation: u32,
    /// Void time in seconds since the server epoch; 0 never expires
    pub expiration: u32,
    /// Version returned to transactional reads
    pub version: u64,
}

type RecordId = (String, Digest);

#[derive(Default)]
struct Store {
    records: HashMap<RecordId, StoredRecord>,
    undo: HashMap<u64, HashMap<RecordId, Option<StoredRecord>>>,
    next_version: u64,
}

impl Store {
    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn save_undo(&mut self, txn_id: Option<u64>, id: &RecordId) {
        if let Some(txn) = txn_id {
            let before = self.records.get(id).cloned();
            self.undo
                .entry(txn)
                .or_default()
                .entry(id.clone())
                .or_insert(before);
        }
    }
}

struct Request {
    namespace: String,
    set: String,
    digest: Digest,
    attr: EntryAttr,
    txn_id: Option<u64>,
    version: Option<u64>,
    udf: Option<(String, String, Vec<Value>)>,
    ops: Vec<OpEntry>,
}

impl Request {
    fn parse(
        digest: Option<Digest>,
        attr: EntryAttr,
        fields: &[meridian_proto::Field],
        ops: Vec<OpEntry>,
    ) -> Result<Request> {
        let find = |t: u8| fields.iter().find(|f| f.field_type == t);
        let namespace = find(field_type::NAMESPACE)
            .ok_or_else(|| Error::protocol("request has no namespace"))?
            .as_str()?
            .to_string();
        let set = match find(field_type::SET) {
            Some(f) => f.as_str()?.to_string(),
            None => String::new(),
        };
        let digest = match digest {
            Some(d) => d,
            None => {
                let f = find(field_type::DIGEST)
                    .ok_or_else(|| Error::protocol("request has no digest"))?;
                let bytes: [u8; 20] = f
                    .data
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::protocol("digest field of wrong size"))?;
                Digest(bytes)
            }
        };
        let txn_id = match find(field_type::MRT_ID) {
            Some(f) => {
                let bytes: [u8; 8] = f
                    .data
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::protocol("txn id field of wrong size"))?;
                Some(u64::from_le_bytes(bytes))
            }
            None => None,
        };
        let version = find(field_type::RECORD_VERSION)
            .map(|f| decode_version(&f.data))
            .transpose()?;
        let udf = match (
            find(field_type::UDF_PACKAGE_NAME),
            find(field_type::UDF_FUNCTION),
        ) {
            (Some(p), Some(f)) => {
                let args = match find(field_type::UDF_ARGLIST) {
                    Some(a) => match rmp_decode(&a.data)? {
                        Value::List(items) => items,
                        other => vec![other],
                    },
                    None => Vec::new(),
                };
                Some((p.as_str()?.to_string(), f.as_str()?.to_string(), args))
            }
            _ => None,
        };
        Ok(Request {
            namespace,
            set,
            digest,
            attr,
            txn_id,
            version,
            udf,
            ops,
        })
    }

    fn id(&self) -> RecordId {
        (self.namespace.clone(), self.digest)
    }

    fn is_monitor(&self) -> bool {
        self.set == MONITOR_SET
    }

    /// Transaction that owns undo state for this request
    fn undo_txn(&self) -> Option<u64> {
        if self.is_monitor() {
            None
        } else {
            self.txn_id
        }
    }
}

fn rmp_decode(data: &[u8]) -> Result<Value> {
    rmp_serde::from_slice(data).map_err(|e| Error::protocol(format!("msgpack decode: {}", e)))
}

#[derive(Debug, Default)]
struct Outcome {
    code: ResultCode,
    generation: u32,
    expiration: u32,
    version: Option<u64>,
    deadline: Option<u32>,
    bins: Vec<(String, Value)>,
}

impl Outcome {
    fn code(code: ResultCode) -> Self {
        Outcome {
            code,
            ..Outcome::default()
        }
    }

    fn of(record: &StoredRecord) -> Self {
        Outcome {
            code: ResultCode::OK,
            generation: record.generation,
            expiration: record.expiration,
            ..Outcome::default()
        }
    }

    fn encode(&self, batch_index: u32) -> Result<Vec<u8>> {
        let mut b = MessageBuilder::new();
        b.header.result_code = self.code.0 as u8;
        b.header.generation = self.generation;
        b.header.expiration = self.expiration;
        b.header.batch_index = batch_index;
        if let Some(v) = self.version {
            b.field(field_type::RECORD_VERSION, &encode_version(v));
        }
        if let Some(d) = self.deadline {
            b.field(field_type::MRT_DEADLINE, &d.to_le_bytes());
        }
        for (name, value) in &self.bins {
            b.bin(name, value)?;
        }
        Ok(b.finish_message())
    }
}

fn now_epoch() -> u32 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(CITRUSLEAF_EPOCH);
    now.saturating_sub(CITRUSLEAF_EPOCH) as u32
}

fn void_time(ttl: u32, current: u32) -> u32 {
    match ttl {
        0 | u32::MAX => 0,
        t if t == u32::MAX - 1 => current,
        t => now_epoch().saturating_add(t),
    }
}

/// In-memory record store speaking the wire protocol
#[derive(Default)]
pub struct MemoryServer {
    store: Mutex<Store>,
    udfs: RwLock<HashMap<(String, String), Arc<UdfFn>>>,
    fault: RwLock<Option<Arc<FaultFn>>>,
}

impl MemoryServer {
    /// Empty server
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryServer::default())
    }

    /// Register a UDF under `package.function`
    pub fn register_udf<F>(&self, package: &str, function: &str, f: F)
    where
        F: Fn(&mut Option<HashMap<String, Value>>, &[Value]) -> std::result::Result<Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.udfs
            .write()
            .insert((package.to_string(), function.to_string()), Arc::new(f));
    }

    /// Answer with the returned code instead of applying a matching entry
    pub fn fail_when<F>(&self, f: F)
    where
        F: Fn(&Digest, &EntryAttr) -> Option<ResultCode> + Send + Sync + 'static,
    {
        *self.fault.write() = Some(Arc::new(f));
    }

    /// Remove the fault hook
    pub fn clear_fault(&self) {
        *self.fault.write() = None;
    }

    /// Store a record directly; returns its new version
    pub fn insert(&self, key: &Key, bins: HashMap<String, Value>) -> u64 {
        let mut store = self.store.lock();
        let version = store.bump_version();
        let id = (key.namespace().to_string(), *key.digest());
        let generation = store.records.get(&id).map_or(0, |r| r.generation) + 1;
        store.records.insert(
            id,
            StoredRecord {
                bins,
                generation,
                expiration: 0,
                version,
            },
        );
        version
    }

    /// Stored record for a key
    pub fn get(&self, key: &Key) -> Option<StoredRecord> {
        self.store
            .lock()
            .records
            .get(&(key.namespace().to_string(), *key.digest()))
            .cloned()
    }

    /// Whether a key is stored
    pub fn contains(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    /// Stored records
    pub fn len(&self) -> usize {
        self.store.lock().records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records a transaction modified that are not rolled forward or back yet
    pub fn pending_undo(&self, txn_id: u64) -> usize {
        self.store.lock().undo.get(&txn_id).map_or(0, |u| u.len())
    }

    /// Handle one request frame
    pub fn handle(&self, request: &[u8]) -> Reply {
        match self.try_handle(request) {
            Ok(bytes) => Reply::Bytes(bytes),
            Err(_) => Reply::Reset,
        }
    }

    fn try_handle(&self, request: &[u8]) -> Result<Vec<u8>> {
        let header = ProtoHeader::decode(request)?;
        let plain;
        let body = if header.is_compressed() {
            plain = inflate(&request[PROTO_HEADER_SIZE..])?;
            &plain[PROTO_HEADER_SIZE..]
        } else {
            &request[PROTO_HEADER_SIZE..]
        };
        let (msg, _) = Message::decode(body, 0)?;
        let compress = msg.header.info1 & info1::COMPRESS_RESPONSE != 0;

        let response = if msg.header.info1 & info1::BATCH != 0 {
            self.handle_batch(&msg)?
        } else {
            self.handle_single(msg)?
        };
        let framed = frame(&response);
        if compress && framed.len() > COMPRESS_THRESHOLD {
            return compress_frame(&framed);
        }
        Ok(framed)
    }

    fn handle_single(&self, msg: Message) -> Result<Vec<u8>> {
        let h = msg.header;
        let generation = if h.info2 & (info2::GENERATION | info2::GENERATION_GT) != 0 {
            Some(h.generation as u16)
        } else {
            None
        };
        let attr = EntryAttr {
            info1: h.info1,
            info2: h.info2,
            info3: h.info3,
            info4: h.info4,
            generation,
            ttl: Some(h.expiration),
        };
        let req = Request::parse(None, attr, &msg.fields, msg.ops)?;
        let mut store = self.store.lock();
        self.apply(&mut store, &req).encode(0)
    }

    fn handle_batch(&self, msg: &Message) -> Result<Vec<u8>> {
        let payload = msg
            .field(field_type::BATCH_INDEX)
            .ok_or_else(|| Error::protocol("batch request without index field"))?;
        let (_, entries) = decode_batch_index(&payload.data)?;
        let mut body = Vec::new();
        let mut store = self.store.lock();
        for entry in entries {
            let req = Request::parse(Some(entry.digest), entry.attr, &entry.fields, entry.ops)?;
            body.extend(self.apply(&mut store, &req).encode(entry.index)?);
        }
        let mut last = MessageBuilder::new();
        last.header.info3 = info3::LAST;
        body.extend(last.finish_message());
        Ok(body)
    }

    // ========================================================================
    // Apply
    // ========================================================================

    fn apply(&self, store: &mut Store, req: &Request) -> Outcome {
        if let Some(fault) = self.fault.read().as_ref() {
            if let Some(code) = fault(&req.digest, &req.attr) {
                return Outcome::code(code);
            }
        }
        let info4 = req.attr.info4;
        if info4 & info4::MRT_VERIFY_READ != 0 {
            return verify(store, req);
        }
        if info4 & (info4::MRT_ROLL_FORWARD | info4::MRT_ROLL_BACK) != 0 {
            return roll(store, req);
        }
        if req.udf.is_some() {
            return self.call_udf(store, req);
        }
        if req.attr.info2 & info2::DELETE != 0 {
            return delete(store, req);
        }
        if req.attr.info2 & info2::WRITE != 0 {
            return write(store, req);
        }
        read(store, req)
    }

    fn call_udf(&self, store: &mut Store, req: &Request) -> Outcome {
        let Some((package, function, args)) = &req.udf else {
            return Outcome::code(ResultCode::PARAMETER_ERROR);
        };
        let udf = self
            .udfs
            .read()
            .get(&(package.clone(), function.clone()))
            .cloned();
        let Some(udf) = udf else {
            return Outcome {
                code: ResultCode::UDF_BAD_RESPONSE,
                bins: vec![(
                    "FAILURE".into(),
                    Value::from(format!("function not found: {}.{}", package, function)),
                )],
                ..Outcome::default()
            };
        };

        let id = req.id();
        let before = store.records.get(&id).map(|r| r.bins.clone());
        let mut bins = before.clone();
        match udf(&mut bins, args) {
            Ok(value) => {
                let mut out = Outcome::code(ResultCode::OK);
                if bins != before {
                    store.save_undo(req.undo_txn(), &id);
                    match bins {
                        Some(bins) => {
                            let record = store_bins(store, &id, bins, 0);
                            out = Outcome::of(&record);
                        }
                        None => {
                            store.records.remove(&id);
                        }
                    }
                } else if let Some(r) = store.records.get(&id) {
                    out = Outcome::of(r);
                }
                out.bins.push(("SUCCESS".into(), value));
                out
            }
            Err(message) => Outcome {
                code: ResultCode::UDF_BAD_RESPONSE,
                bins: vec![("FAILURE".into(), Value::from(message))],
                ..Outcome::default()
            },
        }
    }
}

fn store_bins(store: &mut Store, id: &RecordId, bins: HashMap<String, Value>, ttl: u32) -> StoredRecord {
    let version = store.bump_version();
    let (generation, current_exp) = store
        .records
        .get(id)
        .map_or((0, 0), |r| (r.generation, r.expiration));
    let record = StoredRecord {
        bins,
        generation: generation + 1,
        expiration: void_time(ttl, current_exp),
        version,
    };
    store.records.insert(id.clone(), record.clone());
    record
}

fn verify(store: &Store, req: &Request) -> Outcome {
    let current = store.records.get(&req.id()).map(|r| r.version);
    match (req.version, current) {
        (Some(expected), Some(v)) if expected != v => Outcome::code(ResultCode::MRT_VERSION_MISMATCH),
        (Some(_), None) => Outcome::code(ResultCode::MRT_VERSION_MISMATCH),
        _ => Outcome::code(ResultCode::OK),
    }
}

fn roll(store: &mut Store, req: &Request) -> Outcome {
    let Some(txn) = req.txn_id else {
        return Outcome::code(ResultCode::PARAMETER_ERROR);
    };
    let id = req.id();
    let saved = store.undo.get_mut(&txn).and_then(|u| u.remove(&id));
    if store.undo.get(&txn).is_some_and(|u| u.is_empty()) {
        store.undo.remove(&txn);
    }
    if req.attr.info4 & info4::MRT_ROLL_BACK != 0 {
        match saved {
            Some(Some(record)) => {
                store.records.insert(id, record);
            }
            Some(None) => {
                store.records.remove(&id);
            }
            None => {}
        }
    }
    Outcome::code(ResultCode::OK)
}

fn check_generation(req: &Request, current: u32) -> Option<ResultCode> {
    let expected = req.attr.generation? as u32;
    let info2 = req.attr.info2;
    if info2 & info2::GENERATION != 0 && expected != current {
        return Some(ResultCode::GENERATION_ERROR);
    }
    if info2 & info2::GENERATION_GT != 0 && expected <= current {
        return Some(ResultCode::GENERATION_ERROR);
    }
    None
}

fn delete(store: &mut Store, req: &Request) -> Outcome {
    let id = req.id();
    let Some(current) = store.records.get(&id).map(|r| r.generation) else {
        return Outcome::code(ResultCode::KEY_NOT_FOUND);
    };
    if let Some(code) = check_generation(req, current) {
        return Outcome::code(code);
    }
    store.save_undo(req.undo_txn(), &id);
    store.records.remove(&id);
    Outcome::code(ResultCode::OK)
}

fn read(store: &Store, req: &Request) -> Outcome {
    let Some(record) = store.records.get(&req.id()) else {
        return Outcome::code(ResultCode::KEY_NOT_FOUND);
    };
    let mut out = Outcome::of(record);
    if req.txn_id.is_some() {
        out.version = Some(record.version);
    }
    if req.attr.info1 & info1::NOBINDATA != 0 {
        return out;
    }
    if req.attr.info1 & info1::GET_ALL != 0 || req.ops.is_empty() {
        out.bins = sorted_bins(&record.bins);
        return out;
    }
    for op in &req.ops {
        match read_op(&record.bins, op) {
            Ok(Some(bins)) => out.bins.extend(bins),
            Ok(None) => {}
            Err(code) => return Outcome::code(code),
        }
    }
    out
}

fn sorted_bins(bins: &HashMap<String, Value>) -> Vec<(String, Value)> {
    let mut all: Vec<_> = bins.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    all.sort_by(|a, b| a.0.cmp(&b.0));
    all
}

type OpResult = std::result::Result<Option<Vec<(String, Value)>>, ResultCode>;

fn read_op(bins: &HashMap<String, Value>, op: &OpEntry) -> OpResult {
    match OperationType::from_code(op.op_type) {
        Some(OperationType::Read) if op.name.is_empty() => Ok(Some(sorted_bins(bins))),
        Some(OperationType::Read) => Ok(bins
            .get(&op.name)
            .map(|v| vec![(op.name.clone(), v.clone())])),
        Some(OperationType::CdtRead) => {
            let args = cdt_args(op)?;
            let Some(bin) = bins.get(&op.name) else {
                return Ok(None);
            };
            let Value::List(items) = bin else {
                return Err(ResultCode::BIN_TYPE_ERROR);
            };
            let result = match args.first().and_then(Value::as_int) {
                Some(16) => Value::Int(items.len() as i64),
                Some(17) => {
                    let index = args.get(1).and_then(Value::as_int).unwrap_or(0);
                    let len = items.len() as i64;
                    let i = if index < 0 { len + index } else { index };
                    if i < 0 || i >= len {
                        return Err(ResultCode::OP_NOT_APPLICABLE);
                    }
                    items[i as usize].clone()
                }
                _ => return Err(ResultCode::PARAMETER_ERROR),
            };
            Ok(Some(vec![(op.name.clone(), result)]))
        }
        _ => Err(ResultCode::PARAMETER_ERROR),
    }
}

fn cdt_args(op: &OpEntry) -> std::result::Result<Vec<Value>, ResultCode> {
    match rmp_decode(&op.payload) {
        Ok(Value::List(args)) => Ok(args),
        _ => Err(ResultCode::PARAMETER_ERROR),
    }
}

fn write(store: &mut Store, req: &Request) -> Outcome {
    let id = req.id();
    let existing = store.records.get(&id).cloned();
    let attr = &req.attr;

    if attr.info2 & info2::CREATE_ONLY != 0 && existing.is_some() {
        return Outcome::code(ResultCode::KEY_EXISTS);
    }
    if attr.info3 & (info3::UPDATE_ONLY | info3::REPLACE_ONLY) != 0 && existing.is_none() {
        return Outcome::code(ResultCode::KEY_NOT_FOUND);
    }
    if let Some(code) = check_generation(req, existing.as_ref().map_or(0, |r| r.generation)) {
        return Outcome::code(code);
    }

    let mut bins = match &existing {
        Some(r) if attr.info3 & (info3::CREATE_OR_REPLACE | info3::REPLACE_ONLY) == 0 => {
            r.bins.clone()
        }
        _ => HashMap::new(),
    };
    let respond_all = attr.info2 & info2::RESPOND_ALL_OPS != 0;
    let mut results = Vec::new();
    let mut delete_record = false;

    for op in &req.ops {
        let Some(op_type) = OperationType::from_code(op.op_type) else {
            return Outcome::code(ResultCode::PARAMETER_ERROR);
        };
        if !op_type.is_write() {
            match read_op(&bins, op) {
                Ok(Some(r)) => results.extend(r),
                Ok(None) => {}
                Err(code) => return Outcome::code(code),
            }
            continue;
        }
        let applied = match op_type {
            OperationType::CdtModify => list_modify(&mut bins, op).map(|size| {
                results.push((op.name.clone(), Value::Int(size)));
            }),
            OperationType::Touch => {
                if existing.is_none() {
                    Err(ResultCode::KEY_NOT_FOUND)
                } else {
                    Ok(())
                }
            }
            OperationType::Delete => {
                delete_record = true;
                bins.clear();
                Ok(())
            }
            _ => match op.value() {
                Ok(value) => modify_bin(&mut bins, op_type, &op.name, value),
                Err(_) => Err(ResultCode::PARAMETER_ERROR),
            },
        };
        if let Err(code) = applied {
            return Outcome::code(code);
        }
        if respond_all && op_type != OperationType::CdtModify {
            results.push((op.name.clone(), Value::Nil));
        }
    }

    store.save_undo(req.undo_txn(), &id);
    if delete_record || bins.is_empty() {
        store.records.remove(&id);
        let mut out = Outcome::code(ResultCode::OK);
        out.bins = results;
        return out;
    }

    let ttl = if req.is_monitor() {
        if existing.is_some() {
            u32::MAX - 1
        } else {
            match attr.ttl {
                Some(t) if t != 0 && t < u32::MAX - 1 => t,
                _ => DEFAULT_MONITOR_TTL,
            }
        }
    } else {
        attr.ttl.unwrap_or(0)
    };
    let record = store_bins(store, &id, bins, ttl);
    let mut out = Outcome::of(&record);
    if req.is_monitor() {
        out.deadline = Some(record.expiration);
    }
    out.bins = results;
    out
}

fn modify_bin(
    bins: &mut HashMap<String, Value>,
    op_type: OperationType,
    name: &str,
    value: Value,
) -> std::result::Result<(), ResultCode> {
    match op_type {
        OperationType::Write => {
            if value.is_nil() {
                bins.remove(name);
            } else {
                bins.insert(name.to_string(), value);
            }
            Ok(())
        }
        OperationType::Add => {
            let next = match (bins.get(name), value) {
                (None, v @ (Value::Int(_) | Value::Float(_))) => v,
                (Some(Value::Int(a)), Value::Int(b)) => Value::Int(a.wrapping_add(b)),
                (Some(Value::Float(a)), Value::Float(b)) => Value::Float(a + b),
                _ => return Err(ResultCode::BIN_TYPE_ERROR),
            };
            bins.insert(name.to_string(), next);
            Ok(())
        }
        OperationType::Append | OperationType::Prepend => {
            let append = op_type == OperationType::Append;
            let next = match (bins.get(name), value) {
                (None, v @ (Value::String(_) | Value::Blob(_))) => v,
                (Some(Value::String(a)), Value::String(b)) => {
                    Value::String(if append { format!("{}{}", a, b) } else { format!("{}{}", b, a) })
                }
                (Some(Value::Blob(a)), Value::Blob(b)) => {
                    let (first, second) = if append { (a, &b) } else { (&b, a) };
                    let mut joined = first.clone();
                    joined.extend_from_slice(second);
                    Value::Blob(joined)
                }
                _ => return Err(ResultCode::BIN_TYPE_ERROR),
            };
            bins.insert(name.to_string(), next);
            Ok(())
        }
        _ => Err(ResultCode::PARAMETER_ERROR),
    }
}

/// Apply a list append; returns the new list size
fn list_modify(bins: &mut HashMap<String, Value>, op: &OpEntry) -> std::result::Result<i64, ResultCode> {
    let args = cdt_args(op)?;
    let code = args.first().and_then(Value::as_int);
    let items = match (code, args.get(1)) {
        (Some(1), Some(v)) => vec![v.clone()],
        (Some(2), Some(Value::List(vs))) => vs.clone(),
        _ => return Err(ResultCode::PARAMETER_ERROR),
    };
    let flags = args.get(3).and_then(Value::as_int).unwrap_or(0) as u32;

    let list = bins
        .entry(op.name.clone())
        .or_insert_with(|| Value::List(Vec::new()));
    let Value::List(list) = list else {
        return Err(ResultCode::BIN_TYPE_ERROR);
    };
    for item in items {
        if flags & write_flags::ADD_UNIQUE != 0 && list.contains(&item) {
            if flags & write_flags::NO_FAIL == 0 {
                return Err(ResultCode::ELEMENT_EXISTS);
            }
            continue;
        }
        list.push(item);
    }
    Ok(list.len() as i64)
}
