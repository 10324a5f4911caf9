//! Per-node batch command
//!
//! A [`NodeCommand`] sends the keys one node owns and demultiplexes the
//! answers by batch index. It runs through the same retry engine as a
//! single-key command. On retry it regroups its keys against the current
//! partition map: when they still map to one node the command retries in
//! place, otherwise it hands the groups to fresh sub-commands.

use crate::entry::{batch_request, Entry, EntryContext, TxnPass};
use crate::node::{group, BatchNode};
use crate::record::BatchRecord;
use meridian_cluster::{Cluster, Node};
use meridian_core::{BasePolicy, BatchPolicy, Error, Record, Replica, Result, ResultCode, Txn, Value};
use meridian_executor::commands::udf::FAILURE_BIN;
use meridian_executor::{key_affinity, Command, Executor, ResponseReader};
use meridian_proto::Message;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// How per-key codes are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Found, not found and filtered out are outcomes; other codes abort the node
    Keys,
    /// Every code is stored in its record
    Records,
}

/// State shared by every node command of one batch call
pub(crate) struct BatchRun<'a> {
    pub name: &'static str,
    pub cluster: &'a dyn Cluster,
    pub records: &'a [BatchRecord],
    pub policy: &'a BatchPolicy,
    pub mode: Mode,
    pub pass: Option<TxnPass>,
    pub txn: Option<Arc<Txn>>,
}

impl BatchRun<'_> {
    pub fn entry_context(&self) -> EntryContext<'_> {
        EntryContext {
            policy: self.policy,
            txn: self.txn.as_deref(),
            pass: self.pass,
        }
    }

    /// Whether key `i` routes to the master like a write
    pub fn routes_as_write(&self, i: usize) -> bool {
        match self.pass {
            Some(TxnPass::Verify) => false,
            Some(_) => true,
            None => self.records[i].has_write,
        }
    }

    fn tracks_txn(&self) -> Option<&Txn> {
        match self.pass {
            None => self.txn.as_deref(),
            Some(_) => None,
        }
    }
}

/// Answer for one key
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Slot {
    pub code: ResultCode,
    pub record: Option<Record>,
    pub message: Option<String>,
}

impl Slot {
    fn code(code: ResultCode) -> Self {
        Slot {
            code,
            record: None,
            message: None,
        }
    }
}

/// What one node command produced
#[derive(Debug, Default)]
pub(crate) struct NodeOutcome {
    pub slots: Vec<(usize, Slot)>,
    pub failures: Vec<(Vec<usize>, Error)>,
}

impl NodeOutcome {
    pub fn failed(&self) -> bool {
        !self.failures.is_empty()
    }

    fn absorb(&mut self, other: NodeOutcome) {
        self.slots.extend(other.slots);
        self.failures.extend(other.failures);
    }
}

/// Keys of one batch call owned by one node
pub(crate) struct NodeCommand<'a> {
    run: &'a BatchRun<'a>,
    policy: BasePolicy,
    node: Arc<dyn Node>,
    offsets: Vec<usize>,
    multi: bool,
    sequence: usize,
    retries: u32,
    started: Option<Instant>,
    split: Vec<BatchNode>,
    slots: FxHashMap<usize, Slot>,
    failures: Vec<(Vec<usize>, Error)>,
}

impl<'a> NodeCommand<'a> {
    pub fn new(
        run: &'a BatchRun<'a>,
        target: BatchNode,
        sequence: usize,
        policy: BasePolicy,
    ) -> Self {
        let multi = target.offsets.len() > 1;
        NodeCommand {
            run,
            policy,
            node: target.node,
            offsets: target.offsets,
            multi,
            sequence,
            retries: 0,
            started: None,
            split: Vec::new(),
            slots: FxHashMap::default(),
            failures: Vec::new(),
        }
    }

    /// Turn the engine result into slots and failures
    pub fn finish(self, result: Result<()>) -> NodeOutcome {
        let mut outcome = NodeOutcome {
            slots: Vec::with_capacity(self.slots.len()),
            failures: self.failures,
        };
        if let Err(error) = result {
            let unresolved: Vec<usize> = self
                .offsets
                .iter()
                .copied()
                .filter(|i| !self.slots.contains_key(i))
                .collect();
            debug!(
                target: "meridian::batch",
                command = self.run.name,
                node = self.node.name(),
                keys = unresolved.len(),
                error = %error,
                "node sub-batch failed"
            );
            if !unresolved.is_empty() {
                outcome.failures.push((unresolved, error));
            }
        }
        outcome.slots.extend(self.slots);
        outcome
    }

    /// Budget left for sub-commands after a split
    fn child_policy(&self) -> BasePolicy {
        let mut policy = self.policy.clone();
        policy.max_retries = policy.max_retries.saturating_sub(self.retries);
        if !policy.total_timeout.is_zero() {
            let elapsed = self.started.map_or(Duration::ZERO, |s| s.elapsed());
            policy.total_timeout = policy
                .total_timeout
                .saturating_sub(elapsed)
                .max(Duration::from_millis(1));
        }
        policy
    }

    fn advances_replica(&self, is_timeout: bool) -> bool {
        matches!(self.policy.replica, Replica::Sequence | Replica::PreferRack)
            && !(is_timeout && self.is_write())
    }

    // ========================================================================
    // Responses
    // ========================================================================

    fn parse_batch(&mut self, reader: &mut ResponseReader<'_>) -> Result<()> {
        loop {
            let body = reader.read_frame()?;
            let mut pos = 0;
            while pos < body.len() {
                let (msg, next) = Message::decode(&body, pos)?;
                pos = next;
                if msg.header.is_last() {
                    reader.mark_last();
                    let code = msg.result_code();
                    if !code.is_ok() {
                        return Err(Error::server(code));
                    }
                    return Ok(());
                }
                let index = msg.header.batch_index as usize;
                if self.offsets.binary_search(&index).is_err() {
                    return Err(Error::protocol(format!(
                        "batch index {} was not requested from this node",
                        index
                    )));
                }
                self.apply(index, &msg)?;
            }
        }
    }

    fn apply(&mut self, index: usize, msg: &Message) -> Result<()> {
        let record = &self.run.records[index];
        let code = msg.result_code();

        if let Some(txn) = self.run.tracks_txn() {
            let version = msg.version()?;
            if record.has_write {
                txn.on_write(&record.key, version, code);
            } else {
                txn.on_read(&record.key, version);
            }
        }

        let merge = record.op.merges_lists();
        let slot = match (self.run.mode, code) {
            (_, ResultCode::OK) => Slot {
                code,
                record: Some(msg.record(merge)?),
                message: None,
            },
            (Mode::Keys, ResultCode::KEY_NOT_FOUND | ResultCode::FILTERED_OUT) => Slot::code(code),
            (Mode::Keys, code) => return Err(Error::server(code)),
            (Mode::Records, ResultCode::UDF_BAD_RESPONSE) => {
                let r = msg.record(false)?;
                let message = match r.get(FAILURE_BIN) {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                    None => None,
                };
                Slot {
                    code,
                    record: Some(r),
                    message,
                }
            }
            (Mode::Records, code) => Slot::code(code),
        };
        if self.slots.insert(index, slot).is_some() {
            return Err(Error::protocol(format!(
                "batch index {} answered twice",
                index
            )));
        }
        Ok(())
    }
}

impl Command for NodeCommand<'_> {
    fn name(&self) -> &'static str {
        self.run.name
    }

    fn policy(&self) -> &BasePolicy {
        &self.policy
    }

    fn is_write(&self) -> bool {
        self.offsets.iter().any(|&i| self.run.routes_as_write(i))
    }

    fn is_idempotent(&self) -> bool {
        self.run.pass.is_some()
            || self
                .offsets
                .iter()
                .all(|&i| self.run.records[i].op.is_idempotent())
    }

    fn is_multi(&self) -> bool {
        self.multi
    }

    fn affinity(&self) -> u32 {
        match (self.multi, self.offsets.first()) {
            (false, Some(&i)) => key_affinity(&self.run.records[i].key),
            _ => 0,
        }
    }

    fn select_node(&mut self, _cluster: &dyn Cluster) -> Result<Arc<dyn Node>> {
        Ok(Arc::clone(&self.node))
    }

    fn build_request(&mut self) -> Result<Vec<u8>> {
        self.started = Some(Instant::now());
        let ctx = self.run.entry_context();
        if self.multi {
            return batch_request(self.run.records, &self.offsets, &ctx);
        }
        let i = *self
            .offsets
            .first()
            .ok_or_else(|| Error::InvalidArgument("batch command without keys".into()))?;
        let record = &self.run.records[i];
        Entry::build(record, &ctx)?.single_request(&record.key, self.run.policy)
    }

    fn parse_response(&mut self, reader: &mut ResponseReader<'_>) -> Result<()> {
        if self.multi {
            return self.parse_batch(reader);
        }
        let msg = reader.read_message()?;
        let index = self.offsets[0];
        self.apply(index, &msg)
    }

    fn prepare_retry(&mut self, is_timeout: bool) -> bool {
        self.retries += 1;
        self.slots.clear();
        if self.advances_replica(is_timeout) {
            self.sequence = self.sequence.wrapping_add(1);
        }
        let (mut groups, unrouted) = group(self.run, self.offsets.iter().copied(), self.sequence);
        if unrouted.is_empty() && groups.len() == 1 {
            if let Some(target) = groups.pop() {
                self.node = target.node;
                return true;
            }
        }
        for (i, error) in unrouted {
            self.failures.push((vec![i], error));
        }
        self.split = groups;
        false
    }

    fn retry_split(&mut self, executor: &Executor) -> Option<Result<()>> {
        let groups = std::mem::take(&mut self.split);
        self.offsets.clear();
        let policy = self.child_policy();
        let mut merged = NodeOutcome::default();
        for target in groups {
            debug!(
                target: "meridian::batch",
                command = self.run.name,
                node = target.node.name(),
                keys = target.offsets.len(),
                "keys moved, running split sub-batch"
            );
            let mut child = NodeCommand::new(self.run, target, self.sequence, policy.clone());
            let result = executor.execute(&mut child);
            merged.absorb(child.finish(result));
        }
        self.slots.extend(merged.slots);
        self.failures.extend(merged.failures);
        Some(Ok(()))
    }

    fn on_in_doubt(&mut self) {
        if let Some(txn) = self.run.tracks_txn() {
            for &i in &self.offsets {
                let record = &self.run.records[i];
                if record.has_write && !self.slots.contains_key(&i) {
                    txn.on_write_in_doubt(&record.key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ReadBins;
    use meridian_cluster::testing::{single_owner_cluster, MockNode};
    use meridian_core::Key;
    use meridian_proto::{frame, info3, MessageBuilder};
    use std::io::{Cursor, Read, Write};

    struct Canned(Cursor<Vec<u8>>);

    impl Read for Canned {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for Canned {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl meridian_cluster::Connection for Canned {
        fn set_timeout(&mut self, _timeout: Option<Duration>) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn reply(index: u32, code: ResultCode) -> Vec<u8> {
        let mut b = MessageBuilder::new();
        b.header.result_code = code.0 as u8;
        b.header.batch_index = index;
        b.finish_message()
    }

    fn last() -> Vec<u8> {
        let mut b = MessageBuilder::new();
        b.header.info3 = info3::LAST;
        b.finish_message()
    }

    fn records(n: i64) -> Vec<BatchRecord> {
        (0..n)
            .map(|i| BatchRecord::read(Key::new("test", "s", i).unwrap(), ReadBins::All))
            .collect()
    }

    fn parse(run: &BatchRun<'_>, offsets: Vec<usize>, body: Vec<u8>) -> (Result<()>, NodeOutcome) {
        let node: Arc<dyn Node> = Arc::new(MockNode::silent("A"));
        let mut cmd = NodeCommand::new(run, BatchNode { node, offsets }, 0, run.policy.base.clone());
        let mut conn = Canned(Cursor::new(frame(&body)));
        let mut reader = ResponseReader::new(&mut conn, cmd.is_multi());
        let result = cmd.parse_response(&mut reader);
        (result.clone(), cmd.finish(result))
    }

    #[test]
    fn test_keys_mode_aborts_on_other_codes() {
        let cluster = single_owner_cluster("test", Arc::new(MockNode::silent("A")), &[]);
        let recs = records(3);
        let policy = BatchPolicy::default();
        let run = BatchRun {
            name: "batch_get",
            cluster: &cluster,
            records: &recs,
            policy: &policy,
            mode: Mode::Keys,
            pass: None,
            txn: None,
        };
        let mut body = reply(0, ResultCode::KEY_NOT_FOUND);
        body.extend(reply(1, ResultCode::KEY_BUSY));
        body.extend(last());
        let (result, outcome) = parse(&run, vec![0, 1, 2], body);
        assert_eq!(result.unwrap_err().result_code(), ResultCode::KEY_BUSY);
        assert_eq!(outcome.slots.len(), 1);
        assert_eq!(outcome.failures[0].0, vec![1, 2]);
    }

    #[test]
    fn test_records_mode_stores_codes() {
        let cluster = single_owner_cluster("test", Arc::new(MockNode::silent("A")), &[]);
        let recs = records(2);
        let policy = BatchPolicy::default();
        let run = BatchRun {
            name: "batch_operate",
            cluster: &cluster,
            records: &recs,
            policy: &policy,
            mode: Mode::Records,
            pass: None,
            txn: None,
        };
        let mut body = reply(1, ResultCode::KEY_BUSY);
        body.extend(reply(0, ResultCode::OK));
        body.extend(last());
        let (result, outcome) = parse(&run, vec![0, 1], body);
        assert!(result.is_ok());
        let mut slots = outcome.slots;
        slots.sort_by_key(|(i, _)| *i);
        assert_eq!(slots[0].1.code, ResultCode::OK);
        assert!(slots[0].1.record.is_some());
        assert_eq!(slots[1].1.code, ResultCode::KEY_BUSY);
    }

    #[test]
    fn test_duplicate_or_foreign_index_is_protocol_error() {
        let cluster = single_owner_cluster("test", Arc::new(MockNode::silent("A")), &[]);
        let recs = records(3);
        let policy = BatchPolicy::default();
        let run = BatchRun {
            name: "batch_get",
            cluster: &cluster,
            records: &recs,
            policy: &policy,
            mode: Mode::Records,
            pass: None,
            txn: None,
        };
        let mut body = reply(0, ResultCode::OK);
        body.extend(reply(0, ResultCode::OK));
        let (result, _) = parse(&run, vec![0, 1], body);
        assert!(matches!(result, Err(Error::Protocol(_))));

        let (result, _) = parse(&run, vec![0, 1], reply(2, ResultCode::OK));
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_last_with_error_fails_node() {
        let cluster = single_owner_cluster("test", Arc::new(MockNode::silent("A")), &[]);
        let recs = records(2);
        let policy = BatchPolicy::default();
        let run = BatchRun {
            name: "batch_get",
            cluster: &cluster,
            records: &recs,
            policy: &policy,
            mode: Mode::Keys,
            pass: None,
            txn: None,
        };
        let mut terminal = MessageBuilder::new();
        terminal.header.info3 = info3::LAST;
        terminal.header.result_code = ResultCode::BATCH_QUEUES_FULL.0 as u8;
        let (result, outcome) = parse(&run, vec![0, 1], terminal.finish_message());
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(outcome.failures[0].0, vec![0, 1]);
    }
}
