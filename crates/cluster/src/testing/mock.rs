//! Scripted nodes
//!
//! A [`MockNode`] hands out in-memory connections. Every complete request
//! frame written to a connection is passed to the node's responder, and the
//! returned [`Reply`] decides what the next reads produce.

use crate::node::{Connection, Node};
use crate::testing::server::MemoryServer;
use meridian_core::Result;
use meridian_proto::{ProtoHeader, PROTO_HEADER_SIZE};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a connection produces after a request frame
#[derive(Debug, Clone)]
pub enum Reply {
    /// Serve these bytes
    Bytes(Vec<u8>),
    /// Nothing arrives; reads time out
    Timeout,
    /// Serve `head` bytes, time out once, then serve the rest
    Stall {
        /// Bytes served before the timeout
        head: usize,
        /// Full response
        bytes: Vec<u8>,
    },
    /// Connection reset on read
    Reset,
}

type Responder = dyn Fn(&[u8]) -> Reply + Send + Sync;

#[derive(Debug, Default)]
struct Stats {
    requests: AtomicUsize,
    opened: AtomicUsize,
    put: AtomicUsize,
    closed: AtomicUsize,
}

#[derive(Debug)]
enum Chunk {
    Data(Vec<u8>),
    Timeout,
    Reset,
}

/// Scripted node
pub struct MockNode {
    name: String,
    responder: Arc<Responder>,
    stats: Arc<Stats>,
    active: AtomicBool,
    fail_writes: Arc<AtomicBool>,
    racks: HashMap<String, u32>,
}

impl MockNode {
    /// Node answering with `responder`
    pub fn new<F>(name: &str, responder: F) -> Self
    where
        F: Fn(&[u8]) -> Reply + Send + Sync + 'static,
    {
        MockNode {
            name: name.to_string(),
            responder: Arc::new(responder),
            stats: Arc::new(Stats::default()),
            active: AtomicBool::new(true),
            fail_writes: Arc::new(AtomicBool::new(false)),
            racks: HashMap::new(),
        }
    }

    /// Node that never answers
    pub fn silent(name: &str) -> Self {
        MockNode::new(name, |_| Reply::Timeout)
    }

    /// Node backed by an in-memory server
    pub fn serving(name: &str, server: Arc<MemoryServer>) -> Self {
        MockNode::new(name, move |req| server.handle(req))
    }

    /// Set the rack for a namespace
    pub fn with_rack(mut self, namespace: &str, rack: u32) -> Self {
        self.racks.insert(namespace.to_string(), rack);
        self
    }

    /// Mark the node active or inactive
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Make every write on this node's connections fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Complete request frames received
    pub fn requests(&self) -> usize {
        self.stats.requests.load(Ordering::SeqCst)
    }

    /// Connections handed out
    pub fn opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    /// Connections returned to the pool
    pub fn put_count(&self) -> usize {
        self.stats.put.load(Ordering::SeqCst)
    }

    /// Connections closed
    pub fn close_count(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MockNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockNode").field("name", &self.name).finish()
    }
}

impl Node for MockNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        "mock"
    }

    fn get_connection(&self, _timeout: Duration, _affinity: u32) -> Result<Box<dyn Connection>> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            responder: Arc::clone(&self.responder),
            stats: Arc::clone(&self.stats),
            fail_writes: Arc::clone(&self.fail_writes),
            pending: Vec::new(),
            chunks: VecDeque::new(),
        }))
    }

    fn put_connection(&self, conn: Box<dyn Connection>) {
        drop(conn);
        self.stats.put.fetch_add(1, Ordering::SeqCst);
    }

    fn close_connection(&self, conn: Box<dyn Connection>) {
        drop(conn);
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn rack_id(&self, namespace: &str) -> Option<u32> {
        self.racks.get(namespace).copied()
    }
}

struct MockConnection {
    responder: Arc<Responder>,
    stats: Arc<Stats>,
    fail_writes: Arc<AtomicBool>,
    pending: Vec<u8>,
    chunks: VecDeque<Chunk>,
}

impl MockConnection {
    fn complete_frames(&mut self) {
        loop {
            let Ok(header) = ProtoHeader::decode(&self.pending) else {
                return;
            };
            let len = PROTO_HEADER_SIZE + header.size as usize;
            if self.pending.len() < len {
                return;
            }
            let request: Vec<u8> = self.pending.drain(..len).collect();
            self.stats.requests.fetch_add(1, Ordering::SeqCst);
            match (self.responder)(&request) {
                Reply::Bytes(b) => self.chunks.push_back(Chunk::Data(b)),
                Reply::Timeout => self.chunks.push_back(Chunk::Timeout),
                Reply::Stall { head, bytes } => {
                    let head = head.min(bytes.len());
                    self.chunks.push_back(Chunk::Data(bytes[..head].to_vec()));
                    self.chunks.push_back(Chunk::Timeout);
                    self.chunks.push_back(Chunk::Data(bytes[head..].to_vec()));
                }
                Reply::Reset => self.chunks.push_back(Chunk::Reset),
            }
        }
    }
}

impl Read for MockConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.chunks.front_mut() {
                None => return Err(io::Error::new(io::ErrorKind::TimedOut, "no response")),
                Some(Chunk::Timeout) => {
                    self.chunks.pop_front();
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
                }
                Some(Chunk::Reset) => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "connection reset",
                    ))
                }
                Some(Chunk::Data(data)) => {
                    if data.is_empty() {
                        self.chunks.pop_front();
                        continue;
                    }
                    let n = buf.len().min(data.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    data.drain(..n);
                    return Ok(n);
                }
            }
        }
    }
}

impl Write for MockConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        self.pending.extend_from_slice(buf);
        self.complete_frames();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for MockConnection {
    fn set_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}
