//! Nodes and connections
//!
//! The command engine only needs a node to hand out connections, take them
//! back (pooled or closed), report liveness and report its rack. Pooling and
//! topology maintenance live behind these traits.

use meridian_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// A byte stream to one node
pub trait Connection: Read + Write + Send {
    /// Set the read and write timeout; `None` blocks indefinitely.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Connection for TcpStream {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

/// One cluster node
pub trait Node: Send + Sync + fmt::Debug {
    /// Node name
    fn name(&self) -> &str;

    /// Host and port
    fn address(&self) -> &str;

    /// Take a pooled connection or open a new one.
    ///
    /// `affinity` (derived from the key digest) selects the pool shard so
    /// that commands for one key tend to reuse one connection.
    fn get_connection(&self, timeout: Duration, affinity: u32) -> Result<Box<dyn Connection>>;

    /// Return a healthy connection to the pool
    fn put_connection(&self, conn: Box<dyn Connection>);

    /// Drop a connection that cannot be reused
    fn close_connection(&self, conn: Box<dyn Connection>);

    /// Whether the node is part of the cluster
    fn is_active(&self) -> bool;

    /// Rack the node serves a namespace from
    fn rack_id(&self, namespace: &str) -> Option<u32>;
}

// ============================================================================
// TcpNode
// ============================================================================

/// Node reached over plain TCP with a sharded idle-connection pool
pub struct TcpNode {
    name: String,
    address: String,
    shards: Vec<Mutex<Vec<Box<dyn Connection>>>>,
    max_idle_per_shard: usize,
    max_connections: usize,
    open: AtomicUsize,
    active: AtomicBool,
    racks: HashMap<String, u32>,
}

impl TcpNode {
    /// Create a node with `shards` pools of at most `max_idle_per_shard` idle
    /// connections and at most `max_connections` open connections overall.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        shards: usize,
        max_idle_per_shard: usize,
        max_connections: usize,
    ) -> Self {
        let shards = shards.max(1);
        TcpNode {
            name: name.into(),
            address: address.into(),
            shards: (0..shards).map(|_| Mutex::new(Vec::new())).collect(),
            max_idle_per_shard,
            max_connections,
            open: AtomicUsize::new(0),
            active: AtomicBool::new(true),
            racks: HashMap::new(),
        }
    }

    /// Record the rack this node serves a namespace from
    pub fn with_rack(mut self, namespace: impl Into<String>, rack: u32) -> Self {
        self.racks.insert(namespace.into(), rack);
        self
    }

    /// Mark the node active or inactive
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }

    fn shard(&self, affinity: u32) -> &Mutex<Vec<Box<dyn Connection>>> {
        &self.shards[affinity as usize % self.shards.len()]
    }

    fn connect(&self, timeout: Duration) -> Result<Box<dyn Connection>> {
        let reserved = self.open.fetch_add(1, Ordering::AcqRel);
        if reserved >= self.max_connections {
            self.open.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::NoMoreConnections {
                node: self.name.clone(),
            });
        }
        let result = (|| -> io::Result<TcpStream> {
            let addr = self
                .address
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address did not resolve"))?;
            let stream = if timeout.is_zero() {
                TcpStream::connect(addr)?
            } else {
                TcpStream::connect_timeout(&addr, timeout)?
            };
            stream.set_nodelay(true)?;
            Ok(stream)
        })();
        match result {
            Ok(stream) => {
                debug!(target: "meridian::command", node = %self.name, "opened connection");
                Ok(Box::new(stream))
            }
            Err(e) => {
                self.open.fetch_sub(1, Ordering::AcqRel);
                Err(Error::from_io(e).with_node(&self.name))
            }
        }
    }
}

impl fmt::Debug for TcpNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpNode")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("open", &self.open_connections())
            .finish()
    }
}

impl Node for TcpNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn get_connection(&self, timeout: Duration, affinity: u32) -> Result<Box<dyn Connection>> {
        if let Some(conn) = self.shard(affinity).lock().pop() {
            return Ok(conn);
        }
        self.connect(timeout)
    }

    fn put_connection(&self, conn: Box<dyn Connection>) {
        // Shard choice on return does not matter; pick the least loaded one.
        let shard = self
            .shards
            .iter()
            .min_by_key(|s| s.lock().len())
            .unwrap_or(&self.shards[0]);
        let mut idle = shard.lock();
        if idle.len() < self.max_idle_per_shard {
            idle.push(conn);
        } else {
            drop(idle);
            self.close_connection(conn);
        }
    }

    fn close_connection(&self, conn: Box<dyn Connection>) {
        drop(conn);
        self.open.fetch_sub(1, Ordering::AcqRel);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn rack_id(&self, namespace: &str) -> Option<u32> {
        self.racks.get(namespace).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_node_pools_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let node = TcpNode::new("A", addr, 2, 4, 8);

        let conn = node.get_connection(Duration::from_secs(1), 0).unwrap();
        assert_eq!(node.open_connections(), 1);
        node.put_connection(conn);
        let _again = node.get_connection(Duration::from_secs(1), 0).unwrap();
        let _again2 = node.get_connection(Duration::from_secs(1), 1).unwrap();
        assert!(node.open_connections() <= 2);
    }

    #[test]
    fn test_tcp_node_connection_limit() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let node = TcpNode::new("A", addr, 1, 1, 1);
        let _held = node.get_connection(Duration::from_secs(1), 0).unwrap();
        let err = match node.get_connection(Duration::from_secs(1), 0) {
            Ok(_) => panic!("expected an error, got a connection"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::NoMoreConnections { .. }));
    }

    #[test]
    fn test_rack_lookup() {
        let node = TcpNode::new("A", "127.0.0.1:1", 1, 1, 1).with_rack("test", 3);
        assert_eq!(node.rack_id("test"), Some(3));
        assert_eq!(node.rack_id("other"), None);
    }
}
