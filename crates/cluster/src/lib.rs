//! Cluster interfaces for Meridian
//!
//! The command engine routes every command through three abstractions:
//! - [`Cluster`]: namespace ownership tables and the node list
//! - [`Node`]: a connection pool for one server
//! - [`Partition`]: the per-command replica sequence used across retries
//!
//! [`testing`] provides scripted nodes and an in-memory server for tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod node;
pub mod partition;
pub mod testing;

pub use cluster::{Cluster, StaticCluster};
pub use node::{Connection, Node, TcpNode};
pub use partition::{Partition, Partitions};
