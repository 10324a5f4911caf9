//! Command execution for Meridian
//!
//! This crate runs single-key commands against the cluster:
//! - [`Command`]: the contract every operation implements
//! - [`Executor`]: the attempt loop (deadline, socket timeout, retries,
//!   replica rotation, in-doubt accounting)
//! - [`ResponseReader`]: frame reader that tracks progress for salvage
//! - [`ConnectionRecover`]: drains timed-out connections in the background
//! - [`commands`]: get, put, delete, operate, execute and the transaction
//!   monitor commands
//!
//! # Example
//!
//! ```ignore
//! let exec = Executor::new(cluster);
//! commands::write::put(&exec, &WritePolicy::default(), &key, &[Bin::new("a", 1i64)])?;
//! let record = commands::read::get(&exec, &ReadPolicy::default(), &key)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod commands;
pub mod engine;
pub mod reader;
pub mod recover;

pub use command::{key_affinity, Command};
pub use engine::Executor;
pub use reader::{ReadState, ResponseReader};
pub use recover::ConnectionRecover;
