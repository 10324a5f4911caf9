//! Wire frame codec for Meridian
//!
//! Every request and response is a proto frame: an 8-byte proto header and a
//! body. A message body starts with a 22-byte message header followed by field
//! blocks and op blocks. Bodies may be zlib-compressed.
//!
//! - `header`: proto and message headers, info flag bits
//! - `field`: field blocks and transaction field payloads
//! - `op`: op blocks
//! - `particle`: value payloads
//! - `compress`: compressed frames
//! - `message`: message builder and decoder, record assembly
//! - `batch`: batch index field

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod compress;
pub mod field;
pub mod header;
pub mod message;
pub mod op;
pub mod particle;

pub use batch::{decode_batch_index, BatchEntry, BatchWriter, EntryAttr};
pub use field::{field_type, Field};
pub use header::{
    info1, info2, info3, info4, MessageHeader, ProtoHeader, MSG_HEADER_SIZE, PROTO_HEADER_SIZE,
};
pub use message::{frame, Message, MessageBuilder};
pub use op::OpEntry;
