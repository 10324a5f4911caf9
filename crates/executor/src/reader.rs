//! Response reading with progress tracking
//!
//! [`ResponseReader`] reads proto frames from a connection and remembers
//! how far it got. When a read times out part-way through a frame the
//! progress survives in a [`ReadState`], which the salvage thread resumes
//! from.

use meridian_cluster::Connection;
use meridian_core::{Error, Result};
use meridian_proto::compress::inflate;
use meridian_proto::{Message, ProtoHeader, MSG_HEADER_SIZE, PROTO_HEADER_SIZE};
use std::io;
use std::time::Duration;

const READ_CHUNK: usize = 16 * 1024;

/// Progress through a response stream
#[derive(Debug, Default)]
pub struct ReadState {
    multi: bool,
    header: Vec<u8>,
    body: Vec<u8>,
    body_len: Option<usize>,
    compressed: bool,
    frames: u32,
    last_seen: bool,
}

impl ReadState {
    /// Fresh state; `multi` responses end with a `LAST` message
    pub fn new(multi: bool) -> Self {
        ReadState {
            multi,
            ..ReadState::default()
        }
    }

    /// No frame is partially read
    pub fn at_boundary(&self) -> bool {
        self.header.is_empty() && self.body_len.is_none()
    }

    /// The whole response has been consumed
    pub fn is_complete(&self) -> bool {
        self.at_boundary() && self.frames > 0 && (!self.multi || self.last_seen)
    }

    /// Whether this is a multi-message response
    pub fn is_multi(&self) -> bool {
        self.multi
    }
}

/// Frame reader over a borrowed connection
pub struct ResponseReader<'a> {
    conn: &'a mut dyn Connection,
    state: ReadState,
}

impl<'a> ResponseReader<'a> {
    /// Reader at the start of a response
    pub fn new(conn: &'a mut dyn Connection, multi: bool) -> Self {
        ResponseReader {
            conn,
            state: ReadState::new(multi),
        }
    }

    /// Reader continuing from saved progress
    pub fn resume(conn: &'a mut dyn Connection, state: ReadState) -> Self {
        ResponseReader { conn, state }
    }

    /// Give up the connection borrow and keep the progress
    pub fn into_state(self) -> ReadState {
        self.state
    }

    /// Progress so far
    pub fn state(&self) -> &ReadState {
        &self.state
    }

    /// Change the connection timeout
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.conn.set_timeout(timeout).map_err(Error::network)
    }

    /// Record that the terminating message of a multi response was parsed
    pub fn mark_last(&mut self) {
        self.state.last_seen = true;
    }

    /// Read the next frame and return its (inflated) body.
    ///
    /// # Errors
    ///
    /// A declared size that cannot hold a message header is a protocol error,
    /// as is a compressed frame that does not inflate to its declared size.
    pub fn read_frame(&mut self) -> Result<Vec<u8>> {
        if self.state.body_len.is_none() {
            fill(self.conn, &mut self.state.header, PROTO_HEADER_SIZE)?;
            let header = ProtoHeader::decode(&self.state.header)?;
            let size = usize::try_from(header.size)
                .map_err(|_| Error::protocol(format!("frame size {} too large", header.size)))?;
            if header.is_compressed() {
                if size <= 8 {
                    return Err(Error::protocol(format!(
                        "compressed frame size {} has no payload",
                        size
                    )));
                }
            } else if size < MSG_HEADER_SIZE {
                return Err(Error::protocol(format!(
                    "frame size {} smaller than the {}-byte message header",
                    size, MSG_HEADER_SIZE
                )));
            }
            self.state.compressed = header.is_compressed();
            self.state.body_len = Some(size);
        }

        let len = self.state.body_len.unwrap_or(0);
        fill(self.conn, &mut self.state.body, len)?;
        let body = std::mem::take(&mut self.state.body);
        self.state.header.clear();
        self.state.body_len = None;
        self.state.frames += 1;

        if !self.state.compressed {
            return Ok(body);
        }
        let plain = inflate(&body)?;
        let inner = ProtoHeader::decode(&plain)?;
        let inner_len = plain.len() - PROTO_HEADER_SIZE;
        if inner.size as usize != inner_len || inner_len < MSG_HEADER_SIZE {
            return Err(Error::protocol(format!(
                "inflated frame declares {} bytes, carries {}",
                inner.size, inner_len
            )));
        }
        Ok(plain[PROTO_HEADER_SIZE..].to_vec())
    }

    /// Read a frame holding exactly one message
    pub fn read_message(&mut self) -> Result<Message> {
        let body = self.read_frame()?;
        let (msg, end) = Message::decode(&body, 0)?;
        if end != body.len() {
            return Err(Error::protocol(format!(
                "{} trailing bytes after single message",
                body.len() - end
            )));
        }
        Ok(msg)
    }
}

/// Read until `buf` holds `len` bytes
fn fill(conn: &mut dyn Connection, buf: &mut Vec<u8>, len: usize) -> Result<()> {
    let mut chunk = [0u8; READ_CHUNK];
    while buf.len() < len {
        let want = (len - buf.len()).min(READ_CHUNK);
        match conn.read(&mut chunk[..want]) {
            Ok(0) => {
                return Err(Error::network(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-response",
                )))
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::from_io(e)),
        }
    }
    Ok(())
}

/// Whether a response body contains the terminating message
pub fn contains_last(body: &[u8]) -> Result<bool> {
    Ok(Message::decode_all(body)?
        .iter()
        .any(|m| m.header.is_last()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_proto::{frame, MessageBuilder};
    use std::io::{Cursor, Read, Write};

    struct Pipe(Cursor<Vec<u8>>);

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            // One byte at a time to exercise partial reads
            let n = buf.len().min(1);
            self.0.read(&mut buf[..n])
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connection for Pipe {
        fn set_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    fn message_frame(code: u8) -> Vec<u8> {
        let mut b = MessageBuilder::new();
        b.header.result_code = code;
        frame(&b.finish_message())
    }

    #[test]
    fn test_read_message() {
        let mut pipe = Pipe(Cursor::new(message_frame(2)));
        let mut reader = ResponseReader::new(&mut pipe, false);
        let msg = reader.read_message().unwrap();
        assert_eq!(msg.header.result_code, 2);
        assert!(reader.state().is_complete());
    }

    #[test]
    fn test_size_below_message_header_is_protocol_error() {
        let mut bytes = ProtoHeader::message(10).encode().to_vec();
        bytes.extend_from_slice(&[0u8; 10]);
        let mut pipe = Pipe(Cursor::new(bytes));
        let mut reader = ResponseReader::new(&mut pipe, false);
        assert!(matches!(reader.read_frame(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_eof_mid_frame_is_network_error() {
        let mut bytes = message_frame(0);
        bytes.truncate(12);
        let mut pipe = Pipe(Cursor::new(bytes));
        let mut reader = ResponseReader::new(&mut pipe, false);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, Error::Network { .. }));
        let state = reader.into_state();
        assert!(!state.at_boundary());
    }

    #[test]
    fn test_multi_complete_after_last() {
        let mut pipe = Pipe(Cursor::new(message_frame(0)));
        let mut reader = ResponseReader::new(&mut pipe, true);
        reader.read_frame().unwrap();
        assert!(!reader.state().is_complete());
        reader.mark_last();
        assert!(reader.state().is_complete());
    }

    #[test]
    fn test_contains_last() {
        let mut last = MessageBuilder::new();
        last.header.info3 = meridian_proto::info3::LAST;
        assert!(contains_last(&last.finish_message()).unwrap());
        assert!(!contains_last(&MessageBuilder::new().finish_message()).unwrap());
    }
}
