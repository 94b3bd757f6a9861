//! Stream-to-frame decoder.
//!
//! Reassembles variable-length packets from arbitrary byte chunks. Each
//! session owns one `PacketBuffer`; the reactor appends whatever `read`
//! returned and then extracts whole frames in a loop.
//!
//! There is no byte-level resynchronisation: the protocol has no escape
//! sequence, so after a header validation failure the whole buffer is
//! dropped and the connection is closed by the caller.

use crate::protocol::{HeaderError, MessageHeader, HEADER_LEN};
use bytes::{Buf, BytesMut};

/// One header + body unit extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: MessageHeader,
    pub body: Vec<u8>,
}

impl Frame {
    /// Serialize to wire bytes (header immediately followed by body).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.body.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.body);
        buf
    }
}

/// Result of one extraction attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Extract {
    /// A whole frame was carved off the buffer head.
    Frame(Frame),
    /// Not enough buffered bytes yet.
    NeedMore,
    /// Header validation failed; the buffer has been dropped and the
    /// stream is unrecoverable.
    Fatal(HeaderError),
}

/// Append-only inbound byte buffer with frame extraction.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    buf: BytesMut,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Concatenate bytes onto the tail.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Try to carve one whole frame off the buffer head.
    pub fn extract(&mut self) -> Extract {
        if self.buf.len() < HEADER_LEN {
            return Extract::NeedMore;
        }

        let header = MessageHeader::decode(&self.buf[..HEADER_LEN]);
        if let Err(e) = header.validate() {
            self.buf.clear();
            return Extract::Fatal(e);
        }

        let total = header.total_len as usize;
        if self.buf.len() < total {
            return Extract::NeedMore;
        }

        self.buf.advance(HEADER_LEN);
        let body = self.buf.split_to(header.body_len as usize).to_vec();
        Extract::Frame(Frame { header, body })
    }

    /// Number of buffered bytes not yet consumed.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn data_frame(body: &[u8]) -> Frame {
        Frame {
            header: MessageHeader::for_body(MessageType::Data, body.len()),
            body: body.to_vec(),
        }
    }

    #[test]
    fn test_round_trip() {
        let frame = data_frame(b"hello");
        let mut buffer = PacketBuffer::new();
        buffer.append(&frame.to_bytes());

        assert_eq!(buffer.extract(), Extract::Frame(frame));
        assert_eq!(buffer.extract(), Extract::NeedMore);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_length_body() {
        let frame = Frame {
            header: MessageHeader::for_body(MessageType::Heartbeat, 0),
            body: Vec::new(),
        };
        let mut buffer = PacketBuffer::new();
        buffer.append(&frame.to_bytes());

        assert_eq!(buffer.extract(), Extract::Frame(frame));
    }

    #[test]
    fn test_chunked_reassembly() {
        let frame = data_frame(b"split across many chunks");
        let bytes = frame.to_bytes();

        // Feed one byte at a time; the frame must come out exactly once.
        for split in 1..bytes.len() {
            let mut buffer = PacketBuffer::new();
            let mut extracted = Vec::new();

            for chunk in [&bytes[..split], &bytes[split..]] {
                buffer.append(chunk);
                loop {
                    match buffer.extract() {
                        Extract::Frame(f) => extracted.push(f),
                        Extract::NeedMore => break,
                        Extract::Fatal(e) => panic!("unexpected fatal: {e}"),
                    }
                }
            }

            assert_eq!(extracted, vec![frame.clone()], "split at {split}");
        }
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let first = data_frame(b"one");
        let second = Frame {
            header: MessageHeader::for_body(MessageType::Heartbeat, 0),
            body: Vec::new(),
        };

        let mut bytes = first.to_bytes();
        bytes.extend_from_slice(&second.to_bytes());

        let mut buffer = PacketBuffer::new();
        buffer.append(&bytes);

        assert_eq!(buffer.extract(), Extract::Frame(first));
        assert_eq!(buffer.extract(), Extract::Frame(second));
        assert_eq!(buffer.extract(), Extract::NeedMore);
    }

    #[test]
    fn test_invalid_header_drops_buffer() {
        let mut frame = data_frame(b"payload");
        frame.header.magic = 0xDEAD_BEEF;

        let mut buffer = PacketBuffer::new();
        buffer.append(&frame.to_bytes());

        assert!(matches!(buffer.extract(), Extract::Fatal(_)));
        // Entire buffer dropped; extraction cannot resume.
        assert!(buffer.is_empty());
        assert_eq!(buffer.extract(), Extract::NeedMore);
    }

    #[test]
    fn test_partial_header_needs_more() {
        let mut buffer = PacketBuffer::new();
        buffer.append(&[0x78, 0x56, 0x34]);
        assert_eq!(buffer.extract(), Extract::NeedMore);
        assert_eq!(buffer.len(), 3);
    }
}
