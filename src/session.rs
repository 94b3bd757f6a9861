//! Per-connection protocol state.
//!
//! A `Session` is created by the reactor when a connection is accepted and
//! shared (`Arc`) with the registry and with dispatch tasks. The reactor
//! thread feeds the inbound buffer; workers and public-API callers write
//! responses. All writes go through a per-session mutex so frames from
//! concurrent senders (echo, direct send, broadcast) can never interleave
//! on the wire.

use crate::codec::{Extract, Frame, PacketBuffer};
use crate::protocol::{MessageHeader, HEADER_LEN};
use mio::net::TcpStream;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Frames awaiting dispatch for this session.
///
/// `scheduled` is true while a pool task is draining the queue; at most one
/// such task exists per session, which keeps dispatch in arrival order.
#[derive(Debug, Default)]
struct Inbox {
    frames: VecDeque<Frame>,
    scheduled: bool,
}

pub struct Session {
    fd: RawFd,
    peer: SocketAddr,
    stream: TcpStream,
    buffer: Mutex<PacketBuffer>,
    authenticated: AtomicBool,
    username: Mutex<String>,
    last_heartbeat: Mutex<Instant>,
    write_lock: Mutex<()>,
    inbox: Mutex<Inbox>,
}

impl Session {
    /// Wrap an accepted, non-blocking stream.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            fd: stream.as_raw_fd(),
            peer,
            stream,
            buffer: Mutex::new(PacketBuffer::new()),
            authenticated: AtomicBool::new(false),
            username: Mutex::new(String::new()),
            last_heartbeat: Mutex::new(Instant::now()),
            write_lock: Mutex::new(()),
            inbox: Mutex::new(Inbox::default()),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Non-blocking read into the caller's chunk buffer. Reactor-only.
    pub(crate) fn read_into(&self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        (&self.stream).read(buf)
    }

    /// Append freshly read bytes to the inbound buffer.
    pub fn append(&self, data: &[u8]) {
        self.buffer.lock().unwrap().append(data);
    }

    /// Try to extract the next whole frame from the inbound buffer.
    pub fn next_frame(&self) -> Extract {
        self.buffer.lock().unwrap().extract()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Only the registry flips this, atomically with its username index.
    pub(crate) fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::Release);
    }

    pub fn username(&self) -> String {
        self.username.lock().unwrap().clone()
    }

    pub(crate) fn set_username(&self, name: &str) {
        *self.username.lock().unwrap() = name.to_string();
    }

    pub fn last_heartbeat(&self) -> Instant {
        *self.last_heartbeat.lock().unwrap()
    }

    /// Reset the heartbeat clock to now.
    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock().unwrap() = Instant::now();
    }

    /// Queue a frame for dispatch. Returns true if the caller should
    /// schedule a drain task (none is currently running for this session).
    pub(crate) fn push_frame(&self, frame: Frame) -> bool {
        let mut inbox = self.inbox.lock().unwrap();
        inbox.frames.push_back(frame);
        if inbox.scheduled {
            false
        } else {
            inbox.scheduled = true;
            true
        }
    }

    /// Take the next queued frame. Returns `None` when the queue is empty,
    /// at which point the drain task must exit (the scheduled flag is
    /// cleared under the same lock, so no frame can be stranded).
    pub(crate) fn pop_frame(&self) -> Option<Frame> {
        let mut inbox = self.inbox.lock().unwrap();
        match inbox.frames.pop_front() {
            Some(frame) => Some(frame),
            None => {
                inbox.scheduled = false;
                None
            }
        }
    }

    /// Write all bytes, retrying `WouldBlock`. Protocol frames are small,
    /// so the retry loop terminates quickly; a peer that stops reading
    /// altogether will eventually surface a hard error here.
    ///
    /// The Rust runtime ignores SIGPIPE, so a closed peer surfaces as an
    /// `EPIPE` error instead of killing the process.
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut written = 0;
        while written < data.len() {
            match (&self.stream).write(&data[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned 0",
                    ))
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Encode and send one frame. Header and body go out as a single
    /// buffer so a frame is never split across another sender's bytes.
    pub fn write_frame(&self, header: &MessageHeader, body: &[u8]) -> io::Result<()> {
        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(body);
        self.write(&buf)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("fd", &self.fd)
            .field("peer", &self.peer)
            .field("authenticated", &self.is_authenticated())
            .field("username", &self.username())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::session_pair;
    use super::*;
    use crate::codec::Frame;
    use crate::protocol::MessageType;

    #[test]
    fn test_write_frame_reaches_peer() {
        let (session, mut peer) = session_pair();

        let header = MessageHeader::for_body(MessageType::Data, 5);
        session.write_frame(&header, b"hello").unwrap();

        let bytes = peer.recv_exact(HEADER_LEN + 5);
        let decoded = MessageHeader::decode(&bytes);
        assert_eq!(decoded, header);
        assert_eq!(&bytes[HEADER_LEN..], b"hello");
    }

    #[test]
    fn test_auth_state_transitions() {
        let (session, _peer) = session_pair();

        assert!(!session.is_authenticated());
        assert_eq!(session.username(), "");

        session.set_authenticated(true);
        session.set_username("alice");

        assert!(session.is_authenticated());
        assert_eq!(session.username(), "alice");
    }

    #[test]
    fn test_heartbeat_touch_advances() {
        let (session, _peer) = session_pair();
        let before = session.last_heartbeat();
        std::thread::sleep(std::time::Duration::from_millis(5));
        session.touch_heartbeat();
        assert!(session.last_heartbeat() > before);
    }

    #[test]
    fn test_inbox_schedules_once() {
        let (session, _peer) = session_pair();
        let frame = Frame {
            header: MessageHeader::for_body(MessageType::Heartbeat, 0),
            body: Vec::new(),
        };

        // First push asks for a drain task, subsequent pushes do not.
        assert!(session.push_frame(frame.clone()));
        assert!(!session.push_frame(frame.clone()));

        assert!(session.pop_frame().is_some());
        assert!(session.pop_frame().is_some());
        assert!(session.pop_frame().is_none());

        // Queue drained, the next push schedules again.
        assert!(session.push_frame(frame));
    }

    #[test]
    fn test_buffer_feed_and_extract() {
        let (session, _peer) = session_pair();
        let frame = Frame {
            header: MessageHeader::for_body(MessageType::Data, 3),
            body: b"abc".to_vec(),
        };

        session.append(&frame.to_bytes());
        match session.next_frame() {
            Extract::Frame(f) => assert_eq!(f, frame),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(session.next_frame(), Extract::NeedMore);
    }
}
