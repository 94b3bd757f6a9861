//! Readiness-driven I/O loop.
//!
//! Owns the listen socket and a mio `Poll`. Client tokens are raw fds.
//! mio registration is edge-triggered, so both the accept loop and the
//! per-connection read loop drain to `WouldBlock` on every wake.
//!
//! The reactor keeps its own fd → session map, distinct from the registry:
//! this map mirrors kernel socket state, the registry mirrors protocol
//! state. The orchestrator keeps the two coherent through the connect and
//! disconnect callbacks.

use crate::codec::Extract;
use crate::codec::Frame;
use crate::session::Session;
use mio::net::TcpListener;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER: Token = Token(usize::MAX);
const WAKER: Token = Token(usize::MAX - 1);

/// Stack chunk size for draining a readable socket.
const READ_CHUNK: usize = 4096;

const BACKLOG: i32 = 128;

pub type ConnectCallback = Box<dyn Fn(&Arc<Session>) + Send>;
pub type MessageCallback = Box<dyn Fn(&Arc<Session>, Frame) + Send>;
pub type DisconnectCallback = Box<dyn Fn(RawFd) + Send>;

/// Callbacks installed by the orchestrator. The reactor never talks to
/// the registry or the pool directly, which keeps ownership acyclic.
pub struct Callbacks {
    pub on_connect: ConnectCallback,
    pub on_message: MessageCallback,
    pub on_disconnect: DisconnectCallback,
}

/// Thread-safe handle for asking the reactor to close connections.
///
/// The reaper removes timed-out sessions from the registry, then queues
/// their fds here so the sockets are reclaimed promptly instead of
/// lingering until the silent peer finally disconnects.
pub struct ReactorHandle {
    pending_close: Mutex<Vec<RawFd>>,
    waker: Waker,
}

impl ReactorHandle {
    /// Queue an fd for closing and wake the poll.
    pub fn request_close(&self, fd: RawFd) {
        self.pending_close.lock().unwrap().push(fd);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake reactor");
        }
    }

    fn take_pending(&self) -> Vec<RawFd> {
        mem::take(&mut *self.pending_close.lock().unwrap())
    }
}

pub struct Reactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    sessions: HashMap<RawFd, Arc<Session>>,
    handle: Arc<ReactorHandle>,
    callbacks: Callbacks,
}

impl Reactor {
    /// Bind the listen socket and set up the poll. Binding failures
    /// surface here so the caller can report startup failure.
    pub fn new(port: u16, callbacks: Callbacks) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER)?;

        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let mut listener = create_listener(addr)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "listening");

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            listener,
            local_addr,
            sessions: HashMap::new(),
            handle: Arc::new(ReactorHandle {
                pending_close: Mutex::new(Vec::new()),
                waker,
            }),
            callbacks,
        })
    }

    /// Actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> Arc<ReactorHandle> {
        Arc::clone(&self.handle)
    }

    /// One iteration of the event loop: service close requests, wait for
    /// readiness up to `timeout`, then drain every ready socket.
    pub fn run_once(&mut self, timeout: Duration) -> io::Result<()> {
        self.drain_close_requests();

        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e);
        }

        // Copy out the ready set before touching the session map.
        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|event| {
                (
                    event.token(),
                    event.is_error(),
                    event.is_readable() || event.is_read_closed(),
                )
            })
            .collect();

        for (token, is_error, is_readable) in ready {
            match token {
                LISTENER => self.accept_pending(),
                WAKER => self.drain_close_requests(),
                Token(raw) => {
                    let fd = raw as RawFd;
                    if is_error {
                        self.disconnect(fd);
                    } else if is_readable {
                        self.handle_readable(fd);
                    }
                }
            }
        }

        Ok(())
    }

    /// Deregister and drop every session and stop listening.
    pub fn shutdown(&mut self) {
        let fds: Vec<RawFd> = self.sessions.keys().copied().collect();
        for fd in fds {
            self.disconnect(fd);
        }
        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            warn!(error = %e, "failed to deregister listener");
        }
        debug!("reactor stopped");
    }

    fn drain_close_requests(&mut self) {
        for fd in self.handle.take_pending() {
            debug!(fd, "closing connection on request");
            self.disconnect(fd);
        }
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let fd = stream.as_raw_fd();
                    if let Err(e) = self.poll.registry().register(
                        &mut SourceFd(&fd),
                        Token(fd as usize),
                        Interest::READABLE,
                    ) {
                        error!(fd, error = %e, "failed to register client socket");
                        continue;
                    }

                    let session = Arc::new(Session::new(stream, peer));
                    info!(fd, peer = %peer, "new connection");
                    self.sessions.insert(fd, Arc::clone(&session));
                    (self.callbacks.on_connect)(&session);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(error = %e, "accept error");
                    break;
                }
            }
        }
    }

    fn handle_readable(&mut self, fd: RawFd) {
        let Some(session) = self.sessions.get(&fd).cloned() else {
            return;
        };

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match session.read_into(&mut chunk) {
                Ok(0) => {
                    self.disconnect(fd);
                    return;
                }
                Ok(n) => {
                    session.append(&chunk[..n]);
                    loop {
                        match session.next_frame() {
                            Extract::Frame(frame) => {
                                (self.callbacks.on_message)(&session, frame);
                            }
                            Extract::NeedMore => break,
                            Extract::Fatal(e) => {
                                warn!(fd, error = %e, "framing error, closing connection");
                                self.disconnect(fd);
                                return;
                            }
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(fd, error = %e, "read error");
                    self.disconnect(fd);
                    return;
                }
            }
        }
    }

    /// Deregister, forget, and close one connection. The socket itself
    /// closes when the last `Arc<Session>` drops; the disconnect callback
    /// releases the registry's clone right here, so that is prompt.
    fn disconnect(&mut self, fd: RawFd) {
        if let Some(session) = self.sessions.remove(&fd) {
            if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
                warn!(fd, error = %e, "failed to deregister client socket");
            }
            info!(fd, "client disconnected");
            (self.callbacks.on_disconnect)(fd);
            drop(session);
        }
    }
}

/// Listen socket setup: SO_REUSEADDR, non-blocking, fixed backlog.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(TcpListener::from_std(socket.into()))
}
