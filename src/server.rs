//! Server orchestrator.
//!
//! Wires the reactor's callbacks to the registry, dispatcher, and worker
//! pool, and owns the lifecycle: `start` spawns the heartbeat reaper,
//! `run` drives the reactor on the calling thread, `stop` unwinds
//! everything. The handle is cheaply cloneable so `run` and the public
//! send API can live on different threads.
//!
//! Frames from one connection are dispatched in arrival order: the
//! message callback queues each frame on the session's inbox and submits
//! at most one drain task per session to the pool, so two frames from
//! the same peer can never race each other across workers.

use crate::config::Config;
use crate::dispatcher::{CredentialValidator, Dispatcher, NonEmptyValidator};
use crate::heartbeat;
use crate::pool::WorkerPool;
use crate::protocol::MessageHeader;
use crate::reactor::{Callbacks, Reactor, ReactorHandle};
use crate::registry::SessionRegistry;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Reactor poll tick; also bounds how long `stop` takes to be observed.
const POLL_TICK: Duration = Duration::from_millis(100);

/// Reaper scan interval.
const REAP_INTERVAL: Duration = Duration::from_secs(1);

struct ServerInner {
    reactor: Mutex<Reactor>,
    handle: Arc<ReactorHandle>,
    registry: Arc<SessionRegistry>,
    pool: Arc<WorkerPool>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    heartbeat_timeout: Duration,
    local_addr: SocketAddr,
}

#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Bind the listener and wire everything up with the default
    /// credential policy.
    pub fn new(config: &Config) -> io::Result<Self> {
        Self::with_validator(config, Box::new(NonEmptyValidator))
    }

    /// Same, with a caller-provided credential store.
    pub fn with_validator(
        config: &Config,
        validator: Box<dyn CredentialValidator>,
    ) -> io::Result<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let pool = Arc::new(WorkerPool::new(config.workers, config.queue_capacity)?);
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), validator));

        let callbacks = Callbacks {
            on_connect: {
                let registry = Arc::clone(&registry);
                Box::new(move |session| registry.add(Arc::clone(session)))
            },
            on_message: {
                let pool = Arc::clone(&pool);
                Box::new(move |session, frame| {
                    // Only the first frame of a burst schedules a drain
                    // task; the task keeps popping until the inbox is dry.
                    if session.push_frame(frame) {
                        let session = Arc::clone(session);
                        let dispatcher = Arc::clone(&dispatcher);
                        pool.submit(Box::new(move || {
                            while let Some(frame) = session.pop_frame() {
                                dispatcher.dispatch(&session, &frame);
                            }
                        }));
                    }
                })
            },
            on_disconnect: {
                let registry = Arc::clone(&registry);
                Box::new(move |fd| registry.remove(fd))
            },
        };

        let reactor = Reactor::new(config.port, callbacks)?;
        let handle = reactor.handle();
        let local_addr = reactor.local_addr();

        Ok(Self {
            inner: Arc::new(ServerInner {
                reactor: Mutex::new(reactor),
                handle,
                registry,
                pool,
                running: Arc::new(AtomicBool::new(false)),
                shutdown: Arc::new(AtomicBool::new(false)),
                reaper: Mutex::new(None),
                heartbeat_timeout: config.heartbeat_timeout,
                local_addr,
            }),
        })
    }

    /// Mark the server running and spawn the heartbeat reaper.
    pub fn start(&self) -> io::Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let reaper = {
            let running = Arc::clone(&self.inner.running);
            let registry = Arc::clone(&self.inner.registry);
            let handle = Arc::clone(&self.inner.handle);
            let timeout = self.inner.heartbeat_timeout;

            thread::Builder::new()
                .name("heartbeat-reaper".to_string())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        thread::sleep(REAP_INTERVAL);
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }

                        let sessions = registry.authenticated_sessions();
                        let expired = heartbeat::expired_fds(
                            &sessions,
                            timeout,
                            std::time::Instant::now(),
                        );
                        for fd in expired {
                            info!(fd, "removing timed out session");
                            registry.remove(fd);
                            handle.request_close(fd);
                        }
                    }
                })?
        };
        *self.inner.reaper.lock().unwrap() = Some(reaper);

        info!(addr = %self.inner.local_addr, "server started");
        Ok(())
    }

    /// Drive the reactor on the calling thread until `stop` is called or
    /// the shutdown flag is raised, then shut the reactor down.
    pub fn run(&self) {
        if !self.is_running() {
            warn!("server not started");
            return;
        }

        let mut reactor = self.inner.reactor.lock().unwrap();
        while self.is_running() {
            if self.inner.shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested");
                break;
            }
            if let Err(e) = reactor.run_once(POLL_TICK) {
                warn!(error = %e, "poll error");
            }
        }
        self.stop();
        reactor.shutdown();
        info!("server stopped");
    }

    /// Request shutdown: the reactor exits within a poll tick, the reaper
    /// within a scan interval, and workers after draining queued tasks.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(reaper) = self.inner.reaper.lock().unwrap().take() {
            let _ = reaper.join();
        }
        self.inner.pool.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Flag that requests shutdown when set true; `run` notices within a
    /// poll tick. Hand this to `signal_hook::flag::register` so SIGINT/
    /// SIGTERM trigger the same graceful path as `stop`.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner.shutdown)
    }

    /// Actual bound address (useful when configured with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Send a frame to every authenticated client. Returns the number of
    /// clients written.
    pub fn broadcast(&self, header: &MessageHeader, body: &[u8]) -> usize {
        self.inner.registry.broadcast(header, body)
    }

    /// Send a frame to one authenticated client by connection fd.
    pub fn send_to_client(&self, fd: RawFd, header: &MessageHeader, body: &[u8]) -> bool {
        self.inner.registry.send_to_client(fd, header, body)
    }

    /// Send a frame to one authenticated client by username.
    pub fn send_to_user(&self, username: &str, header: &MessageHeader, body: &[u8]) -> bool {
        self.inner.registry.send_to_user(username, header, body)
    }

    /// Number of live sessions in the registry.
    pub fn session_count(&self) -> usize {
        self.inner.registry.count()
    }

    /// Number of dispatch tasks waiting for a worker.
    pub fn pending_task_count(&self) -> usize {
        self.inner.pool.pending_count()
    }
}
