//! framehub: a framed TCP message hub.
//!
//! A single-process server that multiplexes many client connections over
//! one listening endpoint, enforces a length-prefixed binary protocol,
//! authenticates clients, and delivers frames between the server and
//! authenticated peers:
//! - direct send by connection fd or by username
//! - broadcast to all authenticated peers
//! - eviction of peers that stop sending heartbeats
//!
//! Architecture: one reactor thread drives non-blocking I/O from mio
//! readiness events; extracted frames are dispatched on a fixed worker
//! pool (in arrival order per connection); a reaper thread evicts
//! sessions whose heartbeat age exceeds the configured threshold.

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod heartbeat;
pub mod pool;
pub mod protocol;
pub mod reactor;
pub mod registry;
pub mod server;
pub mod session;

pub use config::Config;
pub use dispatcher::{CredentialValidator, NonEmptyValidator};
pub use protocol::{MessageHeader, MessageType};
pub use server::Server;
