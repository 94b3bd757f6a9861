//! Directory of live sessions.
//!
//! Two indices under one mutex: fd → session (primary) and username → fd
//! (secondary, authenticated sessions only). The secondary index is only
//! ever mutated together with the primary, so username uniqueness holds at
//! all times.
//!
//! Invariant: no socket write happens while the lock is held. Send paths
//! take a snapshot or a single handle under the lock, release it, then
//! write.

use crate::protocol::MessageHeader;
use crate::session::Session;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Indices {
    by_fd: HashMap<RawFd, Arc<Session>>,
    by_username: HashMap<String, RawFd>,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Indices>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session by fd. Re-adding an fd replaces the old session.
    pub fn add(&self, session: Arc<Session>) {
        let mut inner = self.inner.lock().unwrap();
        inner.by_fd.insert(session.fd(), session.clone());
        info!(fd = session.fd(), total = inner.by_fd.len(), "session added");
    }

    /// Erase a session by fd. Idempotent.
    pub fn remove(&self, fd: RawFd) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(session) = inner.by_fd.remove(&fd) {
            if session.is_authenticated() {
                let name = session.username();
                inner.by_username.remove(&name);
                info!(
                    fd,
                    user = %name,
                    remaining = inner.by_fd.len(),
                    "session removed"
                );
            } else {
                info!(fd, remaining = inner.by_fd.len(), "session removed");
            }
        }
    }

    pub fn get(&self, fd: RawFd) -> Option<Arc<Session>> {
        self.inner.lock().unwrap().by_fd.get(&fd).cloned()
    }

    /// Look up the unique authenticated session for a username.
    pub fn get_by_username(&self, username: &str) -> Option<Arc<Session>> {
        let inner = self.inner.lock().unwrap();
        let fd = inner.by_username.get(username)?;
        inner.by_fd.get(fd).cloned()
    }

    /// Perform the auth transition: mark the session authenticated and
    /// claim its username, atomically with the index update. Returns false
    /// if another live session already holds the username.
    pub fn bind_username(&self, session: &Arc<Session>, username: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.by_username.get(username) {
            Some(&fd) if fd != session.fd() => {
                warn!(
                    fd = session.fd(),
                    user = %username,
                    holder = fd,
                    "username already in use"
                );
                false
            }
            _ => {
                inner.by_username.insert(username.to_string(), session.fd());
                session.set_username(username);
                session.set_authenticated(true);
                true
            }
        }
    }

    /// Snapshot of all authenticated sessions.
    pub fn authenticated_sessions(&self) -> Vec<Arc<Session>> {
        self.inner
            .lock()
            .unwrap()
            .by_fd
            .values()
            .filter(|s| s.is_authenticated())
            .cloned()
            .collect()
    }

    /// Send a frame to every authenticated session. Returns how many
    /// writes succeeded; individual failures are logged and skipped.
    pub fn broadcast(&self, header: &MessageHeader, body: &[u8]) -> usize {
        let targets = self.authenticated_sessions();
        info!(recipients = targets.len(), "broadcasting to authenticated clients");

        let mut delivered = 0;
        for session in &targets {
            match session.write_frame(header, body) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(fd = session.fd(), error = %e, "broadcast write failed"),
            }
        }
        delivered
    }

    /// Send to one authenticated session by fd. False if the session is
    /// absent, unauthenticated, or the write fails.
    pub fn send_to_client(&self, fd: RawFd, header: &MessageHeader, body: &[u8]) -> bool {
        let Some(session) = self.get(fd) else {
            warn!(fd, "session not found");
            return false;
        };
        if !session.is_authenticated() {
            warn!(fd, "session not authenticated");
            return false;
        }
        match session.write_frame(header, body) {
            Ok(()) => true,
            Err(e) => {
                warn!(fd, error = %e, "send failed");
                false
            }
        }
    }

    /// Send to one authenticated session by username.
    pub fn send_to_user(&self, username: &str, header: &MessageHeader, body: &[u8]) -> bool {
        let Some(session) = self.get_by_username(username) else {
            warn!(user = %username, "user not found");
            return false;
        };
        debug!(user = %username, fd = session.fd(), "sending to user");
        match session.write_frame(header, body) {
            Ok(()) => true,
            Err(e) => {
                warn!(user = %username, fd = session.fd(), error = %e, "send failed");
                false
            }
        }
    }

    /// Size of the fd index.
    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().by_fd.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageType, HEADER_LEN};
    use crate::session::testing::session_pair;

    #[test]
    fn test_add_remove_count() {
        let registry = SessionRegistry::new();
        let (s1, _p1) = session_pair();
        let (s2, _p2) = session_pair();

        registry.add(s1.clone());
        registry.add(s2.clone());
        assert_eq!(registry.count(), 2);

        registry.remove(s1.fd());
        assert_eq!(registry.count(), 1);
        assert!(registry.get(s1.fd()).is_none());
        assert!(registry.get(s2.fd()).is_some());

        // Idempotent.
        registry.remove(s1.fd());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_fd_uniqueness() {
        let registry = SessionRegistry::new();
        let (s1, _p1) = session_pair();

        registry.add(s1.clone());
        registry.add(s1.clone());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_bind_username_and_lookup() {
        let registry = SessionRegistry::new();
        let (s1, _p1) = session_pair();
        registry.add(s1.clone());

        assert!(registry.bind_username(&s1, "alice"));
        assert!(s1.is_authenticated());
        assert_eq!(s1.username(), "alice");

        let found = registry.get_by_username("alice").unwrap();
        assert_eq!(found.fd(), s1.fd());
        assert!(registry.get_by_username("bob").is_none());
    }

    #[test]
    fn test_bind_username_rejects_duplicate() {
        let registry = SessionRegistry::new();
        let (s1, _p1) = session_pair();
        let (s2, _p2) = session_pair();
        registry.add(s1.clone());
        registry.add(s2.clone());

        assert!(registry.bind_username(&s1, "alice"));
        assert!(!registry.bind_username(&s2, "alice"));
        assert!(!s2.is_authenticated());

        // Rebinding the same session is a no-op success.
        assert!(registry.bind_username(&s1, "alice"));
    }

    #[test]
    fn test_remove_clears_username_index() {
        let registry = SessionRegistry::new();
        let (s1, _p1) = session_pair();
        registry.add(s1.clone());
        registry.bind_username(&s1, "alice");

        registry.remove(s1.fd());
        assert!(registry.get_by_username("alice").is_none());

        // Username is free for a new session now.
        let (s2, _p2) = session_pair();
        registry.add(s2.clone());
        assert!(registry.bind_username(&s2, "alice"));
    }

    #[test]
    fn test_broadcast_visits_only_authenticated() {
        let registry = SessionRegistry::new();
        let (s1, mut p1) = session_pair();
        let (s2, mut p2) = session_pair();
        let (s3, mut p3) = session_pair();
        registry.add(s1.clone());
        registry.add(s2.clone());
        registry.add(s3.clone());

        registry.bind_username(&s1, "alice");
        registry.bind_username(&s2, "bob");

        let header = MessageHeader::for_body(MessageType::Broadcast, 1);
        let delivered = registry.broadcast(&header, b"x");
        assert_eq!(delivered, 2);

        assert_eq!(p1.recv_exact(HEADER_LEN + 1).len(), HEADER_LEN + 1);
        assert_eq!(p2.recv_exact(HEADER_LEN + 1).len(), HEADER_LEN + 1);
        assert!(p3.is_silent());
    }

    #[test]
    fn test_send_to_client_requires_auth() {
        let registry = SessionRegistry::new();
        let (s1, mut p1) = session_pair();
        registry.add(s1.clone());

        let header = MessageHeader::for_body(MessageType::Data, 2);
        assert!(!registry.send_to_client(s1.fd(), &header, b"hi"));
        assert!(p1.is_silent());

        registry.bind_username(&s1, "alice");
        assert!(registry.send_to_client(s1.fd(), &header, b"hi"));
        assert_eq!(p1.recv_exact(HEADER_LEN + 2).len(), HEADER_LEN + 2);

        assert!(!registry.send_to_client(9999, &header, b"hi"));
    }

    #[test]
    fn test_send_to_user() {
        let registry = SessionRegistry::new();
        let (s1, mut p1) = session_pair();
        registry.add(s1.clone());
        registry.bind_username(&s1, "alice");

        let header = MessageHeader::for_body(MessageType::Data, 3);
        assert!(registry.send_to_user("alice", &header, b"msg"));
        assert_eq!(p1.recv_exact(HEADER_LEN + 3).len(), HEADER_LEN + 3);

        assert!(!registry.send_to_user("nobody", &header, b"msg"));
    }
}
