//! Heartbeat timeout detection.
//!
//! The reaper thread in `server` calls `expired_fds` once per second on a
//! snapshot of authenticated sessions and evicts the sessions it returns.

use crate::session::Session;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Collect the fds of sessions whose heartbeat age strictly exceeds
/// `timeout` at `now`. Taking `now` as a parameter keeps the boundary
/// behavior testable without real waiting.
pub fn expired_fds(sessions: &[Arc<Session>], timeout: Duration, now: Instant) -> Vec<RawFd> {
    let mut expired = Vec::new();
    for session in sessions {
        let elapsed = now.saturating_duration_since(session.last_heartbeat());
        if elapsed > timeout {
            info!(
                fd = session.fd(),
                elapsed_secs = elapsed.as_secs(),
                "session heartbeat timeout"
            );
            expired.push(session.fd());
        }
    }
    expired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::session_pair;

    #[test]
    fn test_fresh_session_not_expired() {
        let (session, _peer) = session_pair();
        let sessions = vec![session];

        let expired = expired_fds(&sessions, Duration::from_secs(10), Instant::now());
        assert!(expired.is_empty());
    }

    #[test]
    fn test_stale_session_expired() {
        let (session, _peer) = session_pair();
        let fd = session.fd();
        let sessions = vec![session];

        let future = Instant::now() + Duration::from_secs(11);
        let expired = expired_fds(&sessions, Duration::from_secs(10), future);
        assert_eq!(expired, vec![fd]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let (session, _peer) = session_pair();
        session.touch_heartbeat();
        let at = session.last_heartbeat();
        let sessions = vec![session];

        // Exactly at the threshold: not yet expired.
        let expired = expired_fds(&sessions, Duration::from_secs(10), at + Duration::from_secs(10));
        assert!(expired.is_empty());
    }

    #[test]
    fn test_touch_resets_clock() {
        let (session, _peer) = session_pair();
        let sessions = vec![session.clone()];
        let timeout = Duration::from_secs(10);

        let later = Instant::now() + Duration::from_secs(11);
        assert_eq!(expired_fds(&sessions, timeout, later).len(), 1);

        // A heartbeat arriving resets the clock.
        session.touch_heartbeat();
        let soon = session.last_heartbeat() + Duration::from_secs(5);
        assert!(expired_fds(&sessions, timeout, soon).is_empty());
    }
}
