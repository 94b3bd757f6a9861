//! Message dispatch and the protocol state machine.
//!
//! Each extracted frame is routed by type to the login, heartbeat, or data
//! handler. Sessions start unauthenticated; a valid LOGIN_REQUEST is the
//! only transition to the authenticated state, and authentication ends
//! only with the session. Heartbeat and data frames from unauthenticated
//! sessions are logged and dropped without a reply.

use crate::codec::Frame;
use crate::protocol::{LoginRequest, LoginResponse, MessageHeader, MessageType};
use crate::registry::SessionRegistry;
use crate::session::Session;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Seam for the persistent credential store.
///
/// The server core only needs a yes/no answer; a real deployment plugs a
/// database-backed implementation in here.
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, username: &str, password: &str) -> bool;
}

/// Default policy: accept any non-empty username and password.
pub struct NonEmptyValidator;

impl CredentialValidator for NonEmptyValidator {
    fn validate(&self, username: &str, password: &str) -> bool {
        !username.is_empty() && !password.is_empty()
    }
}

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    validator: Box<dyn CredentialValidator>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>, validator: Box<dyn CredentialValidator>) -> Self {
        Self {
            registry,
            validator,
        }
    }

    /// Route one frame. Write failures on the response path are logged
    /// here and never propagate; the reactor notices the dead socket on
    /// its side.
    pub fn dispatch(&self, session: &Arc<Session>, frame: &Frame) {
        match MessageType::from_wire(frame.header.msg_type) {
            Some(MessageType::LoginRequest) => self.handle_login(session, &frame.body),
            Some(MessageType::Heartbeat) => self.handle_heartbeat(session),
            Some(MessageType::Data) => self.handle_data(session, &frame.body),
            _ => {
                warn!(
                    fd = session.fd(),
                    msg_type = frame.header.msg_type,
                    "unhandled message type, dropping"
                );
            }
        }
    }

    fn handle_login(&self, session: &Arc<Session>, body: &[u8]) {
        let Some(request) = LoginRequest::decode(body) else {
            warn!(fd = session.fd(), len = body.len(), "undersized login request");
            return;
        };

        debug!(fd = session.fd(), user = %request.username, "login request");

        let mut success = self
            .validator
            .validate(&request.username, &request.password);

        if success {
            // Duplicate usernames are rejected; the first login wins.
            success = self.registry.bind_username(session, &request.username);
        }

        if success {
            session.touch_heartbeat();
            info!(fd = session.fd(), user = %request.username, "user authenticated");
        }

        let response = LoginResponse {
            success,
            message: if success {
                "Login successful".to_string()
            } else {
                "Login failed".to_string()
            },
        };

        let body = response.encode();
        let header = MessageHeader::for_body(MessageType::LoginResponse, body.len());
        if let Err(e) = session.write_frame(&header, &body) {
            warn!(fd = session.fd(), error = %e, "failed to send login response");
        }
    }

    fn handle_heartbeat(&self, session: &Arc<Session>) {
        if !session.is_authenticated() {
            warn!(fd = session.fd(), "heartbeat from unauthenticated session");
            return;
        }

        session.touch_heartbeat();

        let header = MessageHeader::for_body(MessageType::Heartbeat, 0);
        if let Err(e) = session.write_frame(&header, &[]) {
            warn!(fd = session.fd(), error = %e, "failed to echo heartbeat");
        }
    }

    fn handle_data(&self, session: &Arc<Session>, body: &[u8]) {
        if !session.is_authenticated() {
            warn!(fd = session.fd(), "data from unauthenticated session");
            return;
        }

        debug!(
            fd = session.fd(),
            user = %session.username(),
            len = body.len(),
            "data message"
        );

        // Echo back to the sender.
        let header = MessageHeader::for_body(MessageType::Data, body.len());
        if let Err(e) = session.write_frame(&header, body) {
            warn!(fd = session.fd(), error = %e, "failed to echo data");
        }
    }
}
