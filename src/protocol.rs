//! Wire protocol definitions.
//!
//! Every packet is a fixed 16-byte header followed by `body_len` bytes:
//!
//! ```text
//! [u32 LE: magic] [u16 LE: type] [u16 LE: reserved] [u32 LE: total_len] [u32 LE: body_len]
//! ```
//!
//! All header integers are little-endian on the wire regardless of host
//! architecture. `total_len` counts the header, so for every valid packet
//! `total_len == HEADER_LEN + body_len`.

use std::fmt;

/// Magic number expected at the start of every packet.
pub const PACKET_MAGIC: u32 = 0x1234_5678;

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = 16;

/// Maximum packet size (header + body), 16 MiB.
pub const MAX_PACKET_LEN: usize = 16 * 1024 * 1024;

/// Maximum body size.
pub const MAX_BODY_LEN: usize = MAX_PACKET_LEN - HEADER_LEN;

/// Highest message type value accepted on the wire.
pub const MAX_MESSAGE_TYPE: u16 = 100;

/// Size of an encoded login request body.
pub const LOGIN_REQUEST_LEN: usize = 64;

/// Size of an encoded login response body.
pub const LOGIN_RESPONSE_LEN: usize = 68;

/// Well-known message types.
///
/// Values 6..=100 are valid at the framing layer but have no handler;
/// the dispatcher logs and drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    LoginRequest = 1,
    LoginResponse = 2,
    Heartbeat = 3,
    Data = 4,
    Broadcast = 5,
}

impl MessageType {
    /// Map a wire value to a known type, if any.
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            1 => Some(MessageType::LoginRequest),
            2 => Some(MessageType::LoginResponse),
            3 => Some(MessageType::Heartbeat),
            4 => Some(MessageType::Data),
            5 => Some(MessageType::Broadcast),
            _ => None,
        }
    }
}

/// Why a header failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    BadMagic(u32),
    BadType(u16),
    BadTotalLength(u32),
    BadBodyLength(u32),
    LengthMismatch { total_len: u32, body_len: u32 },
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::BadMagic(magic) => {
                write!(f, "Invalid magic number: 0x{magic:08x}")
            }
            HeaderError::BadType(t) => write!(f, "Invalid message type: {t}"),
            HeaderError::BadTotalLength(len) => write!(f, "Invalid total length: {len}"),
            HeaderError::BadBodyLength(len) => write!(f, "Invalid body length: {len}"),
            HeaderError::LengthMismatch {
                total_len,
                body_len,
            } => write!(
                f,
                "Length fields mismatch: total={total_len}, body={body_len}"
            ),
        }
    }
}

impl std::error::Error for HeaderError {}

/// Packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u32,
    pub msg_type: u16,
    pub reserved: u16,
    pub total_len: u32,
    pub body_len: u32,
}

impl MessageHeader {
    /// Build a header for a message of the given type and body size.
    pub fn for_body(msg_type: MessageType, body_len: usize) -> Self {
        Self {
            magic: PACKET_MAGIC,
            msg_type: msg_type as u16,
            reserved: 0,
            total_len: (HEADER_LEN + body_len) as u32,
            body_len: body_len as u32,
        }
    }

    /// Encode to the little-endian wire layout.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[6..8].copy_from_slice(&self.reserved.to_le_bytes());
        buf[8..12].copy_from_slice(&self.total_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.body_len.to_le_bytes());
        buf
    }

    /// Decode from wire bytes. The caller must supply at least `HEADER_LEN`
    /// bytes; no validation happens here.
    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= HEADER_LEN);
        Self {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            msg_type: u16::from_le_bytes([buf[4], buf[5]]),
            reserved: u16::from_le_bytes([buf[6], buf[7]]),
            total_len: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            body_len: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }

    /// Validate every header invariant.
    pub fn validate(&self) -> Result<(), HeaderError> {
        if self.magic != PACKET_MAGIC {
            return Err(HeaderError::BadMagic(self.magic));
        }
        if self.msg_type == 0 || self.msg_type > MAX_MESSAGE_TYPE {
            return Err(HeaderError::BadType(self.msg_type));
        }
        if (self.total_len as usize) < HEADER_LEN || self.total_len as usize > MAX_PACKET_LEN {
            return Err(HeaderError::BadTotalLength(self.total_len));
        }
        if self.body_len as usize > MAX_BODY_LEN {
            return Err(HeaderError::BadBodyLength(self.body_len));
        }
        if self.total_len as usize != HEADER_LEN + self.body_len as usize {
            return Err(HeaderError::LengthMismatch {
                total_len: self.total_len,
                body_len: self.body_len,
            });
        }
        Ok(())
    }
}

/// Login request body: `username[32] | password[32]`, zero-padded,
/// interpreted as C strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    /// Decode from a login body. Returns `None` if the body is undersized.
    pub fn decode(body: &[u8]) -> Option<Self> {
        if body.len() < LOGIN_REQUEST_LEN {
            return None;
        }
        Some(Self {
            username: cstr_field(&body[0..32]),
            password: cstr_field(&body[32..64]),
        })
    }

    /// Encode to the fixed 64-byte wire layout. Fields longer than 31 bytes
    /// are truncated so the terminating NUL always fits.
    pub fn encode(&self) -> [u8; LOGIN_REQUEST_LEN] {
        let mut buf = [0u8; LOGIN_REQUEST_LEN];
        write_cstr_field(&mut buf[0..32], &self.username);
        write_cstr_field(&mut buf[32..64], &self.password);
        buf
    }
}

/// Login response body: `success:u32 | message[64]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
}

impl LoginResponse {
    pub fn encode(&self) -> [u8; LOGIN_RESPONSE_LEN] {
        let mut buf = [0u8; LOGIN_RESPONSE_LEN];
        buf[0..4].copy_from_slice(&u32::from(self.success).to_le_bytes());
        write_cstr_field(&mut buf[4..68], &self.message);
        buf
    }

    /// Decode from a response body. Returns `None` if the body is undersized.
    pub fn decode(body: &[u8]) -> Option<Self> {
        if body.len() < LOGIN_RESPONSE_LEN {
            return None;
        }
        let success = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        Some(Self {
            success: success != 0,
            message: cstr_field(&body[4..68]),
        })
    }
}

/// Read a zero-padded field up to the first NUL.
fn cstr_field(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Write a string into a zero-padded field, truncating to leave a NUL.
fn write_cstr_field(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len() - 1);
    field[..len].copy_from_slice(&bytes[..len]);
}
