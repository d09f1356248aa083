//! SRTP/SRTCP per RFC 3711: key derivation, AES-CTR transforms,
//! HMAC-SHA1 authentication, replay protection and rollover counting.

pub mod context;
pub mod kdf;
pub mod replay;
pub mod srtcp;

pub use context::{SrtpContext, SrtpStreamConfig};
pub use kdf::{SessionKeys, SrtpKeySize};
pub use replay::ReplayWindow;
pub use srtcp::SrtcpContext;

use std::fmt;

/// Labels fed to the AES-CM key derivation (RFC 3711 §4.3).
pub const LABEL_RTP_ENCRYPTION: u8 = 0x00;
pub const LABEL_RTP_AUTH: u8 = 0x01;
pub const LABEL_RTP_SALT: u8 = 0x02;
pub const LABEL_RTCP_ENCRYPTION: u8 = 0x03;
pub const LABEL_RTCP_AUTH: u8 = 0x04;
pub const LABEL_RTCP_SALT: u8 = 0x05;

/// HMAC-SHA1 output truncated to 80 bits on the wire.
pub const AUTH_TAG_LEN: usize = 10;
/// HMAC-SHA1 key length (160 bits).
pub const SESSION_AUTH_LEN: usize = 20;
/// Session salt length (112 bits).
pub const SESSION_SALT_LEN: usize = 14;
/// Master salt length (112 bits).
pub const MASTER_SALT_LEN: usize = 14;
/// Replay window size in packets.
pub const REPLAY_WINDOW_SIZE: u64 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SrtpError {
    TooShort,
    AuthTagMismatch,
    Replay,
    BadKeyLength,
    MalformedHeader,
}

impl fmt::Display for SrtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SrtpError::*;
        match self {
            TooShort => write!(f, "packet too short for SRTP"),
            AuthTagMismatch => write!(f, "auth tag mismatch"),
            Replay => write!(f, "replayed packet index"),
            BadKeyLength => write!(f, "invalid master key length"),
            MalformedHeader => write!(f, "malformed RTP header"),
        }
    }
}

impl std::error::Error for SrtpError {}

impl From<SrtpError> for crate::error::RtpError {
    fn from(e: SrtpError) -> Self {
        match e {
            SrtpError::AuthTagMismatch | SrtpError::Replay => crate::error::RtpError::AuthTagMismatch,
            SrtpError::BadKeyLength => crate::error::RtpError::InvalidValue,
            _ => crate::error::RtpError::InvalidValue,
        }
    }
}

/// Constant-time comparison so a tag check does not leak the position of the
/// first mismatching byte.
#[must_use]
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
