//! RTP per RFC 3550: wire model, per-stream context and the send-side
//! frame queue.

pub mod context;
pub mod frame_queue;
pub mod header;
pub mod packet;

pub use context::RtpContext;
pub use frame_queue::FrameQueue;
pub use header::{RtpHeader, RtpHeaderExtension};
pub use packet::RtpPacket;

/// Protocol version carried in the two top bits of every RTP/RTCP packet.
pub const RTP_VERSION: u8 = 2;

/// Fixed RTP header length (no CSRCs, no extension).
pub const RTP_HEADER_LEN: usize = 12;

/// Errors specific to RTP encode/decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpPacketError {
    TooShort,
    BadVersion(u8),
    CsrcCountMismatch { expected: usize, buf_left: usize },
    HeaderExtensionTooShort,
    HeaderExtensionTooLong,
    PaddingTooShort,
    Invalid,
}

impl std::fmt::Display for RtpPacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use RtpPacketError::*;
        match self {
            TooShort => write!(f, "buffer too short for RTP header"),
            BadVersion(v) => write!(f, "bad RTP version: {v}"),
            CsrcCountMismatch { expected, buf_left } => {
                write!(f, "CSRC count {expected} exceeds remaining {buf_left} bytes")
            }
            HeaderExtensionTooShort => write!(f, "truncated RTP header extension"),
            HeaderExtensionTooLong => write!(f, "RTP header extension exceeds u16 words"),
            PaddingTooShort => write!(f, "invalid RTP padding count"),
            Invalid => write!(f, "invalid RTP packet"),
        }
    }
}

impl std::error::Error for RtpPacketError {}

impl From<RtpPacketError> for crate::error::RtpError {
    fn from(_: RtpPacketError) -> Self {
        crate::error::RtpError::InvalidValue
    }
}
