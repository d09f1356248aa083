//! RTCP per RFC 3550: SR/RR/SDES/BYE/APP wire types, compound packet codec,
//! per-participant statistics and the periodic report engine.

pub mod app;
pub mod bye;
pub mod compound;
pub mod engine;
pub mod header;
pub mod receiver_report;
pub mod report;
pub mod sdes;
pub mod sender_report;
pub mod stats;

pub use app::App;
pub use bye::Bye;
pub use compound::RtcpPacket;
pub use engine::{RtcpEngine, RtcpHooks};
pub use header::{CommonHeader, PT_APP, PT_BYE, PT_RR, PT_SDES, PT_SR};
pub use receiver_report::ReceiverReport;
pub use report::{ReportBlock, SenderInfo};
pub use sdes::{Sdes, SdesChunk, SdesItem};
pub use sender_report::SenderReport;
pub use stats::{RxStats, SenderStats};

use std::fmt;

/// Errors raised while encoding or decoding RTCP packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpError {
    TooShort,
    BadVersion(u8),
    UnknownPacketType(u8),
    Truncated,
    TooManyReportBlocks(usize),
    TooManyByeSources(usize),
    SdesItemTooLong,
    SdesItemTooShort,
}

impl fmt::Display for RtcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RtcpError::*;
        match self {
            TooShort => write!(f, "buffer too short"),
            BadVersion(v) => write!(f, "bad RTCP version: {v}"),
            UnknownPacketType(pt) => write!(f, "unknown RTCP packet type: {pt}"),
            Truncated => write!(f, "truncated RTCP structure"),
            TooManyReportBlocks(n) => write!(f, "too many report blocks: {n}"),
            TooManyByeSources(n) => write!(f, "too many BYE sources: {n}"),
            SdesItemTooLong => write!(f, "SDES item exceeds 255 bytes"),
            SdesItemTooShort => write!(f, "SDES item too short"),
        }
    }
}

impl std::error::Error for RtcpError {}

impl From<RtcpError> for crate::error::RtpError {
    fn from(_: RtcpError) -> Self {
        crate::error::RtpError::InvalidValue
    }
}
