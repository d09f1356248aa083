//! Opus payload per RFC 7587: every Opus packet travels verbatim in one RTP
//! packet, no fragmentation on either side.

use crate::rtp::RtpPacket;
use crate::rtp::frame_queue::PayloadChunk;

/// One chunk covering the whole packet; `None` when it cannot fit.
pub fn packetize(len: usize, max_payload: usize) -> Option<Vec<PayloadChunk>> {
    if len == 0 || len > max_payload {
        return None;
    }
    Some(vec![PayloadChunk::plain(0..len, true)])
}

/// Each received packet is delivered as one frame.
pub fn depacketize(pkt: &RtpPacket) -> Option<Vec<u8>> {
    if pkt.payload.is_empty() {
        return None;
    }
    Some(pkt.payload.clone())
}
