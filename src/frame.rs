//! The frame type delivered to the application.

use bytes::Bytes;

/// One complete media frame as reassembled by a depacketizer.
///
/// For H.26x this is an access unit (one or more NAL units, optionally
/// Annex-B framed); for Opus one packet; for the generic format the exact
/// byte sequence the sender pushed.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub payload: Bytes,
    /// RTP timestamp shared by every fragment of the frame.
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload_type: u8,
    /// Sequence number of the first fragment.
    pub first_seq: u16,
    /// Marker bit of the closing fragment.
    pub marker: bool,
}

impl MediaFrame {
    pub fn new(payload: Bytes, timestamp: u32, ssrc: u32, payload_type: u8, first_seq: u16, marker: bool) -> Self {
        Self {
            payload,
            timestamp,
            ssrc,
            payload_type,
            first_seq,
            marker,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
