//! The generic payload: one frame per packet, with optional MTU-sized
//! fragmentation when `fragment-generic` is enabled.

use crate::rtp::RtpPacket;
use crate::rtp::frame_queue::PayloadChunk;

/// Split a generic frame: a single packet when it fits, MTU-sized fragments
/// when fragmentation is allowed. The marker closes the frame either way.
/// Returns `None` when the frame exceeds the budget and fragmentation is
/// off.
pub fn packetize(len: usize, max_payload: usize, allow_fragmentation: bool) -> Option<Vec<PayloadChunk>> {
    if len == 0 || max_payload == 0 {
        return None;
    }
    if len <= max_payload {
        return Some(vec![PayloadChunk::plain(0..len, true)]);
    }
    if !allow_fragmentation {
        return None;
    }

    let mut chunks = Vec::with_capacity(len.div_ceil(max_payload));
    let mut offset = 0usize;
    while offset < len {
        let take = (len - offset).min(max_payload);
        let last = offset + take == len;
        chunks.push(PayloadChunk::plain(offset..offset + take, last));
        offset += take;
    }
    Some(chunks)
}

/// Reassembles fragmented generic frames: consecutive sequence numbers
/// sharing one timestamp, finalized by the marker bit.
#[derive(Debug, Default)]
pub struct GenericDepacketizer {
    cur_ts: Option<u32>,
    first_seq: u16,
    expected_seq: Option<u16>,
    buffer: Vec<u8>,
    corrupted: bool,
}

impl GenericDepacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one packet; returns the frame bytes once the marker arrives and
    /// every fragment was consecutive.
    pub fn push(&mut self, pkt: &RtpPacket) -> Option<(Vec<u8>, u16)> {
        match self.cur_ts {
            Some(ts) if ts != pkt.timestamp() => {
                // New frame started before the old one finished.
                self.reset();
                self.begin(pkt);
            }
            None => self.begin(pkt),
            _ => {}
        }

        if let Some(expect) = self.expected_seq
            && pkt.seq() != expect
        {
            self.corrupted = true;
        }
        self.expected_seq = Some(pkt.seq().wrapping_add(1));
        self.buffer.extend_from_slice(&pkt.payload);

        if !pkt.marker() {
            return None;
        }

        let out = if self.corrupted || self.buffer.is_empty() {
            None
        } else {
            Some((std::mem::take(&mut self.buffer), self.first_seq))
        };
        self.reset();
        out
    }

    fn begin(&mut self, pkt: &RtpPacket) {
        self.cur_ts = Some(pkt.timestamp());
        self.first_seq = pkt.seq();
        self.expected_seq = None;
        self.corrupted = false;
    }

    fn reset(&mut self) {
        self.cur_ts = None;
        self.expected_seq = None;
        self.buffer.clear();
        self.corrupted = false;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    fn pkt(seq: u16, ts: u32, marker: bool, payload: &[u8]) -> RtpPacket {
        RtpPacket::simple(0, marker, seq, ts, 1, payload.to_vec())
    }

    #[test]
    fn frame_within_budget_is_one_packet() {
        let chunks = packetize(100, 1440, false).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].marker);
        assert_eq!(chunks[0].range, 0..100);
    }

    #[test]
    fn boundary_sizes() {
        // Exactly at the budget: one packet.
        assert_eq!(packetize(1440, 1440, true).unwrap().len(), 1);
        // One past: two fragments.
        let chunks = packetize(1441, 1440, true).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].range, 0..1440);
        assert_eq!(chunks[1].range, 1440..1441);
        assert!(!chunks[0].marker);
        assert!(chunks[1].marker);
    }

    #[test]
    fn oversized_without_fragmentation_is_rejected() {
        assert!(packetize(1500, 1440, false).is_none());
    }

    #[test]
    fn empty_frame_is_rejected() {
        assert!(packetize(0, 1440, true).is_none());
    }

    #[test]
    fn fragments_reassemble_to_original() {
        let data = vec![b'a'; 1500];
        let chunks = packetize(data.len(), 1440, true).unwrap();

        let mut rx = GenericDepacketizer::new();
        let mut got = None;
        for (i, ch) in chunks.iter().enumerate() {
            got = rx.push(&pkt(10 + i as u16, 777, ch.marker, &data[ch.range.clone()]));
        }
        let (frame, first_seq) = got.unwrap();
        assert_eq!(frame, data);
        assert_eq!(first_seq, 10);
    }

    #[test]
    fn missing_fragment_drops_the_frame() {
        let mut rx = GenericDepacketizer::new();
        assert!(rx.push(&pkt(1, 5, false, &[1, 2])).is_none());
        // seq 2 lost
        assert!(rx.push(&pkt(3, 5, true, &[5, 6])).is_none());
        // Next frame is clean again.
        let out = rx.push(&pkt(4, 6, true, &[9]));
        assert_eq!(out.unwrap().0, vec![9]);
    }

    #[test]
    fn new_timestamp_discards_stale_partial() {
        let mut rx = GenericDepacketizer::new();
        assert!(rx.push(&pkt(1, 5, false, &[1])).is_none());
        let out = rx.push(&pkt(2, 6, true, &[7, 8]));
        assert_eq!(out.unwrap().0, vec![7, 8]);
    }
}
