//! H.265 framing per RFC 7798 (single NAL, FU type 49, AP type 48).
//!
//! The two-byte NAL header is `F(1) | type(6) | layer(6) | tid(3)`.

use super::h26x::{FuFields, NalFormat};

const FU: u8 = 49;
const AP: u8 = 48;

/// Intra NAL types: BLA_W_LP(16) .. CRA_NUT(21).
const INTRA_FIRST: u8 = 16;
const INTRA_LAST: u8 = 21;

pub struct H265Format;

impl NalFormat for H265Format {
    const NAL_HEADER_LEN: usize = 2;
    // Two-byte FU payload header + FU header.
    const FU_OVERHEAD: usize = 3;

    #[inline]
    fn nal_type(header: &[u8]) -> u8 {
        (header[0] >> 1) & 0x3F
    }

    #[inline]
    fn is_intra(nal_type: u8) -> bool {
        (INTRA_FIRST..=INTRA_LAST).contains(&nal_type)
    }

    #[inline]
    fn is_fu(nal_type: u8) -> bool {
        nal_type == FU
    }

    #[inline]
    fn is_ap(nal_type: u8) -> bool {
        nal_type == AP
    }

    fn fu_headers(nal_header: &[u8], start: bool, end: bool) -> Vec<u8> {
        // Payload header keeps F/layer/tid, swaps in type 49.
        let p0 = (nal_header[0] & 0x81) | (FU << 1);
        let p1 = nal_header[1];
        let orig_type = Self::nal_type(nal_header);
        let fu = ((start as u8) << 7) | ((end as u8) << 6) | (orig_type & 0x3F);
        vec![p0, p1, fu]
    }

    fn parse_fu(payload: &[u8]) -> Option<FuFields> {
        if payload.len() < 4 {
            return None;
        }
        let fu = payload[2];
        let orig_type = fu & 0x3F;
        Some(FuFields {
            start: fu & 0x80 != 0,
            end: fu & 0x40 != 0,
            nal_header: vec![(payload[0] & 0x81) | (orig_type << 1), payload[1]],
            consumed: 3,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::formats::h26x::{ReassemblyConfig, Reassembler, packetize};
    use crate::rtp::RtpPacket;

    /// NAL header with the given type, layer 0, tid 1.
    fn nal_header(nal_type: u8) -> [u8; 2] {
        [(nal_type << 1) & 0x7E, 0x01]
    }

    #[test]
    fn type_extraction_and_intra_set() {
        assert_eq!(H265Format::nal_type(&nal_header(19)), 19);
        for t in 16..=21 {
            assert!(H265Format::is_intra(t), "type {t} must be intra");
        }
        assert!(!H265Format::is_intra(1));
        assert!(!H265Format::is_intra(32));
    }

    #[test]
    fn fu_headers_round_trip() {
        let hdr = nal_header(19);
        let wire = H265Format::fu_headers(&hdr, true, false);
        assert_eq!(H265Format::nal_type(&wire), FU);

        let mut payload = wire;
        payload.extend_from_slice(&[0xAA; 8]);
        let fu = H265Format::parse_fu(&payload).unwrap();
        assert!(fu.start);
        assert!(!fu.end);
        assert_eq!(fu.nal_header, hdr.to_vec());
        assert_eq!(fu.consumed, 3);
    }

    #[test]
    fn large_intra_frame_round_trip_without_start_code() {
        // One 50000-byte NAL whose first two bytes encode type 19 (IDR_W_RADL).
        let mut nal = nal_header(19).to_vec();
        nal.extend(std::iter::repeat_n(0x42u8, 49_998));
        assert_eq!(nal.len(), 50_000);

        let budget = 1440;
        let chunks = packetize::<H265Format>(&nal, budget, true);
        assert!(chunks.len() > 30);
        for ch in &chunks {
            assert!(ch.format_header.len() + ch.range.len() <= budget);
        }

        let mut rx = Reassembler::<H265Format>::new(ReassemblyConfig {
            prepend_start_code: false,
            ..ReassemblyConfig::default()
        });
        let mut frames = Vec::new();
        for (i, ch) in chunks.iter().enumerate() {
            let mut payload = ch.format_header.clone();
            payload.extend_from_slice(&nal[ch.range.clone()]);
            let pkt = RtpPacket::simple(107, ch.marker, i as u16, 90_000, 9, payload);
            frames.extend(rx.push(&pkt).frames);
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data.len(), 50_000);
        assert_eq!(frames[0].data, nal);
    }

    #[test]
    fn out_of_order_fragments_still_complete() {
        let mut nal = nal_header(1).to_vec();
        nal.extend(0..=255u8);
        let chunks = packetize::<H265Format>(&nal, 64, true);
        assert!(chunks.len() >= 3);

        let mut pkts: Vec<RtpPacket> = chunks
            .iter()
            .enumerate()
            .map(|(i, ch)| {
                let mut payload = ch.format_header.clone();
                payload.extend_from_slice(&nal[ch.range.clone()]);
                RtpPacket::simple(107, ch.marker, i as u16, 5, 9, payload)
            })
            .collect();
        pkts.swap(0, 2); // scramble arrival order

        let mut rx = Reassembler::<H265Format>::new(ReassemblyConfig {
            prepend_start_code: false,
            ..ReassemblyConfig::default()
        });
        let mut frames = Vec::new();
        for pkt in &pkts {
            frames.extend(rx.push(pkt).frames);
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, nal);
    }

    #[test]
    fn aggregation_packet_parses_sized_records() {
        let n1 = [nal_header(32)[0], nal_header(32)[1], 0x11]; // VPS
        let n2 = [nal_header(33)[0], nal_header(33)[1], 0x22]; // SPS
        let mut payload = vec![(AP << 1) & 0x7E, 0x01];
        for n in [&n1[..], &n2[..]] {
            payload.extend_from_slice(&(n.len() as u16).to_be_bytes());
            payload.extend_from_slice(n);
        }
        let pkt = RtpPacket::simple(107, true, 0, 1, 9, payload);

        let mut rx = Reassembler::<H265Format>::new(ReassemblyConfig {
            prepend_start_code: false,
            ..ReassemblyConfig::default()
        });
        let out = rx.push(&pkt);
        assert_eq!(out.frames.len(), 2);
        assert_eq!(out.frames[0].data, n1.to_vec());
        assert_eq!(out.frames[1].data, n2.to_vec());
    }
}
