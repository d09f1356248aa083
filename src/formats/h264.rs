//! H.264 framing per RFC 6184 (single NAL, FU-A, STAP-A).

use super::h26x::{FuFields, NalFormat};

/// NAL type carried by a FU-A packet.
const FU_A: u8 = 28;
/// NAL type of a STAP-A aggregation packet.
const STAP_A: u8 = 24;
/// IDR slice.
const IDR: u8 = 5;

pub struct H264Format;

impl NalFormat for H264Format {
    const NAL_HEADER_LEN: usize = 1;
    // FU indicator + FU header.
    const FU_OVERHEAD: usize = 2;

    #[inline]
    fn nal_type(header: &[u8]) -> u8 {
        header[0] & 0x1F
    }

    #[inline]
    fn is_intra(nal_type: u8) -> bool {
        nal_type == IDR
    }

    #[inline]
    fn is_fu(nal_type: u8) -> bool {
        nal_type == FU_A
    }

    #[inline]
    fn is_ap(nal_type: u8) -> bool {
        nal_type == STAP_A
    }

    fn fu_headers(nal_header: &[u8], start: bool, end: bool) -> Vec<u8> {
        let orig = nal_header[0];
        // FU indicator: F | NRI | 28.
        let indicator = (orig & 0xE0) | FU_A;
        // FU header: S | E | R=0 | original type.
        let fu = ((start as u8) << 7) | ((end as u8) << 6) | (orig & 0x1F);
        vec![indicator, fu]
    }

    fn parse_fu(payload: &[u8]) -> Option<FuFields> {
        if payload.len() < 3 {
            return None;
        }
        let indicator = payload[0];
        let fu = payload[1];
        Some(FuFields {
            start: fu & 0x80 != 0,
            end: fu & 0x40 != 0,
            nal_header: vec![(indicator & 0xE0) | (fu & 0x1F)],
            consumed: 2,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::formats::h26x::{ReassemblyConfig, Reassembler, packetize};
    use crate::rtp::RtpPacket;

    fn annexb(nalus: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for n in nalus {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(n);
        }
        out
    }

    #[test]
    fn small_nalus_become_single_packets() {
        let au = annexb(&[&[0x65, 1, 2], &[0x41, 3]]);
        let chunks = packetize::<H264Format>(&au, 1400, true);
        assert_eq!(chunks.len(), 2);
        assert!(!chunks[0].marker);
        assert!(chunks[1].marker);
        assert!(chunks[0].format_header.is_empty());
        assert_eq!(&au[chunks[0].range.clone()], &[0x65, 1, 2]);
    }

    #[test]
    fn large_nalu_becomes_fu_a_with_s_and_e_bits() {
        let mut nal = vec![0x65u8]; // IDR, NRI=3
        nal.extend((0..25u8).map(|x| x + 1));
        let au = annexb(&[&nal]);

        let chunks = packetize::<H264Format>(&au, 10, true);
        assert!(chunks.len() >= 3);
        for (i, ch) in chunks.iter().enumerate() {
            assert_eq!(ch.format_header[0] & 0x1F, FU_A);
            let fu = ch.format_header[1];
            let s = fu & 0x80 != 0;
            let e = fu & 0x40 != 0;
            assert_eq!(s, i == 0);
            assert_eq!(e, i == chunks.len() - 1);
            assert_eq!(fu & 0x1F, 5); // original type preserved
            assert!(ch.format_header.len() + ch.range.len() <= 10);
        }
        assert!(chunks.last().unwrap().marker);
    }

    #[test]
    fn fu_round_trip_rebuilds_the_nal_unit() {
        let mut nal = vec![0x65u8];
        nal.extend((0..100u8).cycle().take(5000));
        let au = annexb(&[&nal]);
        let chunks = packetize::<H264Format>(&au, 1200, true);

        let mut rx = Reassembler::<H264Format>::new(ReassemblyConfig {
            prepend_start_code: false,
            ..ReassemblyConfig::default()
        });
        let mut frames = Vec::new();
        for (i, ch) in chunks.iter().enumerate() {
            let mut payload = ch.format_header.clone();
            payload.extend_from_slice(&au[ch.range.clone()]);
            let pkt = RtpPacket::simple(106, ch.marker, 100 + i as u16, 7777, 1, payload);
            frames.extend(rx.push(&pkt).frames);
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, nal);
        assert_eq!(frames[0].first_seq, 100);
    }

    #[test]
    fn stap_a_yields_every_contained_nal() {
        let n1 = [0x67u8, 0xAA]; // SPS
        let n2 = [0x68u8, 0xBB]; // PPS
        let mut payload = vec![STAP_A];
        for n in [&n1[..], &n2[..]] {
            payload.extend_from_slice(&(n.len() as u16).to_be_bytes());
            payload.extend_from_slice(n);
        }
        let pkt = RtpPacket::simple(106, true, 1, 1000, 1, payload);

        let mut rx = Reassembler::<H264Format>::new(ReassemblyConfig {
            prepend_start_code: true,
            ..ReassemblyConfig::default()
        });
        let out = rx.push(&pkt);
        assert_eq!(out.frames.len(), 2);
        assert_eq!(out.frames[0].data, [&[0, 0, 0, 1][..], &n1[..]].concat());
        assert_eq!(out.frames[1].data, [&[0, 0, 0, 1][..], &n2[..]].concat());
        assert!(out.frames[1].marker);
    }
}
