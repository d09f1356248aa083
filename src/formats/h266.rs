//! H.266/VVC framing per RFC 9328 (single NAL, AP type 28, FU type 29).
//!
//! The two-byte NAL header is `F(1) | Z(1) | layer(6) | type(5) | tid(3)`;
//! the type lives in the second byte.

use super::h26x::{FuFields, NalFormat};

const AP: u8 = 28;
const FU: u8 = 29;

/// Intra NAL types: IDR_W_RADL(7), IDR_N_LP(8), CRA_NUT(9).
const INTRA_FIRST: u8 = 7;
const INTRA_LAST: u8 = 9;

pub struct H266Format;

impl NalFormat for H266Format {
    const NAL_HEADER_LEN: usize = 2;
    // Two-byte FU payload header + FU header.
    const FU_OVERHEAD: usize = 3;

    #[inline]
    fn nal_type(header: &[u8]) -> u8 {
        (header[1] >> 3) & 0x1F
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
        // Payload header keeps byte 0 (F/Z/layer) and the tid bits, swaps in
        // type 29.
        let p0 = nal_header[0];
        let p1 = (nal_header[1] & 0x07) | (FU << 3);
        let orig_type = Self::nal_type(nal_header);
        // FU header: S | E | P | FuType(5); P (last-fragment-of-picture) is
        // left clear.
        let fu = ((start as u8) << 7) | ((end as u8) << 6) | (orig_type & 0x1F);
        vec![p0, p1, fu]
    }

    fn parse_fu(payload: &[u8]) -> Option<FuFields> {
        if payload.len() < 4 {
            return None;
        }
        let fu = payload[2];
        let orig_type = fu & 0x1F;
        Some(FuFields {
            start: fu & 0x80 != 0,
            end: fu & 0x40 != 0,
            nal_header: vec![payload[0], (payload[1] & 0x07) | (orig_type << 3)],
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

    /// NAL header with the given type, layer 0, tid 0.
    fn nal_header(nal_type: u8) -> [u8; 2] {
        [0x00, (nal_type << 3) & 0xF8]
    }

    #[test]
    fn type_lives_in_second_byte() {
        assert_eq!(H266Format::nal_type(&nal_header(7)), 7);
        assert_eq!(H266Format::nal_type(&nal_header(29)), 29);
        for t in 7..=9 {
            assert!(H266Format::is_intra(t));
        }
        assert!(!H266Format::is_intra(10));
    }

    #[test]
    fn fu_headers_round_trip() {
        let hdr = nal_header(8);
        let wire = H266Format::fu_headers(&hdr, false, true);
        assert_eq!(H266Format::nal_type(&wire), FU);

        let mut payload = wire;
        payload.extend_from_slice(&[0x33; 4]);
        let fu = H266Format::parse_fu(&payload).unwrap();
        assert!(!fu.start);
        assert!(fu.end);
        assert_eq!(fu.nal_header, hdr.to_vec());
    }

    #[test]
    fn fragmented_idr_round_trip() {
        let mut nal = nal_header(7).to_vec();
        nal.extend((0..60u8).cycle().take(6000));
        let chunks = packetize::<H266Format>(&nal, 1000, true);
        assert!(chunks.len() >= 6);

        let mut rx = Reassembler::<H266Format>::new(ReassemblyConfig {
            prepend_start_code: false,
            ..ReassemblyConfig::default()
        });
        let mut frames = Vec::new();
        for (i, ch) in chunks.iter().enumerate() {
            let mut payload = ch.format_header.clone();
            payload.extend_from_slice(&nal[ch.range.clone()]);
            let pkt = RtpPacket::simple(108, ch.marker, 400 + i as u16, 12, 5, payload);
            frames.extend(rx.push(&pkt).frames);
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, nal);
    }
}
