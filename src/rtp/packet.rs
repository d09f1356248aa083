//! Complete RTP packet model + encode/decode per RFC 3550.
//! No session logic here; just the wire shape and safe serialization.

use super::{RtpHeader, RtpPacketError};

/// Complete RTP packet (header + payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    /// Payload without any trailing padding bytes. If padding was present,
    /// `padding_bytes` records how much was removed during decode.
    pub payload: Vec<u8>,
    pub padding_bytes: u8,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Vec<u8>) -> Self {
        Self {
            header,
            payload,
            padding_bytes: 0,
        }
    }

    /// Convenience constructor for the common case.
    pub fn simple(
        payload_type: u8,
        marker: bool,
        seq: u16,
        ts: u32,
        ssrc: u32,
        payload: Vec<u8>,
    ) -> Self {
        let header = RtpHeader::new(payload_type, seq, ts, ssrc).with_marker(marker);
        Self::new(header, payload)
    }

    /// Encode into a fresh Vec<u8> (network byte order). The P bit follows
    /// `padding_bytes`, not the header flag.
    pub fn encode(&self) -> Result<Vec<u8>, RtpPacketError> {
        let mut out = Vec::with_capacity(self.header.wire_len() + self.payload.len() + 4);
        let has_pad = self.padding_bytes > 0;
        self.header.encode_into(&mut out, has_pad)?;
        out.extend_from_slice(&self.payload);

        if has_pad {
            if self.padding_bytes > 1 {
                out.extend(std::iter::repeat_n(0u8, (self.padding_bytes - 1) as usize));
            }
            out.push(self.padding_bytes);
        }
        Ok(out)
    }

    /// Decode a single RTP packet from `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, RtpPacketError> {
        let (header, idx, padding) = RtpHeader::decode(buf)?;

        let mut payload_end = buf.len();
        let mut padding_bytes = 0u8;

        if padding {
            if payload_end == idx {
                return Err(RtpPacketError::PaddingTooShort);
            }
            let pad = buf[payload_end - 1];
            if pad == 0 || pad as usize > payload_end - idx {
                return Err(RtpPacketError::PaddingTooShort);
            }
            padding_bytes = pad;
            payload_end -= pad as usize;
        }

        if payload_end < idx {
            return Err(RtpPacketError::Invalid);
        }

        Ok(RtpPacket {
            header,
            payload: buf[idx..payload_end].to_vec(),
            padding_bytes,
        })
    }

    // Convenience getters
    pub fn payload_type(&self) -> u8 {
        self.header.payload_type
    }
    pub fn marker(&self) -> bool {
        self.header.marker
    }
    pub fn seq(&self) -> u16 {
        self.header.sequence
    }
    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }
    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }
}

/// Header length (incl. CSRCs and extension) of an encoded RTP packet,
/// without parsing the payload. Used by SRTP to find the encryption
/// boundary.
pub fn wire_header_len(packet: &[u8]) -> Result<usize, RtpPacketError> {
    let (_, len, _) = RtpHeader::decode(packet)?;
    Ok(len)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn decode_too_short() {
        let buf = vec![0u8; 11];
        assert!(matches!(
            RtpPacket::decode(&buf).unwrap_err(),
            RtpPacketError::TooShort
        ));
    }

    #[test]
    fn roundtrip_minimal() {
        let payload = b"hello".to_vec();
        let pkt = RtpPacket::simple(96, true, 42, 9_000, 0xAABB_CCDD, payload.clone());
        let enc = pkt.encode().unwrap();
        let dec = RtpPacket::decode(&enc).unwrap();
        assert_eq!(dec.header.payload_type, 96);
        assert!(dec.header.marker);
        assert_eq!(dec.header.sequence, 42);
        assert_eq!(dec.header.timestamp, 9000);
        assert_eq!(dec.header.ssrc, 0xAABB_CCDD);
        assert_eq!(dec.payload, payload);
        assert_eq!(dec.padding_bytes, 0);
    }

    #[test]
    fn padding_roundtrip() {
        let mut pkt = RtpPacket::simple(111, false, 7, 1234, 0xCAFE_BABE, vec![1, 2, 3]);
        pkt.padding_bytes = 4;
        let enc = pkt.encode().unwrap();
        assert_eq!(*enc.last().unwrap(), 4);
        let p_bit = (enc[0] >> 5) & 1;
        assert_eq!(p_bit, 1);

        let dec = RtpPacket::decode(&enc).unwrap();
        assert_eq!(dec.payload, vec![1, 2, 3]);
        assert_eq!(dec.padding_bytes, 4);
    }

    #[test]
    fn padding_count_zero_rejected() {
        let mut pkt = RtpPacket::simple(96, false, 1, 2, 3, vec![0xAA]);
        pkt.padding_bytes = 1;
        let mut enc = pkt.encode().unwrap();
        let n = enc.len();
        enc[n - 1] = 0; // pad count 0 is invalid
        assert!(matches!(
            RtpPacket::decode(&enc).unwrap_err(),
            RtpPacketError::PaddingTooShort
        ));
    }

    #[test]
    fn padding_count_exceeding_region_rejected() {
        let mut pkt = RtpPacket::simple(96, false, 1, 2, 3, vec![0xAA]);
        pkt.padding_bytes = 1;
        let mut enc = pkt.encode().unwrap();
        let n = enc.len();
        enc[n - 1] = 200;
        assert!(matches!(
            RtpPacket::decode(&enc).unwrap_err(),
            RtpPacketError::PaddingTooShort
        ));
    }

    #[test]
    fn wire_header_len_counts_csrcs() {
        let hdr = RtpHeader::new(96, 1, 2, 3).with_csrcs(vec![10, 20]);
        let pkt = RtpPacket::new(hdr, vec![0xFF; 8]);
        let enc = pkt.encode().unwrap();
        assert_eq!(wire_header_len(&enc).unwrap(), 12 + 8);
    }

    #[test]
    fn roundtrip_matrix_covering_common_axes() {
        let pts = [0u8, 105, 127];
        let markers = [false, true];
        let payload_lens = [0usize, 1, 12, 13, 31];

        for &pt in &pts {
            for &marker in &markers {
                for &plen in &payload_lens {
                    let payload: Vec<u8> = (0..plen as u8).collect();
                    let pkt =
                        RtpPacket::simple(pt, marker, 0xFFFF, 0x0123_4567, 0x89AB_CDEF, payload.clone());
                    let enc = pkt.encode().unwrap();
                    let dec = RtpPacket::decode(&enc).unwrap();
                    assert_eq!(dec.header.payload_type, pt);
                    assert_eq!(dec.header.marker, marker);
                    assert_eq!(dec.payload, payload);
                }
            }
        }
    }
}
