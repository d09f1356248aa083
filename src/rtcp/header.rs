use byteorder::{BigEndian, ByteOrder};

use super::RtcpError;
use crate::rtp::RTP_VERSION;

pub const PT_SR: u8 = 200;
pub const PT_RR: u8 = 201;
pub const PT_SDES: u8 = 202;
pub const PT_BYE: u8 = 203;
pub const PT_APP: u8 = 204;

/// Shared 4-byte header of every RTCP packet:
/// `version:2, padding:1, count:5, packet_type:8, length:16` where length
/// counts 32-bit words minus one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonHeader {
    version: u8,
    padding: bool,
    count: u8, // 5 bits: report count, source count or APP subtype
    pt: u8,
    length_words: u16,
}

impl CommonHeader {
    pub fn new(count: u8, pt: u8, padding: bool) -> Self {
        Self {
            version: RTP_VERSION,
            padding,
            count,
            pt,
            length_words: 0,
        }
    }

    /// Decode the header; returns it plus the total packet length in bytes.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), RtcpError> {
        if buf.len() < 4 {
            return Err(RtcpError::TooShort);
        }
        let vpc = buf[0];
        let version = vpc >> 6;
        if version != RTP_VERSION {
            return Err(RtcpError::BadVersion(version));
        }
        let padding = ((vpc >> 5) & 1) != 0;
        let count = vpc & 0x1F;
        let pt = buf[1];
        let length_words = BigEndian::read_u16(&buf[2..4]);

        let total_bytes = ((length_words as usize) + 1) * 4;
        if buf.len() < total_bytes {
            return Err(RtcpError::TooShort);
        }

        Ok((
            Self {
                version,
                padding,
                count,
                pt,
                length_words,
            },
            total_bytes,
        ))
    }

    /// Emit the header with a zero length; use [`patch_length`] once the body
    /// is serialized.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let vpc = (self.version & 0b11) << 6 | (self.padding as u8) << 5 | (self.count & 0x1F);
        out.push(vpc);
        out.push(self.pt);
        out.extend_from_slice(&self.length_words.to_be_bytes());
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn pt(&self) -> u8 {
        self.pt
    }

    pub fn padding(&self) -> bool {
        self.padding
    }

    pub fn length_words(&self) -> u16 {
        self.length_words
    }
}

/// Pad the packet that started at `start` to a 32-bit boundary and rewrite
/// its length field (32-bit words minus one).
pub fn patch_length(out: &mut Vec<u8>, start: usize) {
    let pad = (4 - (out.len() - start) % 4) % 4;
    if pad != 0 {
        out.extend(std::iter::repeat_n(0u8, pad));
    }
    let len_words = ((out.len() - start) / 4) - 1;
    out[start + 2] = ((len_words >> 8) & 0xFF) as u8;
    out[start + 3] = (len_words & 0xFF) as u8;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn header_round_trip_with_patched_length() {
        let mut out = Vec::new();
        let hdr = CommonHeader::new(3, PT_SR, false);
        hdr.encode_into(&mut out);
        out.extend_from_slice(&[0u8; 8]); // pretend body
        patch_length(&mut out, 0);

        let (dec, total) = CommonHeader::decode(&out).unwrap();
        assert_eq!(total, 12);
        assert_eq!(dec.count(), 3);
        assert_eq!(dec.pt(), PT_SR);
        assert_eq!(dec.length_words(), 2);
    }

    #[test]
    fn bad_version_rejected() {
        let buf = [0x00, PT_RR, 0x00, 0x00];
        assert_eq!(CommonHeader::decode(&buf).unwrap_err(), RtcpError::BadVersion(0));
    }

    #[test]
    fn declared_length_must_fit() {
        // length = 4 words but only the header present
        let buf = [0x80, PT_RR, 0x00, 0x04];
        assert_eq!(CommonHeader::decode(&buf).unwrap_err(), RtcpError::TooShort);
    }
}
