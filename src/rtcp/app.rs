use byteorder::{BigEndian, ByteOrder};

use super::header::{CommonHeader, PT_APP, patch_length};
use super::RtcpError;

/// Application-defined packet: 4-byte ASCII name, 5-bit subtype, opaque
/// payload padded to 32 bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    pub subtype: u8, // 5 bits, carried in the header count field
    pub name: [u8; 4],
    pub ssrc: u32,
    pub data: Vec<u8>,
}

impl App {
    pub fn new(ssrc: u32, name: [u8; 4], subtype: u8, data: Vec<u8>) -> Self {
        Self {
            subtype: subtype & 0x1F,
            name,
            ssrc,
            data,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        let start = out.len();
        CommonHeader::new(self.subtype & 0x1F, PT_APP, false).encode_into(out);
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&self.data);
        patch_length(out, start);
        Ok(())
    }

    pub fn decode(hdr: &CommonHeader, payload: &[u8]) -> Result<Self, RtcpError> {
        if payload.len() < 8 {
            return Err(RtcpError::TooShort);
        }
        let ssrc = BigEndian::read_u32(&payload[0..4]);
        let mut name = [0u8; 4];
        name.copy_from_slice(&payload[4..8]);
        Ok(Self {
            subtype: hdr.count() & 0x1F,
            name,
            ssrc,
            data: payload[8..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn app_round_trip() {
        let app = App::new(77, *b"kitA", 5, vec![1, 2, 3, 4, 5]);
        let mut out = Vec::new();
        app.encode_into(&mut out).unwrap();
        assert_eq!(out.len() % 4, 0);

        let (hdr, total) = CommonHeader::decode(&out).unwrap();
        let dec = App::decode(&hdr, &out[4..total]).unwrap();
        assert_eq!(dec.subtype, 5);
        assert_eq!(dec.name, *b"kitA");
        assert_eq!(dec.ssrc, 77);
        // Payload is padded to a word boundary on the wire.
        assert_eq!(&dec.data[..5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn app_too_short_rejected() {
        let hdr = CommonHeader::new(0, PT_APP, false);
        assert_eq!(App::decode(&hdr, &[0u8; 7]).unwrap_err(), RtcpError::TooShort);
    }
}
