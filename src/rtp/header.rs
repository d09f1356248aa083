use byteorder::{BigEndian, ByteOrder};

use super::{RTP_HEADER_LEN, RTP_VERSION, RtpPacketError};

/// Generic RFC 3550 header extension: 16-bit profile tag, data padded to a
/// 32-bit boundary on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeaderExtension {
    pub profile: u16,
    pub data: Vec<u8>,
}

impl RtpHeaderExtension {
    pub fn new(profile: u16, data: Vec<u8>) -> Self {
        Self { profile, data }
    }
}

/// RTP fixed header plus CSRC list and optional extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,      // must be 2
    pub padding: bool,    // P bit
    pub extension: bool,  // X bit
    pub marker: bool,     // M bit
    pub payload_type: u8, // 7 bits
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrcs: Vec<u32>,
    pub header_extension: Option<RtpHeaderExtension>,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrcs: Vec::new(),
            header_extension: None,
        }
    }

    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_csrcs(mut self, csrcs: Vec<u32>) -> Self {
        self.csrcs = csrcs;
        self
    }

    pub fn with_extension(mut self, ext: Option<RtpHeaderExtension>) -> Self {
        self.extension = ext.is_some();
        self.header_extension = ext;
        self
    }

    /// Bytes this header occupies on the wire.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        let mut len = RTP_HEADER_LEN + self.csrcs.len() * 4;
        if let Some(ext) = &self.header_extension {
            len += 4 + ext.data.len().div_ceil(4) * 4;
        }
        len
    }

    /// Serialize the header (without payload) into `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>, has_padding: bool) -> Result<(), RtpPacketError> {
        let cc = (self.csrcs.len() & 0x0F) as u8;
        let has_ext = self.header_extension.is_some();
        let vpxcc =
            (self.version & 0b11) << 6 | (has_padding as u8) << 5 | (has_ext as u8) << 4 | cc;
        let m_pt = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);

        out.push(vpxcc);
        out.push(m_pt);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());

        for csrc in &self.csrcs {
            out.extend_from_slice(&csrc.to_be_bytes());
        }

        if let Some(ext) = &self.header_extension {
            let words = ext.data.len().div_ceil(4);
            if words > u16::MAX as usize {
                return Err(RtpPacketError::HeaderExtensionTooLong);
            }
            out.extend_from_slice(&ext.profile.to_be_bytes());
            out.extend_from_slice(&(words as u16).to_be_bytes());
            out.extend_from_slice(&ext.data);
            let pad = (4 - (ext.data.len() % 4)) % 4;
            if pad != 0 {
                out.extend(std::iter::repeat_n(0u8, pad));
            }
        }
        Ok(())
    }

    /// Parse the header from `buf`; returns the header and its wire length.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize, bool), RtpPacketError> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(RtpPacketError::TooShort);
        }

        let vpxcc = buf[0];
        let m_pt = buf[1];

        let version = (vpxcc >> 6) & 0b11;
        if version != RTP_VERSION {
            return Err(RtpPacketError::BadVersion(version));
        }
        let padding = ((vpxcc >> 5) & 1) != 0;
        let extension = ((vpxcc >> 4) & 1) != 0;
        let cc = (vpxcc & 0x0F) as usize;

        let marker = (m_pt >> 7) != 0;
        let payload_type = m_pt & 0x7F;

        let sequence = BigEndian::read_u16(&buf[2..4]);
        let timestamp = BigEndian::read_u32(&buf[4..8]);
        let ssrc = BigEndian::read_u32(&buf[8..12]);

        let mut idx = RTP_HEADER_LEN;

        if buf.len() < idx + cc * 4 {
            return Err(RtpPacketError::CsrcCountMismatch {
                expected: cc,
                buf_left: buf.len().saturating_sub(idx),
            });
        }
        let mut csrcs = Vec::with_capacity(cc);
        for _ in 0..cc {
            csrcs.push(BigEndian::read_u32(&buf[idx..idx + 4]));
            idx += 4;
        }

        let mut header_extension = None;
        if extension {
            if buf.len() < idx + 4 {
                return Err(RtpPacketError::HeaderExtensionTooShort);
            }
            let profile = BigEndian::read_u16(&buf[idx..idx + 2]);
            let length_words = BigEndian::read_u16(&buf[idx + 2..idx + 4]) as usize;
            idx += 4;

            let ext_len = length_words * 4;
            if buf.len() < idx + ext_len {
                return Err(RtpPacketError::HeaderExtensionTooShort);
            }
            header_extension = Some(RtpHeaderExtension {
                profile,
                data: buf[idx..idx + ext_len].to_vec(),
            });
            idx += ext_len;
        }

        Ok((
            Self {
                version,
                padding,
                extension,
                marker,
                payload_type,
                sequence,
                timestamp,
                ssrc,
                csrcs,
                header_extension,
            },
            idx,
            padding,
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn fixed_header_round_trip() {
        let hdr = RtpHeader::new(106, 0xBEEF, 0x0102_0304, 0xCAFE_F00D).with_marker(true);
        let mut out = Vec::new();
        hdr.encode_into(&mut out, false).unwrap();
        assert_eq!(out.len(), RTP_HEADER_LEN);

        let (dec, used, padding) = RtpHeader::decode(&out).unwrap();
        assert_eq!(used, RTP_HEADER_LEN);
        assert!(!padding);
        assert_eq!(dec, hdr);
    }

    #[test]
    fn version_must_be_two() {
        let hdr = RtpHeader::new(0, 1, 2, 3);
        let mut out = Vec::new();
        hdr.encode_into(&mut out, false).unwrap();
        out[0] = (1 << 6) | (out[0] & 0x3F);
        assert_eq!(RtpHeader::decode(&out).unwrap_err(), RtpPacketError::BadVersion(1));
    }

    #[test]
    fn csrcs_round_trip() {
        let csrcs: Vec<u32> = (0..15).map(|i| 0x2222_0000 + i).collect();
        let hdr = RtpHeader::new(96, 1, 2, 3).with_csrcs(csrcs.clone());
        let mut out = Vec::new();
        hdr.encode_into(&mut out, false).unwrap();

        let (dec, used, _) = RtpHeader::decode(&out).unwrap();
        assert_eq!(used, RTP_HEADER_LEN + 15 * 4);
        assert_eq!(dec.csrcs, csrcs);
    }

    #[test]
    fn extension_pads_to_word_boundary() {
        let hdr = RtpHeader::new(96, 1, 2, 3)
            .with_extension(Some(RtpHeaderExtension::new(0xDEAD, vec![1, 2, 3, 4, 5])));
        let mut out = Vec::new();
        hdr.encode_into(&mut out, false).unwrap();

        let (dec, _, _) = RtpHeader::decode(&out).unwrap();
        let ext = dec.header_extension.unwrap();
        assert_eq!(ext.profile, 0xDEAD);
        assert_eq!(ext.data.len(), 8);
        assert_eq!(&ext.data[..5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn truncated_extension_is_rejected() {
        let hdr = RtpHeader::new(96, 1, 2, 3);
        let mut out = Vec::new();
        hdr.encode_into(&mut out, false).unwrap();
        out[0] |= 1 << 4; // claim X bit with no extension bytes
        assert_eq!(
            RtpHeader::decode(&out).unwrap_err(),
            RtpPacketError::HeaderExtensionTooShort
        );
    }
}
