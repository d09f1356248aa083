use byteorder::{BigEndian, ByteOrder};

use super::header::{CommonHeader, PT_BYE, patch_length};
use super::RtcpError;

/// Goodbye packet; may list several SSRCs (mixer case) and a reason string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bye {
    pub sources: Vec<u32>,
    pub reason: Option<String>,
}

impl Bye {
    pub fn single(ssrc: u32, reason: Option<String>) -> Self {
        Self {
            sources: vec![ssrc],
            reason,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        if self.sources.len() > 31 {
            return Err(RtcpError::TooManyByeSources(self.sources.len()));
        }
        let start = out.len();
        CommonHeader::new(self.sources.len() as u8, PT_BYE, false).encode_into(out);
        for ssrc in &self.sources {
            out.extend_from_slice(&ssrc.to_be_bytes());
        }
        if let Some(reason) = &self.reason {
            let rbytes = reason.as_bytes();
            if rbytes.len() > u8::MAX as usize {
                return Err(RtcpError::SdesItemTooLong);
            }
            out.push(rbytes.len() as u8);
            out.extend_from_slice(rbytes);
        }
        patch_length(out, start);
        Ok(())
    }

    pub fn decode(hdr: &CommonHeader, payload: &[u8]) -> Result<Self, RtcpError> {
        let sc = hdr.count() as usize;
        if payload.len() < sc * 4 {
            return Err(RtcpError::Truncated);
        }
        let mut sources = Vec::with_capacity(sc);
        let mut idx = 0usize;
        for _ in 0..sc {
            sources.push(BigEndian::read_u32(&payload[idx..idx + 4]));
            idx += 4;
        }
        let reason = if payload.len() > idx {
            let len = payload[idx] as usize;
            idx += 1;
            if payload.len() < idx + len {
                return Err(RtcpError::Truncated);
            }
            Some(String::from_utf8_lossy(&payload[idx..idx + len]).into_owned())
        } else {
            None
        };
        Ok(Self { sources, reason })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn bye_with_reason_round_trip() {
        let bye = Bye::single(0xDEAD_BEEF, Some("teardown".into()));
        let mut out = Vec::new();
        bye.encode_into(&mut out).unwrap();
        assert_eq!(out.len() % 4, 0);

        let (hdr, total) = CommonHeader::decode(&out).unwrap();
        let dec = Bye::decode(&hdr, &out[4..total]).unwrap();
        assert_eq!(dec, bye);
    }

    #[test]
    fn bye_multiple_sources() {
        let bye = Bye {
            sources: vec![1, 2, 3],
            reason: None,
        };
        let mut out = Vec::new();
        bye.encode_into(&mut out).unwrap();
        let (hdr, total) = CommonHeader::decode(&out).unwrap();
        let dec = Bye::decode(&hdr, &out[4..total]).unwrap();
        assert_eq!(dec.sources, vec![1, 2, 3]);
        assert_eq!(dec.reason, None);
    }
}
