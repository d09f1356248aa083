use byteorder::{BigEndian, ByteOrder};

use super::header::{CommonHeader, PT_RR, patch_length};
use super::report::ReportBlock;
use super::RtcpError;

const MAX_RC: usize = 31;

/// Receiver Report: reporter SSRC plus up to 31 report blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReportBlock>,
    pub profile_ext: Vec<u8>,
}

impl ReceiverReport {
    pub fn new(ssrc: u32, reports: Vec<ReportBlock>) -> Self {
        Self {
            ssrc,
            reports,
            profile_ext: Vec::new(),
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        if self.reports.len() > MAX_RC {
            return Err(RtcpError::TooManyReportBlocks(self.reports.len()));
        }
        let start = out.len();
        CommonHeader::new(self.reports.len() as u8, PT_RR, false).encode_into(out);
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for rb in &self.reports {
            rb.encode_into(out);
        }
        out.extend_from_slice(&self.profile_ext);
        patch_length(out, start);
        Ok(())
    }

    pub fn decode(hdr: &CommonHeader, payload: &[u8]) -> Result<Self, RtcpError> {
        if payload.len() < 4 {
            return Err(RtcpError::TooShort);
        }
        let ssrc = BigEndian::read_u32(&payload[0..4]);
        let mut idx = 4usize;

        let rc = hdr.count() as usize;
        let mut reports = Vec::with_capacity(rc);
        for _ in 0..rc {
            if payload.len() < idx + 24 {
                return Err(RtcpError::Truncated);
            }
            let (rb, used) = ReportBlock::decode(&payload[idx..])?;
            idx += used;
            reports.push(rb);
        }

        Ok(Self {
            ssrc,
            reports,
            profile_ext: payload[idx..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn empty_rr_round_trip() {
        let rr = ReceiverReport::new(0xAB, vec![]);
        let mut out = Vec::new();
        rr.encode_into(&mut out).unwrap();
        assert_eq!(out.len(), 8);

        let (hdr, total) = CommonHeader::decode(&out).unwrap();
        let dec = ReceiverReport::decode(&hdr, &out[4..total]).unwrap();
        assert_eq!(dec, rr);
    }

    #[test]
    fn rr_with_one_block_round_trip() {
        let rr = ReceiverReport::new(
            7,
            vec![ReportBlock {
                ssrc: 42,
                fraction_lost: 64,
                cumulative_lost: 3,
                ext_highest_seq: 1000,
                jitter: 2,
                lsr: 0x1111_2222,
                dlsr: 0x3333,
            }],
        );
        let mut out = Vec::new();
        rr.encode_into(&mut out).unwrap();
        let (hdr, total) = CommonHeader::decode(&out).unwrap();
        let dec = ReceiverReport::decode(&hdr, &out[4..total]).unwrap();
        assert_eq!(dec, rr);
    }
}
