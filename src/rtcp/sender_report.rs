use byteorder::{BigEndian, ByteOrder};

use super::header::{CommonHeader, PT_SR, patch_length};
use super::report::{ReportBlock, SenderInfo};
use super::RtcpError;

const MAX_RC: usize = 31;

/// Sender Report: sender info plus up to 31 report blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderReport {
    pub ssrc: u32,
    pub info: SenderInfo,
    pub reports: Vec<ReportBlock>,
    /// Profile-specific data trailing the report blocks.
    pub profile_ext: Vec<u8>,
}

impl SenderReport {
    pub fn new(ssrc: u32, info: SenderInfo, reports: Vec<ReportBlock>) -> Self {
        Self {
            ssrc,
            info,
            reports,
            profile_ext: Vec::new(),
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        if self.reports.len() > MAX_RC {
            return Err(RtcpError::TooManyReportBlocks(self.reports.len()));
        }
        let start = out.len();
        CommonHeader::new(self.reports.len() as u8, PT_SR, false).encode_into(out);
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        self.info.encode_into(out);
        for rb in &self.reports {
            rb.encode_into(out);
        }
        out.extend_from_slice(&self.profile_ext);
        patch_length(out, start);
        Ok(())
    }

    pub fn decode(hdr: &CommonHeader, payload: &[u8]) -> Result<Self, RtcpError> {
        if payload.len() < 24 {
            return Err(RtcpError::TooShort);
        }
        let ssrc = BigEndian::read_u32(&payload[0..4]);
        let (info, used) = SenderInfo::decode(&payload[4..])?;
        let mut idx = 4 + used;

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
            info,
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
    fn sr_round_trip_with_blocks() {
        let sr = SenderReport::new(
            0xFEED_BEEF,
            SenderInfo::new(1, 2, 3, 4, 5),
            vec![
                ReportBlock {
                    ssrc: 0x0101,
                    fraction_lost: 1,
                    ..ReportBlock::default()
                },
                ReportBlock {
                    ssrc: 0x0202,
                    jitter: 9,
                    ..ReportBlock::default()
                },
            ],
        );
        let mut out = Vec::new();
        sr.encode_into(&mut out).unwrap();
        assert_eq!(out.len() % 4, 0);

        let (hdr, total) = CommonHeader::decode(&out).unwrap();
        assert_eq!(total, out.len());
        let dec = SenderReport::decode(&hdr, &out[4..total]).unwrap();
        assert_eq!(dec, sr);
    }

    #[test]
    fn sr_truncated_block_rejected() {
        let sr = SenderReport::new(1, SenderInfo::default(), vec![ReportBlock::default()]);
        let mut out = Vec::new();
        sr.encode_into(&mut out).unwrap();
        let (hdr, _) = CommonHeader::decode(&out).unwrap();
        // Chop the block in half.
        let cut = &out[4..out.len() - 12];
        assert_eq!(SenderReport::decode(&hdr, cut).unwrap_err(), RtcpError::Truncated);
    }

    #[test]
    fn too_many_blocks_is_an_error() {
        let sr = SenderReport::new(
            1,
            SenderInfo::default(),
            (0..32).map(|_| ReportBlock::default()).collect(),
        );
        let mut out = Vec::new();
        assert!(matches!(
            sr.encode_into(&mut out).unwrap_err(),
            RtcpError::TooManyReportBlocks(32)
        ));
    }
}
