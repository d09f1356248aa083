use byteorder::{BigEndian, ByteOrder};

use super::RtcpError;

/// The 20-byte sender info block of an SR.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderInfo {
    pub ntp_msw: u32,
    pub ntp_lsw: u32,
    pub rtp_ts: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderInfo {
    pub fn new(ntp_msw: u32, ntp_lsw: u32, rtp_ts: u32, packet_count: u32, octet_count: u32) -> Self {
        Self {
            ntp_msw,
            ntp_lsw,
            rtp_ts,
            packet_count,
            octet_count,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ntp_msw.to_be_bytes());
        out.extend_from_slice(&self.ntp_lsw.to_be_bytes());
        out.extend_from_slice(&self.rtp_ts.to_be_bytes());
        out.extend_from_slice(&self.packet_count.to_be_bytes());
        out.extend_from_slice(&self.octet_count.to_be_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), RtcpError> {
        if buf.len() < 20 {
            return Err(RtcpError::TooShort);
        }
        Ok((
            Self {
                ntp_msw: BigEndian::read_u32(&buf[0..4]),
                ntp_lsw: BigEndian::read_u32(&buf[4..8]),
                rtp_ts: BigEndian::read_u32(&buf[8..12]),
                packet_count: BigEndian::read_u32(&buf[12..16]),
                octet_count: BigEndian::read_u32(&buf[16..20]),
            },
            20,
        ))
    }
}

/// Report block per RFC 3550 §6.4.1 (24 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportBlock {
    pub ssrc: u32,
    /// Q0.8 fraction of packets lost since the previous report.
    pub fraction_lost: u8,
    /// 24-bit signed cumulative packets lost
    /// (range: -8_388_608..=8_388_607).
    pub cumulative_lost: i32,
    /// Extended highest sequence number received (cycles << 16 | seq).
    pub ext_highest_seq: u32,
    pub jitter: u32,
    /// Middle 32 bits of the NTP timestamp of the last SR from this source.
    pub lsr: u32,
    /// Delay since that SR in units of 1/65536 s.
    pub dlsr: u32,
}

impl ReportBlock {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.push(self.fraction_lost);
        let cl = self.cumulative_lost.clamp(-8_388_608, 8_388_607);
        let cl_u = cl as u32 & 0x00FF_FFFF;
        out.push(((cl_u >> 16) & 0xFF) as u8);
        out.push(((cl_u >> 8) & 0xFF) as u8);
        out.push((cl_u & 0xFF) as u8);
        out.extend_from_slice(&self.ext_highest_seq.to_be_bytes());
        out.extend_from_slice(&self.jitter.to_be_bytes());
        out.extend_from_slice(&self.lsr.to_be_bytes());
        out.extend_from_slice(&self.dlsr.to_be_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), RtcpError> {
        if buf.len() < 24 {
            return Err(RtcpError::TooShort);
        }
        let ssrc = BigEndian::read_u32(&buf[0..4]);
        let fraction_lost = buf[4];
        let cl_raw = ((buf[5] as u32) << 16) | ((buf[6] as u32) << 8) | (buf[7] as u32);
        let cumulative_lost = if (cl_raw & 0x80_0000) != 0 {
            (cl_raw | 0xFF00_0000) as i32 // sign-extend
        } else {
            cl_raw as i32
        };

        Ok((
            Self {
                ssrc,
                fraction_lost,
                cumulative_lost,
                ext_highest_seq: BigEndian::read_u32(&buf[8..12]),
                jitter: BigEndian::read_u32(&buf[12..16]),
                lsr: BigEndian::read_u32(&buf[16..20]),
                dlsr: BigEndian::read_u32(&buf[20..24]),
            },
            24,
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn sender_info_round_trip() {
        let info = SenderInfo::new(0x8899_AABB, 0xCCDD_EEFF, 90_000, 120, 30_720);
        let mut out = Vec::new();
        info.encode_into(&mut out);
        let (dec, used) = SenderInfo::decode(&out).unwrap();
        assert_eq!(used, 20);
        assert_eq!(dec, info);
    }

    #[test]
    fn report_block_round_trip() {
        let rb = ReportBlock {
            ssrc: 0x1234_5678,
            fraction_lost: 12,
            cumulative_lost: 345,
            ext_highest_seq: 0x0001_FFFF,
            jitter: 88,
            lsr: 0xAAAA_BBBB,
            dlsr: 0x0000_4000,
        };
        let mut out = Vec::new();
        rb.encode_into(&mut out);
        let (dec, used) = ReportBlock::decode(&out).unwrap();
        assert_eq!(used, 24);
        assert_eq!(dec, rb);
    }

    #[test]
    fn negative_cumulative_lost_sign_extends() {
        let rb = ReportBlock {
            cumulative_lost: -5,
            ..ReportBlock::default()
        };
        let mut out = Vec::new();
        rb.encode_into(&mut out);
        let (dec, _) = ReportBlock::decode(&out).unwrap();
        assert_eq!(dec.cumulative_lost, -5);
    }
}
