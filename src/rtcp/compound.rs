use super::app::App;
use super::bye::Bye;
use super::header::{CommonHeader, PT_APP, PT_BYE, PT_RR, PT_SDES, PT_SR};
use super::receiver_report::ReceiverReport;
use super::sdes::Sdes;
use super::sender_report::SenderReport;
use super::RtcpError;

/// The union of supported RTCP packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    Sr(SenderReport),
    Rr(ReceiverReport),
    Sdes(Sdes),
    Bye(Bye),
    App(App),
}

impl RtcpPacket {
    /// Decode a *compound* RTCP buffer into individual packets.
    pub fn decode_compound(buf: &[u8]) -> Result<Vec<RtcpPacket>, RtcpError> {
        let mut out = Vec::new();
        let mut idx = 0usize;
        while idx + 4 <= buf.len() {
            let (hdr, total) = CommonHeader::decode(&buf[idx..])?;
            let payload = &buf[idx + 4..idx + total];

            let pkt = match hdr.pt() {
                PT_SR => RtcpPacket::Sr(SenderReport::decode(&hdr, payload)?),
                PT_RR => RtcpPacket::Rr(ReceiverReport::decode(&hdr, payload)?),
                PT_SDES => RtcpPacket::Sdes(Sdes::decode(&hdr, payload)?),
                PT_BYE => RtcpPacket::Bye(Bye::decode(&hdr, payload)?),
                PT_APP => RtcpPacket::App(App::decode(&hdr, payload)?),
                other => return Err(RtcpError::UnknownPacketType(other)),
            };
            out.push(pkt);
            idx += total;
        }
        if idx != buf.len() {
            // trailing garbage / partial packet
            return Err(RtcpError::TooShort);
        }
        Ok(out)
    }

    /// Encode a compound packet (plain concatenation).
    pub fn encode_compound(pkts: &[RtcpPacket]) -> Result<Vec<u8>, RtcpError> {
        let mut out = Vec::new();
        for pkt in pkts {
            pkt.encode_into(&mut out)?;
        }
        Ok(out)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        match self {
            RtcpPacket::Sr(sr) => sr.encode_into(out),
            RtcpPacket::Rr(rr) => rr.encode_into(out),
            RtcpPacket::Sdes(sdes) => sdes.encode_into(out),
            RtcpPacket::Bye(bye) => bye.encode_into(out),
            RtcpPacket::App(app) => app.encode_into(out),
        }
    }
}

/// Fast check whether a datagram on a muxed socket is RTCP: version 2 and a
/// packet type in the RTCP range (the RTP payload-type octet of media
/// packets never lands in 200..=204 with the marker bit accounted for).
#[inline]
#[must_use]
pub fn looks_like_rtcp(pkt: &[u8]) -> bool {
    if pkt.len() < 4 {
        return false;
    }
    (pkt[0] >> 6) == 2 && (PT_SR..=PT_APP).contains(&pkt[1])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::rtcp::report::SenderInfo;

    #[test]
    fn compound_round_trip() {
        let pkts = vec![
            RtcpPacket::Sr(SenderReport::new(1, SenderInfo::new(1, 2, 3, 4, 5), vec![])),
            RtcpPacket::Sdes(Sdes::cname(1, "a@b")),
            RtcpPacket::Bye(Bye::single(1, None)),
        ];
        let wire = RtcpPacket::encode_compound(&pkts).unwrap();
        let dec = RtcpPacket::decode_compound(&wire).unwrap();
        assert_eq!(dec, pkts);
    }

    #[test]
    fn trailing_garbage_rejected() {
        let pkts = vec![RtcpPacket::Bye(Bye::single(1, None))];
        let mut wire = RtcpPacket::encode_compound(&pkts).unwrap();
        wire.extend_from_slice(&[0xAA, 0xBB]);
        assert!(RtcpPacket::decode_compound(&wire).is_err());
    }

    #[test]
    fn unknown_packet_type_rejected() {
        let wire = [0x80, 210, 0x00, 0x00];
        assert_eq!(
            RtcpPacket::decode_compound(&wire).unwrap_err(),
            RtcpError::UnknownPacketType(210)
        );
    }

    #[test]
    fn rtcp_recognizer() {
        let pkts = vec![RtcpPacket::Rr(ReceiverReport::new(1, vec![]))];
        let wire = RtcpPacket::encode_compound(&pkts).unwrap();
        assert!(looks_like_rtcp(&wire));

        let rtp = crate::rtp::RtpPacket::simple(106, false, 1, 2, 3, vec![0u8; 4])
            .encode()
            .unwrap();
        assert!(!looks_like_rtcp(&rtp));
    }
}
