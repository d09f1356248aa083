//! Pluggable payload formats: generic, Opus and the H.26x family.
//!
//! Packetizers turn one application frame into a fragment list for the
//! frame queue; depacketizers rebuild frames on the reception flow. The
//! handler chain dispatches over the closed [`Depacketizer`] sum so the
//! per-packet path stays statically typed.

pub mod generic;
pub mod h264;
pub mod h265;
pub mod h266;
pub mod h26x;
pub mod opus;

use bytes::Bytes;

use crate::error::RtpError;
use crate::frame::MediaFrame;
use crate::rtp::RtpPacket;
use crate::rtp::frame_queue::PayloadChunk;

use h264::H264Format;
use h265::H265Format;
use h266::H266Format;
use h26x::{NalFormat, Reassembler, ReassemblyConfig};

/// The media formats a stream can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Generic,
    Opus,
    H264,
    H265,
    H266,
}

impl MediaFormat {
    /// Payload type used unless `dyn-payload-type` overrides it.
    #[must_use]
    pub fn default_payload_type(self) -> u8 {
        match self {
            MediaFormat::Generic => 0,
            MediaFormat::Opus => 105,
            MediaFormat::H264 => 106,
            MediaFormat::H265 => 107,
            MediaFormat::H266 => 108,
        }
    }

    /// Default RTP clock rate in Hz.
    #[must_use]
    pub fn default_clock_rate(self) -> u32 {
        match self {
            MediaFormat::Generic => 8_000,
            MediaFormat::Opus => 48_000,
            MediaFormat::H264 | MediaFormat::H265 | MediaFormat::H266 => 90_000,
        }
    }

    #[must_use]
    pub fn is_h26x(self) -> bool {
        matches!(self, MediaFormat::H264 | MediaFormat::H265 | MediaFormat::H266)
    }
}

/// Sender-side switches resolved from RCE/RTP flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketizeFlags {
    /// `fragment-generic`.
    pub allow_generic_fragmentation: bool,
    /// `no-h26x-scl`: skip the start-code lookup, treat the buffer as one
    /// NAL unit.
    pub no_start_code_lookup: bool,
}

/// Split one frame into payload chunks for the frame queue.
pub fn packetize(
    format: MediaFormat,
    data: &[u8],
    max_payload: usize,
    flags: PacketizeFlags,
) -> Result<Vec<PayloadChunk>, RtpError> {
    if data.is_empty() {
        return Err(RtpError::InvalidValue);
    }
    let chunks = match format {
        MediaFormat::Generic => {
            generic::packetize(data.len(), max_payload, flags.allow_generic_fragmentation)
        }
        MediaFormat::Opus => opus::packetize(data.len(), max_payload),
        MediaFormat::H264 => Some(h26x::packetize::<H264Format>(
            data,
            max_payload,
            !flags.no_start_code_lookup,
        )),
        MediaFormat::H265 => Some(h26x::packetize::<H265Format>(
            data,
            max_payload,
            !flags.no_start_code_lookup,
        )),
        MediaFormat::H266 => Some(h26x::packetize::<H266Format>(
            data,
            max_payload,
            !flags.no_start_code_lookup,
        )),
    };
    match chunks {
        Some(c) if !c.is_empty() => Ok(c),
        _ => Err(RtpError::InvalidValue),
    }
}

/// Frames completed by one depacketizer step, plus the number of frames the
/// step had to discard.
#[derive(Default)]
pub struct DepacketizeOutput {
    pub frames: Vec<MediaFrame>,
    pub dropped: u32,
}

/// Receiver-side format automaton for one stream.
pub enum Depacketizer {
    Generic(generic::GenericDepacketizer),
    Opus,
    H264(Reassembler<H264Format>),
    H265(Reassembler<H265Format>),
    H266(Reassembler<H266Format>),
}

impl Depacketizer {
    pub fn new(format: MediaFormat, config: ReassemblyConfig) -> Self {
        match format {
            MediaFormat::Generic => Depacketizer::Generic(generic::GenericDepacketizer::new()),
            MediaFormat::Opus => Depacketizer::Opus,
            MediaFormat::H264 => Depacketizer::H264(Reassembler::new(config)),
            MediaFormat::H265 => Depacketizer::H265(Reassembler::new(config)),
            MediaFormat::H266 => Depacketizer::H266(Reassembler::new(config)),
        }
    }

    pub fn set_config(&mut self, config: ReassemblyConfig) {
        match self {
            Depacketizer::H264(r) => r.set_config(config),
            Depacketizer::H265(r) => r.set_config(config),
            Depacketizer::H266(r) => r.set_config(config),
            _ => {}
        }
    }

    /// Feed one validated RTP packet.
    pub fn push(&mut self, pkt: &RtpPacket) -> DepacketizeOutput {
        let mut out = DepacketizeOutput::default();
        match self {
            Depacketizer::Generic(d) => {
                if let Some((data, first_seq)) = d.push(pkt) {
                    out.frames.push(MediaFrame::new(
                        Bytes::from(data),
                        pkt.timestamp(),
                        pkt.ssrc(),
                        pkt.payload_type(),
                        first_seq,
                        true,
                    ));
                }
            }
            Depacketizer::Opus => {
                if let Some(data) = opus::depacketize(pkt) {
                    out.frames.push(MediaFrame::new(
                        Bytes::from(data),
                        pkt.timestamp(),
                        pkt.ssrc(),
                        pkt.payload_type(),
                        pkt.seq(),
                        pkt.marker(),
                    ));
                } else {
                    out.dropped = 1;
                }
            }
            Depacketizer::H264(r) => absorb::<H264Format>(r, pkt, &mut out),
            Depacketizer::H265(r) => absorb::<H265Format>(r, pkt, &mut out),
            Depacketizer::H266(r) => absorb::<H266Format>(r, pkt, &mut out),
        }
        out
    }
}

fn absorb<F: NalFormat>(r: &mut Reassembler<F>, pkt: &RtpPacket, out: &mut DepacketizeOutput) {
    let res = r.push(pkt);
    out.dropped += res.dropped;
    for f in res.frames {
        out.frames.push(MediaFrame::new(
            Bytes::from(f.data),
            f.timestamp,
            pkt.ssrc(),
            pkt.payload_type(),
            f.first_seq,
            f.marker,
        ));
    }
}
