//! Per-stream RTP state: SSRC, sequence counter, timestamp clock, payload
//! type. Small value type shared between the frame queue and RTCP so the
//! control plane never needs a back-reference to the stream itself.

use std::time::Instant;

use rand::{RngCore, rngs::OsRng};

use crate::rtp::RtpHeader;

#[derive(Debug, Clone)]
pub struct RtpContext {
    ssrc: u32,
    seq: u16,
    ts_base: u32,
    clock_rate: u32,
    payload_type: u8,
    wallclock_base: Instant,
}

impl RtpContext {
    /// Fresh context with random SSRC, random 16-bit sequence start and
    /// random 32-bit timestamp base.
    pub fn new(payload_type: u8, clock_rate: u32) -> Self {
        Self {
            ssrc: OsRng.next_u32(),
            seq: OsRng.next_u32() as u16,
            ts_base: OsRng.next_u32(),
            clock_rate,
            payload_type,
            wallclock_base: Instant::now(),
        }
    }

    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn set_ssrc(&mut self, ssrc: u32) {
        self.ssrc = ssrc;
    }

    /// Re-roll the local SSRC after a collision with a remote source.
    pub fn reroll_ssrc(&mut self) -> u32 {
        self.ssrc = OsRng.next_u32();
        self.ssrc
    }

    #[must_use]
    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// Dynamic payload type override (96..127 for dynamic assignments).
    pub fn set_payload_type(&mut self, pt: u8) {
        self.payload_type = pt & 0x7F;
    }

    #[must_use]
    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn set_clock_rate(&mut self, rate: u32) {
        self.clock_rate = rate;
    }

    #[must_use]
    pub fn seq(&self) -> u16 {
        self.seq
    }

    /// Current RTP timestamp derived from the wallclock:
    /// `ts_base + elapsed * clock_rate`, computed at microsecond resolution
    /// so back-to-back frames do not share a timestamp.
    #[must_use]
    pub fn current_timestamp(&self) -> u32 {
        let elapsed_us = self.wallclock_base.elapsed().as_micros() as u64;
        let ticks = (u128::from(elapsed_us) * u128::from(self.clock_rate) / 1_000_000) as u64;
        self.ts_base.wrapping_add(ticks as u32)
    }

    /// Timestamp to stamp on the next frame: the caller-supplied one when
    /// given, otherwise the wallclock-derived clock.
    #[must_use]
    pub fn frame_timestamp(&self, explicit: Option<u32>) -> u32 {
        explicit.unwrap_or_else(|| self.current_timestamp())
    }

    /// Take the next sequence number (consumes one; wraps mod 2^16).
    pub fn next_seq(&mut self) -> u16 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Build the fixed header for one outgoing fragment.
    pub fn make_header(&mut self, timestamp: u32, marker: bool) -> RtpHeader {
        let seq = self.next_seq();
        RtpHeader::new(self.payload_type, seq, timestamp, self.ssrc).with_marker(marker)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn sequence_is_consecutive_and_wraps() {
        let mut ctx = RtpContext::new(96, 90_000);
        let first = ctx.next_seq();
        for i in 1u16..=10 {
            assert_eq!(ctx.next_seq(), first.wrapping_add(i));
        }
    }

    #[test]
    fn explicit_timestamp_wins() {
        let ctx = RtpContext::new(96, 90_000);
        assert_eq!(ctx.frame_timestamp(Some(777)), 777);
    }

    #[test]
    fn timestamp_advances_with_wallclock() {
        let ctx = RtpContext::new(96, 90_000);
        let a = ctx.current_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let b = ctx.current_timestamp();
        // 20 ms at 90 kHz is 1800 ticks; allow generous scheduling slack.
        assert!(b.wrapping_sub(a) >= 900, "clock did not advance: {a} -> {b}");
    }

    #[test]
    fn header_carries_context_fields() {
        let mut ctx = RtpContext::new(107, 90_000);
        ctx.set_ssrc(0x1122_3344);
        let hdr = ctx.make_header(555, true);
        assert_eq!(hdr.payload_type, 107);
        assert_eq!(hdr.timestamp, 555);
        assert_eq!(hdr.ssrc, 0x1122_3344);
        assert!(hdr.marker);
    }
}
