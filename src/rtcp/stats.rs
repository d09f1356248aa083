//! Per-direction RTP statistics feeding RTCP reports.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::clock;
use crate::rtcp::report::ReportBlock;

/// Send-side accounting shared between the frame queue (writer) and the
/// RTCP engine (reader). Lock-free because `push_frame` runs on application
/// threads while the timer thread samples.
#[derive(Debug, Default)]
pub struct SenderStats {
    pkts: AtomicU32,
    bytes: AtomicU32,
    last_rtp_ts: AtomicU32,
}

impl SenderStats {
    pub fn on_sent(&self, payload_bytes: u32, rtp_ts: u32) {
        self.pkts.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(payload_bytes, Ordering::Relaxed);
        self.last_rtp_ts.store(rtp_ts, Ordering::Relaxed);
    }

    /// (packets, payload bytes) sent so far.
    #[must_use]
    pub fn snapshot(&self) -> (u32, u32) {
        (
            self.pkts.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }

    #[must_use]
    pub fn last_rtp_ts(&self) -> u32 {
        self.last_rtp_ts.load(Ordering::Relaxed)
    }
}

/// Extends 16-bit sequence numbers with a cycle counter.
#[derive(Debug, Default, Clone)]
struct SeqExt {
    cycles: u32, // multiples of 2^16
    last: u16,
}

impl SeqExt {
    fn update(&mut self, seq: u16) -> u32 {
        // Going "backwards" by more than half the space means a wrap.
        if seq < self.last && self.last.wrapping_sub(seq) > 0x8000 {
            self.cycles = self.cycles.wrapping_add(1 << 16);
        }
        self.last = seq;
        self.cycles | u32::from(seq)
    }
}

/// Reception statistics for one remote source, per RFC 3550 Appendix A.
#[derive(Debug, Default, Clone)]
pub struct RxStats {
    seqext: SeqExt,
    base_ext_seq: Option<u32>,
    highest_ext_seq: u32,
    received: u32,
    received_bytes: u64,
    expected_prev: u32,
    received_prev: u32,

    // jitter (RFC 3550 A.8), in RTP clock units
    jitter: u32,
    last_transit: Option<u32>,

    // SR timing for LSR/DLSR
    last_sr_compact: Option<u32>,
    last_sr_arrival_compact: Option<u32>,

    dropped: u32,
}

impl RxStats {
    /// Account one unique RTP packet. `arrival_rtp_units` is the arrival
    /// instant expressed in RTP clock units of this stream.
    pub fn on_rtp(&mut self, seq: u16, rtp_ts: u32, arrival_rtp_units: u32, payload_bytes: usize) {
        let ext = self.seqext.update(seq);
        if self.base_ext_seq.is_none() {
            self.base_ext_seq = Some(ext);
        }
        if ext > self.highest_ext_seq {
            self.highest_ext_seq = ext;
        }
        self.received = self.received.wrapping_add(1);
        self.received_bytes = self.received_bytes.wrapping_add(payload_bytes as u64);

        let transit = arrival_rtp_units.wrapping_sub(rtp_ts);
        if let Some(prev) = self.last_transit {
            let d_abs = if transit >= prev { transit - prev } else { prev - transit };
            self.jitter = self
                .jitter
                .wrapping_add(((u64::from(d_abs)).saturating_sub(u64::from(self.jitter)) / 16) as u32);
        }
        self.last_transit = Some(transit);
    }

    /// Anchor LSR/DLSR when an SR arrives from this source.
    pub fn on_sr_received(&mut self, ntp_msw: u32, ntp_lsw: u32) {
        self.last_sr_compact = Some(clock::ntp_to_compact(ntp_msw, ntp_lsw));
        self.last_sr_arrival_compact = Some(clock::now_ntp_compact());
    }

    pub fn on_frame_dropped(&mut self) {
        self.dropped = self.dropped.wrapping_add(1);
    }

    #[must_use]
    pub fn received(&self) -> u32 {
        self.received
    }

    #[must_use]
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    #[must_use]
    pub fn jitter(&self) -> u32 {
        self.jitter
    }

    #[must_use]
    pub fn highest_ext_seq(&self) -> u32 {
        self.highest_ext_seq
    }

    #[must_use]
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Build one report block about this source, consuming interval deltas.
    pub fn build_report_block(&mut self, ssrc: u32) -> ReportBlock {
        let base = self.base_ext_seq.unwrap_or(0);
        let expected_total = self.highest_ext_seq.saturating_sub(base) + 1;
        let cumulative_lost = i64::from(expected_total) - i64::from(self.received);

        let exp_delta = expected_total.saturating_sub(self.expected_prev);
        let rec_delta = self.received.saturating_sub(self.received_prev);
        let lost_delta = exp_delta.saturating_sub(rec_delta);
        let fraction_lost = if exp_delta == 0 {
            0
        } else {
            ((lost_delta * 256) / exp_delta).min(255) as u8
        };

        self.expected_prev = expected_total;
        self.received_prev = self.received;

        let (lsr, dlsr) = match (self.last_sr_compact, self.last_sr_arrival_compact) {
            (Some(lsr), Some(arrival)) => {
                let now = clock::now_ntp_compact();
                (lsr, now.wrapping_sub(arrival))
            }
            _ => (0, 0),
        };

        ReportBlock {
            ssrc,
            fraction_lost,
            cumulative_lost: cumulative_lost.clamp(-8_388_608, 8_388_607) as i32,
            ext_highest_seq: self.highest_ext_seq,
            jitter: self.jitter,
            lsr,
            dlsr,
        }
    }
}
