//! Shared H.26x machinery: Annex-B start-code scanning, fragmentation-unit
//! packetization and the timestamp-keyed reassembly automaton.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::rtp::RtpPacket;
use crate::rtp::frame_queue::PayloadChunk;

/// Annex-B prefix prepended to delivered NAL units unless disabled.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Fields recovered from a fragmentation-unit payload.
pub struct FuFields {
    pub start: bool,
    pub end: bool,
    /// Reconstructed original NAL unit header.
    pub nal_header: Vec<u8>,
    /// Wire bytes consumed by the FU headers.
    pub consumed: usize,
}

/// The codec-specific pieces of RFC 6184 / 7798 / 9328 framing.
pub trait NalFormat {
    /// Bytes in the NAL unit header (1 for H.264, 2 for H.265/H.266).
    const NAL_HEADER_LEN: usize;
    /// Wire overhead of one FU fragment (indicator/payload header + FU header).
    const FU_OVERHEAD: usize;

    fn nal_type(header: &[u8]) -> u8;
    fn is_intra(nal_type: u8) -> bool;
    fn is_fu(nal_type: u8) -> bool;
    fn is_ap(nal_type: u8) -> bool;
    /// FU indicator/payload header plus FU header for one fragment.
    fn fu_headers(nal_header: &[u8], start: bool, end: bool) -> Vec<u8>;
    fn parse_fu(payload: &[u8]) -> Option<FuFields>;
}

// ---------------------------------------------------------------------------
// Start-code lookup
// ---------------------------------------------------------------------------

/// Zero-byte probe: `(x - 0x01010101) & !x & 0x80808080` is non-zero iff the
/// word contains a zero byte.
#[inline]
fn word_has_zero(x: u32) -> bool {
    (x.wrapping_sub(0x0101_0101) & !x & 0x8080_8080) != 0
}

/// Split an Annex-B buffer into NAL unit ranges (start codes stripped).
/// Accepts 3- and 4-byte prefixes; with no start code at all the whole
/// buffer counts as a single NAL unit.
pub fn split_nal_units(data: &[u8]) -> Vec<std::ops::Range<usize>> {
    let mut starts = Vec::new();
    let n = data.len();
    let mut i = 0usize;

    while i + 3 <= n {
        // Word-at-a-time skip over runs without zero bytes.
        if i + 4 <= n {
            let word = u32::from_ne_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
            if !word_has_zero(word) {
                i += 4;
                continue;
            }
        }
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    if starts.is_empty() {
        return if data.is_empty() { Vec::new() } else { vec![0..n] };
    }

    let mut units = Vec::with_capacity(starts.len());
    for (k, &start) in starts.iter().enumerate() {
        let mut end = if k + 1 < starts.len() {
            starts[k + 1] - 3 // exclude the next 3-byte prefix
        } else {
            n
        };
        // Trailing zeros belong to a 4-byte prefix, not the NAL unit.
        while end > start && data[end - 1] == 0 {
            end -= 1;
        }
        if end > start {
            units.push(start..end);
        }
    }
    units
}

// ---------------------------------------------------------------------------
// Packetization
// ---------------------------------------------------------------------------

/// Split one access unit into RTP payload chunks: single-NAL packets where
/// they fit, FU fragmentation otherwise. The marker lands on the last chunk.
pub fn packetize<F: NalFormat>(
    data: &[u8],
    max_payload: usize,
    scan_start_codes: bool,
) -> Vec<PayloadChunk> {
    let units = if scan_start_codes {
        split_nal_units(data)
    } else if data.is_empty() {
        Vec::new()
    } else {
        vec![0..data.len()]
    };

    let mut out = Vec::new();
    for unit in &units {
        let nal = &data[unit.clone()];
        if nal.len() < F::NAL_HEADER_LEN {
            continue;
        }

        if nal.len() <= max_payload {
            out.push(PayloadChunk::plain(unit.clone(), false));
            continue;
        }

        // FU fragmentation: the original NAL header is carried by the FU
        // headers, payload fragments start past it.
        let nal_header = &nal[..F::NAL_HEADER_LEN];
        let frag_budget = max_payload.saturating_sub(F::FU_OVERHEAD);
        if frag_budget == 0 {
            continue;
        }

        let body_start = unit.start + F::NAL_HEADER_LEN;
        let body_end = unit.end;
        let mut offset = body_start;
        while offset < body_end {
            let take = (body_end - offset).min(frag_budget);
            let start = offset == body_start;
            let end = offset + take == body_end;
            out.push(PayloadChunk {
                format_header: F::fu_headers(nal_header, start, end),
                range: offset..offset + take,
                marker: false,
            });
            offset += take;
        }
    }

    if let Some(last) = out.last_mut() {
        last.marker = true;
    }
    out
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// Receiver-side policy knobs.
#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    /// Incomplete frames older than this are garbage collected.
    pub max_delay: Duration,
    /// Prepend a 4-byte Annex-B start code to delivered NAL units.
    pub prepend_start_code: bool,
    /// Keep an overdue intra frame and drop newer inters instead.
    pub intra_hold: bool,
    /// Drop inter frames whose preceding intra never completed.
    pub dependency_enforcement: bool,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_millis(500),
            prepend_start_code: true,
            intra_hold: true,
            dependency_enforcement: false,
        }
    }
}

/// One frame under reassembly, keyed by RTP timestamp.
struct FrameAssembly {
    fragments: HashMap<u16, Vec<u8>>,
    start_seq: Option<u16>,
    end_seq: Option<u16>,
    arrival: Instant,
    total_bytes: usize,
    nal_header: Vec<u8>,
    intra: bool,
    marker_seen: bool,
}

impl FrameAssembly {
    fn new(now: Instant) -> Self {
        Self {
            fragments: HashMap::new(),
            start_seq: None,
            end_seq: None,
            arrival: now,
            total_bytes: 0,
            nal_header: Vec::new(),
            intra: false,
            marker_seen: false,
        }
    }

    /// Complete when the S and E fragments are present and every sequence
    /// in `[start, end]` (mod 2^16) is filled.
    fn is_complete(&self) -> bool {
        let (Some(start), Some(end)) = (self.start_seq, self.end_seq) else {
            return false;
        };
        let span = end.wrapping_sub(start) as usize + 1;
        if self.fragments.len() < span {
            return false;
        }
        let mut seq = start;
        for _ in 0..span {
            if !self.fragments.contains_key(&seq) {
                return false;
            }
            seq = seq.wrapping_add(1);
        }
        true
    }

    fn concatenate(mut self, prepend_sc: bool) -> (Vec<u8>, u16, bool) {
        // is_complete() guaranteed start/end; default keeps this total.
        let start = self.start_seq.unwrap_or(0);
        let end = self.end_seq.unwrap_or(start);
        let span = end.wrapping_sub(start) as usize + 1;

        let sc_len = if prepend_sc { START_CODE.len() } else { 0 };
        let mut out = Vec::with_capacity(sc_len + self.nal_header.len() + self.total_bytes);
        if prepend_sc {
            out.extend_from_slice(&START_CODE);
        }
        out.extend_from_slice(&self.nal_header);

        let mut seq = start;
        for _ in 0..span {
            if let Some(frag) = self.fragments.remove(&seq) {
                out.extend_from_slice(&frag);
            }
            seq = seq.wrapping_add(1);
        }
        (out, start, self.marker_seen)
    }
}

/// A frame delivered or dropped by the reassembler.
pub struct AssembledFrame {
    pub data: Vec<u8>,
    pub timestamp: u32,
    pub first_seq: u16,
    pub marker: bool,
}

#[derive(Default)]
pub struct PushResult {
    pub frames: Vec<AssembledFrame>,
    /// Frames discarded this round (GC, dependency policy, malformed).
    pub dropped: u32,
}

/// The per-stream H.26x depacketizer.
pub struct Reassembler<F: NalFormat> {
    table: HashMap<u32, FrameAssembly>,
    config: ReassemblyConfig,
    /// Timestamp of an overdue intra being held per the intra-delay policy.
    held_intra: Option<u32>,
    /// False while the reference intra for upcoming inters is missing.
    intra_chain_ok: bool,
    _format: std::marker::PhantomData<F>,
}

impl<F: NalFormat> Reassembler<F> {
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            table: HashMap::new(),
            config,
            held_intra: None,
            intra_chain_ok: true,
            _format: std::marker::PhantomData,
        }
    }

    pub fn set_config(&mut self, config: ReassemblyConfig) {
        self.config = config;
    }

    /// Feed one RTP packet; returns zero or more completed frames.
    pub fn push(&mut self, pkt: &RtpPacket) -> PushResult {
        let mut result = PushResult::default();
        let now = Instant::now();

        self.collect_garbage(now, &mut result);

        let payload = &pkt.payload;
        if payload.len() < F::NAL_HEADER_LEN {
            result.dropped += 1;
            return result;
        }
        let nal_type = F::nal_type(payload);

        if F::is_fu(nal_type) {
            self.push_fragment(pkt, now, &mut result);
        } else if F::is_ap(nal_type) {
            self.push_aggregate(pkt, &mut result);
        } else {
            // Single NAL unit packet: a complete frame on its own.
            let intra = F::is_intra(nal_type);
            let mut data =
                Vec::with_capacity(payload.len() + if self.config.prepend_start_code { 4 } else { 0 });
            if self.config.prepend_start_code {
                data.extend_from_slice(&START_CODE);
            }
            data.extend_from_slice(payload);
            self.deliver(
                AssembledFrame {
                    data,
                    timestamp: pkt.timestamp(),
                    first_seq: pkt.seq(),
                    marker: pkt.marker(),
                },
                intra,
                &mut result,
            );
        }
        result
    }

    fn push_fragment(&mut self, pkt: &RtpPacket, now: Instant, result: &mut PushResult) {
        let Some(fu) = F::parse_fu(&pkt.payload) else {
            result.dropped += 1;
            return;
        };
        let ts = pkt.timestamp();
        let seq = pkt.seq();

        let frame_is_intra = {
            let entry = self
                .table
                .entry(ts)
                .or_insert_with(|| FrameAssembly::new(now));

            if fu.start {
                entry.start_seq = Some(seq);
                entry.intra = F::is_intra(F::nal_type(&fu.nal_header));
                entry.nal_header = fu.nal_header;
            }
            if fu.end {
                entry.end_seq = Some(seq);
            }
            if pkt.marker() {
                entry.marker_seen = true;
            }

            let frag = pkt.payload[fu.consumed..].to_vec();
            entry.total_bytes += frag.len();
            if let Some(old) = entry.fragments.insert(seq, frag) {
                entry.total_bytes -= old.len(); // duplicate replaced
            }
            entry.intra
        };

        // A fresh intra supersedes one we were holding.
        if frame_is_intra
            && let Some(held) = self.held_intra
            && held != ts
            && newer_ts(ts, held)
        {
            self.table.remove(&held);
            self.held_intra = None;
            self.intra_chain_ok = false;
            result.dropped += 1;
        }

        if self
            .table
            .get(&ts)
            .map(|e| e.is_complete())
            .unwrap_or(false)
            && let Some(entry) = self.table.remove(&ts)
        {
            let intra = entry.intra;
            let (data, first_seq, marker) = entry.concatenate(self.config.prepend_start_code);
            if intra && self.held_intra == Some(ts) {
                self.held_intra = None;
            }
            self.deliver(
                AssembledFrame {
                    data,
                    timestamp: ts,
                    first_seq,
                    marker,
                },
                intra,
                result,
            );
        }
    }

    fn push_aggregate(&mut self, pkt: &RtpPacket, result: &mut PushResult) {
        // Aggregation packet: u16-sized NAL records after the payload header.
        let payload = &pkt.payload;
        let mut idx = F::NAL_HEADER_LEN;
        let mut nals = Vec::new();
        while idx + 2 <= payload.len() {
            let size = u16::from_be_bytes([payload[idx], payload[idx + 1]]) as usize;
            idx += 2;
            if size == 0 || payload.len() < idx + size {
                result.dropped += 1;
                return;
            }
            nals.push(&payload[idx..idx + size]);
            idx += size;
        }
        if idx != payload.len() || nals.is_empty() {
            result.dropped += 1;
            return;
        }

        let last = nals.len() - 1;
        for (i, nal) in nals.into_iter().enumerate() {
            if nal.len() < F::NAL_HEADER_LEN {
                result.dropped += 1;
                continue;
            }
            let intra = F::is_intra(F::nal_type(nal));
            let mut data =
                Vec::with_capacity(nal.len() + if self.config.prepend_start_code { 4 } else { 0 });
            if self.config.prepend_start_code {
                data.extend_from_slice(&START_CODE);
            }
            data.extend_from_slice(nal);
            self.deliver(
                AssembledFrame {
                    data,
                    timestamp: pkt.timestamp(),
                    first_seq: pkt.seq(),
                    marker: pkt.marker() && i == last,
                },
                intra,
                result,
            );
        }
    }

    fn deliver(&mut self, frame: AssembledFrame, intra: bool, result: &mut PushResult) {
        if intra {
            self.intra_chain_ok = true;
        } else {
            // Inter newer than a stalled intra waits for it (or dies with it).
            if let Some(held) = self.held_intra
                && newer_ts(frame.timestamp, held)
            {
                result.dropped += 1;
                return;
            }
            if self.config.dependency_enforcement && !self.intra_chain_ok {
                result.dropped += 1;
                return;
            }
        }
        result.frames.push(frame);
    }

    fn collect_garbage(&mut self, now: Instant, result: &mut PushResult) {
        let max_delay = self.config.max_delay;
        let intra_hold = self.config.intra_hold;

        let mut expired: Vec<u32> = Vec::new();
        let mut hold: Option<u32> = self.held_intra;
        for (&ts, entry) in &self.table {
            if now.duration_since(entry.arrival) <= max_delay {
                continue;
            }
            if entry.intra && intra_hold {
                // Overdue intra is kept; remember the oldest one.
                match hold {
                    Some(held) if !newer_ts(held, ts) => {}
                    _ => hold = Some(ts),
                }
            } else {
                expired.push(ts);
            }
        }

        self.held_intra = hold;
        for ts in expired {
            if let Some(entry) = self.table.remove(&ts) {
                if entry.intra {
                    self.intra_chain_ok = false;
                }
                result.dropped += 1;
            }
        }
    }
}

/// Wrapping comparison of RTP timestamps: true when `a` is newer than `b`.
#[inline]
fn newer_ts(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000_0000
}
