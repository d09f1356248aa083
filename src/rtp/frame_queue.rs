//! Send-side queue: turns the packetizer's fragment list for one frame into
//! datagrams, applies batching and pacing, and keeps sender accounting.

use std::ops::Range;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::RtpError;
use crate::log::LogSink;
use crate::net::socket::UdpEndpoint;
use crate::rtcp::SenderStats;
use crate::rtp::RtpContext;
use crate::sink_warn;

/// One wire fragment produced by a packetizer: optional format header
/// (FU indicator/header, AP sizes) plus a slice of the frame data.
#[derive(Debug, Clone)]
pub struct PayloadChunk {
    pub format_header: Vec<u8>,
    pub range: Range<usize>,
    /// Marker bit for this fragment (format rules: last fragment of the
    /// access unit).
    pub marker: bool,
}

impl PayloadChunk {
    pub fn plain(range: Range<usize>, marker: bool) -> Self {
        Self {
            format_header: Vec::new(),
            range,
            marker,
        }
    }
}

/// Pacing/batching knobs resolved from the stream's RCE flags and config.
#[derive(Debug, Clone, Default)]
pub struct SendPolicy {
    /// `system-call-clustering`: flush the whole frame as one batch.
    pub batch: bool,
    /// `pace-fragment-sending`: space fragments uniformly across 1/fps.
    pub pace_fragments: bool,
    /// `frame-rate`: gate successive frames to the configured rate.
    pub enforce_fps: bool,
    /// (numerator, denominator); e.g. (30, 1) for 30 fps.
    pub fps: Option<(u32, u32)>,
}

impl SendPolicy {
    fn frame_interval(&self) -> Option<Duration> {
        let (num, den) = self.fps?;
        if num == 0 || den == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(f64::from(den) / f64::from(num)))
    }
}

/// Builds and flushes the datagrams of one application frame.
pub struct FrameQueue {
    endpoint: Arc<UdpEndpoint>,
    stats: Arc<SenderStats>,
    policy: SendPolicy,
    next_frame_deadline: Option<Instant>,
    logger: Arc<dyn LogSink>,
}

impl FrameQueue {
    pub fn new(
        endpoint: Arc<UdpEndpoint>,
        stats: Arc<SenderStats>,
        policy: SendPolicy,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            endpoint,
            stats,
            policy,
            next_frame_deadline: None,
            logger,
        }
    }

    pub fn set_policy(&mut self, policy: SendPolicy) {
        self.policy = policy;
    }

    /// Flush one frame.
    ///
    /// Either every fragment is handed to the socket or the first failure is
    /// returned; sequence numbers are consumed exactly once per fragment
    /// either way, so the receiver sees a loss rather than a reordering.
    pub fn push_frame(
        &mut self,
        ctx: &mut RtpContext,
        data: &[u8],
        chunks: &[PayloadChunk],
        timestamp: u32,
    ) -> Result<(), RtpError> {
        if chunks.is_empty() {
            return Err(RtpError::InvalidValue);
        }

        self.gate_frame_rate();

        let pace = self.fragment_gap(chunks.len());

        if self.policy.batch && pace.is_none() {
            return self.push_batched(ctx, data, chunks, timestamp);
        }

        let mut result = Ok(());
        for (i, chunk) in chunks.iter().enumerate() {
            let datagram = self.assemble(ctx, data, chunk, timestamp);
            match self.endpoint.send_one(datagram) {
                Ok(_) => self.account(chunk, timestamp),
                Err(e) => {
                    sink_warn!(self.logger, "[send] fragment {i} failed: {e}");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
            if let (Some(gap), false) = (pace, i + 1 == chunks.len()) {
                thread::sleep(gap);
            }
        }
        result
    }

    fn push_batched(
        &mut self,
        ctx: &mut RtpContext,
        data: &[u8],
        chunks: &[PayloadChunk],
        timestamp: u32,
    ) -> Result<(), RtpError> {
        let mut batch = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            batch.push(self.assemble(ctx, data, chunk, timestamp));
        }
        let res = self.endpoint.send_batch(batch);
        if res.is_ok() {
            for chunk in chunks {
                self.account(chunk, timestamp);
            }
        }
        res.map(|_| ())
    }

    fn assemble(
        &self,
        ctx: &mut RtpContext,
        data: &[u8],
        chunk: &PayloadChunk,
        timestamp: u32,
    ) -> Vec<u8> {
        let header = ctx.make_header(timestamp, chunk.marker);
        let payload = &data[chunk.range.clone()];
        let mut datagram =
            Vec::with_capacity(header.wire_len() + chunk.format_header.len() + payload.len());
        // Header encoding of a fixed header cannot fail; keep the queue
        // infallible on assembly.
        let _ = header.encode_into(&mut datagram, false);
        datagram.extend_from_slice(&chunk.format_header);
        datagram.extend_from_slice(payload);
        datagram
    }

    fn account(&self, chunk: &PayloadChunk, timestamp: u32) {
        let payload_len = chunk.format_header.len() + chunk.range.len();
        self.stats.on_sent(payload_len as u32, timestamp);
    }

    /// `frame-rate` enforcement: sleep until the deadline of the next frame.
    fn gate_frame_rate(&mut self) {
        if !self.policy.enforce_fps {
            return;
        }
        let Some(interval) = self.policy.frame_interval() else {
            return;
        };
        let now = Instant::now();
        match self.next_frame_deadline {
            Some(deadline) => {
                if deadline > now {
                    thread::sleep(deadline - now);
                }
                // Late frames re-anchor rather than bursting to catch up.
                let base = now.checked_sub(interval).map_or(deadline, |t| deadline.max(t));
                self.next_frame_deadline = Some(base + interval);
            }
            None => self.next_frame_deadline = Some(now + interval),
        }
    }

    fn fragment_gap(&self, n_chunks: usize) -> Option<Duration> {
        if !self.policy.pace_fragments || n_chunks < 2 {
            return None;
        }
        self.policy.frame_interval().map(|iv| iv / n_chunks as u32)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::log::NoopLogSink;
    use crate::net::socket::RecvStatus;
    use crate::rtp::RtpPacket;

    fn setup() -> (FrameQueue, RtpContext, UdpEndpoint, Arc<SenderStats>) {
        let a = Arc::new(UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap());
        let b = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        a.connect_out(b.local_addr());
        let stats = Arc::new(SenderStats::default());
        let queue = FrameQueue::new(
            Arc::clone(&a),
            Arc::clone(&stats),
            SendPolicy::default(),
            Arc::new(NoopLogSink),
        );
        (queue, RtpContext::new(96, 90_000), b, stats)
    }

    fn recv_packet(b: &UdpEndpoint) -> RtpPacket {
        let mut buf = [0u8; 2048];
        match b.recv_with_deadline(&mut buf, Duration::from_secs(1)).unwrap() {
            RecvStatus::Ok(n, _) => RtpPacket::decode(&buf[..n]).unwrap(),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn empty_fragment_list_is_invalid() {
        let (mut queue, mut ctx, _b, _stats) = setup();
        assert_eq!(
            queue.push_frame(&mut ctx, &[], &[], 0).unwrap_err(),
            RtpError::InvalidValue
        );
    }

    #[test]
    fn fragments_share_timestamp_and_consume_sequence() {
        let (mut queue, mut ctx, b, stats) = setup();
        let data = vec![0xABu8; 30];
        let chunks = vec![
            PayloadChunk::plain(0..10, false),
            PayloadChunk::plain(10..20, false),
            PayloadChunk::plain(20..30, true),
        ];
        queue.push_frame(&mut ctx, &data, &chunks, 4242).unwrap();

        let p1 = recv_packet(&b);
        let p2 = recv_packet(&b);
        let p3 = recv_packet(&b);
        assert_eq!(p1.timestamp(), 4242);
        assert_eq!(p2.timestamp(), 4242);
        assert_eq!(p2.seq(), p1.seq().wrapping_add(1));
        assert_eq!(p3.seq(), p1.seq().wrapping_add(2));
        assert!(!p1.marker() && !p2.marker() && p3.marker());

        let (pkts, bytes) = stats.snapshot();
        assert_eq!(pkts, 3);
        assert_eq!(bytes, 30);
    }

    #[test]
    fn format_header_precedes_payload() {
        let (mut queue, mut ctx, b, _stats) = setup();
        let data = vec![0x11u8; 4];
        let chunks = vec![PayloadChunk {
            format_header: vec![0x7C, 0x85],
            range: 0..4,
            marker: true,
        }];
        queue.push_frame(&mut ctx, &data, &chunks, 1).unwrap();

        let pkt = recv_packet(&b);
        assert_eq!(pkt.payload, vec![0x7C, 0x85, 0x11, 0x11, 0x11, 0x11]);
    }

    #[test]
    fn batched_frame_arrives_in_order() {
        let (mut queue, mut ctx, b, _stats) = setup();
        queue.set_policy(SendPolicy {
            batch: true,
            ..SendPolicy::default()
        });
        let data: Vec<u8> = (0..40).collect();
        let chunks = vec![
            PayloadChunk::plain(0..20, false),
            PayloadChunk::plain(20..40, true),
        ];
        queue.push_frame(&mut ctx, &data, &chunks, 99).unwrap();

        let p1 = recv_packet(&b);
        let p2 = recv_packet(&b);
        assert_eq!(p1.payload, (0..20).collect::<Vec<u8>>());
        assert_eq!(p2.payload, (20..40).collect::<Vec<u8>>());
        assert_eq!(p2.seq(), p1.seq().wrapping_add(1));
    }

    #[test]
    fn fps_enforcement_spaces_frames() {
        let (mut queue, mut ctx, _b, _stats) = setup();
        queue.set_policy(SendPolicy {
            enforce_fps: true,
            fps: Some((50, 1)), // 20 ms interval
            ..SendPolicy::default()
        });
        let data = vec![0u8; 4];
        let chunks = vec![PayloadChunk::plain(0..4, true)];

        let start = Instant::now();
        for _ in 0..3 {
            queue.push_frame(&mut ctx, &data, &chunks, 0).unwrap();
        }
        // Frame 2 and 3 each wait for the 20 ms gate.
        assert!(start.elapsed() >= Duration::from_millis(35));
    }
}
