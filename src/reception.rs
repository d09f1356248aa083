//! The reception flow: one read thread per bound socket, feeding an ordered
//! chain of packet handlers that demultiplex, decrypt, validate and
//! reassemble incoming datagrams.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};

use crate::error::{HandlerOutcome, RtpError};
use crate::formats::Depacketizer;
use crate::frame::MediaFrame;
use crate::log::LogSink;
use crate::net::socket::{RecvStatus, UdpEndpoint};
use crate::rtcp::RtcpEngine;
use crate::rtcp::compound::looks_like_rtcp;
use crate::rtp::{RtpContext, RtpPacket};
use crate::srtp::SrtpContext;
use crate::zrtp::ZRTP_MAGIC_COOKIE;
use crate::{sink_debug, sink_trace, sink_warn};

/// Synchronous frame delivery callback.
pub type ReceiveHook = Box<dyn Fn(MediaFrame) + Send + 'static>;
/// Called with the number of frames discarded by a depacketizer step.
pub type NotifyHook = Box<dyn Fn(u32) + Send + 'static>;

// ---------------------------------------------------------------------------
// Pull queue
// ---------------------------------------------------------------------------

/// Bounded frame queue between the reception thread and `pull_frame`.
/// Overflow drops the oldest frame.
pub struct PullQueue {
    inner: Mutex<VecDeque<MediaFrame>>,
    cond: Condvar,
    capacity: usize,
    overflow_drops: AtomicU32,
    closed: AtomicBool,
}

impl PullQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            capacity: capacity.max(1),
            overflow_drops: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, frame: MediaFrame) {
        let Ok(mut q) = self.inner.lock() else {
            return;
        };
        if q.len() == self.capacity {
            q.pop_front();
            self.overflow_drops.fetch_add(1, Ordering::Relaxed);
        }
        q.push_back(frame);
        self.cond.notify_one();
    }

    /// Block up to `timeout` (forever when `None`) for the next frame.
    pub fn pull(&self, timeout: Option<Duration>) -> Option<MediaFrame> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut q = self.inner.lock().ok()?;
        loop {
            if let Some(frame) = q.pop_front() {
                return Some(frame);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return None;
                    }
                    let (guard, res) = self.cond.wait_timeout(q, d - now).ok()?;
                    q = guard;
                    if res.timed_out() && q.is_empty() {
                        return None;
                    }
                }
                None => q = self.cond.wait(q).ok()?,
            }
        }
    }

    /// Wake all pullers; subsequent pulls return `None` once drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }

    #[must_use]
    pub fn overflow_drops(&self) -> u32 {
        self.overflow_drops.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Handler chain
// ---------------------------------------------------------------------------

/// Where a format handler's completed frames go: the pull queue, or a user
/// hook when one is installed.
pub struct Delivery {
    pub queue: Arc<PullQueue>,
    pub hook: Mutex<Option<ReceiveHook>>,
    pub notify: Mutex<Option<NotifyHook>>,
}

impl Delivery {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue: Arc::new(PullQueue::new(queue_capacity)),
            hook: Mutex::new(None),
            notify: Mutex::new(None),
        }
    }

    fn deliver(&self, frame: MediaFrame) {
        if let Ok(hook) = self.hook.lock()
            && let Some(f) = hook.as_ref()
        {
            f(frame);
            return;
        }
        self.queue.push(frame);
    }

    fn report_dropped(&self, dropped: u32) {
        if dropped == 0 {
            return;
        }
        if let Ok(notify) = self.notify.lock()
            && let Some(f) = notify.as_ref()
        {
            f(dropped);
        }
    }
}

/// Forwards ZRTP datagrams (recognized by the magic cookie) to the key
/// agreement engine.
pub struct ZrtpHandler {
    pub tx: Sender<Vec<u8>>,
}

/// Decrypts SRTP in place before validation.
pub struct SrtpHandler {
    pub ctx: Arc<Mutex<Option<SrtpContext>>>,
    pub remote_ssrc: Arc<Mutex<Option<u32>>>,
}

/// Routes multiplexed RTCP compounds to the control engine.
pub struct RtcpDemuxHandler {
    pub engine: Arc<RtcpEngine>,
}

/// Header validation, SSRC learning/filtering and reception accounting.
pub struct RtpValidateHandler {
    pub remote_ssrc: Arc<Mutex<Option<u32>>>,
    pub payload_type: u8,
    pub local_ctx: Arc<Mutex<RtpContext>>,
    pub rtcp: Option<Arc<RtcpEngine>>,
}

/// The terminal depacketizer; owns the per-stream reassembly state.
pub struct FormatHandler {
    pub depacketizer: Depacketizer,
    pub delivery: Arc<Delivery>,
    pub rtcp: Option<Arc<RtcpEngine>>,
    /// Shared with the validator: only packets of the learned source are
    /// consumed, so sibling streams on a shared socket get their turn.
    pub remote_ssrc: Arc<Mutex<Option<u32>>>,
}

/// The typed handler sum. The reception flow walks installed handlers in
/// order and acts on the returned [`HandlerOutcome`].
pub enum PacketHandler {
    Zrtp(ZrtpHandler),
    Srtp(SrtpHandler),
    RtcpDemux(RtcpDemuxHandler),
    RtpValidate(RtpValidateHandler),
    Format(FormatHandler),
}

impl PacketHandler {
    fn dispatch(&mut self, pkt: &mut Vec<u8>, peer: SocketAddr) -> HandlerOutcome {
        match self {
            PacketHandler::Zrtp(h) => {
                if !is_zrtp_datagram(pkt) {
                    return HandlerOutcome::NotHandled;
                }
                let _ = h.tx.send(pkt.clone());
                HandlerOutcome::Handled
            }
            PacketHandler::Srtp(h) => {
                if looks_like_rtcp(pkt) || pkt.len() < 12 || (pkt[0] >> 6) != 2 {
                    return HandlerOutcome::NotHandled;
                }
                // On a shared socket only this stream's source is ours.
                let pkt_ssrc = BigEndian::read_u32(&pkt[8..12]);
                if let Ok(remote) = h.remote_ssrc.lock()
                    && let Some(ssrc) = *remote
                    && ssrc != pkt_ssrc
                {
                    return HandlerOutcome::NotHandled;
                }
                let Ok(mut guard) = h.ctx.lock() else {
                    return HandlerOutcome::Error(RtpError::Generic);
                };
                match guard.as_mut() {
                    None => HandlerOutcome::NotHandled,
                    Some(ctx) => match ctx.unprotect(pkt) {
                        Ok(()) => HandlerOutcome::Modified,
                        Err(e) => HandlerOutcome::Error(e.into()),
                    },
                }
            }
            PacketHandler::RtcpDemux(h) => {
                if !looks_like_rtcp(pkt) {
                    return HandlerOutcome::NotHandled;
                }
                match h.engine.handle_wire(pkt.clone(), Some(peer)) {
                    Ok(()) => HandlerOutcome::Handled,
                    Err(e) => HandlerOutcome::Error(e),
                }
            }
            PacketHandler::RtpValidate(h) => {
                if pkt.len() < 12 || (pkt[0] >> 6) != 2 {
                    return HandlerOutcome::Error(RtpError::InvalidValue);
                }
                let pkt_ssrc = BigEndian::read_u32(&pkt[8..12]);
                let pt = pkt[1] & 0x7F;

                // A remote source using our SSRC forces a local re-roll.
                if let Ok(mut ctx) = h.local_ctx.lock()
                    && ctx.ssrc() == pkt_ssrc
                {
                    let old = ctx.ssrc();
                    let new = ctx.reroll_ssrc();
                    drop(ctx);
                    if let Some(engine) = &h.rtcp {
                        engine.send_bye_for(old);
                    }
                    let _ = new;
                    return HandlerOutcome::Error(RtpError::SsrcCollision);
                }

                match h.remote_ssrc.lock() {
                    Ok(mut remote) => match *remote {
                        Some(ssrc) if ssrc != pkt_ssrc => return HandlerOutcome::NotHandled,
                        Some(_) => {}
                        None => {
                            if pt != h.payload_type {
                                return HandlerOutcome::NotHandled;
                            }
                            *remote = Some(pkt_ssrc);
                        }
                    },
                    Err(_) => return HandlerOutcome::Error(RtpError::Generic),
                }

                if let Some(engine) = &h.rtcp {
                    let seq = BigEndian::read_u16(&pkt[2..4]);
                    let ts = BigEndian::read_u32(&pkt[4..8]);
                    engine.on_media_received(pkt_ssrc, seq, ts, pkt.len().saturating_sub(12), Some(peer));
                }
                HandlerOutcome::Modified
            }
            PacketHandler::Format(h) => {
                let Ok(parsed) = RtpPacket::decode(pkt) else {
                    return HandlerOutcome::Error(RtpError::InvalidValue);
                };
                // The validator ahead of us learned the source; anything
                // else belongs to another stream's sub-chain.
                match h.remote_ssrc.lock() {
                    Ok(remote) => match *remote {
                        Some(ssrc) if ssrc == parsed.ssrc() => {}
                        _ => return HandlerOutcome::NotHandled,
                    },
                    Err(_) => return HandlerOutcome::Error(RtpError::Generic),
                }
                let out = h.depacketizer.push(&parsed);
                if out.dropped > 0 {
                    if let Some(engine) = &h.rtcp {
                        engine.on_frame_dropped(parsed.ssrc());
                    }
                    h.delivery.report_dropped(out.dropped);
                }
                let mut frames = out.frames;
                match frames.len() {
                    0 => HandlerOutcome::Handled,
                    1 => match frames.pop() {
                        Some(frame) => HandlerOutcome::PktReady(frame),
                        None => HandlerOutcome::Handled,
                    },
                    _ => HandlerOutcome::MultiplePktsReady(frames),
                }
            }
        }
    }

    fn delivery(&self) -> Option<&Arc<Delivery>> {
        match self {
            PacketHandler::Format(h) => Some(&h.delivery),
            _ => None,
        }
    }
}

/// ZRTP packets carry the magic cookie where RTP has its timestamp.
#[inline]
#[must_use]
pub fn is_zrtp_datagram(pkt: &[u8]) -> bool {
    pkt.len() >= 12 && BigEndian::read_u32(&pkt[4..8]) == ZRTP_MAGIC_COOKIE
}

// ---------------------------------------------------------------------------
// The flow
// ---------------------------------------------------------------------------

/// Fixed-size datagram slots recycled by the read loop.
struct RingBuffer {
    slots: Vec<Vec<u8>>,
    next: usize,
}

impl RingBuffer {
    fn new(total_bytes: usize, slot_size: usize) -> Self {
        let count = (total_bytes / slot_size).max(1);
        Self {
            slots: vec![vec![0u8; slot_size]; count],
            next: 0,
        }
    }

    fn next_slot(&mut self) -> &mut [u8] {
        let idx = self.next;
        self.next = (self.next + 1) % self.slots.len();
        &mut self.slots[idx]
    }
}

/// One reception thread bound to one socket. Streams install their handler
/// sub-chains; the thread walks them in installation order per datagram.
pub struct ReceptionFlow {
    endpoint: Arc<UdpEndpoint>,
    handlers: Arc<Mutex<Vec<(u64, PacketHandler)>>>,
    run: Arc<AtomicBool>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    poll_timeout_ms: Arc<AtomicU32>,
    logger: Arc<dyn LogSink>,
}

impl ReceptionFlow {
    pub fn start(endpoint: Arc<UdpEndpoint>, ring_bytes: usize, logger: Arc<dyn LogSink>) -> Arc<Self> {
        let flow = Arc::new(Self {
            endpoint,
            handlers: Arc::new(Mutex::new(Vec::new())),
            run: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
            poll_timeout_ms: Arc::new(AtomicU32::new(100)),
            logger,
        });

        let endpoint = Arc::clone(&flow.endpoint);
        let handlers = Arc::clone(&flow.handlers);
        let run = Arc::clone(&flow.run);
        let poll_ms = Arc::clone(&flow.poll_timeout_ms);
        let logger = Arc::clone(&flow.logger);

        let worker = thread::Builder::new()
            .name("rtpkit-recv".into())
            .spawn(move || {
                let mut ring = RingBuffer::new(ring_bytes, 4096);
                while run.load(Ordering::SeqCst) {
                    let timeout =
                        Duration::from_millis(u64::from(poll_ms.load(Ordering::Relaxed)).max(1));
                    let slot = ring.next_slot();
                    match endpoint.recv_with_deadline(slot, timeout) {
                        Ok(RecvStatus::Ok(n, peer)) => {
                            let mut pkt = slot[..n].to_vec();
                            Self::walk_chain(&handlers, &logger, &mut pkt, peer);
                        }
                        Ok(RecvStatus::Timeout) | Ok(RecvStatus::Interrupted) => {}
                        Err(e) => {
                            sink_warn!(logger, "[recv] socket error: {e}");
                        }
                    }
                }
            })
            .ok();

        if let Ok(mut w) = flow.worker.lock() {
            *w = worker;
        }
        flow
    }

    fn walk_chain(
        handlers: &Mutex<Vec<(u64, PacketHandler)>>,
        logger: &Arc<dyn LogSink>,
        pkt: &mut Vec<u8>,
        peer: SocketAddr,
    ) {
        let Ok(mut chain) = handlers.lock() else {
            return;
        };
        for (_, handler) in chain.iter_mut() {
            match handler.dispatch(pkt, peer) {
                HandlerOutcome::NotHandled => {}
                HandlerOutcome::Modified => {}
                HandlerOutcome::Handled => return,
                HandlerOutcome::PktReady(frame) => {
                    if let Some(delivery) = handler.delivery() {
                        delivery.deliver(frame);
                    }
                    return;
                }
                HandlerOutcome::MultiplePktsReady(frames) => {
                    if let Some(delivery) = handler.delivery() {
                        for frame in frames {
                            delivery.deliver(frame);
                        }
                    }
                    return;
                }
                HandlerOutcome::Error(e) => {
                    sink_trace!(logger, "[recv] packet dropped: {e}");
                    return;
                }
            }
        }
        sink_debug!(logger, "[recv] datagram from {peer} matched no handler");
    }

    /// Append this stream's handlers to the chain.
    pub fn install_handlers(&self, stream_id: u64, new: Vec<PacketHandler>) {
        if let Ok(mut chain) = self.handlers.lock() {
            for handler in new {
                chain.push((stream_id, handler));
            }
        }
    }

    /// Re-apply reassembly policy to a stream's format handler.
    pub fn update_reassembly(&self, stream_id: u64, config: crate::formats::h26x::ReassemblyConfig) {
        if let Ok(mut chain) = self.handlers.lock() {
            for (id, handler) in chain.iter_mut() {
                if *id == stream_id
                    && let PacketHandler::Format(f) = handler
                {
                    f.depacketizer.set_config(config.clone());
                }
            }
        }
    }

    /// Remove every handler a stream installed.
    pub fn remove_handlers(&self, stream_id: u64) {
        if let Ok(mut chain) = self.handlers.lock() {
            chain.retain(|(id, _)| *id != stream_id);
        }
    }

    pub fn set_poll_timeout(&self, timeout: Duration) {
        self.poll_timeout_ms
            .store(timeout.as_millis().max(1) as u32, Ordering::Relaxed);
    }

    /// True when no stream is attached anymore.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.handlers.lock().map(|c| c.is_empty()).unwrap_or(true)
    }

    pub fn stop(&self) {
        self.run.store(false, Ordering::SeqCst);
        if let Ok(mut worker) = self.worker.lock()
            && let Some(handle) = worker.take()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for ReceptionFlow {
    fn drop(&mut self) {
        self.stop();
    }
}
