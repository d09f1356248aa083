//! The periodic RTCP machine: participant bookkeeping, report assembly and
//! the bandwidth-scaled transmission timer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::clock;
use crate::error::RtpError;
use crate::log::LogSink;
use crate::net::socket::UdpEndpoint;
use crate::rtp::RtpContext;
use crate::srtp::SrtcpContext;
use crate::{sink_debug, sink_warn};

use super::app::App;
use super::bye::Bye;
use super::compound::RtcpPacket;
use super::receiver_report::ReceiverReport;
use super::report::SenderInfo;
use super::sdes::Sdes;
use super::sender_report::SenderReport;
use super::stats::{RxStats, SenderStats};

/// Absolute floor for non-initial reports (RFC 3550 Appendix A.7).
const ABS_MIN_INTERVAL: Duration = Duration::from_millis(1250);
/// RTCP share of the session bandwidth.
const RTCP_BW_FRACTION: f64 = 0.05;

/// Hooks the application may install to observe control traffic.
#[derive(Default)]
pub struct RtcpHooks {
    pub sender: Option<Box<dyn Fn(&SenderReport) + Send + Sync>>,
    pub receiver: Option<Box<dyn Fn(&ReceiverReport) + Send + Sync>>,
    pub sdes: Option<Box<dyn Fn(&Sdes) + Send + Sync>>,
    pub app: Option<Box<dyn Fn(&App) + Send + Sync>>,
}

/// One remote source this stream knows about.
pub struct Participant {
    pub ssrc: u32,
    pub addr: Option<SocketAddr>,
    /// Packets still required before the source counts as validated.
    pub probation: u8,
    /// True once the source has sent media or an SR (sender role).
    pub sender: bool,
    pub rx: RxStats,
    pub last_sr: Option<SenderReport>,
    pub last_rr: Option<ReceiverReport>,
    pub last_sdes: Option<Sdes>,
    pub last_app: Option<App>,
}

impl Participant {
    fn new(ssrc: u32, addr: Option<SocketAddr>) -> Self {
        Self {
            ssrc,
            addr,
            probation: 2,
            sender: false,
            rx: RxStats::default(),
            last_sr: None,
            last_rr: None,
            last_sdes: None,
            last_app: None,
        }
    }
}

struct EngineInner {
    run: AtomicBool,
    endpoint: Arc<UdpEndpoint>,
    dest: SocketAddr,
    // Strong reference to the small RTP value state; the stream itself is
    // never referenced from here, which breaks the session→stream→rtcp
    // ownership cycle.
    rtp_ctx: Arc<Mutex<RtpContext>>,
    sender_stats: Arc<SenderStats>,
    participants: Mutex<HashMap<u32, Participant>>,
    hooks: Mutex<RtcpHooks>,
    cname: Mutex<String>,
    bandwidth_kbps: AtomicU32,
    min_interval_ms: AtomicU32,
    avg_rtcp_size: Mutex<f64>,
    pending_apps: Mutex<Vec<App>>,
    reported_pkts: AtomicU32,
    srtcp_tx: Mutex<Option<SrtcpContext>>,
    srtcp_rx: Mutex<Option<SrtcpContext>>,
    malformed: AtomicU32,
    initial: AtomicBool,
    logger: Arc<dyn LogSink>,
}

/// Per-stream RTCP engine. Owns one timer thread; report generation is
/// serialized on it.
pub struct RtcpEngine {
    inner: Arc<EngineInner>,
    timer: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RtcpEngine {
    pub fn new(
        endpoint: Arc<UdpEndpoint>,
        dest: SocketAddr,
        rtp_ctx: Arc<Mutex<RtpContext>>,
        sender_stats: Arc<SenderStats>,
        bandwidth_kbps: u32,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        let cname = {
            let ssrc = rtp_ctx.lock().map(|c| c.ssrc()).unwrap_or(0);
            format!("{ssrc:08x}@rtpkit")
        };
        Self {
            inner: Arc::new(EngineInner {
                run: AtomicBool::new(false),
                endpoint,
                dest,
                rtp_ctx,
                sender_stats,
                participants: Mutex::new(HashMap::new()),
                hooks: Mutex::new(RtcpHooks::default()),
                cname: Mutex::new(cname),
                bandwidth_kbps: AtomicU32::new(bandwidth_kbps),
                min_interval_ms: AtomicU32::new(5000),
                avg_rtcp_size: Mutex::new(128.0),
                pending_apps: Mutex::new(Vec::new()),
                reported_pkts: AtomicU32::new(0),
                srtcp_tx: Mutex::new(None),
                srtcp_rx: Mutex::new(None),
                malformed: AtomicU32::new(0),
                initial: AtomicBool::new(true),
                logger,
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn set_bandwidth_kbps(&self, kbps: u32) {
        self.inner.bandwidth_kbps.store(kbps, Ordering::Relaxed);
    }

    pub fn set_min_interval(&self, interval: Duration) {
        self.inner
            .min_interval_ms
            .store(interval.as_millis() as u32, Ordering::Relaxed);
    }

    pub fn set_cname(&self, cname: impl Into<String>) {
        if let Ok(mut c) = self.inner.cname.lock() {
            *c = cname.into();
        }
    }

    /// Switch the engine to SRTCP once key material exists.
    pub fn set_srtcp(&self, tx: SrtcpContext, rx: SrtcpContext) {
        if let Ok(mut t) = self.inner.srtcp_tx.lock() {
            *t = Some(tx);
        }
        if let Ok(mut r) = self.inner.srtcp_rx.lock() {
            *r = Some(rx);
        }
    }

    pub fn hooks(&self) -> &Mutex<RtcpHooks> {
        &self.inner.hooks
    }

    /// Queue an APP packet into the next compound.
    pub fn send_app_packet(&self, name: [u8; 4], subtype: u8, data: Vec<u8>) {
        let ssrc = self.local_ssrc();
        if let Ok(mut apps) = self.inner.pending_apps.lock() {
            apps.push(App::new(ssrc, name, subtype, data));
        }
    }

    /// Count of malformed / rejected control packets.
    #[must_use]
    pub fn malformed_count(&self) -> u32 {
        self.inner.malformed.load(Ordering::Relaxed)
    }

    fn local_ssrc(&self) -> u32 {
        self.inner.rtp_ctx.lock().map(|c| c.ssrc()).unwrap_or(0)
    }

    /// Start the transmission timer thread.
    pub fn start(&self) {
        if self.inner.run.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("rtpkit-rtcp".into())
            .spawn(move || {
                let mut next_emit = Instant::now() + compute_interval(&inner);
                while inner.run.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(50));
                    if Instant::now() < next_emit {
                        continue;
                    }
                    emit_compound(&inner);
                    inner.initial.store(false, Ordering::Relaxed);
                    next_emit = Instant::now() + compute_interval(&inner);
                }
            })
            .ok();
        if let Ok(mut timer) = self.timer.lock() {
            *timer = handle;
        }
    }

    /// Stop the timer, emitting a final BYE for the local source.
    pub fn stop(&self) {
        if !self.inner.run.swap(false, Ordering::SeqCst) {
            return;
        }
        self.send_bye_for(self.local_ssrc());
        if let Ok(mut timer) = self.timer.lock()
            && let Some(handle) = timer.take()
        {
            let _ = handle.join();
        }
    }

    /// Emit a BYE for `ssrc` immediately (teardown or SSRC collision).
    pub fn send_bye_for(&self, ssrc: u32) {
        let mut wire = Vec::new();
        let bye = Bye::single(ssrc, Some("teardown".into()));
        if bye.encode_into(&mut wire).is_ok() {
            send_wire(&self.inner, wire);
        }
    }

    /// Account one received media packet and learn the participant.
    pub fn on_media_received(
        &self,
        ssrc: u32,
        seq: u16,
        rtp_ts: u32,
        payload_bytes: usize,
        addr: Option<SocketAddr>,
    ) {
        let clock_rate = self
            .inner
            .rtp_ctx
            .lock()
            .map(|c| c.clock_rate())
            .unwrap_or(90_000);
        let arrival_units =
            ((clock::now_millis() as u64).wrapping_mul(u64::from(clock_rate)) / 1000) as u32;

        if let Ok(mut parts) = self.inner.participants.lock() {
            let p = parts
                .entry(ssrc)
                .or_insert_with(|| Participant::new(ssrc, addr));
            if p.probation > 0 {
                p.probation -= 1;
            }
            if p.addr.is_none() {
                p.addr = addr;
            }
            p.sender = true;
            p.rx.on_rtp(seq, rtp_ts, arrival_units, payload_bytes);
        }
    }

    /// Record a frame the depacketizer had to drop (GC, dependency policy).
    pub fn on_frame_dropped(&self, ssrc: u32) {
        if let Ok(mut parts) = self.inner.participants.lock()
            && let Some(p) = parts.get_mut(&ssrc)
        {
            p.rx.on_frame_dropped();
        }
    }

    /// Process one received RTCP (or SRTCP) datagram.
    pub fn handle_wire(&self, mut data: Vec<u8>, addr: Option<SocketAddr>) -> Result<(), RtpError> {
        if let Ok(mut rx) = self.inner.srtcp_rx.lock()
            && let Some(ctx) = rx.as_mut()
            && let Err(e) = ctx.unprotect(&mut data)
        {
            self.inner.malformed.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }

        let packets = match RtcpPacket::decode_compound(&data) {
            Ok(p) => p,
            Err(e) => {
                self.inner.malformed.fetch_add(1, Ordering::Relaxed);
                sink_warn!(self.inner.logger, "[rtcp] malformed compound: {e}");
                return Err(e.into());
            }
        };

        self.update_avg_size(data.len());

        for pkt in packets {
            self.absorb(pkt, addr);
        }
        Ok(())
    }

    fn absorb(&self, pkt: RtcpPacket, addr: Option<SocketAddr>) {
        let hooks = self.inner.hooks.lock();
        match pkt {
            RtcpPacket::Sr(sr) => {
                if let Ok(mut parts) = self.inner.participants.lock() {
                    let p = parts
                        .entry(sr.ssrc)
                        .or_insert_with(|| Participant::new(sr.ssrc, addr));
                    p.sender = true;
                    p.rx.on_sr_received(sr.info.ntp_msw, sr.info.ntp_lsw);
                    p.last_sr = Some(sr.clone());
                }
                if let Ok(h) = &hooks
                    && let Some(f) = &h.sender
                {
                    f(&sr);
                }
            }
            RtcpPacket::Rr(rr) => {
                if let Ok(mut parts) = self.inner.participants.lock() {
                    let p = parts
                        .entry(rr.ssrc)
                        .or_insert_with(|| Participant::new(rr.ssrc, addr));
                    p.last_rr = Some(rr.clone());
                }
                if let Ok(h) = &hooks
                    && let Some(f) = &h.receiver
                {
                    f(&rr);
                }
            }
            RtcpPacket::Sdes(sdes) => {
                if let Ok(mut parts) = self.inner.participants.lock() {
                    for chunk in &sdes.chunks {
                        let p = parts
                            .entry(chunk.ssrc)
                            .or_insert_with(|| Participant::new(chunk.ssrc, addr));
                        p.last_sdes = Some(sdes.clone());
                    }
                }
                if let Ok(h) = &hooks
                    && let Some(f) = &h.sdes
                {
                    f(&sdes);
                }
            }
            RtcpPacket::Bye(bye) => {
                if let Ok(mut parts) = self.inner.participants.lock() {
                    for ssrc in &bye.sources {
                        parts.remove(ssrc);
                    }
                }
                sink_debug!(self.inner.logger, "[rtcp] BYE for {:?}", bye.sources);
            }
            RtcpPacket::App(app) => {
                if let Ok(mut parts) = self.inner.participants.lock() {
                    let p = parts
                        .entry(app.ssrc)
                        .or_insert_with(|| Participant::new(app.ssrc, addr));
                    p.last_app = Some(app.clone());
                }
                if let Ok(h) = &hooks
                    && let Some(f) = &h.app
                {
                    f(&app);
                }
            }
        }
    }

    /// Read access to the participant table.
    pub fn with_participant<R>(&self, ssrc: u32, f: impl FnOnce(&Participant) -> R) -> Option<R> {
        self.inner
            .participants
            .lock()
            .ok()
            .and_then(|parts| parts.get(&ssrc).map(f))
    }

    fn update_avg_size(&self, size: usize) {
        if let Ok(mut avg) = self.inner.avg_rtcp_size.lock() {
            // RFC 3550 §6.3.3 smoothing.
            *avg = *avg * (15.0 / 16.0) + (size as f64) / 16.0;
        }
    }
}

impl Drop for RtcpEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The transmission interval: `max(min, avg_size * members / (0.05 * B))`
/// times a uniform random factor in [0.5, 1.5]; halved for the very first
/// report, floored at 1.25 s afterwards.
fn compute_interval(inner: &EngineInner) -> Duration {
    let members = inner
        .participants
        .lock()
        .map(|p| p.len() + 1)
        .unwrap_or(1) as f64;
    let avg = inner.avg_rtcp_size.lock().map(|a| *a).unwrap_or(128.0);
    let bw_bytes_per_sec =
        f64::from(inner.bandwidth_kbps.load(Ordering::Relaxed).max(1)) * 1000.0 / 8.0;
    let rtcp_bw = bw_bytes_per_sec * RTCP_BW_FRACTION;

    let min = Duration::from_millis(u64::from(inner.min_interval_ms.load(Ordering::Relaxed)));
    let mut t = Duration::from_secs_f64((avg * members / rtcp_bw).max(0.0)).max(min);

    if inner.initial.load(Ordering::Relaxed) {
        t /= 2;
    }

    let factor = rand::thread_rng().gen_range(0.5..1.5);
    let mut t = t.mul_f64(factor);
    if !inner.initial.load(Ordering::Relaxed) {
        t = t.max(ABS_MIN_INTERVAL);
    }
    t
}

fn emit_compound(inner: &Arc<EngineInner>) {
    let local_ssrc = inner.rtp_ctx.lock().map(|c| c.ssrc()).unwrap_or(0);
    let (sent_pkts, sent_bytes) = inner.sender_stats.snapshot();
    let sent_since_last = sent_pkts != inner.reported_pkts.swap(sent_pkts, Ordering::Relaxed);

    // Report blocks about every validated remote source.
    let mut blocks = Vec::new();
    if let Ok(mut parts) = inner.participants.lock() {
        for p in parts.values_mut() {
            if p.rx.received() > 0 {
                blocks.push(p.rx.build_report_block(p.ssrc));
            }
            if blocks.len() == 31 {
                break;
            }
        }
    }

    let mut packets = Vec::new();
    if sent_since_last {
        let (ntp_msw, ntp_lsw) = clock::ntp_now();
        let rtp_ts = inner
            .rtp_ctx
            .lock()
            .map(|c| c.current_timestamp())
            .unwrap_or(0);
        packets.push(RtcpPacket::Sr(SenderReport::new(
            local_ssrc,
            SenderInfo::new(ntp_msw, ntp_lsw, rtp_ts, sent_pkts, sent_bytes),
            blocks,
        )));
    } else {
        packets.push(RtcpPacket::Rr(ReceiverReport::new(local_ssrc, blocks)));
    }

    let cname = inner
        .cname
        .lock()
        .map(|c| c.clone())
        .unwrap_or_default();
    packets.push(RtcpPacket::Sdes(Sdes::cname(local_ssrc, cname)));

    if let Ok(mut apps) = inner.pending_apps.lock() {
        for app in apps.drain(..) {
            packets.push(RtcpPacket::App(app));
        }
    }

    match RtcpPacket::encode_compound(&packets) {
        Ok(wire) => {
            if let Ok(mut avg) = inner.avg_rtcp_size.lock() {
                *avg = *avg * (15.0 / 16.0) + (wire.len() as f64) / 16.0;
            }
            send_wire(inner, wire);
        }
        Err(e) => sink_warn!(inner.logger, "[rtcp] compound encode failed: {e}"),
    }
}

fn send_wire(inner: &EngineInner, mut wire: Vec<u8>) {
    if let Ok(mut tx) = inner.srtcp_tx.lock()
        && let Some(ctx) = tx.as_mut()
        && let Err(e) = ctx.protect(&mut wire)
    {
        sink_warn!(inner.logger, "[srtcp] protect failed: {e}");
        return;
    }
    if let Err(e) = inner.endpoint.send_one_to(wire, inner.dest) {
        sink_warn!(inner.logger, "[rtcp] send failed: {e}");
    }
}
