//! One RTP flow: sockets, handler chain, push/pull paths, RTCP, SRTP and
//! ZRTP wiring, lifetime management.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::RtpError;
use crate::formats::h26x::ReassemblyConfig;
use crate::formats::{Depacketizer, MediaFormat, PacketizeFlags, packetize};
use crate::frame::MediaFrame;
use crate::log::LogSink;
use crate::net::holepuncher::Holepuncher;
use crate::net::socket::UdpEndpoint;
use crate::reception::{
    Delivery, FormatHandler, NotifyHook, PacketHandler, ReceiveHook, ReceptionFlow,
    RtcpDemuxHandler, RtpValidateHandler, SrtpHandler, ZrtpHandler,
};
use crate::rtcp::{App, ReceiverReport, RtcpEngine, Sdes, SenderReport, SenderStats};
use crate::rtp::frame_queue::{FrameQueue, SendPolicy};
use crate::rtp::RtpContext;
use crate::srtp::{SrtcpContext, SrtpContext, SrtpStreamConfig};
use crate::zrtp::{ZrtpKeys, ZrtpMode, ZrtpSession};
use crate::{sink_debug, sink_info};

use super::config::{ConfigKey, RceFlags, RtpFlags, StreamConfig};
use super::ContextInner;

/// Default pull-queue depth, frames.
const PULL_QUEUE_CAPACITY: usize = 1024;
/// Holepuncher cadence.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

pub struct MediaStream {
    id: u64,
    format: MediaFormat,
    rce: RceFlags,
    remote_rtp: SocketAddr,

    inner: Arc<ContextInner>,
    endpoint: Arc<UdpEndpoint>,
    flow: Arc<ReceptionFlow>,
    rtcp_endpoint: Option<Arc<UdpEndpoint>>,
    rtcp_flow: Option<Arc<ReceptionFlow>>,

    rtp_ctx: Arc<Mutex<RtpContext>>,
    sender_stats: Arc<SenderStats>,
    frame_queue: Mutex<FrameQueue>,
    config: Mutex<StreamConfig>,

    delivery: Arc<Delivery>,
    remote_ssrc: Arc<Mutex<Option<u32>>>,

    srtp_tx: Arc<Mutex<Option<SrtpContext>>>,
    srtp_rx: Arc<Mutex<Option<SrtpContext>>>,
    srtp_send_active: Arc<AtomicBool>,

    rtcp: Option<Arc<RtcpEngine>>,
    holepuncher: Mutex<Option<Holepuncher>>,

    zrtp_rx_slot: Mutex<Option<Receiver<Vec<u8>>>>,
    session_zrtp_key: Arc<Mutex<Option<[u8; 32]>>>,

    logger: Arc<dyn LogSink>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("rce", &self.rce)
            .field("remote_rtp", &self.remote_rtp)
            .finish()
    }
}

impl MediaStream {
    /// Wire up one stream. Bind failures and failed automatic key agreement
    /// abort creation.
    pub(super) fn create(
        inner: Arc<ContextInner>,
        session_zrtp_key: Arc<Mutex<Option<[u8; 32]>>>,
        local_rtp: SocketAddr,
        remote_rtp: SocketAddr,
        format: MediaFormat,
        rce: RceFlags,
    ) -> Result<Arc<Self>, RtpError> {
        let id = inner.next_stream_id();
        let logger = Arc::clone(&inner.logger);
        let config = StreamConfig::default();

        let endpoint = inner.factory.get_or_bind(local_rtp)?;
        endpoint.connect_out(remote_rtp);
        // Default 4 MB kernel buffers; the OS may clamp, which is fine.
        let _ = endpoint.set_buf(config.udp_rcv_buf_size, false);
        let _ = endpoint.set_buf(config.udp_snd_buf_size, true);

        let rtp_ctx = Arc::new(Mutex::new(RtpContext::new(
            format.default_payload_type(),
            format.default_clock_rate(),
        )));
        let sender_stats = Arc::new(SenderStats::default());

        let flow = inner.get_flow(&endpoint, config.ring_buffer_size);

        // RTCP: multiplexed on the RTP socket or on port + 1.
        let (rtcp, rtcp_endpoint, rtcp_flow) = if rce.contains(RceFlags::RTCP) {
            let bandwidth = if config.session_bandwidth_kbps > 0 {
                config.session_bandwidth_kbps
            } else {
                default_bandwidth_kbps(format)
            };
            if rce.contains(RceFlags::RTCP_MUX) {
                let engine = Arc::new(RtcpEngine::new(
                    Arc::clone(&endpoint),
                    remote_rtp,
                    Arc::clone(&rtp_ctx),
                    Arc::clone(&sender_stats),
                    bandwidth,
                    Arc::clone(&logger),
                ));
                (Some(engine), None, None)
            } else {
                let local = SocketAddr::new(local_rtp.ip(), local_rtp.port() + 1);
                let remote = SocketAddr::new(remote_rtp.ip(), remote_rtp.port() + 1);
                let ep = inner.factory.get_or_bind(local)?;
                ep.connect_out(remote);
                let engine = Arc::new(RtcpEngine::new(
                    Arc::clone(&ep),
                    remote,
                    Arc::clone(&rtp_ctx),
                    Arc::clone(&sender_stats),
                    bandwidth,
                    Arc::clone(&logger),
                ));
                let rflow = inner.get_flow(&ep, config.ring_buffer_size);
                rflow.install_handlers(
                    id,
                    vec![PacketHandler::RtcpDemux(RtcpDemuxHandler {
                        engine: Arc::clone(&engine),
                    })],
                );
                (Some(engine), Some(ep), Some(rflow))
            }
        } else {
            (None, None, None)
        };

        let delivery = Arc::new(Delivery::new(PULL_QUEUE_CAPACITY));
        let remote_ssrc = Arc::new(Mutex::new(None));
        let srtp_tx: Arc<Mutex<Option<SrtpContext>>> = Arc::new(Mutex::new(None));
        let srtp_rx: Arc<Mutex<Option<SrtpContext>>> = Arc::new(Mutex::new(None));
        let srtp_send_active = Arc::new(AtomicBool::new(true));

        // SRTP pre-send hook: encrypt our own RTP right before the kernel
        // call, leaving RTCP/ZRTP/keepalive traffic alone.
        if rce.contains(RceFlags::SRTP) {
            let tx_ctx = Arc::clone(&srtp_tx);
            let ctx_for_ssrc = Arc::clone(&rtp_ctx);
            let active = Arc::clone(&srtp_send_active);
            endpoint.install_pre_send_handler(Box::new(move |pkt: &mut Vec<u8>| {
                if !active.load(Ordering::Relaxed) {
                    return Ok(());
                }
                if pkt.len() < 12 || (pkt[0] >> 6) != 2 || crate::rtcp::compound::looks_like_rtcp(pkt) {
                    return Ok(());
                }
                let pkt_ssrc = u32::from_be_bytes([pkt[8], pkt[9], pkt[10], pkt[11]]);
                let ours = ctx_for_ssrc.lock().map(|c| c.ssrc()).unwrap_or(0);
                if pkt_ssrc != ours {
                    return Ok(());
                }
                let mut guard = tx_ctx.lock().map_err(|_| RtpError::Generic)?;
                match guard.as_mut() {
                    Some(ctx) => ctx.protect(pkt).map_err(RtpError::from),
                    None => Ok(()),
                }
            }));
        }

        // ZRTP channel wired into the chain head when key agreement is on.
        let uses_zrtp = rce.contains(RceFlags::SRTP_KMNGMNT_ZRTP)
            || rce.contains(RceFlags::ZRTP_DIFFIE_HELLMAN_MODE)
            || rce.contains(RceFlags::ZRTP_MULTISTREAM_MODE);
        let mut handlers = Vec::new();
        let zrtp_rx_slot = if uses_zrtp {
            let (tx, rx) = channel();
            handlers.push(PacketHandler::Zrtp(ZrtpHandler { tx }));
            Some(rx)
        } else {
            None
        };

        if rce.contains(RceFlags::SRTP) {
            handlers.push(PacketHandler::Srtp(SrtpHandler {
                ctx: Arc::clone(&srtp_rx),
                remote_ssrc: Arc::clone(&remote_ssrc),
            }));
        }
        if let (Some(engine), true) = (&rtcp, rce.contains(RceFlags::RTCP_MUX)) {
            handlers.push(PacketHandler::RtcpDemux(RtcpDemuxHandler {
                engine: Arc::clone(engine),
            }));
        }
        handlers.push(PacketHandler::RtpValidate(RtpValidateHandler {
            remote_ssrc: Arc::clone(&remote_ssrc),
            payload_type: format.default_payload_type(),
            local_ctx: Arc::clone(&rtp_ctx),
            rtcp: rtcp.clone(),
        }));
        handlers.push(PacketHandler::Format(FormatHandler {
            depacketizer: Depacketizer::new(format, reassembly_config(&config, rce)),
            delivery: Arc::clone(&delivery),
            rtcp: rtcp.clone(),
            remote_ssrc: Arc::clone(&remote_ssrc),
        }));
        flow.install_handlers(id, handlers);

        let frame_queue = FrameQueue::new(
            Arc::clone(&endpoint),
            Arc::clone(&sender_stats),
            send_policy(&config, rce),
            Arc::clone(&logger),
        );

        let stream = Arc::new(Self {
            id,
            format,
            rce,
            remote_rtp,
            inner,
            endpoint,
            flow,
            rtcp_endpoint,
            rtcp_flow,
            rtp_ctx,
            sender_stats,
            frame_queue: Mutex::new(frame_queue),
            config: Mutex::new(config),
            delivery,
            remote_ssrc,
            srtp_tx,
            srtp_rx,
            srtp_send_active,
            rtcp,
            holepuncher: Mutex::new(None),
            zrtp_rx_slot: Mutex::new(zrtp_rx_slot),
            session_zrtp_key,
            logger,
            destroyed: AtomicBool::new(false),
        });

        if rce.contains(RceFlags::HOLEPUNCH_KEEPALIVE) && rce.is_unidirectional() {
            let hp = Holepuncher::start(
                Arc::clone(&stream.endpoint),
                KEEPALIVE_INTERVAL,
                Arc::clone(&stream.logger),
            );
            if let Ok(mut slot) = stream.holepuncher.lock() {
                *slot = Some(hp);
            }
        }

        // Automatic key agreement happens during creation so the stream
        // comes up secure or not at all.
        if rce.contains(RceFlags::SRTP) && rce.contains(RceFlags::SRTP_KMNGMNT_ZRTP) {
            stream.start_zrtp()?;
        }

        if let Some(engine) = &stream.rtcp {
            engine.start();
        }

        sink_info!(
            stream.logger,
            "[stream {}] created: {:?} -> {}",
            stream.id,
            stream.format,
            stream.remote_rtp
        );
        Ok(stream)
    }

    #[must_use]
    pub fn format(&self) -> MediaFormat {
        self.format
    }

    #[must_use]
    pub fn local_ssrc(&self) -> u32 {
        self.rtp_ctx.lock().map(|c| c.ssrc()).unwrap_or(0)
    }

    #[must_use]
    pub fn remote_ssrc(&self) -> Option<u32> {
        self.remote_ssrc.lock().ok().and_then(|s| *s)
    }

    /// (packets, payload bytes) sent on this stream so far.
    #[must_use]
    pub fn sent_stats(&self) -> (u32, u32) {
        self.sender_stats.snapshot()
    }

    // -- configuration ------------------------------------------------------

    /// Apply one configuration key. Most keys should be set before media
    /// flows; socket and timing keys apply immediately.
    pub fn configure(&self, key: ConfigKey, value: u64) -> Result<(), RtpError> {
        match key {
            ConfigKey::DynPayloadType => {
                if value > 127 {
                    return Err(RtpError::InvalidValue);
                }
                let mut ctx = self.rtp_ctx.lock().map_err(|_| RtpError::Generic)?;
                ctx.set_payload_type(value as u8);
                Ok(())
            }
            ConfigKey::ClockRate => {
                if value == 0 || value > u64::from(u32::MAX) {
                    return Err(RtpError::InvalidValue);
                }
                let mut ctx = self.rtp_ctx.lock().map_err(|_| RtpError::Generic)?;
                ctx.set_clock_rate(value as u32);
                Ok(())
            }
            ConfigKey::Ssrc => {
                if value > u64::from(u32::MAX) {
                    return Err(RtpError::InvalidValue);
                }
                let mut ctx = self.rtp_ctx.lock().map_err(|_| RtpError::Generic)?;
                ctx.set_ssrc(value as u32);
                Ok(())
            }
            ConfigKey::RemoteSsrc => {
                if value > u64::from(u32::MAX) {
                    return Err(RtpError::InvalidValue);
                }
                let mut remote = self.remote_ssrc.lock().map_err(|_| RtpError::Generic)?;
                *remote = Some(value as u32);
                Ok(())
            }
            ConfigKey::UdpRcvBufSize => {
                self.with_config(key, value)?;
                self.endpoint.set_buf(value as usize, false)
            }
            ConfigKey::UdpSndBufSize => {
                self.with_config(key, value)?;
                self.endpoint.set_buf(value as usize, true)
            }
            ConfigKey::PollTimeoutMs => {
                self.with_config(key, value)?;
                self.flow.set_poll_timeout(Duration::from_millis(value));
                Ok(())
            }
            ConfigKey::PktMaxDelay => {
                self.with_config(key, value)?;
                let cfg = self.config.lock().map_err(|_| RtpError::Generic)?;
                self.flow
                    .update_reassembly(self.id, reassembly_config(&cfg, self.rce));
                Ok(())
            }
            ConfigKey::SessionBandwidthKbps => {
                self.with_config(key, value)?;
                if let Some(engine) = &self.rtcp {
                    engine.set_bandwidth_kbps(value as u32);
                }
                Ok(())
            }
            ConfigKey::FpsNumerator | ConfigKey::FpsDenominator => {
                self.with_config(key, value)?;
                let cfg = self.config.lock().map_err(|_| RtpError::Generic)?;
                let policy = send_policy(&cfg, self.rce);
                drop(cfg);
                let mut queue = self.frame_queue.lock().map_err(|_| RtpError::Generic)?;
                queue.set_policy(policy);
                Ok(())
            }
            _ => self.with_config(key, value),
        }
    }

    fn with_config(&self, key: ConfigKey, value: u64) -> Result<(), RtpError> {
        let mut cfg = self.config.lock().map_err(|_| RtpError::Generic)?;
        cfg.set(key, value)
    }

    // -- send path ----------------------------------------------------------

    /// Push one frame with an implicit (wallclock-derived) timestamp.
    pub fn push_frame(&self, data: &[u8], rtp_flags: RtpFlags) -> Result<(), RtpError> {
        self.push_frame_ts(data, None, rtp_flags)
    }

    /// Push one frame, honoring an application-provided RTP timestamp.
    pub fn push_frame_ts(
        &self,
        data: &[u8],
        rtp_ts: Option<u32>,
        rtp_flags: RtpFlags,
    ) -> Result<(), RtpError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(RtpError::NotInitialized);
        }
        if self.rce.contains(RceFlags::RECEIVE_ONLY) {
            return Err(RtpError::NotSupported);
        }
        if data.is_empty() {
            return Err(RtpError::InvalidValue);
        }

        let max_payload = {
            let cfg = self.config.lock().map_err(|_| RtpError::Generic)?;
            cfg.max_payload()
        };
        let flags = PacketizeFlags {
            allow_generic_fragmentation: self.rce.contains(RceFlags::FRAGMENT_GENERIC),
            no_start_code_lookup: rtp_flags.contains(RtpFlags::NO_H26X_SCL),
        };
        let chunks = packetize(self.format, data, max_payload, flags)?;

        let mut queue = self.frame_queue.lock().map_err(|_| RtpError::Generic)?;
        let mut ctx = self.rtp_ctx.lock().map_err(|_| RtpError::Generic)?;
        let ts = ctx.frame_timestamp(rtp_ts);
        queue.push_frame(&mut ctx, data, &chunks, ts)?;
        drop(ctx);
        drop(queue);

        if let Ok(hp) = self.holepuncher.lock()
            && let Some(hp) = hp.as_ref()
        {
            hp.media_sent();
        }
        Ok(())
    }

    // -- receive path -------------------------------------------------------

    /// Block up to `timeout` (forever when `None`) for the next frame.
    #[must_use]
    pub fn pull_frame(&self, timeout: Option<Duration>) -> Option<MediaFrame> {
        self.delivery.queue.pull(timeout)
    }

    /// Deliver frames synchronously to `hook` instead of the pull queue.
    pub fn install_receive_hook(&self, hook: ReceiveHook) {
        if let Ok(mut slot) = self.delivery.hook.lock() {
            *slot = Some(hook);
        }
    }

    /// Observe frames the depacketizer had to discard (late or broken).
    pub fn install_notify_hook(&self, hook: NotifyHook) {
        if let Ok(mut slot) = self.delivery.notify.lock() {
            *slot = Some(hook);
        }
    }

    /// Frames dropped because the pull queue overflowed.
    #[must_use]
    pub fn overflow_drops(&self) -> u32 {
        self.delivery.queue.overflow_drops()
    }

    // -- RTCP ---------------------------------------------------------------

    fn engine(&self) -> Result<&Arc<RtcpEngine>, RtpError> {
        self.rtcp.as_ref().ok_or(RtpError::NotInitialized)
    }

    pub fn install_sender_hook(
        &self,
        hook: impl Fn(&SenderReport) + Send + Sync + 'static,
    ) -> Result<(), RtpError> {
        let engine = self.engine()?;
        let mut hooks = engine.hooks().lock().map_err(|_| RtpError::Generic)?;
        hooks.sender = Some(Box::new(hook));
        Ok(())
    }

    pub fn install_receiver_hook(
        &self,
        hook: impl Fn(&ReceiverReport) + Send + Sync + 'static,
    ) -> Result<(), RtpError> {
        let engine = self.engine()?;
        let mut hooks = engine.hooks().lock().map_err(|_| RtpError::Generic)?;
        hooks.receiver = Some(Box::new(hook));
        Ok(())
    }

    pub fn install_sdes_hook(
        &self,
        hook: impl Fn(&Sdes) + Send + Sync + 'static,
    ) -> Result<(), RtpError> {
        let engine = self.engine()?;
        let mut hooks = engine.hooks().lock().map_err(|_| RtpError::Generic)?;
        hooks.sdes = Some(Box::new(hook));
        Ok(())
    }

    pub fn install_app_hook(
        &self,
        hook: impl Fn(&App) + Send + Sync + 'static,
    ) -> Result<(), RtpError> {
        let engine = self.engine()?;
        let mut hooks = engine.hooks().lock().map_err(|_| RtpError::Generic)?;
        hooks.app = Some(Box::new(hook));
        Ok(())
    }

    /// Queue an APP packet into the next RTCP compound.
    pub fn send_app_packet(&self, name: [u8; 4], subtype: u8, data: Vec<u8>) -> Result<(), RtpError> {
        self.engine()?.send_app_packet(name, subtype, data);
        Ok(())
    }

    /// Install a hook over every outgoing datagram of this stream's socket,
    /// after any SRTP protection. Used for instrumentation and fault
    /// injection in tests.
    pub fn install_pre_send_handler(&self, f: crate::net::socket::PreSendHandler) {
        self.endpoint.install_pre_send_handler(f);
    }

    // -- keying -------------------------------------------------------------

    /// Install a user-managed master key + salt (both directions).
    pub fn add_srtp_ctx(&self, key: &[u8], salt: &[u8]) -> Result<(), RtpError> {
        if !self.rce.contains(RceFlags::SRTP) || !self.rce.contains(RceFlags::SRTP_KMNGMNT_USER) {
            return Err(RtpError::NotSupported);
        }
        if key.len() != self.rce.srtp_key_len() || salt.len() != 14 {
            return Err(RtpError::InvalidValue);
        }
        self.install_srtp_keys(key, salt, key, salt)
    }

    /// Run ZRTP on the calling thread; blocks until the exchange terminates
    /// or the retry budget elapses.
    pub fn start_zrtp(&self) -> Result<(), RtpError> {
        let rx = {
            let mut slot = self.zrtp_rx_slot.lock().map_err(|_| RtpError::Generic)?;
            slot.take().ok_or(RtpError::AlreadyInitialized)?
        };

        let mode = if self.rce.contains(RceFlags::ZRTP_MULTISTREAM_MODE) {
            let key = self
                .session_zrtp_key
                .lock()
                .map_err(|_| RtpError::Generic)?
                .ok_or(RtpError::NotInitialized)?;
            ZrtpMode::Multistream { session_key: key }
        } else {
            ZrtpMode::DiffieHellman
        };

        let session = ZrtpSession::new(
            Arc::clone(&self.endpoint),
            self.remote_rtp,
            rx,
            self.local_ssrc(),
            self.rce.srtp_key_len(),
            Arc::clone(&self.logger),
        );
        let keys: ZrtpKeys = session.negotiate(mode).map_err(RtpError::from)?;

        if let Ok(mut slot) = self.session_zrtp_key.lock() {
            slot.get_or_insert(keys.session_key);
        }
        self.install_srtp_keys(&keys.tx_key, &keys.tx_salt, &keys.rx_key, &keys.rx_salt)
    }

    fn install_srtp_keys(
        &self,
        tx_key: &[u8],
        tx_salt: &[u8],
        rx_key: &[u8],
        rx_salt: &[u8],
    ) -> Result<(), RtpError> {
        // The end-to-end contract is that tampering drops the packet, so the
        // tag is always carried; the null cipher only disables secrecy.
        let cfg = SrtpStreamConfig {
            encrypt: !self.rce.contains(RceFlags::SRTP_NULL_CIPHER),
            authenticate: true,
            replay_protection: self.rce.contains(RceFlags::SRTP_REPLAY_PROTECTION),
        };

        let tx = SrtpContext::new(Arc::clone(&self.logger), tx_key, tx_salt, cfg)?;
        let rx = SrtpContext::new(Arc::clone(&self.logger), rx_key, rx_salt, cfg)?;
        *self.srtp_tx.lock().map_err(|_| RtpError::Generic)? = Some(tx);
        *self.srtp_rx.lock().map_err(|_| RtpError::Generic)? = Some(rx);

        if let Some(engine) = &self.rtcp {
            let srtcp_tx = SrtcpContext::new(
                Arc::clone(&self.logger),
                tx_key,
                tx_salt,
                cfg.encrypt,
                cfg.replay_protection,
            )?;
            let srtcp_rx = SrtcpContext::new(
                Arc::clone(&self.logger),
                rx_key,
                rx_salt,
                cfg.encrypt,
                cfg.replay_protection,
            )?;
            engine.set_srtcp(srtcp_tx, srtcp_rx);
        }

        sink_debug!(self.logger, "[stream {}] SRTP keys installed", self.id);
        Ok(())
    }

    // -- teardown -----------------------------------------------------------

    /// Stop workers, uninstall handlers and release the sockets. After this
    /// returns no further bytes leave the socket on this stream's behalf.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.srtp_send_active.store(false, Ordering::SeqCst);

        if let Some(engine) = &self.rtcp {
            engine.stop(); // emits the final BYE
        }
        if let Ok(mut hp) = self.holepuncher.lock()
            && let Some(mut hp) = hp.take()
        {
            hp.stop();
        }

        self.flow.remove_handlers(self.id);
        self.inner.release_flow_if_idle(&self.flow, &self.endpoint);
        if let (Some(rflow), Some(rep)) = (&self.rtcp_flow, &self.rtcp_endpoint) {
            rflow.remove_handlers(self.id);
            self.inner.release_flow_if_idle(rflow, rep);
        }

        self.delivery.queue.close();
        sink_info!(self.logger, "[stream {}] destroyed", self.id);
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn reassembly_config(cfg: &StreamConfig, rce: RceFlags) -> ReassemblyConfig {
    ReassemblyConfig {
        max_delay: cfg.pkt_max_delay,
        prepend_start_code: !rce.contains(RceFlags::H26X_DO_NOT_PREPEND_SC),
        intra_hold: true,
        dependency_enforcement: rce.contains(RceFlags::H26X_DEPENDENCY_ENFORCEMENT),
    }
}

fn send_policy(cfg: &StreamConfig, rce: RceFlags) -> SendPolicy {
    SendPolicy {
        batch: rce.contains(RceFlags::SYSTEM_CALL_CLUSTERING),
        pace_fragments: rce.contains(RceFlags::PACE_FRAGMENT_SENDING),
        enforce_fps: rce.contains(RceFlags::FRAME_RATE),
        fps: Some((cfg.fps_numerator, cfg.fps_denominator)),
    }
}

/// Session bandwidth assumed when the application does not configure one.
fn default_bandwidth_kbps(format: MediaFormat) -> u32 {
    match format {
        MediaFormat::Opus => 64,
        MediaFormat::Generic => 256,
        MediaFormat::H264 | MediaFormat::H265 | MediaFormat::H266 => 3000,
    }
}
