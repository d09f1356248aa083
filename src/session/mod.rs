//! The public entry points: `Context` owns the socket factory and reception
//! flows, `Session` groups the streams toward one peer.

pub mod config;
pub mod media_stream;

pub use config::{ConfigKey, RceFlags, RtpFlags, StreamConfig};
pub use media_stream::MediaStream;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::RtpError;
use crate::formats::MediaFormat;
use crate::log::{LogSink, NoopLogSink};
use crate::net::SocketFactory;
use crate::net::socket::UdpEndpoint;
use crate::reception::ReceptionFlow;

/// Shared machinery behind a `Context`: the socket factory, the reception
/// flows keyed by local address, and the stream id counter.
pub(crate) struct ContextInner {
    pub factory: SocketFactory,
    flows: Mutex<HashMap<SocketAddr, Weak<ReceptionFlow>>>,
    stream_ids: AtomicU64,
    pub logger: Arc<dyn LogSink>,
}

impl ContextInner {
    pub fn next_stream_id(&self) -> u64 {
        self.stream_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// The reception flow reading `endpoint`, spawned on first use so
    /// streams multiplexed on one socket share one read thread.
    pub fn get_flow(&self, endpoint: &Arc<UdpEndpoint>, ring_bytes: usize) -> Arc<ReceptionFlow> {
        let addr = endpoint.local_addr();
        let mut flows = match self.flows.lock() {
            Ok(f) => f,
            Err(_) => {
                return ReceptionFlow::start(Arc::clone(endpoint), ring_bytes, Arc::clone(&self.logger));
            }
        };
        if let Some(flow) = flows.get(&addr).and_then(Weak::upgrade) {
            return flow;
        }
        let flow = ReceptionFlow::start(Arc::clone(endpoint), ring_bytes, Arc::clone(&self.logger));
        flows.insert(addr, Arc::downgrade(&flow));
        flow
    }

    /// Stop the flow once its last stream detached, and forget the socket.
    pub fn release_flow_if_idle(&self, flow: &Arc<ReceptionFlow>, endpoint: &Arc<UdpEndpoint>) {
        if !flow.is_idle() {
            return;
        }
        flow.stop();
        if let Ok(mut flows) = self.flows.lock() {
            flows.remove(&endpoint.local_addr());
        }
        self.factory.sweep();
    }
}

/// The library root: create one per process (or per isolation domain) and
/// open sessions from it. Socket sharing is scoped here, never global.
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::with_logger(Arc::new(NoopLogSink))
    }

    #[must_use]
    pub fn with_logger(logger: Arc<dyn LogSink>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                factory: SocketFactory::new(),
                flows: Mutex::new(HashMap::new()),
                stream_ids: AtomicU64::new(1),
                logger,
            }),
        }
    }

    /// Open a session toward `remote`, binding locally on `local`
    /// (defaulting to the unspecified address of the remote's family).
    pub fn create_session(&self, remote: IpAddr, local: Option<IpAddr>) -> Session {
        let local = local.unwrap_or(match remote {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
        });
        Session {
            inner: Arc::clone(&self.inner),
            remote,
            local,
            zrtp_session_key: Arc::new(Mutex::new(None)),
            streams: Mutex::new(Vec::new()),
        }
    }
}

/// All streams toward one peer. Destroying the session destroys its
/// streams.
pub struct Session {
    inner: Arc<ContextInner>,
    remote: IpAddr,
    local: IpAddr,
    /// ZRTP session key of the first DH-mode stream, reused by
    /// Multistream-mode siblings.
    zrtp_session_key: Arc<Mutex<Option<[u8; 32]>>>,
    streams: Mutex<Vec<Arc<MediaStream>>>,
}

impl Session {
    /// Open one stream: bind `src_port`, aim at `dst_port`, speak `format`.
    pub fn create_stream(
        &self,
        src_port: u16,
        dst_port: u16,
        format: MediaFormat,
        rce: RceFlags,
    ) -> Result<Arc<MediaStream>, RtpError> {
        let local = SocketAddr::new(self.local, src_port);
        let remote = SocketAddr::new(self.remote, dst_port);
        let stream = MediaStream::create(
            Arc::clone(&self.inner),
            Arc::clone(&self.zrtp_session_key),
            local,
            remote,
            format,
            rce,
        )?;
        if let Ok(mut streams) = self.streams.lock() {
            streams.push(Arc::clone(&stream));
        }
        Ok(stream)
    }

    /// Tear one stream down and drop the session's reference.
    pub fn destroy_stream(&self, stream: &Arc<MediaStream>) {
        stream.destroy();
        if let Ok(mut streams) = self.streams.lock() {
            streams.retain(|s| !Arc::ptr_eq(s, stream));
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(mut streams) = self.streams.lock() {
            for stream in streams.drain(..) {
                stream.destroy();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn session_defaults_local_to_unspecified() {
        let ctx = Context::new();
        let session = ctx.create_session("127.0.0.1".parse().unwrap(), None);
        assert_eq!(session.local, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(session.remote, "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn stream_creation_binds_and_tears_down() {
        let ctx = Context::new();
        let session = ctx.create_session(
            "127.0.0.1".parse().unwrap(),
            Some("127.0.0.1".parse().unwrap()),
        );
        let stream = session
            .create_stream(38_100, 38_102, MediaFormat::Generic, RceFlags::NO_FLAGS)
            .unwrap();
        assert_eq!(stream.format(), MediaFormat::Generic);
        session.destroy_stream(&stream);
        drop(stream);

        // The port is free again once the last stream reference is gone.
        let again = session
            .create_stream(38_100, 38_102, MediaFormat::Generic, RceFlags::NO_FLAGS)
            .unwrap();
        session.destroy_stream(&again);
    }

    #[test]
    fn bind_conflict_is_a_bind_error() {
        let ctx = Context::new();
        let session = ctx.create_session(
            "127.0.0.1".parse().unwrap(),
            Some("127.0.0.1".parse().unwrap()),
        );
        // Hold a socket on the port outside the factory.
        let _blocker = std::net::UdpSocket::bind("127.0.0.1:38104").unwrap();
        let err = session
            .create_stream(38_104, 38_106, MediaFormat::Generic, RceFlags::NO_FLAGS)
            .unwrap_err();
        assert!(matches!(err, RtpError::Bind(_)));
    }
}
