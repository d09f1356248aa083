//! rtpkit is a user-space library for bidirectional real-time media
//! transport over UDP: RTP and RTCP per RFC 3550, SRTP/SRTCP per RFC 3711,
//! ZRTP key agreement per RFC 6189, and payload packetization for generic
//! media, Opus (RFC 7587), H.264 (RFC 6184), H.265 (RFC 7798) and H.266
//! (RFC 9328).
//!
//! A [`Context`] owns socket sharing; a [`Session`] groups the streams
//! toward one peer; a [`MediaStream`] is one RTP flow with its push/pull
//! paths, reception thread, RTCP engine and optional crypto:
//!
//! ```no_run
//! use rtpkit::{Context, MediaFormat, RceFlags, RtpFlags};
//!
//! let ctx = Context::new();
//! let session = ctx.create_session("192.0.2.7".parse().unwrap(), None);
//! let stream = session
//!     .create_stream(8000, 8002, MediaFormat::H265, RceFlags::RTCP)
//!     .unwrap();
//! stream.push_frame(&[0, 0, 0, 1, 0x26, 0x01, 0xAA], RtpFlags::NO_FLAGS).unwrap();
//! ```

/// Wallclock and NTP helpers.
pub mod clock;
/// Crate-wide error kinds and handler outcomes.
pub mod error;
/// Payload formats and the H.26x fragmentation machinery.
pub mod formats;
/// The frame type delivered to applications.
pub mod frame;
/// Leveled logging with compile-time gated macros.
pub mod log;
/// UDP endpoints, the socket factory and the holepuncher.
pub mod net;
/// The reception flow and its packet-handler chain.
pub mod reception;
/// RTCP wire types, statistics and the report engine.
pub mod rtcp;
/// RTP wire model, per-stream context and the send queue.
pub mod rtp;
/// Context, Session, MediaStream and their configuration.
pub mod session;
/// SRTP/SRTCP transforms.
pub mod srtp;
/// ZRTP key agreement.
pub mod zrtp;

pub use error::{HandlerOutcome, RtpError};
pub use formats::MediaFormat;
pub use frame::MediaFrame;
pub use session::{ConfigKey, Context, MediaStream, RceFlags, RtpFlags, Session};
