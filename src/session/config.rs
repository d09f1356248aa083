//! Stream creation flags and runtime configuration keys.

use std::ops::BitOr;
use std::time::Duration;

use crate::error::RtpError;

/// Context-enable flags passed to `create_stream` (bitmask; presence =
/// enable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RceFlags(u32);

impl RceFlags {
    pub const NO_FLAGS: RceFlags = RceFlags(0);

    pub const SEND_ONLY: RceFlags = RceFlags(1 << 0);
    pub const RECEIVE_ONLY: RceFlags = RceFlags(1 << 1);

    pub const SRTP: RceFlags = RceFlags(1 << 2);
    pub const SRTP_KMNGMNT_ZRTP: RceFlags = RceFlags(1 << 3);
    pub const SRTP_KMNGMNT_USER: RceFlags = RceFlags(1 << 4);
    pub const SRTP_NULL_CIPHER: RceFlags = RceFlags(1 << 5);
    pub const SRTP_AUTHENTICATE_RTP: RceFlags = RceFlags(1 << 6);
    pub const SRTP_REPLAY_PROTECTION: RceFlags = RceFlags(1 << 7);
    pub const SRTP_KEYSIZE_192: RceFlags = RceFlags(1 << 8);
    pub const SRTP_KEYSIZE_256: RceFlags = RceFlags(1 << 9);

    pub const RTCP: RceFlags = RceFlags(1 << 10);
    pub const RTCP_MUX: RceFlags = RceFlags(1 << 11);

    pub const FRAGMENT_GENERIC: RceFlags = RceFlags(1 << 12);
    pub const H26X_DO_NOT_PREPEND_SC: RceFlags = RceFlags(1 << 13);
    pub const H26X_DEPENDENCY_ENFORCEMENT: RceFlags = RceFlags(1 << 14);

    pub const HOLEPUNCH_KEEPALIVE: RceFlags = RceFlags(1 << 15);

    pub const ZRTP_DIFFIE_HELLMAN_MODE: RceFlags = RceFlags(1 << 16);
    pub const ZRTP_MULTISTREAM_MODE: RceFlags = RceFlags(1 << 17);

    pub const FRAME_RATE: RceFlags = RceFlags(1 << 18);
    pub const PACE_FRAGMENT_SENDING: RceFlags = RceFlags(1 << 19);
    pub const SYSTEM_CALL_CLUSTERING: RceFlags = RceFlags(1 << 20);

    #[must_use]
    pub fn contains(self, other: RceFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[must_use]
    pub fn is_unidirectional(self) -> bool {
        self.contains(RceFlags::SEND_ONLY) || self.contains(RceFlags::RECEIVE_ONLY)
    }

    /// Master key length selected by the keysize flags.
    #[must_use]
    pub fn srtp_key_len(self) -> usize {
        if self.contains(RceFlags::SRTP_KEYSIZE_256) {
            32
        } else if self.contains(RceFlags::SRTP_KEYSIZE_192) {
            24
        } else {
            16
        }
    }
}

impl BitOr for RceFlags {
    type Output = RceFlags;
    fn bitor(self, rhs: RceFlags) -> RceFlags {
        RceFlags(self.0 | rhs.0)
    }
}

/// Per-push flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtpFlags(u32);

impl RtpFlags {
    pub const NO_FLAGS: RtpFlags = RtpFlags(0);
    /// Copy the frame before sending. The push path never borrows past the
    /// call, so this is accepted for compatibility and has no extra effect.
    pub const COPY: RtpFlags = RtpFlags(1 << 0);
    /// Skip the H.26x start-code lookup; the buffer is one NAL unit.
    pub const NO_H26X_SCL: RtpFlags = RtpFlags(1 << 1);

    #[must_use]
    pub fn contains(self, other: RtpFlags) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl BitOr for RtpFlags {
    type Output = RtpFlags;
    fn bitor(self, rhs: RtpFlags) -> RtpFlags {
        RtpFlags(self.0 | rhs.0)
    }
}

/// Keys accepted by `MediaStream::configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    /// Kernel receive buffer, bytes.
    UdpRcvBufSize,
    /// Kernel send buffer, bytes.
    UdpSndBufSize,
    /// Reception ring, bytes.
    RingBufferSize,
    /// H.26x reassembly garbage-collection deadline, ms.
    PktMaxDelay,
    /// Payload type override.
    DynPayloadType,
    /// RTP timestamp rate, Hz.
    ClockRate,
    /// Path MTU, bytes.
    MtuSize,
    FpsNumerator,
    FpsDenominator,
    /// Local SSRC override.
    Ssrc,
    /// Expected remote SSRC.
    RemoteSsrc,
    /// Session bandwidth driving the RTCP interval, kbps.
    SessionBandwidthKbps,
    /// Reception-flow recv deadline, ms.
    PollTimeoutMs,
}

/// Resolved per-stream configuration with the documented defaults.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub udp_rcv_buf_size: usize,
    pub udp_snd_buf_size: usize,
    pub ring_buffer_size: usize,
    pub pkt_max_delay: Duration,
    pub mtu_size: usize,
    pub fps_numerator: u32,
    pub fps_denominator: u32,
    pub session_bandwidth_kbps: u32,
    pub poll_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            udp_rcv_buf_size: 4 * 1024 * 1024,
            udp_snd_buf_size: 4 * 1024 * 1024,
            ring_buffer_size: 4 * 1024 * 1024,
            pkt_max_delay: Duration::from_millis(500),
            mtu_size: 1492,
            fps_numerator: 30,
            fps_denominator: 1,
            session_bandwidth_kbps: 0,
            poll_timeout: Duration::from_millis(100),
        }
    }
}

impl StreamConfig {
    /// Usable RTP payload bytes per packet: MTU minus the IP+UDP reserve
    /// (40) and the fixed RTP header (12).
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.mtu_size.saturating_sub(40 + 12)
    }

    /// Range-check and apply one key. Unknown combinations surface
    /// `invalid-value`.
    pub fn set(&mut self, key: ConfigKey, value: u64) -> Result<(), RtpError> {
        match key {
            ConfigKey::UdpRcvBufSize if value > 0 => self.udp_rcv_buf_size = value as usize,
            ConfigKey::UdpSndBufSize if value > 0 => self.udp_snd_buf_size = value as usize,
            ConfigKey::RingBufferSize if value > 0 => self.ring_buffer_size = value as usize,
            ConfigKey::PktMaxDelay if value > 0 => {
                self.pkt_max_delay = Duration::from_millis(value);
            }
            ConfigKey::MtuSize if value > 100 && value <= 65_535 => {
                self.mtu_size = value as usize;
            }
            ConfigKey::FpsNumerator if value > 0 && value <= u64::from(u32::MAX) => {
                self.fps_numerator = value as u32;
            }
            ConfigKey::FpsDenominator if value > 0 && value <= u64::from(u32::MAX) => {
                self.fps_denominator = value as u32;
            }
            ConfigKey::SessionBandwidthKbps if value <= u64::from(u32::MAX) => {
                self.session_bandwidth_kbps = value as u32;
            }
            ConfigKey::PollTimeoutMs if value > 0 && value <= 60_000 => {
                self.poll_timeout = Duration::from_millis(value);
            }
            // ClockRate / DynPayloadType / Ssrc / RemoteSsrc act on live
            // stream state and are applied by the caller.
            _ => return Err(RtpError::InvalidValue),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn flag_composition() {
        let rce = RceFlags::SRTP | RceFlags::SRTP_KMNGMNT_USER | RceFlags::RTCP;
        assert!(rce.contains(RceFlags::SRTP));
        assert!(rce.contains(RceFlags::RTCP));
        assert!(!rce.contains(RceFlags::RTCP_MUX));
        assert!(!rce.is_unidirectional());
        assert!((rce | RceFlags::SEND_ONLY).is_unidirectional());
    }

    #[test]
    fn key_sizes_from_flags() {
        assert_eq!(RceFlags::SRTP.srtp_key_len(), 16);
        assert_eq!((RceFlags::SRTP | RceFlags::SRTP_KEYSIZE_192).srtp_key_len(), 24);
        assert_eq!((RceFlags::SRTP | RceFlags::SRTP_KEYSIZE_256).srtp_key_len(), 32);
    }

    #[test]
    fn defaults_match_documentation() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.mtu_size, 1492);
        assert_eq!(cfg.max_payload(), 1492 - 52);
        assert_eq!(cfg.pkt_max_delay, Duration::from_millis(500));
        assert_eq!(cfg.ring_buffer_size, 4 * 1024 * 1024);
        assert_eq!(cfg.poll_timeout, Duration::from_millis(100));
    }

    #[test]
    fn out_of_range_values_rejected() {
        let mut cfg = StreamConfig::default();
        assert_eq!(cfg.set(ConfigKey::MtuSize, 50).unwrap_err(), RtpError::InvalidValue);
        assert_eq!(cfg.set(ConfigKey::PktMaxDelay, 0).unwrap_err(), RtpError::InvalidValue);
        cfg.set(ConfigKey::MtuSize, 1200).unwrap();
        assert_eq!(cfg.max_payload(), 1200 - 52);
    }
}
