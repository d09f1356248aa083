//! The per-direction SRTP transform.

use byteorder::{BigEndian, ByteOrder};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::sync::Arc;

use crate::log::LogSink;
use crate::rtp::packet::wire_header_len;
use crate::{sink_trace, sink_warn};

use super::kdf::{SessionKeys, compute_iv};
use super::replay::ReplayWindow;
use super::{AUTH_TAG_LEN, SrtpError, constant_time_eq};

type HmacSha1 = Hmac<Sha1>;

/// Per-stream transform switches resolved from the RCE flags.
#[derive(Debug, Clone, Copy)]
pub struct SrtpStreamConfig {
    /// False for the null cipher (authentication only).
    pub encrypt: bool,
    /// Append/verify the 10-byte HMAC-SHA1 tag.
    pub authenticate: bool,
    /// Reject replayed packet indices (receive side).
    pub replay_protection: bool,
}

impl Default for SrtpStreamConfig {
    fn default() -> Self {
        Self {
            encrypt: true,
            authenticate: false,
            replay_protection: false,
        }
    }
}

/// One direction of an SRTP stream: session keys plus rollover state.
///
/// The send side is owned by the pushing thread, the receive side by the
/// reception flow; master keys are read-only after derivation.
pub struct SrtpContext {
    logger: Arc<dyn LogSink>,
    keys: SessionKeys,
    config: SrtpStreamConfig,
    roc: u32,
    highest_seq: Option<u16>,
    replay: ReplayWindow,
}

impl SrtpContext {
    pub fn new(
        logger: Arc<dyn LogSink>,
        master_key: &[u8],
        master_salt: &[u8],
        config: SrtpStreamConfig,
    ) -> Result<Self, SrtpError> {
        let keys = SessionKeys::derive_rtp(master_key, master_salt)?;
        Ok(Self {
            logger,
            keys,
            config,
            roc: 0,
            highest_seq: None,
            replay: ReplayWindow::new(),
        })
    }

    /// `packet_index = (ROC << 16) + seq`.
    fn packet_index(roc: u32, seq: u16) -> u64 {
        (u64::from(roc) << 16) | u64::from(seq)
    }

    /// Resolve the ROC for `seq` with a half-window tolerance: a sequence
    /// jumping back by more than 2^15 belongs to the next rollover, one
    /// jumping forward by more than 2^15 to the previous.
    fn estimate_roc(&self, seq: u16) -> u32 {
        let Some(last) = self.highest_seq else {
            return self.roc;
        };
        let delta = i32::from(seq) - i32::from(last);
        if delta <= -32_768 {
            self.roc.wrapping_add(1)
        } else if delta >= 32_768 {
            self.roc.wrapping_sub(1)
        } else {
            self.roc
        }
    }

    fn commit_index(&mut self, roc: u32, seq: u16) {
        match self.highest_seq {
            None => {
                self.roc = roc;
                self.highest_seq = Some(seq);
            }
            Some(last) => {
                let newer = roc > self.roc || (roc == self.roc && seq >= last);
                if newer {
                    self.roc = roc;
                    self.highest_seq = Some(seq);
                }
            }
        }
    }

    /// Encrypt in place and append the auth tag. `packet` is a full RTP
    /// packet as assembled by the frame queue.
    pub fn protect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if packet.len() < 12 {
            return Err(SrtpError::TooShort);
        }
        let seq = BigEndian::read_u16(&packet[2..4]);
        let ssrc = BigEndian::read_u32(&packet[8..12]);

        let roc = self.estimate_roc(seq);
        let index = Self::packet_index(roc, seq);

        if self.config.encrypt {
            let header_len = wire_header_len(packet).map_err(|_| SrtpError::MalformedHeader)?;
            let iv = compute_iv(&self.keys.salt, ssrc, index);
            self.keys.apply_ctr(&iv, &mut packet[header_len..]);
        }

        if self.config.authenticate {
            let tag = self.compute_tag(packet, roc)?;
            packet.extend_from_slice(&tag);
        }

        self.commit_index(roc, seq);
        sink_trace!(
            self.logger,
            "[srtp] protected ssrc={ssrc:#010x} seq={seq} roc={roc}"
        );
        Ok(())
    }

    /// Verify the tag, check replay, decrypt in place and update state.
    pub fn unprotect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        let min_len = 12 + if self.config.authenticate { AUTH_TAG_LEN } else { 0 };
        if packet.len() < min_len {
            return Err(SrtpError::TooShort);
        }

        let seq = BigEndian::read_u16(&packet[2..4]);
        let ssrc = BigEndian::read_u32(&packet[8..12]);
        let roc = self.estimate_roc(seq);
        let index = Self::packet_index(roc, seq);

        if self.config.replay_protection && self.replay.is_replay(index) {
            sink_warn!(self.logger, "[srtp] replay: ssrc={ssrc:#010x} seq={seq}");
            return Err(SrtpError::Replay);
        }

        if self.config.authenticate {
            let tag_start = packet.len() - AUTH_TAG_LEN;
            let expected = self.compute_tag(&packet[..tag_start], roc)?;
            if !constant_time_eq(&expected, &packet[tag_start..]) {
                sink_warn!(
                    self.logger,
                    "[srtp] auth tag mismatch: ssrc={ssrc:#010x} seq={seq} roc={roc}"
                );
                return Err(SrtpError::AuthTagMismatch);
            }
            packet.truncate(tag_start);
        }

        if self.config.encrypt {
            let header_len = wire_header_len(packet).map_err(|_| SrtpError::MalformedHeader)?;
            let iv = compute_iv(&self.keys.salt, ssrc, index);
            self.keys.apply_ctr(&iv, &mut packet[header_len..]);
        }

        self.commit_index(roc, seq);
        if self.config.replay_protection {
            self.replay.record(index);
        }
        Ok(())
    }

    /// HMAC-SHA1 over `content || ROC` truncated to 80 bits.
    fn compute_tag(&self, content: &[u8], roc: u32) -> Result<[u8; AUTH_TAG_LEN], SrtpError> {
        let mut mac =
            HmacSha1::new_from_slice(&self.keys.auth_key).map_err(|_| SrtpError::BadKeyLength)?;
        mac.update(content);
        mac.update(&roc.to_be_bytes());
        let full = mac.finalize().into_bytes();
        let mut tag = [0u8; AUTH_TAG_LEN];
        tag.copy_from_slice(&full[..AUTH_TAG_LEN]);
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::log::NoopLogSink;
    use crate::rtp::RtpPacket;

    fn pair(config: SrtpStreamConfig) -> (SrtpContext, SrtpContext) {
        let key: Vec<u8> = (0u8..16).collect();
        let salt: Vec<u8> = (0u8..14).map(|i| 2 * i).collect();
        let tx = SrtpContext::new(Arc::new(NoopLogSink), &key, &salt, config).unwrap();
        let rx = SrtpContext::new(Arc::new(NoopLogSink), &key, &salt, config).unwrap();
        (tx, rx)
    }

    fn rtp(seq: u16, payload: &[u8]) -> Vec<u8> {
        RtpPacket::simple(106, false, seq, 9999, 0xABCD_EF01, payload.to_vec())
            .encode()
            .unwrap()
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let (mut tx, mut rx) = pair(SrtpStreamConfig {
            authenticate: true,
            ..SrtpStreamConfig::default()
        });
        let clear = rtp(10, b"Hello, world!");
        let mut wire = clear.clone();
        tx.protect(&mut wire).unwrap();
        assert_ne!(wire, clear);
        assert_eq!(wire.len(), clear.len() + AUTH_TAG_LEN);

        rx.unprotect(&mut wire).unwrap();
        assert_eq!(wire, clear);
    }

    #[test]
    fn single_bit_flip_fails_authentication() {
        let (mut tx, mut rx) = pair(SrtpStreamConfig {
            authenticate: true,
            ..SrtpStreamConfig::default()
        });
        let mut wire = rtp(11, b"Hello, world!");
        tx.protect(&mut wire).unwrap();

        // Flip one ciphertext bit.
        let n = wire.len();
        wire[n - AUTH_TAG_LEN - 1] ^= 0x01;
        assert_eq!(rx.unprotect(&mut wire).unwrap_err(), SrtpError::AuthTagMismatch);

        // And one header bit.
        let mut wire2 = rtp(12, b"Hello, world!");
        tx.protect(&mut wire2).unwrap();
        wire2[8] ^= 0x80;
        assert_eq!(rx.unprotect(&mut wire2).unwrap_err(), SrtpError::AuthTagMismatch);
    }

    #[test]
    fn replay_is_rejected_once_enabled() {
        let (mut tx, mut rx) = pair(SrtpStreamConfig {
            authenticate: true,
            replay_protection: true,
            ..SrtpStreamConfig::default()
        });
        let mut wire = rtp(20, b"payload");
        tx.protect(&mut wire).unwrap();

        let mut replayed = wire.clone();
        rx.unprotect(&mut wire).unwrap();
        assert_eq!(rx.unprotect(&mut replayed).unwrap_err(), SrtpError::Replay);
    }

    #[test]
    fn null_cipher_keeps_payload_clear_but_authenticated() {
        let (mut tx, mut rx) = pair(SrtpStreamConfig {
            encrypt: false,
            authenticate: true,
            replay_protection: false,
        });
        let clear = rtp(5, b"visible");
        let mut wire = clear.clone();
        tx.protect(&mut wire).unwrap();
        assert_eq!(&wire[..clear.len()], &clear[..]);
        rx.unprotect(&mut wire).unwrap();
        assert_eq!(wire, clear);
    }

    #[test]
    fn roc_advances_across_sequence_wrap() {
        let (mut tx, mut rx) = pair(SrtpStreamConfig {
            authenticate: true,
            ..SrtpStreamConfig::default()
        });

        // Walk the sender across the wrap; the receiver follows.
        for seq in [65_533u16, 65_534, 65_535, 0, 1, 2] {
            let clear = rtp(seq, b"wrap me");
            let mut wire = clear.clone();
            tx.protect(&mut wire).unwrap();
            rx.unprotect(&mut wire).unwrap();
            assert_eq!(wire, clear, "seq {seq} failed round trip");
        }
        assert_eq!(rx.roc, 1);
        assert_eq!(tx.roc, 1);
    }

    #[test]
    fn keysizes_192_and_256_round_trip() {
        for len in [24usize, 32] {
            let key: Vec<u8> = (0..len as u8).collect();
            let salt = [7u8; 14];
            let cfg = SrtpStreamConfig {
                authenticate: true,
                ..SrtpStreamConfig::default()
            };
            let mut tx = SrtpContext::new(Arc::new(NoopLogSink), &key, &salt, cfg).unwrap();
            let mut rx = SrtpContext::new(Arc::new(NoopLogSink), &key, &salt, cfg).unwrap();

            let clear = rtp(1, b"bigger keys");
            let mut wire = clear.clone();
            tx.protect(&mut wire).unwrap();
            rx.unprotect(&mut wire).unwrap();
            assert_eq!(wire, clear);
        }
    }
}
