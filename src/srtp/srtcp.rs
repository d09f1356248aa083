//! SRTCP: the RTCP variant of the transform, with an explicit 31-bit packet
//! index and encryption-present bit trailing the ciphertext.

use byteorder::{BigEndian, ByteOrder};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::sync::Arc;

use crate::log::LogSink;
use crate::sink_warn;

use super::kdf::{SessionKeys, compute_iv};
use super::replay::ReplayWindow;
use super::{AUTH_TAG_LEN, SrtpError, constant_time_eq};

type HmacSha1 = Hmac<Sha1>;

/// The first 8 octets of a compound (header + sender SSRC) stay clear so
/// receivers can demultiplex.
const SRTCP_CLEAR_PREFIX: usize = 8;
const E_BIT: u32 = 0x8000_0000;

pub struct SrtcpContext {
    logger: Arc<dyn LogSink>,
    keys: SessionKeys,
    encrypt: bool,
    replay_protection: bool,
    tx_index: u32, // 31-bit, increments per sent compound
    replay: ReplayWindow,
}

impl SrtcpContext {
    pub fn new(
        logger: Arc<dyn LogSink>,
        master_key: &[u8],
        master_salt: &[u8],
        encrypt: bool,
        replay_protection: bool,
    ) -> Result<Self, SrtpError> {
        let keys = SessionKeys::derive_rtcp(master_key, master_salt)?;
        Ok(Self {
            logger,
            keys,
            encrypt,
            replay_protection,
            tx_index: 0,
            replay: ReplayWindow::new(),
        })
    }

    /// Encrypt a compound in place, append `E|index` and the auth tag.
    pub fn protect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if packet.len() < SRTCP_CLEAR_PREFIX {
            return Err(SrtpError::TooShort);
        }
        let ssrc = BigEndian::read_u32(&packet[4..8]);
        let index = self.tx_index & 0x7FFF_FFFF;
        self.tx_index = (self.tx_index + 1) & 0x7FFF_FFFF;

        let mut trailer = index;
        if self.encrypt {
            let iv = compute_iv(&self.keys.salt, ssrc, u64::from(index));
            self.keys.apply_ctr(&iv, &mut packet[SRTCP_CLEAR_PREFIX..]);
            trailer |= E_BIT;
        }
        packet.extend_from_slice(&trailer.to_be_bytes());

        let tag = self.compute_tag(packet)?;
        packet.extend_from_slice(&tag);
        Ok(())
    }

    /// Verify, replay-check and decrypt a received compound in place.
    pub fn unprotect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if packet.len() < SRTCP_CLEAR_PREFIX + 4 + AUTH_TAG_LEN {
            return Err(SrtpError::TooShort);
        }

        let tag_start = packet.len() - AUTH_TAG_LEN;
        let expected = self.compute_tag(&packet[..tag_start])?;
        if !constant_time_eq(&expected, &packet[tag_start..]) {
            sink_warn!(self.logger, "[srtcp] auth tag mismatch");
            return Err(SrtpError::AuthTagMismatch);
        }

        let trailer = BigEndian::read_u32(&packet[tag_start - 4..tag_start]);
        let encrypted = (trailer & E_BIT) != 0;
        let index = trailer & 0x7FFF_FFFF;

        if self.replay_protection && self.replay.is_replay(u64::from(index)) {
            sink_warn!(self.logger, "[srtcp] replayed index {index}");
            return Err(SrtpError::Replay);
        }

        packet.truncate(tag_start - 4);

        if encrypted {
            let ssrc = BigEndian::read_u32(&packet[4..8]);
            let iv = compute_iv(&self.keys.salt, ssrc, u64::from(index));
            self.keys.apply_ctr(&iv, &mut packet[SRTCP_CLEAR_PREFIX..]);
        }

        if self.replay_protection {
            self.replay.record(u64::from(index));
        }
        Ok(())
    }

    fn compute_tag(&self, content: &[u8]) -> Result<[u8; AUTH_TAG_LEN], SrtpError> {
        let mut mac =
            HmacSha1::new_from_slice(&self.keys.auth_key).map_err(|_| SrtpError::BadKeyLength)?;
        mac.update(content);
        let full = mac.finalize().into_bytes();
        let mut tag = [0u8; AUTH_TAG_LEN];
        tag.copy_from_slice(&full[..AUTH_TAG_LEN]);
        Ok(tag)
    }
}
