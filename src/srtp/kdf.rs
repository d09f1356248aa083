//! AES-CM key derivation (RFC 3711 §4.3) for the three key sizes.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use ctr::Ctr128BE;

use super::{
    LABEL_RTCP_AUTH, LABEL_RTCP_ENCRYPTION, LABEL_RTCP_SALT, LABEL_RTP_AUTH, LABEL_RTP_ENCRYPTION,
    LABEL_RTP_SALT, MASTER_SALT_LEN, SESSION_AUTH_LEN, SESSION_SALT_LEN, SrtpError,
};

pub(crate) type Aes128Ctr = Ctr128BE<Aes128>;
pub(crate) type Aes192Ctr = Ctr128BE<Aes192>;
pub(crate) type Aes256Ctr = Ctr128BE<Aes256>;

/// Negotiated master/session key length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtpKeySize {
    Bits128,
    Bits192,
    Bits256,
}

impl SrtpKeySize {
    #[must_use]
    pub fn key_len(self) -> usize {
        match self {
            SrtpKeySize::Bits128 => 16,
            SrtpKeySize::Bits192 => 24,
            SrtpKeySize::Bits256 => 32,
        }
    }

    /// Pick the size matching a master key length.
    pub fn from_key_len(len: usize) -> Result<Self, SrtpError> {
        match len {
            16 => Ok(SrtpKeySize::Bits128),
            24 => Ok(SrtpKeySize::Bits192),
            32 => Ok(SrtpKeySize::Bits256),
            _ => Err(SrtpError::BadKeyLength),
        }
    }
}

/// Keys for one direction of one transform (RTP or RTCP).
#[derive(Clone)]
pub struct SessionKeys {
    pub size: SrtpKeySize,
    pub enc_key: Vec<u8>,
    pub auth_key: [u8; SESSION_AUTH_LEN],
    pub salt: [u8; SESSION_SALT_LEN],
}

impl SessionKeys {
    /// Derive the RTP-direction session keys from a master key/salt.
    pub fn derive_rtp(master_key: &[u8], master_salt: &[u8]) -> Result<Self, SrtpError> {
        Self::derive(master_key, master_salt, LABEL_RTP_ENCRYPTION, LABEL_RTP_AUTH, LABEL_RTP_SALT)
    }

    /// Derive the RTCP-direction session keys from the same master secret.
    pub fn derive_rtcp(master_key: &[u8], master_salt: &[u8]) -> Result<Self, SrtpError> {
        Self::derive(
            master_key,
            master_salt,
            LABEL_RTCP_ENCRYPTION,
            LABEL_RTCP_AUTH,
            LABEL_RTCP_SALT,
        )
    }

    fn derive(
        master_key: &[u8],
        master_salt: &[u8],
        enc_label: u8,
        auth_label: u8,
        salt_label: u8,
    ) -> Result<Self, SrtpError> {
        let size = SrtpKeySize::from_key_len(master_key.len())?;

        let mut salt_pad = [0u8; 16];
        let n = master_salt.len().min(MASTER_SALT_LEN);
        salt_pad[..n].copy_from_slice(&master_salt[..n]);

        let mut enc_key = vec![0u8; size.key_len()];
        let mut auth_key = [0u8; SESSION_AUTH_LEN];
        let mut salt = [0u8; SESSION_SALT_LEN];

        aes_cm_prf(size, master_key, &salt_pad, enc_label, &mut enc_key);
        aes_cm_prf(size, master_key, &salt_pad, auth_label, &mut auth_key);
        aes_cm_prf(size, master_key, &salt_pad, salt_label, &mut salt);

        Ok(Self {
            size,
            enc_key,
            auth_key,
            salt,
        })
    }

    /// Apply the AES-CTR keystream for `iv` over `data` in place. Used for
    /// both encryption and decryption.
    pub fn apply_ctr(&self, iv: &[u8; 16], data: &mut [u8]) {
        // Key lengths are fixed at derivation time, so the slice
        // constructors cannot fail here.
        match self.size {
            SrtpKeySize::Bits128 => {
                if let Ok(mut cipher) = Aes128Ctr::new_from_slices(&self.enc_key, iv) {
                    cipher.apply_keystream(data);
                }
            }
            SrtpKeySize::Bits192 => {
                if let Ok(mut cipher) = Aes192Ctr::new_from_slices(&self.enc_key, iv) {
                    cipher.apply_keystream(data);
                }
            }
            SrtpKeySize::Bits256 => {
                if let Ok(mut cipher) = Aes256Ctr::new_from_slices(&self.enc_key, iv) {
                    cipher.apply_keystream(data);
                }
            }
        }
    }
}

/// The AES-CM PRF: keystream of AES-CTR keyed by the master key with
/// IV = padded master salt XORed with the label at byte 7, truncated to the
/// requested output length.
fn aes_cm_prf(size: SrtpKeySize, master_key: &[u8], master_salt_padded: &[u8; 16], label: u8, out: &mut [u8]) {
    let mut iv = *master_salt_padded;
    iv[7] ^= label;

    out.fill(0);
    match size {
        SrtpKeySize::Bits128 => {
            if let Ok(mut cipher) = Aes128Ctr::new_from_slices(master_key, &iv) {
                cipher.apply_keystream(out);
            }
        }
        SrtpKeySize::Bits192 => {
            if let Ok(mut cipher) = Aes192Ctr::new_from_slices(master_key, &iv) {
                cipher.apply_keystream(out);
            }
        }
        SrtpKeySize::Bits256 => {
            if let Ok(mut cipher) = Aes256Ctr::new_from_slices(master_key, &iv) {
                cipher.apply_keystream(out);
            }
        }
    }
}

/// Per-packet IV: `salt ⊕ (0 || SSRC || packet_index)` shifted 16 bits left
/// (RFC 3711 §4.1.1).
#[must_use]
pub(crate) fn compute_iv(session_salt: &[u8; SESSION_SALT_LEN], ssrc: u32, index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..SESSION_SALT_LEN].copy_from_slice(session_salt);

    let ssrc_bytes = ssrc.to_be_bytes();
    for i in 0..4 {
        iv[4 + i] ^= ssrc_bytes[i];
    }

    let idx_full = index.to_be_bytes();
    for i in 0..6 {
        iv[8 + i] ^= idx_full[2 + i];
    }
    iv
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn keysize_from_len() {
        assert_eq!(SrtpKeySize::from_key_len(16).unwrap(), SrtpKeySize::Bits128);
        assert_eq!(SrtpKeySize::from_key_len(24).unwrap(), SrtpKeySize::Bits192);
        assert_eq!(SrtpKeySize::from_key_len(32).unwrap(), SrtpKeySize::Bits256);
        assert!(SrtpKeySize::from_key_len(15).is_err());
    }

    #[test]
    fn rfc3711_appendix_b3_vectors() {
        // RFC 3711 B.3 key derivation test vectors (AES-128).
        let master_key = [
            0xE1, 0xF9, 0x7A, 0x0D, 0x3E, 0x01, 0x8B, 0xE0, 0xD6, 0x4F, 0xA3, 0x2C, 0x06, 0xDE,
            0x41, 0x39,
        ];
        let master_salt = [
            0x0E, 0xC6, 0x75, 0xAD, 0x49, 0x8A, 0xFE, 0xEB, 0xB6, 0x96, 0x0B, 0x3A, 0xAB, 0xE6,
        ];
        let keys = SessionKeys::derive_rtp(&master_key, &master_salt).unwrap();

        assert_eq!(
            keys.enc_key,
            vec![
                0xC6, 0x1E, 0x7A, 0x93, 0x74, 0x4F, 0x39, 0xEE, 0x10, 0x73, 0x4A, 0xFE, 0x3F,
                0xF7, 0xA0, 0x87
            ]
        );
        assert_eq!(
            keys.auth_key,
            [
                0xCE, 0xBE, 0x32, 0x1F, 0x6F, 0xF7, 0x71, 0x6B, 0x6F, 0xD4, 0xAB, 0x49, 0xAF,
                0x25, 0x6A, 0x15, 0x6D, 0x38, 0xBA, 0xA4
            ]
        );
        assert_eq!(
            keys.salt,
            [
                0x30, 0xCB, 0xBC, 0x08, 0x86, 0x3D, 0x8C, 0x85, 0xD4, 0x9D, 0xB3, 0x4A, 0x9A,
                0xE1
            ]
        );
    }

    #[test]
    fn ctr_keystream_is_symmetric() {
        let keys = SessionKeys::derive_rtp(&[7u8; 32], &[3u8; 14]).unwrap();
        let iv = compute_iv(&keys.salt, 0x1234, 42);
        let mut data = b"attack at dawn".to_vec();
        keys.apply_ctr(&iv, &mut data);
        assert_ne!(data, b"attack at dawn");
        keys.apply_ctr(&iv, &mut data);
        assert_eq!(data, b"attack at dawn");
    }

    #[test]
    fn iv_depends_on_ssrc_and_index() {
        let salt = [9u8; SESSION_SALT_LEN];
        let a = compute_iv(&salt, 1, 1);
        let b = compute_iv(&salt, 2, 1);
        let c = compute_iv(&salt, 1, 2);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }
}
