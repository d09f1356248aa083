//! ZRTP wire messages: the packet envelope and the Hello, HelloACK, Commit,
//! DHPart1/2, Confirm1/2, Conf2ACK and Error messages with their MAC
//! chaining.

use aes::Aes128;
use byteorder::{BigEndian, ByteOrder};
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use cfb_mode::{Decryptor, Encryptor};
use rand::{RngCore, rngs::OsRng};

use super::crypto::{DH3K_LEN, hmac_sha256};
use super::{ZRTP_MAGIC_COOKIE, ZrtpError};

type Aes128CfbEnc = Encryptor<Aes128>;
type Aes128CfbDec = Decryptor<Aes128>;

pub const ZRTP_PREAMBLE: u16 = 0x505A;
pub const ZRTP_VERSION: [u8; 4] = *b"1.10";
const CLIENT_ID: [u8; 16] = *b"rtpkit          ";

/// Truncated HMAC length used by the message MAC chain.
pub const MSG_MAC_LEN: usize = 8;

// 8-byte message type blocks.
pub const MSG_HELLO: [u8; 8] = *b"Hello   ";
pub const MSG_HELLO_ACK: [u8; 8] = *b"HelloACK";
pub const MSG_COMMIT: [u8; 8] = *b"Commit  ";
pub const MSG_DH_PART1: [u8; 8] = *b"DHPart1 ";
pub const MSG_DH_PART2: [u8; 8] = *b"DHPart2 ";
pub const MSG_CONFIRM1: [u8; 8] = *b"Confirm1";
pub const MSG_CONFIRM2: [u8; 8] = *b"Confirm2";
pub const MSG_CONF2_ACK: [u8; 8] = *b"Conf2ACK";
pub const MSG_ERROR: [u8; 8] = *b"Error   ";

// 4-byte algorithm codes.
pub const HASH_S256: [u8; 4] = *b"S256";
pub const CIPHER_AES1: [u8; 4] = *b"AES1";
pub const AUTH_HS32: [u8; 4] = *b"HS32";
pub const AUTH_HS80: [u8; 4] = *b"HS80";
pub const KEY_AGREEMENT_DH3K: [u8; 4] = *b"DH3k";
pub const KEY_AGREEMENT_MULT: [u8; 4] = *b"Mult";
pub const SAS_B32: [u8; 4] = *b"B32 ";

/// RFC 6189 §5.9 error codes the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZrtpErrorCode {
    MalformedPacket = 0x10,
    UnsupportedVersion = 0x30,
    HelloComponentMismatch = 0x40,
    HviMismatch = 0x62,
    BadConfirmMac = 0x70,
    ProtocolTimeout = 0xB0,
}

// ---------------------------------------------------------------------------
// Packet envelope
// ---------------------------------------------------------------------------

/// 12-byte packet header: version nibble, sequence, magic cookie, SSRC.
pub fn wrap_packet(seq: u16, ssrc: u32, message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + message.len());
    out.push(0x10);
    out.push(0x00);
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(&ZRTP_MAGIC_COOKIE.to_be_bytes());
    out.extend_from_slice(&ssrc.to_be_bytes());
    out.extend_from_slice(message);
    out
}

/// Strip the envelope; `None` unless the magic cookie matches.
pub fn unwrap_packet(packet: &[u8]) -> Option<&[u8]> {
    if packet.len() < 12 + 12 {
        return None;
    }
    if BigEndian::read_u32(&packet[4..8]) != ZRTP_MAGIC_COOKIE {
        return None;
    }
    Some(&packet[12..])
}

/// The 8-byte type block of a message (offset 4, after preamble + length).
pub fn message_type(message: &[u8]) -> Option<[u8; 8]> {
    if message.len() < 12 || BigEndian::read_u16(&message[0..2]) != ZRTP_PREAMBLE {
        return None;
    }
    let mut t = [0u8; 8];
    t.copy_from_slice(&message[4..12]);
    Some(t)
}

fn begin_message(type_block: &[u8; 8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&ZRTP_PREAMBLE.to_be_bytes());
    out.extend_from_slice(&[0u8, 0u8]); // length patched at the end
    out.extend_from_slice(type_block);
    out
}

fn finish_message(mut out: Vec<u8>) -> Vec<u8> {
    debug_assert_eq!(out.len() % 4, 0);
    let words = (out.len() / 4) as u16;
    BigEndian::write_u16(&mut out[2..4], words);
    out
}

/// Append the truncated chain MAC over everything emitted so far.
fn append_mac(out: &mut Vec<u8>, mac_key: &[u8; 32]) {
    let mac = hmac_sha256(mac_key, &[out]);
    out.extend_from_slice(&mac[..MSG_MAC_LEN]);
}

/// Check the trailing 8-byte MAC of `message` against `mac_key`.
pub fn verify_mac(message: &[u8], mac_key: &[u8; 32]) -> bool {
    if message.len() < MSG_MAC_LEN {
        return false;
    }
    let body = &message[..message.len() - MSG_MAC_LEN];
    let expected = hmac_sha256(mac_key, &[body]);
    let got = &message[message.len() - MSG_MAC_LEN..];
    // Not secret data at this point, but compare without early exit anyway.
    expected[..MSG_MAC_LEN]
        .iter()
        .zip(got)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

// ---------------------------------------------------------------------------
// Hello
// ---------------------------------------------------------------------------

/// Hello: version, client id, H3, ZID and the capability lists, MACed with
/// H2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub version: [u8; 4],
    pub h3: [u8; 32],
    pub zid: [u8; 12],
    pub hashes: Vec<[u8; 4]>,
    pub ciphers: Vec<[u8; 4]>,
    pub auth_tags: Vec<[u8; 4]>,
    pub key_agreements: Vec<[u8; 4]>,
    pub sas_types: Vec<[u8; 4]>,
}

impl Hello {
    /// Our capability set; the mandatory algorithms plus Multistream.
    pub fn ours(h3: [u8; 32], zid: [u8; 12]) -> Self {
        Self {
            version: ZRTP_VERSION,
            h3,
            zid,
            hashes: vec![HASH_S256],
            ciphers: vec![CIPHER_AES1],
            auth_tags: vec![AUTH_HS32, AUTH_HS80],
            key_agreements: vec![KEY_AGREEMENT_DH3K, KEY_AGREEMENT_MULT],
            sas_types: vec![SAS_B32],
        }
    }

    pub fn encode(&self, h2: &[u8; 32]) -> Vec<u8> {
        let mut out = begin_message(&MSG_HELLO);
        out.extend_from_slice(&self.version);
        out.extend_from_slice(&CLIENT_ID);
        out.extend_from_slice(&self.h3);
        out.extend_from_slice(&self.zid);
        out.push(self.hashes.len() as u8);
        out.push(self.ciphers.len() as u8);
        out.push(self.auth_tags.len() as u8);
        out.push(self.key_agreements.len() as u8);
        out.push(self.sas_types.len() as u8);
        out.extend_from_slice(&[0u8; 3]); // align to 32 bits
        for list in [
            &self.hashes,
            &self.ciphers,
            &self.auth_tags,
            &self.key_agreements,
            &self.sas_types,
        ] {
            for code in list {
                out.extend_from_slice(code);
            }
        }
        append_mac(&mut out, h2);
        finish_message(out)
    }

    pub fn decode(message: &[u8]) -> Result<Self, ZrtpError> {
        if message.len() < 12 + 4 + 16 + 32 + 12 + 8 {
            return Err(ZrtpError::Malformed);
        }
        let mut idx = 12usize;
        let mut version = [0u8; 4];
        version.copy_from_slice(&message[idx..idx + 4]);
        idx += 4 + 16; // skip client id
        let mut h3 = [0u8; 32];
        h3.copy_from_slice(&message[idx..idx + 32]);
        idx += 32;
        let mut zid = [0u8; 12];
        zid.copy_from_slice(&message[idx..idx + 12]);
        idx += 12;

        if message.len() < idx + 8 {
            return Err(ZrtpError::Malformed);
        }
        let counts = [
            message[idx] as usize,
            message[idx + 1] as usize,
            message[idx + 2] as usize,
            message[idx + 3] as usize,
            message[idx + 4] as usize,
        ];
        idx += 8;

        let total_codes: usize = counts.iter().sum();
        if message.len() < idx + total_codes * 4 + MSG_MAC_LEN {
            return Err(ZrtpError::Malformed);
        }

        let mut take_list = |n: usize| -> Vec<[u8; 4]> {
            let mut list = Vec::with_capacity(n);
            for _ in 0..n {
                let mut code = [0u8; 4];
                code.copy_from_slice(&message[idx..idx + 4]);
                list.push(code);
                idx += 4;
            }
            list
        };

        Ok(Self {
            version,
            h3,
            zid,
            hashes: take_list(counts[0]),
            ciphers: take_list(counts[1]),
            auth_tags: take_list(counts[2]),
            key_agreements: take_list(counts[3]),
            sas_types: take_list(counts[4]),
        })
    }

    /// True when the peer offers the whole mandatory set.
    #[must_use]
    pub fn supports_mandatory(&self) -> bool {
        self.hashes.contains(&HASH_S256)
            && self.ciphers.contains(&CIPHER_AES1)
            && self.auth_tags.contains(&AUTH_HS32)
            && self.sas_types.contains(&SAS_B32)
    }

    #[must_use]
    pub fn supports_key_agreement(&self, code: [u8; 4]) -> bool {
        self.key_agreements.contains(&code)
    }
}

/// HelloACK and Conf2ACK have no body.
pub fn encode_ack(type_block: &[u8; 8]) -> Vec<u8> {
    finish_message(begin_message(type_block))
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Commit: H2, ZID, the chosen algorithms and the hvi (DH mode) or nonce
/// (Multistream), MACed with H1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub h2: [u8; 32],
    pub zid: [u8; 12],
    pub hash_algo: [u8; 4],
    pub cipher_algo: [u8; 4],
    pub auth_tag: [u8; 4],
    pub key_agreement: [u8; 4],
    pub sas_type: [u8; 4],
    /// hvi for DH mode; the 16-byte nonce zero-padded for Multistream.
    pub hvi: [u8; 32],
}

impl Commit {
    pub fn encode(&self, h1: &[u8; 32]) -> Vec<u8> {
        let mut out = begin_message(&MSG_COMMIT);
        out.extend_from_slice(&self.h2);
        out.extend_from_slice(&self.zid);
        out.extend_from_slice(&self.hash_algo);
        out.extend_from_slice(&self.cipher_algo);
        out.extend_from_slice(&self.auth_tag);
        out.extend_from_slice(&self.key_agreement);
        out.extend_from_slice(&self.sas_type);
        out.extend_from_slice(&self.hvi);
        append_mac(&mut out, h1);
        finish_message(out)
    }

    pub fn decode(message: &[u8]) -> Result<Self, ZrtpError> {
        let need = 12 + 32 + 12 + 5 * 4 + 32 + MSG_MAC_LEN;
        if message.len() < need {
            return Err(ZrtpError::Malformed);
        }
        let mut idx = 12usize;
        let mut h2 = [0u8; 32];
        h2.copy_from_slice(&message[idx..idx + 32]);
        idx += 32;
        let mut zid = [0u8; 12];
        zid.copy_from_slice(&message[idx..idx + 12]);
        idx += 12;

        let mut code = |at: &mut usize| -> [u8; 4] {
            let mut c = [0u8; 4];
            c.copy_from_slice(&message[*at..*at + 4]);
            *at += 4;
            c
        };
        let hash_algo = code(&mut idx);
        let cipher_algo = code(&mut idx);
        let auth_tag = code(&mut idx);
        let key_agreement = code(&mut idx);
        let sas_type = code(&mut idx);

        let mut hvi = [0u8; 32];
        hvi.copy_from_slice(&message[idx..idx + 32]);

        Ok(Self {
            h2,
            zid,
            hash_algo,
            cipher_algo,
            auth_tag,
            key_agreement,
            sas_type,
            hvi,
        })
    }
}

// ---------------------------------------------------------------------------
// DHPart1 / DHPart2
// ---------------------------------------------------------------------------

/// DHPart: H1, the retained-secret IDs, the DH public value, MACed with H0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhPart {
    pub h1: [u8; 32],
    pub rs1_id: [u8; 8],
    pub rs2_id: [u8; 8],
    pub aux_id: [u8; 8],
    pub pbx_id: [u8; 8],
    pub public_value: Vec<u8>, // DH3K_LEN bytes
}

impl DhPart {
    /// Fresh retained-secret IDs; preshared mode is unsupported so these are
    /// random and will mismatch on the remote by design of the protocol.
    pub fn fresh(h1: [u8; 32], public_value: Vec<u8>) -> Self {
        let mut id = || {
            let mut buf = [0u8; 8];
            OsRng.fill_bytes(&mut buf);
            buf
        };
        Self {
            h1,
            rs1_id: id(),
            rs2_id: id(),
            aux_id: id(),
            pbx_id: id(),
            public_value,
        }
    }

    pub fn encode(&self, part: u8, h0: &[u8; 32]) -> Vec<u8> {
        let type_block = if part == 1 { MSG_DH_PART1 } else { MSG_DH_PART2 };
        let mut out = begin_message(&type_block);
        out.extend_from_slice(&self.h1);
        out.extend_from_slice(&self.rs1_id);
        out.extend_from_slice(&self.rs2_id);
        out.extend_from_slice(&self.aux_id);
        out.extend_from_slice(&self.pbx_id);
        out.extend_from_slice(&self.public_value);
        append_mac(&mut out, h0);
        finish_message(out)
    }

    pub fn decode(message: &[u8]) -> Result<Self, ZrtpError> {
        let need = 12 + 32 + 4 * 8 + DH3K_LEN + MSG_MAC_LEN;
        if message.len() < need {
            return Err(ZrtpError::Malformed);
        }
        let mut idx = 12usize;
        let mut h1 = [0u8; 32];
        h1.copy_from_slice(&message[idx..idx + 32]);
        idx += 32;
        let mut id = || {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&message[idx..idx + 8]);
            idx += 8;
            buf
        };
        let rs1_id = id();
        let rs2_id = id();
        let aux_id = id();
        let pbx_id = id();
        let public_value = message[idx..idx + DH3K_LEN].to_vec();

        Ok(Self {
            h1,
            rs1_id,
            rs2_id,
            aux_id,
            pbx_id,
            public_value,
        })
    }
}

// ---------------------------------------------------------------------------
// Confirm1 / Confirm2
// ---------------------------------------------------------------------------

/// Length of the encrypted region: H0, sig-len, flags, cache expiration.
const CONFIRM_BODY_LEN: usize = 32 + 2 + 1 + 1 + 4;

/// Confirm: HMAC, fresh CFB IV, and the encrypted body revealing H0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirm {
    pub iv: [u8; 16],
    pub encrypted: Vec<u8>,
    pub mac: [u8; MSG_MAC_LEN],
}

impl Confirm {
    /// Build and encrypt under `zrtp_key`, authenticate with `hmac_key`.
    pub fn build(
        part: u8,
        h0: &[u8; 32],
        flags: u8,
        cache_expiration: u32,
        zrtp_key: &[u8; 16],
        hmac_key: &[u8; 32],
    ) -> Vec<u8> {
        let mut body = Vec::with_capacity(CONFIRM_BODY_LEN);
        body.extend_from_slice(h0);
        body.extend_from_slice(&0u16.to_be_bytes()); // sig len: none
        body.push(flags);
        body.push(0); // align
        body.extend_from_slice(&cache_expiration.to_be_bytes());

        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut iv);
        Aes128CfbEnc::new(zrtp_key.into(), (&iv).into()).encrypt(&mut body);

        let mac = hmac_sha256(hmac_key, &[&body]);

        let type_block = if part == 1 { MSG_CONFIRM1 } else { MSG_CONFIRM2 };
        let mut out = begin_message(&type_block);
        out.extend_from_slice(&mac[..MSG_MAC_LEN]);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        finish_message(out)
    }

    pub fn decode(message: &[u8]) -> Result<Self, ZrtpError> {
        let need = 12 + MSG_MAC_LEN + 16 + CONFIRM_BODY_LEN;
        if message.len() < need {
            return Err(ZrtpError::Malformed);
        }
        let mut mac = [0u8; MSG_MAC_LEN];
        mac.copy_from_slice(&message[12..12 + MSG_MAC_LEN]);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&message[20..36]);
        let encrypted = message[36..36 + CONFIRM_BODY_LEN].to_vec();
        Ok(Self { iv, encrypted, mac })
    }

    /// Verify the MAC and decrypt; returns (H0, flags, cache_expiration).
    pub fn open(
        &self,
        zrtp_key: &[u8; 16],
        hmac_key: &[u8; 32],
    ) -> Result<([u8; 32], u8, u32), ZrtpError> {
        let expected = hmac_sha256(hmac_key, &[&self.encrypted]);
        if expected[..MSG_MAC_LEN] != self.mac {
            return Err(ZrtpError::BadMac);
        }

        let mut body = self.encrypted.clone();
        Aes128CfbDec::new(zrtp_key.into(), (&self.iv).into()).decrypt(&mut body);

        let mut h0 = [0u8; 32];
        h0.copy_from_slice(&body[0..32]);
        let flags = body[34];
        let cache_expiration = BigEndian::read_u32(&body[36..40]);
        Ok((h0, flags, cache_expiration))
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

pub fn encode_error(code: ZrtpErrorCode) -> Vec<u8> {
    let mut out = begin_message(&MSG_ERROR);
    out.extend_from_slice(&(code as u32).to_be_bytes());
    finish_message(out)
}

pub fn decode_error(message: &[u8]) -> Result<u32, ZrtpError> {
    if message.len() < 16 {
        return Err(ZrtpError::Malformed);
    }
    Ok(BigEndian::read_u32(&message[12..16]))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::zrtp::crypto::hash_chain;

    #[test]
    fn envelope_round_trip() {
        let msg = encode_ack(&MSG_HELLO_ACK);
        let pkt = wrap_packet(7, 0xAABB_CCDD, &msg);
        let unwrapped = unwrap_packet(&pkt).unwrap();
        assert_eq!(unwrapped, &msg[..]);
        assert_eq!(message_type(unwrapped).unwrap(), MSG_HELLO_ACK);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let msg = encode_ack(&MSG_HELLO_ACK);
        let mut pkt = wrap_packet(7, 1, &msg);
        pkt[5] ^= 0xFF;
        assert!(unwrap_packet(&pkt).is_none());
    }

    #[test]
    fn hello_round_trip_and_mac() {
        let h = hash_chain();
        let hello = Hello::ours(h[3], [5u8; 12]);
        let wire = hello.encode(&h[2]);
        assert_eq!(wire.len() % 4, 0);
        assert_eq!(message_type(&wire).unwrap(), MSG_HELLO);

        let dec = Hello::decode(&wire).unwrap();
        assert_eq!(dec, hello);
        assert!(dec.supports_mandatory());
        assert!(dec.supports_key_agreement(KEY_AGREEMENT_DH3K));
        assert!(verify_mac(&wire, &h[2]));
        assert!(!verify_mac(&wire, &h[1]));
    }

    #[test]
    fn commit_round_trip() {
        let h = hash_chain();
        let commit = Commit {
            h2: h[2],
            zid: [9u8; 12],
            hash_algo: HASH_S256,
            cipher_algo: CIPHER_AES1,
            auth_tag: AUTH_HS80,
            key_agreement: KEY_AGREEMENT_DH3K,
            sas_type: SAS_B32,
            hvi: [0x42u8; 32],
        };
        let wire = commit.encode(&h[1]);
        let dec = Commit::decode(&wire).unwrap();
        assert_eq!(dec, commit);
        assert!(verify_mac(&wire, &h[1]));
    }

    #[test]
    fn dh_part_round_trip() {
        let h = hash_chain();
        let part = DhPart::fresh(h[1], vec![0x11u8; DH3K_LEN]);
        let wire = part.encode(2, &h[0]);
        assert_eq!(message_type(&wire).unwrap(), MSG_DH_PART2);
        let dec = DhPart::decode(&wire).unwrap();
        assert_eq!(dec, part);
        assert!(verify_mac(&wire, &h[0]));
    }

    #[test]
    fn confirm_round_trip_and_tamper() {
        let h0 = [7u8; 32];
        let key = [1u8; 16];
        let hmac_key = [2u8; 32];
        let wire = Confirm::build(1, &h0, 0x01, 3600, &key, &hmac_key);
        assert_eq!(message_type(&wire).unwrap(), MSG_CONFIRM1);

        let dec = Confirm::decode(&wire).unwrap();
        let (got_h0, flags, exp) = dec.open(&key, &hmac_key).unwrap();
        assert_eq!(got_h0, h0);
        assert_eq!(flags, 0x01);
        assert_eq!(exp, 3600);

        // Flip one ciphertext byte.
        let mut bad = dec.clone();
        bad.encrypted[3] ^= 1;
        assert_eq!(bad.open(&key, &hmac_key).unwrap_err(), ZrtpError::BadMac);
    }

    #[test]
    fn error_round_trip() {
        let wire = encode_error(ZrtpErrorCode::BadConfirmMac);
        assert_eq!(message_type(&wire).unwrap(), MSG_ERROR);
        assert_eq!(decode_error(&wire).unwrap(), 0x70);
    }
}
