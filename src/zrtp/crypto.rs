//! ZRTP cryptographic primitives: the H0..H3 hash chain, the RFC 6189 KDF,
//! s0 derivation and the DH3k (RFC 3526 3072-bit MODP) exchange.

use hmac::{Hmac, Mac};
use openssl::bn::{BigNum, BigNumContext};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use super::ZrtpError;

type HmacSha256 = Hmac<Sha256>;

/// DH3k public value / shared secret length in bytes.
pub const DH3K_LEN: usize = 384;

/// RFC 3526 §4, the 3072-bit MODP group prime. Generator is 2.
const MODP_3072_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);

/// One side of the Diffie-Hellman exchange.
pub struct DhKeyPair {
    private: BigNum,
    public: [u8; DH3K_LEN],
}

impl DhKeyPair {
    /// Generate a fresh keypair with a 512-bit random exponent.
    pub fn generate() -> Result<Self, ZrtpError> {
        let p = BigNum::from_hex_str(MODP_3072_PRIME_HEX).map_err(|_| ZrtpError::Crypto)?;
        let g = BigNum::from_u32(2).map_err(|_| ZrtpError::Crypto)?;

        let mut exponent = [0u8; 64];
        OsRng.fill_bytes(&mut exponent);
        let private = BigNum::from_slice(&exponent).map_err(|_| ZrtpError::Crypto)?;

        let mut public = BigNum::new().map_err(|_| ZrtpError::Crypto)?;
        let mut ctx = BigNumContext::new().map_err(|_| ZrtpError::Crypto)?;
        public
            .mod_exp(&g, &private, &p, &mut ctx)
            .map_err(|_| ZrtpError::Crypto)?;

        let padded = public
            .to_vec_padded(DH3K_LEN as i32)
            .map_err(|_| ZrtpError::Crypto)?;
        let mut pk = [0u8; DH3K_LEN];
        pk.copy_from_slice(&padded);

        Ok(Self { private, public: pk })
    }

    #[must_use]
    pub fn public_bytes(&self) -> &[u8; DH3K_LEN] {
        &self.public
    }

    /// `DHResult = peer_pub ^ private mod p`, left-padded to 384 bytes.
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<Vec<u8>, ZrtpError> {
        let p = BigNum::from_hex_str(MODP_3072_PRIME_HEX).map_err(|_| ZrtpError::Crypto)?;
        let peer = BigNum::from_slice(peer_public).map_err(|_| ZrtpError::Crypto)?;

        // Reject the degenerate public values 0, 1 and p-1.
        let one = BigNum::from_u32(1).map_err(|_| ZrtpError::Crypto)?;
        let mut p_minus_1 = BigNum::new().map_err(|_| ZrtpError::Crypto)?;
        p_minus_1
            .checked_sub(&p, &one)
            .map_err(|_| ZrtpError::Crypto)?;
        if peer.num_bits() <= 1 || peer == p_minus_1 || peer >= p {
            return Err(ZrtpError::BadPublicValue);
        }

        let mut result = BigNum::new().map_err(|_| ZrtpError::Crypto)?;
        let mut ctx = BigNumContext::new().map_err(|_| ZrtpError::Crypto)?;
        result
            .mod_exp(&peer, &self.private, &p, &mut ctx)
            .map_err(|_| ZrtpError::Crypto)?;
        result
            .to_vec_padded(DH3K_LEN as i32)
            .map_err(|_| ZrtpError::Crypto)
    }
}

/// The chained session hashes: `H0` random, `H(i+1) = SHA256(H(i))`.
/// Returned as `[H0, H1, H2, H3]`.
#[must_use]
pub fn hash_chain() -> [[u8; 32]; 4] {
    let mut h = [[0u8; 32]; 4];
    OsRng.fill_bytes(&mut h[0]);
    for i in 1..4 {
        h[i] = sha256(&[&h[i - 1]]);
    }
    h
}

#[must_use]
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}

#[must_use]
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => return [0u8; 32],
    };
    for p in parts {
        mac.update(p);
    }
    mac.finalize().into_bytes().into()
}

/// The RFC 6189 §4.5.1 KDF:
/// `HMAC(KI, be32(1) || label || 0x00 || context || be32(L))`, truncated to
/// `out_len` bytes.
#[must_use]
pub fn kdf(key: &[u8], label: &str, context: &[u8], out_len: usize) -> Vec<u8> {
    let full = hmac_sha256(
        key,
        &[
            &1u32.to_be_bytes(),
            label.as_bytes(),
            &[0u8],
            context,
            &((out_len as u32) * 8).to_be_bytes(),
        ],
    );
    full[..out_len.min(32)].to_vec()
}

/// s0 for DH mode, per RFC 6189 §4.4.1.4 with no shared secrets:
/// `SHA256(be32(1) || DHResult || "ZRTP-HMAC-KDF" || ZIDi || ZIDr ||
/// total_hash || be32(0) * 3)`.
#[must_use]
pub fn derive_s0_dh(dh_result: &[u8], total_hash: &[u8; 32], zid_i: &[u8; 12], zid_r: &[u8; 12]) -> [u8; 32] {
    sha256(&[
        &1u32.to_be_bytes(),
        dh_result,
        b"ZRTP-HMAC-KDF",
        zid_i,
        zid_r,
        total_hash,
        &0u32.to_be_bytes(),
        &0u32.to_be_bytes(),
        &0u32.to_be_bytes(),
    ])
}

/// Per-stream s0 for Multistream mode: derived from the DH session's
/// `zrtp_session_key` instead of a fresh DH result.
#[must_use]
pub fn derive_s0_multistream(
    session_key: &[u8; 32],
    total_hash: &[u8; 32],
    zid_i: &[u8; 12],
    zid_r: &[u8; 12],
) -> [u8; 32] {
    let mut context = Vec::with_capacity(12 + 12 + 32);
    context.extend_from_slice(zid_i);
    context.extend_from_slice(zid_r);
    context.extend_from_slice(total_hash);
    let out = kdf(session_key, "ZRTP MSK", &context, 32);
    let mut s0 = [0u8; 32];
    s0.copy_from_slice(&out);
    s0
}

/// Everything derived from s0 for one stream.
pub struct KeyMaterial {
    pub session_key: [u8; 32],
    pub sas_hash: [u8; 32],
    pub zrtp_key_i: [u8; 16],
    pub zrtp_key_r: [u8; 16],
    pub hmac_key_i: [u8; 32],
    pub hmac_key_r: [u8; 32],
    pub srtp_key_i: Vec<u8>,
    pub srtp_key_r: Vec<u8>,
    pub srtp_salt_i: [u8; 14],
    pub srtp_salt_r: [u8; 14],
}

/// Expand s0 through the ASCII-labelled KDF invocations of RFC 6189 §4.5.3.
#[must_use]
pub fn derive_key_material(
    s0: &[u8; 32],
    zid_i: &[u8; 12],
    zid_r: &[u8; 12],
    total_hash: &[u8; 32],
    srtp_key_len: usize,
) -> KeyMaterial {
    let mut context = Vec::with_capacity(12 + 12 + 32);
    context.extend_from_slice(zid_i);
    context.extend_from_slice(zid_r);
    context.extend_from_slice(total_hash);

    let take32 = |label: &str| -> [u8; 32] {
        let v = kdf(s0, label, &context, 32);
        let mut out = [0u8; 32];
        out.copy_from_slice(&v);
        out
    };
    let take16 = |label: &str| -> [u8; 16] {
        let v = kdf(s0, label, &context, 16);
        let mut out = [0u8; 16];
        out.copy_from_slice(&v);
        out
    };
    let take14 = |label: &str| -> [u8; 14] {
        let v = kdf(s0, label, &context, 14);
        let mut out = [0u8; 14];
        out.copy_from_slice(&v);
        out
    };

    KeyMaterial {
        session_key: take32("ZRTP Session Key"),
        sas_hash: take32("SAS"),
        zrtp_key_i: take16("Initiator ZRTP key"),
        zrtp_key_r: take16("Responder ZRTP key"),
        hmac_key_i: take32("Initiator HMAC key"),
        hmac_key_r: take32("Responder HMAC key"),
        srtp_key_i: kdf(s0, "Initiator SRTP master key", &context, srtp_key_len),
        srtp_key_r: kdf(s0, "Responder SRTP master key", &context, srtp_key_len),
        srtp_salt_i: take14("Initiator SRTP master salt"),
        srtp_salt_r: take14("Responder SRTP master salt"),
    }
}

/// Render the B32 short authentication string: the top 20 bits of the SAS
/// hash as four base-32 characters (RFC 6189 §5.1.6 alphabet).
#[must_use]
pub fn sas_b32(sas_hash: &[u8; 32]) -> String {
    const ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";
    let bits = (u32::from(sas_hash[0]) << 12)
        | (u32::from(sas_hash[1]) << 4)
        | (u32::from(sas_hash[2]) >> 4);
    (0..4)
        .map(|i| ALPHABET[((bits >> (15 - 5 * i)) & 0x1F) as usize] as char)
        .collect()
}
