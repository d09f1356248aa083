//! ZRTP key agreement per RFC 6189: the blocking state machine
//! Idle → HelloSent → HelloAcked → Committed → DHExchange → Confirmed →
//! SecureEstablished, in Diffie-Hellman or Multistream mode.
//!
//! The engine sends over the stream's UDP endpoint and receives the
//! datagrams the reception flow's ZRTP handler forwards through an mpsc
//! channel; `negotiate` blocks the calling thread until the exchange
//! terminates or the retry budget runs out.

pub mod crypto;
pub mod messages;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use rand::{RngCore, rngs::OsRng};

use crate::error::RtpError;
use crate::log::LogSink;
use crate::net::socket::UdpEndpoint;
use crate::{sink_debug, sink_info, sink_warn};

use crypto::{
    DhKeyPair, derive_key_material, derive_s0_dh, derive_s0_multistream, hash_chain, sha256,
};
use messages::{
    Commit, Confirm, DhPart, Hello, KEY_AGREEMENT_DH3K, KEY_AGREEMENT_MULT, MSG_COMMIT,
    MSG_CONF2_ACK, MSG_CONFIRM1, MSG_CONFIRM2, MSG_DH_PART1, MSG_DH_PART2, MSG_ERROR, MSG_HELLO,
    MSG_HELLO_ACK, ZrtpErrorCode, encode_ack, encode_error, message_type, unwrap_packet,
    verify_mac, wrap_packet,
};

/// Cookie marking a datagram as ZRTP ("ZRTP" in ASCII).
pub const ZRTP_MAGIC_COOKIE: u32 = 0x5A52_5450;

/// T1 (Hello) retransmission: 50 ms doubling to 1.2 s, at most 20 sends.
const T1_INITIAL: Duration = Duration::from_millis(50);
const T1_RETRIES: usize = 20;
/// T2 (Commit and later) retransmission: 150 ms doubling to 1.2 s, 10 sends.
const T2_INITIAL: Duration = Duration::from_millis(150);
const T2_RETRIES: usize = 10;
const RTO_CAP: Duration = Duration::from_millis(1200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZrtpError {
    Timeout,
    Malformed,
    BadMac,
    BadPublicValue,
    Unsupported,
    Crypto,
    PeerError(u32),
    ChannelClosed,
}

impl fmt::Display for ZrtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ZrtpError::*;
        match self {
            Timeout => write!(f, "negotiation timed out"),
            Malformed => write!(f, "malformed message"),
            BadMac => write!(f, "MAC or hash chain mismatch"),
            BadPublicValue => write!(f, "degenerate DH public value"),
            Unsupported => write!(f, "no common algorithm set"),
            Crypto => write!(f, "crypto backend failure"),
            PeerError(code) => write!(f, "peer reported error {code:#x}"),
            ChannelClosed => write!(f, "reception flow went away"),
        }
    }
}

impl std::error::Error for ZrtpError {}

impl From<ZrtpError> for RtpError {
    fn from(e: ZrtpError) -> Self {
        match e {
            ZrtpError::Timeout => RtpError::Timeout,
            ZrtpError::BadMac | ZrtpError::BadPublicValue => RtpError::AuthTagMismatch,
            ZrtpError::Unsupported | ZrtpError::PeerError(_) => RtpError::NotSupported,
            ZrtpError::Malformed => RtpError::InvalidValue,
            ZrtpError::Crypto | ZrtpError::ChannelClosed => RtpError::Generic,
        }
    }
}

/// Negotiation mode for one stream.
pub enum ZrtpMode {
    DiffieHellman,
    /// Reuse the ZRTP session key of an established DH-mode stream.
    Multistream { session_key: [u8; 32] },
}

/// The agreed keying material handed to SRTP.
pub struct ZrtpKeys {
    pub tx_key: Vec<u8>,
    pub tx_salt: [u8; 14],
    pub rx_key: Vec<u8>,
    pub rx_salt: [u8; 14],
    /// Short authentication string for out-of-band verification.
    pub sas: String,
    /// Session key reusable by Multistream-mode streams.
    pub session_key: [u8; 32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    HelloSent,
    HelloAcked,
    Committed,
    DhExchange,
    Confirmed,
    SecureEstablished,
}

enum CommitOutcome {
    /// We are the initiator; the responder's first answer is carried along
    /// (DHPart1 in DH mode, Confirm1 in Multistream).
    Initiator([u8; 8], Vec<u8>),
    /// We lost contention; the peer's Commit is carried along.
    Responder(Vec<u8>),
}

pub struct ZrtpSession {
    endpoint: Arc<UdpEndpoint>,
    dest: SocketAddr,
    rx: Receiver<Vec<u8>>,
    ssrc: u32,
    seq: u16,
    srtp_key_len: usize,
    logger: Arc<dyn LogSink>,

    state: State,
    zid: [u8; 12],
    hashes: [[u8; 32]; 4], // H0..H3
    our_hello: Vec<u8>,
    peer_hello_raw: Vec<u8>,
    peer_hello: Option<Hello>,
    stashed: Vec<([u8; 8], Vec<u8>)>,
}

impl ZrtpSession {
    pub fn new(
        endpoint: Arc<UdpEndpoint>,
        dest: SocketAddr,
        rx: Receiver<Vec<u8>>,
        ssrc: u32,
        srtp_key_len: usize,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        let hashes = hash_chain();
        let mut zid = [0u8; 12];
        OsRng.fill_bytes(&mut zid);
        let our_hello = Hello::ours(hashes[3], zid).encode(&hashes[2]);
        Self {
            endpoint,
            dest,
            rx,
            ssrc,
            seq: 0,
            srtp_key_len,
            logger,
            state: State::Idle,
            zid,
            hashes,
            our_hello,
            peer_hello_raw: Vec::new(),
            peer_hello: None,
            stashed: Vec::new(),
        }
    }

    /// Run the exchange to completion. Consumes the session; a failed
    /// negotiation fails stream creation.
    pub fn negotiate(mut self, mode: ZrtpMode) -> Result<ZrtpKeys, ZrtpError> {
        let result = match mode {
            ZrtpMode::DiffieHellman => self.run_dh(),
            ZrtpMode::Multistream { session_key } => self.run_multistream(session_key),
        };
        match &result {
            Ok(keys) => {
                self.state = State::SecureEstablished;
                sink_info!(self.logger, "[zrtp] secure (SAS \"{}\")", keys.sas);
            }
            Err(e) => sink_warn!(
                self.logger,
                "[zrtp] negotiation failed in {:?}: {e}",
                self.state
            ),
        }
        result
    }

    // -- transport helpers --------------------------------------------------

    fn send_msg(&mut self, message: &[u8]) {
        self.seq = self.seq.wrapping_add(1);
        let packet = wrap_packet(self.seq, self.ssrc, message);
        if let Err(e) = self.endpoint.send_one_to(packet, self.dest) {
            sink_warn!(self.logger, "[zrtp] send failed: {e}");
        }
    }

    fn fail(&mut self, code: ZrtpErrorCode, err: ZrtpError) -> ZrtpError {
        let msg = encode_error(code);
        self.send_msg(&msg);
        err
    }

    /// Next valid message before `deadline`, draining the channel.
    fn recv_until(&mut self, deadline: Instant) -> Option<([u8; 8], Vec<u8>)> {
        if let Some(stashed) = self.stashed.pop() {
            return Some(stashed);
        }
        loop {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            match self.rx.recv_timeout(deadline - now) {
                Ok(packet) => {
                    if let Some(message) = unwrap_packet(&packet)
                        && let Some(t) = message_type(message)
                    {
                        return Some((t, message.to_vec()));
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => return None,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Retransmit `out` until one of `accept` arrives. Answers stray Hellos,
    /// surfaces peer Errors.
    fn request(
        &mut self,
        out: Vec<u8>,
        accept: &[[u8; 8]],
        tries: usize,
        initial_rto: Duration,
    ) -> Result<([u8; 8], Vec<u8>), ZrtpError> {
        let mut rto = initial_rto;
        for _ in 0..tries {
            self.send_msg(&out);
            let deadline = Instant::now() + rto;
            while let Some((t, msg)) = self.recv_until(deadline) {
                if accept.contains(&t) {
                    return Ok((t, msg));
                }
                match t {
                    MSG_HELLO => self.send_msg(&encode_ack(&MSG_HELLO_ACK)),
                    MSG_ERROR => {
                        let code = messages::decode_error(&msg).unwrap_or(0);
                        return Err(ZrtpError::PeerError(code));
                    }
                    _ => {}
                }
            }
            rto = (rto * 2).min(RTO_CAP);
        }
        Err(ZrtpError::Timeout)
    }

    // -- phase 1: Hello ----------------------------------------------------

    fn exchange_hello(&mut self) -> Result<(), ZrtpError> {
        self.state = State::HelloSent;
        let our_hello = self.our_hello.clone();
        let mut rto = T1_INITIAL;
        let mut hello_acked = false;

        for _ in 0..T1_RETRIES {
            self.send_msg(&our_hello);
            let deadline = Instant::now() + rto;
            while let Some((t, msg)) = self.recv_until(deadline) {
                match t {
                    MSG_HELLO => {
                        self.send_msg(&encode_ack(&MSG_HELLO_ACK));
                        if self.peer_hello.is_none() {
                            let hello = Hello::decode(&msg)?;
                            if hello.version != messages::ZRTP_VERSION {
                                return Err(self.fail(
                                    ZrtpErrorCode::UnsupportedVersion,
                                    ZrtpError::Unsupported,
                                ));
                            }
                            self.peer_hello_raw = msg;
                            self.peer_hello = Some(hello);
                        }
                    }
                    MSG_HELLO_ACK => hello_acked = true,
                    MSG_COMMIT => {
                        // Peer moved on, which also acknowledges our Hello.
                        hello_acked = true;
                        self.stashed.push((t, msg));
                    }
                    MSG_ERROR => {
                        let code = messages::decode_error(&msg).unwrap_or(0);
                        return Err(ZrtpError::PeerError(code));
                    }
                    _ => {}
                }
                if hello_acked && self.peer_hello.is_some() {
                    self.state = State::HelloAcked;
                    sink_debug!(self.logger, "[zrtp] hello exchange complete");
                    return Ok(());
                }
            }
            rto = (rto * 2).min(RTO_CAP);
        }
        Err(ZrtpError::Timeout)
    }

    fn peer_hello(&self) -> Result<&Hello, ZrtpError> {
        self.peer_hello.as_ref().ok_or(ZrtpError::Timeout)
    }

    // -- phase 2: Commit contention ----------------------------------------

    /// Send our Commit until the peer either concedes (answers with the
    /// message initiators get) or wins contention with a higher hvi/nonce.
    fn commit_phase(
        &mut self,
        commit_wire: Vec<u8>,
        our_hvi: &[u8; 32],
        initiator_answer: &[[u8; 8]],
    ) -> Result<CommitOutcome, ZrtpError> {
        self.state = State::Committed;
        let mut rto = T2_INITIAL;
        for _ in 0..T2_RETRIES {
            self.send_msg(&commit_wire);
            let deadline = Instant::now() + rto;
            while let Some((t, msg)) = self.recv_until(deadline) {
                if initiator_answer.contains(&t) {
                    return Ok(CommitOutcome::Initiator(t, msg));
                }
                match t {
                    MSG_HELLO => self.send_msg(&encode_ack(&MSG_HELLO_ACK)),
                    MSG_COMMIT => {
                        let theirs = Commit::decode(&msg)?;
                        // The larger hvi (nonce in Multistream) initiates.
                        if hvi_wins(&theirs.hvi, our_hvi) {
                            return Ok(CommitOutcome::Responder(msg));
                        }
                    }
                    MSG_ERROR => {
                        let code = messages::decode_error(&msg).unwrap_or(0);
                        return Err(ZrtpError::PeerError(code));
                    }
                    _ => {}
                }
            }
            rto = (rto * 2).min(RTO_CAP);
        }
        Err(ZrtpError::Timeout)
    }

    // -- DH mode -----------------------------------------------------------

    fn run_dh(&mut self) -> Result<ZrtpKeys, ZrtpError> {
        let dh = DhKeyPair::generate()?;
        let [h0, h1, h2, _h3] = self.hashes;

        // DHPart2 exists up front: its bytes feed the hvi in our Commit.
        let our_dhpart = DhPart::fresh(h1, dh.public_bytes().to_vec());
        let dhpart2_wire = our_dhpart.encode(2, &h0);
        let dhpart1_wire = our_dhpart.encode(1, &h0);

        self.exchange_hello()?;
        {
            let peer = self.peer_hello()?;
            if !peer.supports_mandatory() || !peer.supports_key_agreement(KEY_AGREEMENT_DH3K) {
                return Err(self.fail(
                    ZrtpErrorCode::HelloComponentMismatch,
                    ZrtpError::Unsupported,
                ));
            }
        }

        let hvi = sha256(&[&dhpart2_wire, &self.peer_hello_raw]);
        let commit = Commit {
            h2,
            zid: self.zid,
            hash_algo: messages::HASH_S256,
            cipher_algo: messages::CIPHER_AES1,
            auth_tag: messages::AUTH_HS80,
            key_agreement: KEY_AGREEMENT_DH3K,
            sas_type: messages::SAS_B32,
            hvi,
        };
        let commit_wire = commit.encode(&h1);

        match self.commit_phase(commit_wire.clone(), &hvi, &[MSG_DH_PART1])? {
            CommitOutcome::Initiator(_, dhpart1_raw) => {
                self.initiator_dh(&dh, &our_dhpart, dhpart2_wire, commit_wire, dhpart1_raw)
            }
            CommitOutcome::Responder(peer_commit_raw) => {
                self.responder_dh(&dh, dhpart1_wire, peer_commit_raw)
            }
        }
    }

    fn initiator_dh(
        &mut self,
        dh: &DhKeyPair,
        _our_dhpart: &DhPart,
        dhpart2_wire: Vec<u8>,
        commit_wire: Vec<u8>,
        dhpart1_raw: Vec<u8>,
    ) -> Result<ZrtpKeys, ZrtpError> {
        self.state = State::DhExchange;
        let peer_dh = DhPart::decode(&dhpart1_raw)?;

        // Chain check: the responder's H1 must hash up to its Hello's H3,
        // and H2 = SHA256(H1) must validate the Hello MAC.
        let peer_h2 = sha256(&[&peer_dh.h1]);
        let peer_h3 = sha256(&[&peer_h2]);
        let hello_ok = {
            let peer_hello = self.peer_hello()?;
            peer_h3 == peer_hello.h3 && verify_mac(&self.peer_hello_raw, &peer_h2)
        };
        if !hello_ok {
            return Err(self.fail(ZrtpErrorCode::MalformedPacket, ZrtpError::BadMac));
        }

        let dh_result = dh.shared_secret(&peer_dh.public_value)?;
        let total_hash = sha256(&[
            &self.peer_hello_raw,
            &commit_wire,
            &dhpart1_raw,
            &dhpart2_wire,
        ]);
        let peer_zid = self.peer_hello()?.zid;
        let s0 = derive_s0_dh(&dh_result, &total_hash, &self.zid, &peer_zid);
        let keys = derive_key_material(&s0, &self.zid, &peer_zid, &total_hash, self.srtp_key_len);

        // DHPart2 until Confirm1 answers.
        let (_, confirm1_raw) =
            self.request(dhpart2_wire, &[MSG_CONFIRM1], T2_RETRIES, T2_INITIAL)?;
        let confirm1 = Confirm::decode(&confirm1_raw)?;
        let (peer_h0, _flags, _exp) = confirm1
            .open(&keys.zrtp_key_r, &keys.hmac_key_r)
            .map_err(|e| self.fail(ZrtpErrorCode::BadConfirmMac, e))?;
        // H0 closes the chain and keys the DHPart1 MAC retroactively.
        if sha256(&[&peer_h0]) != peer_dh.h1 || !verify_mac(&dhpart1_raw, &peer_h0) {
            return Err(self.fail(ZrtpErrorCode::BadConfirmMac, ZrtpError::BadMac));
        }
        self.state = State::Confirmed;

        let confirm2 = Confirm::build(2, &self.hashes[0], 0, 0, &keys.zrtp_key_i, &keys.hmac_key_i);
        self.request(confirm2, &[MSG_CONF2_ACK], T2_RETRIES, T2_INITIAL)?;

        Ok(ZrtpKeys {
            tx_key: keys.srtp_key_i,
            tx_salt: keys.srtp_salt_i,
            rx_key: keys.srtp_key_r,
            rx_salt: keys.srtp_salt_r,
            sas: crypto::sas_b32(&keys.sas_hash),
            session_key: keys.session_key,
        })
    }

    fn responder_dh(
        &mut self,
        dh: &DhKeyPair,
        dhpart1_wire: Vec<u8>,
        peer_commit_raw: Vec<u8>,
    ) -> Result<ZrtpKeys, ZrtpError> {
        self.state = State::DhExchange;
        let peer_commit = Commit::decode(&peer_commit_raw)?;
        if peer_commit.key_agreement != KEY_AGREEMENT_DH3K {
            return Err(self.fail(
                ZrtpErrorCode::HelloComponentMismatch,
                ZrtpError::Unsupported,
            ));
        }

        // Commit reveals H2: validate the peer Hello now.
        let hello_ok = {
            let peer_hello = self.peer_hello()?;
            sha256(&[&peer_commit.h2]) == peer_hello.h3
                && verify_mac(&self.peer_hello_raw, &peer_commit.h2)
        };
        if !hello_ok {
            return Err(self.fail(ZrtpErrorCode::MalformedPacket, ZrtpError::BadMac));
        }

        // DHPart1 until DHPart2 answers.
        let (_, dhpart2_raw) =
            self.request(dhpart1_wire.clone(), &[MSG_DH_PART2], T2_RETRIES, T2_INITIAL)?;
        let peer_dh = DhPart::decode(&dhpart2_raw)?;

        // H1 revealed: check the Commit chain and MAC.
        if sha256(&[&peer_dh.h1]) != peer_commit.h2 || !verify_mac(&peer_commit_raw, &peer_dh.h1) {
            return Err(self.fail(ZrtpErrorCode::MalformedPacket, ZrtpError::BadMac));
        }
        // And the commitment: hvi = SHA256(DHPart2 || our Hello).
        let our_hello = self.our_hello.clone();
        if sha256(&[&dhpart2_raw, &our_hello]) != peer_commit.hvi {
            return Err(self.fail(ZrtpErrorCode::HviMismatch, ZrtpError::BadMac));
        }

        let dh_result = dh.shared_secret(&peer_dh.public_value)?;
        let total_hash = sha256(&[&our_hello, &peer_commit_raw, &dhpart1_wire, &dhpart2_raw]);
        let peer_zid = peer_commit.zid;
        let s0 = derive_s0_dh(&dh_result, &total_hash, &peer_zid, &self.zid);
        let keys = derive_key_material(&s0, &peer_zid, &self.zid, &total_hash, self.srtp_key_len);

        self.finish_as_responder(&keys, Some((peer_dh.h1, dhpart2_raw)))?;

        Ok(ZrtpKeys {
            tx_key: keys.srtp_key_r,
            tx_salt: keys.srtp_salt_r,
            rx_key: keys.srtp_key_i,
            rx_salt: keys.srtp_salt_i,
            sas: crypto::sas_b32(&keys.sas_hash),
            session_key: keys.session_key,
        })
    }

    /// Confirm1 until Confirm2 arrives, verify it, then Conf2ACK.
    fn finish_as_responder(
        &mut self,
        keys: &crypto::KeyMaterial,
        peer_dh_evidence: Option<([u8; 32], Vec<u8>)>,
    ) -> Result<(), ZrtpError> {
        let confirm1 = Confirm::build(1, &self.hashes[0], 0, 0, &keys.zrtp_key_r, &keys.hmac_key_r);
        let (_, confirm2_raw) = self.request(confirm1, &[MSG_CONFIRM2], T2_RETRIES, T2_INITIAL)?;
        let confirm2 = Confirm::decode(&confirm2_raw)?;
        let (peer_h0, _flags, _exp) = confirm2
            .open(&keys.zrtp_key_i, &keys.hmac_key_i)
            .map_err(|e| self.fail(ZrtpErrorCode::BadConfirmMac, e))?;

        let chain_ok = match &peer_dh_evidence {
            // DH mode: H1 came in DHPart2, whose MAC H0 now keys.
            Some((h1, dhpart2_raw)) => {
                sha256(&[&peer_h0]) == *h1 && verify_mac(dhpart2_raw, &peer_h0)
            }
            // Multistream: walk all the way up to the Hello's H3.
            None => {
                let h1 = sha256(&[&peer_h0]);
                let h2 = sha256(&[&h1]);
                let h3 = sha256(&[&h2]);
                let peer_hello = self.peer_hello()?;
                h3 == peer_hello.h3 && verify_mac(&self.peer_hello_raw, &h2)
            }
        };
        if !chain_ok {
            return Err(self.fail(ZrtpErrorCode::BadConfirmMac, ZrtpError::BadMac));
        }
        self.state = State::Confirmed;

        // Conf2ACK, re-sent while the peer keeps retrying Confirm2.
        let ack = encode_ack(&MSG_CONF2_ACK);
        for _ in 0..3 {
            self.send_msg(&ack);
            let deadline = Instant::now() + Duration::from_millis(200);
            match self.recv_until(deadline) {
                Some((MSG_CONFIRM2, _)) => continue,
                _ => break,
            }
        }
        Ok(())
    }

    // -- Multistream mode ---------------------------------------------------

    fn run_multistream(&mut self, session_key: [u8; 32]) -> Result<ZrtpKeys, ZrtpError> {
        let [_h0, h1, h2, _h3] = self.hashes;

        self.exchange_hello()?;
        {
            let peer = self.peer_hello()?;
            if !peer.supports_mandatory() || !peer.supports_key_agreement(KEY_AGREEMENT_MULT) {
                return Err(self.fail(
                    ZrtpErrorCode::HelloComponentMismatch,
                    ZrtpError::Unsupported,
                ));
            }
        }

        // Contention field is a fresh nonce instead of an hvi.
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce[..16]);
        let commit = Commit {
            h2,
            zid: self.zid,
            hash_algo: messages::HASH_S256,
            cipher_algo: messages::CIPHER_AES1,
            auth_tag: messages::AUTH_HS80,
            key_agreement: KEY_AGREEMENT_MULT,
            sas_type: messages::SAS_B32,
            hvi: nonce,
        };
        let commit_wire = commit.encode(&h1);

        match self.commit_phase(commit_wire.clone(), &nonce, &[MSG_CONFIRM1])? {
            CommitOutcome::Initiator(_, confirm1_raw) => {
                self.initiator_multistream(session_key, commit_wire, confirm1_raw)
            }
            CommitOutcome::Responder(peer_commit_raw) => {
                self.responder_multistream(session_key, peer_commit_raw)
            }
        }
    }

    fn initiator_multistream(
        &mut self,
        session_key: [u8; 32],
        commit_wire: Vec<u8>,
        confirm1_raw: Vec<u8>,
    ) -> Result<ZrtpKeys, ZrtpError> {
        self.state = State::DhExchange;
        let total_hash = sha256(&[&self.peer_hello_raw, &commit_wire]);
        let peer_zid = self.peer_hello()?.zid;
        let s0 = derive_s0_multistream(&session_key, &total_hash, &self.zid, &peer_zid);
        let keys = derive_key_material(&s0, &self.zid, &peer_zid, &total_hash, self.srtp_key_len);

        let confirm1 = Confirm::decode(&confirm1_raw)?;
        let (peer_h0, _flags, _exp) = confirm1
            .open(&keys.zrtp_key_r, &keys.hmac_key_r)
            .map_err(|e| self.fail(ZrtpErrorCode::BadConfirmMac, e))?;
        // No DHPart revealed H1; walk the chain to the Hello.
        let h1 = sha256(&[&peer_h0]);
        let h2 = sha256(&[&h1]);
        let hello_ok = {
            let peer_hello = self.peer_hello()?;
            sha256(&[&h2]) == peer_hello.h3 && verify_mac(&self.peer_hello_raw, &h2)
        };
        if !hello_ok {
            return Err(self.fail(ZrtpErrorCode::BadConfirmMac, ZrtpError::BadMac));
        }
        self.state = State::Confirmed;

        let confirm2 = Confirm::build(2, &self.hashes[0], 0, 0, &keys.zrtp_key_i, &keys.hmac_key_i);
        self.request(confirm2, &[MSG_CONF2_ACK], T2_RETRIES, T2_INITIAL)?;

        Ok(ZrtpKeys {
            tx_key: keys.srtp_key_i,
            tx_salt: keys.srtp_salt_i,
            rx_key: keys.srtp_key_r,
            rx_salt: keys.srtp_salt_r,
            sas: crypto::sas_b32(&keys.sas_hash),
            session_key: keys.session_key,
        })
    }

    fn responder_multistream(
        &mut self,
        session_key: [u8; 32],
        peer_commit_raw: Vec<u8>,
    ) -> Result<ZrtpKeys, ZrtpError> {
        self.state = State::DhExchange;
        let peer_commit = Commit::decode(&peer_commit_raw)?;
        if peer_commit.key_agreement != KEY_AGREEMENT_MULT {
            return Err(self.fail(
                ZrtpErrorCode::HelloComponentMismatch,
                ZrtpError::Unsupported,
            ));
        }
        let hello_ok = {
            let peer_hello = self.peer_hello()?;
            sha256(&[&peer_commit.h2]) == peer_hello.h3
                && verify_mac(&self.peer_hello_raw, &peer_commit.h2)
        };
        if !hello_ok {
            return Err(self.fail(ZrtpErrorCode::MalformedPacket, ZrtpError::BadMac));
        }

        let our_hello = self.our_hello.clone();
        let total_hash = sha256(&[&our_hello, &peer_commit_raw]);
        let peer_zid = peer_commit.zid;
        let s0 = derive_s0_multistream(&session_key, &total_hash, &peer_zid, &self.zid);
        let keys = derive_key_material(&s0, &peer_zid, &self.zid, &total_hash, self.srtp_key_len);

        self.finish_as_responder(&keys, None)?;

        Ok(ZrtpKeys {
            tx_key: keys.srtp_key_r,
            tx_salt: keys.srtp_salt_r,
            rx_key: keys.srtp_key_i,
            rx_salt: keys.srtp_salt_i,
            sas: crypto::sas_b32(&keys.sas_hash),
            session_key: keys.session_key,
        })
    }
}

/// Byte-lexicographic comparison from the most significant byte; the larger
/// value initiates. A byte-identical tie (impossible between honest peers)
/// resolves in our favor.
fn hvi_wins(theirs: &[u8; 32], ours: &[u8; 32]) -> bool {
    for i in 0..32 {
        if theirs[i] > ours[i] {
            return true;
        }
        if theirs[i] < ours[i] {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::log::NoopLogSink;
    use crate::net::socket::RecvStatus;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn hvi_comparison_is_msb_first() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 1;
        assert!(!hvi_wins(&b, &a));
        assert!(hvi_wins(&a, &b));
        b[0] = 1;
        b[31] = 1;
        assert!(hvi_wins(&b, &a));
        assert!(!hvi_wins(&a, &a)); // tie resolves in our favor
    }

    /// Pump every datagram a socket receives into a ZRTP channel,
    /// standing in for the reception flow.
    fn pump(endpoint: Arc<UdpEndpoint>, tx: mpsc::Sender<Vec<u8>>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut buf = [0u8; 2048];
            loop {
                match endpoint.recv_with_deadline(&mut buf, Duration::from_millis(100)) {
                    Ok(RecvStatus::Ok(n, _)) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            return;
                        }
                    }
                    Ok(_) => {
                        if tx.send(Vec::new()).is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        })
    }

    fn negotiate_pair(mode_a: ZrtpMode, mode_b: ZrtpMode) -> (ZrtpKeys, ZrtpKeys) {
        let a = Arc::new(UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap());
        let b = Arc::new(UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap());
        let addr_a = a.local_addr();
        let addr_b = b.local_addr();

        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        let _pa = pump(Arc::clone(&a), tx_a);
        let _pb = pump(Arc::clone(&b), tx_b);

        let sa = ZrtpSession::new(a, addr_b, rx_a, 0x1111, 16, Arc::new(NoopLogSink));
        let sb = ZrtpSession::new(b, addr_a, rx_b, 0x2222, 16, Arc::new(NoopLogSink));

        let ha = thread::spawn(move || sa.negotiate(mode_a));
        let hb = thread::spawn(move || sb.negotiate(mode_b));
        let ka = ha.join().unwrap().unwrap();
        let kb = hb.join().unwrap().unwrap();
        (ka, kb)
    }

    // The channel pump forwards empty vecs on timeout; recv_until ignores
    // them because unwrap_packet rejects short buffers.

    #[test]
    fn dh_negotiation_agrees_on_keys() {
        let (ka, kb) = negotiate_pair(ZrtpMode::DiffieHellman, ZrtpMode::DiffieHellman);
        // One side's tx is the other side's rx.
        assert_eq!(ka.tx_key, kb.rx_key);
        assert_eq!(ka.rx_key, kb.tx_key);
        assert_eq!(ka.tx_salt, kb.rx_salt);
        assert_eq!(ka.rx_salt, kb.tx_salt);
        assert_eq!(ka.sas, kb.sas);
        assert_eq!(ka.session_key, kb.session_key);
        assert_ne!(ka.tx_key, ka.rx_key);
        assert_eq!(ka.tx_key.len(), 16);
    }

    #[test]
    fn multistream_reuses_the_session_key() {
        let (ka, kb) = negotiate_pair(ZrtpMode::DiffieHellman, ZrtpMode::DiffieHellman);

        let start = Instant::now();
        let (ma, mb) = negotiate_pair(
            ZrtpMode::Multistream {
                session_key: ka.session_key,
            },
            ZrtpMode::Multistream {
                session_key: kb.session_key,
            },
        );
        // No DH exchange: this leg must be fast.
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(ma.tx_key, mb.rx_key);
        assert_eq!(ma.rx_key, mb.tx_key);
        // Fresh per-stream keys, not the DH stream's.
        assert_ne!(ma.tx_key, ka.tx_key);
        assert_ne!(ma.tx_key, ka.rx_key);
    }

    #[test]
    fn mismatched_session_keys_fail_multistream() {
        let a = Arc::new(UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap());
        let b = Arc::new(UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap());
        let addr_a = a.local_addr();
        let addr_b = b.local_addr();
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        let _pa = pump(Arc::clone(&a), tx_a);
        let _pb = pump(Arc::clone(&b), tx_b);

        let sa = ZrtpSession::new(a, addr_b, rx_a, 1, 16, Arc::new(NoopLogSink));
        let sb = ZrtpSession::new(b, addr_a, rx_b, 2, 16, Arc::new(NoopLogSink));

        let ha = thread::spawn(move || {
            sa.negotiate(ZrtpMode::Multistream {
                session_key: [1u8; 32],
            })
        });
        let hb = thread::spawn(move || {
            sb.negotiate(ZrtpMode::Multistream {
                session_key: [2u8; 32],
            })
        });
        // Different session keys derive different Confirm keys; the MAC
        // check must fail on at least one side.
        let ra = ha.join().unwrap();
        let rb = hb.join().unwrap();
        assert!(ra.is_err() || rb.is_err());
    }
}
