//! Thin UDP endpoint with gather send, batched send and deadline receive.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::RtpError;

/// Hook run over every assembled datagram right before the kernel call.
///
/// SRTP installs one of these to encrypt the payload in place and append the
/// authentication tag. Handlers on a shared socket must check the packet's
/// SSRC and leave foreign traffic untouched.
pub type PreSendHandler = Box<dyn Fn(&mut Vec<u8>) -> Result<(), RtpError> + Send + Sync>;

/// Outcome of a deadline receive.
#[derive(Debug)]
pub enum RecvStatus {
    /// `n` bytes from `peer`.
    Ok(usize, SocketAddr),
    Timeout,
    Interrupted,
}

/// One kernel UDP socket, shareable between streams.
///
/// `send` paths are safe from multiple threads (the OS serializes datagram
/// writes); `recv_with_deadline` has a single reader, the reception flow.
pub struct UdpEndpoint {
    sock: UdpSocket,
    local: SocketAddr,
    peer: Mutex<Option<SocketAddr>>,
    pre_send: Mutex<Vec<PreSendHandler>>,
    send_errors: AtomicU64,
}

impl UdpEndpoint {
    /// Bind a UDP socket on `local`. A failure here is fatal to stream
    /// creation.
    pub fn bind(local: SocketAddr) -> Result<Self, RtpError> {
        let sock = UdpSocket::bind(local).map_err(|e| RtpError::Bind(e.to_string()))?;
        let local = sock.local_addr().map_err(|e| RtpError::Bind(e.to_string()))?;
        Ok(Self {
            sock,
            local,
            peer: Mutex::new(None),
            pre_send: Mutex::new(Vec::new()),
            send_errors: AtomicU64::new(0),
        })
    }

    /// Store the default destination used by the stream's push path.
    pub fn connect_out(&self, addr: SocketAddr) {
        if let Ok(mut peer) = self.peer.lock() {
            *peer = Some(addr);
        }
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.lock().ok().and_then(|p| *p)
    }

    /// Resize the kernel buffer. `send_side` picks SO_SNDBUF over SO_RCVBUF.
    pub fn set_buf(&self, size_bytes: usize, send_side: bool) -> Result<(), RtpError> {
        let sref = socket2::SockRef::from(&self.sock);
        let res = if send_side {
            sref.set_send_buffer_size(size_bytes)
        } else {
            sref.set_recv_buffer_size(size_bytes)
        };
        res.map_err(|e| RtpError::Socket(e.to_string()))
    }

    /// Append a pre-send hook. Hooks run in installation order on every
    /// outgoing datagram.
    pub fn install_pre_send_handler(&self, f: PreSendHandler) {
        if let Ok(mut hooks) = self.pre_send.lock() {
            hooks.push(f);
        }
    }

    /// Number of per-packet send failures observed so far.
    #[must_use]
    pub fn send_error_count(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }

    /// Send one already-assembled datagram to the default peer.
    pub fn send_one(&self, bytes: Vec<u8>) -> Result<usize, RtpError> {
        let peer = self.peer_addr().ok_or(RtpError::NotInitialized)?;
        self.send_one_to(bytes, peer)
    }

    /// Send one datagram to an explicit destination.
    pub fn send_one_to(&self, mut bytes: Vec<u8>, peer: SocketAddr) -> Result<usize, RtpError> {
        self.run_pre_send(&mut bytes)?;
        self.kernel_send(&bytes, peer)
    }

    /// Gather `parts` into one datagram (RTP header + fragment header +
    /// payload slice) and send it to the default peer.
    pub fn send_vector(&self, parts: &[&[u8]]) -> Result<usize, RtpError> {
        let peer = self.peer_addr().ok_or(RtpError::NotInitialized)?;
        let total = parts.iter().map(|p| p.len()).sum();
        let mut datagram = Vec::with_capacity(total);
        for p in parts {
            datagram.extend_from_slice(p);
        }
        self.run_pre_send(&mut datagram)?;
        self.kernel_send(&datagram, peer)
    }

    /// Send every datagram of `batch` back to back.
    ///
    /// The whole batch goes through one pass so fragments of a frame are not
    /// interleaved with other streams sharing the socket. Per-datagram
    /// failures are counted; the first one is reported after the batch has
    /// been attempted in full.
    pub fn send_batch(&self, batch: Vec<Vec<u8>>) -> Result<usize, RtpError> {
        let peer = self.peer_addr().ok_or(RtpError::NotInitialized)?;
        let mut sent = 0usize;
        let mut first_err: Option<RtpError> = None;
        for mut datagram in batch {
            let res = self
                .run_pre_send(&mut datagram)
                .and_then(|()| self.kernel_send(&datagram, peer));
            match res {
                Ok(n) => sent += n,
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }

    /// Blocking receive with a deadline so the reception flow stays
    /// cancellable.
    pub fn recv_with_deadline(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<RecvStatus, RtpError> {
        self.sock
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
            .map_err(|e| RtpError::Socket(e.to_string()))?;

        match self.sock.recv_from(buf) {
            Ok((n, peer)) => Ok(RecvStatus::Ok(n, peer)),
            Err(e) => match e.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                    Ok(RecvStatus::Timeout)
                }
                std::io::ErrorKind::Interrupted => Ok(RecvStatus::Interrupted),
                _ => Err(RtpError::Recv(e.to_string())),
            },
        }
    }

    fn run_pre_send(&self, datagram: &mut Vec<u8>) -> Result<(), RtpError> {
        let hooks = self.pre_send.lock().map_err(|_| RtpError::Generic)?;
        for hook in hooks.iter() {
            hook(datagram)?;
        }
        Ok(())
    }

    fn kernel_send(&self, datagram: &[u8], peer: SocketAddr) -> Result<usize, RtpError> {
        match self.sock.send_to(datagram, peer) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(RtpError::Send(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::time::Duration;

    fn loopback_pair() -> (UdpEndpoint, UdpEndpoint) {
        let a = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        a.connect_out(b.local_addr());
        b.connect_out(a.local_addr());
        (a, b)
    }

    #[test]
    fn send_vector_gathers_into_one_datagram() {
        let (a, b) = loopback_pair();
        let n = a.send_vector(&[b"head", b"-", b"tail"]).unwrap();
        assert_eq!(n, 9);

        let mut buf = [0u8; 64];
        match b.recv_with_deadline(&mut buf, Duration::from_millis(500)).unwrap() {
            RecvStatus::Ok(n, _) => assert_eq!(&buf[..n], b"head-tail"),
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[test]
    fn recv_deadline_times_out() {
        let (_a, b) = loopback_pair();
        let mut buf = [0u8; 16];
        match b.recv_with_deadline(&mut buf, Duration::from_millis(30)).unwrap() {
            RecvStatus::Timeout => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn pre_send_handler_rewrites_datagram() {
        let (a, b) = loopback_pair();
        a.install_pre_send_handler(Box::new(|pkt| {
            for b in pkt.iter_mut() {
                *b ^= 0xFF;
            }
            Ok(())
        }));
        a.send_one(vec![0x00, 0x0F]).unwrap();

        let mut buf = [0u8; 16];
        match b.recv_with_deadline(&mut buf, Duration::from_millis(500)).unwrap() {
            RecvStatus::Ok(n, _) => assert_eq!(&buf[..n], &[0xFF, 0xF0]),
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[test]
    fn send_batch_delivers_all() {
        let (a, b) = loopback_pair();
        let batch = vec![vec![1u8], vec![2u8], vec![3u8]];
        a.send_batch(batch).unwrap();

        let mut seen = Vec::new();
        let mut buf = [0u8; 16];
        for _ in 0..3 {
            if let RecvStatus::Ok(n, _) =
                b.recv_with_deadline(&mut buf, Duration::from_millis(500)).unwrap()
            {
                seen.extend_from_slice(&buf[..n]);
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn send_without_peer_is_not_initialized() {
        let a = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(a.send_one(vec![0u8]).unwrap_err(), RtpError::NotInitialized);
    }
}
