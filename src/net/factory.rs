//! Maps local bind addresses to shared UDP endpoints.
//!
//! Several streams (RTP + muxed RTCP, or multiple media streams toward the
//! same peer) can multiplex on one kernel socket; the factory hands out the
//! existing endpoint when the requested local address is already bound. It
//! is owned by the `Context`, never process-global.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use crate::error::RtpError;
use crate::net::socket::UdpEndpoint;

#[derive(Default)]
pub struct SocketFactory {
    // Weak entries so dropping the last stream releases the kernel socket.
    bound: Mutex<HashMap<SocketAddr, Weak<UdpEndpoint>>>,
}

impl SocketFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the endpoint bound on `local`, binding it on first use.
    pub fn get_or_bind(&self, local: SocketAddr) -> Result<Arc<UdpEndpoint>, RtpError> {
        let mut bound = self.bound.lock().map_err(|_| RtpError::Generic)?;

        if let Some(existing) = bound.get(&local).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let endpoint = Arc::new(UdpEndpoint::bind(local)?);
        bound.insert(endpoint.local_addr(), Arc::downgrade(&endpoint));
        Ok(endpoint)
    }

    /// Drop stale entries whose endpoint has been released.
    pub fn sweep(&self) {
        if let Ok(mut bound) = self.bound.lock() {
            bound.retain(|_, weak| weak.upgrade().is_some());
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn same_local_addr_shares_the_socket() {
        let factory = SocketFactory::new();
        let a = factory.get_or_bind("127.0.0.1:39011".parse().unwrap()).unwrap();
        let b = factory.get_or_bind("127.0.0.1:39011".parse().unwrap()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn released_socket_can_be_rebound() {
        let factory = SocketFactory::new();
        let addr: SocketAddr = "127.0.0.1:39012".parse().unwrap();
        let a = factory.get_or_bind(addr).unwrap();
        drop(a);
        factory.sweep();
        // Rebinding the same port must succeed once the old socket is gone.
        let b = factory.get_or_bind(addr).unwrap();
        assert_eq!(b.local_addr(), addr);
    }

    #[test]
    fn distinct_ports_get_distinct_sockets() {
        let factory = SocketFactory::new();
        let a = factory.get_or_bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = factory.get_or_bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
