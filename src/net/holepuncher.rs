//! NAT/firewall keepalive for unidirectional streams.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crate::clock;
use crate::log::LogSink;
use crate::net::socket::UdpEndpoint;
use crate::{sink_debug, sink_warn};

/// Sends a 1-byte datagram to the remote endpoint every `interval` while the
/// stream itself stays quiet, keeping NAT/firewall state alive.
pub struct Holepuncher {
    run: Arc<AtomicBool>,
    last_tx_ms: Arc<AtomicU64>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Holepuncher {
    pub fn start(
        endpoint: Arc<UdpEndpoint>,
        interval: Duration,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        let run = Arc::new(AtomicBool::new(true));
        let last_tx_ms = Arc::new(AtomicU64::new(0));

        let run2 = Arc::clone(&run);
        let last2 = Arc::clone(&last_tx_ms);
        let worker = thread::Builder::new()
            .name("rtpkit-holepunch".into())
            .spawn(move || {
                // Poll in short steps so stop() is honored promptly.
                let step = Duration::from_millis(100);
                let mut elapsed = Duration::ZERO;
                while run2.load(Ordering::SeqCst) {
                    thread::sleep(step);
                    elapsed += step;
                    if elapsed < interval {
                        continue;
                    }
                    elapsed = Duration::ZERO;

                    // Real traffic within the interval keeps the mapping
                    // alive on its own.
                    let now = clock::now_millis() as u64;
                    let last = last2.load(Ordering::Relaxed);
                    if last != 0 && now.saturating_sub(last) < interval.as_millis() as u64 {
                        continue;
                    }

                    match endpoint.send_one(vec![0x00]) {
                        Ok(_) => sink_debug!(logger, "[holepunch] keepalive sent"),
                        Err(e) => sink_warn!(logger, "[holepunch] keepalive failed: {e}"),
                    }
                }
            })
            .ok();

        Self {
            run,
            last_tx_ms,
            worker,
        }
    }

    /// Note that the stream just sent real media; the next keepalive tick is
    /// skipped.
    pub fn media_sent(&self) {
        self.last_tx_ms
            .store(clock::now_millis() as u64, Ordering::Relaxed);
    }

    pub fn stop(&mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Holepuncher {
    fn drop(&mut self) {
        self.stop();
    }
}
