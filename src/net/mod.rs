//! Wire-level UDP I/O: the shared endpoint, the per-context socket factory
//! and the NAT keepalive worker.

pub mod factory;
pub mod holepuncher;
pub mod socket;

pub use factory::SocketFactory;
pub use holepuncher::Holepuncher;
pub use socket::{RecvStatus, UdpEndpoint};
