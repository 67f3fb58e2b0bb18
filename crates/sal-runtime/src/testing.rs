//! Shared fixtures for unit tests

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SalConfig;
use crate::loopback::LoopbackTransport;
use crate::sal::Sal;

/// A small instance on a fresh loopback: 4 sockets from fd 3, 4 events from fd 7
pub fn setup() -> (Arc<Sal>, Arc<LoopbackTransport>) {
    setup_with(SalConfig::new())
}

pub fn setup_with(config: SalConfig) -> (Arc<Sal>, Arc<LoopbackTransport>) {
    let lo = Arc::new(LoopbackTransport::new());
    let config = config
        .num_sockets(4)
        .num_events(4)
        .socket_base(3)
        .recv_poll(Duration::from_millis(2));
    let sal = Sal::new(config, lo.clone()).unwrap();
    (sal, lo)
}

pub fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}
