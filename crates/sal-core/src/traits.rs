//! Collaborator traits
//!
//! `Transport` is the capability surface this layer consumes from the
//! network stack; `EventSink` is the callback the stack drives when a
//! connection's readiness changes.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Weak;

use crate::error::SalResult;
use crate::fd::Fd;
use crate::net::{ConnSpec, Datagram, NetconnEvent};

/// Receives readiness transitions from the network stack
///
/// Implementations must be callable from any thread, including the
/// stack's own receive thread, and must not block.
pub trait EventSink: Send + Sync {
    fn deal_event(&self, fd: Fd, evt: NetconnEvent);
}

/// The network stack underneath the socket layer
///
/// Every method is keyed by the descriptor the socket layer handed out.
/// None of them may call back into the socket layer synchronously while
/// the caller is inside its critical section; event delivery goes through
/// the registered sink.
pub trait Transport: Send + Sync {
    /// Low-level init, called once before any socket is created
    fn init(&self) -> SalResult<()>;

    /// Install the readiness callback
    fn register_event_sink(&self, sink: Weak<dyn EventSink>);

    /// Start a server, client or UDP session
    fn start(&self, spec: &ConnSpec) -> SalResult<()>;

    /// Tear down a started session
    fn close(&self, fd: Fd) -> SalResult<()>;

    /// Send a payload; `remote` is set only for unconnected datagrams
    fn send(&self, fd: Fd, data: &[u8], remote: Option<SocketAddrV4>) -> SalResult<()>;

    /// Take the next queued chunk without blocking; `Ok(None)` when nothing is queued
    ///
    /// `max` is the caller's capacity. A stream transport may hand back a
    /// larger chunk; the socket layer keeps the surplus for the next read.
    fn recv(&self, fd: Fd, max: usize) -> SalResult<Option<Datagram>>;

    /// Resolve a host name
    fn domain_to_ip(&self, name: &str) -> SalResult<Ipv4Addr>;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "transport"
    }
}
