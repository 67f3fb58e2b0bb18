//! Connection records and their transport control blocks
//!
//! A `Netconn` is owned by exactly one socket slot from `socket()` until
//! `close()`. Code outside the critical section never holds a reference
//! to one; it copies what it needs and writes back after re-validating the
//! slot generation.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use sal_core::{kdebug, Fd, NetconnState, NetconnType, SalResult};

/// Addressing state of a TCP or UDP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpPcb {
    pub local_ip: Ipv4Addr,
    pub local_port: u16,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
}

impl IpPcb {
    fn new() -> Self {
        Self {
            local_ip: Ipv4Addr::UNSPECIFIED,
            local_port: 0,
            remote_ip: Ipv4Addr::UNSPECIFIED,
            remote_port: 0,
        }
    }

    pub fn local(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.local_ip, self.local_port)
    }

    pub fn remote(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.remote_ip, self.remote_port)
    }

    pub fn set_local(&mut self, addr: SocketAddrV4) {
        self.local_ip = *addr.ip();
        self.local_port = addr.port();
    }

    pub fn set_remote(&mut self, addr: SocketAddrV4) {
        self.remote_ip = *addr.ip();
        self.remote_port = addr.port();
    }
}

/// Addressing state of a raw connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPcb {
    pub local_ip: Ipv4Addr,
    pub remote_ip: Ipv4Addr,
    pub protocol: u8,
}

/// Transport control block, one shape per connection type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pcb {
    Tcp(IpPcb),
    Udp(IpPcb),
    Raw(RawPcb),
}

impl Pcb {
    fn for_type(ty: NetconnType) -> Self {
        match ty {
            NetconnType::Tcp => Pcb::Tcp(IpPcb::new()),
            NetconnType::Udp => Pcb::Udp(IpPcb::new()),
            NetconnType::Raw => Pcb::Raw(RawPcb {
                local_ip: Ipv4Addr::UNSPECIFIED,
                remote_ip: Ipv4Addr::UNSPECIFIED,
                protocol: 0,
            }),
        }
    }

    /// TCP/UDP addressing, `None` for raw
    pub fn ip(&self) -> Option<&IpPcb> {
        match self {
            Pcb::Tcp(p) | Pcb::Udp(p) => Some(p),
            Pcb::Raw(_) => None,
        }
    }

    pub fn ip_mut(&mut self) -> Option<&mut IpPcb> {
        match self {
            Pcb::Tcp(p) | Pcb::Udp(p) => Some(p),
            Pcb::Raw(_) => None,
        }
    }
}

/// A connection record
#[derive(Debug)]
pub struct Netconn {
    pub ty: NetconnType,
    pub state: NetconnState,
    pub pcb: Pcb,
    /// Set once the transport has a session for this descriptor
    pub started: bool,
    pub nonblocking: bool,
    /// Zero means no timeout
    pub recv_timeout: Duration,
    /// errno of the last transport failure
    pub last_err: i32,
    /// Owning descriptor, set when the slot is claimed
    pub fd: Fd,
}

/// Allocate a connection record with its control block, unconnected
pub fn create_connection(ty: NetconnType) -> SalResult<Box<Netconn>> {
    let conn = Box::new(Netconn {
        ty,
        state: NetconnState::None,
        pcb: Pcb::for_type(ty),
        started: false,
        nonblocking: false,
        recv_timeout: Duration::ZERO,
        last_err: 0,
        fd: Fd::NONE,
    });
    kdebug!("netconn: created {} record", ty);
    Ok(conn)
}

/// Release a connection record taken out of its slot (no-op for `None`)
pub fn destroy_connection(conn: Option<Box<Netconn>>) {
    if let Some(conn) = conn {
        kdebug!("netconn: destroying {} record of fd {}", conn.ty, conn.fd);
        drop(conn);
    }
}
