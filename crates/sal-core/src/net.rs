//! Netconn vocabulary shared by the engine and transports

use core::fmt;
use std::net::SocketAddrV4;

use crate::error::SalError;
use crate::fd::Fd;

/// Transport type of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetconnType {
    Tcp,
    Udp,
    /// Accepted by the connection layer, rejected at the socket API
    Raw,
}

impl NetconnType {
    /// Map a BSD socket type (`SOCK_STREAM`, `SOCK_DGRAM`, `SOCK_RAW`)
    pub fn from_sock_type(ty: i32) -> Option<Self> {
        match ty {
            libc::SOCK_STREAM => Some(NetconnType::Tcp),
            libc::SOCK_DGRAM => Some(NetconnType::Udp),
            libc::SOCK_RAW => Some(NetconnType::Raw),
            _ => None,
        }
    }
}

impl fmt::Display for NetconnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetconnType::Tcp => write!(f, "tcp"),
            NetconnType::Udp => write!(f, "udp"),
            NetconnType::Raw => write!(f, "raw"),
        }
    }
}

/// Connection state as tracked by this layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetconnState {
    /// Not connected
    #[default]
    None,
    /// Transport started (connected or connecting)
    Connect,
}

/// A readiness transition reported by the network stack
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetconnEvent {
    /// Data arrived
    RcvPlus = 0,
    /// Data consumed
    RcvMinus = 1,
    /// Send buffer available
    SendPlus = 2,
    /// Send buffer full
    SendMinus = 3,
    /// Error on the connection
    Error = 4,
}

impl NetconnEvent {
    /// Decode a raw transition code
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(NetconnEvent::RcvPlus),
            1 => Some(NetconnEvent::RcvMinus),
            2 => Some(NetconnEvent::SendPlus),
            3 => Some(NetconnEvent::SendMinus),
            4 => Some(NetconnEvent::Error),
            _ => None,
        }
    }
}

impl TryFrom<u32> for NetconnEvent {
    type Error = SalError;

    fn try_from(code: u32) -> Result<Self, SalError> {
        Self::from_code(code).ok_or(SalError::Internal("unknown netconn event code"))
    }
}

/// What kind of transport session to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    TcpServer,
    TcpClient,
    UdpUnicast,
    UdpBroadcast,
}

/// Parameters handed to `Transport::start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnSpec {
    pub fd: Fd,
    pub kind: ConnKind,
    pub remote: Option<SocketAddrV4>,
    pub local_port: Option<u16>,
}

impl ConnSpec {
    /// A listening TCP endpoint on `port`
    pub fn tcp_server(fd: Fd, port: u16) -> Self {
        Self { fd, kind: ConnKind::TcpServer, remote: None, local_port: Some(port) }
    }

    /// An outbound TCP connection
    pub fn tcp_client(fd: Fd, remote: SocketAddrV4) -> Self {
        Self { fd, kind: ConnKind::TcpClient, remote: Some(remote), local_port: None }
    }

    /// A UDP association with a fixed peer
    pub fn udp_unicast(fd: Fd, remote: SocketAddrV4, local_port: Option<u16>) -> Self {
        Self { fd, kind: ConnKind::UdpUnicast, remote: Some(remote), local_port }
    }
}

/// A chunk of received data and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub data: Vec<u8>,
    pub from: Option<SocketAddrV4>,
}

impl Datagram {
    pub fn new(data: Vec<u8>, from: Option<SocketAddrV4>) -> Self {
        Self { data, from }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
