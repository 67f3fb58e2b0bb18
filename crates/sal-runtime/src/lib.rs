//! # sal-runtime
//!
//! The engine behind the SAL socket layer.
//!
//! This crate provides:
//! - Socket and event tables guarded by one critical section
//! - Connection lifecycle (socket/bind/connect/listen/close, eventfd)
//! - The select reactor and the waiter registry it shares with dispatch
//! - Event dispatch from the network stack
//! - Blocking I/O wrappers, socket options and name resolution
//! - Wake primitives (futex on Linux, condvar elsewhere)
//! - An in-memory loopback transport

pub mod config;
pub mod parking;
pub mod timer;
pub mod netconn;
pub mod waiters;
pub mod tables;
pub mod sal;
pub mod select;
pub mod dispatch;
pub mod io;
pub mod sockopt;
pub mod netdb;
pub mod loopback;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::{ConfigError, SalConfig};
pub use sal::{Sal, SalStats};
pub use sockopt::SockOptValue;
pub use netdb::{freeaddrinfo, AddrInfo, AddrInfoHints, HostEnt};
pub use loopback::{LoopbackTransport, SentRecord};
pub use parking::{new_signal, thread_signal, WakeSignal};
