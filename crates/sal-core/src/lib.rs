//! # sal-core
//!
//! Core types and traits for the SAL (socket abstraction layer).
//!
//! This crate is platform-agnostic: vocabulary only, no waiting and no
//! syscalls. The reactor, tables and wake primitives live in `sal-runtime`.
//!
//! ## Modules
//!
//! - `fd` - Descriptor type and the socket/event descriptor layout
//! - `fdset` - Fixed-size descriptor bitmaps used by `select`
//! - `critical` - The process-wide critical section primitive
//! - `net` - Netconn enums, connection specs and address records
//! - `error` - Error taxonomy and errno mapping
//! - `traits` - Collaborator interface consumed from the network stack
//! - `kprint` - Kernel-style leveled logging macros
//! - `env` - Environment variable utilities

pub mod fd;
pub mod fdset;
pub mod critical;
pub mod net;
pub mod error;
pub mod traits;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use fd::{Fd, FdKind, FdLayout};
pub use fdset::{FdSet, FD_SETSIZE};
pub use critical::{Critical, CriticalGuard};
pub use net::{ConnKind, ConnSpec, Datagram, NetconnEvent, NetconnState, NetconnType};
pub use error::{AddrInfoError, SalError, SalResult};
pub use traits::{EventSink, Transport};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set, knob};

/// Constants shared by every layer
pub mod constants {
    /// Size of the counter exchanged through an event descriptor
    pub const EVENT_WORD_SIZE: usize = core::mem::size_of::<u64>();

    /// Environment variable prefix for every runtime knob
    pub const ENV_PREFIX: &str = "SAL_";
}
