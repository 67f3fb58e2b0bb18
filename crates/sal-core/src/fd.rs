//! Descriptor type and descriptor-space layout
//!
//! Sockets occupy `[socket_base, socket_base + num_sockets)` and event
//! objects occupy the range right after it, so any integer resolves to at
//! most one kind of table slot.

use core::fmt;

/// A descriptor handed out to applications
///
/// This is a plain `i32` so it can travel through C-shaped APIs unchanged.
/// Negative values are never valid; `Fd::NONE` is the sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Fd(i32);

impl Fd {
    /// Sentinel value indicating no descriptor
    pub const NONE: Fd = Fd(-1);

    /// Create a descriptor from a raw value
    #[inline]
    pub const fn new(raw: i32) -> Self {
        Fd(raw)
    }

    /// Get the raw value
    #[inline]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Get as usize for bitmap indexing (None for negative values)
    #[inline]
    pub const fn index(self) -> Option<usize> {
        if self.0 < 0 {
            None
        } else {
            Some(self.0 as usize)
        }
    }

    /// Check if this is the NONE sentinel (or any negative value)
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }
}

impl From<i32> for Fd {
    #[inline]
    fn from(raw: i32) -> Self {
        Fd(raw)
    }
}

impl From<Fd> for i32 {
    #[inline]
    fn from(fd: Fd) -> Self {
        fd.0
    }
}

impl fmt::Debug for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "Fd(NONE)")
        } else {
            write!(f, "Fd({})", self.0)
        }
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a descriptor resolves to, by range only (occupancy is not checked)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    /// Index into the socket table
    Socket(usize),
    /// Index into the event table
    Event(usize),
    /// Outside both ranges
    Invalid,
}

/// Placement of the socket and event ranges in descriptor space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdLayout {
    pub socket_base: i32,
    pub num_sockets: usize,
    pub num_events: usize,
}

impl FdLayout {
    pub const fn new(socket_base: i32, num_sockets: usize, num_events: usize) -> Self {
        Self { socket_base, num_sockets, num_events }
    }

    /// First event descriptor (`num_sockets + socket_base`)
    #[inline]
    pub const fn event_base(&self) -> i32 {
        self.socket_base + self.num_sockets as i32
    }

    /// One past the highest descriptor either table can hand out
    #[inline]
    pub const fn end(&self) -> i32 {
        self.event_base() + self.num_events as i32
    }

    #[inline]
    pub const fn socket_fd(&self, index: usize) -> Fd {
        Fd(self.socket_base + index as i32)
    }

    #[inline]
    pub const fn event_fd(&self, index: usize) -> Fd {
        Fd(self.event_base() + index as i32)
    }

    /// Resolve a descriptor to its table and slot index
    pub fn classify(&self, fd: Fd) -> FdKind {
        let raw = fd.as_raw();
        let s = raw - self.socket_base;
        if s >= 0 && (s as usize) < self.num_sockets {
            return FdKind::Socket(s as usize);
        }
        let e = raw - self.event_base();
        if e >= 0 && (e as usize) < self.num_events {
            return FdKind::Event(e as usize);
        }
        FdKind::Invalid
    }
}
