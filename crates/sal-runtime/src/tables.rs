//! Socket and event tables
//!
//! Fixed-capacity arenas indexed by descriptor offset. Everything here runs
//! with the critical section held; callers resolve a descriptor to an index
//! through `FdLayout` first.
//!
//! Each slot carries a generation bumped on every allocation. Anything that
//! remembers a slot across a critical-section release (select registrations,
//! the recv loop) remembers the generation with it and re-checks on return.

use std::net::SocketAddrV4;
use std::sync::Arc;

use sal_core::{Fd, FdLayout, NetconnType};

use crate::netconn::Netconn;
use crate::parking::WakeSignal;
use crate::waiters::WaiterList;

/// A socket table entry; free while `conn` is `None`
#[derive(Default)]
pub struct SocketSlot {
    pub conn: Option<Box<Netconn>>,
    /// Unread tail of the last TCP chunk
    pub lastdata: Option<Vec<u8>>,
    pub lastoffset: usize,
    /// Source of `lastdata`
    pub lastfrom: Option<SocketAddrV4>,
    /// Data arrivals minus consumptions
    pub rcvevent: i32,
    /// Non-zero: writable
    pub sendevent: u16,
    /// Non-zero: error pending
    pub errevent: u16,
    /// Last errno recorded for this socket
    pub err: i32,
    /// Select calls currently registered on this socket
    pub select_waiting: u32,
    pub generation: u32,
    /// Freed, but its transport session is still being closed; not reusable yet
    pub closing: bool,
}

impl SocketSlot {
    #[inline]
    pub fn in_use(&self) -> bool {
        self.conn.is_some()
    }

    /// Leftover bytes not yet handed to the application
    #[inline]
    pub fn leftover_len(&self) -> usize {
        self.lastdata
            .as_ref()
            .map_or(0, |d| d.len().saturating_sub(self.lastoffset))
    }

    pub fn readable(&self) -> bool {
        self.leftover_len() > 0 || self.rcvevent > 0
    }

    pub fn writable(&self) -> bool {
        self.sendevent != 0
    }

    pub fn errored(&self) -> bool {
        self.errevent != 0
    }
}

/// An event table entry
#[derive(Default)]
pub struct EventSlot {
    pub used: bool,
    pub counts: u64,
    /// Wake primitive of the select call watching this event, if any
    pub psem: Option<Arc<dyn WakeSignal>>,
    pub generation: u32,
}

impl EventSlot {
    /// Largest value the counter may hold
    pub const MAX_COUNT: u64 = u64::MAX - 1;

    pub fn readable(&self) -> bool {
        self.counts > 0
    }

    pub fn writable(&self) -> bool {
        self.counts < Self::MAX_COUNT
    }
}

/// Readiness snapshot of one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub errored: bool,
}

/// A live slot as resolved from a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRef {
    Socket { index: usize, generation: u32 },
    Event { index: usize, generation: u32 },
}

/// Everything guarded by the critical section
pub struct SalState {
    pub sockets: Vec<SocketSlot>,
    pub events: Vec<EventSlot>,
    pub waiters: WaiterList,
    layout: FdLayout,
}

impl SalState {
    pub fn new(layout: FdLayout) -> Self {
        Self {
            sockets: (0..layout.num_sockets).map(|_| SocketSlot::default()).collect(),
            events: (0..layout.num_events).map(|_| EventSlot::default()).collect(),
            waiters: WaiterList::new(),
            layout,
        }
    }

    #[inline]
    pub fn layout(&self) -> &FdLayout {
        &self.layout
    }

    /// Claim a free socket slot for `conn`
    ///
    /// TCP sockets start non-writable unless they came from accept; every
    /// other type starts writable. On a full table the connection is handed
    /// back so the caller can destroy it.
    pub fn allocate_socket(
        &mut self,
        mut conn: Box<Netconn>,
        accepted: bool,
    ) -> Result<Fd, Box<Netconn>> {
        let Some(index) = self
            .sockets
            .iter()
            .position(|s| !s.in_use() && !s.closing)
        else {
            return Err(conn);
        };
        let fd = self.layout.socket_fd(index);
        let sendevent = match conn.ty {
            NetconnType::Tcp => u16::from(accepted),
            _ => 1,
        };
        conn.fd = fd;

        let slot = &mut self.sockets[index];
        slot.conn = Some(conn);
        slot.lastdata = None;
        slot.lastoffset = 0;
        slot.lastfrom = None;
        slot.rcvevent = 0;
        slot.sendevent = sendevent;
        slot.errevent = 0;
        slot.err = 0;
        slot.select_waiting = 0;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(fd)
    }

    /// Claim a free event slot
    pub fn allocate_event(&mut self, initval: u64) -> Option<Fd> {
        let index = self.events.iter().position(|e| !e.used)?;
        let slot = &mut self.events[index];
        slot.used = true;
        slot.counts = initval.min(EventSlot::MAX_COUNT);
        slot.psem = None;
        slot.generation = slot.generation.wrapping_add(1);
        Some(self.layout.event_fd(index))
    }

    /// Index of a live socket; never logs, never records an error
    pub fn lookup_socket(&self, fd: Fd) -> Option<usize> {
        match self.layout.classify(fd) {
            sal_core::FdKind::Socket(i) if self.sockets[i].in_use() => Some(i),
            _ => None,
        }
    }

    /// Index of a live event; never logs, never records an error
    pub fn lookup_event(&self, fd: Fd) -> Option<usize> {
        match self.layout.classify(fd) {
            sal_core::FdKind::Event(i) if self.events[i].used => Some(i),
            _ => None,
        }
    }

    /// Resolve to either kind of live slot
    pub fn resolve(&self, fd: Fd) -> Option<SlotRef> {
        if let Some(index) = self.lookup_socket(fd) {
            return Some(SlotRef::Socket { index, generation: self.sockets[index].generation });
        }
        self.lookup_event(fd)
            .map(|index| SlotRef::Event { index, generation: self.events[index].generation })
    }

    /// True if the slot is still the allocation `slot` was taken from
    pub fn is_current(&self, slot: SlotRef) -> bool {
        match slot {
            SlotRef::Socket { index, generation } => {
                let s = &self.sockets[index];
                s.in_use() && s.generation == generation
            }
            SlotRef::Event { index, generation } => {
                let e = &self.events[index];
                e.used && e.generation == generation
            }
        }
    }

    /// Live socket slot by index and generation
    pub fn socket_at(&mut self, index: usize, generation: u32) -> Option<&mut SocketSlot> {
        let slot = self.sockets.get_mut(index)?;
        (slot.in_use() && slot.generation == generation).then_some(slot)
    }

    /// Readiness of a descriptor, `None` if it is not live
    pub fn readiness(&self, fd: Fd) -> Option<Readiness> {
        match self.resolve(fd)? {
            SlotRef::Socket { index, .. } => {
                let s = &self.sockets[index];
                Some(Readiness {
                    readable: s.readable(),
                    writable: s.writable(),
                    errored: s.errored(),
                })
            }
            SlotRef::Event { index, .. } => {
                let e = &self.events[index];
                Some(Readiness {
                    readable: e.readable(),
                    writable: e.writable(),
                    errored: false,
                })
            }
        }
    }

    /// Take the connection out of a socket slot and reset it to free
    pub fn free_socket(&mut self, index: usize) -> Option<Box<Netconn>> {
        let slot = &mut self.sockets[index];
        slot.lastdata = None;
        slot.lastoffset = 0;
        slot.lastfrom = None;
        slot.err = 0;
        slot.rcvevent = 0;
        slot.sendevent = 0;
        slot.errevent = 0;
        slot.conn.take()
    }

    /// Mark an event slot unused, returning the watcher's signal if any
    pub fn free_event(&mut self, index: usize) -> Option<Arc<dyn WakeSignal>> {
        let slot = &mut self.events[index];
        slot.used = false;
        slot.counts = 0;
        slot.psem.take()
    }

    /// Live socket count (diagnostics)
    pub fn sockets_in_use(&self) -> usize {
        self.sockets.iter().filter(|s| s.in_use()).count()
    }

    /// Live event count (diagnostics)
    pub fn events_in_use(&self) -> usize {
        self.events.iter().filter(|e| e.used).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netconn::create_connection;

    fn state() -> SalState {
        SalState::new(FdLayout::new(3, 2, 2))
    }

    #[test]
    fn test_allocate_socket_initial_writability() {
        let mut st = state();
        let tcp = st.allocate_socket(create_connection(NetconnType::Tcp).unwrap(), false).unwrap();
        let udp = st.allocate_socket(create_connection(NetconnType::Udp).unwrap(), false).unwrap();
        assert_eq!(tcp, Fd::new(3));
        assert_eq!(udp, Fd::new(4));

        assert!(!st.readiness(tcp).unwrap().writable);
        assert!(st.readiness(udp).unwrap().writable);
        assert_eq!(st.sockets[0].conn.as_ref().unwrap().fd, tcp);
    }

    #[test]
    fn test_accepted_tcp_is_writable() {
        let mut st = state();
        let fd = st.allocate_socket(create_connection(NetconnType::Tcp).unwrap(), true).unwrap();
        assert!(st.readiness(fd).unwrap().writable);
    }

    #[test]
    fn test_socket_table_full_returns_conn() {
        let mut st = state();
        for _ in 0..2 {
            st.allocate_socket(create_connection(NetconnType::Udp).unwrap(), false).unwrap();
        }
        let back = st.allocate_socket(create_connection(NetconnType::Tcp).unwrap(), false);
        let conn = back.unwrap_err();
        assert_eq!(conn.ty, NetconnType::Tcp);
        assert!(conn.fd.is_none());
    }

    #[test]
    fn test_event_range_disjoint() {
        let mut st = state();
        let s = st.allocate_socket(create_connection(NetconnType::Udp).unwrap(), false).unwrap();
        let e = st.allocate_event(0).unwrap();
        assert_eq!(e, Fd::new(5));
        assert_ne!(s, e);
        assert!(st.lookup_socket(e).is_none());
        assert!(st.lookup_event(s).is_none());
        assert!(matches!(st.resolve(e), Some(SlotRef::Event { index: 0, .. })));
    }

    #[test]
    fn test_event_readiness() {
        let mut st = state();
        let e = st.allocate_event(0).unwrap();
        let r = st.readiness(e).unwrap();
        assert!(!r.readable);
        assert!(r.writable);
        assert!(!r.errored);

        let e2 = st.allocate_event(7).unwrap();
        assert!(st.readiness(e2).unwrap().readable);
        assert!(st.allocate_event(0).is_none());
    }

    #[test]
    fn test_generation_tracks_reuse() {
        let mut st = state();
        let fd = st.allocate_socket(create_connection(NetconnType::Udp).unwrap(), false).unwrap();
        let before = st.resolve(fd).unwrap();
        assert!(st.is_current(before));

        let conn = st.free_socket(0);
        assert!(conn.is_some());
        assert!(!st.is_current(before));
        assert!(st.lookup_socket(fd).is_none());

        let again = st.allocate_socket(create_connection(NetconnType::Udp).unwrap(), false).unwrap();
        assert_eq!(again, fd);
        assert!(!st.is_current(before));
        assert!(st.is_current(st.resolve(fd).unwrap()));
    }

    #[test]
    fn test_closing_slot_not_reallocated() {
        let mut st = state();
        let fd = st.allocate_socket(create_connection(NetconnType::Udp).unwrap(), false).unwrap();
        st.free_socket(0);
        st.sockets[0].closing = true;

        let other = st.allocate_socket(create_connection(NetconnType::Udp).unwrap(), false).unwrap();
        assert_eq!(other, Fd::new(4));
        assert!(st.allocate_socket(create_connection(NetconnType::Udp).unwrap(), false).is_err());

        st.sockets[0].closing = false;
        let again = st.allocate_socket(create_connection(NetconnType::Udp).unwrap(), false).unwrap();
        assert_eq!(again, fd);
    }

    #[test]
    fn test_leftover_counts_as_readable() {
        let mut st = state();
        let fd = st.allocate_socket(create_connection(NetconnType::Tcp).unwrap(), false).unwrap();
        st.sockets[0].lastdata = Some(vec![1, 2, 3]);
        st.sockets[0].lastoffset = 1;
        assert_eq!(st.sockets[0].leftover_len(), 2);
        assert!(st.readiness(fd).unwrap().readable);
    }
}
