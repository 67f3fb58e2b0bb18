//! Registry of blocked select calls
//!
//! Waiters live in an index-stable slab and are threaded into one doubly
//! linked list, newest first. Every insert or removal bumps `change_ctr`,
//! which lets a walker that drops the critical section between steps
//! notice that the list moved under it and start over.

use std::sync::Arc;

use sal_core::fdset::opt_is_set;
use sal_core::{Fd, FdSet};

use crate::parking::WakeSignal;

/// One blocked select call
pub struct Waiter {
    pub readset: Option<FdSet>,
    pub writeset: Option<FdSet>,
    pub exceptset: Option<FdSet>,
    pub sem: Arc<dyn WakeSignal>,
    pub signalled: bool,
    prev: Option<usize>,
    next: Option<usize>,
    tag: u64,
}

impl Waiter {
    pub fn new(
        readset: Option<FdSet>,
        writeset: Option<FdSet>,
        exceptset: Option<FdSet>,
        sem: Arc<dyn WakeSignal>,
    ) -> Self {
        Self {
            readset,
            writeset,
            exceptset,
            sem,
            signalled: false,
            prev: None,
            next: None,
            tag: 0,
        }
    }

    /// True if any of the three sets mentions `fd`
    pub fn watches(&self, fd: Fd) -> bool {
        opt_is_set(self.readset.as_ref(), fd)
            || opt_is_set(self.writeset.as_ref(), fd)
            || opt_is_set(self.exceptset.as_ref(), fd)
    }

    /// Mark signalled and post the semaphore (once)
    pub fn wake(&mut self) -> bool {
        if self.signalled {
            return false;
        }
        self.signalled = true;
        self.sem.signal();
        true
    }
}

/// Handle to a registered waiter; the tag guards against slab reuse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterHandle {
    index: usize,
    tag: u64,
}

/// The process-wide waiter list
#[derive(Default)]
pub struct WaiterList {
    slots: Vec<Option<Waiter>>,
    free: Vec<usize>,
    head: Option<usize>,
    len: usize,
    change_ctr: u64,
    next_tag: u64,
}

impl WaiterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bumped on every insert and removal
    #[inline]
    pub fn change_ctr(&self) -> u64 {
        self.change_ctr
    }

    #[inline]
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    /// Successor of the waiter at `index`
    #[inline]
    pub fn next_of(&self, index: usize) -> Option<usize> {
        self.slots.get(index).and_then(|s| s.as_ref()).and_then(|w| w.next)
    }

    pub fn get(&self, index: usize) -> Option<&Waiter> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Waiter> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    /// Look up by handle, `None` once removed
    #[cfg(test)]
    pub fn by_handle(&self, handle: WaiterHandle) -> Option<&Waiter> {
        self.get(handle.index).filter(|w| w.tag == handle.tag)
    }

    /// Insert at the head of the list
    pub fn push_front(&mut self, mut waiter: Waiter) -> WaiterHandle {
        self.next_tag += 1;
        let tag = self.next_tag;
        waiter.tag = tag;
        waiter.prev = None;
        waiter.next = self.head;

        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        if let Some(old_head) = self.head {
            if let Some(w) = self.get_mut(old_head) {
                w.prev = Some(index);
            }
        }
        self.slots[index] = Some(waiter);
        self.head = Some(index);
        self.len += 1;
        self.change_ctr = self.change_ctr.wrapping_add(1);

        WaiterHandle { index, tag }
    }

    /// Unlink and return the waiter
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale or the links are inconsistent; the list
    /// is shared by every thread and cannot be repaired in place.
    pub fn remove(&mut self, handle: WaiterHandle) -> Waiter {
        let waiter = match self.slots.get_mut(handle.index) {
            Some(slot) if slot.as_ref().map(|w| w.tag) == Some(handle.tag) => slot.take(),
            _ => None,
        };
        let Some(waiter) = waiter else {
            panic!("waiter list: stale handle {:?}", handle);
        };

        match waiter.prev {
            Some(p) => {
                let prev = self.get_mut(p).expect("waiter list: dangling prev link");
                prev.next = waiter.next;
            }
            None => {
                assert_eq!(self.head, Some(handle.index), "waiter list: head mismatch");
                self.head = waiter.next;
            }
        }
        if let Some(n) = waiter.next {
            let next = self.get_mut(n).expect("waiter list: dangling next link");
            next.prev = waiter.prev;
        }

        self.free.push(handle.index);
        self.len -= 1;
        self.change_ctr = self.change_ctr.wrapping_add(1);
        waiter
    }

    /// Indices from head to tail
    #[cfg(test)]
    pub fn indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(i) = cur {
            out.push(i);
            cur = self.next_of(i);
        }
        out
    }
}
