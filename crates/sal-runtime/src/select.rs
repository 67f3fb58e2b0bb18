//! The select reactor
//!
//! A blocking call runs scan, register, rescan, wait, unregister, scan.
//! The rescan after registration closes the window in which a transition
//! lands between the first scan and the waiter becoming visible to
//! dispatch: anything that happens before registration is seen by the
//! rescan, anything after it signals the waiter.
//!
//! The wake itself carries no readiness. Whatever woke the call, the
//! result is always the final scan.

use std::sync::Arc;
use std::time::Duration;

use sal_core::fdset::opt_is_set;
use sal_core::{ktrace, Fd, FdSet, SalError, SalResult};

use crate::parking::{new_signal, thread_signal, WakeSignal};
use crate::sal::Sal;
use crate::tables::SlotRef;
use crate::timer::{is_poll, select_timeout_ms};
use crate::waiters::{Waiter, WaiterHandle};

/// The three input sets of one call, copied in
#[derive(Debug, Clone, Copy, Default)]
struct Interest {
    read: Option<FdSet>,
    write: Option<FdSet>,
    except: Option<FdSet>,
}

impl Interest {
    /// Every descriptor named in any set
    fn all(&self) -> FdSet {
        [self.read, self.write, self.except]
            .iter()
            .flatten()
            .fold(FdSet::new(), |acc, s| acc.union(s))
    }
}

/// Output of one scan
#[derive(Debug, Clone, Copy, Default)]
struct Scan {
    nready: usize,
    read: FdSet,
    write: FdSet,
    except: FdSet,
}

impl Sal {
    /// Wait until descriptors below `nfds` become ready
    ///
    /// Sets that are `None` are not watched. `timeout` of `None` blocks
    /// until something is ready; `Some(Duration::ZERO)` polls. On success
    /// each given set is overwritten with its ready subset and the total
    /// count is returned (a descriptor ready in two sets counts twice).
    /// On error the sets are left untouched.
    ///
    /// Returns `BadDescriptor` if a watched descriptor is neither a live
    /// socket nor a live event, or is closed while the call waits.
    pub fn select(
        &self,
        nfds: i32,
        readset: Option<&mut FdSet>,
        writeset: Option<&mut FdSet>,
        exceptset: Option<&mut FdSet>,
        timeout: Option<Duration>,
    ) -> SalResult<usize> {
        let interest = Interest {
            read: readset.as_deref().copied(),
            write: writeset.as_deref().copied(),
            except: exceptset.as_deref().copied(),
        };

        let mut scan = self.selscan(nfds, &interest);
        if scan.nready == 0 && !is_poll(timeout) {
            scan = self.select_wait(nfds, &interest, timeout)?;
        }

        if let Some(set) = readset {
            *set = scan.read;
        }
        if let Some(set) = writeset {
            *set = scan.write;
        }
        if let Some(set) = exceptset {
            *set = scan.except;
        }
        ktrace!("select: nfds {} -> {} ready", nfds, scan.nready);
        Ok(scan.nready)
    }

    /// Classify every watched descriptor
    ///
    /// The critical section is taken per descriptor, not across the loop.
    /// Descriptors below the socket base or not live are skipped.
    fn selscan(&self, nfds: i32, interest: &Interest) -> Scan {
        let mut out = Scan::default();
        let base = self.layout().socket_base;

        for fd in interest.all().iter_below(Fd::new(nfds)) {
            if fd.as_raw() < base {
                continue;
            }
            let Some(r) = self.enter().readiness(fd) else {
                continue;
            };
            if r.readable && opt_is_set(interest.read.as_ref(), fd) {
                out.read.set(fd);
                out.nready += 1;
            }
            if r.writable && opt_is_set(interest.write.as_ref(), fd) {
                out.write.set(fd);
                out.nready += 1;
            }
            if r.errored && opt_is_set(interest.except.as_ref(), fd) {
                out.except.set(fd);
                out.nready += 1;
            }
        }
        out
    }

    /// Register, rescan, block, unregister, and run the final scan
    fn select_wait(
        &self,
        nfds: i32,
        interest: &Interest,
        timeout: Option<Duration>,
    ) -> SalResult<Scan> {
        let per_thread = self.config().sem_per_thread;
        let sem = if per_thread { thread_signal() } else { new_signal() };

        let mut reg = Registration::register(self, nfds, interest, sem.clone());
        if !reg.bad && self.selscan(nfds, interest).nready == 0 {
            let wait = select_timeout_ms(timeout).map(Duration::from_millis);
            let woke = sem.wait(wait);
            ktrace!("select: {}", if woke { "woken" } else { "timed out" });
        }
        let stale = reg.teardown();

        if per_thread {
            let dropped = sem.drain();
            if dropped > 0 {
                ktrace!("select: drained {} stale signal(s)", dropped);
            }
        }

        if reg.bad || stale {
            ktrace!("select: watched descriptor went away");
            return Err(SalError::BadDescriptor);
        }
        Ok(self.selscan(nfds, interest))
    }
}

/// Interest registered by one blocking select call
///
/// Teardown runs on drop as well, so a panic between register and
/// teardown cannot leave counts raised or the waiter linked.
struct Registration<'a> {
    sal: &'a Sal,
    handle: Option<WaiterHandle>,
    slots: Vec<SlotRef>,
    sem: Arc<dyn WakeSignal>,
    /// A watched descriptor did not resolve during registration
    bad: bool,
}

impl<'a> Registration<'a> {
    fn register(sal: &'a Sal, nfds: i32, interest: &Interest, sem: Arc<dyn WakeSignal>) -> Self {
        let waiter = Waiter::new(interest.read, interest.write, interest.except, sem.clone());
        let handle = sal.enter().waiters.push_front(waiter);

        let mut reg = Registration { sal, handle: Some(handle), slots: Vec::new(), sem, bad: false };
        let base = sal.layout().socket_base;

        for fd in interest.all().iter_below(Fd::new(nfds)) {
            if fd.as_raw() < base {
                continue;
            }
            let mut st = sal.enter();
            match st.resolve(fd) {
                Some(slot @ SlotRef::Socket { index, .. }) => {
                    st.sockets[index].select_waiting += 1;
                    reg.slots.push(slot);
                }
                Some(slot @ SlotRef::Event { index, .. }) => {
                    st.events[index].psem = Some(reg.sem.clone());
                    reg.slots.push(slot);
                }
                None => {
                    drop(st);
                    ktrace!("select: fd {} is not open", fd);
                    reg.bad = true;
                    break;
                }
            }
        }
        reg
    }

    /// Undo every registration; true if some slot changed hands meanwhile
    fn teardown(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };

        let mut stale = false;
        for slot in self.slots.drain(..) {
            let mut st = self.sal.enter();
            if !st.is_current(slot) {
                stale = true;
                continue;
            }
            match slot {
                SlotRef::Socket { index, .. } => {
                    let s = &mut st.sockets[index];
                    debug_assert!(s.select_waiting > 0, "select_waiting underflow");
                    s.select_waiting = s.select_waiting.saturating_sub(1);
                }
                SlotRef::Event { index, .. } => {
                    let e = &mut st.events[index];
                    if e.psem.as_ref().is_some_and(|p| Arc::ptr_eq(p, &self.sem)) {
                        e.psem = None;
                    }
                }
            }
        }

        let waiter = self.sal.enter().waiters.remove(handle);
        drop(waiter);
        stale
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.teardown();
    }
}
