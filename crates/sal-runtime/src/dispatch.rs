//! Readiness transitions from the network stack
//!
//! The stack calls `deal_event` whenever a connection gains data, loses it,
//! becomes writable or fails. The common case (nobody selecting on the
//! socket) is one counter update under the critical section.
//!
//! When select calls are registered the waiter list is walked with the
//! section flashed between waiters, so a long list never holds it for
//! long. If the list changes during a flash the walk restarts from the
//! head; waiters already woken are skipped by their `signalled` flag.

use sal_core::fdset::opt_is_set;
use sal_core::{ktrace, CriticalGuard, Fd, NetconnEvent};

use crate::sal::Sal;
use crate::tables::SalState;
use crate::waiters::Waiter;

impl Sal {
    /// Apply a readiness transition and wake interested select calls
    ///
    /// Events for descriptors that are not live sockets are dropped.
    pub fn dispatch_event(&self, fd: Fd, evt: NetconnEvent) {
        let mut st = self.enter();
        let Some(index) = st.lookup_socket(fd) else {
            drop(st);
            ktrace!("dispatch: {:?} for dead fd {}", evt, fd);
            return;
        };

        let slot = &mut st.sockets[index];
        match evt {
            NetconnEvent::RcvPlus => slot.rcvevent += 1,
            NetconnEvent::RcvMinus => slot.rcvevent -= 1,
            NetconnEvent::SendPlus => slot.sendevent = 1,
            NetconnEvent::SendMinus => slot.sendevent = 0,
            NetconnEvent::Error => slot.errevent = 1,
        }

        if slot.select_waiting == 0 {
            return;
        }

        let woken = wake_waiters(&mut st, |st, w| {
            let s = &st.sockets[index];
            (s.rcvevent > 0 && opt_is_set(w.readset.as_ref(), fd))
                || (s.sendevent != 0 && opt_is_set(w.writeset.as_ref(), fd))
                || (s.errevent != 0 && opt_is_set(w.exceptset.as_ref(), fd))
        });
        drop(st);
        ktrace!("dispatch: {:?} on fd {} woke {}", evt, fd, woken);
    }

    /// Dispatch by raw event code
    ///
    /// # Panics
    ///
    /// Panics on a code outside the five known transitions; the stack and
    /// this layer disagree about the protocol and nothing sensible can be
    /// done with the event.
    pub fn dispatch_raw(&self, fd: Fd, code: u32) {
        match NetconnEvent::from_code(code) {
            Some(evt) => self.dispatch_event(fd, evt),
            None => panic!("dispatch: unknown netconn event code {} for fd {}", code, fd),
        }
    }
}

/// Wake every unsignalled waiter that `matches` accepts
///
/// The section is flashed after each waiter. A change in the list's
/// counter across a flash restarts the walk from the head. Returns the
/// number of waiters woken.
pub(crate) fn wake_waiters<F>(st: &mut CriticalGuard<'_, SalState>, matches: F) -> usize
where
    F: FnMut(&SalState, &Waiter) -> bool,
{
    walk_waiters(st, matches, |_| {})
}

/// The walk behind `wake_waiters`; `after_flash` runs with the section
/// re-acquired after every flash, before the counter is compared
fn walk_waiters<F, H>(
    st: &mut CriticalGuard<'_, SalState>,
    mut matches: F,
    mut after_flash: H,
) -> usize
where
    F: FnMut(&SalState, &Waiter) -> bool,
    H: FnMut(&mut SalState),
{
    let mut woken = 0;
    'restart: loop {
        let ctr = st.waiters.change_ctr();
        let mut cur = st.waiters.head();

        while let Some(index) = cur {
            let hit = match st.waiters.get(index) {
                Some(w) => !w.signalled && matches(&**st, w),
                None => false,
            };
            if hit {
                if let Some(w) = st.waiters.get_mut(index) {
                    if w.wake() {
                        woken += 1;
                    }
                }
            }
            cur = st.waiters.next_of(index);

            st.flash();
            after_flash(&mut **st);
            if st.waiters.change_ctr() != ctr {
                continue 'restart;
            }
        }
        return woken;
    }
}
