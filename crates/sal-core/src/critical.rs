//! The critical section guarding the socket, event and waiter tables
//!
//! A spinlock in the shape of an interrupt-disable region: holds are short,
//! never span a blocking wait, and the section is not reentrant. Taking it
//! twice on the same thread is a contract violation and panics instead of
//! deadlocking silently.

use core::cell::{Cell, UnsafeCell};
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

thread_local! {
    /// Address of the critical section this thread currently holds (0 = none)
    static HELD: Cell<usize> = const { Cell::new(0) };
}

/// A non-reentrant spinning critical section
pub struct Critical<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// Safety: Critical provides exclusive access to T
unsafe impl<T: Send> Send for Critical<T> {}
unsafe impl<T: Send> Sync for Critical<T> {}

impl<T> Critical<T> {
    /// Create a new critical section containing the given value
    #[inline]
    pub const fn new(value: T) -> Self {
        Critical {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    #[inline]
    fn addr(&self) -> usize {
        self as *const Self as *const () as usize
    }

    fn acquire_raw(&self) {
        loop {
            if self.locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }

            let mut spin_count = 0u32;
            while self.locked.load(Ordering::Relaxed) {
                spin_count = spin_count.wrapping_add(1);
                for _ in 0..spin_count.min(64) {
                    core::hint::spin_loop();
                }
                if spin_count > 1024 {
                    std::thread::yield_now();
                }
            }
        }
    }

    #[inline]
    fn release_raw(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Enter the critical section
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this section.
    #[inline]
    pub fn enter(&self) -> CriticalGuard<'_, T> {
        let me = self.addr();
        let prev = HELD.with(|h| h.get());
        if prev == me {
            panic!("critical section re-entered on the same thread");
        }
        self.acquire_raw();
        HELD.with(|h| h.set(me));
        CriticalGuard { lock: self, prev }
    }

    /// Check if the section is currently held by anyone
    #[cfg(test)]
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Check if the calling thread holds this section
    #[cfg(test)]
    fn held_by_current(&self) -> bool {
        HELD.with(|h| h.get()) == self.addr()
    }
}

impl<T: Default> Default for Critical<T> {
    fn default() -> Self {
        Critical::new(T::default())
    }
}

/// Guard that leaves the critical section when dropped
pub struct CriticalGuard<'a, T> {
    lock: &'a Critical<T>,
    prev: usize,
}

impl<'a, T> CriticalGuard<'a, T> {
    /// Leave and immediately re-enter the section
    ///
    /// Gives other threads (and the dispatch context) a window to get in
    /// during long walks. Anything read before the flash may be stale.
    pub fn flash(&mut self) {
        HELD.with(|h| h.set(self.prev));
        self.lock.release_raw();
        core::hint::spin_loop();
        self.lock.acquire_raw();
        HELD.with(|h| h.set(self.lock.addr()));
    }
}

impl<'a, T> Deref for CriticalGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: We hold the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for CriticalGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: We hold the lock
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for CriticalGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        HELD.with(|h| h.set(self.prev));
        self.lock.release_raw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_critical_basic() {
        let cs = Critical::new(0u32);
        {
            let mut guard = cs.enter();
            *guard = 42;
            assert!(cs.held_by_current());
        }
        assert!(!cs.is_locked());
        assert!(!cs.held_by_current());
        assert_eq!(*cs.enter(), 42);
    }

    #[test]
    #[should_panic(expected = "re-entered")]
    fn test_critical_not_reentrant() {
        let cs = Critical::new(());
        let _g1 = cs.enter();
        let _g2 = cs.enter();
    }

    #[test]
    fn test_distinct_sections_nest() {
        let a = Critical::new(1u32);
        let b = Critical::new(2u32);
        let ga = a.enter();
        {
            let gb = b.enter();
            assert_eq!(*ga + *gb, 3);
        }
        assert!(a.held_by_current());
        drop(ga);
        assert!(!a.held_by_current());
    }

    #[test]
    fn test_flash_keeps_ownership() {
        let cs = Critical::new(5u32);
        let mut g = cs.enter();
        g.flash();
        assert!(cs.held_by_current());
        *g += 1;
        drop(g);
        assert_eq!(*cs.enter(), 6);
    }

    #[test]
    fn test_critical_concurrent() {
        let cs = Arc::new(Critical::new(0u32));
        let mut handles = vec![];

        for _ in 0..4 {
            let cs = Arc::clone(&cs);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let mut guard = cs.enter();
                    *guard += 1;
                    if *guard % 100 == 0 {
                        guard.flash();
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*cs.enter(), 4000);
    }
}
