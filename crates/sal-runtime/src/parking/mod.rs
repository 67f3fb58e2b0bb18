//! Wake primitives for blocked select calls
//!
//! A `WakeSignal` is a counting semaphore: `signal()` never blocks and may
//! be called while holding the critical section; `wait()` blocks until a
//! signal is available or the timeout passes.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

/// Counting semaphore used to wake one select call
pub trait WakeSignal: Send + Sync {
    /// Block until a signal is available, consuming it
    ///
    /// Returns:
    /// - `true` if a signal was consumed
    /// - `false` if the timeout expired first
    ///
    /// `None` waits forever. Spurious wakeups are absorbed internally.
    fn wait(&self, timeout: Option<Duration>) -> bool;

    /// Post one signal and wake a waiter if any
    fn signal(&self);

    /// Consume one pending signal without blocking
    fn try_take(&self) -> bool;

    /// Pending signals (hint, may be stale)
    fn pending(&self) -> u32;

    /// Consume every pending signal; returns how many were dropped
    fn drain(&self) -> u32 {
        let mut n = 0;
        while self.try_take() {
            n += 1;
        }
        n
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexSignal as PlatformSignal;
    } else {
        mod fallback;
        pub use fallback::CondvarSignal as PlatformSignal;
    }
}

/// Create a new platform-appropriate signal
pub fn new_signal() -> Arc<dyn WakeSignal> {
    Arc::new(PlatformSignal::new())
}

thread_local! {
    static THREAD_SIGNAL: RefCell<Option<Arc<dyn WakeSignal>>> = const { RefCell::new(None) };
}

/// The calling thread's reusable signal, created on first use
pub fn thread_signal() -> Arc<dyn WakeSignal> {
    THREAD_SIGNAL.with(|cell| {
        cell.borrow_mut().get_or_insert_with(new_signal).clone()
    })
}
