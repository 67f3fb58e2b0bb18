//! Fallback wake signal using std::sync::Condvar
//!
//! Used on platforms without futex support.

use super::WakeSignal;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Condvar-based counting semaphore
pub struct CondvarSignal {
    count: Mutex<u32>,
    condvar: Condvar,
}

impl CondvarSignal {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, u32> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CondvarSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSignal for CondvarSignal {
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut guard = self.lock();
        loop {
            if *guard > 0 {
                *guard -= 1;
                return true;
            }
            guard = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return false;
                    }
                    self.condvar
                        .wait_timeout(guard, d - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.condvar.wait(guard).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn signal(&self) {
        {
            let mut guard = self.lock();
            *guard = guard.saturating_add(1);
        }
        self.condvar.notify_one();
    }

    fn try_take(&self) -> bool {
        let mut guard = self.lock();
        if *guard > 0 {
            *guard -= 1;
            true
        } else {
            false
        }
    }

    fn pending(&self) -> u32 {
        *self.lock()
    }
}
