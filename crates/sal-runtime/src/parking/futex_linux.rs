//! Linux futex-based wake signal
//!
//! The futex word is the semaphore count itself:
//! - waiters sleep with FUTEX_WAIT while the count is 0
//! - `signal` increments the count and issues FUTEX_WAKE for one waiter
//! - a waiter claims a signal by CAS-decrementing a non-zero count

use super::WakeSignal;
use nix::errno::Errno;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Linux futex-based counting semaphore
pub struct FutexSignal {
    count: AtomicU32,
}

impl FutexSignal {
    pub fn new() -> Self {
        Self { count: AtomicU32::new(0) }
    }

    fn futex_wait(&self, timeout: Option<Duration>) {
        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // FUTEX_WAIT: sleep only while count == 0
        let result = unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.count.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                0u32,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            )
        };

        if result != 0 {
            // ETIMEDOUT, EAGAIN (count moved) and EINTR are all re-checked by the caller
            let errno = Errno::last();
            debug_assert!(
                matches!(errno, Errno::ETIMEDOUT | Errno::EAGAIN | Errno::EINTR),
                "unexpected futex error {:?}",
                errno
            );
        }
    }
}

impl Default for FutexSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSignal for FutexSignal {
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if self.try_take() {
                return true;
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return false;
                    }
                    Some(d - now)
                }
                None => None,
            };
            self.futex_wait(remaining);
        }
    }

    fn signal(&self) {
        self.count.fetch_add(1, Ordering::Release);

        // FUTEX_WAKE: wake 1 waiter
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.count.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn try_take(&self) -> bool {
        let mut cur = self.count.load(Ordering::Acquire);
        while cur > 0 {
            match self.count.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        false
    }

    fn pending(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}
