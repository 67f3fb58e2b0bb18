//! Clock and sleep helpers

use std::time::Duration;

/// Sleep the calling thread
#[inline]
pub fn sleep(d: Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}

/// Translate a select timeout into the wait duration in milliseconds
///
/// `None` waits forever. Sub-millisecond remainders round to nearest, and
/// any non-forever wait is at least 1 ms.
pub fn select_timeout_ms(timeout: Option<Duration>) -> Option<u64> {
    let t = timeout?;
    let ms = t
        .as_secs()
        .saturating_mul(1000)
        .saturating_add((u64::from(t.subsec_micros()) + 500) / 1000);
    Some(ms.max(1))
}

/// True for a zero-length timeout (poll, never block)
#[inline]
pub fn is_poll(timeout: Option<Duration>) -> bool {
    matches!(timeout, Some(t) if t.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_timeout_ms() {
        assert_eq!(select_timeout_ms(None), None);
        assert_eq!(select_timeout_ms(Some(Duration::from_micros(1500))), Some(2));
        assert_eq!(select_timeout_ms(Some(Duration::from_micros(400))), Some(1));
        assert_eq!(select_timeout_ms(Some(Duration::from_micros(1499))), Some(1));
        assert_eq!(select_timeout_ms(Some(Duration::new(2, 250_000_000))), Some(2250));
        assert_eq!(select_timeout_ms(Some(Duration::ZERO)), Some(1));
        assert_eq!(select_timeout_ms(Some(Duration::from_secs(u64::MAX / 2))), Some(u64::MAX));
        assert_eq!(select_timeout_ms(Some(Duration::MAX)), Some(u64::MAX));
    }

    #[test]
    fn test_is_poll() {
        assert!(is_poll(Some(Duration::ZERO)));
        assert!(!is_poll(Some(Duration::from_nanos(1))));
        assert!(!is_poll(None));
    }

    #[test]
    fn test_sleep_zero_returns() {
        let start = std::time::Instant::now();
        sleep(Duration::ZERO);
        sleep(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
