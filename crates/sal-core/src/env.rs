//! Environment variable utilities
//!
//! Every runtime knob lives under the `SAL_` prefix. The helpers accept
//! either the bare knob name (`"NUM_SOCKETS"`) or the full variable name
//! (`"SAL_NUM_SOCKETS"`).
//!
//! ```ignore
//! use sal_core::env::{env_get, env_get_bool};
//!
//! let sockets: usize = env_get("NUM_SOCKETS", 16);
//! let per_thread = env_get_bool("SEM_PER_THREAD", true);
//! ```

use std::borrow::Cow;
use std::str::FromStr;

use crate::constants::ENV_PREFIX;

/// Full variable name for a knob
pub fn knob(name: &str) -> Cow<'_, str> {
    if name.starts_with(ENV_PREFIX) {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{}{}", ENV_PREFIX, name))
    }
}

fn raw(name: &str) -> Option<String> {
    std::env::var(knob(name).as_ref()).ok()
}

/// Get a knob parsed as `T`, or `default` when unset or unparseable
#[inline]
pub fn env_get<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(name).unwrap_or(default)
}

/// Get a knob as boolean
///
/// `1/true/yes/on` are true, `0/false/no/off` are false (case-insensitive).
/// Anything else, including unset, returns the default.
#[inline]
pub fn env_get_bool(name: &str, default: bool) -> bool {
    match raw(name).map(|v| v.trim().to_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// Get a knob as an optional value
#[inline]
pub fn env_get_opt<T>(name: &str) -> Option<T>
where
    T: FromStr,
{
    raw(name).and_then(|v| v.trim().parse().ok())
}

/// Get a knob as a string, or `default`
#[inline]
pub fn env_get_str(name: &str, default: &str) -> String {
    raw(name).unwrap_or_else(|| default.to_string())
}

/// Check if a knob is set (regardless of value)
#[inline]
pub fn env_is_set(name: &str) -> bool {
    raw(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knob_prefix() {
        assert_eq!(knob("NUM_SOCKETS"), "SAL_NUM_SOCKETS");
        assert_eq!(knob("SAL_NUM_EVENTS"), "SAL_NUM_EVENTS");
    }

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__TEST_UNSET_KNOB__", 42);
        assert_eq!(val, 42);
        assert!(!env_is_set("__TEST_UNSET_KNOB__"));
        assert_eq!(env_get_str("__TEST_UNSET_KNOB__", "hello"), "hello");
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("SAL___TEST_NUM__", " 123 ");
        let short: usize = env_get("__TEST_NUM__", 0);
        let full: usize = env_get("SAL___TEST_NUM__", 0);
        assert_eq!(short, 123);
        assert_eq!(full, 123);
        std::env::remove_var("SAL___TEST_NUM__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        let key = "SAL___TEST_BOOL__";
        for v in ["1", "true", "TRUE", "yes", "on"] {
            std::env::set_var(key, v);
            assert!(env_get_bool(key, false), "{}", v);
        }
        for v in ["0", "false", "no", "OFF"] {
            std::env::set_var(key, v);
            assert!(!env_get_bool(key, true), "{}", v);
        }
        std::env::set_var(key, "garbage");
        assert!(env_get_bool(key, true));
        assert!(!env_get_bool(key, false));
        std::env::remove_var(key);
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("SAL___TEST_INVALID__", "not_a_number");
        let val: usize = env_get("__TEST_INVALID__", 99);
        assert_eq!(val, 99);
        let opt: Option<usize> = env_get_opt("__TEST_INVALID__");
        assert!(opt.is_none());
        std::env::remove_var("SAL___TEST_INVALID__");
    }
}
