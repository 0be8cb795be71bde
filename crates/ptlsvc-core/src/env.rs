//! Environment variable helpers for service configuration.
//!
//! ```ignore
//! use ptlsvc_core::env::{env_get, env_get_bool};
//!
//! let nbufs: usize = env_get("PTLSVC_NBUFS", 64);
//! let abort: bool = env_get_bool("PTLSVC_ABORT_ON_FAULT", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, or return `default` if unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if set and parsable.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// `"1"`, `"true"`, `"yes"`, `"on"` (any case) are true; other set values
/// are false; unset returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names; the process environment is shared.

    #[test]
    fn test_env_get_default() {
        let v: usize = env_get("PTLSVC_TEST_UNSET_XYZ", 42);
        assert_eq!(v, 42);
    }

    #[test]
    fn test_env_get_parse() {
        std::env::set_var("PTLSVC_TEST_NUM", " 128 ");
        let v: usize = env_get("PTLSVC_TEST_NUM", 0);
        assert_eq!(v, 128);

        std::env::set_var("PTLSVC_TEST_BAD", "abc");
        let v: usize = env_get("PTLSVC_TEST_BAD", 7);
        assert_eq!(v, 7);
        assert_eq!(env_get_opt::<u32>("PTLSVC_TEST_BAD"), None);
    }

    #[test]
    fn test_env_get_bool() {
        std::env::set_var("PTLSVC_TEST_BOOL_ON", "Yes");
        assert!(env_get_bool("PTLSVC_TEST_BOOL_ON", false));
        std::env::set_var("PTLSVC_TEST_BOOL_OFF", "0");
        assert!(!env_get_bool("PTLSVC_TEST_BOOL_OFF", true));
        assert!(env_get_bool("PTLSVC_TEST_BOOL_UNSET", true));
    }
}
