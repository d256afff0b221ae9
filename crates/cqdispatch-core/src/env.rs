//! Environment variable helpers used by the runtime configuration.
//!
//! Every tunable has a compiled-in default; a `CQD_*` variable overrides it
//! when set and parseable. Unparseable values fall back to the default
//! rather than failing startup.

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, or return `default`
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if it is set and valid
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag: "1", "true", "yes", "on" (any case) are true.
/// Anything else that is set is false; unset returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Duration given in microseconds
#[inline]
pub fn env_get_micros(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_micros)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_returns_default() {
        let v: usize = env_get("__CQD_TEST_UNSET__", 16);
        assert_eq!(v, 16);
        assert!(env_get_opt::<u32>("__CQD_TEST_UNSET__").is_none());
        assert!(env_get_bool("__CQD_TEST_UNSET__", true));
        assert_eq!(
            env_get_micros("__CQD_TEST_UNSET__", Duration::from_micros(50)),
            Duration::from_micros(50)
        );
    }

    #[test]
    fn test_parsed_values() {
        std::env::set_var("__CQD_TEST_BATCH__", " 32 ");
        let v: usize = env_get("__CQD_TEST_BATCH__", 16);
        assert_eq!(v, 32);
        std::env::remove_var("__CQD_TEST_BATCH__");

        std::env::set_var("__CQD_TEST_SLEEP__", "250");
        assert_eq!(
            env_get_micros("__CQD_TEST_SLEEP__", Duration::ZERO),
            Duration::from_micros(250)
        );
        std::env::remove_var("__CQD_TEST_SLEEP__");
    }

    #[test]
    fn test_invalid_falls_back() {
        std::env::set_var("__CQD_TEST_INVALID__", "many");
        let v: usize = env_get("__CQD_TEST_INVALID__", 4);
        assert_eq!(v, 4);
        std::env::remove_var("__CQD_TEST_INVALID__");
    }

    #[test]
    fn test_bool_variants() {
        for (raw, expected) in [("1", true), ("ON", true), ("yes", true), ("0", false), ("nope", false)] {
            std::env::set_var("__CQD_TEST_BOOL__", raw);
            assert_eq!(env_get_bool("__CQD_TEST_BOOL__", !expected), expected, "{}", raw);
        }
        std::env::remove_var("__CQD_TEST_BOOL__");
    }
}
