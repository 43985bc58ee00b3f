//! Environment variable overrides
//!
//! All runtime knobs share the `STAGEHAND_` prefix. Values that fail to
//! parse fall back to the default rather than erroring, so a typo in the
//! environment never prevents a runtime from starting.
//!
//! ```ignore
//! use stagehand_core::env::{env_get, env_get_bool};
//!
//! let tick_millis: u64 = env_get("STAGEHAND_TICK_MILLIS", 100);
//! let flush = env_get_bool("STAGEHAND_FLUSH_EPRINT", false);
//! ```

use std::str::FromStr;

/// Prefix shared by every recognized variable
pub const ENV_PREFIX: &str = "STAGEHAND_";

/// Parse `key` as `T`, or return `default` when unset or malformed
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if it is set and well-formed
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Read `key` as a flag; "1", "true", "yes" and "on" are true
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

/// Read `key` as a string, or return `default`
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Build a prefixed variable name: `env_key("TICK_MILLIS")` is
/// `"STAGEHAND_TICK_MILLIS"`
pub fn env_key(suffix: &str) -> String {
    let mut key = String::with_capacity(ENV_PREFIX.len() + suffix.len());
    key.push_str(ENV_PREFIX);
    key.push_str(suffix);
    key
}
