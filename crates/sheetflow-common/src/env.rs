//! Typed environment variable readers
//!
//! Empty values are treated the same as unset ones. Values that are present
//! but cannot be parsed are reported instead of silently replaced by the
//! default, so a typo in deployment config fails at startup.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Read a variable, treating empty strings as absent
pub fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a variable or fall back to `default`
pub fn var_or(name: &str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_string())
}

/// Read a variable that must be set
pub fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| CommonError::MissingVar(name.to_string()))
}

/// Parse a variable into `T`, using `default` when it is not set
pub fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match optional(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| CommonError::InvalidVar {
            name: name.to_string(),
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
