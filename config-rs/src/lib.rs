//! config-rs/lib.rs
//! Shared configuration utilities for consistent settings loading.
//! Every `*Settings::from_env()` in the workspace goes through these helpers so
//! invalid values are reported the same way and never abort startup.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Load a `.env` file from the working directory, if present.
///
/// Returns true when a file was found and applied.
pub fn load_dotenv() -> bool {
    dotenv::dotenv().is_ok()
}

/// Read a boolean flag from the environment.
///
/// Accepts "1", "true", "yes", "on" and "0", "false", "no", "off"
/// (case-insensitive). Anything else falls back to `default` with a warning.
pub fn env_flag(var_name: &str, default: bool) -> bool {
    match env::var(var_name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                log::warn!("Invalid boolean in {}, using default {}", var_name, default);
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a typed value from the environment with a logged fallback.
///
/// # Arguments
/// * `var_name` - The environment variable to read (e.g., "TUNER_MAX_ACTIONS")
/// * `default` - Value used when the variable is unset or unparsable
pub fn env_parse<T>(var_name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(var_name) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            log::warn!("Invalid value in {}, using default {}", var_name, default);
            default
        }),
        Err(_) => default,
    }
}

/// Read a path from the environment, falling back to `default`.
pub fn env_path(var_name: &str, default: &str) -> PathBuf {
    env::var(var_name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Read an optional path; unset or blank yields `None`.
pub fn env_opt_path(var_name: &str) -> Option<PathBuf> {
    env::var(var_name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Read a string, falling back to `default`.
pub fn env_string(var_name: &str, default: &str) -> String {
    env::var(var_name).unwrap_or_else(|_| default.to_string())
}
