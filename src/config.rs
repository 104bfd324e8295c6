//! Runtime configuration from environment variables, optionally seeded from a `.env` file.

use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_MAX_ZONES: u32 = 7;
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub const MAX_ZONES_RANGE: RangeInclusive<u32> = 1..=20;
pub const UPDATE_INTERVAL_RANGE: RangeInclusive<u64> = 30..=3600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Controller host name or IP address.
    pub host: String,
    pub port: u16,
    /// Number of zone indices queried on every refresh (G0..G{max_zones-1}).
    pub max_zones: u32,
    /// Refresh cadence.
    pub update_interval: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Config {
    pub fn new(host: impl Into<String>) -> Self {
        Config {
            host: host.into(),
            port: DEFAULT_PORT,
            max_zones: DEFAULT_MAX_ZONES,
            update_interval: Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = get("TOUCHLINE_HOST").ok_or(ConfigError::Missing("TOUCHLINE_HOST"))?;

        let port = match get("TOUCHLINE_PORT") {
            Some(v) => match v.parse::<u16>() {
                Ok(0) => return Err(invalid("TOUCHLINE_PORT", v, "port must be between 1 and 65535")),
                Ok(p) => p,
                Err(e) => return Err(invalid("TOUCHLINE_PORT", v, e)),
            },
            None => DEFAULT_PORT,
        };

        let max_zones = parse_in_range("TOUCHLINE_MAX_ZONES", get("TOUCHLINE_MAX_ZONES"), DEFAULT_MAX_ZONES, MAX_ZONES_RANGE)?;

        let interval_secs = parse_in_range(
            "TOUCHLINE_UPDATE_INTERVAL_SECS",
            get("TOUCHLINE_UPDATE_INTERVAL_SECS"),
            DEFAULT_UPDATE_INTERVAL_SECS,
            UPDATE_INTERVAL_RANGE,
        )?;

        let timeout_secs = parse_in_range(
            "TOUCHLINE_TIMEOUT_SECS",
            get("TOUCHLINE_TIMEOUT_SECS"),
            DEFAULT_TIMEOUT_SECS,
            1..=u64::MAX,
        )?;

        Ok(Config {
            host,
            port,
            max_zones,
            update_interval: Duration::from_secs(interval_secs),
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn invalid(var: &'static str, value: String, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value,
        reason: reason.to_string(),
    }
}

fn parse_in_range<T>(var: &'static str, raw: Option<String>, default: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else { return Ok(default) };
    let value = raw.parse::<T>().map_err(|e| invalid(var, raw.clone(), e))?;
    if !range.contains(&value) {
        let reason = format!("must be between {} and {}", range.start(), range.end());
        return Err(invalid(var, raw, reason));
    }
    Ok(value)
}

/// Load `KEY=VALUE` lines from `path` into the process environment.
///
/// Variables already present in the environment are left untouched.
pub fn load_env_file(path: &Path) -> Result<usize, String> {
    let contents = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let mut applied = 0;
    for (index, line) in contents.lines().enumerate() {
        let Some((key, value)) =
            parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
            applied += 1;
        }
    }
    Ok(applied)
}

/// Parse one `.env` line. Blank lines and `#` comments yield `None`.
fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
    let (key, raw_value) = assignment
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(format!("invalid variable name {:?}", key));
    }

    let raw_value = raw_value.trim();
    let value = match raw_value.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = &raw_value[1..];
            let end = inner
                .find(quote)
                .ok_or_else(|| format!("unterminated {} quoted value", quote))?;
            let rest = inner[end + 1..].trim();
            if !(rest.is_empty() || rest.starts_with('#')) {
                return Err("unexpected characters after closing quote".to_string());
            }
            inner[..end].to_string()
        }
        _ => raw_value.split('#').next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}
