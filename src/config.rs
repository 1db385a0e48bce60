//! Environment-driven runtime configuration.
//!
//! Loading configuration from the environment is out of this crate's
//! documented scope as a *product surface* (nobody outside this process reads
//! or writes these variables as an API), but the workers still need somewhere
//! to get their settings from, so this module stays intentionally thin: no
//! config file, no interactive setup, just `Config::from_env`.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use derive_new::new;
use error_stack::{Report, ResultExt};
use getset::{CopyGetters, Getters};

use crate::ext::error_stack::{DescribeContext, ErrorHelper};
use crate::ext::secrecy::ComparableSecretString;

pub mod dianna;
pub mod redis;
pub mod scanner;
pub mod syslog;
pub mod workers;

pub use dianna::DiannaConfig;
pub use redis::RedisConfig;
pub use scanner::ScannerConfig;
pub use syslog::SyslogConfig;
pub use workers::WorkersConfig;

/// Errors encountered while loading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An environment variable held a value that could not be parsed as the
    /// expected type.
    #[error("parse environment variable '{0}'")]
    Parse(&'static str),
}

/// The deployment environment, used to scope queue names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    /// Local development.
    Dev,
    /// Staging.
    Stg,
    /// Production.
    Prod,
}

impl AppEnv {
    /// The environment's name, as embedded in queue names.
    pub fn as_str(self) -> &'static str {
        match self {
            AppEnv::Dev => "dev",
            AppEnv::Stg => "stg",
            AppEnv::Prod => "prod",
        }
    }
}

impl FromStr for AppEnv {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(AppEnv::Dev),
            "stg" => Ok(AppEnv::Stg),
            "prod" => Ok(AppEnv::Prod),
            _ => Err(()),
        }
    }
}

/// The full, validated runtime configuration for the worker pipeline.
#[derive(Debug, Clone, Getters, CopyGetters, new)]
pub struct Config {
    /// The deployment environment, scoping queue names.
    #[getset(get_copy = "pub")]
    app_env: AppEnv,

    /// Control-plane Redis: job/inflight state and pub/sub notifications.
    #[getset(get = "pub")]
    redis_url: String,

    /// Scanner (DSXA) client settings.
    #[getset(get = "pub")]
    scanner: ScannerConfig,

    /// DIANNA deep-analysis client settings.
    #[getset(get = "pub")]
    dianna: DiannaConfig,

    /// Syslog sink settings.
    #[getset(get = "pub")]
    syslog: SyslogConfig,

    /// Worker retry/backoff/batch settings.
    #[getset(get = "pub")]
    workers: WorkersConfig,

    /// Auxiliary Redis-backed store settings (results/SIEM index).
    #[getset(get = "pub")]
    redis: RedisConfig,
}

impl Config {
    /// Load configuration from the process environment, applying the same
    /// defaults as the system this crate implements.
    pub fn from_env() -> Result<Self, Report<Error>> {
        let app_env = env_parse_or("DSXCONNECT_APP_ENV", AppEnv::Dev)?;
        let redis_url = env_or("DSXCONNECT_REDIS_URL", "redis://localhost:6379/3");

        Ok(Config::new(
            app_env,
            redis_url,
            ScannerConfig::from_env()?,
            DiannaConfig::from_env()?,
            SyslogConfig::from_env()?,
            WorkersConfig::from_env()?,
            RedisConfig::from_env()?,
        ))
    }
}

/// Read an environment variable, returning `None` if unset or empty.
pub(crate) fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Read an environment variable, falling back to `default` if unset or empty.
pub(crate) fn env_or(name: &str, default: &str) -> String {
    env_var(name).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable via `FromStr`, falling back to `default` if
/// unset; surfaces a parse error otherwise.
pub(crate) fn env_parse_or<T>(name: &'static str, default: T) -> Result<T, Report<Error>>
where
    T: FromStr,
{
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Report::new(Error::Parse(name)))
            .describe_lazy(|| format!("provided value: '{raw}'"))
            .help("check the variable's value matches the expected type"),
    }
}

/// Parse a duration (in whole seconds) from an environment variable.
pub(crate) fn env_duration_secs_or(
    name: &'static str,
    default: Duration,
) -> Result<Duration, Report<Error>> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| Report::new(Error::Parse(name)))
            .describe_lazy(|| format!("provided value: '{raw}'")),
    }
}

/// Parse a byte count, accepting plain integers or scientific-notation floats
/// (e.g. `"4.194304e+06"`), floored to the nearest byte. Grounds
/// `DiannaConfig::chunk_size`'s acceptance of float-like env values.
pub(crate) fn env_bytes_or(name: &'static str, default: u64) -> Result<u64, Report<Error>> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => {
            if let Ok(whole) = raw.parse::<u64>() {
                return Ok(whole);
            }
            raw.parse::<f64>()
                .map(|v| v.floor() as u64)
                .map_err(|_| Report::new(Error::Parse(name)))
                .describe_lazy(|| format!("provided value: '{raw}'"))
                .help("expected an integer or scientific-notation byte count")
        }
    }
}

/// Wrap a secret-bearing environment variable as a [`ComparableSecretString`].
pub(crate) fn env_secret(name: &str) -> Option<ComparableSecretString> {
    env_var(name).map(ComparableSecretString::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_env_parses_case_insensitively() {
        assert_eq!("PROD".parse::<AppEnv>(), Ok(AppEnv::Prod));
        assert_eq!("dev".parse::<AppEnv>(), Ok(AppEnv::Dev));
        assert!("nonsense".parse::<AppEnv>().is_err());
    }
}
