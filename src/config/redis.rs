//! Connection settings for auxiliary Redis-backed stores that live outside
//! the primary control-plane connection in [`Config::redis_url`](super::Config::redis_url).

use error_stack::Report;
use getset::{CopyGetters, Getters};

use crate::config::{env_or, env_parse_or, Error};

/// The results/SIEM-index database: a secondary Redis instance (or database
/// index) holding the malicious-verdict correlation index.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct RedisConfig {
    /// Connection URL for the results database.
    #[getset(get = "pub")]
    results_db_url: String,

    /// Number of entries to retain before the oldest are evicted.
    #[getset(get_copy = "pub")]
    results_db_retain: u32,

    /// Connection URL for the malicious-verdict SIEM index.
    #[getset(get = "pub")]
    index_db_url: String,

    /// Days to retain SIEM index entries.
    #[getset(get_copy = "pub")]
    index_retain_days: u32,
}

impl RedisConfig {
    /// Load auxiliary Redis settings from the environment.
    pub fn from_env() -> Result<Self, Report<Error>> {
        Ok(RedisConfig {
            results_db_url: env_or("DSXCONNECT_RESULTS_DB", "redis://redis:6379/3"),
            results_db_retain: env_parse_or("DSXCONNECT_RESULTS_DB__RETAIN", 1000u32)?,
            index_db_url: env_or("DSXCONNECT_DIANNA__INDEX_DATABASE_LOC", "redis://redis:6379/4"),
            index_retain_days: env_parse_or("DSXCONNECT_DIANNA__INDEX_RETAIN_DAYS", 90u32)?,
        })
    }
}
