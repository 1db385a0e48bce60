//! Retry, backoff, DLQ, and batching settings shared by the worker pool.

use error_stack::Report;
use getset::{CopyGetters, Getters};
use std::time::Duration;

use crate::config::{env_or, env_parse_or, Error};
use crate::errors::{BackoffFamily, Category};

/// Worker pool settings: task-queue connection, retry policy, DLQ retention,
/// and batch fan-out defaults.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct WorkersConfig {
    /// Task-queue broker connection URL.
    #[getset(get = "pub")]
    broker_url: String,

    /// Task-queue result-backend connection URL.
    #[getset(get = "pub")]
    backend_url: String,

    /// Maximum retry attempts for a scan-request task before dead-lettering.
    #[getset(get_copy = "pub")]
    scan_request_max_retries: u32,

    /// How long dead letters remain in their family's DLQ before expiring.
    #[getset(get_copy = "pub")]
    dlq_expire_after: Duration,

    /// Base delay (seconds) for [`BackoffFamily::Connector`].
    #[getset(get_copy = "pub")]
    connector_retry_backoff_base: u32,

    /// Base delay (seconds) for [`BackoffFamily::Dsxa`].
    #[getset(get_copy = "pub")]
    dsxa_retry_backoff_base: u32,

    /// Base delay (seconds) for [`BackoffFamily::ServerError`].
    #[getset(get_copy = "pub")]
    server_error_retry_backoff_base: u32,

    retry_connector_connection_errors: bool,
    retry_connector_server_errors: bool,
    retry_connector_client_errors: bool,
    retry_dsxa_timeout_errors: bool,
    retry_dsxa_server_errors: bool,
    retry_dsxa_client_errors: bool,
    retry_queue_dispatch_errors: bool,

    /// Whether connectors may submit batched scan requests.
    #[getset(get_copy = "pub")]
    scan_request_batch_enabled: bool,

    /// Default fan-out chunk size when a batch doesn't specify one.
    #[getset(get_copy = "pub")]
    scan_request_batch_default_size: u32,

    /// Largest batch size a connector may request.
    #[getset(get_copy = "pub")]
    scan_request_batch_max_size: u32,
}

impl WorkersConfig {
    /// Load worker settings from the environment.
    pub fn from_env() -> Result<Self, Report<Error>> {
        Ok(WorkersConfig {
            broker_url: env_or("DSXCONNECT_WORKERS__BROKER", "redis://redis:6379/5"),
            backend_url: env_or("DSXCONNECT_WORKERS__BACKEND", "redis://redis:6379/6"),
            scan_request_max_retries: env_parse_or("DSXCONNECT_WORKERS__SCAN_REQUEST_MAX_RETRIES", 1)?,
            dlq_expire_after: Duration::from_secs(
                env_parse_or::<u64>("DSXCONNECT_WORKERS__DLQ_EXPIRE_AFTER_DAYS", 7)? * 86_400,
            ),
            connector_retry_backoff_base: env_parse_or(
                "DSXCONNECT_WORKERS__CONNECTOR_RETRY_BACKOFF_BASE",
                5,
            )?,
            dsxa_retry_backoff_base: env_parse_or("DSXCONNECT_WORKERS__DSXA_RETRY_BACKOFF_BASE", 3)?,
            server_error_retry_backoff_base: env_parse_or(
                "DSXCONNECT_WORKERS__SERVER_ERROR_RETRY_BACKOFF_BASE",
                5,
            )?,
            retry_connector_connection_errors: env_parse_or(
                "DSXCONNECT_WORKERS__RETRY_CONNECTOR_CONNECTION_ERRORS",
                true,
            )?,
            retry_connector_server_errors: env_parse_or(
                "DSXCONNECT_WORKERS__RETRY_CONNECTOR_SERVER_ERRORS",
                true,
            )?,
            retry_connector_client_errors: env_parse_or(
                "DSXCONNECT_WORKERS__RETRY_CONNECTOR_CLIENT_ERRORS",
                true,
            )?,
            retry_dsxa_timeout_errors: env_parse_or("DSXCONNECT_WORKERS__RETRY_DSXA_TIMEOUT_ERRORS", true)?,
            retry_dsxa_server_errors: env_parse_or("DSXCONNECT_WORKERS__RETRY_DSXA_SERVER_ERRORS", true)?,
            retry_dsxa_client_errors: env_parse_or("DSXCONNECT_WORKERS__RETRY_DSXA_CLIENT_ERRORS", true)?,
            retry_queue_dispatch_errors: env_parse_or(
                "DSXCONNECT_WORKERS__RETRY_QUEUE_DISPATCH_ERRORS",
                false,
            )?,
            scan_request_batch_enabled: env_parse_or(
                "DSXCONNECT_WORKERS__SCAN_REQUEST_BATCH_ENABLED",
                false,
            )?,
            scan_request_batch_default_size: env_parse_or(
                "DSXCONNECT_WORKERS__SCAN_REQUEST_BATCH_DEFAULT_SIZE",
                10,
            )?,
            scan_request_batch_max_size: env_parse_or(
                "DSXCONNECT_WORKERS__SCAN_REQUEST_BATCH_MAX_SIZE",
                100,
            )?,
        })
    }

    /// Whether a category's errors should be retried at all, per the
    /// per-category retry toggles (on top of [`Category::is_retryable`]).
    pub fn retries_enabled_for(&self, category: Category) -> bool {
        match category {
            Category::ConnectorConnection => self.retry_connector_connection_errors,
            Category::ConnectorServer => self.retry_connector_server_errors,
            Category::ConnectorClient => self.retry_connector_client_errors,
            Category::DsxaTimeout => self.retry_dsxa_timeout_errors,
            Category::DsxaServer => self.retry_dsxa_server_errors,
            Category::DsxaClient => self.retry_dsxa_client_errors,
            Category::QueueDispatch => self.retry_queue_dispatch_errors,
            Category::Malformed | Category::DsxaAuth | Category::Unclassified => false,
        }
    }

    /// The configured backoff base, in seconds, for a backoff family.
    pub fn backoff_base_secs(&self, family: BackoffFamily) -> u32 {
        match family {
            BackoffFamily::Connector => self.connector_retry_backoff_base,
            BackoffFamily::Dsxa => self.dsxa_retry_backoff_base,
            BackoffFamily::ServerError => self.server_error_retry_backoff_base,
        }
    }

    /// Resolve a batch's effective fan-out size: an explicit request value,
    /// clamped to `[1, scan_request_batch_max_size]`, or the configured default.
    pub fn resolve_batch_size(&self, requested: Option<u32>) -> u32 {
        requested
            .map(|n| n.clamp(1, self.scan_request_batch_max_size))
            .unwrap_or(self.scan_request_batch_default_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkersConfig {
        WorkersConfig {
            broker_url: "redis://x/5".to_string(),
            backend_url: "redis://x/6".to_string(),
            scan_request_max_retries: 1,
            dlq_expire_after: Duration::from_secs(7 * 86_400),
            connector_retry_backoff_base: 5,
            dsxa_retry_backoff_base: 3,
            server_error_retry_backoff_base: 5,
            retry_connector_connection_errors: true,
            retry_connector_server_errors: true,
            retry_connector_client_errors: true,
            retry_dsxa_timeout_errors: true,
            retry_dsxa_server_errors: true,
            retry_dsxa_client_errors: true,
            retry_queue_dispatch_errors: false,
            scan_request_batch_enabled: false,
            scan_request_batch_default_size: 10,
            scan_request_batch_max_size: 100,
        }
    }

    #[test]
    fn queue_dispatch_retries_are_disabled_by_default() {
        assert!(!sample().retries_enabled_for(Category::QueueDispatch));
        assert!(sample().retries_enabled_for(Category::ConnectorConnection));
    }

    #[test]
    fn batch_size_resolution_clamps_to_max() {
        let cfg = sample();
        assert_eq!(cfg.resolve_batch_size(None), 10);
        assert_eq!(cfg.resolve_batch_size(Some(500)), 100);
        assert_eq!(cfg.resolve_batch_size(Some(0)), 1);
        assert_eq!(cfg.resolve_batch_size(Some(42)), 42);
    }
}
