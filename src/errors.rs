//! The error taxonomy shared by every worker, and the retry/DLQ policy table
//! that the worker kernel consults to decide what happens to a failed task.

use std::fmt;

/// A worker-facing error, carrying enough information for the kernel to
/// classify it into a [`Category`] without the kernel needing to know about
/// every worker's concrete error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    /// The input failed schema validation. Never retried.
    #[error("malformed scan request: {0}")]
    Malformed(String),

    /// The scanner rejected credentials (401/403). Never retried; sets the
    /// sticky process-wide auth flag.
    #[error("DSXA auth failure: {0}")]
    DsxaAuth(String),

    /// The scanner returned a 4xx (other than auth).
    #[error("DSXA client error: {0}")]
    DsxaClient(String),

    /// The scanner returned a 5xx, or reported a transient "initializing" verdict.
    #[error("DSXA server error: {0}")]
    DsxaServer(String),

    /// The scanner request timed out.
    #[error("DSXA timeout: {0}")]
    DsxaTimeout(String),

    /// DNS/refused/reset while reading from the connector.
    #[error("connector connection error: {0}")]
    ConnectorConnection(String),

    /// The connector returned a 4xx.
    #[error("connector client error: {0}")]
    ConnectorClient(String),

    /// The connector returned a 5xx.
    #[error("connector server error: {0}")]
    ConnectorServer(String),

    /// Failed to enqueue a downstream task.
    #[error("queue dispatch error: {0}")]
    QueueDispatch(String),

    /// Anything not covered by the categories above.
    #[error("unclassified error ({class}): {message}")]
    Unclassified {
        /// The originating type's name, kept for the DLQ record.
        class: String,
        /// The originating error's display message.
        message: String,
    },
}

impl WorkerError {
    /// Classify this error into a retry category.
    pub fn category(&self) -> Category {
        match self {
            WorkerError::Malformed(_) => Category::Malformed,
            WorkerError::DsxaAuth(_) => Category::DsxaAuth,
            WorkerError::DsxaClient(_) => Category::DsxaClient,
            WorkerError::DsxaServer(_) => Category::DsxaServer,
            WorkerError::DsxaTimeout(_) => Category::DsxaTimeout,
            WorkerError::ConnectorConnection(_) => Category::ConnectorConnection,
            WorkerError::ConnectorClient(_) => Category::ConnectorClient,
            WorkerError::ConnectorServer(_) => Category::ConnectorServer,
            WorkerError::QueueDispatch(_) => Category::QueueDispatch,
            WorkerError::Unclassified { .. } => Category::Unclassified,
        }
    }
}

/// The error categories from spec §7, each with its own retryability and
/// backoff family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Schema validation failure. Never retried.
    Malformed,
    /// Scanner auth failure. Never retried; sets the sticky flag.
    DsxaAuth,
    /// Scanner 4xx.
    DsxaClient,
    /// Scanner 5xx, or transient "initializing" verdict.
    DsxaServer,
    /// Scanner timeout.
    DsxaTimeout,
    /// Connector DNS/refused/reset.
    ConnectorConnection,
    /// Connector 4xx.
    ConnectorClient,
    /// Connector 5xx.
    ConnectorServer,
    /// Downstream enqueue failure.
    QueueDispatch,
    /// Anything else. Never retried.
    Unclassified,
}

/// Which backoff base a category's delay is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffFamily {
    /// `connector_retry_backoff_base`.
    Connector,
    /// `dsxa_retry_backoff_base`.
    Dsxa,
    /// `server_error_retry_backoff_base`.
    ServerError,
}

impl Category {
    /// Whether this category is retryable at all (subject to the worker's
    /// [`crate::worker::kernel::RetryGroups`] and the retry-count budget).
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            Category::Malformed | Category::DsxaAuth | Category::Unclassified
        )
    }

    /// The backoff family used to compute this category's retry delay.
    pub fn backoff_family(self) -> Option<BackoffFamily> {
        match self {
            Category::DsxaClient | Category::DsxaTimeout => Some(BackoffFamily::Dsxa),
            Category::DsxaServer | Category::QueueDispatch => Some(BackoffFamily::ServerError),
            Category::ConnectorConnection | Category::ConnectorClient | Category::ConnectorServer => {
                Some(BackoffFamily::Connector)
            }
            Category::Malformed | Category::DsxaAuth | Category::Unclassified => None,
        }
    }

    /// The short DLQ reason string used when this category's error is dead-lettered.
    pub fn dlq_reason(self) -> &'static str {
        match self {
            Category::Malformed => "malformed",
            Category::DsxaAuth => "dsxa_auth",
            Category::DsxaClient => "dsxa_client",
            Category::DsxaServer => "dsxa_server",
            Category::DsxaTimeout => "dsxa_timeout",
            Category::ConnectorConnection => "connector_connection",
            Category::ConnectorClient => "connector_client",
            Category::ConnectorServer => "connector_server",
            Category::QueueDispatch => "queue_dispatch",
            Category::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dlq_reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_and_auth_and_unclassified_are_never_retried() {
        assert!(!Category::Malformed.is_retryable());
        assert!(!Category::DsxaAuth.is_retryable());
        assert!(!Category::Unclassified.is_retryable());
    }

    #[test]
    fn everything_else_is_retryable() {
        for category in [
            Category::DsxaClient,
            Category::DsxaServer,
            Category::DsxaTimeout,
            Category::ConnectorConnection,
            Category::ConnectorClient,
            Category::ConnectorServer,
            Category::QueueDispatch,
        ] {
            assert!(category.is_retryable(), "{category} should be retryable");
        }
    }

    #[test]
    fn backoff_families_match_spec_table() {
        assert_eq!(
            Category::ConnectorConnection.backoff_family(),
            Some(BackoffFamily::Connector)
        );
        assert_eq!(Category::DsxaTimeout.backoff_family(), Some(BackoffFamily::Dsxa));
        assert_eq!(
            Category::DsxaServer.backoff_family(),
            Some(BackoffFamily::ServerError)
        );
        assert_eq!(
            Category::QueueDispatch.backoff_family(),
            Some(BackoffFamily::ServerError)
        );
        assert_eq!(Category::Malformed.backoff_family(), None);
    }
}
