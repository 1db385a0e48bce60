//! The error-category retry/backoff table, exercised end to end from
//! [`WorkerError`] through to [`Category`] (spec §7's table, invariant I6's
//! "every category classifies to something" guarantee).

use dsx_connect_worker::errors::{BackoffFamily, Category, WorkerError};

#[test]
fn every_worker_error_variant_classifies_to_its_category() {
    let cases = [
        (WorkerError::Malformed("x".into()), Category::Malformed),
        (WorkerError::DsxaAuth("x".into()), Category::DsxaAuth),
        (WorkerError::DsxaClient("x".into()), Category::DsxaClient),
        (WorkerError::DsxaServer("x".into()), Category::DsxaServer),
        (WorkerError::DsxaTimeout("x".into()), Category::DsxaTimeout),
        (
            WorkerError::ConnectorConnection("x".into()),
            Category::ConnectorConnection,
        ),
        (WorkerError::ConnectorClient("x".into()), Category::ConnectorClient),
        (WorkerError::ConnectorServer("x".into()), Category::ConnectorServer),
        (WorkerError::QueueDispatch("x".into()), Category::QueueDispatch),
        (
            WorkerError::Unclassified {
                class: "Foo".into(),
                message: "bar".into(),
            },
            Category::Unclassified,
        ),
    ];
    for (err, expected) in cases {
        assert_eq!(err.category(), expected, "{err}");
    }
}

#[test]
fn never_retried_categories_never_resolve_to_a_backoff_family() {
    for category in [Category::Malformed, Category::DsxaAuth, Category::Unclassified] {
        assert!(!category.is_retryable());
        assert_eq!(category.backoff_family(), None);
    }
}

#[test]
fn retryable_categories_each_resolve_to_exactly_one_backoff_family() {
    let cases = [
        (Category::ConnectorConnection, BackoffFamily::Connector),
        (Category::ConnectorClient, BackoffFamily::Connector),
        (Category::ConnectorServer, BackoffFamily::Connector),
        (Category::DsxaClient, BackoffFamily::Dsxa),
        (Category::DsxaTimeout, BackoffFamily::Dsxa),
        (Category::DsxaServer, BackoffFamily::ServerError),
        (Category::QueueDispatch, BackoffFamily::ServerError),
    ];
    for (category, family) in cases {
        assert!(category.is_retryable());
        assert_eq!(category.backoff_family(), Some(family));
    }
}

#[test]
fn dlq_reason_is_unique_per_category() {
    let categories = [
        Category::Malformed,
        Category::DsxaAuth,
        Category::DsxaClient,
        Category::DsxaServer,
        Category::DsxaTimeout,
        Category::ConnectorConnection,
        Category::ConnectorClient,
        Category::ConnectorServer,
        Category::QueueDispatch,
        Category::Unclassified,
    ];
    let reasons: Vec<&str> = categories.iter().map(|c| c.dlq_reason()).collect();
    let mut unique = reasons.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), reasons.len(), "dlq reasons must not collide: {reasons:?}");
}
