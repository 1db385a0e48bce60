//! The abstract base every worker builds on: task-context capture, the
//! retry/backoff decision, DLQ emission, and the sticky DSXA-auth latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use error_stack::Report;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::config::{RedisConfig, WorkersConfig};
use crate::contracts::{DlqRecord, Queue};
use crate::errors::{Category, WorkerError};
use crate::queue::{EnqueuedTask, SendOptions, TaskQueue, TaskState};
use crate::state::StateStore;

/// What to do with a task after its worker reported an error.
#[derive(Debug)]
pub enum Disposition {
    /// The task was rescheduled with backoff; this attempt does not count as
    /// a terminal failure.
    Retried {
        /// Delay, in seconds, before the task is eligible to run again.
        after_secs: u64,
    },
    /// The task was written to the dead-letter queue and marked `FAILURE`.
    DeadLettered {
        /// The short reason the category maps to, e.g. `"dsxa_auth"`.
        reason: &'static str,
    },
}

/// Which retry categories a worker is willing to have the kernel retry at
/// all, per spec 4.C's `RETRY_GROUPS`. This is independent of (and checked
/// before) the per-category on/off toggles in [`WorkersConfig`]: a worker
/// that declares [`RetryGroups::None`] never retries, no matter how an
/// operator has the toggles set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryGroups {
    /// Every category in spec 4.C's enabled set: the scan-request worker.
    All,
    /// Only the connector-connectivity categories: the DIANNA worker, whose
    /// deep-analysis connectivity is mapped onto the connector family.
    ConnectorOnly,
    /// No category: the batch worker, which dead-letters any failure outright.
    None,
}

impl RetryGroups {
    fn permits(self, category: Category) -> bool {
        match self {
            RetryGroups::All => true,
            RetryGroups::ConnectorOnly => matches!(
                category,
                Category::ConnectorConnection | Category::ConnectorClient | Category::ConnectorServer
            ),
            RetryGroups::None => false,
        }
    }
}

/// Shared state and policy every worker consults on failure.
#[derive(Clone)]
pub struct WorkerKernel {
    state: StateStore,
    queue: TaskQueue,
    workers: WorkersConfig,
    redis: RedisConfig,
    dsxa_auth_failed: Arc<AtomicBool>,
    dsxa_auth_log_emitted: Arc<AtomicBool>,
}

impl WorkerKernel {
    /// Build a kernel over the given state store and task queue.
    pub fn new(state: StateStore, queue: TaskQueue, workers: WorkersConfig, redis: RedisConfig) -> Self {
        Self {
            state,
            queue,
            workers,
            redis,
            dsxa_auth_failed: Arc::new(AtomicBool::new(false)),
            dsxa_auth_log_emitted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The state store shared by every worker.
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// The task queue shared by every worker.
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// The worker retry/batch configuration.
    pub fn workers_config(&self) -> &WorkersConfig {
        &self.workers
    }

    /// The malicious-index retention window, in seconds, per
    /// [`RedisConfig::index_retain_days`].
    pub fn malicious_index_retain_secs(&self) -> i64 {
        i64::from(self.redis.index_retain_days()) * 86_400
    }

    /// Whether the sticky process-wide DSXA-auth flag is set. Workers
    /// consult this before attempting a scanner call, per spec 4.D.2.
    pub fn dsxa_auth_failed(&self) -> bool {
        self.dsxa_auth_failed.load(Ordering::SeqCst)
    }

    /// Set the sticky DSXA-auth flag, logging the diagnostic exactly once
    /// for the life of the process.
    pub fn mark_dsxa_auth_failed(&self) {
        self.dsxa_auth_failed.store(true, Ordering::SeqCst);
        if !self.dsxa_auth_log_emitted.swap(true, Ordering::SeqCst) {
            error!("DSXA rejected credentials; failing fast until process restart");
        }
    }

    /// Decide what happens to a task that failed with `err`: retry with
    /// backoff, or dead-letter. Never retries pause/backpressure reschedules
    /// (those bypass this path entirely and call
    /// [`TaskQueue::send_task`] directly, per spec invariant I3).
    pub async fn handle_failure<T>(
        &self,
        task: &EnqueuedTask<T>,
        payload: &T,
        queue: Queue,
        family: &'static str,
        payload_snapshot: serde_json::Value,
        err: &WorkerError,
        retry_groups: RetryGroups,
    ) -> Result<Disposition, Report<crate::state::Error>>
    where
        T: serde::Serialize + DeserializeOwned,
    {
        let category = err.category();
        if category == Category::DsxaAuth {
            self.mark_dsxa_auth_failed();
        }

        let retryable =
            retry_groups.permits(category) && category.is_retryable() && self.workers.retries_enabled_for(category);
        let max_retries = self.workers.scan_request_max_retries();

        if retryable && task.retry_count < max_retries {
            let base = category
                .backoff_family()
                .map(|family| self.workers.backoff_base_secs(family))
                .unwrap_or(0);
            let after_secs = backoff_delay(base, task.retry_count);

            self.queue
                .send_task(
                    queue,
                    payload,
                    SendOptions {
                        countdown: after_secs,
                        scan_request_task_id: Some(task.scan_request_task_id.clone()),
                        upstream_task_id: Some(task.task_id.clone()),
                        retry_count: task.retry_count + 1,
                    },
                )
                .await
                .ok();
            self.queue.set_state(&task.task_id, TaskState::Retry).await.ok();
            warn!(task_id = %task.task_id, after_secs, "rescheduling after retryable failure");
            return Ok(Disposition::Retried { after_secs });
        }

        let record = DlqRecord {
            reason: category.dlq_reason().to_string(),
            error_class: category.to_string(),
            error_message: err.to_string(),
            scan_request_task_id: task.scan_request_task_id.clone(),
            current_task_id: task.task_id.clone(),
            upstream_task_id: task.upstream_task_id.clone(),
            retry_count: task.retry_count,
            payload_snapshot,
            created_at: now_unix(),
        };
        let record_json = serde_json::to_string(&record).unwrap_or_default();
        self.state
            .enqueue_dlq(
                family,
                &record_json,
                self.workers.dlq_expire_after().as_secs() as i64,
            )
            .await?;
        self.queue.set_state(&task.task_id, TaskState::Failure).await.ok();
        Ok(Disposition::DeadLettered {
            reason: category.dlq_reason(),
        })
    }

    /// Dead-letter a task directly, bypassing the retry decision entirely.
    /// Used only when a task's payload couldn't even be deserialized into its
    /// worker's expected type, so no concrete payload exists to hand to
    /// [`Self::handle_failure`]'s generic retry path.
    pub async fn dead_letter_undeserializable(
        &self,
        task_id: &str,
        scan_request_task_id: &str,
        upstream_task_id: Option<String>,
        retry_count: u32,
        family: &'static str,
        error_message: String,
    ) -> Result<(), Report<crate::state::Error>> {
        let record = DlqRecord {
            reason: "malformed".to_string(),
            error_class: Category::Malformed.to_string(),
            error_message,
            scan_request_task_id: scan_request_task_id.to_string(),
            current_task_id: task_id.to_string(),
            upstream_task_id,
            retry_count,
            payload_snapshot: serde_json::Value::Null,
            created_at: now_unix(),
        };
        let record_json = serde_json::to_string(&record).unwrap_or_default();
        self.state
            .enqueue_dlq(family, &record_json, self.workers.dlq_expire_after().as_secs() as i64)
            .await?;
        self.queue.set_state(task_id, TaskState::Failure).await.ok();
        Ok(())
    }
}

/// Exponential backoff per spec §7: `base * 2^retry_count`.
fn backoff_delay(base_secs: u32, retry_count: u32) -> u64 {
    u64::from(base_secs) * 2u64.pow(retry_count)
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsxa_auth_flag_is_sticky_once_set() {
        let flag = Arc::new(AtomicBool::new(false));
        flag.store(true, Ordering::SeqCst);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn backoff_delay_doubles_per_retry() {
        assert_eq!(backoff_delay(3, 0), 3);
        assert_eq!(backoff_delay(3, 1), 6);
        assert_eq!(backoff_delay(3, 2), 12);
        assert_eq!(backoff_delay(5, 3), 40);
    }

    #[test]
    fn retry_groups_none_permits_nothing() {
        for category in [
            Category::QueueDispatch,
            Category::ConnectorConnection,
            Category::DsxaServer,
        ] {
            assert!(!RetryGroups::None.permits(category));
        }
    }

    #[test]
    fn retry_groups_connector_only_excludes_dsxa_and_queue_dispatch() {
        assert!(RetryGroups::ConnectorOnly.permits(Category::ConnectorConnection));
        assert!(RetryGroups::ConnectorOnly.permits(Category::ConnectorServer));
        assert!(!RetryGroups::ConnectorOnly.permits(Category::DsxaServer));
        assert!(!RetryGroups::ConnectorOnly.permits(Category::QueueDispatch));
    }

    #[test]
    fn retry_groups_all_permits_every_retryable_category() {
        assert!(RetryGroups::All.permits(Category::QueueDispatch));
        assert!(RetryGroups::All.permits(Category::DsxaClient));
    }

    #[test]
    fn backoff_delay_is_zero_when_base_is_zero() {
        assert_eq!(backoff_delay(0, 5), 0);
    }
}
