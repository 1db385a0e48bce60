//! The scan-request-batch worker: validates a whole batch up front, then fans
//! it out to [`Queue::Request`] in configurably-sized chunks. Implements spec
//! 4.E. Never retried: any failure here is a dead letter (this worker's
//! payload is a batch, so the retry semantics of a single scan request don't
//! apply to it).

use error_stack::Report;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::contracts::{Queue, ScanRequest};
use crate::errors::WorkerError;
use crate::queue::{EnqueuedTask, SendOptions, TaskState};
use crate::worker::kernel::WorkerKernel;

/// The DLQ/retry family name for this worker.
pub const FAMILY: &str = "scan_request_batch";

/// A batch task's payload: the requests to fan out, and an optional override
/// of the configured chunk size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPayload {
    /// The scan requests to enqueue individually.
    pub requests: Vec<ScanRequest>,
    /// An explicit batch (chunk) size, overriding the worker's configured default.
    #[serde(default)]
    pub batch_size: Option<u32>,
}

/// Fans a batch of [`ScanRequest`]s out to [`Queue::Request`].
pub struct BatchWorker {
    kernel: WorkerKernel,
}

impl BatchWorker {
    /// Build a worker over the shared kernel.
    pub fn new(kernel: WorkerKernel) -> Self {
        Self { kernel }
    }

    /// Handle one dequeued batch task.
    pub async fn handle(&self, task: EnqueuedTask<BatchPayload>) -> Result<String, Report<crate::state::Error>> {
        let payload = match task.item() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(task_id = %task.task_id, %err, "undeserializable batch payload");
                self.kernel
                    .dead_letter_undeserializable(
                        &task.task_id,
                        &task.scan_request_task_id,
                        task.upstream_task_id.clone(),
                        task.retry_count,
                        FAMILY,
                        err.to_string(),
                    )
                    .await?;
                return Ok("malformed".to_string());
            }
        };

        match self.run(&task, &payload).await {
            Ok(enqueued) => {
                self.kernel.queue().set_state(&task.task_id, TaskState::Success).await.ok();
                Ok(format!("ENQUEUED:{enqueued}"))
            }
            Err(err) => {
                let err = err.current_context().clone();
                let snapshot = batch_snapshot(&payload);
                let disposition = self
                    .kernel
                    .handle_failure(
                        &task,
                        &payload,
                        Queue::RequestBatch,
                        FAMILY,
                        snapshot,
                        &err,
                        crate::worker::kernel::RetryGroups::None,
                    )
                    .await?;
                Ok(match disposition {
                    crate::worker::kernel::Disposition::Retried { .. } => "RETRY".to_string(),
                    crate::worker::kernel::Disposition::DeadLettered { reason } => reason.to_string(),
                })
            }
        }
    }

    async fn run(
        &self,
        task: &EnqueuedTask<BatchPayload>,
        payload: &BatchPayload,
    ) -> Result<usize, Report<WorkerError>> {
        if payload.requests.is_empty() {
            return Err(Report::new(WorkerError::Malformed(
                "batch must not be empty".to_string(),
            )));
        }

        for (index, request) in payload.requests.iter().enumerate() {
            request
                .validate()
                .map_err(|err| Report::new(WorkerError::Malformed(format!("item {index}: {err}"))))?;
        }

        let batch_size = self.kernel.workers_config().resolve_batch_size(payload.batch_size);
        let root_id = &task.scan_request_task_id;
        let mut enqueued = 0usize;

        for chunk in payload.requests.chunks(batch_size as usize) {
            for request in chunk {
                self.kernel
                    .queue()
                    .send_task(
                        Queue::Request,
                        request,
                        SendOptions {
                            countdown: 0,
                            scan_request_task_id: Some(root_id.clone()),
                            upstream_task_id: Some(task.task_id.clone()),
                            retry_count: 0,
                        },
                    )
                    .await
                    .map_err(|err| Report::new(WorkerError::QueueDispatch(err.to_string())))?;
                enqueued += 1;
            }
            info!(
                task_id = %task.task_id,
                chunk_size = chunk.len(),
                enqueued,
                total = payload.requests.len(),
                "enqueued batch chunk"
            );
        }

        Ok(enqueued)
    }
}

/// A bounded DLQ snapshot: the batch's size and its first item, not the whole
/// batch, so a large failed batch doesn't blow up the dead-letter record.
fn batch_snapshot(payload: &BatchPayload) -> serde_json::Value {
    json!({
        "batch_count": payload.requests.len(),
        "first_item": payload.requests.first(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_bounds_to_count_and_first_item() {
        let payload = BatchPayload {
            requests: vec![
                ScanRequest {
                    location: "/a".to_string(),
                    metainfo: String::new(),
                    connector: None,
                    connector_url: Some("http://c".to_string()),
                    size_in_bytes: None,
                    scan_job_id: None,
                },
                ScanRequest {
                    location: "/b".to_string(),
                    metainfo: String::new(),
                    connector: None,
                    connector_url: Some("http://c".to_string()),
                    size_in_bytes: None,
                    scan_job_id: None,
                },
            ],
            batch_size: None,
        };
        let snapshot = batch_snapshot(&payload);
        assert_eq!(snapshot["batch_count"], 2);
        assert_eq!(snapshot["first_item"]["location"], "/a");
    }
}
