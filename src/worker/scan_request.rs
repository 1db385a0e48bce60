//! The scan-request worker: validates a request, honours job pause/cancel,
//! enforces scanner backpressure, streams the file through the scanner, and
//! dispatches the resulting verdict. Implements spec 4.D's twelve-step
//! algorithm in order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use error_stack::Report;
use futures::{Stream, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{ConnectorClient, ScannerClient};
use crate::contracts::{Queue, ScanRequest, Verdict, VerdictKind};
use crate::errors::WorkerError;
use crate::queue::{EnqueuedTask, SendOptions, TaskState};
use crate::worker::kernel::{Disposition, WorkerKernel};

/// The DLQ/retry family name for this worker.
pub const FAMILY: &str = "scan_request";

/// A verdict alongside the request it was produced for, the shape dispatched to [`Queue::Verdict`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictEnvelope {
    /// The original scan request.
    pub request: ScanRequest,
    /// The verdict reached for it.
    pub verdict: Verdict,
}

/// Processes one [`ScanRequest`] end to end.
pub struct ScanRequestWorker {
    kernel: WorkerKernel,
    scanner: ScannerClient,
    connector: ConnectorClient,
    max_file_size_bytes: u64,
    max_inflight: u32,
}

impl ScanRequestWorker {
    /// Build a worker over the shared kernel and the scanner/connector clients it drives.
    pub fn new(
        kernel: WorkerKernel,
        scanner: ScannerClient,
        connector: ConnectorClient,
        max_file_size_bytes: u64,
        max_inflight: u32,
    ) -> Self {
        Self {
            kernel,
            scanner,
            connector,
            max_file_size_bytes,
            max_inflight,
        }
    }

    /// Handle one dequeued task: run the algorithm, and on failure consult the
    /// kernel's retry/DLQ policy. Returns the outcome string (spec 4.D / 8's
    /// scenario return values), or the dead-letter reason when exhausted.
    pub async fn handle(
        &self,
        task: EnqueuedTask<ScanRequest>,
    ) -> Result<&'static str, Report<crate::state::Error>> {
        let request = match task.item() {
            Ok(request) => request,
            Err(err) => {
                warn!(task_id = %task.task_id, %err, "undeserializable scan request payload");
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
                return Ok("malformed");
            }
        };

        match self.run(&task, &request).await {
            Ok(outcome) => {
                self.kernel.queue().set_state(&task.task_id, TaskState::Success).await.ok();
                Ok(outcome)
            }
            Err(err) => {
                let err = err.current_context().clone();
                let snapshot = serde_json::to_value(&request).unwrap_or(serde_json::Value::Null);
                let disposition = self
                    .kernel
                    .handle_failure(
                        &task,
                        &request,
                        Queue::Request,
                        FAMILY,
                        snapshot,
                        &err,
                        crate::worker::kernel::RetryGroups::All,
                    )
                    .await?;
                Ok(disposition_outcome(disposition))
            }
        }
    }

    async fn run(
        &self,
        task: &EnqueuedTask<ScanRequest>,
        request: &ScanRequest,
    ) -> Result<&'static str, Report<WorkerError>> {
        // 1. Validate.
        request
            .validate()
            .map_err(|err| Report::new(WorkerError::Malformed(err)))?;

        // 2. Fail-fast auth: sticky process-wide flag short-circuits before any I/O.
        if self.kernel.dsxa_auth_failed() {
            return Err(Report::new(WorkerError::DsxaAuth(
                "sticky DSXA-auth flag is set; failing fast".to_string(),
            )));
        }

        // 3. Job timestamp bookkeeping (best-effort, errors swallowed).
        if let Some(job_id) = &request.scan_job_id {
            if let Err(err) = self.kernel.state().touch_job(job_id, now_unix()).await {
                warn!(%job_id, %err, "job timestamp bookkeeping failed (best-effort)");
            }
        }

        // 4. Pause/cancel.
        if let Some(job_id) = &request.scan_job_id {
            match self.kernel.state().job_state(job_id).await {
                Ok(job_state) => {
                    if job_state.cancelled {
                        info!(task_id = %task.task_id, %job_id, "job cancelled; dropping task");
                        return Ok("CANCELLED");
                    }
                    if job_state.paused {
                        return self.reschedule_paused(task, request).await;
                    }
                }
                Err(err) => warn!(%job_id, %err, "job state read failed (best-effort)"),
            }
        }

        let request_start = Instant::now();

        // 5. Preflight size skip, against the request's size hint.
        if let Some(hint) = request.size_in_bytes {
            if hint > self.max_file_size_bytes {
                warn!(
                    location = %request.location,
                    hint,
                    limit = self.max_file_size_bytes,
                    "skipping oversize file (hint)"
                );
                self.emit_oversize_verdict(task, request, hint, request_start).await?;
                return Ok("SKIPPED_FILE_TOO_LARGE");
            }
        }

        // 6. Backpressure acquire.
        let (acquired, observed) = self
            .kernel
            .state()
            .acquire_scanner_slot(self.max_inflight)
            .await
            .map_err(|err| {
                Report::new(WorkerError::Unclassified {
                    class: "state::Error".to_string(),
                    message: err.to_string(),
                })
            })?;
        if !acquired {
            warn!(
                task_id = %task.task_id,
                observed,
                limit = self.max_inflight,
                "scanner at capacity"
            );
            return self.reschedule_backpressure(task, request).await;
        }

        // 12. Always release, on every exit path from here on.
        let outcome = self.scan_and_dispatch(task, request, request_start).await;
        if let Err(err) = self.kernel.state().release_scanner_slot().await {
            warn!(%err, "scanner slot release failed (best-effort; TTL bounds drift)");
        }
        outcome
    }

    async fn scan_and_dispatch(
        &self,
        task: &EnqueuedTask<ScanRequest>,
        request: &ScanRequest,
        request_start: Instant,
    ) -> Result<&'static str, Report<WorkerError>> {
        // 7. Stream from the connector.
        let (stream, hinted_size) = self.connector.read_file_stream(request).await?;

        if let Some(size) = hinted_size {
            if size > self.max_file_size_bytes {
                warn!(location = %request.location, size, "skipping oversize file (content-length)");
                self.emit_oversize_verdict(task, request, size, request_start).await?;
                return Ok("SKIPPED_FILE_TOO_LARGE");
            }
        }

        let (limited, observed_total, exceeded) = limit_stream(stream, self.max_file_size_bytes);
        let body = reqwest::Body::wrap_stream(limited);

        // 8 & 9. Scan with DSXA; the scanner client translates the verdict and
        // raises DsxaServerError for the "initializing" transient case.
        let scan_result = self
            .scanner
            .scan_binary_stream(body, request, Some(&task.scan_request_task_id))
            .await;

        let mut verdict = match scan_result {
            Ok(verdict) => verdict,
            Err(err) => {
                if exceeded.load(Ordering::SeqCst) {
                    let size = observed_total.load(Ordering::SeqCst);
                    warn!(location = %request.location, size, "skipping oversize file (actual stream)");
                    self.emit_oversize_verdict(task, request, size, request_start).await?;
                    return Ok("SKIPPED_FILE_TOO_LARGE");
                }
                return Err(err);
            }
        };

        // 10. Elapsed annotation.
        let elapsed_ms = request_start.elapsed().as_secs_f64() * 1000.0;
        verdict.dsxconnect_request_elapsed_ms = Some(elapsed_ms);

        // 11. Dispatch.
        self.dispatch_verdict(task, request.clone(), verdict).await?;
        Ok("SUCCESS")
    }

    async fn dispatch_verdict(
        &self,
        task: &EnqueuedTask<ScanRequest>,
        request: ScanRequest,
        verdict: Verdict,
    ) -> Result<(), Report<WorkerError>> {
        if verdict.verdict == VerdictKind::Malicious {
            let connector_uuid = request.connector.as_ref().map(|c| c.uuid.as_str()).unwrap_or("");
            let connector_url = request.connector_endpoint().unwrap_or("");
            if let Err(err) = self
                .kernel
                .state()
                .record_malicious_index(
                    &task.scan_request_task_id,
                    connector_uuid,
                    connector_url,
                    &request.location,
                    &request.metainfo,
                    self.kernel.malicious_index_retain_secs(),
                )
                .await
            {
                warn!(%err, "malicious index write failed (best-effort)");
            }
        }

        let envelope = VerdictEnvelope { request, verdict };
        self.kernel
            .queue()
            .send_task(
                Queue::Verdict,
                &envelope,
                SendOptions {
                    countdown: 0,
                    scan_request_task_id: Some(task.scan_request_task_id.clone()),
                    upstream_task_id: Some(task.task_id.clone()),
                    retry_count: 0,
                },
            )
            .await
            .map_err(|err| Report::new(WorkerError::QueueDispatch(err.to_string())))?;
        Ok(())
    }

    async fn emit_oversize_verdict(
        &self,
        task: &EnqueuedTask<ScanRequest>,
        request: &ScanRequest,
        size: u64,
        request_start: Instant,
    ) -> Result<(), Report<WorkerError>> {
        let elapsed_ms = request_start.elapsed().as_secs_f64() * 1000.0;
        let verdict = Verdict::oversize(size, elapsed_ms);
        self.dispatch_verdict(task, request.clone(), verdict).await
    }

    async fn reschedule_paused(
        &self,
        task: &EnqueuedTask<ScanRequest>,
        request: &ScanRequest,
    ) -> Result<&'static str, Report<WorkerError>> {
        let delay = 5 + rand::thread_rng().gen_range(0..=5);
        match self.send_self(task, request, delay).await {
            Ok(()) => {
                info!(task_id = %task.task_id, delay, "job paused; rescheduled");
                Ok("PAUSED")
            }
            Err(err) => {
                warn!(task_id = %task.task_id, %err, "pause re-enqueue failed; falling back to a single retry");
                self.send_self(task, request, 5).await?;
                Ok("PAUSED")
            }
        }
    }

    async fn reschedule_backpressure(
        &self,
        task: &EnqueuedTask<ScanRequest>,
        request: &ScanRequest,
    ) -> Result<&'static str, Report<WorkerError>> {
        let delay = 3 + rand::thread_rng().gen_range(0..=3);
        self.send_self(task, request, delay).await?;
        info!(task_id = %task.task_id, delay, "scanner at capacity; rescheduled");
        Ok("BACKPRESSURE")
    }

    /// Reschedule this same task onto [`Queue::Request`], preserving the root
    /// id and NOT consuming the retry budget (spec invariant I3).
    async fn send_self(
        &self,
        task: &EnqueuedTask<ScanRequest>,
        request: &ScanRequest,
        countdown: u64,
    ) -> Result<(), Report<WorkerError>> {
        self.kernel
            .queue()
            .send_task(
                Queue::Request,
                request,
                SendOptions {
                    countdown,
                    scan_request_task_id: Some(task.scan_request_task_id.clone()),
                    upstream_task_id: Some(task.task_id.clone()),
                    retry_count: task.retry_count,
                },
            )
            .await
            .map_err(|err| Report::new(WorkerError::QueueDispatch(err.to_string())))?;
        Ok(())
    }
}

fn disposition_outcome(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Retried { .. } => "RETRY",
        Disposition::DeadLettered { reason } => reason,
    }
}

/// Wrap a byte stream so that it errors out once more than `max_bytes` have
/// been observed, without ever buffering the file in memory. The returned
/// counter and flag let the caller distinguish "really failed" from "aborted
/// for being oversize" after the fact.
fn limit_stream<S>(
    stream: S,
    max_bytes: u64,
) -> (
    impl Stream<Item = Result<Bytes, std::io::Error>>,
    Arc<AtomicU64>,
    Arc<AtomicBool>,
)
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let total = Arc::new(AtomicU64::new(0));
    let exceeded = Arc::new(AtomicBool::new(false));
    let total_for_map = total.clone();
    let exceeded_for_map = exceeded.clone();

    let mapped = stream.map(move |item| match item {
        Ok(chunk) => {
            let new_total = total_for_map.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
            if new_total > max_bytes {
                exceeded_for_map.store(true, Ordering::SeqCst);
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "stream exceeded max file size"));
            }
            Ok(chunk)
        }
        Err(err) => Err(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())),
    });

    (mapped, total, exceeded)
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
    fn disposition_retried_maps_to_retry_outcome() {
        assert_eq!(disposition_outcome(Disposition::Retried { after_secs: 3 }), "RETRY");
    }

    #[test]
    fn disposition_dead_lettered_surfaces_its_reason() {
        assert_eq!(
            disposition_outcome(Disposition::DeadLettered { reason: "dsxa_auth" }),
            "dsxa_auth"
        );
    }

    #[tokio::test]
    async fn limit_stream_passes_small_payloads_through() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![Ok(Bytes::from_static(b"hello"))];
        let (mut limited, total, exceeded) = limit_stream(futures::stream::iter(chunks), 1024);
        let mut collected = Vec::new();
        while let Some(item) = limited.next().await {
            collected.push(item.expect("within limit"));
        }
        assert_eq!(collected.len(), 1);
        assert_eq!(total.load(Ordering::SeqCst), 5);
        assert!(!exceeded.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn limit_stream_flags_overflow() {
        let chunks: Vec<reqwest::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"01234")), Ok(Bytes::from_static(b"56789"))];
        let (mut limited, total, exceeded) = limit_stream(futures::stream::iter(chunks), 7);
        let mut saw_error = false;
        while let Some(item) = limited.next().await {
            if item.is_err() {
                saw_error = true;
            }
        }
        assert!(saw_error);
        assert!(exceeded.load(Ordering::SeqCst));
        assert!(total.load(Ordering::SeqCst) > 7);
    }
}
