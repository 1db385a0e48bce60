//! The DIANNA deep-analysis worker: streams a file to the analysis service in
//! chunks, then either reads an immediate (synchronous) result or polls the
//! result endpoint until a terminal status or timeout (asynchronous path).
//! Implements spec 4.F. Only the connector read at the top is retryable
//! through the kernel; everything past it (DIANNA itself) reports failure as
//! a terminal `"ERROR"` result, never a retry or dead letter.

use std::time::{Duration, Instant};

use bytes::Bytes;
use error_stack::Report;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::api::{dianna::is_terminal, ConnectorClient, DiannaClient};
use crate::contracts::{Queue, ScanRequest};
use crate::errors::WorkerError;
use crate::notifier::Notifier;
use crate::queue::{EnqueuedTask, TaskState};
use crate::worker::kernel::{Disposition, WorkerKernel};

/// The DLQ/retry family name for this worker.
pub const FAMILY: &str = "dianna_analysis";

/// A DIANNA analysis task's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiannaTaskPayload {
    /// The request describing the file to analyze.
    pub request: ScanRequest,
    /// Password for password-protected archives, if any.
    #[serde(default)]
    pub archive_password: Option<String>,
}

/// The task's result, mirroring what the upload/poll cycle settled on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    /// One of the enumerated terminal statuses, `"QUEUED"`, or a disposition
    /// string (`"RETRY"`, a DLQ reason) when the task didn't run to completion.
    pub status: String,
    /// The synchronous-path identifier, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
    /// The asynchronous-path identifier, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    /// The last response body observed from DIANNA, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// A human-readable message, set on error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResultPayload {
    fn error(analysis_id: Option<String>, upload_id: Option<String>, response: Option<Value>, message: String) -> Self {
        Self {
            status: "ERROR".to_string(),
            analysis_id,
            upload_id,
            response,
            message: Some(message),
        }
    }

    fn disposition(status: &str) -> Self {
        Self {
            status: status.to_string(),
            analysis_id: None,
            upload_id: None,
            response: None,
            message: None,
        }
    }
}

/// Streams a file to DIANNA and resolves its analysis result.
pub struct DiannaWorker {
    kernel: WorkerKernel,
    connector: ConnectorClient,
    dianna: DiannaClient,
    notifier: Notifier,
    chunk_size: u64,
    poll_results_enabled: bool,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl DiannaWorker {
    /// Build a worker over the shared kernel and the connector/DIANNA clients it drives.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kernel: WorkerKernel,
        connector: ConnectorClient,
        dianna: DiannaClient,
        notifier: Notifier,
        chunk_size: u64,
        poll_results_enabled: bool,
        poll_interval: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            kernel,
            connector,
            dianna,
            notifier,
            chunk_size,
            poll_results_enabled,
            poll_interval,
            poll_timeout,
        }
    }

    /// Handle one dequeued analysis task.
    pub async fn handle(
        &self,
        task: EnqueuedTask<DiannaTaskPayload>,
    ) -> Result<ResultPayload, Report<crate::state::Error>> {
        let payload = match task.item() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(task_id = %task.task_id, %err, "undeserializable dianna task payload");
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
                return Ok(ResultPayload::disposition("malformed"));
            }
        };

        match self.run(&task, &payload).await {
            Ok(result) => {
                self.kernel.queue().set_state(&task.task_id, TaskState::Success).await.ok();
                Ok(result)
            }
            Err(err) => {
                let err = err.current_context().clone();
                let snapshot = serde_json::to_value(&payload).unwrap_or(Value::Null);
                let disposition = self
                    .kernel
                    .handle_failure(
                        &task,
                        &payload,
                        Queue::Analyze,
                        FAMILY,
                        snapshot,
                        &err,
                        crate::worker::kernel::RetryGroups::ConnectorOnly,
                    )
                    .await?;
                Ok(ResultPayload::disposition(match disposition {
                    Disposition::Retried { .. } => "RETRY",
                    Disposition::DeadLettered { reason } => reason,
                }))
            }
        }
    }

    /// Read the file and drive the upload/poll cycle. Only the connector read
    /// is allowed to bubble an error for the kernel's retry policy; every
    /// DIANNA-side failure past that point resolves to an `"ERROR"` result.
    async fn run(
        &self,
        task: &EnqueuedTask<DiannaTaskPayload>,
        payload: &DiannaTaskPayload,
    ) -> Result<ResultPayload, Report<WorkerError>> {
        payload
            .request
            .validate()
            .map_err(|err| Report::new(WorkerError::Malformed(err)))?;

        let (stream, hinted_size) = self.connector.read_file_stream(&payload.request).await?;
        let bytes = collect_stream(stream).await?;
        let total_bytes = hinted_size.unwrap_or(bytes.len() as u64);

        match self.upload_and_resolve(task, payload, &bytes, total_bytes).await {
            Ok(result) => Ok(result),
            Err(message) => {
                self.publish_terminal_event(payload, "ERROR", None, None, &message).await;
                Ok(ResultPayload::error(None, None, None, message))
            }
        }
    }

    async fn upload_and_resolve(
        &self,
        _task: &EnqueuedTask<DiannaTaskPayload>,
        payload: &DiannaTaskPayload,
        bytes: &[u8],
        total_bytes: u64,
    ) -> Result<ResultPayload, String> {
        let file_name = if !payload.request.metainfo.trim().is_empty() {
            payload.request.metainfo.clone()
        } else {
            payload.request.location.clone()
        };

        let mut hasher = Sha256::new();
        let mut upload_id: Option<String> = None;
        let mut analysis_id: Option<String> = None;
        let mut status: Option<String> = None;
        let mut last_body: Value = Value::Null;

        let chunk_size = self.chunk_size.max(1) as usize;
        let mut start_byte: u64 = 0;
        for chunk in bytes.chunks(chunk_size) {
            hasher.update(chunk);
            let response = self
                .dianna
                .upload_chunk(
                    chunk,
                    start_byte,
                    total_bytes,
                    upload_id.as_deref(),
                    &file_name,
                    payload.archive_password.as_deref(),
                )
                .await
                .map_err(|err| err.to_string())?;

            if response.upload_id.is_some() {
                upload_id = response.upload_id;
            }
            if response.analysis_id.is_some() {
                analysis_id = response.analysis_id;
            }
            status = response.status;
            last_body = response.body;
            start_byte += chunk.len() as u64;
        }

        let sha256 = hex::encode(hasher.finalize());
        let uppercased = status.as_deref().unwrap_or("").to_ascii_uppercase();

        if is_terminal(&uppercased) && matches!(uppercased.as_str(), "FAILED" | "ERROR" | "CANCELLED" | "UNSUPPORTED_FILE_TYPE") {
            let message = format!("upload ended in status {uppercased}");
            self.publish_terminal_event(payload, "ERROR", upload_id.clone(), Some(&sha256), &message)
                .await;
            return Ok(ResultPayload::error(analysis_id, upload_id, Some(last_body), message));
        }

        if let Some(id) = analysis_id.clone().filter(|_| upload_id.is_none()) {
            return self.resolve_synchronous(payload, id, last_body, &sha256).await;
        }

        let id = match upload_id.clone() {
            Some(id) => id,
            None => {
                let message = "DIANNA did not return an upload_id or analysisId".to_string();
                self.publish_terminal_event(payload, "ERROR", None, Some(&sha256), &message).await;
                return Ok(ResultPayload::error(None, None, Some(last_body), message));
            }
        };

        self.resolve_asynchronous(payload, id, status, last_body, &sha256).await
    }

    async fn resolve_synchronous(
        &self,
        payload: &DiannaTaskPayload,
        analysis_id: String,
        initial_body: Value,
        sha256: &str,
    ) -> Result<ResultPayload, String> {
        let mut final_body = initial_body;
        let mut final_status = final_body
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.to_ascii_uppercase())
            .unwrap_or_else(|| "SUCCESS".to_string());

        if self.poll_results_enabled {
            if let Some(polled) = self.poll_until_terminal(&analysis_id).await {
                final_status = polled
                    .get("status")
                    .and_then(Value::as_str)
                    .map(|s| s.to_ascii_uppercase())
                    .unwrap_or(final_status);
                final_body = polled;
            }
        }

        self.publish_terminal_event(
            payload,
            &final_status,
            None,
            Some(sha256),
            "",
        )
        .await;

        Ok(ResultPayload {
            status: final_status,
            analysis_id: Some(analysis_id),
            upload_id: None,
            response: Some(final_body),
            message: None,
        })
    }

    async fn resolve_asynchronous(
        &self,
        payload: &DiannaTaskPayload,
        upload_id: String,
        initial_status: Option<String>,
        initial_body: Value,
        sha256: &str,
    ) -> Result<ResultPayload, String> {
        let queued_status = initial_status.unwrap_or_else(|| "QUEUED".to_string());
        self.notifier
            .publish_scan_results(&build_event(payload, &queued_status, Some(&upload_id), sha256, &initial_body, None))
            .await;
        self.notifier
            .emit_syslog(&build_syslog(payload, "QUEUED", Some(&upload_id), sha256))
            .await;

        if !self.poll_results_enabled {
            return Ok(ResultPayload {
                status: queued_status,
                analysis_id: None,
                upload_id: Some(upload_id),
                response: Some(initial_body),
                message: None,
            });
        }

        let polled = self.poll_until_terminal(&upload_id).await;
        let (final_status, final_body) = match &polled {
            Some(body) => (
                body.get("status")
                    .and_then(Value::as_str)
                    .map(|s| s.to_ascii_uppercase())
                    .unwrap_or_else(|| "SUCCESS".to_string()),
                body.clone(),
            ),
            None => ("SUCCESS".to_string(), initial_body.clone()),
        };

        if polled.is_some() {
            self.publish_terminal_event(payload, &final_status, Some(upload_id.clone()), Some(sha256), "")
                .await;
        }

        Ok(ResultPayload {
            status: final_status,
            analysis_id: None,
            upload_id: Some(upload_id),
            response: Some(final_body),
            message: None,
        })
    }

    async fn poll_until_terminal(&self, id: &str) -> Option<Value> {
        let deadline = Instant::now() + self.poll_timeout;
        loop {
            if Instant::now() >= deadline {
                return None;
            }
            if let Ok(Some(body)) = self.dianna.poll_once(id).await {
                let status = body
                    .get("status")
                    .and_then(Value::as_str)
                    .map(|s| s.to_ascii_uppercase());
                if status.as_deref().is_some_and(is_terminal) {
                    return Some(body);
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn publish_terminal_event(
        &self,
        payload: &DiannaTaskPayload,
        status: &str,
        upload_id: Option<String>,
        sha256: Option<&str>,
        error: &str,
    ) {
        let sha256 = sha256.unwrap_or("");
        let error = if error.is_empty() { None } else { Some(error) };
        self.notifier
            .publish_scan_results(&build_event(payload, status, upload_id.as_deref(), sha256, &Value::Null, error))
            .await;
        self.notifier
            .emit_syslog(&build_syslog(payload, "RESULT", upload_id.as_deref(), sha256))
            .await;
    }
}

fn build_event(
    payload: &DiannaTaskPayload,
    status: &str,
    upload_id: Option<&str>,
    sha256: &str,
    analysis: &Value,
    error: Option<&str>,
) -> Value {
    let mut event = json!({
        "type": "dianna_analysis",
        "status": status,
        "location": payload.request.location,
        "connector_url": payload.request.connector_endpoint(),
        "sha256": sha256,
        "upload_id": upload_id,
        "analysis": analysis,
    });
    if let Some(error) = error {
        event["error"] = json!(error);
    }
    event
}

fn build_syslog(payload: &DiannaTaskPayload, phase: &str, upload_id: Option<&str>, sha256: &str) -> Value {
    json!({
        "event": "dianna_analysis",
        "phase": phase,
        "location": payload.request.location,
        "sha256": sha256,
        "upload_id": upload_id,
    })
}

async fn collect_stream(
    mut stream: impl futures::Stream<Item = reqwest::Result<Bytes>> + Unpin,
) -> Result<Vec<u8>, Report<WorkerError>> {
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| Report::new(WorkerError::ConnectorConnection(err.to_string())))?;
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ConnectorDescriptor;

    fn sample_payload() -> DiannaTaskPayload {
        DiannaTaskPayload {
            request: ScanRequest {
                location: "/dir/a.bin".to_string(),
                metainfo: String::new(),
                connector: Some(ConnectorDescriptor {
                    uuid: "u".to_string(),
                    url: "http://c".to_string(),
                    name: "conn-1".to_string(),
                    item_action: None,
                    item_action_move_metainfo: None,
                }),
                connector_url: None,
                size_in_bytes: None,
                scan_job_id: None,
            },
            archive_password: None,
        }
    }

    #[test]
    fn file_name_falls_back_to_location_when_metainfo_blank() {
        let payload = sample_payload();
        let file_name = if !payload.request.metainfo.trim().is_empty() {
            payload.request.metainfo.clone()
        } else {
            payload.request.location.clone()
        };
        assert_eq!(file_name, "/dir/a.bin");
    }

    #[test]
    fn result_payload_error_sets_status_and_message() {
        let result = ResultPayload::error(None, Some("u1".to_string()), None, "boom".to_string());
        assert_eq!(result.status, "ERROR");
        assert_eq!(result.message.as_deref(), Some("boom"));
        assert_eq!(result.upload_id.as_deref(), Some("u1"));
    }

    #[test]
    fn event_carries_connector_url_and_sha() {
        let event = build_event(&sample_payload(), "SUCCESS", Some("u1"), "abc123", &Value::Null, None);
        assert_eq!(event["status"], "SUCCESS");
        assert_eq!(event["connector_url"], "http://c");
        assert_eq!(event["sha256"], "abc123");
        assert_eq!(event["upload_id"], "u1");
    }

    /// Hashing chunk-by-chunk (as `upload_and_resolve` does) must equal
    /// hashing the full concatenation in one shot, regardless of chunk size.
    #[test]
    fn chunked_sha256_matches_whole_file_sha256() {
        let whole: Vec<u8> = (0u8..=255).collect();
        let whole_hash = hex::encode(Sha256::digest(&whole));

        for chunk_size in [1usize, 3, 16, 64, 1000] {
            let mut hasher = Sha256::new();
            for chunk in whole.chunks(chunk_size) {
                hasher.update(chunk);
            }
            let chunked_hash = hex::encode(hasher.finalize());
            assert_eq!(chunked_hash, whole_hash, "chunk_size={chunk_size}");
        }
    }

    #[test]
    fn terminal_failure_statuses_are_distinguished_from_success() {
        for status in ["FAILED", "ERROR", "CANCELLED", "UNSUPPORTED_FILE_TYPE"] {
            assert!(is_terminal(status));
            assert!(matches!(status, "FAILED" | "ERROR" | "CANCELLED" | "UNSUPPORTED_FILE_TYPE"));
        }
        assert!(is_terminal("SUCCESS"));
        assert!(!matches!("SUCCESS", "FAILED" | "ERROR" | "CANCELLED" | "UNSUPPORTED_FILE_TYPE"));
    }
}
