//! The shared data model: scan requests, verdicts, and job/DLQ records.

use serde::{Deserialize, Serialize};
use strum::Display;

/// A connector descriptor embedded in a [`ScanRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    /// Stable identifier for the connector instance.
    pub uuid: String,

    /// The connector's base URL.
    pub url: String,

    /// Human-readable connector name, used in scanner metadata.
    pub name: String,

    /// The action to take on the source item after a verdict is reached (e.g. "move", "none").
    #[serde(default)]
    pub item_action: Option<String>,

    /// Whether the move action should carry along the `metainfo` string.
    #[serde(default)]
    pub item_action_move_metainfo: Option<bool>,
}

/// The unit of work: a single file to be scanned.
///
/// Invariant: at least one of `connector` or `connector_url` must be non-empty;
/// this is enforced by [`ScanRequest::validate`], not by the type itself, so
/// that deserialization of wire payloads can still produce a concrete value to
/// report a [`crate::errors::MalformedScanRequest`] against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Connector-relative path to the file.
    pub location: String,

    /// Display/correlation hint, often a filename or a human label.
    #[serde(default)]
    pub metainfo: String,

    /// Embedded connector descriptor, when known structurally.
    #[serde(default)]
    pub connector: Option<ConnectorDescriptor>,

    /// Fallback connector URL, used when only a bare endpoint is known.
    #[serde(default)]
    pub connector_url: Option<String>,

    /// Optional size hint in bytes, used for the preflight oversize skip.
    #[serde(default)]
    pub size_in_bytes: Option<u64>,

    /// Identifies a user-initiated scan batch; enables pause/cancel via the job hash.
    #[serde(default)]
    pub scan_job_id: Option<String>,
}

impl ScanRequest {
    /// Validate the invariants this type can't enforce structurally.
    pub fn validate(&self) -> Result<(), String> {
        if self.location.trim().is_empty() {
            return Err("location must not be empty".to_string());
        }
        let has_connector = self.connector.is_some();
        let has_connector_url = self
            .connector_url
            .as_ref()
            .is_some_and(|u| !u.trim().is_empty());
        if !has_connector && !has_connector_url {
            return Err("at least one of connector or connector_url must be set".to_string());
        }
        Ok(())
    }

    /// The effective URL to reach this request's connector, preferring the
    /// embedded descriptor's URL over the bare fallback.
    pub fn connector_endpoint(&self) -> Option<&str> {
        self.connector
            .as_ref()
            .map(|c| c.url.as_str())
            .or(self.connector_url.as_deref())
    }

    /// The connector's display name, if known.
    pub fn connector_name(&self) -> Option<&str> {
        self.connector.as_ref().map(|c| c.name.as_str())
    }
}

/// The scanner's judgment about a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum VerdictKind {
    /// The file was scanned and found clean.
    Benign,
    /// The file was scanned and found malicious.
    Malicious,
    /// The file was not scanned (includes the oversize-skip synthetic case).
    NotScanned,
    /// The file violates a compliance rule (also used for the oversize synthetic verdict).
    NonCompliant,
    /// The scanner returned a verdict string this crate doesn't recognize.
    Unknown,
}

impl VerdictKind {
    /// Parse a scanner-reported verdict string, case-insensitively, per spec.
    ///
    /// `"scanning"` maps to [`VerdictKind::NotScanned`]; anything else
    /// unrecognized maps to [`VerdictKind::Unknown`].
    pub fn from_scanner_str(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "benign" => VerdictKind::Benign,
            "malicious" => VerdictKind::Malicious,
            "not scanned" | "scanning" => VerdictKind::NotScanned,
            "non compliant" => VerdictKind::NonCompliant,
            _ => VerdictKind::Unknown,
        }
    }
}

/// Details describing why a verdict was reached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerdictDetails {
    /// A short description of the scan event.
    #[serde(default)]
    pub event_description: String,

    /// The specific reason for the verdict, when available.
    #[serde(default)]
    pub reason: Option<String>,

    /// The type of threat identified, when available.
    #[serde(default)]
    pub threat_type: Option<String>,
}

/// File metadata attached to a verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerdictFileInfo {
    /// The detected file type, or `"Unknown"` for synthetic verdicts.
    #[serde(default)]
    pub file_type: String,

    /// The file size in bytes, as observed by the scanner or the preflight check.
    pub file_size_in_bytes: u64,

    /// The file's hash, when computed by the scanner.
    #[serde(default)]
    pub file_hash: Option<String>,

    /// The hash of the containing archive, when the file was extracted from one.
    #[serde(default)]
    pub container_hash: Option<String>,
}

/// The outcome of a single scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Opaque scan identifier from the scanner (or a synthetic hex token).
    pub scan_guid: String,

    /// The verdict classification.
    pub verdict: VerdictKind,

    /// Supporting detail for the verdict.
    pub verdict_details: VerdictDetails,

    /// File metadata, when available.
    #[serde(default)]
    pub file_info: Option<VerdictFileInfo>,

    /// Scan duration in microseconds, as reported by the scanner; `-1` when unknown.
    #[serde(default = "default_scan_duration")]
    pub scan_duration_in_microseconds: i64,

    /// Total wall-clock time for the request, measured by this crate (not the scanner).
    #[serde(default)]
    pub dsxconnect_request_elapsed_ms: Option<f64>,
}

fn default_scan_duration() -> i64 {
    -1
}

impl Verdict {
    /// Build the synthetic verdict emitted when a file is skipped for exceeding
    /// `max_file_size_bytes`, either by hint (4.D.5) or by observed stream size (4.D.7).
    pub fn oversize(size_in_bytes: u64, request_elapsed_ms: f64) -> Self {
        Verdict {
            scan_guid: uuid::Uuid::new_v4().simple().to_string(),
            verdict: VerdictKind::NonCompliant,
            verdict_details: VerdictDetails {
                event_description: "File not scanned".to_string(),
                reason: Some("File Size Too Large".to_string()),
                threat_type: None,
            },
            file_info: Some(VerdictFileInfo {
                file_type: "Unknown".to_string(),
                file_size_in_bytes: size_in_bytes,
                file_hash: Some(String::new()),
                container_hash: None,
            }),
            scan_duration_in_microseconds: 0,
            dsxconnect_request_elapsed_ms: Some(request_elapsed_ms),
        }
    }
}

/// Per-`scan_job_id` pause/cancel coordination record, stored at [`crate::contracts::names::job_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobState {
    /// Overall job status, e.g. `"running"`.
    pub status: Option<String>,

    /// Whether the job is currently paused.
    pub paused: bool,

    /// Whether the job has been cancelled.
    pub cancelled: bool,
}

/// A dead-letter record, written when retries are exhausted or an error class
/// is never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRecord {
    /// Short machine-readable reason, e.g. `"malformed"` or `"dsxa_auth"`.
    pub reason: String,

    /// The originating error's category name.
    pub error_class: String,

    /// The originating error's display message.
    pub error_message: String,

    /// The root correlation id for this request.
    pub scan_request_task_id: String,

    /// The task id of the attempt that produced this dead letter.
    pub current_task_id: String,

    /// The task id of the task that enqueued this one, if chained.
    #[serde(default)]
    pub upstream_task_id: Option<String>,

    /// The retry count reached before giving up.
    pub retry_count: u32,

    /// A snapshot of the payload (or a bounded summary of it, for batches).
    pub payload_snapshot: serde_json::Value,

    /// Unix timestamp (seconds) at which this record was created.
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_connector() {
        let req = ScanRequest {
            location: "/a.bin".to_string(),
            metainfo: String::new(),
            connector: None,
            connector_url: None,
            size_in_bytes: None,
            scan_job_id: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn validate_accepts_bare_connector_url() {
        let req = ScanRequest {
            location: "/a.bin".to_string(),
            metainfo: String::new(),
            connector: None,
            connector_url: Some("http://c:1".to_string()),
            size_in_bytes: None,
            scan_job_id: None,
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn verdict_kind_parses_case_insensitively() {
        assert_eq!(VerdictKind::from_scanner_str("Benign"), VerdictKind::Benign);
        assert_eq!(
            VerdictKind::from_scanner_str("scanning"),
            VerdictKind::NotScanned
        );
        assert_eq!(
            VerdictKind::from_scanner_str("something else"),
            VerdictKind::Unknown
        );
    }

    #[test]
    fn oversize_verdict_is_non_compliant_with_reason() {
        let verdict = Verdict::oversize(3_000_000_000, 12.5);
        assert_eq!(verdict.verdict, VerdictKind::NonCompliant);
        assert_eq!(
            verdict.verdict_details.reason.as_deref(),
            Some("File Size Too Large")
        );
        assert_eq!(
            verdict.file_info.as_ref().map(|f| f.file_size_in_bytes),
            Some(3_000_000_000)
        );
        assert_eq!(verdict.scan_guid.len(), 32);
    }
}
