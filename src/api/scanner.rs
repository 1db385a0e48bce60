//! Interactions and data types for the DSXA scanner API live here.

use std::time::Duration;

use error_stack::Report;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::StatusCode;

use crate::contracts::{ScanRequest, Verdict, VerdictKind};
use crate::errors::WorkerError;
use crate::ext::error_stack::DescribeContext;
use crate::ext::secrecy::ComparableSecretString;

/// A client scoped to a single worker invocation's scan.
pub struct ScannerClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<ComparableSecretString>,
}

impl ScannerClient {
    /// Build a client from scanner configuration.
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<ComparableSecretString>,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<Self, Report<WorkerError>> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| WorkerError::Unclassified {
                class: "reqwest::Error".to_string(),
                message: e.to_string(),
            })
            .map_err(Report::new)
            .describe("build scanner http client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            auth_token,
        })
    }

    /// Stream `body` to the scanner's binary-scan endpoint, attaching the
    /// URL-safe metadata header built from `request` and `task_id`.
    pub async fn scan_binary_stream(
        &self,
        body: reqwest::Body,
        request: &ScanRequest,
        task_id: Option<&str>,
    ) -> Result<Verdict, Report<WorkerError>> {
        let metadata = build_metadata(request, task_id);
        let url = format!("{}/scan/binary/v2", self.base_url.trim_end_matches('/'));

        let mut req = self.http.post(&url).header("X-Scan-Metadata", metadata).body(body);
        if let Some(token) = &self.auth_token {
            use secrecy::ExposeSecret;
            req = req.bearer_auth(token.as_ref().expose_secret());
        }

        let response = req.send().await.map_err(classify_transport_error)?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Report::new(WorkerError::DsxaAuth(format!(
                    "scanner rejected credentials: {}",
                    response.status()
                ))))
            }
            status if status.is_server_error() => {
                return Err(Report::new(WorkerError::DsxaServer(format!(
                    "scanner server error: {status}"
                ))))
            }
            status if status.is_client_error() => {
                return Err(Report::new(WorkerError::DsxaClient(format!(
                    "scanner client error: {status}"
                ))))
            }
            _ => {}
        }

        let body: RawVerdict = response
            .json()
            .await
            .map_err(|e| WorkerError::DsxaServer(format!("unreadable scanner response: {e}")))
            .map_err(Report::new)
            .describe("parse scanner response body")?;

        let verdict = translate_verdict(body);

        if verdict.verdict == VerdictKind::NotScanned
            && verdict
                .verdict_details
                .reason
                .as_deref()
                .unwrap_or("")
                .to_ascii_lowercase()
                .contains("initializing")
        {
            return Err(Report::new(WorkerError::DsxaServer(
                "DSXA scanner is initializing".to_string(),
            )));
        }

        Ok(verdict)
    }
}

fn classify_transport_error(err: reqwest::Error) -> Report<WorkerError> {
    if err.is_timeout() {
        Report::new(WorkerError::DsxaTimeout(err.to_string()))
    } else {
        Report::new(WorkerError::DsxaServer(err.to_string()))
    }
}

#[derive(Debug, serde::Deserialize)]
struct RawVerdict {
    scan_guid: Option<String>,
    verdict: Option<String>,
    verdict_details: Option<RawVerdictDetails>,
    file_info: Option<RawFileInfo>,
    scan_duration_in_microseconds: Option<i64>,
}

#[derive(Debug, serde::Deserialize)]
struct RawVerdictDetails {
    event_description: Option<String>,
    reason: Option<String>,
    threat_type: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RawFileInfo {
    file_type: Option<String>,
    file_size_in_bytes: Option<u64>,
    file_hash: Option<String>,
    container_hash: Option<String>,
}

fn translate_verdict(raw: RawVerdict) -> Verdict {
    Verdict {
        scan_guid: raw.scan_guid.unwrap_or_default(),
        verdict: VerdictKind::from_scanner_str(raw.verdict.as_deref().unwrap_or("unknown")),
        verdict_details: crate::contracts::VerdictDetails {
            event_description: raw
                .verdict_details
                .as_ref()
                .and_then(|d| d.event_description.clone())
                .unwrap_or_default(),
            reason: raw.verdict_details.as_ref().and_then(|d| d.reason.clone()),
            threat_type: raw.verdict_details.as_ref().and_then(|d| d.threat_type.clone()),
        },
        file_info: raw.file_info.map(|f| crate::contracts::VerdictFileInfo {
            file_type: f.file_type.unwrap_or_default(),
            file_size_in_bytes: f.file_size_in_bytes.unwrap_or(0),
            file_hash: f.file_hash,
            container_hash: f.container_hash,
        }),
        scan_duration_in_microseconds: raw.scan_duration_in_microseconds.unwrap_or(-1),
        dsxconnect_request_elapsed_ms: None,
    }
}

/// Percent-encode a value only when it isn't pure ASCII, matching the
/// original metadata encoding's "ascii passthrough, else percent-encode" rule.
fn encode_value(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    if value.is_ascii() {
        value.to_string()
    } else {
        utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
    }
}

/// Build the `file-loc:...,file-meta:...,dsx-connect:...,scan_request_task_id:...`
/// metadata string carried on every scan request.
fn build_metadata(request: &ScanRequest, task_id: Option<&str>) -> String {
    let file_loc = encode_value(&request.location);
    let file_meta = encode_value(&request.metainfo);
    let connector_name = request.connector_name().map(encode_value).unwrap_or_default();

    let mut metadata = if connector_name.is_empty() {
        format!("file-loc:{file_loc},file-meta:{file_meta}")
    } else {
        format!("file-loc:{file_loc},file-meta:{file_meta},dsx-connect:{connector_name}")
    };
    if let Some(task_id) = task_id {
        metadata.push_str(&format!(",scan_request_task_id:{}", encode_value(task_id)));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ConnectorDescriptor;

    fn sample_request() -> ScanRequest {
        ScanRequest {
            location: "/dir/a.bin".to_string(),
            metainfo: "café".to_string(),
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
        }
    }

    #[test]
    fn ascii_values_pass_through_unescaped() {
        assert_eq!(encode_value("/dir/a.bin"), "/dir/a.bin");
    }

    #[test]
    fn non_ascii_values_are_percent_encoded() {
        let encoded = encode_value("café");
        assert!(encoded.contains("%C3%A9") || encoded.contains("caf"));
        assert!(!encoded.chars().any(|c| c == 'é'));
    }

    #[test]
    fn metadata_includes_task_id_when_present() {
        let metadata = build_metadata(&sample_request(), Some("t1"));
        assert!(metadata.starts_with("file-loc:/dir/a.bin,file-meta:"));
        assert!(metadata.contains("dsx-connect:conn-1"));
        assert!(metadata.ends_with(",scan_request_task_id:t1"));
    }

    #[test]
    fn metadata_round_trips_location_and_metainfo() {
        let request = ScanRequest {
            metainfo: "plain label".to_string(),
            ..sample_request()
        };
        let metadata = build_metadata(&request, None);
        let loc_part = metadata.split(',').next().unwrap().strip_prefix("file-loc:").unwrap();
        assert_eq!(loc_part, request.location);
    }

    #[test]
    fn translate_verdict_maps_every_field() {
        let raw = RawVerdict {
            scan_guid: Some("abc123".to_string()),
            verdict: Some("Benign".to_string()),
            verdict_details: Some(RawVerdictDetails {
                event_description: Some("scanned clean".to_string()),
                reason: None,
                threat_type: None,
            }),
            file_info: Some(RawFileInfo {
                file_type: Some("application/zip".to_string()),
                file_size_in_bytes: Some(7),
                file_hash: Some("deadbeef".to_string()),
                container_hash: None,
            }),
            scan_duration_in_microseconds: Some(1234),
        };
        let verdict = translate_verdict(raw);
        assert_eq!(verdict.scan_guid, "abc123");
        assert_eq!(verdict.verdict, VerdictKind::Benign);
        assert_eq!(verdict.verdict_details.event_description, "scanned clean");
        assert_eq!(verdict.scan_duration_in_microseconds, 1234);
        assert_eq!(
            verdict.file_info.as_ref().map(|f| f.file_size_in_bytes),
            Some(7)
        );
        assert!(verdict.dsxconnect_request_elapsed_ms.is_none());
    }

    #[test]
    fn translate_verdict_defaults_missing_scan_duration() {
        let raw = RawVerdict {
            scan_guid: None,
            verdict: None,
            verdict_details: None,
            file_info: None,
            scan_duration_in_microseconds: None,
        };
        let verdict = translate_verdict(raw);
        assert_eq!(verdict.scan_duration_in_microseconds, -1);
        assert_eq!(verdict.verdict, VerdictKind::Unknown);
    }

    #[test]
    fn not_scanned_initializing_reason_is_recognizable_as_transient() {
        let raw = RawVerdict {
            scan_guid: Some("g".to_string()),
            verdict: Some("scanning".to_string()),
            verdict_details: Some(RawVerdictDetails {
                event_description: None,
                reason: Some("Scanner is Initializing".to_string()),
                threat_type: None,
            }),
            file_info: None,
            scan_duration_in_microseconds: None,
        };
        let verdict = translate_verdict(raw);
        assert_eq!(verdict.verdict, VerdictKind::NotScanned);
        assert!(verdict
            .verdict_details
            .reason
            .as_deref()
            .unwrap_or("")
            .to_ascii_lowercase()
            .contains("initializing"));
    }
}
