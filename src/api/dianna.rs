//! Interactions with the DIANNA deep-analysis service: chunked upload and
//! terminal-status polling.

use std::time::Duration;

use base64::Engine;
use error_stack::Report;
use secrecy::ExposeSecret;
use serde_json::{json, Value};

use crate::errors::WorkerError;
use crate::ext::secrecy::ComparableSecretString;

/// The statuses that terminate either the upload or the polling loop.
pub const TERMINAL_STATUSES: &[&str] = &["SUCCESS", "FAILED", "ERROR", "CANCELLED", "UNSUPPORTED_FILE_TYPE"];

/// A chunk's upload response: whatever JSON DIANNA returned, plus the
/// identifiers this crate cares about pulled out for convenience.
#[derive(Debug, Clone)]
pub struct UploadResponse {
    /// The full response body, forwarded verbatim in result payloads.
    pub body: Value,
    /// The asynchronous-path identifier, once DIANNA assigns one.
    pub upload_id: Option<String>,
    /// The synchronous-path identifier; mutually exclusive with `upload_id`
    /// (both are accepted as equivalent poll keys, never assumed absent).
    pub analysis_id: Option<String>,
    /// This chunk's uppercased status string, if present.
    pub status: Option<String>,
}

/// A client scoped to uploading and polling one analysis.
pub struct DiannaClient {
    http: reqwest::Client,
    management_url: String,
    api_token: Option<ComparableSecretString>,
}

impl DiannaClient {
    /// Build a client from DIANNA configuration.
    pub fn new(
        management_url: impl Into<String>,
        api_token: Option<ComparableSecretString>,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<Self, Report<WorkerError>> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| Report::new(WorkerError::Unclassified {
                class: "reqwest::Error".to_string(),
                message: e.to_string(),
            }))?;
        Ok(Self {
            http,
            management_url: management_url.into(),
            api_token,
        })
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = &self.api_token {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(token.as_ref().expose_secret()) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
        headers
    }

    /// Upload one chunk, echoing `upload_id` once DIANNA has assigned one.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_chunk(
        &self,
        chunk: &[u8],
        start_byte: u64,
        total_bytes: u64,
        upload_id: Option<&str>,
        file_name: &str,
        archive_password: Option<&str>,
    ) -> Result<UploadResponse, Report<WorkerError>> {
        let url = format!("{}/api/v1/dianna/analyzeFile", self.management_url.trim_end_matches('/'));
        let end_byte = start_byte + chunk.len() as u64 - 1;
        let mut payload = json!({
            "start_byte": start_byte,
            "end_byte": end_byte,
            "total_bytes": total_bytes,
            "upload_id": upload_id,
            "file_name": file_name,
            "file_chunk": base64::engine::general_purpose::STANDARD.encode(chunk),
        });
        if let Some(password) = archive_password {
            payload["archive_password"] = json!(password);
        }

        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&payload)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Report::new(classify_http_status(status)));
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok(parse_upload_response(body))
    }

    /// Poll the analysis-result endpoint once for `id` (an `upload_id` or an
    /// `analysisId`, used interchangeably as the poll key).
    /// Non-2xx responses are treated by the caller as transient.
    pub async fn poll_once(&self, id: &str) -> Result<Option<Value>, Report<WorkerError>> {
        let url = format!(
            "{}/api/v1/dianna/analysisResult/{id}",
            self.management_url.trim_end_matches('/')
        );
        let response = match self
            .http
            .get(&url)
            .headers(self.headers())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };
        if response.status() != reqwest::StatusCode::OK {
            return Ok(None);
        }
        Ok(Some(response.json().await.unwrap_or(Value::Null)))
    }
}

fn classify_error(err: reqwest::Error) -> Report<WorkerError> {
    if err.is_timeout() {
        Report::new(WorkerError::ConnectorConnection(format!("DIANNA timeout: {err}")))
    } else if err.is_connect() {
        Report::new(WorkerError::ConnectorConnection(format!("DIANNA unreachable: {err}")))
    } else {
        Report::new(WorkerError::ConnectorConnection(err.to_string()))
    }
}

fn classify_http_status(status: reqwest::StatusCode) -> WorkerError {
    if status.is_server_error() {
        WorkerError::ConnectorServer(format!("DIANNA server error {status}"))
    } else {
        WorkerError::ConnectorClient(format!("DIANNA client error {status}"))
    }
}

fn parse_upload_response(body: Value) -> UploadResponse {
    let upload_id = body.get("upload_id").and_then(Value::as_str).map(str::to_string);
    let analysis_id = body
        .get("analysisId")
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .filter(|s| !s.trim().is_empty());
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.to_ascii_uppercase());
    UploadResponse {
        body,
        upload_id,
        analysis_id,
        status,
    }
}

/// Whether `status` (already uppercased) is a terminal DIANNA status.
pub fn is_terminal(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_async_upload_response() {
        let parsed = parse_upload_response(json!({"upload_id": "u1", "status": "queued"}));
        assert_eq!(parsed.upload_id.as_deref(), Some("u1"));
        assert_eq!(parsed.status.as_deref(), Some("QUEUED"));
        assert!(parsed.analysis_id.is_none());
    }

    #[test]
    fn parses_synchronous_upload_response() {
        let parsed = parse_upload_response(json!({"analysisId": 42, "status": "success"}));
        assert_eq!(parsed.analysis_id.as_deref(), Some("42"));
        assert!(parsed.upload_id.is_none());
    }

    #[test]
    fn terminal_statuses_match_spec_set() {
        for status in ["SUCCESS", "FAILED", "ERROR", "CANCELLED", "UNSUPPORTED_FILE_TYPE"] {
            assert!(is_terminal(status));
        }
        assert!(!is_terminal("QUEUED"));
        assert!(!is_terminal("PENDING"));
    }
}
