//! Interactions with the connector that owns the bytes being scanned.

use error_stack::Report;
use futures::Stream;
use reqwest::StatusCode;

use crate::contracts::ScanRequest;
use crate::errors::WorkerError;

/// A client scoped to reading a single file from one connector.
pub struct ConnectorClient {
    http: reqwest::Client,
}

impl Default for ConnectorClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorClient {
    /// Build a client using the process HTTP client defaults (spec 5: "connector
    /// reads use the process HTTP client defaults").
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Open a streaming read of `request`'s file from its connector's
    /// `READ_FILE` endpoint. Returns the byte stream and, when known, the
    /// stream's total size from `content-length` (falling back to the
    /// request's size hint, per spec's "size discovery" design note).
    pub async fn read_file_stream(
        &self,
        request: &ScanRequest,
    ) -> Result<(impl Stream<Item = reqwest::Result<bytes::Bytes>>, Option<u64>), Report<WorkerError>> {
        let endpoint = request
            .connector_endpoint()
            .ok_or_else(|| Report::new(WorkerError::Malformed("missing connector endpoint".to_string())))?;
        let url = format!("{}/read_file", endpoint.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(classify_connect_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Report::new(WorkerError::ConnectorServer(format!(
                "connector server error {status}"
            ))));
        }
        if status.is_client_error() {
            return Err(Report::new(WorkerError::ConnectorClient(format!(
                "connector client error {status}"
            ))));
        }

        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .or(request.size_in_bytes);

        Ok((response.bytes_stream(), size))
    }
}

fn classify_connect_error(err: reqwest::Error) -> Report<WorkerError> {
    if err.is_connect() {
        Report::new(WorkerError::ConnectorConnection(err.to_string()))
    } else if err.status().map(StatusCode::is_server_error).unwrap_or(false) {
        Report::new(WorkerError::ConnectorServer(err.to_string()))
    } else {
        Report::new(WorkerError::ConnectorConnection(err.to_string()))
    }
}
