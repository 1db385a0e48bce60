//! DSXA (scanner) client configuration.

use error_stack::{Report, ResultExt};
use getset::{CopyGetters, Getters};

use crate::config::{env_bytes_or, env_or, env_parse_or, env_secret, env_duration_secs_or, Error};
use crate::ext::secrecy::ComparableSecretString;
use std::time::Duration;

/// Settings for reaching the binary scanner.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct ScannerConfig {
    /// Base URL, without the `/scan/binary` path suffix.
    #[getset(get = "pub")]
    base_url: String,

    /// Optional bearer token sent with every scan request.
    #[getset(get = "pub")]
    auth_token: Option<ComparableSecretString>,

    /// Whether to verify TLS certificates when talking to the scanner.
    #[getset(get_copy = "pub")]
    verify_tls: bool,

    /// Per-request timeout.
    #[getset(get_copy = "pub")]
    timeout: Duration,

    /// The upper bound of concurrent in-flight scans before backpressure applies.
    #[getset(get_copy = "pub")]
    max_inflight: u32,

    /// Files larger than this are skipped with a synthetic oversize verdict.
    #[getset(get_copy = "pub")]
    max_file_size_bytes: u64,
}

impl ScannerConfig {
    /// Load scanner settings from the environment.
    ///
    /// Mirrors the legacy `SCAN_BINARY_URL` derivation: when only the full
    /// binary-scan endpoint is known, strip its `/scan/binary` suffix to
    /// recover the base URL.
    pub fn from_env() -> Result<Self, Report<Error>> {
        let mut base_url = env_or("DSXCONNECT_SCANNER__BASE_URL", "http://0.0.0.0:5000");
        if base_url == "http://0.0.0.0:5000" {
            if let Some(legacy) = crate::config::env_var("DSXCONNECT_SCANNER__SCAN_BINARY_URL") {
                base_url = strip_scan_binary_suffix(&legacy);
            }
        }

        Ok(ScannerConfig {
            base_url,
            auth_token: env_secret("DSXCONNECT_SCANNER__AUTH_TOKEN"),
            verify_tls: env_parse_or("DSXCONNECT_SCANNER__VERIFY_TLS", true)?,
            timeout: env_duration_secs_or("DSXCONNECT_SCANNER__TIMEOUT_SECONDS", Duration::from_secs(600))?,
            max_inflight: env_parse_or("DSXCONNECT_SCANNER__MAX_INFLIGHT", 2048u32)?,
            max_file_size_bytes: env_bytes_or(
                "DSXCONNECT_SCANNER__MAX_FILE_SIZE_BYTES",
                2 * 1024 * 1024 * 1024,
            )?,
        })
    }
}

fn strip_scan_binary_suffix(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    match trimmed.split_once("/scan/binary") {
        Some((base, _)) => base.to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scan_binary_path_from_legacy_url() {
        assert_eq!(
            strip_scan_binary_suffix("http://dsxa:5000/scan/binary/v2"),
            "http://dsxa:5000"
        );
        assert_eq!(strip_scan_binary_suffix("http://dsxa:5000/"), "http://dsxa:5000");
    }
}
