//! DIANNA deep-analysis escalation client configuration.

use error_stack::Report;
use getset::{CopyGetters, Getters};
use std::time::Duration;

use crate::config::{env_bytes_or, env_or, env_parse_or, env_secret, Error};
use crate::ext::secrecy::ComparableSecretString;

/// Settings for the optional DIANNA escalation path.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct DiannaConfig {
    /// Feature toggle; when `false`, malicious verdicts are never escalated.
    #[getset(get_copy = "pub")]
    enabled: bool,

    /// Base URL of the Deep Instinct management console.
    #[getset(get = "pub")]
    management_url: String,

    /// API token for the DIANNA REST API.
    #[getset(get = "pub")]
    api_token: Option<ComparableSecretString>,

    /// Whether to verify TLS certificates.
    #[getset(get_copy = "pub")]
    verify_tls: bool,

    /// Optional path to a custom CA bundle.
    #[getset(get = "pub")]
    ca_bundle: Option<String>,

    /// Upload chunk size, in bytes.
    #[getset(get_copy = "pub")]
    chunk_size: u64,

    /// Request timeout.
    #[getset(get_copy = "pub")]
    timeout: Duration,

    /// Whether a malicious verdict automatically enqueues an analysis task.
    #[getset(get_copy = "pub")]
    auto_on_malicious: bool,

    /// Whether to poll for a terminal analysis result after uploading.
    #[getset(get_copy = "pub")]
    poll_results_enabled: bool,

    /// Delay between polling attempts.
    #[getset(get_copy = "pub")]
    poll_interval: Duration,

    /// Maximum time to wait for a terminal result before giving up.
    #[getset(get_copy = "pub")]
    poll_timeout: Duration,
}

impl DiannaConfig {
    /// Load DIANNA settings from the environment.
    pub fn from_env() -> Result<Self, Report<Error>> {
        let management_url = normalize_management_url(&env_or(
            "DSXCONNECT_DIANNA__MANAGEMENT_URL",
            "https://selab-dpa.customers.deepinstinctweb.com",
        ));

        Ok(DiannaConfig {
            enabled: env_parse_or("DSXCONNECT_DIANNA__ENABLED", false)?,
            management_url,
            api_token: env_secret("DSXCONNECT_DIANNA__API_TOKEN"),
            verify_tls: env_parse_or("DSXCONNECT_DIANNA__VERIFY_TLS", true)?,
            ca_bundle: crate::config::env_var("DSXCONNECT_DIANNA__CA_BUNDLE"),
            chunk_size: env_bytes_or("DSXCONNECT_DIANNA__CHUNK_SIZE", 4 * 1024 * 1024)?,
            timeout: Duration::from_secs(env_parse_or("DSXCONNECT_DIANNA__TIMEOUT", 60u64)?),
            auto_on_malicious: env_parse_or("DSXCONNECT_DIANNA__AUTO_ON_MALICIOUS", false)?,
            poll_results_enabled: env_parse_or("DSXCONNECT_DIANNA__POLL_RESULTS_ENABLED", true)?,
            poll_interval: Duration::from_secs(env_parse_or(
                "DSXCONNECT_DIANNA__POLL_INTERVAL_SECONDS",
                5u64,
            )?),
            poll_timeout: Duration::from_secs(env_parse_or(
                "DSXCONNECT_DIANNA__POLL_TIMEOUT_SECONDS",
                900u64,
            )?),
        })
    }
}

/// Prefix a scheme onto a bare host, defaulting to `https`.
fn normalize_management_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_host_to_https() {
        assert_eq!(normalize_management_url("di.example.com"), "https://di.example.com");
        assert_eq!(
            normalize_management_url("http://di.example.com"),
            "http://di.example.com"
        );
    }
}
