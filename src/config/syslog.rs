//! Syslog sink configuration.

use error_stack::Report;
use getset::{CopyGetters, Getters};

use crate::config::{env_or, env_parse_or, Error};

/// The wire transport used to reach the syslog server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyslogTransport {
    /// Plain UDP, fire-and-forget.
    Udp,
    /// Plain TCP.
    Tcp,
    /// TCP wrapped in TLS.
    Tls,
}

impl std::str::FromStr for SyslogTransport {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(SyslogTransport::Udp),
            "tcp" => Ok(SyslogTransport::Tcp),
            "tls" => Ok(SyslogTransport::Tls),
            _ => Err(()),
        }
    }
}

/// Settings for the syslog event sink.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct SyslogConfig {
    /// Syslog server host or address.
    #[getset(get = "pub")]
    server: String,

    /// Syslog server port.
    #[getset(get_copy = "pub")]
    port: u16,

    /// Wire transport.
    #[getset(get_copy = "pub")]
    transport: SyslogTransport,

    /// Path to a CA file, used when `transport` is [`SyslogTransport::Tls`].
    #[getset(get = "pub")]
    tls_ca_file: Option<String>,

    /// Path to a client certificate, used when `transport` is [`SyslogTransport::Tls`].
    #[getset(get = "pub")]
    tls_cert_file: Option<String>,

    /// Path to the client certificate's key, used when `transport` is [`SyslogTransport::Tls`].
    #[getset(get = "pub")]
    tls_key_file: Option<String>,

    /// Whether to skip TLS verification; for local development only.
    #[getset(get_copy = "pub")]
    tls_insecure: bool,
}

impl SyslogConfig {
    /// Load syslog settings from the environment.
    pub fn from_env() -> Result<Self, Report<Error>> {
        Ok(SyslogConfig {
            server: env_or("DSXCONNECT_SYSLOG__SYSLOG_SERVER_URL", "127.0.0.1"),
            port: env_parse_or("DSXCONNECT_SYSLOG__SYSLOG_SERVER_PORT", 514u16)?,
            transport: env_parse_or("DSXCONNECT_SYSLOG__TRANSPORT", SyslogTransport::Tcp)?,
            tls_ca_file: crate::config::env_var("DSXCONNECT_SYSLOG__TLS_CA_FILE"),
            tls_cert_file: crate::config::env_var("DSXCONNECT_SYSLOG__TLS_CERT_FILE"),
            tls_key_file: crate::config::env_var("DSXCONNECT_SYSLOG__TLS_KEY_FILE"),
            tls_insecure: env_parse_or("DSXCONNECT_SYSLOG__TLS_INSECURE", false)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_parses_case_insensitively() {
        assert_eq!("TCP".parse::<SyslogTransport>(), Ok(SyslogTransport::Tcp));
        assert_eq!("tls".parse::<SyslogTransport>(), Ok(SyslogTransport::Tls));
    }
}
