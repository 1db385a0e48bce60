//! Fan-out of terminal and progress events to the pub/sub bus and to a
//! structured syslog sink. Every call here is best-effort: failures are
//! logged and swallowed, never propagated to a worker's hot path.

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tracing::warn;

use crate::config::SyslogConfig;
use crate::config::syslog::SyslogTransport;
use crate::state::StateStore;

/// Publishes scan-result and progress events to the shared broker's pub/sub
/// channel and to syslog.
#[derive(Clone)]
pub struct Notifier {
    state: StateStore,
    syslog: SyslogConfig,
}

impl Notifier {
    /// Build a notifier over a connected state store and syslog settings.
    pub fn new(state: StateStore, syslog: SyslogConfig) -> Self {
        Self { state, syslog }
    }

    /// Publish a UI event. Best-effort: errors are logged, never returned.
    pub async fn publish_scan_results(&self, event: &Value) {
        let Ok(payload) = serde_json::to_string(event) else {
            warn!("failed to serialize notification event");
            return;
        };
        if let Err(err) = self.state.publish_notification(&payload).await {
            warn!(?err, "failed to publish notification event");
        }
    }

    /// Emit a structured syslog record. Best-effort: errors are logged, never returned.
    pub async fn emit_syslog(&self, event: &Value) {
        let Ok(line) = serde_json::to_string(event) else {
            warn!("failed to serialize syslog event");
            return;
        };
        if let Err(err) = self.send_syslog_line(&line).await {
            warn!(?err, "failed to emit syslog event");
        }
    }

    async fn send_syslog_line(&self, line: &str) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.syslog.server(), self.syslog.port());
        match self.syslog.transport() {
            SyslogTransport::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.send_to(line.as_bytes(), &addr).await?;
            }
            SyslogTransport::Tcp => {
                let mut stream = TcpStream::connect(&addr).await?;
                stream.write_all(line.as_bytes()).await?;
                stream.write_all(b"\n").await?;
            }
            SyslogTransport::Tls => {
                let tcp = TcpStream::connect(&addr).await?;
                let connector = build_tls_connector(&self.syslog).map_err(to_io_error)?;
                let connector = tokio_native_tls::TlsConnector::from(connector);
                let mut stream = connector
                    .connect(self.syslog.server(), tcp)
                    .await
                    .map_err(to_io_error)?;
                stream.write_all(line.as_bytes()).await?;
                stream.write_all(b"\n").await?;
            }
        }
        Ok(())
    }
}

fn to_io_error<E: std::fmt::Display>(err: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

/// Build the TLS connector for the syslog sink from configured CA bundle,
/// client cert/key, and insecure override. Unreadable/unparseable cert
/// material is skipped rather than failing the connector build, in keeping
/// with this sink's best-effort posture; only a genuine connector build
/// failure propagates (and is logged and swallowed by the caller).
fn build_tls_connector(
    cfg: &SyslogConfig,
) -> Result<tokio_native_tls::native_tls::TlsConnector, tokio_native_tls::native_tls::Error> {
    use tokio_native_tls::native_tls::{Certificate, Identity, TlsConnector};

    let mut builder = TlsConnector::builder();
    builder.danger_accept_invalid_certs(cfg.tls_insecure());

    if let Some(ca_path) = cfg.tls_ca_file() {
        if let Ok(pem) = std::fs::read(ca_path) {
            if let Ok(cert) = Certificate::from_pem(&pem) {
                builder.add_root_certificate(cert);
            }
        }
    }

    if let (Some(cert_path), Some(key_path)) = (cfg.tls_cert_file(), cfg.tls_key_file()) {
        if let (Ok(cert_pem), Ok(key_pem)) = (std::fs::read(cert_path), std::fs::read(key_path)) {
            if let Ok(identity) = Identity::from_pkcs8(&cert_pem, &key_pem) {
                builder.identity(identity);
            }
        }
    }

    builder.build()
}
