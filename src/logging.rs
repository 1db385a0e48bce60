//! Structured logging setup for the worker process.
//!
//! Two sinks, always stacked: a compact, human-facing layer on stderr at
//! `INFO` and above, and (when `DSXCONNECT_LOG_DIR` is set) an hourly
//! rotating JSON sink capturing every level for later ingestion.

use std::path::{Path, PathBuf};

use error_stack::{Report, ResultExt};
use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

use crate::ext::error_stack::{DescribeContext, ErrorHelper, IntoContext};

/// Errors encountered while standing up the tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The tracing subscriber was already installed once for this process.
    #[error("tracing subscriber configured more than once")]
    AlreadyConfigured,

    /// The log directory could not be created.
    #[error("create log output directory")]
    EnsureLogRoot,

    /// The rolling file sink could not be opened.
    #[error("configure rolling log sink")]
    RollingSink,
}

/// Stand up the process-wide tracing subscriber.
///
/// Returns a guard that must be held for the life of the process; dropping
/// it stops the background writer thread flushing the file sink.
#[must_use = "dropping this guard stops the log writer thread"]
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, Report<Error>> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_file(false)
        .with_line_number(false)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_filter(tracing_subscriber::filter::LevelFilter::INFO);

    let Some(log_dir) = log_dir else {
        Registry::default()
            .with(stderr_layer)
            .try_init()
            .map_err(|_| Report::new(Error::AlreadyConfigured))?;
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)
        .context(Error::EnsureLogRoot)
        .describe_lazy(|| format!("log output directory: '{}'", log_dir.display()))?;

    let target = log_dir.join("dsxw.log");
    let file = rolling_sink(&target)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(writer);

    Registry::default()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()
        .map_err(|_| Report::new(Error::AlreadyConfigured))?;

    Ok(Some(guard))
}

fn rolling_sink(target: &PathBuf) -> Result<BasicRollingFileAppender, Report<Error>> {
    BasicRollingFileAppender::new(
        target,
        RollingConditionBasic::new().hourly(),
        ArtifactRetentionCount::default().0,
    )
    .context(Error::RollingSink)
    .help("check that the log directory is writable")
}

struct ArtifactRetentionCount(usize);

impl Default for ArtifactRetentionCount {
    fn default() -> Self {
        Self(24 * 7)
    }
}
