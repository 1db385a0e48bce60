//! The `dsxw` worker pool binary.

#![deny(clippy::unwrap_used)]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use std::env;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use error_stack::{Report, ResultExt};
use tap::TapFallible;
use tokio_util::sync::CancellationToken;

use dsx_connect_worker::config::Config;
use dsx_connect_worker::ext::error_stack::{ErrorHelper, IntoContext};
use dsx_connect_worker::subcommand;

/// Top-level errors surfaced from `main`.
#[derive(Debug, thiserror::Error)]
enum Error {
    /// Configuration could not be loaded from the environment.
    #[error("load configuration from the environment")]
    LoadConfig,

    /// The logging subsystem could not be initialized.
    #[error("initialize logging")]
    InternalSetup,

    /// The `run` subcommand exited with an error.
    #[error("run worker pool")]
    Run,

    /// The `healthcheck` subcommand exited with an error.
    #[error("run healthcheck")]
    Healthcheck,
}

#[derive(Debug, Parser)]
#[clap(version)]
struct Opts {
    /// `dsxw` runs one of a small number of subcommands.
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the worker pool: scan-request, batch, and DIANNA workers, plus a
    /// background healthcheck loop, until a fatal error or shutdown signal.
    Run,

    /// One-shot liveness probe of every Redis endpoint this pool depends on.
    Healthcheck,
}

#[tokio::main]
async fn main() -> Result<(), Report<Error>> {
    let Opts { command } = Opts::parse();

    let config = Config::from_env().change_context(Error::LoadConfig)?;

    let log_dir = env::var("DSXCONNECT_LOG_DIR").ok().map(PathBuf::from);
    let _tracing_guard = dsx_connect_worker::logging::init(log_dir.as_deref())
        .change_context(Error::InternalSetup)
        .help("set DSXCONNECT_LOG_DIR to enable file-based JSON logging, or leave it unset for stderr-only")?;

    let token = CancellationToken::new();
    let shutdown = token.clone();

    tokio::select! {
        biased;

        result = tokio::signal::ctrl_c() => {
            result
                .tap_ok(|_| eprintln!("shutting down: received OS signal"))
                .context(Error::InternalSetup)?;
            shutdown.cancel();
            Ok(())
        },

        result = run_command(command, config, token) => result,
    }
}

async fn run_command(command: Commands, config: Config, token: CancellationToken) -> Result<(), Report<Error>> {
    match command {
        Commands::Run => subcommand::run::main(config, token)
            .await
            .change_context(Error::Run),
        Commands::Healthcheck => subcommand::healthcheck::main(&config)
            .await
            .change_context(Error::Healthcheck),
    }
}
