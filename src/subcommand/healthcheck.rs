//! Implementation for the `healthcheck` subcommand: a one-shot liveness
//! probe of every Redis endpoint this worker pool depends on.

use error_stack::{Result, ResultExt};
use tracing::info;

use crate::config::Config;
use crate::state::StateStore;

/// Errors encountered while probing broker connectivity.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Could not reach the control-plane broker.
    #[error("reach control-plane broker")]
    ControlPlane,

    /// Could not reach the task-queue broker.
    #[error("reach task queue broker")]
    Broker,

    /// Could not reach the task-queue result backend.
    #[error("reach task queue result backend")]
    Backend,

    /// Could not reach the results database.
    #[error("reach results database")]
    ResultsDb,

    /// Could not reach the SIEM index database.
    #[error("reach SIEM index database")]
    IndexDb,
}

/// Ping every configured Redis endpoint, returning an error naming the first
/// one that didn't answer.
pub async fn main(config: &Config) -> Result<(), Error> {
    StateStore::connect(config.redis_url())
        .await
        .change_context(Error::ControlPlane)?
        .ping()
        .await
        .change_context(Error::ControlPlane)?;
    info!("control-plane broker ok");

    StateStore::connect(config.workers().broker_url())
        .await
        .change_context(Error::Broker)?
        .ping()
        .await
        .change_context(Error::Broker)?;
    info!("task queue broker ok");

    StateStore::connect(config.workers().backend_url())
        .await
        .change_context(Error::Backend)?
        .ping()
        .await
        .change_context(Error::Backend)?;
    info!("task queue result backend ok");

    StateStore::connect(config.redis().results_db_url())
        .await
        .change_context(Error::ResultsDb)?
        .ping()
        .await
        .change_context(Error::ResultsDb)?;
    info!("results database ok");

    StateStore::connect(config.redis().index_db_url())
        .await
        .change_context(Error::IndexDb)?
        .ping()
        .await
        .change_context(Error::IndexDb)?;
    info!("SIEM index database ok");

    Ok(())
}
