//! Implementation for the `run` subcommand: wires the state store, task
//! queue, and the three queue-driven workers together and runs them
//! concurrently until one fails or the process is asked to shut down.

use std::time::Duration;

use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{ConnectorClient, DiannaClient, ScannerClient};
use crate::config::Config;
use crate::contracts::{Queue, ScanRequest};
use crate::ext::result::DiscardResult;
use crate::notifier::Notifier;
use crate::queue::TaskQueue;
use crate::state::StateStore;
use crate::worker::batch::{BatchPayload, BatchWorker};
use crate::worker::dianna::{DiannaTaskPayload, DiannaWorker};
use crate::worker::scan_request::ScanRequestWorker;
use crate::worker::WorkerKernel;

/// How long a worker loop sleeps before re-polling an empty queue.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How often the background healthcheck loop pings the control-plane broker.
const HEALTHCHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Errors encountered during runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to connect to one of the worker pool's Redis endpoints.
    #[error("connect to broker")]
    Connect,

    /// Failed to build an HTTP client for one of the worker pool's collaborators.
    #[error("build http client")]
    BuildClient,

    /// The periodic internal healthcheck failed.
    #[error("healthcheck")]
    Healthcheck,

    /// Failed to receive a task from a queue.
    #[error("receive task for processing")]
    TaskReceive,
}

/// The primary entrypoint: wires everything up and runs it to completion or
/// first fatal error. `token` is cancelled by the caller on shutdown signal.
#[tracing::instrument(skip_all, fields(subcommand = "run"))]
pub async fn main(config: Config, token: CancellationToken) -> Result<(), Error> {
    let control_state = StateStore::connect(config.redis_url())
        .await
        .change_context(Error::Connect)
        .describe("connect to control-plane broker")?;
    let task_queue = TaskQueue::connect(config.workers().broker_url(), config.app_env().as_str())
        .await
        .change_context(Error::Connect)
        .describe("connect to task queue broker")?;

    let kernel = WorkerKernel::new(
        control_state.clone(),
        task_queue.clone(),
        config.workers().clone(),
        config.redis().clone(),
    );

    let scanner = ScannerClient::new(
        config.scanner().base_url(),
        config.scanner().auth_token().clone(),
        config.scanner().timeout(),
        config.scanner().verify_tls(),
    )
    .change_context(Error::BuildClient)
    .describe("build scanner http client")?;
    let connector = ConnectorClient::new();
    let dianna = DiannaClient::new(
        config.dianna().management_url(),
        config.dianna().api_token().clone(),
        config.dianna().timeout(),
        config.dianna().verify_tls(),
    )
    .change_context(Error::BuildClient)
    .describe("build dianna http client")?;
    let notifier = Notifier::new(control_state.clone(), config.syslog().clone());

    let scan_request_worker = ScanRequestWorker::new(
        kernel.clone(),
        scanner,
        connector.clone(),
        config.scanner().max_file_size_bytes(),
        config.scanner().max_inflight(),
    );
    let batch_worker = BatchWorker::new(kernel.clone());
    let dianna_worker = DiannaWorker::new(
        kernel.clone(),
        connector,
        dianna,
        notifier,
        config.dianna().chunk_size(),
        config.dianna().poll_results_enabled(),
        config.dianna().poll_interval(),
        config.dianna().poll_timeout(),
    );

    let healthcheck_worker = healthcheck(control_state, token.clone());
    let scan_request_loop = scan_request_worker_loop(task_queue.clone(), scan_request_worker, token.clone());
    let batch_loop = batch_worker_loop(task_queue.clone(), batch_worker, token.clone());
    let dianna_loop = dianna_worker_loop(task_queue, dianna_worker, token);

    // `try_join!` keeps every worker running until one fails, at which point
    // the failure is returned and the rest stop being polled. We don't care
    // about any of their individual return values, so discard the tuple.
    futures::try_join!(healthcheck_worker, scan_request_loop, batch_loop, dianna_loop).discard_ok()
}

/// Periodically confirm the control-plane broker is still reachable. Mirrors
/// the worker pool's own retry posture: a failed ping is surfaced, not
/// swallowed, since a dead control plane means every worker is already stuck.
#[tracing::instrument(skip_all)]
async fn healthcheck(state: StateStore, token: CancellationToken) -> Result<(), Error> {
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(HEALTHCHECK_INTERVAL) => {
                state.ping().await.change_context(Error::Healthcheck)?;
            }
        }
    }
}

#[tracing::instrument(skip_all)]
async fn scan_request_worker_loop(
    queue: TaskQueue,
    worker: ScanRequestWorker,
    token: CancellationToken,
) -> Result<(), Error> {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            result = queue.recv_task::<ScanRequest>(Queue::Request) => result.change_context(Error::TaskReceive)?,
        };
        let Some(task) = next else {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
            continue;
        };
        let task_id = task.task_id.clone();
        match worker.handle(task).await {
            Ok(outcome) => info!(task_id, outcome, "scan request handled"),
            Err(err) => warn!(task_id, %err, "scan request kernel bookkeeping failed"),
        }
    }
}

#[tracing::instrument(skip_all)]
async fn batch_worker_loop(queue: TaskQueue, worker: BatchWorker, token: CancellationToken) -> Result<(), Error> {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            result = queue.recv_task::<BatchPayload>(Queue::RequestBatch) => result.change_context(Error::TaskReceive)?,
        };
        let Some(task) = next else {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
            continue;
        };
        let task_id = task.task_id.clone();
        match worker.handle(task).await {
            Ok(outcome) => info!(task_id, outcome, "batch handled"),
            Err(err) => warn!(task_id, %err, "batch kernel bookkeeping failed"),
        }
    }
}

#[tracing::instrument(skip_all)]
async fn dianna_worker_loop(queue: TaskQueue, worker: DiannaWorker, token: CancellationToken) -> Result<(), Error> {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            result = queue.recv_task::<DiannaTaskPayload>(Queue::Analyze) => result.change_context(Error::TaskReceive)?,
        };
        let Some(task) = next else {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
            continue;
        };
        let task_id = task.task_id.clone();
        match worker.handle(task).await {
            Ok(result) => info!(task_id, status = %result.status, "dianna analysis handled"),
            Err(err) => warn!(task_id, %err, "dianna kernel bookkeeping failed"),
        }
    }
}
