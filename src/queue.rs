//! The task queue adapter: named work queues with at-least-once delivery,
//! retry scheduling with countdown, and task-state introspection.
//!
//! Queues are plain Redis lists; a task whose `countdown` has not yet
//! elapsed sits in a per-queue sorted set instead and is promoted into the
//! list by the receiver once its delay has passed.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

use error_stack::{Report, ResultExt};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::contracts::Queue;
use crate::ext::error_stack::{DescribeContext, IntoContext};

/// Errors encountered using the queue.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An underlying Redis operation failed.
    #[error("underlying broker operation")]
    Broker,

    /// When sending to the queue, the item is serialized.
    /// If that serialize operation fails, this error is returned.
    #[error("serialize task payload")]
    Serialize,

    /// When receiving from the queue, the item is deserialized.
    /// If that deserialize operation fails, this error is returned.
    #[error("deserialize task payload")]
    Deserialize,
}

/// A task's lifecycle state, as tracked by [`TaskQueue::async_result`].
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Enqueued, not yet picked up by a worker.
    Pending,
    /// Picked up but not yet started (reserved for symmetry with the task model; unused internally).
    Received,
    /// A worker has begun executing the task.
    Started,
    /// The task failed and has been rescheduled with backoff.
    Retry,
    /// The task finished successfully.
    Success,
    /// The task failed permanently (dead-lettered).
    Failure,
    /// The task was cancelled before it started.
    Revoked,
}

/// A task popped off a queue, still serialized, carrying its envelope.
pub struct EnqueuedTask<T> {
    t: PhantomData<T>,
    /// This task's own id.
    pub task_id: String,
    /// The root id correlating this task across retries and stages; equal to
    /// `task_id` for a task's first attempt.
    pub scan_request_task_id: String,
    /// The task id that enqueued this one, if this is a chained follow-up.
    pub upstream_task_id: Option<String>,
    /// How many times this task has already been retried.
    pub retry_count: u32,
    payload: String,
}

impl<T> Debug for EnqueuedTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnqueuedTask")
            .field("task_id", &self.task_id)
            .field("scan_request_task_id", &self.scan_request_task_id)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

impl<T> EnqueuedTask<T>
where
    T: DeserializeOwned,
{
    /// Deserialize this task's payload.
    pub fn item(&self) -> Result<T, Report<Error>> {
        serde_json::from_str(&self.payload).context(Error::Deserialize)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Envelope {
    scan_request_task_id: String,
    upstream_task_id: Option<String>,
    retry_count: u32,
    payload: serde_json::Value,
}

/// A handle onto one named queue's send and receive sides.
#[derive(Clone)]
pub struct TaskQueue {
    conn: ConnectionManager,
    app_env: String,
}

/// Options controlling how a task is (re)enqueued.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Delay, in seconds, before the task becomes visible to a receiver.
    pub countdown: u64,
    /// The root id to preserve; `None` mints a fresh one (first enqueue).
    pub scan_request_task_id: Option<String>,
    /// The task id that triggered this enqueue, if any.
    pub upstream_task_id: Option<String>,
    /// The retry count to carry forward; `0` for a fresh task or a
    /// non-retry reschedule (pause/backpressure, per spec invariant I3).
    pub retry_count: u32,
}

impl TaskQueue {
    /// Connect to the broker backing this task queue.
    pub async fn connect(url: &str, app_env: impl Into<String>) -> Result<Self, Report<Error>> {
        let client = redis::Client::open(url)
            .context(Error::Broker)
            .describe("parse task queue connection url")?;
        let conn = client
            .get_connection_manager()
            .await
            .context(Error::Broker)
            .describe("open task queue connection")?;
        Ok(Self {
            conn,
            app_env: app_env.into(),
        })
    }

    fn list_key(&self, queue: Queue) -> String {
        queue.name(&self.app_env)
    }

    fn delayed_key(&self, queue: Queue) -> String {
        format!("{}.delayed", self.list_key(queue))
    }

    fn task_key(task_id: &str) -> String {
        format!("dsxconnect:task:{task_id}")
    }

    /// Enqueue a task, returning its id. Preserves the caller-supplied root
    /// id across reschedules (spec invariant I4).
    pub async fn send_task<T: Serialize>(
        &self,
        queue: Queue,
        payload: &T,
        opts: SendOptions,
    ) -> Result<String, Report<Error>> {
        let task_id = Uuid::new_v4().to_string();
        let scan_request_task_id = opts.scan_request_task_id.unwrap_or_else(|| task_id.clone());
        let payload = serde_json::to_value(payload).context(Error::Serialize)?;
        let envelope = Envelope {
            scan_request_task_id,
            upstream_task_id: opts.upstream_task_id,
            retry_count: opts.retry_count,
            payload,
        };
        let encoded = serde_json::to_string(&envelope).context(Error::Serialize)?;

        let mut conn = self.conn.clone();
        let task_key = Self::task_key(&task_id);
        let _: () = conn
            .hset_multiple(&task_key, &[("state", TaskState::Pending.to_string().as_str())])
            .await
            .context(Error::Broker)?;
        let _: bool = conn.expire(&task_key, 7 * 24 * 60 * 60).await.context(Error::Broker)?;

        if opts.countdown == 0 {
            let _: i64 = conn
                .rpush(self.list_key(queue), format!("{task_id}\u{0}{encoded}"))
                .await
                .context(Error::Broker)
                .describe("enqueue task")?;
        } else {
            let ready_at = now_unix() + opts.countdown;
            let _: i64 = conn
                .zadd(
                    self.delayed_key(queue),
                    format!("{task_id}\u{0}{encoded}"),
                    ready_at as f64,
                )
                .await
                .context(Error::Broker)
                .describe("schedule delayed task")?;
        }

        Ok(task_id)
    }

    /// Promote any delayed tasks whose countdown has elapsed into the
    /// immediate queue, then pop and return the next ready task, if any.
    pub async fn recv_task<T: DeserializeOwned>(
        &self,
        queue: Queue,
    ) -> Result<Option<EnqueuedTask<T>>, Report<Error>> {
        self.promote_ready(queue).await?;

        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .lpop(self.list_key(queue), None)
            .await
            .context(Error::Broker)
            .describe("pop next task")?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let (task_id, encoded) = raw
            .split_once('\u{0}')
            .ok_or_else(|| Report::new(Error::Deserialize))
            .describe("split task envelope from its id")?;
        let envelope: Envelope = serde_json::from_str(encoded).context(Error::Deserialize)?;
        let _: () = conn
            .hset(Self::task_key(task_id), "state", TaskState::Started.to_string())
            .await
            .context(Error::Broker)?;

        Ok(Some(EnqueuedTask {
            t: PhantomData,
            task_id: task_id.to_string(),
            scan_request_task_id: envelope.scan_request_task_id,
            upstream_task_id: envelope.upstream_task_id,
            retry_count: envelope.retry_count,
            payload: envelope.payload.to_string(),
        }))
    }

    async fn promote_ready(&self, queue: Queue) -> Result<(), Report<Error>> {
        let mut conn = self.conn.clone();
        let now = now_unix();
        let ready: Vec<String> = conn
            .zrangebyscore(self.delayed_key(queue), 0, now as f64)
            .await
            .context(Error::Broker)?;
        for item in ready {
            let _: i64 = conn
                .zrem(self.delayed_key(queue), &item)
                .await
                .context(Error::Broker)?;
            let _: i64 = conn.rpush(self.list_key(queue), &item).await.context(Error::Broker)?;
        }
        Ok(())
    }

    /// Mark a task's terminal state (`SUCCESS` or `FAILURE`), or an
    /// in-progress state (`RETRY`) when it is rescheduled.
    pub async fn set_state(&self, task_id: &str, state: TaskState) -> Result<(), Report<Error>> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(Self::task_key(task_id), "state", state.to_string())
            .await
            .context(Error::Broker)?;
        Ok(())
    }

    /// Look up a task's current state.
    pub async fn async_result(&self, task_id: &str) -> Result<Option<TaskState>, Report<Error>> {
        let mut conn = self.conn.clone();
        let state: Option<String> = conn.hget(Self::task_key(task_id), "state").await.context(Error::Broker)?;
        Ok(state.and_then(|s| match s.as_str() {
            "PENDING" => Some(TaskState::Pending),
            "RECEIVED" => Some(TaskState::Received),
            "STARTED" => Some(TaskState::Started),
            "RETRY" => Some(TaskState::Retry),
            "SUCCESS" => Some(TaskState::Success),
            "FAILURE" => Some(TaskState::Failure),
            "REVOKED" => Some(TaskState::Revoked),
            _ => None,
        }))
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_display_matches_celery_style_names() {
        assert_eq!(TaskState::Pending.to_string(), "PENDING");
        assert_eq!(TaskState::Failure.to_string(), "FAILURE");
    }
}
