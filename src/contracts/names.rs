//! Stable, environment-agnostic names for queues, tasks, and state keys.

use std::fmt;

/// The named queues workers drain from and dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Single scan requests land here.
    Request,

    /// Batches of scan requests land here before being fanned out to [`Queue::Request`].
    RequestBatch,

    /// Scanner verdicts land here.
    Verdict,

    /// Terminal per-request results land here (out of this crate's core, but named for completeness).
    Result,

    /// UI/notification fan-out lands here.
    Notification,

    /// DIANNA analysis requests land here.
    Analyze,
}

impl Queue {
    /// The queue's stable name, scoped by environment.
    pub fn name(self, app_env: &str) -> String {
        format!("{app_env}.dsx_connect.scans.{}", self.subject())
    }

    fn subject(self) -> &'static str {
        match self {
            Queue::Request => "request",
            Queue::RequestBatch => "request.batch",
            Queue::Verdict => "verdict",
            Queue::Result => "result",
            Queue::Notification => "result.notify",
            Queue::Analyze => "analyze.dianna",
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subject())
    }
}

/// The stable, dotted task identifiers carried alongside enqueued jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// [`Queue::Request`]'s task.
    Request,
    /// [`Queue::RequestBatch`]'s task.
    RequestBatch,
    /// [`Queue::Verdict`]'s task.
    Verdict,
    /// [`Queue::Result`]'s task.
    Result,
    /// [`Queue::Notification`]'s task.
    Notification,
    /// [`Queue::Analyze`]'s task.
    DiannaAnalyze,
}

impl Task {
    /// The task's stable, environment-agnostic name.
    pub const fn name(self) -> &'static str {
        match self {
            Task::Request => "dsx_connect.tasks.scan.request",
            Task::RequestBatch => "dsx_connect.tasks.scan.request.batch",
            Task::Verdict => "dsx_connect.tasks.scan.verdict",
            Task::Result => "dsx_connect.tasks.scan.result",
            Task::Notification => "dsx_connect.tasks.scan.result.notify",
            Task::DiannaAnalyze => "dsx_connect.tasks.dianna.analyze",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const PREFIX: &str = "dsxconnect";

/// The state hash key for a scan job's pause/cancel/timestamp bookkeeping.
pub fn job_key(job_id: &str) -> String {
    format!("{PREFIX}:job:{job_id}")
}

/// The (currently reserved, unused) key for a job's task-set membership.
pub fn job_tasks_key(job_id: &str) -> String {
    format!("{}:tasks", job_key(job_id))
}

/// The glob pattern matching all job keys, for administrative scans.
pub fn job_key_pattern() -> &'static str {
    "dsxconnect:job:*"
}

/// The integer counter key bounding concurrent in-flight scans.
pub fn scanner_inflight_key() -> &'static str {
    "dsxconnect:scanner:inflight"
}

/// The key under which a malicious verdict's task-id-to-context mapping is stored.
pub fn malicious_index_key(scan_request_task_id: &str) -> String {
    format!("{PREFIX}:malicious:{scan_request_task_id}")
}

/// The channel on which terminal and progress UI events are published.
pub fn notifications_channel() -> &'static str {
    "dsxconnect:notifications"
}

/// The append-only list key for a worker family's dead letters.
pub fn dlq_key(family: &str) -> String {
    format!("{PREFIX}:dlq:{family}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_are_scoped_by_env() {
        assert_eq!(Queue::Request.name("dev"), "dev.dsx_connect.scans.request");
        assert_eq!(
            Queue::RequestBatch.name("prod"),
            "prod.dsx_connect.scans.request.batch"
        );
        assert_eq!(Queue::Analyze.name("stg"), "stg.dsx_connect.scans.analyze.dianna");
    }

    #[test]
    fn task_names_are_stable_and_dotted() {
        assert_eq!(Task::Request.name(), "dsx_connect.tasks.scan.request");
        assert_eq!(Task::DiannaAnalyze.name(), "dsx_connect.tasks.dianna.analyze");
    }

    #[test]
    fn job_key_shape() {
        assert_eq!(job_key("abc"), "dsxconnect:job:abc");
        assert_eq!(job_tasks_key("abc"), "dsxconnect:job:abc:tasks");
    }
}
