//! The state store adapter: strongly-consistent key/value operations and
//! atomic script execution against the shared control-plane broker.
//!
//! This crate's "broker" plays both message-queue and coordination roles, so
//! [`StateStore`] and [`crate::queue`] both talk to Redis, usually to
//! different logical databases.

use std::collections::HashMap;

use error_stack::{Report, ResultExt};
use once_cell::sync::OnceCell;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::contracts::JobState;
use crate::ext::error_stack::{DescribeContext, IntoContext};

/// An error returned by a state-store operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Could not establish or maintain the connection to the broker.
    #[error("connect to state store")]
    Connect,

    /// A command failed on the broker.
    #[error("execute state store command")]
    Command,
}

// Lua source for acquire-scanner-slot (component A's required script).
// Returns (acquired, observed_inflight); never leaves `inflight` above
// `max_inflight` since the overshoot is rolled back within the same script.
const ACQUIRE_SCANNER_SLOT_LUA: &str = r#"
local key = KEYS[1]
local max_inflight = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])

local inflight = redis.call("INCR", key)
if inflight == 1 then
    redis.call("EXPIRE", key, ttl)
end

if inflight > max_inflight then
    redis.call("DECR", key)
    return {0, inflight - 1}
end

return {1, inflight}
"#;

fn acquire_scanner_script() -> &'static Script {
    static SCRIPT: OnceCell<Script> = OnceCell::new();
    SCRIPT.get_or_init(|| Script::new(ACQUIRE_SCANNER_SLOT_LUA))
}

const JOB_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const INFLIGHT_TTL_SECS: i64 = 10 * 60;

/// A handle onto the shared control-plane broker.
#[derive(Clone)]
pub struct StateStore {
    conn: ConnectionManager,
}

impl StateStore {
    /// Connect to the broker at `url`.
    pub async fn connect(url: &str) -> Result<Self, Report<Error>> {
        let client = redis::Client::open(url)
            .context(Error::Connect)
            .describe("parse state store connection url")?;
        let conn = client
            .get_connection_manager()
            .await
            .context(Error::Connect)
            .describe("open state store connection")?;
        Ok(Self { conn })
    }

    /// A one-shot liveness probe: `PING` the broker and confirm it replies.
    pub async fn ping(&self) -> Result<(), Report<Error>> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context(Error::Command)
            .describe("ping broker")?;
        Ok(())
    }

    /// Run the acquire-scanner-slot script against the inflight gauge,
    /// bounding concurrent in-flight scans at `max_inflight`.
    ///
    /// Returns `(acquired, observed_inflight)`. Implements spec invariant I2:
    /// `acquired == true` implies `1 <= observed_inflight <= max_inflight`.
    pub async fn acquire_scanner_slot(
        &self,
        max_inflight: u32,
    ) -> Result<(bool, i64), Report<Error>> {
        let mut conn = self.conn.clone();
        let (acquired, observed): (i64, i64) = acquire_scanner_script()
            .key(crate::contracts::names::scanner_inflight_key())
            .arg(max_inflight)
            .arg(INFLIGHT_TTL_SECS)
            .invoke_async(&mut conn)
            .await
            .context(Error::Command)
            .describe("invoke acquire-scanner-slot script")?;
        Ok((acquired == 1, observed))
    }

    /// Release a previously acquired scanner slot. Best-effort: the TTL on
    /// the inflight key bounds drift if this never runs (worker crash).
    pub async fn release_scanner_slot(&self) -> Result<(), Report<Error>> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .decr(crate::contracts::names::scanner_inflight_key(), 1)
            .await
            .context(Error::Command)
            .describe("release scanner slot")?;
        Ok(())
    }

    /// Read a job's pause/cancel state. Missing fields default to `false`/`None`.
    pub async fn job_state(&self, job_id: &str) -> Result<JobState, Report<Error>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(crate::contracts::names::job_key(job_id))
            .await
            .context(Error::Command)
            .describe("read job hash")?;
        Ok(JobState {
            status: fields.get("status").cloned(),
            paused: fields.get("paused").map(|v| v == "1").unwrap_or(false),
            cancelled: fields.get("cancel").map(|v| v == "1").unwrap_or(false),
        })
    }

    /// Best-effort job timestamp upsert: sets `first_scan_started_at` only if
    /// absent, always refreshes `last_scan_started_at`/`last_update`, and
    /// refreshes the 7-day TTL. Errors are logged by the caller and swallowed.
    pub async fn touch_job(&self, job_id: &str, now_unix: u64) -> Result<(), Report<Error>> {
        let mut conn = self.conn.clone();
        let key = crate::contracts::names::job_key(job_id);
        let now = now_unix.to_string();
        let _: bool = conn
            .hset_nx(&key, "first_scan_started_at", &now)
            .await
            .context(Error::Command)?;
        let _: () = conn
            .hset_multiple(&key, &[("last_scan_started_at", &now), ("last_update", &now)])
            .await
            .context(Error::Command)?;
        let _: bool = conn
            .expire(&key, JOB_TTL_SECS)
            .await
            .context(Error::Command)?;
        Ok(())
    }

    /// Record the connector context for a malicious verdict, keyed by the
    /// root `scan_request_task_id`, for later consumption by the DIANNA
    /// escalation path. Retained for `retain_secs`, per
    /// [`crate::config::RedisConfig::index_retain_days`].
    pub async fn record_malicious_index(
        &self,
        scan_request_task_id: &str,
        connector_uuid: &str,
        connector_url: &str,
        location: &str,
        metainfo: &str,
        retain_secs: i64,
    ) -> Result<(), Report<Error>> {
        let mut conn = self.conn.clone();
        let key = crate::contracts::names::malicious_index_key(scan_request_task_id);
        let _: () = conn
            .hset_multiple(
                &key,
                &[
                    ("connector_uuid", connector_uuid),
                    ("connector_url", connector_url),
                    ("location", location),
                    ("metainfo", metainfo),
                ],
            )
            .await
            .context(Error::Command)?;
        let _: bool = conn.expire(&key, retain_secs).await.context(Error::Command)?;
        Ok(())
    }

    /// Append a dead-letter record to a worker family's DLQ, expiring the
    /// whole list after `retain_secs` of inactivity.
    pub async fn enqueue_dlq(
        &self,
        family: &str,
        record_json: &str,
        retain_secs: i64,
    ) -> Result<(), Report<Error>> {
        let mut conn = self.conn.clone();
        let key = crate::contracts::names::dlq_key(family);
        let _: i64 = conn
            .rpush(&key, record_json)
            .await
            .context(Error::Command)
            .describe("append dead letter")?;
        let _: bool = conn.expire(&key, retain_secs).await.context(Error::Command)?;
        Ok(())
    }

    /// Publish a notification event onto the shared pub/sub channel.
    pub async fn publish_notification(&self, payload: &str) -> Result<(), Report<Error>> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .publish(crate::contracts::names::notifications_channel(), payload)
            .await
            .context(Error::Command)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_scanner_script_is_cached_across_calls() {
        let first = acquire_scanner_script() as *const Script;
        let second = acquire_scanner_script() as *const Script;
        assert_eq!(first, second, "script handle must be cached per process");
    }
}
