use std::sync::{Arc, Mutex};

use chrono::Utc;
use minirag_core::types::{new_id, now_ts};
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::db::init_db;
use crate::error::{QueueError, Result};
use crate::types::{Job, JobStatus};

/// Retry delay after a failed handler run.
const RETRY_DELAY_SECS: i64 = 30;
/// One retry: at-least-once delivery with handlers idempotent on their args.
const MAX_ATTEMPTS: u32 = 2;

/// Shared handle to the durable queue. Enqueue from any task; the worker
/// claims and executes. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    conn: Arc<Mutex<Connection>>,
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    use std::str::FromStr;
    let args = serde_json::from_str(&row.get::<_, String>(2)?)
        .unwrap_or(serde_json::Value::Null);
    let status = JobStatus::from_str(&row.get::<_, String>(3)?).unwrap_or(JobStatus::Pending);
    Ok(Job {
        id: row.get(0)?,
        job_name: row.get(1)?,
        args,
        status,
        attempts: row.get(4)?,
        last_error: row.get(5)?,
        run_after: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const JOB_COLS: &str =
    "id, job_name, args, status, attempts, last_error, run_after, created_at, updated_at";

impl JobQueue {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Enqueue a job for immediate execution. An identical pending job
    /// (same name and args) is reused instead of duplicated; the common
    /// double-submit case under at-least-once delivery.
    pub fn enqueue(&self, job_name: &str, args: serde_json::Value) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let args_json = serde_json::to_string(&args)?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM queue_jobs
                 WHERE job_name = ?1 AND args = ?2 AND status = 'pending'",
                params![job_name, args_json],
                |row| row.get(0),
            )
            .ok();
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = new_id();
        let now = now_ts();
        conn.execute(
            "INSERT INTO queue_jobs (id, job_name, args, status, attempts, run_after,
                                     created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4, ?4)",
            params![id, job_name, args_json, now],
        )?;
        info!(job_id = %id, job_name, "job enqueued");
        Ok(id)
    }

    /// Claim the oldest due pending job. The conditional UPDATE is the claim:
    /// with several workers polling, only the one that flips the row wins.
    pub fn claim_due(&self) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let now = now_ts();

        let candidate: Option<Job> = conn
            .query_row(
                &format!(
                    "SELECT {} FROM queue_jobs
                     WHERE status = 'pending' AND run_after <= ?1
                     ORDER BY run_after LIMIT 1",
                    JOB_COLS
                ),
                params![now],
                row_to_job,
            )
            .ok();

        let Some(mut job) = candidate else {
            return Ok(None);
        };

        let n = conn.execute(
            "UPDATE queue_jobs
             SET status = 'running', attempts = attempts + 1, updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![job.id, now],
        )?;
        if n == 0 {
            return Ok(None);
        }
        job.status = JobStatus::Running;
        job.attempts += 1;
        Ok(Some(job))
    }

    pub fn mark_done(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE queue_jobs SET status = 'done', updated_at = ?2 WHERE id = ?1",
            params![id, now_ts()],
        )?;
        if n == 0 {
            return Err(QueueError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Requeue with a delay until attempts are exhausted, then park as dead.
    pub fn mark_failed(&self, id: &str, attempts: u32, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ts();
        if attempts < MAX_ATTEMPTS {
            let retry_at = (Utc::now() + chrono::Duration::seconds(RETRY_DELAY_SECS)).to_rfc3339();
            warn!(job_id = %id, error, "job failed; retry scheduled");
            conn.execute(
                "UPDATE queue_jobs
                 SET status = 'pending', last_error = ?2, run_after = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![id, error, retry_at, now],
            )?;
        } else {
            warn!(job_id = %id, error, "job failed; attempts exhausted");
            conn.execute(
                "UPDATE queue_jobs
                 SET status = 'dead', last_error = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id, error, now],
            )?;
        }
        Ok(())
    }

    /// On startup, return jobs a dead worker left in `running` to `pending`.
    pub fn requeue_stale_running(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE queue_jobs SET status = 'pending', updated_at = ?1
             WHERE status = 'running'",
            params![now_ts()],
        )?;
        if n > 0 {
            warn!(count = n, "requeued stale running jobs on startup");
        }
        Ok(n)
    }

    pub fn get_job(&self, id: &str) -> Result<Job> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM queue_jobs WHERE id = ?1", JOB_COLS),
            params![id],
            row_to_job,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => QueueError::JobNotFound { id: id.to_string() },
            other => other.into(),
        })
    }

    /// Register a periodic job. The first firing happens on the next poll;
    /// re-registration keeps the existing row so restarts don't reset phase.
    pub fn register_cron(&self, name: &str, interval_secs: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ts();
        conn.execute(
            "INSERT INTO cron_jobs (name, interval_secs, next_run, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3, ?3)
             ON CONFLICT(name) DO UPDATE SET interval_secs = excluded.interval_secs",
            params![name, interval_secs, now],
        )?;
        Ok(())
    }

    /// Names of cron jobs that are due; advances each one's `next_run` so a
    /// firing is consumed exactly once per interval.
    pub fn due_crons(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let now = now_ts();

        let due: Vec<(String, i64)> = {
            let mut stmt = conn.prepare(
                "SELECT name, interval_secs FROM cron_jobs WHERE next_run <= ?1",
            )?;
            let rows = stmt
                .query_map(params![now], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut fired = Vec::with_capacity(due.len());
        for (name, interval_secs) in due {
            let next = (Utc::now() + chrono::Duration::seconds(interval_secs)).to_rfc3339();
            conn.execute(
                "UPDATE cron_jobs SET next_run = ?2, last_run = ?3, updated_at = ?3
                 WHERE name = ?1",
                params![name, next, now],
            )?;
            fired.push(name);
        }
        Ok(fired)
    }

    /// Connectivity probe for the health endpoint.
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_claim_done() {
        let queue = JobQueue::open_in_memory().unwrap();
        let id = queue
            .enqueue("ingest_source", serde_json::json!({"source_id": "s1"}))
            .unwrap();

        let job = queue.claim_due().unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.args["source_id"], "s1");

        // Claimed job is invisible to further claims.
        assert!(queue.claim_due().unwrap().is_none());

        queue.mark_done(&id).unwrap();
        assert_eq!(queue.get_job(&id).unwrap().status, JobStatus::Done);
    }

    #[test]
    fn identical_pending_jobs_dedupe() {
        let queue = JobQueue::open_in_memory().unwrap();
        let args = serde_json::json!({"source_id": "s1"});
        let a = queue.enqueue("ingest_source", args.clone()).unwrap();
        let b = queue.enqueue("ingest_source", args.clone()).unwrap();
        assert_eq!(a, b);

        // Different args are a different job.
        let c = queue
            .enqueue("ingest_source", serde_json::json!({"source_id": "s2"}))
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn failure_retries_once_then_dies() {
        let queue = JobQueue::open_in_memory().unwrap();
        let id = queue.enqueue("ingest_source", serde_json::json!({})).unwrap();

        let job = queue.claim_due().unwrap().unwrap();
        queue.mark_failed(&job.id, job.attempts, "boom").unwrap();
        let retried = queue.get_job(&id).unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.last_error.as_deref(), Some("boom"));

        // Not yet due: retry is delayed.
        assert!(queue.claim_due().unwrap().is_none());

        // Second failure exhausts the attempt budget.
        queue.mark_failed(&id, 2, "boom again").unwrap();
        assert_eq!(queue.get_job(&id).unwrap().status, JobStatus::Dead);
    }

    #[test]
    fn stale_running_jobs_requeue() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue.enqueue("ingest_source", serde_json::json!({})).unwrap();
        let job = queue.claim_due().unwrap().unwrap();

        assert_eq!(queue.requeue_stale_running().unwrap(), 1);
        let reclaimed = queue.claim_due().unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[test]
    fn cron_fires_once_per_interval() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue.register_cron("refresh_sources", 900).unwrap();

        let fired = queue.due_crons().unwrap();
        assert_eq!(fired, vec!["refresh_sources".to_string()]);

        // Consumed: nothing due until the interval elapses.
        assert!(queue.due_crons().unwrap().is_empty());

        // Re-registration preserves the pending next_run.
        queue.register_cron("refresh_sources", 900).unwrap();
        assert!(queue.due_crons().unwrap().is_empty());
    }
}
