use async_trait::async_trait;
use tracing::{debug, info};

use minirag_queue::{JobHandler, JobQueue};
use minirag_store::MetaStore;

use crate::worker::INGEST_JOB;

pub const REFRESH_JOB: &str = "refresh_sources";
/// Scheduler cadence: every 15 minutes.
pub const REFRESH_INTERVAL_SECS: i64 = 900;

/// Periodic selector of refresh-eligible sources. Never does the work
/// itself; every hit becomes an `ingest_source` job on the shared queue.
pub struct RefreshScheduler {
    store: MetaStore,
    queue: JobQueue,
}

impl RefreshScheduler {
    pub fn new(store: MetaStore, queue: JobQueue) -> Self {
        Self { store, queue }
    }
}

#[async_trait]
impl JobHandler for RefreshScheduler {
    async fn handle(&self, _args: serde_json::Value) -> Result<(), String> {
        let eligible = self
            .store
            .eligible_refresh_sources()
            .map_err(|e| e.to_string())?;

        if eligible.is_empty() {
            debug!("refresh tick: nothing eligible");
            return Ok(());
        }

        info!(count = eligible.len(), "refresh tick: enqueueing ingests");
        for (source_id, tenant_id) in eligible {
            self.queue
                .enqueue(
                    INGEST_JOB,
                    serde_json::json!({
                        "source_id": source_id,
                        "tenant_id": tenant_id,
                    }),
                )
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirag_store::types::{RefreshSchedule, SourceType};

    #[tokio::test]
    async fn eligible_source_gets_exactly_one_job() {
        let store = MetaStore::open_in_memory().unwrap();
        let queue = JobQueue::open_in_memory().unwrap();
        let tenant = store.create_tenant("Acme", "acme", "free").unwrap();
        let bot = store
            .create_bot_profile(&tenant.id, "b", "gpt-4o-mini", "", 0.7, 256, None)
            .unwrap();
        let src = store
            .create_source(
                &tenant.id,
                &bot.id,
                None,
                SourceType::Url,
                "docs",
                "https://example.com",
                "{}",
                RefreshSchedule::Hourly,
            )
            .unwrap();

        // Ready 70 minutes ago; past the hourly interval.
        store.finalize_ready(&src.id, &tenant.id, 1, 3).unwrap();
        let stale = (chrono::Utc::now() - chrono::Duration::minutes(70)).to_rfc3339();
        store
            .set_last_refreshed_at(&src.id, &tenant.id, &stale)
            .unwrap();

        let scheduler = RefreshScheduler::new(store.clone(), queue.clone());
        scheduler.handle(serde_json::json!({})).await.unwrap();

        // Exactly one job; a second tick dedupes onto the same pending job.
        let first = queue.claim_due().unwrap().expect("job enqueued");
        assert_eq!(first.job_name, INGEST_JOB);
        assert_eq!(first.args["source_id"], src.id);
        assert_eq!(first.args["tenant_id"], tenant.id);
        assert!(queue.claim_due().unwrap().is_none());
    }

    #[tokio::test]
    async fn unscheduled_sources_are_ignored() {
        let store = MetaStore::open_in_memory().unwrap();
        let queue = JobQueue::open_in_memory().unwrap();
        let tenant = store.create_tenant("Acme", "acme", "free").unwrap();
        let bot = store
            .create_bot_profile(&tenant.id, "b", "gpt-4o-mini", "", 0.7, 256, None)
            .unwrap();
        store
            .create_source(
                &tenant.id,
                &bot.id,
                None,
                SourceType::Text,
                "notes",
                "text",
                "{}",
                RefreshSchedule::None,
            )
            .unwrap();

        let scheduler = RefreshScheduler::new(store, queue.clone());
        scheduler.handle(serde_json::json!({})).await.unwrap();
        assert!(queue.claim_due().unwrap().is_none());
    }
}
