use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::queue::JobQueue;

/// A named job implementation. Handlers must be idempotent on their args -
/// the queue guarantees at-least-once, not exactly-once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, args: serde_json::Value) -> Result<(), String>;
}

/// Polls the queue and dispatches claimed jobs to registered handlers.
/// Cron registrations enqueue their job name on schedule; execution then
/// flows through the same claim path as ad-hoc jobs.
pub struct QueueWorker {
    queue: JobQueue,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    poll_interval: std::time::Duration,
}

impl QueueWorker {
    pub fn new(queue: JobQueue, poll_interval: std::time::Duration) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            poll_interval,
        }
    }

    pub fn register(&mut self, job_name: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_name.to_string(), handler);
    }

    /// Register a handler that also fires periodically with empty args.
    pub fn register_cron(
        &mut self,
        job_name: &str,
        interval_secs: i64,
        handler: Arc<dyn JobHandler>,
    ) -> crate::error::Result<()> {
        self.queue.register_cron(job_name, interval_secs)?;
        self.register(job_name, handler);
        Ok(())
    }

    /// Main loop. Polls until `shutdown` broadcasts `true`; an in-flight job
    /// finishes before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("queue worker started");
        if let Err(e) = self.queue.requeue_stale_running() {
            error!("stale-job requeue failed: {e}");
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("queue worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One poll: fire due crons, then drain every claimable job.
    pub async fn tick(&self) {
        match self.queue.due_crons() {
            Ok(fired) => {
                for name in fired {
                    if let Err(e) = self.queue.enqueue(&name, serde_json::json!({})) {
                        error!(job_name = %name, "cron enqueue failed: {e}");
                    }
                }
            }
            Err(e) => error!("cron poll failed: {e}"),
        }

        loop {
            let job = match self.queue.claim_due() {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    error!("job claim failed: {e}");
                    break;
                }
            };

            let Some(handler) = self.handlers.get(&job.job_name) else {
                error!(job_name = %job.job_name, job_id = %job.id, "no handler registered");
                let _ = self
                    .queue
                    .mark_failed(&job.id, u32::MAX, "no handler registered");
                continue;
            };

            debug!(job_id = %job.id, job_name = %job.job_name, attempt = job.attempts, "job started");
            match handler.handle(job.args.clone()).await {
                Ok(()) => {
                    if let Err(e) = self.queue.mark_done(&job.id) {
                        error!(job_id = %job.id, "mark_done failed: {e}");
                    }
                }
                Err(msg) => {
                    if let Err(e) = self.queue.mark_failed(&job.id, job.attempts, &msg) {
                        error!(job_id = %job.id, "mark_failed failed: {e}");
                    }
                }
            }
        }
    }
}
