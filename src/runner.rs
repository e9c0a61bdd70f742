//! Batch dispatcher: selects eligible jobs and fans them out to a bounded
//! pool of workers, each processing one job under its per-job lock.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::executor;
use crate::models::{JobResult, ResultCode, RunnerConfig};
use crate::policy;
use crate::store::JobStore;

#[derive(Clone)]
pub struct Runner {
    store: Arc<dyn JobStore>,
    client: reqwest::Client,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(store: Arc<dyn JobStore>, config: RunnerConfig) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Ids of jobs worth attempting right now.
    pub async fn select_pending(&self) -> Result<Vec<Uuid>> {
        let session = self.store.open_session().await?;
        session.find_eligible_job_ids().await
    }

    /// Process one job end to end inside its own store session.
    ///
    /// Returns `Ok(None)` when the job was skipped (lock held elsewhere,
    /// vanished between selection and load, or no longer workable) and
    /// `Ok(Some(result))` when an attempt completed. The session, and with
    /// it the per-job lock, is released on every return path.
    pub async fn process_one(&self, id: Uuid) -> Result<Option<JobResult>> {
        let session = self.store.open_session().await?;

        let lock_timeout = Duration::from_secs(self.config.lock_timeout_secs);
        if !session.acquire_lock(id, lock_timeout).await? {
            session.append_log(id, "Could not acquire lock on job").await?;
            return Ok(None);
        }

        let job = match session.load_job(id).await? {
            Some(job) => job,
            None => {
                session.append_log(id, "Could not find job").await?;
                return Ok(None);
            }
        };

        // Re-checked under the lock: another worker may have finished the
        // job between selection and now.
        if !policy::is_workable(&job) {
            session.append_log(id, "Job not workable, skipping").await?;
            return Ok(None);
        }

        let result = executor::execute(session.as_ref(), &self.client, &job).await?;

        if let Some(seconds) = result.retry_delay_override {
            session.set_retry_delay(id, seconds).await?;
        }

        match policy::classify(&result) {
            ResultCode::Success => {
                session.mark_finished(id).await?;
                session.set_result_code(id, ResultCode::Success).await?;
                let text = result.text.as_deref().unwrap_or_default();
                session
                    .append_log(id, &format!("Job succeeded: {}", text))
                    .await?;
            }
            ResultCode::PermanentFailure => {
                let text = result.text.as_deref().unwrap_or_default();
                session
                    .append_log(id, &format!("Job failed permanently: {}", text))
                    .await?;
                session.set_result_code(id, ResultCode::PermanentFailure).await?;
                session.decrement_remaining_retries(id).await?;
                session.mark_finished(id).await?;
            }
            ResultCode::TemporaryFailure => {
                if result.is_timeout {
                    session.append_log(id, "Job failed due to timeout").await?;
                } else {
                    let text = result.text.as_deref().unwrap_or_default();
                    session
                        .append_log(id, &format!("Job failed temporarily: {}", text))
                        .await?;
                }
                session.set_result_code(id, ResultCode::TemporaryFailure).await?;
                session.decrement_remaining_retries(id).await?;
                session.mark_finished(id).await?;
            }
        }

        Ok(Some(result))
    }

    /// Fan the given jobs out to at most `worker_count` concurrent workers
    /// and wait for all of them.
    ///
    /// Per-job skips are not errors; a store or transport fault in any
    /// worker fails the whole call, but only after every spawned worker has
    /// been joined.
    pub async fn process_all(&self, ids: Vec<Uuid>) -> Result<Vec<Option<JobResult>>> {
        let semaphore = Arc::new(Semaphore::new(self.config.worker_count));
        let mut set = JoinSet::new();

        for id in ids {
            let runner = self.clone();
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                // The semaphore is never closed while workers run.
                let _permit = semaphore.acquire().await;
                runner.process_one(id).await
            });
        }

        let mut outcomes = Vec::new();
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e.into());
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// One polling cycle: select, then process.
    pub async fn run_batch(&self) -> Result<Vec<Option<JobResult>>> {
        let ids = self.select_pending().await?;
        tracing::debug!("Selected {} eligible job(s)", ids.len());
        self.process_all(ids).await
    }
}
