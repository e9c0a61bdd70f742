use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::errors::CourierError;
use crate::models::job::validate_new_job;
use crate::models::{Job, JobLogEntry, NewJob, ResultCode};
use crate::policy;
use crate::store::{JobStore, StoreSession};

/// How often a waiting session re-checks a contended lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

struct Inner {
    jobs: RwLock<Vec<Job>>,
    log: RwLock<Vec<JobLogEntry>>,
    // std Mutex so sessions can release their locks from Drop.
    locks: std::sync::Mutex<HashSet<Uuid>>,
    clock: Arc<dyn Clock>,
}

/// In-memory job store. Backs the unit and integration tests, where the
/// injected clock makes backoff timing deterministic.
#[derive(Clone)]
pub struct MemoryJobStore {
    inner: Arc<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(Vec::new()),
                log: RwLock::new(Vec::new()),
                locks: std::sync::Mutex::new(HashSet::new()),
                clock,
            }),
        }
    }

    /// Producer-side insertion. The runner itself never creates jobs.
    pub async fn create_job(&self, new: NewJob) -> Result<Job> {
        validate_new_job(&new).map_err(CourierError::from)?;
        let job = Job {
            id: Uuid::now_v7(),
            http_method: new.http_method,
            url: new.url,
            body: new.body,
            timeout_secs: new.timeout_secs,
            last_started_at: None,
            last_finished_at: None,
            result_code: None,
            remaining_retries: new.remaining_retries,
            retry_delay_secs: new.retry_delay_secs,
            created_at: self.inner.clock.now(),
        };
        self.inner.jobs.write().await.push(job.clone());
        Ok(job)
    }

    /// Snapshot of one job, for assertions and tooling.
    pub async fn get_job(&self, id: Uuid) -> Option<Job> {
        self.inner.jobs.read().await.iter().find(|j| j.id == id).cloned()
    }

    /// Audit log messages for one job, in insertion order.
    pub async fn log_messages(&self, id: Uuid) -> Vec<String> {
        self.inner
            .log
            .read()
            .await
            .iter()
            .filter(|e| e.job_id == id)
            .map(|e| e.message.clone())
            .collect()
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
            held: std::sync::Mutex::new(HashSet::new()),
        }))
    }
}

struct MemorySession {
    inner: Arc<Inner>,
    held: std::sync::Mutex<HashSet<Uuid>>,
}

impl MemorySession {
    async fn update_job<F>(&self, id: Uuid, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.inner.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| CourierError::NotFound(format!("Job with id '{}' not found", id)))?;
        mutate(job);
        Ok(())
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn find_eligible_job_ids(&self) -> Result<Vec<Uuid>> {
        let now = self.inner.clock.now();
        Ok(self
            .inner
            .jobs
            .read()
            .await
            .iter()
            .filter(|j| policy::is_eligible(j, now))
            .map(|j| j.id)
            .collect())
    }

    async fn load_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.inner.jobs.read().await.iter().find(|j| j.id == id).cloned())
    }

    async fn acquire_lock(&self, id: Uuid, timeout: Duration) -> Result<bool> {
        if self.held.lock().unwrap().contains(&id) {
            return Ok(true);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut locks = self.inner.locks.lock().unwrap();
                if locks.insert(id) {
                    self.held.lock().unwrap().insert(id);
                    return Ok(true);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn mark_started(&self, id: Uuid) -> Result<()> {
        let now = self.inner.clock.now();
        self.update_job(id, |job| job.last_started_at = Some(now)).await
    }

    async fn mark_finished(&self, id: Uuid) -> Result<()> {
        let now = self.inner.clock.now();
        self.update_job(id, |job| job.last_finished_at = Some(now)).await
    }

    async fn set_result_code(&self, id: Uuid, code: ResultCode) -> Result<()> {
        self.update_job(id, |job| job.result_code = Some(code)).await
    }

    async fn decrement_remaining_retries(&self, id: Uuid) -> Result<()> {
        self.update_job(id, |job| {
            job.remaining_retries = job.remaining_retries.saturating_sub(1)
        })
        .await
    }

    async fn set_retry_delay(&self, id: Uuid, seconds: u32) -> Result<()> {
        self.update_job(id, |job| job.retry_delay_secs = seconds).await
    }

    async fn append_log(&self, id: Uuid, message: &str) -> Result<()> {
        tracing::info!(job_id = %id, "{}", message);
        self.inner.log.write().await.push(JobLogEntry {
            job_id: id,
            message: message.to_string(),
            created_at: self.inner.clock.now(),
        });
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let held = self.held.lock().unwrap();
        let mut locks = self.inner.locks.lock().unwrap();
        for id in held.iter() {
            locks.remove(id);
        }
    }
}
