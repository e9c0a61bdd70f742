use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs4::fs_std::FileExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::errors::CourierError;
use crate::models::job::validate_new_job;
use crate::models::{Job, JobLogEntry, NewJob, ResultCode};
use crate::policy;
use crate::store::{JobStore, StoreSession};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

struct Inner {
    jobs_path: PathBuf,
    log_path: PathBuf,
    locks_dir: PathBuf,
    cache: RwLock<Vec<Job>>,
    clock: Arc<dyn Clock>,
}

/// File-backed job store used by the `courier` binary.
///
/// Jobs live in `jobs.json`, the audit trail in `queue_log.jsonl`, and
/// per-job locks are advisory OS locks on `locks/{id}.lock` files.
///
/// Concurrency contract: exactly one process writes to a data directory
/// at a time. Job state is served from an in-process cache and persisted
/// with whole-file writes, so a second writer process would clobber this
/// one's updates. The lock files only serialize workers within that one
/// process (and guard against an accidental overlapping run, where the
/// late worker skips rather than double-executes).
#[derive(Clone)]
pub struct JsonJobStore {
    inner: Arc<Inner>,
}

impl JsonJobStore {
    /// Open (or initialize) a store in `data_dir`. The caller must be the
    /// directory's only writer for the store's lifetime.
    ///
    /// If `jobs.json` is corrupted, a backup is written to `jobs.json.bak`,
    /// a warning is logged, and the store starts with an empty job list.
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        Self::with_clock(data_dir, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(data_dir: PathBuf, clock: Arc<dyn Clock>) -> Result<Self> {
        let locks_dir = data_dir.join("locks");
        tokio::fs::create_dir_all(&locks_dir)
            .await
            .context("Failed to create data directory")?;

        let jobs_path = data_dir.join("jobs.json");
        let jobs = if jobs_path.exists() {
            let content = tokio::fs::read_to_string(&jobs_path)
                .await
                .context("Failed to read jobs.json")?;
            match serde_json::from_str::<Vec<Job>>(&content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(
                        "jobs.json is corrupted ({}), creating backup and starting empty",
                        e
                    );
                    let backup_path = data_dir.join("jobs.json.bak");
                    if let Err(backup_err) = tokio::fs::copy(&jobs_path, &backup_path).await {
                        tracing::error!(
                            "Failed to create backup of corrupted jobs.json: {}",
                            backup_err
                        );
                    }
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(Self {
            inner: Arc::new(Inner {
                jobs_path,
                log_path: data_dir.join("queue_log.jsonl"),
                locks_dir,
                cache: RwLock::new(jobs),
                clock,
            }),
        })
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
        let mut cache = self.inner.cache.write().await;
        cache.push(job.clone());
        self.inner.persist(&cache).await?;
        Ok(job)
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.inner.cache.read().await.clone()
    }

    pub async fn get_job(&self, id: Uuid) -> Option<Job> {
        self.inner.cache.read().await.iter().find(|j| j.id == id).cloned()
    }

    /// Audit log messages for one job, in insertion order.
    pub async fn log_messages(&self, id: Uuid) -> Result<Vec<String>> {
        if !self.inner.log_path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.inner.log_path)
            .await
            .context("Failed to read queue_log.jsonl")?;
        let mut messages = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let entry: JobLogEntry =
                serde_json::from_str(line).context("Corrupt line in queue_log.jsonl")?;
            if entry.job_id == id {
                messages.push(entry.message);
            }
        }
        Ok(messages)
    }
}

impl Inner {
    /// Atomically write the jobs cache to disk: a .tmp file first, then a
    /// rename over the real one.
    async fn persist(&self, jobs: &[Job]) -> Result<()> {
        let tmp_path = self.jobs_path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(jobs).context("Failed to serialize jobs")?;

        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .context("Failed to write temporary jobs file")?;

        tokio::fs::rename(&tmp_path, &self.jobs_path)
            .await
            .context("Failed to rename temporary jobs file")?;

        Ok(())
    }
}

#[async_trait]
impl JobStore for JsonJobStore {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(JsonSession {
            inner: Arc::clone(&self.inner),
            held: std::sync::Mutex::new(HashMap::new()),
        }))
    }
}

struct JsonSession {
    inner: Arc<Inner>,
    // std Mutex so Drop can release the lock files.
    held: std::sync::Mutex<HashMap<Uuid, std::fs::File>>,
}

impl JsonSession {
    async fn update_job<F>(&self, id: Uuid, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Job),
    {
        let mut cache = self.inner.cache.write().await;
        let job = cache
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| CourierError::NotFound(format!("Job with id '{}' not found", id)))?;
        mutate(job);
        self.inner.persist(&cache).await
    }
}

#[async_trait]
impl StoreSession for JsonSession {
    async fn find_eligible_job_ids(&self) -> Result<Vec<Uuid>> {
        let now = self.inner.clock.now();
        Ok(self
            .inner
            .cache
            .read()
            .await
            .iter()
            .filter(|j| policy::is_eligible(j, now))
            .map(|j| j.id)
            .collect())
    }

    async fn load_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.inner.cache.read().await.iter().find(|j| j.id == id).cloned())
    }

    async fn acquire_lock(&self, id: Uuid, timeout: Duration) -> Result<bool> {
        if self.held.lock().unwrap().contains_key(&id) {
            return Ok(true);
        }

        let lock_path = self.inner.locks_dir.join(format!("{}.lock", id));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context("Failed to open lock file")?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if file.try_lock_exclusive().context("Lock attempt failed")? {
                self.held.lock().unwrap().insert(id, file);
                return Ok(true);
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
        let entry = JobLogEntry {
            job_id: id,
            message: message.to_string(),
            created_at: self.inner.clock.now(),
        };
        let mut line = serde_json::to_string(&entry).context("Failed to serialize log entry")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.log_path)
            .await
            .context("Failed to open queue_log.jsonl")?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to append log entry")?;
        Ok(())
    }
}

impl Drop for JsonSession {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap();
        for (_, file) in held.drain() {
            // Closing the handle releases the OS lock; the explicit unlock
            // just makes it immediate.
            let _ = FileExt::unlock(&file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_new_job() -> NewJob {
        NewJob {
            http_method: "GET".to_string(),
            url: "http://127.0.0.1:9000/test".to_string(),
            body: None,
            timeout_secs: 10,
            remaining_retries: 10,
            retry_delay_secs: 0,
        }
    }

    async fn setup_store() -> (JsonJobStore, TempDir) {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let store = JsonJobStore::new(tmp_dir.path().to_path_buf())
            .await
            .expect("create store");
        (store, tmp_dir)
    }

    #[tokio::test]
    async fn test_create_job_persists_valid_json() {
        let (store, tmp) = setup_store().await;
        store.create_job(make_new_job()).await.expect("create");

        let content = tokio::fs::read_to_string(tmp.path().join("jobs.json"))
            .await
            .expect("read file");
        let jobs: Vec<Job> = serde_json::from_str(&content).expect("parse JSON");
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].result_code.is_none());
    }

    #[tokio::test]
    async fn test_no_tmp_file_left_after_write() {
        let (store, tmp) = setup_store().await;
        store.create_job(make_new_job()).await.expect("create");

        let tmp_file = tmp.path().join("jobs.json.tmp");
        assert!(
            !tmp_file.exists(),
            "Temporary file should not remain after write"
        );
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let tmp_dir = TempDir::new().expect("create temp dir");

        let job_id = {
            let store = JsonJobStore::new(tmp_dir.path().to_path_buf())
                .await
                .expect("create store");
            store.create_job(make_new_job()).await.expect("create").id
        };

        let store = JsonJobStore::new(tmp_dir.path().to_path_buf())
            .await
            .expect("create store");
        let job = store.get_job(job_id).await.expect("found");
        assert_eq!(job.id, job_id);
    }

    #[tokio::test]
    async fn test_state_mutations_survive_reload() {
        let tmp_dir = TempDir::new().expect("create temp dir");

        let job_id = {
            let store = JsonJobStore::new(tmp_dir.path().to_path_buf())
                .await
                .expect("create store");
            let job = store.create_job(make_new_job()).await.expect("create");
            let session = store.open_session().await.expect("session");
            session
                .set_result_code(job.id, ResultCode::TemporaryFailure)
                .await
                .expect("set code");
            session.decrement_remaining_retries(job.id).await.expect("dec");
            session.set_retry_delay(job.id, 786).await.expect("set delay");
            job.id
        };

        let store = JsonJobStore::new(tmp_dir.path().to_path_buf())
            .await
            .expect("create store");
        let job = store.get_job(job_id).await.expect("found");
        assert_eq!(job.result_code, Some(ResultCode::TemporaryFailure));
        assert_eq!(job.remaining_retries, 9);
        assert_eq!(job.retry_delay_secs, 786);
    }

    #[tokio::test]
    async fn test_corrupted_jobs_json_recovers_empty_with_backup() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let jobs_file = tmp_dir.path().join("jobs.json");
        let corrupted_content = b"this is not valid JSON{{{";
        tokio::fs::write(&jobs_file, corrupted_content)
            .await
            .expect("write corrupted file");

        let store = JsonJobStore::new(tmp_dir.path().to_path_buf())
            .await
            .expect("create store from corrupted file");
        assert!(store.list_jobs().await.is_empty());

        let backup = tokio::fs::read(tmp_dir.path().join("jobs.json.bak"))
            .await
            .expect("backup should exist");
        assert_eq!(backup, corrupted_content);
    }

    #[tokio::test]
    async fn test_append_log_and_read_back() {
        let (store, _tmp) = setup_store().await;
        let job = store.create_job(make_new_job()).await.expect("create");

        let session = store.open_session().await.expect("session");
        session.append_log(job.id, "first").await.expect("log");
        session.append_log(job.id, "second").await.expect("log");
        session.append_log(Uuid::now_v7(), "other job").await.expect("log");

        let messages = store.log_messages(job.id).await.expect("read log");
        assert_eq!(messages, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_lock_contention_across_sessions() {
        let (store, _tmp) = setup_store().await;
        let job = store.create_job(make_new_job()).await.expect("create");

        let first = store.open_session().await.expect("session");
        assert!(first
            .acquire_lock(job.id, Duration::from_millis(100))
            .await
            .expect("acquire"));

        let second = store.open_session().await.expect("session");
        assert!(
            !second
                .acquire_lock(job.id, Duration::from_millis(100))
                .await
                .expect("acquire"),
            "Lock file held by another session must not be acquirable"
        );
    }

    #[tokio::test]
    async fn test_lock_released_when_session_dropped() {
        let (store, _tmp) = setup_store().await;
        let job = store.create_job(make_new_job()).await.expect("create");

        {
            let session = store.open_session().await.expect("session");
            assert!(session
                .acquire_lock(job.id, Duration::from_millis(100))
                .await
                .expect("acquire"));
        }

        let session = store.open_session().await.expect("session");
        assert!(
            session
                .acquire_lock(job.id, Duration::from_millis(100))
                .await
                .expect("acquire"),
            "Dropping a session must release its lock files"
        );
    }

    #[tokio::test]
    async fn test_independent_jobs_lock_independently() {
        let (store, _tmp) = setup_store().await;
        let job_a = store.create_job(make_new_job()).await.expect("create");
        let job_b = store.create_job(make_new_job()).await.expect("create");

        let first = store.open_session().await.expect("session");
        assert!(first
            .acquire_lock(job_a.id, Duration::from_millis(100))
            .await
            .expect("acquire"));

        let second = store.open_session().await.expect("session");
        assert!(second
            .acquire_lock(job_b.id, Duration::from_millis(100))
            .await
            .expect("acquire"));
    }
}
