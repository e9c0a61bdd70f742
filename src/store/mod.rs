pub mod json;
pub mod memory;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Job, ResultCode};

pub use json::JsonJobStore;
pub use memory::MemoryJobStore;

/// Durable job store. Each worker opens its own session; the store itself
/// is the only resource shared between workers.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>>;
}

/// One worker's handle on the store.
///
/// Dropping the session releases every per-job lock it acquired. Callers
/// never unlock explicitly; the lock's lifetime is the session's scope, on
/// every exit path.
#[async_trait]
pub trait StoreSession: Send + Sync {
    /// Ids of all jobs passing the selection predicate: workable and past
    /// their backoff delay.
    async fn find_eligible_job_ids(&self) -> Result<Vec<Uuid>>;

    async fn load_job(&self, id: Uuid) -> Result<Option<Job>>;

    /// Try to take the per-job mutual-exclusion lock, waiting up to
    /// `timeout`. Returns false when the job is owned elsewhere; that is
    /// a skip, not an error.
    async fn acquire_lock(&self, id: Uuid, timeout: Duration) -> Result<bool>;

    async fn mark_started(&self, id: Uuid) -> Result<()>;

    async fn mark_finished(&self, id: Uuid) -> Result<()>;

    async fn set_result_code(&self, id: Uuid, code: ResultCode) -> Result<()>;

    async fn decrement_remaining_retries(&self, id: Uuid) -> Result<()>;

    async fn set_retry_delay(&self, id: Uuid, seconds: u32) -> Result<()>;

    /// Append one line to the job's audit log, the sole human-facing
    /// record of every transition and skip.
    async fn append_log(&self, id: Uuid, message: &str) -> Result<()>;
}
