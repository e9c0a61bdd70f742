//! Retry policy: decides whether a job may run and how a completed
//! attempt is classified.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Job, JobResult, ResultCode};

/// True iff the job may be attempted right now, independent of backoff
/// timing: never finished or only failed temporarily, with retries left.
///
/// A job with `Success` or `PermanentFailure` is never workable again, and
/// neither is one whose retries are exhausted.
pub fn is_workable(job: &Job) -> bool {
    matches!(
        job.result_code,
        None | Some(ResultCode::TemporaryFailure)
    ) && job.remaining_retries > 0
}

/// Selection predicate: workable AND past the backoff delay since the last
/// finished attempt. Used by the stores to build the candidate batch.
pub fn is_eligible(job: &Job, now: DateTime<Utc>) -> bool {
    if !is_workable(job) {
        return false;
    }
    match job.last_finished_at {
        None => true,
        Some(finished) => now >= finished + Duration::seconds(i64::from(job.retry_delay_secs)),
    }
}

/// Classify a completed attempt.
///
/// 200 is the only success. A timeout or a 503 is a temporary failure;
/// any other definite status is permanent. Retries are decremented on both
/// failure kinds; exhausting them never changes the classification, it
/// only stops future attempts.
pub fn classify(result: &JobResult) -> ResultCode {
    if result.status_code == Some(200) {
        ResultCode::Success
    } else if !result.is_timeout && result.status_code != Some(503) {
        ResultCode::PermanentFailure
    } else {
        ResultCode::TemporaryFailure
    }
}
