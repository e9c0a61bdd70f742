use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CourierError;

/// Terminal-or-retryable classification of a completed attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    PermanentFailure,
    TemporaryFailure,
}

/// One durable unit of deliverable HTTP work, with its own retry budget
/// and backoff delay.
///
/// Rows are created by an external producer and only ever transitioned by
/// the runner; `result_code` stays None until the first completed attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub http_method: String,
    pub url: String,
    pub body: Option<String>,
    /// Bound on a single HTTP attempt. Always positive.
    pub timeout_secs: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub result_code: Option<ResultCode>,
    /// Decremented only on failure; a job at zero is permanently inert.
    pub remaining_retries: u32,
    /// Minimum wait between a finished attempt and the next eligible one.
    /// The remote peer may overwrite this via a response header.
    pub retry_delay_secs: u32,
    pub created_at: DateTime<Utc>,
}

/// Producer-side request to enqueue a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub http_method: String,
    pub url: String,
    pub body: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_remaining_retries")]
    pub remaining_retries: u32,
    #[serde(default)]
    pub retry_delay_secs: u32,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_remaining_retries() -> u32 {
    10
}

/// Append-only audit trail entry. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobLogEntry {
    pub job_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

const KNOWN_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD"];

/// Validate a NewJob before insertion.
pub fn validate_new_job(new: &NewJob) -> Result<(), CourierError> {
    let method = new.http_method.to_uppercase();
    if !KNOWN_METHODS.contains(&method.as_str()) {
        return Err(CourierError::Validation(format!(
            "Unknown HTTP method '{}'",
            new.http_method
        )));
    }

    reqwest::Url::parse(&new.url)
        .map_err(|e| CourierError::Validation(format!("Invalid url '{}': {}", new.url, e)))?;

    if new.timeout_secs == 0 {
        return Err(CourierError::Validation(
            "timeout_secs must be positive".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_new_job() -> NewJob {
        NewJob {
            http_method: "get".to_string(),
            url: "http://127.0.0.1:9000/test".to_string(),
            body: None,
            timeout_secs: 10,
            remaining_retries: 10,
            retry_delay_secs: 0,
        }
    }

    fn make_job() -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::now_v7(),
            http_method: "POST".to_string(),
            url: "http://127.0.0.1:9000/hook".to_string(),
            body: Some("payload".to_string()),
            timeout_secs: 10,
            last_started_at: None,
            last_finished_at: None,
            result_code: None,
            remaining_retries: 10,
            retry_delay_secs: 0,
            created_at: now,
        }
    }

    #[test]
    fn test_job_serde_roundtrip() {
        let job = make_job();
        let json = serde_json::to_string(&job).expect("serialize");
        let deserialized: Job = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(job, deserialized);
    }

    #[test]
    fn test_result_code_serde_roundtrip() {
        for code in [
            ResultCode::Success,
            ResultCode::PermanentFailure,
            ResultCode::TemporaryFailure,
        ] {
            let json = serde_json::to_string(&code).expect("serialize");
            let back: ResultCode = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(code, back);
        }
    }

    #[test]
    fn test_new_job_defaults() {
        let json = r#"{"http_method":"GET","url":"http://example.com/"}"#;
        let new: NewJob = serde_json::from_str(json).expect("deserialize");
        assert_eq!(new.timeout_secs, 10);
        assert_eq!(new.remaining_retries, 10);
        assert_eq!(new.retry_delay_secs, 0);
        assert!(new.body.is_none());
    }

    #[test]
    fn test_validation_valid_job_succeeds() {
        assert!(validate_new_job(&make_new_job()).is_ok());
    }

    #[test]
    fn test_validation_method_case_insensitive() {
        let mut new = make_new_job();
        new.http_method = "PoSt".to_string();
        assert!(validate_new_job(&new).is_ok());
    }

    #[test]
    fn test_validation_unknown_method_rejected() {
        let mut new = make_new_job();
        new.http_method = "FETCH".to_string();
        let result = validate_new_job(&new);
        assert!(result.is_err());
        match result.unwrap_err() {
            CourierError::Validation(msg) => assert!(msg.contains("FETCH")),
            other => panic!("Expected Validation, got: {:?}", other),
        }
    }

    #[test]
    fn test_validation_bad_url_rejected() {
        let mut new = make_new_job();
        new.url = "not a url".to_string();
        assert!(validate_new_job(&new).is_err());
    }

    #[test]
    fn test_validation_zero_timeout_rejected() {
        let mut new = make_new_job();
        new.timeout_secs = 0;
        let result = validate_new_job(&new);
        assert!(result.is_err());
        match result.unwrap_err() {
            CourierError::Validation(msg) => assert!(msg.contains("timeout")),
            other => panic!("Expected Validation, got: {:?}", other),
        }
    }

    #[test]
    fn test_log_entry_serde_roundtrip() {
        let entry = JobLogEntry {
            job_id: Uuid::now_v7(),
            message: "Job succeeded: GET 200".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry).expect("serialize");
        let back: JobLogEntry = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(entry, back);
    }
}
