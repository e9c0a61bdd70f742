use serde::{Deserialize, Serialize};

/// Response header a remote peer can set to overwrite a job's retry delay.
pub const RETRY_DELAY_HEADER: &str = "x-bitlancer-retry-delay-secs";

/// Flat record of one HTTP attempt, produced by the executor.
///
/// The executor only detects timeouts; deciding success or failure from
/// these fields is the retry policy's job.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct JobResult {
    /// True when the attempt hit the per-job deadline. No status or text
    /// is available in that case.
    pub is_timeout: bool,
    pub status_code: Option<u16>,
    pub text: Option<String>,
    /// Parsed value of the retry-delay response header, when present.
    pub retry_delay_override: Option<u32>,
}

impl JobResult {
    /// Result for an attempt that hit its deadline.
    pub fn timed_out() -> Self {
        Self {
            is_timeout: true,
            ..Default::default()
        }
    }
}
