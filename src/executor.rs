//! Single HTTP delivery attempt for a job.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Method;

use crate::models::{Job, JobResult, RETRY_DELAY_HEADER};
use crate::store::StoreSession;

/// Perform one delivery attempt: stamp the job as started, log the call,
/// and issue the request with the job's per-attempt timeout.
///
/// A timed-out request is a normal outcome (`JobResult::timed_out()`), not
/// an error. Any other transport failure (connection refused, DNS) bubbles
/// up as an error so the caller can abort the batch rather than misclassify
/// an unreachable endpoint.
pub async fn execute(
    session: &dyn StoreSession,
    client: &reqwest::Client,
    job: &Job,
) -> Result<JobResult> {
    session.mark_started(job.id).await?;
    session
        .append_log(
            job.id,
            &format!(
                "Calling job with method {} on url {} (timeout {})",
                job.http_method, job.url, job.timeout_secs
            ),
        )
        .await?;

    let method = Method::from_bytes(job.http_method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", job.http_method))?;

    let mut request = client
        .request(method, &job.url)
        .timeout(Duration::from_secs(job.timeout_secs));
    if let Some(body) = &job.body {
        request = request.body(body.clone());
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => return Ok(JobResult::timed_out()),
        Err(e) => return Err(e).context("Request failed"),
    };

    let status_code = response.status().as_u16();
    let retry_delay_override = response
        .headers()
        .get(RETRY_DELAY_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u32>().ok());
    // Reading the body can also hit the attempt timeout.
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) if e.is_timeout() => return Ok(JobResult::timed_out()),
        Err(e) => return Err(e).context("Failed to read response body"),
    };

    Ok(JobResult {
        is_timeout: false,
        status_code: Some(status_code),
        text: Some(text),
        retry_delay_override,
    })
}
