//! Job poller

use std::time::Duration;

use clinsynth_core::{Job, JobStatus, PipelineError};

use crate::llm::BatchApi;

/// Poll `job_id` every `interval` until it reaches a terminal status.
///
/// Returns the completed job (which always carries an output handle).
/// Failed, expired and cancelled jobs become `JobFailed`. A transport error
/// during polling ends the wait; the job keeps running remotely and can be
/// picked up again with a resumed run.
pub async fn await_completion(
    api: &dyn BatchApi,
    job_id: &str,
    interval: Duration,
) -> Result<Job, PipelineError> {
    let mut polls = 0u32;
    loop {
        let job = api.retrieve_batch(job_id).await?;
        polls += 1;
        tracing::info!(job_id, status = %job.status(), polls, "Polled batch job");

        match job.status() {
            JobStatus::Completed => return Ok(job),
            status if status.is_terminal() => {
                tracing::error!(job_id, status = %status, "Batch job did not complete");
                return Err(PipelineError::JobFailed {
                    job_id: job_id.to_string(),
                    status,
                });
            }
            _ => tokio::time::sleep(interval).await,
        }
    }
}
