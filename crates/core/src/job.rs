//! Batch job handle and status as reported by the remote facility

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;

/// Status of a batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl JobStatus {
    /// Map a remote batch status string onto the local status set.
    pub fn from_remote(status: &str) -> Option<Self> {
        match status {
            "validating" => Some(JobStatus::Pending),
            "in_progress" | "finalizing" | "cancelling" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "expired" => Some(JobStatus::Expired),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of a remote batch job.
///
/// `output_handle` is present if and only if the status is `Completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    job_id: String,
    status: JobStatus,
    output_handle: Option<String>,
}

impl Job {
    /// Build a job snapshot from what the remote side reported.
    ///
    /// An output handle reported for a non-completed job is dropped; a
    /// completed job without one is a protocol violation.
    pub fn from_remote(
        job_id: impl Into<String>,
        status: JobStatus,
        output_handle: Option<String>,
    ) -> Result<Self, PipelineError> {
        let job_id = job_id.into();
        let output_handle = match (status, output_handle) {
            (JobStatus::Completed, Some(handle)) => Some(handle),
            (JobStatus::Completed, None) => {
                return Err(PipelineError::Transport(format!(
                    "batch {job_id} completed without an output file"
                )));
            }
            (_, _) => None,
        };
        Ok(Self {
            job_id,
            status,
            output_handle,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn output_handle(&self) -> Option<&str> {
        self.output_handle.as_deref()
    }
}
