use crate::correlation::CorrelationId;
use crate::job::JobStatus;
use thiserror::Error;

/// Pipeline error types
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Batch job {job_id} ended with status {status}")]
    JobFailed { job_id: String, status: JobStatus },

    #[error("Malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("Could not extract payload for {correlation_id}: {reason}")]
    Extraction {
        correlation_id: CorrelationId,
        reason: String,
    },

    #[error("{missing} of {requested} correlation ids have no merged record")]
    MissingCorrelation {
        missing: usize,
        requested: usize,
        sample: Vec<CorrelationId>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether an outer retry wrapper may try the failed call again.
    ///
    /// Only transport failures qualify; a failed job is the remote side's
    /// final word and is never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Transport(_))
    }

    /// Process exit code used by the CLI for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Validation(_) | PipelineError::Config(_) => 2,
            PipelineError::JobFailed { .. } => 3,
            PipelineError::MissingCorrelation { .. } => 4,
            _ => 1,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
