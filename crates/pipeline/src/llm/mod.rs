//! OpenAI-compatible batch and chat APIs

pub mod client;
pub mod mock;
pub mod wire;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use clinsynth_core::{Job, PipelineError};

pub use client::OpenAiClient;
pub use wire::{BatchRequestLine, ChatMessage, ChatRequest};

/// Downloaded file content, chunk by chunk.
pub type ByteChunks = BoxStream<'static, Result<Vec<u8>, PipelineError>>;

/// The asynchronous batch facility: upload, create, query, download.
///
/// Implementations report network and auth failures as
/// `PipelineError::Transport` and never retry internally.
#[async_trait]
pub trait BatchApi: Send + Sync {
    /// Upload a request file; returns its file id.
    async fn upload_batch_file(
        &self,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<String, PipelineError>;

    /// Create a batch job over an uploaded request file.
    async fn create_batch(
        &self,
        input_file_id: &str,
        completion_window: &str,
    ) -> Result<Job, PipelineError>;

    /// Fetch the current remote state of a batch job.
    async fn retrieve_batch(&self, job_id: &str) -> Result<Job, PipelineError>;

    /// Stream the content of a file (a completed job's output).
    async fn download_file(&self, file_id: &str) -> Result<ByteChunks, PipelineError>;
}

/// Realtime chat completion, used where a stage needs an answer before it
/// can build its batch.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send one request and return the first choice's text.
    async fn complete(&self, request: &ChatRequest) -> Result<String, PipelineError>;
}
