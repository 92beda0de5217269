//! HTTP client for the OpenAI-compatible files, batches and chat endpoints

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;

use clinsynth_core::{Job, PipelineError};

use super::wire::{
    ApiError, BatchObject, CHAT_COMPLETIONS_ENDPOINT, ChatRequest, ChatResponse,
    CreateBatchRequest, FileObject,
};
use super::{BatchApi, ByteChunks, ChatApi};
use crate::config::Config;

/// Client for the batch and chat completion APIs
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    /// Create a new client with the given API key and base URL
    pub fn new(api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let key = config.require_api_key()?;
        Ok(Self::new(key.to_string(), config.base_url.clone()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and return the successful response, mapping error
    /// bodies into a transport error.
    async fn send(
        &self,
        what: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PipelineError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::Transport(format!("{what}: HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if let Ok(api_err) = serde_json::from_str::<ApiError>(&body) {
                return Err(PipelineError::Transport(format!(
                    "{what}: API error ({status}): {}",
                    api_err.error.message
                )));
            }
            return Err(PipelineError::Transport(format!(
                "{what}: API error ({status}): {body}"
            )));
        }

        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        what: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PipelineError> {
        self.send(what, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| PipelineError::Transport(format!("{what}: failed to parse response: {e}")))
    }
}

#[async_trait]
impl BatchApi for OpenAiClient {
    async fn upload_batch_file(
        &self,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<String, PipelineError> {
        let part = Part::bytes(contents)
            .file_name(file_name.to_string())
            .mime_str("application/jsonl")
            .map_err(|e| PipelineError::Transport(format!("upload: {e}")))?;
        let form = Form::new().text("purpose", "batch").part("file", part);

        let file: FileObject = self
            .send_json("upload", self.http.post(self.url("/files")).multipart(form))
            .await?;
        Ok(file.id)
    }

    async fn create_batch(
        &self,
        input_file_id: &str,
        completion_window: &str,
    ) -> Result<Job, PipelineError> {
        let body = CreateBatchRequest {
            input_file_id,
            endpoint: CHAT_COMPLETIONS_ENDPOINT,
            completion_window,
        };
        let batch: BatchObject = self
            .send_json("create batch", self.http.post(self.url("/batches")).json(&body))
            .await?;
        batch.into_job()
    }

    async fn retrieve_batch(&self, job_id: &str) -> Result<Job, PipelineError> {
        let batch: BatchObject = self
            .send_json(
                "retrieve batch",
                self.http.get(self.url(&format!("/batches/{job_id}"))),
            )
            .await?;
        if let Some(counts) = batch.request_counts {
            tracing::debug!(
                job_id,
                total = counts.total,
                completed = counts.completed,
                failed = counts.failed,
                "Batch request counts"
            );
        }
        batch.into_job()
    }

    async fn download_file(&self, file_id: &str) -> Result<ByteChunks, PipelineError> {
        let response = self
            .send(
                "download",
                self.http.get(self.url(&format!("/files/{file_id}/content"))),
            )
            .await?;

        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| PipelineError::Transport(format!("download interrupted: {e}")))
            })
            .boxed();
        Ok(chunks)
    }
}

#[async_trait]
impl ChatApi for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, PipelineError> {
        let response: ChatResponse = self
            .send_json(
                "chat completion",
                self.http.post(self.url("/chat/completions")).json(request),
            )
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PipelineError::Transport("chat completion: no text content in response".to_string())
            })
    }
}
