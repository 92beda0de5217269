//! Request and response bodies of the OpenAI-compatible API

use serde::{Deserialize, Serialize};

use clinsynth_core::{CorrelationId, Job, JobStatus, PipelineError, WorkItem};

use crate::config::Sampling;

/// Endpoint every batch request line targets
pub const CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of a chat completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// A single system-message request, the shape every stage sends.
    pub fn system(sampling: &Sampling, prompt: &str) -> Self {
        Self {
            model: sampling.model.clone(),
            temperature: sampling.temperature,
            presence_penalty: None,
            messages: vec![ChatMessage {
                role: "system".to_string(),
                content: prompt.to_string(),
            }],
        }
    }

    pub fn with_presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    /// Text of the first message.
    pub fn prompt(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// One line of a batch request file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequestLine {
    pub custom_id: CorrelationId,
    pub method: String,
    pub url: String,
    pub body: ChatRequest,
}

impl BatchRequestLine {
    pub fn for_item(item: &WorkItem, sampling: &Sampling) -> Self {
        Self {
            custom_id: item.correlation_id.clone(),
            method: "POST".to_string(),
            url: CHAT_COMPLETIONS_ENDPOINT.to_string(),
            body: ChatRequest::system(sampling, &item.payload),
        }
    }
}

/// Uploaded file object
#[derive(Debug, Deserialize)]
pub struct FileObject {
    pub id: String,
}

/// Request body for batch creation
#[derive(Debug, Serialize)]
pub struct CreateBatchRequest<'a> {
    pub input_file_id: &'a str,
    pub endpoint: &'a str,
    pub completion_window: &'a str,
}

/// Batch object as returned by create / retrieve
#[derive(Debug, Deserialize)]
pub struct BatchObject {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub request_counts: Option<RequestCounts>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RequestCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

impl BatchObject {
    pub fn into_job(self) -> Result<Job, PipelineError> {
        let status = JobStatus::from_remote(&self.status).ok_or_else(|| {
            PipelineError::Transport(format!(
                "batch {} reported unknown status '{}'",
                self.id, self.status
            ))
        })?;
        Job::from_remote(self.id, status, self.output_file_id)
    }
}

/// Response from the chat completions endpoint
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Error detail from the API
#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    #[test]
    fn request_line_matches_batch_format() {
        let item = WorkItem::new("row0001", "Write a transcript.", Map::new());
        let sampling = Sampling {
            model: "gpt-4o".into(),
            temperature: 0.75,
        };
        let value = serde_json::to_value(BatchRequestLine::for_item(&item, &sampling)).unwrap();

        assert_eq!(
            value,
            json!({
                "custom_id": "row0001",
                "method": "POST",
                "url": "/v1/chat/completions",
                "body": {
                    "model": "gpt-4o",
                    "temperature": 0.75,
                    "messages": [{"role": "system", "content": "Write a transcript."}]
                }
            })
        );
    }

    #[test]
    fn presence_penalty_is_sent_only_when_set() {
        let sampling = Sampling {
            model: "gpt-4o".into(),
            temperature: 0.9,
        };
        let plain = serde_json::to_value(ChatRequest::system(&sampling, "hi")).unwrap();
        assert!(plain.get("presence_penalty").is_none());

        let request = ChatRequest::system(&sampling, "hi").with_presence_penalty(1.0);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["presence_penalty"], 1.0);
    }

    #[test]
    fn batch_object_maps_to_job() {
        let batch: BatchObject = serde_json::from_value(json!({
            "id": "batch_1",
            "object": "batch",
            "status": "completed",
            "output_file_id": "file-9",
            "request_counts": {"total": 3, "completed": 2, "failed": 1}
        }))
        .unwrap();
        let job = batch.into_job().unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.output_handle(), Some("file-9"));
    }

    #[test]
    fn unknown_remote_status_is_transport_error() {
        let batch: BatchObject =
            serde_json::from_value(json!({"id": "b", "status": "melting"})).unwrap();
        assert!(matches!(batch.into_job(), Err(PipelineError::Transport(_))));
    }
}
