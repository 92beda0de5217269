//! Pipeline stages, each a thin layer that builds work items and hands them
//! to the batch runner

pub mod augment;
pub mod complaints;
pub mod demographics;
pub mod rebuild;
pub mod soap;
pub mod transcripts;

use serde_json::{Map, Value as JsonValue};

use clinsynth_core::{CorrelationId, PipelineError, ResponseParser};

use crate::config::Config;
use crate::llm::{ChatApi, ChatRequest};
use crate::retry::retry_when;

/// One realtime call whose answer must parse under `parser`.
///
/// Transport and extraction failures are both retried under the configured
/// policy; the model often gets the format right on a second try.
pub(crate) async fn ask_structured(
    chat: &dyn ChatApi,
    config: &Config,
    correlation_id: &CorrelationId,
    request: &ChatRequest,
    parser: &ResponseParser,
) -> Result<Map<String, JsonValue>, PipelineError> {
    retry_when(
        &config.retry,
        correlation_id.as_str(),
        |err| err.is_transient() || matches!(err, PipelineError::Extraction { .. }),
        || async move {
            let text = chat.complete(request).await?;
            parser
                .extract_text(&text)
                .map(|(fields, _)| fields)
                .map_err(|reason| PipelineError::Extraction {
                    correlation_id: correlation_id.clone(),
                    reason,
                })
        },
    )
    .await
}

/// A string field of a stored record, or a validation error naming it.
pub(crate) fn text_field<'a>(
    fields: &'a Map<String, JsonValue>,
    key: &str,
    id: &CorrelationId,
) -> Result<&'a str, PipelineError> {
    fields
        .get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| PipelineError::Validation(format!("record {id} has no text field '{key}'")))
}
