//! Chief-complaint list, fetched with one realtime call

use std::path::PathBuf;

use clinsynth_core::{CorrelationId, Expectation, PipelineError, ResponseParser};
use serde_json::Value as JsonValue;

use super::ask_structured;
use crate::artifacts::{read_json, write_json_pretty};
use crate::config::Config;
use crate::llm::{ChatApi, ChatRequest};
use crate::prompts;

pub const STAGE: &str = "complaints";
pub const COMPLAINTS_FILE: &str = "complaints.json";
const TEMPERATURE: f32 = 0.7;
const LIST_FIELD: &str = "complaints";

/// Ask for `count` common chief complaints and store them as
/// `complaints.json`. Returns the path and the list.
pub async fn run(
    chat: &dyn ChatApi,
    config: &Config,
    count: usize,
) -> Result<(PathBuf, Vec<String>), PipelineError> {
    if count == 0 {
        return Err(PipelineError::Validation(
            "complaint count must be at least 1".to_string(),
        ));
    }

    let id = CorrelationId::new(STAGE);
    let request = ChatRequest::system(&config.sampling(TEMPERATURE), &prompts::complaints(count));
    let parser = ResponseParser::new(Expectation::list(LIST_FIELD));

    let fields = ask_structured(chat, config, &id, &request, &parser).await?;
    let complaints = phrases(fields.get(LIST_FIELD)).map_err(|reason| PipelineError::Extraction {
        correlation_id: id.clone(),
        reason,
    })?;

    let path = config.stage_dir(STAGE).join(COMPLAINTS_FILE);
    write_json_pretty(&path, &complaints)?;
    tracing::info!(
        requested = count,
        received = complaints.len(),
        path = %path.display(),
        "Wrote chief complaints"
    );
    Ok((path, complaints))
}

/// Load the list written by [`run`].
pub fn load(config: &Config) -> Result<Vec<String>, PipelineError> {
    let path = config.stage_dir(STAGE).join(COMPLAINTS_FILE);
    if !path.exists() {
        return Err(PipelineError::Validation(format!(
            "{} not found; run the complaints stage first",
            path.display()
        )));
    }
    let complaints: Vec<String> = read_json(&path)?;
    if complaints.is_empty() {
        return Err(PipelineError::Validation(format!(
            "{} holds no complaints",
            path.display()
        )));
    }
    Ok(complaints)
}

fn phrases(value: Option<&JsonValue>) -> Result<Vec<String>, String> {
    let Some(JsonValue::Array(entries)) = value else {
        return Err("expected a JSON array".to_string());
    };
    if entries.is_empty() {
        return Err("complaint list is empty".to_string());
    }
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| match entry.as_str().map(str::trim) {
            Some(phrase) if !phrase.is_empty() => Ok(phrase.to_string()),
            _ => Err(format!("entry {i} is not a non-empty string")),
        })
        .collect()
}
