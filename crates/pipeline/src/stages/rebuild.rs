//! Offline re-merge of stored transcript requests with a SOAP batch output
//!
//! No API calls: patient facts are read back out of the transcript prompts
//! and joined with the SOAP notes by correlation id.

use std::path::PathBuf;

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use clinsynth_core::{
    Expectation, FactSchema, PipelineError, ResponseParser, StageReport, WorkItem, merge,
};

use super::{soap, transcripts};
use crate::artifacts::read_jsonl;
use crate::batch::runner::{OUTPUT_FILE, REQUESTS_FILE};
use crate::batch::{Assembled, RawLines, StageRun};
use crate::config::Config;
use crate::llm::BatchRequestLine;
use crate::prompts::SOAP_SECTIONS;

pub const STAGE: &str = "rebuild";
pub const DATASET: &str = "synthetic_patients_with_soap.jsonl";

#[derive(Debug, Clone)]
pub struct RebuildOptions {
    /// Transcript batch requests, the source of the patient facts.
    pub requests: PathBuf,
    /// SOAP batch output.
    pub output: PathBuf,
}

impl RebuildOptions {
    /// The artifacts left by the transcripts and soap stages.
    pub fn from_work_dir(config: &Config) -> Self {
        Self {
            requests: config.stage_dir(transcripts::STAGE).join(REQUESTS_FILE),
            output: config.stage_dir(soap::STAGE).join(OUTPUT_FILE),
        }
    }
}

pub fn run(config: &Config, options: &RebuildOptions) -> Result<StageReport, PipelineError> {
    let started_at = Utc::now();
    let schema = FactSchema::patient_facts()?;

    let requests: Vec<BatchRequestLine> = read_jsonl(&options.requests)?;
    let requested = requests.len();
    let mut items = Vec::with_capacity(requested);
    let mut unrecoverable = Vec::new();

    for request in requests {
        match schema.extract(request.body.prompt()) {
            Ok(mut facts) => {
                facts.insert(
                    "row_id".to_string(),
                    JsonValue::String(request.custom_id.to_string()),
                );
                items.push(WorkItem::new(request.custom_id, String::new(), facts));
            }
            Err(missing) => {
                let fields: Vec<&str> = missing.iter().map(|m| m.field.as_str()).collect();
                tracing::warn!(
                    correlation_id = %request.custom_id,
                    missing = ?fields,
                    "Could not recover patient facts"
                );
                unrecoverable.push(request.custom_id);
            }
        }
    }
    tracing::info!(
        requests = requested,
        recovered = items.len(),
        unrecoverable = unrecoverable.len(),
        "Recovered patient facts"
    );

    let parser = ResponseParser::new(Expectation::object(&SOAP_SECTIONS));
    let mut lines = RawLines::open(&options.output)?;
    let mut parsed = parser.parse_lines(&mut lines);
    lines.finish()?;

    let mut outcome = merge(&items, std::mem::take(&mut parsed.payloads));
    let rows = std::mem::take(&mut outcome.records);
    let mut missing_ids = unrecoverable;
    missing_ids.extend(outcome.missing_ids.iter().cloned());

    let run = StageRun {
        stage: STAGE.to_string(),
        dir: config.stage_dir(STAGE),
        run_id: Uuid::new_v4(),
        job_id: None,
        started_at,
        items,
        parsed,
        outcome,
    };
    run.finish(
        config,
        DATASET,
        Assembled {
            rows,
            requested,
            missing_ids,
        },
    )
}
