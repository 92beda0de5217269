//! Encounter transcripts, one batch request per patient row

use rand::SeedableRng;
use rand::rngs::StdRng;

use clinsynth_core::{
    Expectation, PipelineError, ResponseParser, StageReport, WorkItem, build_items,
};

use super::{ask_structured, complaints, demographics::PatientRow, demographics::random_rows};
use crate::batch::{BatchStage, persisted_items, run_batch};
use crate::builder::build_concurrent;
use crate::config::Config;
use crate::llm::{BatchApi, ChatApi, ChatRequest};
use crate::prompts;

pub const STAGE: &str = "transcripts";
pub const DATASET: &str = "synthetic_patients.jsonl";
const TEMPERATURE: f32 = 0.75;
const REFINE_TEMPERATURE: f32 = 0.9;
const REFINE_PRESENCE_PENALTY: f32 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct TranscriptOptions {
    pub rows: usize,
    /// Seed for the demographic draw; random when absent.
    pub seed: Option<u64>,
    /// Rewrite each row's complaint with a realtime call first.
    pub refine: bool,
}

pub async fn run(
    api: &dyn BatchApi,
    chat: &dyn ChatApi,
    config: &Config,
    options: TranscriptOptions,
) -> Result<StageReport, PipelineError> {
    let items = match persisted_items(config, STAGE)? {
        Some(items) => items,
        None => build(chat, config, options).await?,
    };

    let stage = BatchStage::new(
        STAGE,
        Expectation::object(&["transcription"]),
        config.sampling(TEMPERATURE),
    );
    let mut run = run_batch(api, config, &stage, items).await?;
    let assembled = run.take_merged();
    run.finish(config, DATASET, assembled)
}

async fn build(
    chat: &dyn ChatApi,
    config: &Config,
    options: TranscriptOptions,
) -> Result<Vec<WorkItem>, PipelineError> {
    if options.rows == 0 {
        return Err(PipelineError::Validation(
            "row count must be at least 1".to_string(),
        ));
    }

    let complaints = complaints::load(config)?;
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let rows = random_rows(options.rows, &complaints, &mut rng)?;
    tracing::info!(rows = rows.len(), seed = ?options.seed, "Built demographic rows");

    if !options.refine {
        return build_items(rows.len(), |i| item_for(&rows[i]));
    }

    let sampling = config.sampling(REFINE_TEMPERATURE);
    let parser = ResponseParser::new(Expectation::object(&["chief_complaint"]));
    let (rows, sampling, parser) = (&rows, &sampling, &parser);

    let items = build_concurrent(rows.len(), config.concurrency, |i| async move {
        let mut row = rows[i].clone();
        let request = ChatRequest::system(
            sampling,
            &prompts::refine_complaint(&row.gender, row.age, &row.chief_complaint),
        )
        .with_presence_penalty(REFINE_PRESENCE_PENALTY);
        let fields = ask_structured(chat, config, &row.correlation_id(), &request, parser).await?;
        if let Some(refined) = fields
            .get("chief_complaint")
            .and_then(|v| v.as_str())
            .map(single_line)
            .filter(|s| !s.is_empty())
        {
            row.chief_complaint = refined;
        }
        item_for(&row)
    })
    .await?;

    tracing::info!(rows = items.len(), "Refined chief complaints");
    Ok(items)
}

/// Collapse whitespace runs so the complaint stays on its facts line.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn item_for(row: &PatientRow) -> Result<WorkItem, PipelineError> {
    Ok(WorkItem::new(
        row.correlation_id(),
        prompts::transcript(row),
        row.fields()?,
    ))
}
