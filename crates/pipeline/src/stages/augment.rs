//! Paraphrase augmentation: every SOAP section in every format variant

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use clinsynth_core::{
    CorrelationId, Expectation, MergedRecord, PipelineError, StageReport, WorkItem, fan_out,
};

use super::{soap, text_field};
use crate::artifacts::read_jsonl;
use crate::batch::{Assembled, BatchStage, run_batch};
use crate::config::Config;
use crate::llm::BatchApi;
use crate::prompts::{self, FORMAT_VARIANTS, SOAP_SECTIONS};

pub const STAGE: &str = "augment";
pub const DATASET: &str = "soap_augmented.jsonl";
pub const DEFAULT_PARAPHRASES: usize = 2;
const TEMPERATURE: f32 = 0.85;
const LIST_FIELD: &str = "paraphrases";

/// One paraphrase of one section in one format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentedLine {
    pub row_id: String,
    pub section: String,
    pub format: String,
    pub alt_idx: String,
    pub text: String,
}

pub async fn run(
    api: &dyn BatchApi,
    config: &Config,
    paraphrases: usize,
) -> Result<StageReport, PipelineError> {
    if paraphrases == 0 {
        return Err(PipelineError::Validation(
            "paraphrase count must be at least 1".to_string(),
        ));
    }

    let path = config.stage_dir(soap::STAGE).join(soap::DATASET);
    if !path.exists() {
        return Err(PipelineError::Validation(format!(
            "{} not found; run the soap stage first",
            path.display()
        )));
    }
    let notes: Vec<MergedRecord> = read_jsonl(&path)?;
    let items = build(&notes, paraphrases)?;
    tracing::info!(
        notes = notes.len(),
        requests = items.len(),
        paraphrases,
        "Built paraphrase requests"
    );

    let stage = BatchStage::new(
        STAGE,
        Expectation::list(LIST_FIELD),
        config.sampling(TEMPERATURE),
    );
    let mut run = run_batch(api, config, &stage, items).await?;
    let merged = run.take_merged();
    let rows = flatten(&merged.rows)?;
    let assembled = Assembled {
        rows,
        requested: merged.requested,
        missing_ids: merged.missing_ids,
    };
    run.finish(config, DATASET, assembled)
}

fn build(notes: &[MergedRecord], paraphrases: usize) -> Result<Vec<WorkItem>, PipelineError> {
    let formats: Vec<&str> = FORMAT_VARIANTS.iter().map(|(slug, _)| *slug).collect();
    let mut items = Vec::new();

    for note in notes {
        for id in fan_out(note.correlation_id.as_str(), &[&SOAP_SECTIONS[..], &formats[..]])? {
            let composite = id.decompose(2)?;
            let (section, format) = (&composite.discriminators[0], &composite.discriminators[1]);
            let text = text_field(&note.fields, section, &note.correlation_id)?;
            let style = FORMAT_VARIANTS
                .iter()
                .find(|(slug, _)| *slug == format.as_str())
                .map(|(_, style)| *style)
                .unwrap_or_default();
            items.push(WorkItem::new(
                id,
                prompts::paraphrase(paraphrases, section, text, style),
                Map::new(),
            ));
        }
    }
    Ok(items)
}

/// One output line per paraphrase; entries that are not non-empty strings
/// are skipped.
fn flatten(records: &[MergedRecord]) -> Result<Vec<AugmentedLine>, PipelineError> {
    let mut lines = Vec::new();
    for record in records {
        let composite = record.correlation_id.decompose(2)?;
        let Some(JsonValue::Array(alternatives)) = record.fields.get(LIST_FIELD) else {
            continue;
        };
        let mut index = 0;
        for alternative in alternatives {
            match alternative.as_str().map(str::trim) {
                Some(text) if !text.is_empty() => {
                    index += 1;
                    lines.push(AugmentedLine {
                        row_id: composite.parent.clone(),
                        section: composite.discriminators[0].clone(),
                        format: composite.discriminators[1].clone(),
                        alt_idx: format!("{index:02}"),
                        text: text.to_string(),
                    });
                }
                _ => skipped(&record.correlation_id),
            }
        }
    }
    Ok(lines)
}

fn skipped(id: &CorrelationId) {
    tracing::warn!(correlation_id = %id, "Skipping non-text paraphrase");
}
