//! SOAP notes for every transcribed patient
//!
//! Default mode asks for the whole note in one request per patient. Section
//! mode fans each patient out into one request per section and reassembles
//! the note; a patient missing any section is dropped and counted missing.

use std::collections::HashMap;

use serde_json::{Map, Value as JsonValue};

use clinsynth_core::{
    CorrelationId, Expectation, MergedRecord, PipelineError, StageReport, WorkItem, regroup,
};

use super::demographics::PatientRow;
use super::{text_field, transcripts};
use crate::artifacts::read_jsonl;
use crate::batch::{Assembled, BatchStage, run_batch};
use crate::config::Config;
use crate::llm::BatchApi;
use crate::prompts::{self, SOAP_SECTIONS};

pub const STAGE: &str = "soap";
pub const DATASET: &str = "patients_with_soap.jsonl";
const TEMPERATURE: f32 = 0.7;

pub async fn run(
    api: &dyn BatchApi,
    config: &Config,
    sections: bool,
) -> Result<StageReport, PipelineError> {
    let patients = load_transcribed(config)?;
    tracing::info!(patients = patients.len(), sections, "Loaded transcribed patients");

    if sections {
        run_sections(api, config, patients).await
    } else {
        run_whole(api, config, patients).await
    }
}

/// Records of the transcripts dataset.
fn load_transcribed(config: &Config) -> Result<Vec<MergedRecord>, PipelineError> {
    let path = config.stage_dir(transcripts::STAGE).join(transcripts::DATASET);
    if !path.exists() {
        return Err(PipelineError::Validation(format!(
            "{} not found; run the transcripts stage first",
            path.display()
        )));
    }
    read_jsonl(&path)
}

async fn run_whole(
    api: &dyn BatchApi,
    config: &Config,
    patients: Vec<MergedRecord>,
) -> Result<StageReport, PipelineError> {
    let items = patients
        .into_iter()
        .map(|record| -> Result<WorkItem, PipelineError> {
            let row = PatientRow::from_fields(&record.fields)?;
            let transcription =
                text_field(&record.fields, "transcription", &record.correlation_id)?;
            let prompt = prompts::soap_note(&row, transcription);
            Ok(WorkItem::new(record.correlation_id, prompt, record.fields))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let stage = BatchStage::new(
        STAGE,
        Expectation::object(&SOAP_SECTIONS),
        config.sampling(TEMPERATURE),
    );
    let mut run = run_batch(api, config, &stage, items).await?;
    let assembled = run.take_merged();
    run.finish(config, DATASET, assembled)
}

async fn run_sections(
    api: &dyn BatchApi,
    config: &Config,
    patients: Vec<MergedRecord>,
) -> Result<StageReport, PipelineError> {
    let mut items = Vec::with_capacity(patients.len() * SOAP_SECTIONS.len());
    for record in &patients {
        let row = PatientRow::from_fields(&record.fields)?;
        let transcription =
            text_field(&record.fields, "transcription", &record.correlation_id)?;
        for section in SOAP_SECTIONS {
            items.push(WorkItem::new(
                CorrelationId::compose(record.correlation_id.as_str(), &[section])?,
                prompts::soap_section(&row, transcription, section),
                Map::new(),
            ));
        }
    }

    let stage = BatchStage::new(
        STAGE,
        Expectation::object(&["text"]),
        config.sampling(TEMPERATURE),
    );
    let mut run = run_batch(api, config, &stage, items).await?;
    let merged = run.take_merged();
    let assembled = assemble_sections(patients, merged.rows)?;
    run.finish(config, DATASET, assembled)
}

/// Rebuild whole notes from per-section records, in patient order.
fn assemble_sections(
    patients: Vec<MergedRecord>,
    section_records: Vec<MergedRecord>,
) -> Result<Assembled<MergedRecord>, PipelineError> {
    let mut notes: HashMap<String, Map<String, JsonValue>> = HashMap::new();
    for group in regroup(section_records, 1)? {
        let mut note = Map::new();
        for (discriminators, record) in group.members {
            let text = record.fields.get("text");
            if let (Some(section), Some(text)) = (discriminators.first(), text) {
                note.insert(section.clone(), text.clone());
            }
        }
        notes.insert(group.parent, note);
    }

    let requested = patients.len();
    let mut rows = Vec::with_capacity(requested);
    let mut missing_ids = Vec::new();
    for mut patient in patients {
        let note = notes.remove(patient.correlation_id.as_str()).unwrap_or_default();
        if SOAP_SECTIONS.iter().all(|s| note.contains_key(*s)) {
            patient.fields.extend(note);
            rows.push(patient);
        } else {
            missing_ids.push(patient.correlation_id);
        }
    }

    Ok(Assembled {
        rows,
        requested,
        missing_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient(id: &str) -> MergedRecord {
        let mut fields = Map::new();
        fields.insert("row_id".into(), json!(id));
        fields.insert("transcription".into(), json!("..."));
        MergedRecord {
            correlation_id: CorrelationId::new(id),
            fields,
        }
    }

    fn section(parent: &str, name: &str) -> MergedRecord {
        let mut fields = Map::new();
        fields.insert("text".into(), json!(format!("{name} of {parent}")));
        MergedRecord {
            correlation_id: CorrelationId::compose(parent, &[name]).unwrap(),
            fields,
        }
    }

    #[test]
    fn only_complete_notes_are_emitted() {
        let mut sections: Vec<MergedRecord> = SOAP_SECTIONS
            .iter()
            .map(|s| section("row0000", s))
            .collect();
        sections.push(section("row0001", "subjective"));
        sections.push(section("row0001", "plan"));

        let assembled = assemble_sections(
            vec![patient("row0000"), patient("row0001"), patient("row0002")],
            sections,
        )
        .unwrap();

        assert_eq!(assembled.requested, 3);
        assert_eq!(assembled.rows.len(), 1);
        let note = &assembled.rows[0];
        assert_eq!(note.correlation_id.as_str(), "row0000");
        assert_eq!(note.fields["assessment"], "assessment of row0000");
        assert_eq!(note.fields["transcription"], "...");
        let missing: Vec<&str> = assembled.missing_ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(missing, ["row0001", "row0002"]);
    }
}
