//! Locally generated patient rows

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use clinsynth_core::{CorrelationId, PipelineError, row_id};

const GENDERS: [&str; 3] = ["Male", "Female", "Non-binary"];
const YES_NO: [&str; 2] = ["Yes", "No"];

/// Facts for one synthetic patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRow {
    pub row_id: String,
    pub gender: String,
    pub age: u32,
    pub smoker: String,
    pub drinker: String,
    pub blood_pressure: String,
    pub chief_complaint: String,
}

impl PatientRow {
    pub fn correlation_id(&self) -> CorrelationId {
        CorrelationId::new(self.row_id.clone())
    }

    /// The row as a JSON object, the shape merged into output records.
    pub fn fields(&self) -> Result<Map<String, JsonValue>, PipelineError> {
        match serde_json::to_value(self)? {
            JsonValue::Object(map) => Ok(map),
            other => Err(PipelineError::Validation(format!(
                "patient row serialized to {other}"
            ))),
        }
    }

    /// Read the row back out of a stored record; extra keys are ignored.
    pub fn from_fields(fields: &Map<String, JsonValue>) -> Result<Self, PipelineError> {
        Ok(serde_json::from_value(JsonValue::Object(fields.clone()))?)
    }
}

/// Draw `count` rows, picking complaints from `complaints`.
pub fn random_rows<R: Rng>(
    count: usize,
    complaints: &[String],
    rng: &mut R,
) -> Result<Vec<PatientRow>, PipelineError> {
    if complaints.is_empty() {
        return Err(PipelineError::Validation(
            "no chief complaints to draw from".to_string(),
        ));
    }

    let mut rows = Vec::with_capacity(count);
    for index in 0..count {
        rows.push(PatientRow {
            row_id: row_id(index).to_string(),
            gender: pick(&GENDERS, rng),
            age: rng.gen_range(18..=90),
            smoker: pick(&YES_NO, rng),
            drinker: pick(&YES_NO, rng),
            blood_pressure: format!("{}/{}", rng.gen_range(100..=180), rng.gen_range(60..=110)),
            chief_complaint: complaints
                .choose(rng)
                .cloned()
                .unwrap_or_default(),
        });
    }
    Ok(rows)
}

fn pick<R: Rng>(options: &[&str], rng: &mut R) -> String {
    options.choose(rng).copied().unwrap_or_default().to_string()
}
