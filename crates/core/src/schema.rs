//! Declarative field schemas
//!
//! `FactSchema` recovers named facts from free text (a rendered prompt) with
//! one regex per field. `KeyCheck` compares an extracted object against the
//! keys a stage asked the model for.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::error::PipelineError;

/// How a captured fact is typed in the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
}

/// One field of a fact schema: the first capture group of `pattern` is the
/// value.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub pattern: Regex,
    pub required: bool,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(
        name: &str,
        pattern: &str,
        required: bool,
        kind: FieldKind,
    ) -> Result<Self, PipelineError> {
        let pattern = Regex::new(pattern).map_err(|e| {
            PipelineError::Validation(format!("invalid pattern for field '{name}': {e}"))
        })?;
        Ok(Self {
            name: name.to_string(),
            pattern,
            required,
            kind,
        })
    }
}

/// A required field that could not be recovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingField {
    pub field: String,
    pub reason: String,
}

/// Ordered list of field specs consumed by one generic extractor.
#[derive(Debug, Clone)]
pub struct FactSchema {
    fields: Vec<FieldSpec>,
}

impl FactSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Patient facts as rendered into transcript prompts.
    pub fn patient_facts() -> Result<Self, PipelineError> {
        Ok(Self::new(vec![
            FieldSpec::new("gender", r"(?i)gender:\s*([\w-]+)", true, FieldKind::Text)?,
            FieldSpec::new("age", r"(?i)age:\s*(\d+)", true, FieldKind::Integer)?,
            FieldSpec::new("smoker", r"(?i)smoker:\s*(Yes|No)", true, FieldKind::Text)?,
            FieldSpec::new("drinker", r"(?i)drinker:\s*(Yes|No)", true, FieldKind::Text)?,
            FieldSpec::new("blood_pressure", r"(?i)BP:\s*(\d+/\d+)", true, FieldKind::Text)?,
            FieldSpec::new(
                "chief_complaint",
                r#"(?mi)chief complaint:\s*"(.+)"\s*$"#,
                true,
                FieldKind::Text,
            )?,
        ]))
    }

    /// Extract every field from `text`.
    ///
    /// Returns the complete mapping, or every missing required field by name.
    /// Optional fields that do not match are simply absent.
    pub fn extract(&self, text: &str) -> Result<Map<String, JsonValue>, Vec<MissingField>> {
        let mut facts = Map::new();
        let mut missing = Vec::new();

        for spec in &self.fields {
            let captured = spec
                .pattern
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str());

            match (captured, spec.kind) {
                (Some(raw), FieldKind::Text) => {
                    facts.insert(spec.name.clone(), JsonValue::String(raw.to_string()));
                }
                (Some(raw), FieldKind::Integer) => match raw.parse::<i64>() {
                    Ok(n) => {
                        facts.insert(spec.name.clone(), JsonValue::from(n));
                    }
                    Err(e) if spec.required => missing.push(MissingField {
                        field: spec.name.clone(),
                        reason: format!("'{raw}' is not an integer: {e}"),
                    }),
                    Err(_) => {}
                },
                (None, _) if spec.required => missing.push(MissingField {
                    field: spec.name.clone(),
                    reason: "pattern did not match".to_string(),
                }),
                (None, _) => {}
            }
        }

        if missing.is_empty() {
            Ok(facts)
        } else {
            Err(missing)
        }
    }
}

/// Result of comparing an object's keys with the expected set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyCheck {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

impl KeyCheck {
    pub fn compare(object: &Map<String, JsonValue>, expected: &[String]) -> Self {
        let missing = expected
            .iter()
            .filter(|k| !object.contains_key(k.as_str()))
            .cloned()
            .collect();
        let extra = object
            .keys()
            .filter(|k| !expected.iter().any(|e| e == *k))
            .cloned()
            .collect();
        Self { missing, extra }
    }

    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}
