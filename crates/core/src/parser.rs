//! Response parser: raw output lines to extracted payloads
//!
//! Per-record failures never abort the batch. Each line resolves to exactly
//! one [`LineOutcome`]; [`ResponseParser::parse_lines`] folds them into a
//! [`ParsedBatch`] that keeps the failures with their correlation ids so the
//! caller can report them.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::correlation::CorrelationId;
use crate::error::PipelineError;
use crate::extract::{Shape, extract_structure};
use crate::response::ResponseRecord;
use crate::schema::KeyCheck;

/// What a stage expects the model to return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// A single object carrying exactly these keys.
    Object { keys: Vec<String> },
    /// A list, stored under `field` in the extracted payload.
    List { field: String },
}

impl Expectation {
    pub fn object(keys: &[&str]) -> Self {
        Expectation::Object {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn list(field: &str) -> Self {
        Expectation::List {
            field: field.to_string(),
        }
    }

    fn shape(&self) -> Shape {
        match self {
            Expectation::Object { .. } => Shape::Object,
            Expectation::List { .. } => Shape::Array,
        }
    }
}

/// Structured payload recovered from one successful response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedPayload {
    pub correlation_id: CorrelationId,
    pub fields: Map<String, JsonValue>,
}

/// Outcome of parsing one output line
#[derive(Debug)]
pub enum LineOutcome {
    /// Payload extracted; `extra_keys` lists unexpected keys that were kept.
    Extracted {
        payload: ExtractedPayload,
        extra_keys: Vec<String>,
    },
    /// The API reported a failure for this request.
    Rejected {
        correlation_id: CorrelationId,
        status_code: Option<u16>,
    },
    /// The line itself is not a response record.
    Malformed(PipelineError),
    /// The request succeeded but no usable payload was found.
    Unextractable(PipelineError),
}

/// Folded result of parsing a whole output file
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub payloads: Vec<ExtractedPayload>,
    pub retrieved: usize,
    pub rejected: Vec<CorrelationId>,
    pub malformed: Vec<PipelineError>,
    pub extraction_failures: Vec<PipelineError>,
    pub key_warnings: Vec<(CorrelationId, Vec<String>)>,
}

/// Parser configured with one stage's expectation
#[derive(Debug, Clone)]
pub struct ResponseParser {
    expectation: Expectation,
}

impl ResponseParser {
    pub fn new(expectation: Expectation) -> Self {
        Self { expectation }
    }

    pub fn expectation(&self) -> &Expectation {
        &self.expectation
    }

    /// Parse one raw line; `line_no` is 1-based and only used for reporting.
    pub fn parse_line(&self, line_no: usize, line: &str) -> LineOutcome {
        let record = match ResponseRecord::parse_line(line) {
            Ok(record) => record,
            Err(reason) => {
                return LineOutcome::Malformed(PipelineError::MalformedRecord {
                    line: line_no,
                    reason,
                });
            }
        };

        if !record.success {
            return LineOutcome::Rejected {
                correlation_id: record.correlation_id,
                status_code: record.status_code,
            };
        }

        match self.extract(&record) {
            Ok((payload, extra_keys)) => LineOutcome::Extracted {
                payload,
                extra_keys,
            },
            Err(reason) => LineOutcome::Unextractable(PipelineError::Extraction {
                correlation_id: record.correlation_id,
                reason,
            }),
        }
    }

    /// Extract the payload from a successful record.
    pub fn extract(
        &self,
        record: &ResponseRecord,
    ) -> Result<(ExtractedPayload, Vec<String>), String> {
        let content = record
            .content()
            .ok_or_else(|| "response body has no message content".to_string())?;
        let (fields, extra_keys) = self.extract_text(content)?;
        Ok((
            ExtractedPayload {
                correlation_id: record.correlation_id.clone(),
                fields,
            },
            extra_keys,
        ))
    }

    /// Extract the payload fields from model text.
    ///
    /// Used directly for realtime completions, which carry no record
    /// envelope.
    pub fn extract_text(
        &self,
        content: &str,
    ) -> Result<(Map<String, JsonValue>, Vec<String>), String> {
        let value = extract_structure(content, self.expectation.shape())?;

        match &self.expectation {
            Expectation::Object { keys } => {
                let JsonValue::Object(object) = value else {
                    return Err("expected a JSON object".to_string());
                };
                let check = KeyCheck::compare(&object, keys);
                if !check.missing.is_empty() {
                    return Err(format!("missing keys: {}", check.missing.join(", ")));
                }
                Ok((object, check.extra))
            }
            Expectation::List { field } => {
                let mut fields = Map::new();
                fields.insert(field.clone(), value);
                Ok((fields, Vec::new()))
            }
        }
    }

    /// Parse every line of a downloaded output file. Blank lines are skipped.
    pub fn parse_lines<I, S>(&self, lines: I) -> ParsedBatch
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut batch = ParsedBatch::default();

        for (index, line) in lines.into_iter().enumerate() {
            let line = line.as_ref();
            if line.trim().is_empty() {
                continue;
            }
            batch.retrieved += 1;

            match self.parse_line(index + 1, line) {
                LineOutcome::Extracted {
                    payload,
                    extra_keys,
                } => {
                    if !extra_keys.is_empty() {
                        batch
                            .key_warnings
                            .push((payload.correlation_id.clone(), extra_keys));
                    }
                    batch.payloads.push(payload);
                }
                LineOutcome::Rejected { correlation_id, .. } => {
                    batch.rejected.push(correlation_id)
                }
                LineOutcome::Malformed(err) => batch.malformed.push(err),
                LineOutcome::Unextractable(err) => batch.extraction_failures.push(err),
            }
        }

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn line(custom_id: &str, content: &str) -> String {
        json!({
            "custom_id": custom_id,
            "response": {
                "status_code": 200,
                "body": {"choices": [{"message": {"content": content}}]}
            },
            "error": null
        })
        .to_string()
    }

    fn soap_parser() -> ResponseParser {
        ResponseParser::new(Expectation::object(&[
            "subjective",
            "objective",
            "assessment",
            "plan",
        ]))
    }

    #[test]
    fn extracts_object_payload() {
        let content = r#"{"subjective":"s","objective":"o","assessment":"a","plan":"p"}"#;
        match soap_parser().parse_line(1, &line("row0001", content)) {
            LineOutcome::Extracted {
                payload,
                extra_keys,
            } => {
                assert_eq!(payload.correlation_id.as_str(), "row0001");
                assert_eq!(payload.fields["plan"], "p");
                assert!(extra_keys.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn missing_keys_fail_extraction_with_id() {
        let content = r#"{"subjective":"s","plan":"p"}"#;
        match soap_parser().parse_line(1, &line("row0009", content)) {
            LineOutcome::Unextractable(PipelineError::Extraction {
                correlation_id,
                reason,
            }) => {
                assert_eq!(correlation_id.as_str(), "row0009");
                assert!(reason.contains("objective"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn extra_keys_are_kept_and_reported() {
        let content =
            r#"{"subjective":"s","objective":"o","assessment":"a","plan":"p","icd10":"R05"}"#;
        let batch = soap_parser().parse_lines([line("row0001", content)]);
        assert_eq!(batch.payloads.len(), 1);
        assert_eq!(batch.key_warnings[0].1, ["icd10"]);
    }

    #[test]
    fn list_payload_is_stored_under_field() {
        let parser = ResponseParser::new(Expectation::list("alternatives"));
        let batch = parser.parse_lines([line("r:plan:simple", "```json\n[\"a\",\"b\"]\n```")]);
        assert_eq!(batch.payloads[0].fields["alternatives"], json!(["a", "b"]));
    }

    #[test]
    fn unparseable_content_carries_correlation_id() {
        let parser = ResponseParser::new(Expectation::object(&["a"]));
        match parser.parse_line(3, &line("row0042", "I'm sorry, I can't do that.")) {
            LineOutcome::Unextractable(PipelineError::Extraction { correlation_id, .. }) => {
                assert_eq!(correlation_id.as_str(), "row0042")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn malformed_and_rejected_lines_are_counted() {
        let rejected = json!({
            "custom_id": "row0002",
            "response": {"status_code": 500, "body": {}},
            "error": null
        })
        .to_string();
        let lines = vec![
            line("row0001", r#"{"a": 1}"#),
            "{{{ not json".to_string(),
            String::new(),
            rejected,
        ];
        let batch = ResponseParser::new(Expectation::object(&["a"])).parse_lines(lines);

        assert_eq!(batch.retrieved, 3);
        assert_eq!(batch.payloads.len(), 1);
        assert_eq!(batch.rejected[0].as_str(), "row0002");
        assert!(matches!(
            batch.malformed[0],
            PipelineError::MalformedRecord { line: 2, .. }
        ));
    }

    #[test]
    fn parsing_is_deterministic() {
        let parser = soap_parser();
        let raw = line("row0001", "Sure!\n```json\n{\"subjective\":\"s\"}\n```");
        let first = format!("{:?}", parser.parse_line(1, &raw));
        for _ in 0..5 {
            assert_eq!(format!("{:?}", parser.parse_line(1, &raw)), first);
        }
    }
}
