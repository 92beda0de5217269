//! Per-stage failure-count report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::correlate::MergeOutcome;
use crate::correlation::CorrelationId;
use crate::parser::ParsedBatch;

/// Number of missing ids listed in the report.
const MISSING_SAMPLE: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub run_id: Uuid,
    pub job_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub requested: usize,
    pub retrieved: usize,
    pub api_failures: usize,
    pub malformed: usize,
    pub extraction_failures: usize,
    pub key_warnings: usize,
    pub mismatches: usize,
    pub missing: usize,
    pub merged: usize,
    pub missing_sample: Vec<CorrelationId>,
}

impl StageReport {
    /// Summarize a parsed batch and its merge.
    ///
    /// `merged` is passed separately because some stages assemble several
    /// records into one (or flatten one into several) after the merge.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stage: &str,
        run_id: Uuid,
        job_id: Option<String>,
        started_at: DateTime<Utc>,
        requested: usize,
        parsed: &ParsedBatch,
        outcome: &MergeOutcome,
        missing_ids: &[CorrelationId],
        merged: usize,
    ) -> Self {
        let key_warnings: HashSet<&CorrelationId> = parsed
            .key_warnings
            .iter()
            .chain(&outcome.shadowed_keys)
            .map(|(id, _)| id)
            .collect();

        Self {
            stage: stage.to_string(),
            run_id,
            job_id,
            started_at,
            finished_at: Utc::now(),
            requested,
            retrieved: parsed.retrieved,
            api_failures: parsed.rejected.len(),
            malformed: parsed.malformed.len(),
            extraction_failures: parsed.extraction_failures.len(),
            key_warnings: key_warnings.len(),
            mismatches: outcome.mismatches(),
            missing: missing_ids.len(),
            merged,
            missing_sample: missing_ids.iter().take(MISSING_SAMPLE).cloned().collect(),
        }
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: requested={} retrieved={} api_failures={} malformed={} \
             extraction_failures={} key_warnings={} mismatches={} missing={} merged={}",
            self.stage,
            self.requested,
            self.retrieved,
            self.api_failures,
            self.malformed,
            self.extraction_failures,
            self.key_warnings,
            self.mismatches,
            self.missing,
            self.merged,
        )
    }
}
