//! Stage runner: one work-item list through submit, poll, retrieve, parse
//! and merge, with every intermediate artifact kept on disk

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use clinsynth_core::{
    CorrelationId, Expectation, Job, MergeOutcome, MergedRecord, ParsedBatch, PipelineError,
    ResponseParser, StageReport, WorkItem, merge,
};

use super::poll::await_completion;
use super::retrieve::{RawLines, download_output};
use super::submit::{RequestFile, submit};
use crate::artifacts::{read_json, read_jsonl, write_json_pretty, write_jsonl};
use crate::config::{Config, Sampling};
use crate::llm::BatchApi;
use crate::retry::with_retry;

pub const ITEMS_FILE: &str = "items.jsonl";
pub const REQUESTS_FILE: &str = "requests.jsonl";
pub const JOB_FILE: &str = "batch.json";
pub const OUTPUT_FILE: &str = "output.jsonl";
pub const REPORT_FILE: &str = "report.json";

/// What one batch stage sends and expects back
#[derive(Debug, Clone)]
pub struct BatchStage {
    pub name: String,
    pub expectation: Expectation,
    pub sampling: Sampling,
}

impl BatchStage {
    pub fn new(name: &str, expectation: Expectation, sampling: Sampling) -> Self {
        Self {
            name: name.to_string(),
            expectation,
            sampling,
        }
    }
}

/// A batch stage after parsing and merging, before its dataset is written
#[derive(Debug)]
pub struct StageRun {
    pub stage: String,
    pub dir: PathBuf,
    pub run_id: Uuid,
    pub job_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub items: Vec<WorkItem>,
    pub parsed: ParsedBatch,
    pub outcome: MergeOutcome,
}

/// Rows a stage assembled from its merge, ready to be judged and written
#[derive(Debug)]
pub struct Assembled<T> {
    pub rows: Vec<T>,
    /// Units the missing ids are counted against.
    pub requested: usize,
    pub missing_ids: Vec<CorrelationId>,
}

/// Work items persisted by an earlier run of `stage`, when resuming.
///
/// Stages that generate items randomly or through realtime calls use this
/// so a resumed run correlates against exactly what was submitted.
pub fn persisted_items(
    config: &Config,
    stage: &str,
) -> Result<Option<Vec<WorkItem>>, PipelineError> {
    let path = config.stage_dir(stage).join(ITEMS_FILE);
    if config.resume && path.exists() {
        tracing::info!(stage, path = %path.display(), "Reusing persisted work items");
        return read_jsonl(&path).map(Some);
    }
    Ok(None)
}

/// Run `items` through the batch facility and correlate the results.
pub async fn run_batch(
    api: &dyn BatchApi,
    config: &Config,
    stage: &BatchStage,
    items: Vec<WorkItem>,
) -> Result<StageRun, PipelineError> {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();
    let dir = config.stage_dir(&stage.name);
    std::fs::create_dir_all(&dir)?;

    let requests = RequestFile::render(&items, &stage.sampling)?;
    write_jsonl(&dir.join(ITEMS_FILE), &items)?;
    std::fs::write(dir.join(REQUESTS_FILE), requests.contents())?;
    tracing::info!(
        stage = %stage.name,
        %run_id,
        requests = requests.len(),
        model = %stage.sampling.model,
        "Rendered batch requests"
    );

    let job_path = dir.join(JOB_FILE);
    let job: Job = if config.resume && job_path.exists() {
        let job: Job = read_json(&job_path)?;
        tracing::info!(stage = %stage.name, job_id = job.job_id(), "Resuming submitted job");
        job
    } else {
        let job = with_retry(&config.retry, "submit batch", || {
            submit(api, REQUESTS_FILE, &requests, &config.completion_window)
        })
        .await?;
        write_json_pretty(&job_path, &job)?;
        job
    };
    let job_id = job.job_id().to_string();

    let output_path = dir.join(OUTPUT_FILE);
    if config.resume && output_path.exists() {
        tracing::info!(stage = %stage.name, job_id = %job_id, "Reusing downloaded output");
    } else {
        let completed = await_completion(api, &job_id, config.poll_interval).await?;
        let file_id = completed
            .output_handle()
            .ok_or_else(|| {
                PipelineError::Transport(format!("batch {job_id} completed without an output file"))
            })?
            .to_string();
        with_retry(&config.retry, "download output", || {
            download_output(api, &file_id, &output_path)
        })
        .await?;
    }

    let mut parsed = parse_output(stage.expectation.clone(), output_path).await?;
    log_failures(&stage.name, &parsed);

    let outcome = merge(&items, std::mem::take(&mut parsed.payloads));
    if outcome.mismatches() > 0 {
        tracing::warn!(
            stage = %stage.name,
            unmatched = outcome.unmatched_ids.len(),
            duplicates = outcome.duplicate_ids.len(),
            "Output ids did not match the submitted items"
        );
    }
    for (id, keys) in &outcome.shadowed_keys {
        tracing::warn!(
            stage = %stage.name,
            correlation_id = %id,
            keys = ?keys,
            "Dropped payload keys that clash with item fields"
        );
    }

    Ok(StageRun {
        stage: stage.name.clone(),
        dir,
        run_id,
        job_id: Some(job_id),
        started_at,
        items,
        parsed,
        outcome,
    })
}

/// Parse the downloaded output on the blocking pool; output files can run
/// to hundreds of megabytes.
async fn parse_output(
    expectation: Expectation,
    path: PathBuf,
) -> Result<ParsedBatch, PipelineError> {
    tokio::task::spawn_blocking(move || -> Result<ParsedBatch, PipelineError> {
        let parser = ResponseParser::new(expectation);
        let mut lines = RawLines::open(&path)?;
        let parsed = parser.parse_lines(&mut lines);
        lines.finish()?;
        Ok(parsed)
    })
    .await
    .map_err(std::io::Error::other)?
}

fn log_failures(stage: &str, parsed: &ParsedBatch) {
    for id in &parsed.rejected {
        tracing::debug!(stage, correlation_id = %id, "Request rejected by the API");
    }
    for err in parsed.malformed.iter().chain(&parsed.extraction_failures) {
        tracing::debug!(stage, error = %err, "Record dropped");
    }
    for (id, keys) in &parsed.key_warnings {
        tracing::warn!(
            stage,
            correlation_id = %id,
            extra_keys = ?keys,
            "Unexpected keys in payload"
        );
    }
    tracing::info!(
        stage,
        retrieved = parsed.retrieved,
        rejected = parsed.rejected.len(),
        malformed = parsed.malformed.len(),
        extraction_failures = parsed.extraction_failures.len(),
        "Parsed batch output"
    );
}

impl StageRun {
    /// The merged records as the stage's rows, judged per work item.
    pub fn take_merged(&mut self) -> Assembled<MergedRecord> {
        Assembled {
            rows: std::mem::take(&mut self.outcome.records),
            requested: self.items.len(),
            missing_ids: self.outcome.missing_ids.clone(),
        }
    }

    /// Write the report, apply the missing-id policy, then write the dataset.
    ///
    /// The report is written even when the policy rejects the stage; the
    /// dataset is not.
    pub fn finish<T: Serialize>(
        self,
        config: &Config,
        dataset: &str,
        assembled: Assembled<T>,
    ) -> Result<StageReport, PipelineError> {
        let report = StageReport::new(
            &self.stage,
            self.run_id,
            self.job_id,
            self.started_at,
            assembled.requested,
            &self.parsed,
            &self.outcome,
            &assembled.missing_ids,
            assembled.rows.len(),
        );
        write_json_pretty(&self.dir.join(REPORT_FILE), &report)?;

        if let Err(err) = config
            .missing_policy
            .check(assembled.requested, &assembled.missing_ids)
        {
            tracing::error!(
                stage = %self.stage,
                policy = %config.missing_policy,
                missing = report.missing,
                requested = report.requested,
                "Missing-id policy rejected the stage"
            );
            return Err(err);
        }

        let path = self.dir.join(dataset);
        write_jsonl(&path, &assembled.rows)?;
        tracing::info!(
            stage = %self.stage,
            rows = assembled.rows.len(),
            path = %path.display(),
            "Wrote dataset"
        );
        Ok(report)
    }
}
