//! clinsynth-core: Batch-response correlation for the synthetic dataset pipeline
//!
//! This crate holds the pure parts of every pipeline stage: work items and
//! correlation ids, job status, response parsing and payload extraction,
//! the correlator, and the missing-id and retry policies. It performs no I/O.

pub mod correlate;
pub mod correlation;
pub mod error;
pub mod extract;
pub mod item;
pub mod job;
pub mod parser;
pub mod policy;
pub mod report;
pub mod response;
pub mod retry;
pub mod schema;

pub use correlate::{Group, ID_KEY, MergeOutcome, MergedRecord, merge, regroup};
pub use correlation::{CompositeId, CorrelationId, DELIMITER};
pub use error::{PipelineError, Result};
pub use extract::{Shape, extract_structure, strip_fences};
pub use item::{WorkItem, build_items, ensure_unique, fan_out, row_id};
pub use job::{Job, JobStatus};
pub use parser::{Expectation, ExtractedPayload, LineOutcome, ParsedBatch, ResponseParser};
pub use policy::MissingPolicy;
pub use report::StageReport;
pub use response::ResponseRecord;
pub use retry::RetryPolicy;
pub use schema::{FactSchema, FieldKind, FieldSpec, KeyCheck, MissingField};
