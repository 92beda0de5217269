//! Batch lifecycle: submit, poll, retrieve, and the stage runner tying
//! them to the parser and correlator

pub mod poll;
pub mod retrieve;
pub mod runner;
pub mod submit;

pub use poll::await_completion;
pub use retrieve::{RawLines, download_output};
pub use runner::{Assembled, BatchStage, StageRun, persisted_items, run_batch};
pub use submit::{RequestFile, submit};
