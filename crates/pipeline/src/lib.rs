//! clinsynth library crate
//!
//! Exposes the stages, the batch runner and the API seams (with their
//! in-process mocks) for integration tests. The binary entrypoint is in
//! `main.rs`.

pub mod artifacts;
pub mod batch;
pub mod builder;
pub mod config;
pub mod llm;
pub mod prompts;
pub mod retry;
pub mod stages;

pub use config::{Config, Sampling};
