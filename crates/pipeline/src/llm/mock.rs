//! In-process stand-ins for the batch and chat APIs
//!
//! Used by the test suites to drive whole stages without a network. The
//! batch mock answers each uploaded request line through a responder
//! closure and serves the resulting output file in small chunks so line
//! boundaries fall mid-chunk.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use serde_json::json;

use clinsynth_core::{Job, JobStatus, PipelineError};

use super::wire::{BatchRequestLine, ChatRequest};
use super::{BatchApi, ByteChunks, ChatApi};

const CHUNK_SIZE: usize = 7;

/// How the mock answers one request line
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A 200 response whose message content is this text.
    Content(String),
    /// A failed request with this HTTP status.
    Status(u16),
    /// No output line at all.
    Omit,
    /// This exact text as the output line.
    Raw(String),
}

type Responder = Box<dyn Fn(&BatchRequestLine) -> MockReply + Send + Sync>;

/// Scripted batch facility
pub struct MockBatchApi {
    responder: Responder,
    statuses: Mutex<VecDeque<JobStatus>>,
    uploads: Mutex<Vec<Vec<u8>>>,
    failing_uploads: AtomicUsize,
    polls: AtomicUsize,
    submissions: AtomicUsize,
    downloads: AtomicUsize,
}

impl MockBatchApi {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&BatchRequestLine) -> MockReply + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            statuses: Mutex::new(VecDeque::new()),
            uploads: Mutex::new(Vec::new()),
            failing_uploads: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        }
    }

    /// Statuses returned by successive polls; `Completed` once exhausted.
    pub fn with_statuses(self, statuses: &[JobStatus]) -> Self {
        *lock(&self.statuses) = statuses.iter().copied().collect();
        self
    }

    /// Fail the first `count` uploads with a transport error.
    pub fn failing_uploads(self, count: usize) -> Self {
        self.failing_uploads.store(count, Ordering::SeqCst);
        self
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn upload_attempts(&self) -> usize {
        lock(&self.uploads).len()
    }

    /// Request lines of the most recent upload.
    pub fn uploaded_lines(&self) -> Vec<BatchRequestLine> {
        let uploads = lock(&self.uploads);
        let Some(last) = uploads.last() else {
            return Vec::new();
        };
        String::from_utf8_lossy(last)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    fn render_output(&self) -> String {
        let mut out = String::new();
        for (index, line) in self.uploaded_lines().iter().enumerate() {
            let rendered = match (self.responder)(line) {
                MockReply::Content(content) => json!({
                    "id": format!("batch_req_{index}"),
                    "custom_id": line.custom_id,
                    "response": {
                        "status_code": 200,
                        "body": {"choices": [{
                            "index": 0,
                            "message": {"role": "assistant", "content": content}
                        }]}
                    },
                    "error": null
                })
                .to_string(),
                MockReply::Status(code) => json!({
                    "id": format!("batch_req_{index}"),
                    "custom_id": line.custom_id,
                    "response": {"status_code": code, "body": {"error": {"message": "rejected"}}},
                    "error": null
                })
                .to_string(),
                MockReply::Omit => continue,
                MockReply::Raw(raw) => raw,
            };
            out.push_str(&rendered);
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl BatchApi for MockBatchApi {
    async fn upload_batch_file(
        &self,
        _file_name: &str,
        contents: Vec<u8>,
    ) -> Result<String, PipelineError> {
        let attempt = {
            let mut uploads = lock(&self.uploads);
            uploads.push(contents);
            uploads.len()
        };
        let failing = self.failing_uploads.load(Ordering::SeqCst);
        if attempt <= failing {
            return Err(PipelineError::Transport(
                "upload: connection reset".to_string(),
            ));
        }
        Ok(format!("file-in-{attempt}"))
    }

    async fn create_batch(
        &self,
        _input_file_id: &str,
        _completion_window: &str,
    ) -> Result<Job, PipelineError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        Job::from_remote(format!("batch_mock_{n}"), JobStatus::Pending, None)
    }

    async fn retrieve_batch(&self, job_id: &str) -> Result<Job, PipelineError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let status = lock(&self.statuses)
            .pop_front()
            .unwrap_or(JobStatus::Completed);
        let output = (status == JobStatus::Completed).then(|| "file-out".to_string());
        Job::from_remote(job_id, status, output)
    }

    async fn download_file(&self, _file_id: &str) -> Result<ByteChunks, PipelineError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let bytes = self.render_output().into_bytes();
        let chunks: Vec<Result<Vec<u8>, PipelineError>> = bytes
            .chunks(CHUNK_SIZE)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

type ChatResponder = Box<dyn Fn(&ChatRequest) -> Result<String, PipelineError> + Send + Sync>;

/// Scripted realtime chat endpoint
pub struct MockChatApi {
    responder: ChatResponder,
    calls: AtomicUsize,
}

impl MockChatApi {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String, PipelineError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn complete(&self, request: &ChatRequest) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(request)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
