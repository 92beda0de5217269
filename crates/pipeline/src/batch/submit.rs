//! Request file rendering and job submission

use clinsynth_core::{CorrelationId, Job, PipelineError, WorkItem, ensure_unique};

use crate::config::Sampling;
use crate::llm::{BatchApi, BatchRequestLine};

/// A rendered batch request file, one request line per work item
#[derive(Debug, Clone)]
pub struct RequestFile {
    lines: Vec<BatchRequestLine>,
    contents: Vec<u8>,
}

impl RequestFile {
    /// Render `items` into JSON Lines.
    ///
    /// An empty item list or a duplicate correlation id is rejected before
    /// anything is sent.
    pub fn render(items: &[WorkItem], sampling: &Sampling) -> Result<Self, PipelineError> {
        if items.is_empty() {
            return Err(PipelineError::Validation(
                "cannot submit a batch with no work items".to_string(),
            ));
        }
        ensure_unique(items)?;

        let lines: Vec<BatchRequestLine> = items
            .iter()
            .map(|item| BatchRequestLine::for_item(item, sampling))
            .collect();

        let mut contents = Vec::new();
        for line in &lines {
            serde_json::to_writer(&mut contents, line)?;
            contents.push(b'\n');
        }

        Ok(Self { lines, contents })
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &CorrelationId> {
        self.lines.iter().map(|l| &l.custom_id)
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }
}

/// Upload the request file and create a job over it.
pub async fn submit(
    api: &dyn BatchApi,
    file_name: &str,
    requests: &RequestFile,
    completion_window: &str,
) -> Result<Job, PipelineError> {
    let file_id = api
        .upload_batch_file(file_name, requests.contents().to_vec())
        .await?;
    tracing::info!(file_id = %file_id, requests = requests.len(), "Uploaded batch input");

    let job = api.create_batch(&file_id, completion_window).await?;
    tracing::info!(
        job_id = job.job_id(),
        status = %job.status(),
        completion_window,
        "Created batch job"
    );
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockBatchApi, MockReply};
    use clinsynth_core::JobStatus;
    use serde_json::Map;

    fn sampling() -> Sampling {
        Sampling {
            model: "gpt-4o".into(),
            temperature: 0.7,
        }
    }

    fn items(ids: &[&str]) -> Vec<WorkItem> {
        ids.iter()
            .map(|id| WorkItem::new(*id, format!("prompt for {id}"), Map::new()))
            .collect()
    }

    #[test]
    fn renders_one_line_per_item() {
        let file = RequestFile::render(&items(&["a", "b", "c"]), &sampling()).unwrap();
        assert_eq!(file.len(), 3);

        let text = String::from_utf8(file.contents().to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let ids: Vec<&str> = file.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn rejects_empty_and_duplicate_items() {
        assert!(matches!(
            RequestFile::render(&[], &sampling()),
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(
            RequestFile::render(&items(&["a", "a"]), &sampling()),
            Err(PipelineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn submit_uploads_then_creates_job() {
        let api = MockBatchApi::new(|_| MockReply::Omit);
        let file = RequestFile::render(&items(&["a", "b"]), &sampling()).unwrap();

        let job = submit(&api, "requests.jsonl", &file, "24h").await.unwrap();

        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(api.submissions(), 1);
        let uploaded = api.uploaded_lines();
        assert_eq!(uploaded.len(), 2);
        assert_eq!(uploaded[1].body.prompt(), "prompt for b");
    }
}
