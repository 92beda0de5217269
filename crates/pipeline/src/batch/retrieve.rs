//! Result retriever: downloads the output file and reads it back line by line

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use clinsynth_core::PipelineError;

use crate::llm::BatchApi;

/// Stream a file's content to `dest`, returning the number of bytes written.
///
/// The content lands in a sibling `.part` file first and is renamed into
/// place only once the stream ends, so an interrupted download never looks
/// like a finished one.
pub async fn download_output(
    api: &dyn BatchApi,
    file_id: &str,
    dest: &Path,
) -> Result<u64, PipelineError> {
    let partial = dest.with_extension("part");
    let mut chunks = api.download_file(file_id).await?;
    let mut out = tokio::fs::File::create(&partial).await?;
    let mut written = 0u64;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    drop(out);

    tokio::fs::rename(&partial, dest).await?;
    tracing::info!(file_id, bytes = written, path = %dest.display(), "Downloaded batch output");
    Ok(written)
}

/// Lazy iterator over the lines of a downloaded output file.
///
/// Lines are decoded lossily so one bad byte sequence only spoils its own
/// line. A read error ends the iteration and is reported by [`finish`].
///
/// [`finish`]: RawLines::finish
pub struct RawLines {
    reader: BufReader<File>,
    buf: Vec<u8>,
    error: Option<io::Error>,
}

impl RawLines {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            buf: Vec::new(),
            error: None,
        })
    }

    /// Surface a read error that cut the iteration short.
    pub fn finish(self) -> Result<(), PipelineError> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

impl Iterator for RawLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.error.is_some() {
            return None;
        }
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.buf);
                Some(line.trim_end_matches(['\n', '\r']).to_string())
            }
            Err(err) => {
                self.error = Some(err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::submit::{RequestFile, submit};
    use crate::config::Sampling;
    use crate::llm::mock::{MockBatchApi, MockReply};
    use clinsynth_core::WorkItem;
    use serde_json::Map;

    #[tokio::test]
    async fn chunked_download_reassembles_lines() {
        let api = MockBatchApi::new(|line| {
            MockReply::Content(format!("{{\"transcription\": \"visit {}\"}}", line.custom_id))
        });
        let items: Vec<_> = (0..5)
            .map(|i| WorkItem::new(format!("row{i:04}"), "p", Map::new()))
            .collect();
        let sampling = Sampling {
            model: "m".into(),
            temperature: 0.5,
        };
        let file = RequestFile::render(&items, &sampling).unwrap();
        submit(&api, "requests.jsonl", &file, "24h").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("output.jsonl");
        let bytes = download_output(&api, "file-out", &dest).await.unwrap();
        assert!(bytes > 0);
        assert!(!dest.with_extension("part").exists());

        let mut lines = RawLines::open(&dest).unwrap();
        let collected: Vec<String> = lines.by_ref().collect();
        lines.finish().unwrap();

        assert_eq!(collected.len(), 5);
        assert!(collected[4].contains("row0004"));
        for line in &collected {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }

    #[test]
    fn invalid_utf8_only_spoils_its_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.jsonl");
        std::fs::write(&path, b"{\"a\":1}\r\n\xff\xfe\n{\"b\":2}").unwrap();

        let lines: Vec<String> = RawLines::open(&path).unwrap().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "{\"a\":1}");
        assert_eq!(lines[2], "{\"b\":2}");
    }
}
