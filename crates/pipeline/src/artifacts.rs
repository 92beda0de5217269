//! JSON and JSON Lines files in the stage work directories
//!
//! These are blocking writes of files a stage has already built in memory;
//! async callers run one at a time, between network steps.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use clinsynth_core::PipelineError;

/// Write one JSON document per line, creating parent directories.
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    let mut out = BufWriter::new(File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Read a JSON Lines file. Blank lines are skipped; an undecodable line is
/// a malformed-record error carrying its 1-based line number.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PipelineError> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|e| PipelineError::MalformedRecord {
            line: index + 1,
            reason: format!("{}: {e}", path.display()),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, value)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn ensure_parent(path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: String,
        n: u32,
    }

    #[test]
    fn jsonl_creates_directories_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/stage/rows.jsonl");
        let rows = vec![
            Row { id: "a".into(), n: 1 },
            Row { id: "b".into(), n: 2 },
        ];
        write_jsonl(&path, &rows).unwrap();
        fs::write(&path, format!("{}\n\n", fs::read_to_string(&path).unwrap())).unwrap();

        let back: Vec<Row> = read_jsonl(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn bad_line_reports_its_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        fs::write(&path, "{\"id\":\"a\",\"n\":1}\nnot json\n").unwrap();

        match read_jsonl::<Row>(&path).unwrap_err() {
            PipelineError::MalformedRecord { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_json::<Row>(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
