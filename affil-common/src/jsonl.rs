//! Newline-delimited JSON helpers
//!
//! Input files are read line by line. A line that fails to parse is logged,
//! counted and skipped: one bad harvester row never aborts a run.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File extension picked up when an input path is a directory
const JSONL_EXTENSION: &str = "jsonl";

/// Rows parsed from one JSONL file
#[derive(Debug)]
pub struct JsonlBatch<T> {
    /// Successfully parsed rows, in file order
    pub rows: Vec<T>,
    /// Non-blank lines that failed to parse
    pub malformed_lines: usize,
}

/// Expand input paths: files are kept as given, directories are walked for `*.jsonl`
///
/// Directory contents are sorted so the expansion is stable across platforms.
///
/// # Errors
/// Returns error if a path does not exist or a directory cannot be walked
pub fn collect_input_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Input path does not exist: {}",
                path.display()
            )));
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(path).follow_links(true) {
            let entry = entry.map_err(|e| {
                Error::InvalidInput(format!("Cannot walk {}: {}", path.display(), e))
            })?;
            let is_jsonl = entry
                .path()
                .extension()
                .map(|ext| ext == JSONL_EXTENSION)
                .unwrap_or(false);
            if entry.file_type().is_file() && is_jsonl {
                found.push(entry.into_path());
            }
        }
        found.sort();

        debug!(dir = %path.display(), files = found.len(), "Expanded input directory");
        files.extend(found);
    }

    Ok(files)
}

/// Read a JSONL file into typed rows, skipping blank and malformed lines
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<JsonlBatch<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    let mut malformed_lines = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<T>(trimmed) {
            Ok(row) => rows.push(row),
            Err(e) => {
                malformed_lines += 1;
                warn!(
                    file = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping malformed JSONL line"
                );
            }
        }
    }

    Ok(JsonlBatch {
        rows,
        malformed_lines,
    })
}

/// Write rows as JSONL (one compact JSON document per line, UTF-8 kept verbatim)
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Row {
        id: String,
    }

    #[test]
    fn test_read_skips_blank_and_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        std::fs::write(&path, "{\"id\":\"Q1\"}\n\n{not json\n{\"id\":\"Q2\"}\n").unwrap();

        let batch: JsonlBatch<Row> = read_jsonl(&path).unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.malformed_lines, 1);
        assert_eq!(batch.rows[1].id, "Q2");
    }

    #[test]
    fn test_write_then_read_keeps_unicode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.jsonl");
        let rows = vec![Row {
            id: "Украина".to_string(),
        }];

        write_jsonl(&path, &rows).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("Украина"));

        let batch: JsonlBatch<Row> = read_jsonl(&path).unwrap();
        assert_eq!(batch.rows, rows);
    }

    #[test]
    fn test_collect_walks_directories_for_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let files = collect_input_files(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.jsonl"));
    }

    #[test]
    fn test_collect_missing_path_is_error() {
        let result = collect_input_files(&[PathBuf::from("/definitely/not/here.jsonl")]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
