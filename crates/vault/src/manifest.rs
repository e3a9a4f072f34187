use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VaultError;

/// One raw-artifact manifest line.  All sha fields are `sha256:` + hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawManifestLine {
    pub raw_id: String,
    pub uri: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub mtime: Option<String>,
    pub mime: String,
    pub ingested_at: String,
}

/// One MU manifest line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuManifestLine {
    pub mu_id: String,
    pub schema_version: String,
    pub uri: String,
    pub source_raw_ids: Vec<String>,
    pub mu_key: String,
    pub content_hash: String,
    pub created_at: String,
}

/// Append one record as a compact JSON line, durably (flush + fsync).
///
/// Manifest files are append-only: lines are never rewritten or deleted;
/// semantic edits are appended as new lines.
pub fn append_jsonl<T: Serialize>(path: impl AsRef<Path>, record: &T) -> Result<(), VaultError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(record)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

/// Read every JSON object line from a JSONL file.
///
/// Missing file yields an empty list; blank lines are skipped; a UTF-8 BOM
/// on the first line is tolerated.  Invalid JSON is an error; callers that
/// need per-line diagnostics (the sync engine) read the text themselves.
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<Value>, VaultError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    for line in text.lines() {
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() {
            continue;
        }
        records.push(serde_json::from_str(line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{RawManifestLine, append_jsonl, read_jsonl};

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifests").join("raw_manifest.jsonl");

        let line = RawManifestLine {
            raw_id: "sha256:aa".into(),
            uri: "vault://default/raw/2026/02/aa.txt".into(),
            sha256: "sha256:aa".into(),
            size_bytes: 3,
            mtime: None,
            mime: "text/plain".into(),
            ingested_at: "2026-02-21T00:00:00Z".into(),
        };
        append_jsonl(&path, &line).unwrap();
        append_jsonl(&path, &json!({"raw_id": "sha256:bb"})).unwrap();

        let records = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["mtime"], serde_json::Value::Null);
        assert_eq!(records[1]["raw_id"], "sha256:bb");
    }

    #[test]
    fn missing_file_reads_empty_and_bom_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.jsonl");
        assert!(read_jsonl(&path).unwrap().is_empty());

        std::fs::write(&path, "\u{feff}{\"a\":1}\n\n{\"b\":2}\n").unwrap();
        let records = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["a"], 1);
    }
}
