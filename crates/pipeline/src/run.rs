use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use mnemo_vault::sha256_bytes;

/// One pipeline execution and its authoritative run directory.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub run_manifest_path: PathBuf,
}

pub fn new_run_id() -> String {
    Utc::now().format("RUN-%Y%m%d-%H%M%S").to_string()
}

/// Best-effort current git head; `None` when git or the repo is absent.
pub fn git_head() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!head.is_empty()).then_some(head)
}

/// Write a pretty JSON artifact and return its sha256 fingerprint.
pub fn write_json_artifact<T: Serialize>(path: &Path, value: &T) -> Result<String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = format!("{}\n", serde_json::to_string_pretty(value)?);
    std::fs::write(path, &data)?;
    Ok(sha256_bytes(data.as_bytes()))
}

/// Write a JSONL artifact (one compact object per line) and return its
/// sha256 fingerprint.
pub fn write_jsonl_artifact<T: Serialize>(path: &Path, values: &[T]) -> Result<String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut data = String::new();
    for value in values {
        data.push_str(&serde_json::to_string(value)?);
        data.push('\n');
    }
    std::fs::write(path, &data)?;
    Ok(sha256_bytes(data.as_bytes()))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use mnemo_vault::sha256_file;

    use super::{new_run_id, write_json_artifact, write_jsonl_artifact};

    #[test]
    fn run_ids_carry_the_timestamp_prefix() {
        assert!(new_run_id().starts_with("RUN-"));
    }

    #[test]
    fn artifact_fingerprints_match_file_contents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let json_path = dir.path().join("run").join("report.json");
        let sha = write_json_artifact(&json_path, &json!({"a": 1}))?;
        assert_eq!(sha, sha256_file(&json_path)?);

        let jsonl_path = dir.path().join("run").join("tasks.jsonl");
        let sha = write_jsonl_artifact(&jsonl_path, &[json!({"a": 1}), json!({"b": 2})])?;
        assert_eq!(sha, sha256_file(&jsonl_path)?);
        assert_eq!(std::fs::read_to_string(&jsonl_path)?.lines().count(), 2);
        Ok(())
    }
}
