use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Job folder layout:
/// `jobs/<job_id>/{job.json, status.json, log.txt, raw_inputs/, mu_out/, .lock}`.
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub job_dir: PathBuf,
    pub job_json: PathBuf,
    pub status_json: PathBuf,
    pub log_txt: PathBuf,
    pub lock_file: PathBuf,
    pub raw_inputs_dir: PathBuf,
    pub mu_out_dir: PathBuf,
}

pub fn job_paths(job_dir: impl Into<PathBuf>) -> JobPaths {
    let job_dir = job_dir.into();
    JobPaths {
        job_json: job_dir.join("job.json"),
        status_json: job_dir.join("status.json"),
        log_txt: job_dir.join("log.txt"),
        lock_file: job_dir.join(".lock"),
        raw_inputs_dir: job_dir.join("raw_inputs"),
        mu_out_dir: job_dir.join("mu_out"),
        job_dir,
    }
}

fn default_split() -> String {
    "line_window:200".to_string()
}

fn default_source_kind() -> String {
    "file".to_string()
}

fn default_vault_id() -> String {
    "default".to_string()
}

fn default_attempt() -> u32 {
    1
}

/// `job.json`: the immutable description of one import job.
/// Workspace is mandatory: the membership fence requires a scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: String,
    pub workspace_id: String,
    pub inbox_path: String,
    #[serde(default = "default_split")]
    pub split: String,
    #[serde(default = "default_source_kind")]
    pub source_kind: String,
    #[serde(default = "default_vault_id")]
    pub vault_id: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
    #[serde(default = "default_attempt")]
    pub attempt: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetrics {
    pub ingested_files: usize,
    pub written_mus: usize,
    #[serde(default)]
    pub validated: Option<Value>,
    pub membership_added: usize,
    pub membership_skipped: usize,
    pub ingested_mu_files: usize,
    #[serde(default)]
    pub indexed: Option<usize>,
}

/// `status.json`: mutable job state, rewritten at each step transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub workspace_id: String,
    /// queued | running | done | failed
    pub status: String,
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub metrics: JobMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_inputs_provenance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_ingest: Option<Value>,
}

/// Read JSON tolerating a BOM (files may come from Windows editors).
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let text = text.trim_start_matches('\u{feff}');
    serde_json::from_str(text).with_context(|| format!("parsing {}", path.display()))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", serde_json::to_string_pretty(value)?))?;
    Ok(())
}

/// Append one line to the job log.
pub fn append_log(log_path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(log_path)?;
    writeln!(file, "{}", line.trim_end())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{JobSpec, job_paths, read_json, write_json};

    #[test]
    fn paths_follow_the_job_dir_layout() {
        let paths = job_paths("/data/jobs/JOB-1");
        assert!(paths.job_json.ends_with("job.json"));
        assert!(paths.lock_file.ends_with(".lock"));
        assert!(paths.mu_out_dir.ends_with("mu_out"));
    }

    #[test]
    fn job_spec_defaults_fill_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(
            &path,
            "\u{feff}{\"job_id\": \"JOB-1\", \"workspace_id\": \"ws\", \"inbox_path\": \"/in\", \"created_at\": \"t\"}",
        )
        .unwrap();

        let job: JobSpec = read_json(&path).unwrap();
        assert_eq!(job.split, "line_window:200");
        assert_eq!(job.vault_id, "default");
        assert_eq!(job.attempt, 1);
        assert!(job.retry_of.is_none());

        write_json(&path, &job).unwrap();
        let again: JobSpec = read_json(&path).unwrap();
        assert_eq!(again.job_id, "JOB-1");
    }
}
