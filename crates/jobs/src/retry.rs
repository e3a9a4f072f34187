use std::path::Path;

use anyhow::{Result, bail};
use chrono::Utc;
use serde::Serialize;

use mnemo_config::DataRoot;
use mnemo_vault::utc_now_iso_z;

use crate::layout::{JobMetrics, JobSpec, JobStatus, job_paths, read_json, write_json};

#[derive(Debug, Clone, Serialize)]
pub struct RetryResult {
    pub data_root: String,
    pub old_job_id: String,
    pub new_job_id: String,
    pub old_job_dir: String,
    pub new_job_dir: String,
}

fn default_retry_job_id() -> String {
    Utc::now().format("JOB-RETRY-%Y%m%d-%H%M%S").to_string()
}

/// Retry a job by creating a *new* job (append-only): the new job carries
/// `retry_of` and `attempt + 1`; the old job folder is preserved for audit.
///
/// The new job points at the same inbox path by default; after a terminal
/// disposition the operator may need to move inputs back from `_failed`.
pub fn retry_job(
    data_root: impl AsRef<Path>,
    old_job_id: &str,
    new_job_id: Option<&str>,
) -> Result<RetryResult> {
    let data_root = DataRoot::new(data_root.as_ref());
    let old_job_dir = data_root.job_dir(old_job_id);
    let old_job_json = old_job_dir.join("job.json");
    if !old_job_json.exists() {
        bail!("missing job.json: {}", old_job_json.display());
    }
    let old_job: JobSpec = read_json(&old_job_json)?;

    let new_job_id = new_job_id
        .map(str::to_string)
        .unwrap_or_else(default_retry_job_id);
    let new_job_dir = data_root.job_dir(&new_job_id);
    if new_job_dir.exists() {
        bail!("new job dir already exists: {}", new_job_dir.display());
    }

    let now = utc_now_iso_z();
    let new_job = JobSpec {
        job_id: new_job_id.clone(),
        retry_of: Some(old_job_id.to_string()),
        attempt: old_job.attempt + 1,
        created_at: now.clone(),
        ..old_job
    };
    let paths = job_paths(&new_job_dir);
    write_json(&paths.job_json, &new_job)?;

    let status = JobStatus {
        job_id: new_job_id.clone(),
        workspace_id: new_job.workspace_id.clone(),
        status: "queued".to_string(),
        step: None,
        created_at: Some(now.clone()),
        started_at: None,
        updated_at: now,
        finished_at: None,
        last_error: None,
        metrics: JobMetrics::default(),
        raw_inputs_provenance: None,
        raw_ingest: None,
    };
    write_json(&paths.status_json, &status)?;

    Ok(RetryResult {
        data_root: data_root.path().display().to_string(),
        old_job_id: old_job_id.to_string(),
        new_job_id,
        old_job_dir: old_job_dir.display().to_string(),
        new_job_dir: new_job_dir.display().to_string(),
    })
}
