use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use mnemo_config::DataRoot;

use crate::layout::{JobStatus, read_json};

/// One row of `jobs list` output.
#[derive(Debug, Clone, Serialize)]
pub struct JobListing {
    pub job_id: String,
    pub workspace_id: Option<String>,
    pub status: Option<String>,
    pub step: Option<String>,
    pub updated_at: Option<String>,
    /// A `.lock` file is present: either a live worker or a stale lock
    /// awaiting manual removal.
    pub locked: bool,
}

/// Tabulate every job folder's status (sorted by job id).
pub fn list_jobs(data_root: impl AsRef<Path>) -> Result<Vec<JobListing>> {
    let data_root = DataRoot::new(data_root.as_ref());
    let jobs_root = data_root.jobs_root();
    if !jobs_root.exists() {
        return Ok(Vec::new());
    }

    let mut job_dirs: Vec<_> = std::fs::read_dir(&jobs_root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    job_dirs.sort();

    let mut listings = Vec::new();
    for job_dir in job_dirs {
        let job_id = job_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let status = read_json::<JobStatus>(&job_dir.join("status.json")).ok();
        listings.push(JobListing {
            job_id,
            workspace_id: status.as_ref().map(|s| s.workspace_id.clone()),
            status: status.as_ref().map(|s| s.status.clone()),
            step: status.as_ref().and_then(|s| s.step.clone()),
            updated_at: status.as_ref().map(|s| s.updated_at.clone()),
            locked: job_dir.join(".lock").exists(),
        });
    }
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::import::import_job;
    use crate::lock::try_lock;

    use super::list_jobs;

    #[test]
    fn lists_jobs_with_status_and_lock_state() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "x")?;
        let data_root = dir.path().join("data");
        import_job(&data_root, "ws", &input, "s", "file", "default", Some("JOB-A"))?;
        import_job(&data_root, "ws", &input, "s", "file", "default", Some("JOB-B"))?;
        assert!(try_lock(&data_root.join("jobs").join("JOB-B").join(".lock")));

        let listings = list_jobs(&data_root)?;
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].job_id, "JOB-A");
        assert_eq!(listings[0].status.as_deref(), Some("queued"));
        assert!(!listings[0].locked);
        assert!(listings[1].locked);
        Ok(())
    }

    #[test]
    fn empty_data_root_lists_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(list_jobs(dir.path())?.is_empty());
        Ok(())
    }
}
