use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use walkdir::WalkDir;

use mnemo_config::DataRoot;
use mnemo_vault::utc_now_iso_z;

use crate::layout::{JobMetrics, JobSpec, JobStatus, job_paths, write_json};

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub job_id: String,
    pub data_root: String,
    pub workspace_id: String,
    pub inbox_path: String,
    pub job_dir: String,
}

/// Readable, unique enough for local use.
pub fn default_job_id() -> String {
    Utc::now().format("JOB-%Y%m%d-%H%M%S").to_string()
}

fn copy_into(src: &Path, dst_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dst_dir)?;
    if src.is_file() {
        let name = src
            .file_name()
            .with_context(|| format!("input has no file name: {}", src.display()))?;
        std::fs::copy(src, dst_dir.join(name))?;
        return Ok(());
    }
    if src.is_dir() {
        let target = dst_dir.join(src.file_name().unwrap_or_default());
        if target.exists() {
            bail!("target already exists: {}", target.display());
        }
        for entry in WalkDir::new(src) {
            let entry = entry?;
            let rel = entry.path().strip_prefix(src)?;
            let dest = target.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&dest)?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &dest)?;
            }
        }
        return Ok(());
    }
    bail!("missing input: {}", src.display())
}

/// Enqueue a job from a file or folder: copy the input into
/// `inbox/<ws>/_queue/<job_id>/` and create the job folder with a queued
/// status.  The pipeline itself runs later, in the worker.
pub fn import_job(
    data_root: impl AsRef<Path>,
    workspace_id: &str,
    input: impl AsRef<Path>,
    split: &str,
    source_kind: &str,
    vault_id: &str,
    job_id: Option<&str>,
) -> Result<ImportResult> {
    let data_root = DataRoot::new(data_root.as_ref());
    let input = input.as_ref();
    if !input.exists() {
        bail!("missing input: {}", input.display());
    }

    let job_id = job_id.map(str::to_string).unwrap_or_else(default_job_id);
    let inbox_dir = data_root.inbox_queue_dir(workspace_id, &job_id);
    let job_dir = data_root.job_dir(&job_id);
    if job_dir.exists() {
        bail!("job dir already exists: {}", job_dir.display());
    }

    copy_into(input, &inbox_dir)?;

    let paths = job_paths(&job_dir);
    let now = utc_now_iso_z();
    let job = JobSpec {
        job_id: job_id.clone(),
        workspace_id: workspace_id.to_string(),
        inbox_path: inbox_dir.display().to_string(),
        split: split.to_string(),
        source_kind: source_kind.to_string(),
        vault_id: vault_id.to_string(),
        created_at: now.clone(),
        retry_of: None,
        attempt: 1,
    };
    write_json(&paths.job_json, &job)?;

    let status = JobStatus {
        job_id: job_id.clone(),
        workspace_id: workspace_id.to_string(),
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

    Ok(ImportResult {
        job_id,
        data_root: data_root.path().display().to_string(),
        workspace_id: workspace_id.to_string(),
        inbox_path: inbox_dir.display().to_string(),
        job_dir: job_dir.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::layout::{JobSpec, JobStatus, read_json};

    use super::import_job;

    #[test]
    fn import_copies_input_and_creates_queued_job() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("note.txt");
        std::fs::write(&input, "hello")?;
        let data_root = dir.path().join("data");

        let result = import_job(
            &data_root,
            "ws_inbox",
            &input,
            "line_window:200",
            "file",
            "default",
            Some("JOB-TEST-1"),
        )?;
        assert_eq!(result.job_id, "JOB-TEST-1");

        let inbox_file = data_root
            .join("inbox")
            .join("ws_inbox")
            .join("_queue")
            .join("JOB-TEST-1")
            .join("note.txt");
        assert!(inbox_file.exists());

        let job: JobSpec =
            read_json(&data_root.join("jobs").join("JOB-TEST-1").join("job.json"))?;
        assert_eq!(job.workspace_id, "ws_inbox");
        let status: JobStatus =
            read_json(&data_root.join("jobs").join("JOB-TEST-1").join("status.json"))?;
        assert_eq!(status.status, "queued");
        Ok(())
    }

    #[test]
    fn import_directory_copies_the_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("batch");
        std::fs::create_dir_all(input.join("sub"))?;
        std::fs::write(input.join("a.txt"), "a")?;
        std::fs::write(input.join("sub").join("b.txt"), "b")?;

        let data_root = dir.path().join("data");
        let result = import_job(
            &data_root,
            "ws",
            &input,
            "line_window:200",
            "file",
            "default",
            Some("JOB-DIR"),
        )?;
        let copied = std::path::Path::new(&result.inbox_path)
            .join("batch")
            .join("sub")
            .join("b.txt");
        assert!(copied.exists());
        Ok(())
    }

    #[test]
    fn duplicate_job_id_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("note.txt");
        std::fs::write(&input, "x")?;
        let data_root = dir.path().join("data");

        import_job(&data_root, "ws", &input, "s", "file", "default", Some("JOB-X"))?;
        assert!(
            import_job(&data_root, "ws", &input, "s", "file", "default", Some("JOB-X")).is_err()
        );
        Ok(())
    }
}
