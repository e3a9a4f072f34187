use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use mnemo_config::DataRoot;
use mnemo_index::index_mu_dir;
use mnemo_logger::{JsonlLogger, LogEvent};
use mnemo_membership::{MembershipEventKind, append_membership_events, iter_mu_ids_from_dir};
use mnemo_vault::{MuDocument, ingest_mu_tree, ingest_raw_file, utc_now_iso_z};

use crate::layout::{JobPaths, JobSpec, JobStatus, append_log, job_paths, read_json, write_json};
use crate::lock::{try_lock, unlock};
use crate::packer::MuPacker;

/// File-queue worker: consumes `jobs/<job_id>/` folders and runs the import
/// pipeline step by step, keeping `status.json` and `log.txt` current.
///
/// Steps, strictly ordered:
/// `ingest_raw -> pack_mu -> validate_mu -> assign_membership -> ingest_mu -> index`.
pub struct JobsWorker<'a> {
    data_root: DataRoot,
    packer: &'a dyn MuPacker,
}

impl<'a> JobsWorker<'a> {
    pub fn new(data_root: impl Into<PathBuf>, packer: &'a dyn MuPacker) -> Self {
        Self {
            data_root: DataRoot::new(data_root.into()),
            packer,
        }
    }

    pub fn find_job_dirs(&self) -> Vec<PathBuf> {
        let jobs_root = self.data_root.jobs_root();
        let Ok(entries) = std::fs::read_dir(&jobs_root) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.join("job.json").exists())
            .collect();
        dirs.sort();
        dirs
    }

    /// Process every consumable job once.  Returns true when any job ran.
    pub fn tick(&self) -> bool {
        let mut did_work = false;
        for job_dir in self.find_job_dirs() {
            let status_path = job_dir.join("status.json");
            if let Ok(status) = read_json::<JobStatus>(&status_path) {
                if status.status == "done" || status.status == "failed" {
                    continue;
                }
            }
            match self.consume_one_job(&job_dir) {
                Ok(consumed) => did_work |= consumed,
                Err(err) => warn!(job_dir = %job_dir.display(), error = %err, "job consumption errored"),
            }
        }
        did_work
    }

    /// Poll the jobs directory forever, sleeping between empty ticks.
    pub fn run_loop(&self, poll_seconds: f64) {
        loop {
            if !self.tick() {
                std::thread::sleep(std::time::Duration::from_secs_f64(poll_seconds));
            }
        }
    }

    /// Consume one job under the job lock.  Returns false when the job was
    /// skipped (lock contention or no job.json).
    pub fn consume_one_job(&self, job_dir: &Path) -> Result<bool> {
        let paths = job_paths(job_dir);
        if !paths.job_json.exists() {
            return Ok(false);
        }
        if !try_lock(&paths.lock_file) {
            debug!(job_dir = %job_dir.display(), "job locked by another worker; skipping");
            return Ok(false);
        }

        let outcome = self.run_pipeline(&paths);
        unlock(&paths.lock_file);

        match outcome {
            Ok(job) => {
                let _ = append_log(&paths.log_txt, &format!("[{}] DONE", utc_now_iso_z()));
                self.log_terminal_event(&job.job_id, "job_done", None);
                move_inbox(&job, "done");
                Ok(true)
            }
            Err(err) => {
                let mut status: JobStatus = read_json(&paths.status_json).unwrap_or_else(|_| {
                    placeholder_status(&paths)
                });
                status.status = "failed".to_string();
                status.updated_at = utc_now_iso_z();
                status.last_error = Some(err.to_string());
                let _ = write_json(&paths.status_json, &status);
                let _ = append_log(
                    &paths.log_txt,
                    &format!("[{}] FAILED: {err}", utc_now_iso_z()),
                );
                self.log_terminal_event(&status.job_id, "job_failed", Some(&err.to_string()));
                if let Ok(job) = read_json::<JobSpec>(&paths.job_json) {
                    move_inbox(&job, "failed");
                }
                Ok(true)
            }
        }
    }

    /// Machine-facing terminal-state event under `logs/jobs.jsonl`.
    fn log_terminal_event(&self, job_id: &str, event: &str, error: Option<&str>) {
        let logger = JsonlLogger::new(self.data_root.log_path("jobs"));
        let mut entry = LogEvent::new(event)
            .tool("mnemo-jobs", "0.1")
            .field("job_id", json!(job_id));
        if let Some(error) = error {
            entry = entry.diagnostics(json!({"error": error}));
        }
        if let Err(err) = logger.append(&entry) {
            warn!(error = %err, "jobs log append failed");
        }
    }

    fn run_pipeline(&self, paths: &JobPaths) -> Result<JobSpec> {
        let job: JobSpec = read_json(&paths.job_json)?;
        if job.workspace_id.is_empty() {
            bail!("job missing workspace_id");
        }
        let inbox = PathBuf::from(&job.inbox_path);
        if !inbox.exists() {
            bail!("inbox_path does not exist: {}", inbox.display());
        }

        let now = utc_now_iso_z();
        let mut status = JobStatus {
            job_id: job.job_id.clone(),
            workspace_id: job.workspace_id.clone(),
            status: "running".to_string(),
            step: None,
            created_at: None,
            started_at: Some(now.clone()),
            updated_at: now,
            finished_at: None,
            last_error: None,
            metrics: Default::default(),
            raw_inputs_provenance: None,
            raw_ingest: None,
        };
        write_json(&paths.status_json, &status)?;

        std::fs::create_dir_all(&paths.raw_inputs_dir)?;
        std::fs::create_dir_all(&paths.mu_out_dir)?;

        let vault_root = self.data_root.vault_root(&job.vault_id);

        // 1) ingest_raw (and stage inputs into raw_inputs/ for the packer)
        set_step(paths, &mut status, "ingest_raw")?;
        append_log(
            &paths.log_txt,
            &format!("[{}] ingest_raw from {}", utc_now_iso_z(), inbox.display()),
        )?;
        let mut ingested = Vec::new();
        for entry in WalkDir::new(&inbox).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let result = ingest_raw_file(entry.path(), &vault_root, &job.vault_id, None)
                .with_context(|| format!("ingesting {}", entry.path().display()))?;

            let link_path = paths.raw_inputs_dir.join(entry.file_name());
            if !link_path.exists() {
                match std::fs::hard_link(&result.dest_path, &link_path) {
                    Ok(()) => {
                        status.raw_inputs_provenance = Some("hardlink:vault/raw".to_string());
                    }
                    Err(_) => {
                        std::fs::copy(&result.dest_path, &link_path)?;
                        status.raw_inputs_provenance = Some("copy:vault/raw".to_string());
                    }
                }
            }
            ingested.push(result);
        }
        status.metrics.ingested_files = ingested.len();
        status.raw_ingest = Some(json!({
            "vault_id": job.vault_id,
            "files": ingested
                .iter()
                .map(|r| json!({
                    "dest": r.dest_path.display().to_string(),
                    "sha256": r.sha256,
                    "uri": r.uri,
                }))
                .collect::<Vec<_>>(),
        }));
        write_json(&paths.status_json, &status)?;
        append_log(&paths.log_txt, &format!("ingested_files={}", ingested.len()))?;

        // 2) pack_mu (external collaborator)
        set_step(paths, &mut status, "pack_mu")?;
        let written = self.packer.pack(
            &paths.raw_inputs_dir,
            &paths.mu_out_dir,
            &job.source_kind,
            &job.split,
            &job.vault_id,
            &paths.log_txt,
        )?;
        status.metrics.written_mus = written;
        write_json(&paths.status_json, &status)?;

        // 3) validate_mu (native read-path validation)
        set_step(paths, &mut status, "validate_mu")?;
        let mut checked = 0usize;
        for entry in WalkDir::new(&paths.mu_out_dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file()
                || entry.path().extension().map(|e| e != "mimo").unwrap_or(true)
            {
                continue;
            }
            let mu = MuDocument::from_path(entry.path())
                .with_context(|| format!("loading {}", entry.path().display()))?;
            mu.validate_for_ingest()
                .with_context(|| format!("validating {}", entry.path().display()))?;
            checked += 1;
        }
        status.metrics.validated = Some(json!({"checked": checked, "failed": 0}));
        write_json(&paths.status_json, &status)?;
        append_log(&paths.log_txt, &format!("validated checked={checked} failed=0"))?;

        // 4) assign_membership
        set_step(paths, &mut status, "assign_membership")?;
        let mu_ids = iter_mu_ids_from_dir(&paths.mu_out_dir);
        let assigned = append_membership_events(
            self.data_root.path(),
            &job.workspace_id,
            &mu_ids,
            &format!("job:{}", job.job_id),
            MembershipEventKind::Add,
        )?;
        status.metrics.membership_added = assigned.appended_events;
        status.metrics.membership_skipped = mu_ids.len().saturating_sub(assigned.appended_events);
        write_json(&paths.status_json, &status)?;
        append_log(
            &paths.log_txt,
            &format!(
                "membership_added={} skipped={} workspace={}",
                status.metrics.membership_added,
                status.metrics.membership_skipped,
                job.workspace_id
            ),
        )?;

        // 5) ingest_mu
        set_step(paths, &mut status, "ingest_mu")?;
        let batch = ingest_mu_tree(&paths.mu_out_dir, &vault_root, &job.vault_id, None)?;
        if let Some((path, err)) = batch.errors.first() {
            bail!("mu ingest failed for {}: {err}", path.display());
        }
        status.metrics.ingested_mu_files = batch.ingested.len();
        write_json(&paths.status_json, &status)?;

        // 6) index (full rebuild; the index is derived)
        set_step(paths, &mut status, "index")?;
        let summary = index_mu_dir(
            vault_root.join("mu"),
            self.data_root.index_db(),
            true,
        )?;
        status.metrics.indexed = Some(summary.indexed);
        write_json(&paths.status_json, &status)?;

        status.status = "done".to_string();
        status.step = None;
        status.updated_at = utc_now_iso_z();
        status.finished_at = Some(utc_now_iso_z());
        write_json(&paths.status_json, &status)?;
        info!(job_id = %job.job_id, "job done");
        Ok(job)
    }
}

fn set_step(paths: &JobPaths, status: &mut JobStatus, step: &str) -> Result<()> {
    status.step = Some(step.to_string());
    status.updated_at = utc_now_iso_z();
    write_json(&paths.status_json, status)
}

fn placeholder_status(paths: &JobPaths) -> JobStatus {
    JobStatus {
        job_id: paths
            .job_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        workspace_id: String::new(),
        status: "failed".to_string(),
        step: None,
        created_at: None,
        started_at: None,
        updated_at: utc_now_iso_z(),
        finished_at: None,
        last_error: None,
        metrics: Default::default(),
        raw_inputs_provenance: None,
        raw_ingest: None,
    }
}

/// Move `inbox/<ws>/_queue/<job_id>` to `_done/<job_id>` or
/// `_failed/<job_id>`.  Best-effort; inputs are never deleted.
fn move_inbox(job: &JobSpec, dest_state: &str) {
    let inbox_dir = PathBuf::from(&job.inbox_path);
    if !inbox_dir.exists() {
        return;
    }
    let Some(queue_dir) = inbox_dir.parent() else {
        return;
    };
    if queue_dir.file_name().map(|n| n != "_queue").unwrap_or(true) {
        return;
    }
    let Some(ws_dir) = queue_dir.parent() else {
        return;
    };
    let dest_dir = ws_dir.join(format!("_{dest_state}"));
    let dest = dest_dir.join(inbox_dir.file_name().unwrap_or_default());
    if dest.exists() {
        return;
    }
    if std::fs::create_dir_all(&dest_dir).is_err() {
        return;
    }
    if let Err(err) = std::fs::rename(&inbox_dir, &dest) {
        warn!(from = %inbox_dir.display(), to = %dest.display(), error = %err, "inbox move failed");
    }
}
