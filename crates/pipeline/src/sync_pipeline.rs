use std::path::PathBuf;

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};

use mnemo_sync::{SyncExecContext, analyze_sync, exec_manifest_task, tasks_from_report};
use mnemo_sync::report::ManifestKind;
use mnemo_tasks::append_task;
use mnemo_vault::{VaultRoots, sha256_file, utc_now_iso_z};

use crate::run::{PipelineRun, git_head, new_run_id, write_json_artifact, write_jsonl_artifact};

/// Manifest sync pipeline inputs.
#[derive(Debug, Clone)]
pub struct SyncPipelineOptions {
    pub kind: ManifestKind,
    pub base_path: PathBuf,
    pub incoming_path: PathBuf,
    pub vault_roots: VaultRoots,
    pub runs_root: PathBuf,
    /// Append safe new records for real; otherwise everything stays dry-run.
    pub apply: bool,
}

/// report -> tasks -> execute -> run manifest, all under one run dir.
///
/// Execution stays conservative: SYNC_MANIFEST_APPLY is forced dry-run
/// unless `apply` is set, and its patch plan lands under `patch_plans/`.
pub fn run_manifest_sync_pipeline(options: &SyncPipelineOptions) -> Result<PipelineRun> {
    let run_id = new_run_id();
    let run_dir = options.runs_root.join(&run_id);
    std::fs::create_dir_all(&run_dir)?;
    let kind = options.kind.as_str();

    // 1) report
    let report = analyze_sync(options.kind, &options.base_path, &options.incoming_path)?;
    let report_path = run_dir.join(format!("sync_report.{kind}.json"));
    let report_sha = write_json_artifact(&report_path, &report)?;

    // 2) tasks
    let patch_plans_dir = run_dir.join("patch_plans");
    std::fs::create_dir_all(&patch_plans_dir)?;
    let mut tasks = tasks_from_report(&report);
    for task in &mut tasks {
        if task.task_type == "SYNC_MANIFEST_APPLY" {
            task.params["dry_run"] = json!(!options.apply);
            task.params["out_dir"] = json!(patch_plans_dir.display().to_string());
        }
    }
    let tasks_path = run_dir.join(format!("tasks.{kind}.jsonl"));
    let tasks_sha = write_jsonl_artifact(&tasks_path, &tasks)?;

    // 3) execute, journaling each task
    let journal_db = run_dir.join("task_journal.sqlite");
    let ctx = SyncExecContext {
        vault_roots: options.vault_roots.clone(),
    };
    let mut results = Vec::new();
    for task in &tasks {
        let result = exec_manifest_task(task, &ctx);
        if let Err(err) = append_task(&journal_db, task, &result, None) {
            // journal failure should not break execution
            warn!(task_id = %task.task_id, error = %err, "task journal append failed");
        }
        results.push(result);
    }
    let results_path = run_dir.join(format!("task_results.{kind}.jsonl"));
    let results_sha = write_jsonl_artifact(&results_path, &results)?;

    // 4) run manifest
    let file_sha = |path: &std::path::Path| sha256_file(path).ok();
    let run_manifest = json!({
        "run_id": run_id.clone(),
        "created_at": utc_now_iso_z(),
        "tool": "manifest_pipeline",
        "kind": kind,
        "tooling": {"repo": "mnemo", "git_head": git_head()},
        "inputs": {
            "base_path": options.base_path.display().to_string(),
            "incoming_path": options.incoming_path.display().to_string(),
            "base_sha256": file_sha(&options.base_path),
            "incoming_sha256": file_sha(&options.incoming_path),
            "vault_roots": options.vault_roots,
        },
        "outputs": {
            "report_path": report_path.display().to_string(),
            "report_sha256": report_sha,
            "tasks_path": tasks_path.display().to_string(),
            "tasks_sha256": tasks_sha,
            "results_path": results_path.display().to_string(),
            "results_sha256": results_sha,
        },
        "notes": {
            "authoritative": true,
            "apply": options.apply,
        },
    });
    let run_manifest_path = run_dir.join("run_manifest.json");
    write_json_artifact(&run_manifest_path, &run_manifest)?;
    info!(run_id = %run_id, "manifest sync run complete");

    Ok(PipelineRun {
        run_id,
        run_dir,
        run_manifest_path,
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use mnemo_sync::report::ManifestKind;
    use mnemo_vault::{VaultRoots, append_jsonl, read_jsonl};

    use super::{SyncPipelineOptions, run_manifest_sync_pipeline};

    fn options(dir: &std::path::Path, apply: bool) -> Result<SyncPipelineOptions> {
        let base = dir.join("base.jsonl");
        let incoming = dir.join("incoming.jsonl");
        append_jsonl(&base, &json!({"raw_id": "sha256:aa", "uri": "u1", "sha256": "sha256:aa"}))?;
        append_jsonl(&incoming, &json!({"raw_id": "sha256:bb", "uri": "u2", "sha256": "sha256:bb"}))?;
        Ok(SyncPipelineOptions {
            kind: ManifestKind::Raw,
            base_path: base,
            incoming_path: incoming,
            vault_roots: VaultRoots::new(),
            runs_root: dir.join("runs").join("sync"),
            apply,
        })
    }

    #[test]
    fn dry_run_writes_all_artifacts_without_touching_base() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let options = options(dir.path(), false)?;

        let run = run_manifest_sync_pipeline(&options)?;
        assert!(run.run_manifest_path.exists());
        assert!(run.run_dir.join("sync_report.raw.json").exists());
        assert!(run.run_dir.join("tasks.raw.jsonl").exists());
        assert!(run.run_dir.join("task_results.raw.jsonl").exists());
        assert!(run.run_dir.join("task_journal.sqlite").exists());
        // patch plan artifact landed under the run dir
        assert!(
            std::fs::read_dir(run.run_dir.join("patch_plans"))?
                .next()
                .is_some()
        );

        assert_eq!(read_jsonl(&options.base_path)?.len(), 1);

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&run.run_manifest_path)?)?;
        assert!(
            manifest["outputs"]["report_sha256"]
                .as_str()
                .unwrap()
                .starts_with("sha256:")
        );
        assert_eq!(manifest["notes"]["apply"], false);
        Ok(())
    }

    #[test]
    fn apply_appends_new_records_append_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let options = options(dir.path(), true)?;
        let before = std::fs::read_to_string(&options.base_path)?;

        run_manifest_sync_pipeline(&options)?;

        let after = std::fs::read_to_string(&options.base_path)?;
        assert!(after.starts_with(&before));
        assert_eq!(read_jsonl(&options.base_path)?.len(), 2);
        Ok(())
    }
}
