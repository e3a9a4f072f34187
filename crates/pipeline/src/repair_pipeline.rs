use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};
use walkdir::WalkDir;

use mnemo_bundle::{BundleRequest, build_bundle, emit_repair_tasks};
use mnemo_index::{index_mu_dir, invalidate_by_mu_ids};
use mnemo_tasks::{RepairContext, TaskSpec, append_task, exec_repair_task};
use mnemo_vault::{VaultRoots, ingest_mu_file, utc_now_iso_z};

use crate::run::{PipelineRun, git_head, new_run_id, write_json_artifact, write_jsonl_artifact};

/// Bundle repair pipeline inputs.
#[derive(Debug, Clone)]
pub struct RepairPipelineOptions {
    pub db_path: PathBuf,
    pub data_root: Option<PathBuf>,
    pub workspace: String,
    pub query: String,
    pub days: u32,
    pub template: String,
    pub target_level: String,
    pub vault_roots: VaultRoots,
    pub raw_manifest_path: Option<PathBuf>,
    pub runs_root: PathBuf,
    /// Re-index `vault/mu` after ingesting fixed MU.
    pub index_db: Option<PathBuf>,
    pub index_reset: bool,
}

fn read_task_specs(tasks_dir: &Path) -> Vec<TaskSpec> {
    let mut specs = Vec::new();
    for entry in WalkDir::new(tasks_dir).max_depth(1).sort_by_file_name() {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(".task_spec.json") {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        match serde_json::from_str::<TaskSpec>(&text) {
            Ok(spec) => specs.push(spec),
            Err(err) => warn!(path = %entry.path().display(), error = %err, "skipping unreadable task spec"),
        }
    }
    specs
}

/// build bundle (raw_quotes) -> emit REPAIR_POINTER tasks -> execute with
/// auto-fix -> ingest fixed MU -> optionally re-index -> run manifest.
///
/// Per-step failures do not abort the run: the run manifest is always
/// written and records what happened.
pub fn run_bundle_repair_pipeline(options: &RepairPipelineOptions) -> Result<PipelineRun> {
    let run_id = new_run_id();
    let run_dir = options.runs_root.join(&run_id);
    std::fs::create_dir_all(&run_dir)?;

    // 1) bundle with evidence backtrace
    let mut request = BundleRequest::new(&options.db_path, &options.workspace, &options.query);
    request.data_root = options.data_root.clone();
    request.days = options.days;
    request.template = options.template.clone();
    request.target_level = options.target_level.clone();
    request.evidence_depth = "raw_quotes".to_string();
    request.vault_roots = Some(options.vault_roots.clone());
    request.raw_manifest_path = options.raw_manifest_path.clone();
    let bundle = build_bundle(&request)?;

    let bundle_path = run_dir.join("bundle.json");
    let bundle_sha = write_json_artifact(&bundle_path, &bundle)?;

    // 2) emit repair tasks
    let tasks_dir = run_dir.join("tasks");
    let emit_summary = emit_repair_tasks(&bundle_path, &tasks_dir)?;
    let tasks = read_task_specs(&tasks_dir);
    let tasks_sha = write_jsonl_artifact(&run_dir.join("tasks.jsonl"), &tasks)?;

    // 3) execute with auto-fix into fixed_mu/
    let fixed_mu_dir = run_dir.join("fixed_mu");
    let ctx = RepairContext {
        vault_roots: options.vault_roots.clone(),
        raw_manifest_path: options.raw_manifest_path.clone(),
        out_mu_dir: Some(fixed_mu_dir.clone()),
    };
    let journal_db = run_dir.join("task_journal.sqlite");
    let journal_ctx = json!({
        "vault_roots": options.vault_roots,
        "raw_manifest": options.raw_manifest_path.as_ref().map(|p| p.display().to_string()),
        "run_id": run_id.clone(),
        "run_dir": run_dir.display().to_string(),
    });

    let mut results = Vec::new();
    for task in &tasks {
        let result = exec_repair_task(task, &ctx);
        if let Err(err) = append_task(&journal_db, task, &result, Some(&journal_ctx)) {
            warn!(task_id = %task.task_id, error = %err, "task journal append failed");
        }
        results.push(result);
    }
    let results_sha = write_jsonl_artifact(&run_dir.join("task_results.jsonl"), &results)?;

    // 4) ingest fixed MU into the default vault
    let mut fixed_mu_ids = Vec::new();
    let mut mu_manifest_path = None;
    if let Some(default_root) = options.vault_roots.get("default") {
        if fixed_mu_dir.exists() {
            for entry in WalkDir::new(&fixed_mu_dir).sort_by_file_name() {
                let Ok(entry) = entry else { continue };
                if !entry.file_type().is_file()
                    || entry.path().extension().map(|e| e != "mimo").unwrap_or(true)
                {
                    continue;
                }
                match ingest_mu_file(entry.path(), default_root, "default", None) {
                    Ok(ingested) => {
                        mu_manifest_path = Some(ingested.manifest_path.display().to_string());
                        fixed_mu_ids.push(ingested.mu_id);
                    }
                    Err(err) => {
                        warn!(path = %entry.path().display(), error = %err, "fixed MU ingest failed");
                    }
                }
            }
        }
    }

    // 5) optional re-index; fixed MU supersede, so dependent views go stale
    let mut index_out = None;
    if let (Some(index_db), Some(default_root)) =
        (&options.index_db, options.vault_roots.get("default"))
    {
        let mu_root = Path::new(default_root).join("mu");
        match index_mu_dir(&mu_root, index_db, options.index_reset) {
            Ok(summary) => {
                let stale = invalidate_by_mu_ids(index_db, &fixed_mu_ids).unwrap_or(0);
                index_out = Some(json!({"indexed": summary.indexed, "views_invalidated": stale}));
            }
            Err(err) => warn!(error = %err, "post-repair indexing failed"),
        }
    }

    // 6) run manifest
    let run_manifest = json!({
        "run_id": run_id.clone(),
        "created_at": utc_now_iso_z(),
        "tool": "bundle_repair_pipeline",
        "tooling": {"repo": "mnemo", "git_head": git_head()},
        "inputs": {
            "db": options.db_path.display().to_string(),
            "workspace": options.workspace,
            "query": options.query,
            "days": options.days,
            "template": options.template,
            "target_level": options.target_level,
            "vault_roots": options.vault_roots,
            "raw_manifest": options.raw_manifest_path.as_ref().map(|p| p.display().to_string()),
        },
        "outputs": {
            "bundle_path": bundle_path.display().to_string(),
            "bundle_sha256": bundle_sha,
            "tasks_dir": tasks_dir.display().to_string(),
            "tasks_sha256": tasks_sha,
            "results_path": run_dir.join("task_results.jsonl").display().to_string(),
            "results_sha256": results_sha,
            "fixed_mu_dir": fixed_mu_dir.display().to_string(),
            "fixed_mu_ids": fixed_mu_ids,
            "mu_manifest_path": mu_manifest_path,
            "index_db": options.index_db.as_ref().map(|p| p.display().to_string()),
            "index_out": index_out,
        },
        "notes": {
            "authoritative": true,
            "emit_tasks_wrote": emit_summary.wrote,
        },
    });
    let run_manifest_path = run_dir.join("run_manifest.json");
    write_json_artifact(&run_manifest_path, &run_manifest)?;
    info!(run_id = %run_id, wrote = emit_summary.wrote, "bundle repair run complete");

    Ok(PipelineRun {
        run_id,
        run_dir,
        run_manifest_path,
    })
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use serde_json::json;

    use mnemo_index::index_mu_dir;
    use mnemo_membership::{MembershipEventKind, append_membership_events};
    use mnemo_vault::{VaultRoots, append_jsonl, read_jsonl, sha256_bytes};

    use super::{RepairPipelineOptions, run_bundle_repair_pipeline};

    struct Fixture {
        options: RepairPipelineOptions,
        vault_root: PathBuf,
    }

    /// An MU whose pointer names a vault path that no longer exists, while
    /// the raw manifest knows the content under a newer path.
    fn fixture(dir: &Path) -> Result<Fixture> {
        let data_root = dir.join("data");
        let vault_root = data_root.join("vaults").join("default");
        let raw_dir = vault_root.join("raw").join("2026").join("03");
        std::fs::create_dir_all(&raw_dir)?;
        std::fs::write(raw_dir.join("notes.txt"), "l1\nl2\n")?;
        let sha = sha256_bytes(b"l1\nl2\n");

        let manifest_path = vault_root.join("manifests").join("raw_manifest.jsonl");
        append_jsonl(
            &manifest_path,
            &json!({"raw_id": sha, "uri": "vault://default/raw/2026/03/notes.txt", "sha256": sha}),
        )?;

        let mu_dir = vault_root.join("mu").join("2026").join("02");
        std::fs::create_dir_all(&mu_dir)?;
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        std::fs::write(
            mu_dir.join("mu_stale.mimo"),
            format!(
                "mu_id: mu_stale\nschema_version: \"1.1\"\ncontent_hash: \"{ch}\"\nidempotency:\n  mu_key: \"{mk}\"\nsummary: meeting notes from the design review\nmeta:\n  time: \"{now}\"\npointer:\n  - type: raw\n    uri: vault://default/raw/2026/02/notes.txt\n    sha256: \"{sha}\"\n    locator:\n      kind: line_range\n      start: 1\n      end: 2\nsnapshot:\n  kind: text\n  payload:\n    text: cached copy\nprivacy:\n  level: private\n",
                ch = sha256_bytes(b"content"),
                mk = sha256_bytes(b"key"),
            ),
        )?;

        let db_path = data_root.join("index").join("meta.sqlite");
        index_mu_dir(vault_root.join("mu"), &db_path, false)?;
        append_membership_events(
            &data_root,
            "ws_notes",
            &["mu_stale".into()],
            "job:test",
            MembershipEventKind::Add,
        )?;

        let options = RepairPipelineOptions {
            db_path: db_path.clone(),
            data_root: Some(data_root.clone()),
            workspace: "ws_notes".to_string(),
            query: "design review".to_string(),
            days: 7,
            template: "time_overview_v1".to_string(),
            target_level: "private".to_string(),
            vault_roots: VaultRoots::from([(
                "default".to_string(),
                vault_root.display().to_string(),
            )]),
            raw_manifest_path: Some(manifest_path),
            runs_root: data_root.join("runs").join("repair"),
            index_db: Some(db_path),
            index_reset: false,
        };
        Ok(Fixture {
            options,
            vault_root,
        })
    }

    #[test]
    fn end_to_end_repairs_ingests_and_reindexes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fixture = fixture(dir.path())?;

        let run = run_bundle_repair_pipeline(&fixture.options)?;
        assert!(run.run_manifest_path.exists());

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&run.run_manifest_path)?)?;
        assert_eq!(manifest["notes"]["emit_tasks_wrote"], 1);

        // auto-fix produced a superseding MU in fixed_mu/
        let fixed_ids = manifest["outputs"]["fixed_mu_ids"].as_array().unwrap();
        assert_eq!(fixed_ids.len(), 1);
        let new_id = fixed_ids[0].as_str().unwrap();
        assert!(new_id.starts_with("mu_migr_"));

        // the fixed MU was ingested into the vault with a manifest line
        let mu_manifest = fixture.vault_root.join("manifests").join("mu_manifest.jsonl");
        let lines = read_jsonl(&mu_manifest)?;
        assert!(lines.iter().any(|l| l["mu_id"] == new_id));

        // re-index picked it up: canonical head of mu_stale is now the fix
        let conn = mnemo_index::connect(&fixture.options.db_path)?;
        let supersedes: String = conn.query_row(
            "SELECT supersedes_json FROM mu WHERE mu_id = ?1",
            [new_id],
            |row| row.get(0),
        )?;
        assert!(supersedes.contains("mu_stale"));
        Ok(())
    }

    #[test]
    fn run_without_repairs_still_writes_run_manifest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut fixture = fixture(dir.path())?;
        // query that matches nothing: no repair tasks, but the run completes
        fixture.options.query = "unrelated topic entirely".to_string();

        let run = run_bundle_repair_pipeline(&fixture.options)?;
        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&run.run_manifest_path)?)?;
        assert_eq!(manifest["notes"]["emit_tasks_wrote"], 0);
        assert_eq!(
            manifest["outputs"]["fixed_mu_ids"].as_array().unwrap().len(),
            0
        );
        Ok(())
    }
}
