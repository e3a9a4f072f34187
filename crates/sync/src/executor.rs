use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use mnemo_tasks::{TaskOutput, TaskResult, TaskSpec, TaskStatus, diagnostic, load_task};
use mnemo_vault::{VaultRoots, verify_manifest};

use crate::plan::{apply_plan, plan_patch};
use crate::report::ManifestKind;

/// Execution context for manifest sync tasks.
#[derive(Debug, Clone, Default)]
pub struct SyncExecContext {
    pub vault_roots: VaultRoots,
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn exec_verify_manifest(task: &TaskSpec, ctx: &SyncExecContext) -> TaskResult {
    let start = Instant::now();
    let Some(manifest_path) = task.param_str("manifest_path") else {
        return TaskResult::new(
            &task.task_id,
            TaskStatus::Error,
            vec![],
            vec![diagnostic("E_TASK", "missing params.manifest_path")],
            elapsed_ms(start),
        );
    };

    let (status, diags) = match verify_manifest(manifest_path, &ctx.vault_roots) {
        Ok(issues) if issues.is_empty() => (TaskStatus::Ok, vec![]),
        Ok(issues) => (
            TaskStatus::Error,
            issues
                .into_iter()
                .map(|i| diagnostic("E_VERIFY", i.message))
                .collect(),
        ),
        Err(err) => (
            TaskStatus::Error,
            vec![diagnostic("E_VERIFY", err.to_string())],
        ),
    };

    TaskResult::new(
        &task.task_id,
        status,
        vec![TaskOutput {
            kind: "REPORT".to_string(),
            id: None,
            uri: None,
            meta: Some(json!({"manifest": manifest_path})),
        }],
        diags,
        elapsed_ms(start),
    )
}

fn first_uri(records: Option<&Value>) -> Option<String> {
    records?
        .as_array()?
        .iter()
        .find_map(|r| r.get("uri").and_then(Value::as_str))
        .map(str::to_string)
}

/// Suggestion-only executor: reports the preferred uri for a sha seen under
/// several uris.  Nothing is rewritten.
fn exec_repair_manifest_uri(task: &TaskSpec) -> TaskResult {
    let start = Instant::now();
    let Some(sha256) = task.param_str("sha256") else {
        return TaskResult::new(
            &task.task_id,
            TaskStatus::Error,
            vec![],
            vec![diagnostic("E_TASK", "missing params.sha256")],
            elapsed_ms(start),
        );
    };

    let base_uri = first_uri(task.params.get("base_records"));
    let incoming_uri = first_uri(task.params.get("incoming_records"));
    let preferred = if task.param_str("policy") == Some("prefer_base_uri") {
        base_uri.clone()
    } else {
        incoming_uri.clone()
    };
    let observed: Vec<&String> = [&base_uri, &incoming_uri]
        .into_iter()
        .flatten()
        .collect();

    TaskResult::new(
        &task.task_id,
        TaskStatus::Ok,
        vec![TaskOutput {
            kind: "REPORT".to_string(),
            id: None,
            uri: None,
            meta: Some(json!({"sha256": sha256, "preferred_uri": preferred})),
        }],
        vec![json!({
            "code": "SUGGEST_URI_ALIAS",
            "msg": format!("sha256={sha256} observed uris={observed:?} preferred={preferred:?}"),
            "sha256": sha256,
            "observed": observed,
            "preferred": preferred,
        })],
        elapsed_ms(start),
    )
}

fn exec_sync_manifest_apply(task: &TaskSpec) -> TaskResult {
    let start = Instant::now();
    let kind = task.param_str("kind").and_then(|k| k.parse::<ManifestKind>().ok());
    let base_path = task.param_str("base_path");
    let incoming_path = task.param_str("incoming_path");
    let (Some(kind), Some(base_path), Some(incoming_path)) = (kind, base_path, incoming_path)
    else {
        return TaskResult::new(
            &task.task_id,
            TaskStatus::Error,
            vec![],
            vec![diagnostic("E_TASK", "missing kind/base_path/incoming_path")],
            elapsed_ms(start),
        );
    };
    let dry_run = task
        .params
        .get("dry_run")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let mut plan = match plan_patch(kind, base_path, incoming_path) {
        Ok(plan) => plan,
        Err(err) => {
            return TaskResult::new(
                &task.task_id,
                TaskStatus::Error,
                vec![],
                vec![diagnostic("E_PLAN", err.to_string())],
                elapsed_ms(start),
            );
        }
    };
    plan.dry_run = dry_run;

    if !dry_run {
        if let Err(err) = apply_plan(&plan) {
            return TaskResult::new(
                &task.task_id,
                TaskStatus::Error,
                vec![],
                vec![diagnostic("E_APPLY", err.to_string())],
                elapsed_ms(start),
            );
        }
    }

    // Persist the plan artifact: explicit out_dir, else beside the base manifest.
    let out_path = match task.param_str("out_dir").filter(|d| !d.trim().is_empty()) {
        Some(out_dir) => {
            let name = Path::new(base_path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "manifest".to_string());
            PathBuf::from(out_dir).join(format!("{name}.patch_plan.json"))
        }
        None => Path::new(base_path).with_extension("patch_plan.json"),
    };
    let write = (|| -> Result<()> {
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&out_path, serde_json::to_string_pretty(&plan)? + "\n")?;
        Ok(())
    })();
    if let Err(err) = write {
        return TaskResult::new(
            &task.task_id,
            TaskStatus::Error,
            vec![],
            vec![diagnostic("E_PLAN", format!("writing plan: {err}"))],
            elapsed_ms(start),
        );
    }

    TaskResult::new(
        &task.task_id,
        TaskStatus::Ok,
        vec![TaskOutput {
            kind: "FILE".to_string(),
            id: None,
            uri: Some(out_path.display().to_string()),
            meta: Some(json!({"dry_run": dry_run})),
        }],
        vec![],
        elapsed_ms(start),
    )
}

/// Execute one manifest sync task.
pub fn exec_manifest_task(task: &TaskSpec, ctx: &SyncExecContext) -> TaskResult {
    match task.task_type.as_str() {
        "VERIFY_MANIFEST" => exec_verify_manifest(task, ctx),
        "REPAIR_MANIFEST_URI" => exec_repair_manifest_uri(task),
        "SYNC_MANIFEST_APPLY" => exec_sync_manifest_apply(task),
        other => TaskResult::new(
            &task.task_id,
            TaskStatus::Error,
            vec![],
            vec![diagnostic("E_TASK", format!("unsupported task type: {other}"))],
            0,
        ),
    }
}

/// Re-execute a journaled manifest task with its recorded vault_roots.
pub fn replay_manifest_task(
    journal_db: impl AsRef<Path>,
    task_id: &str,
) -> Result<TaskResult> {
    let (spec_json, _result, context) = load_task(journal_db, task_id)?;
    let spec: TaskSpec =
        serde_json::from_value(spec_json).context("journaled spec is not a TaskSpec")?;

    let mut ctx = SyncExecContext::default();
    if let Some(roots) = context
        .as_ref()
        .and_then(|c| c.get("vault_roots"))
        .and_then(Value::as_object)
    {
        for (vault_id, root) in roots {
            if let Some(root) = root.as_str() {
                ctx.vault_roots.insert(vault_id.clone(), root.to_string());
            }
        }
    }
    Ok(exec_manifest_task(&spec, &ctx))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use mnemo_tasks::{TaskStatus, append_task};
    use mnemo_vault::{VaultRoots, append_jsonl, read_jsonl, sha256_bytes};

    use crate::report::{ManifestKind, analyze_sync};
    use crate::tasks::tasks_from_report;

    use super::{SyncExecContext, exec_manifest_task, replay_manifest_task};

    #[test]
    fn verify_task_reports_sha_mismatches() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let raw_dir = dir.path().join("raw").join("2026").join("02");
        std::fs::create_dir_all(&raw_dir)?;
        std::fs::write(raw_dir.join("a.txt"), "current")?;

        let manifest = dir.path().join("raw_manifest.jsonl");
        append_jsonl(
            &manifest,
            &json!({"uri": "vault://default/raw/2026/02/a.txt", "sha256": sha256_bytes(b"stale")}),
        )?;

        let report = analyze_sync(ManifestKind::Raw, &manifest, &manifest)?;
        let tasks = tasks_from_report(&report);
        let verify = &tasks[0];

        let ctx = SyncExecContext {
            vault_roots: VaultRoots::from([(
                "default".to_string(),
                dir.path().display().to_string(),
            )]),
        };
        let result = exec_manifest_task(verify, &ctx);
        assert_eq!(result.status, TaskStatus::Error);
        assert_eq!(result.diagnostics[0]["code"], "E_VERIFY");
        Ok(())
    }

    #[test]
    fn apply_task_dry_run_writes_plan_without_touching_base() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("base.jsonl");
        let incoming = dir.path().join("incoming.jsonl");
        append_jsonl(&base, &json!({"raw_id": "sha256:aa", "uri": "u1", "sha256": "sha256:aa"}))?;
        append_jsonl(&incoming, &json!({"raw_id": "sha256:bb", "uri": "u2", "sha256": "sha256:bb"}))?;

        let report = analyze_sync(ManifestKind::Raw, &base, &incoming)?;
        let mut tasks = tasks_from_report(&report);
        let apply = tasks.last_mut().unwrap();
        apply.params["out_dir"] = json!(dir.path().join("plans").display().to_string());

        let result = exec_manifest_task(apply, &SyncExecContext::default());
        assert_eq!(result.status, TaskStatus::Ok);
        let plan_path = result.outputs[0].uri.as_deref().unwrap();
        assert!(std::path::Path::new(plan_path).exists());
        assert_eq!(read_jsonl(&base)?.len(), 1);
        Ok(())
    }

    #[test]
    fn apply_task_with_dry_run_false_appends_new_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("base.jsonl");
        let incoming = dir.path().join("incoming.jsonl");
        append_jsonl(&base, &json!({"raw_id": "sha256:aa", "uri": "u1", "sha256": "sha256:aa"}))?;
        append_jsonl(&incoming, &json!({"raw_id": "sha256:bb", "uri": "u2", "sha256": "sha256:bb"}))?;

        let report = analyze_sync(ManifestKind::Raw, &base, &incoming)?;
        let mut tasks = tasks_from_report(&report);
        let apply = tasks.last_mut().unwrap();
        apply.params["dry_run"] = json!(false);
        apply.params["out_dir"] = json!(dir.path().join("plans").display().to_string());

        let result = exec_manifest_task(apply, &SyncExecContext::default());
        assert_eq!(result.status, TaskStatus::Ok);
        assert_eq!(read_jsonl(&base)?.len(), 2);
        Ok(())
    }

    #[test]
    fn journaled_task_replays_with_recorded_roots() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("base.jsonl");
        let incoming = dir.path().join("incoming.jsonl");
        std::fs::write(&base, "")?;
        std::fs::write(&incoming, "")?;

        let report = analyze_sync(ManifestKind::Raw, &base, &incoming)?;
        let tasks = tasks_from_report(&report);
        let apply = tasks.last().unwrap();
        let mut apply = apply.clone();
        apply.params["out_dir"] = json!(dir.path().join("plans").display().to_string());

        let result = exec_manifest_task(&apply, &SyncExecContext::default());
        let journal = dir.path().join("journal.sqlite");
        append_task(&journal, &apply, &result, Some(&json!({"vault_roots": {}})))?;

        let replayed = replay_manifest_task(&journal, &apply.task_id)?;
        assert_eq!(replayed.status, TaskStatus::Ok);
        Ok(())
    }
}
