use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::warn;

use mnemo_vault::{MuDocument, VaultRoots, is_sha256_form, repair_suggest_by_sha256};

use crate::protocol::{TaskOutput, TaskResult, TaskSpec, TaskStatus, diagnostic};

/// Execution context for repair tasks.
#[derive(Debug, Clone, Default)]
pub struct RepairContext {
    pub vault_roots: VaultRoots,
    pub raw_manifest_path: Option<PathBuf>,
    /// When set (together with `params.mu_path`), a suggestion is applied by
    /// writing a superseding MU here.  The original MU is never modified.
    pub out_mu_dir: Option<PathBuf>,
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// `mu_migr_<YYYYMMDDHHMMSS>_<10hex>`, hex derived from time + source path.
fn new_migrated_mu_id(mu_path: &str) -> String {
    let ts = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let mut hasher = Sha256::new();
    hasher.update(format!("{ts}:{mu_path}").as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!("mu_migr_{ts}_{}", &hex[..10])
}

/// Write a superseding MU with the migrated pointer uri.
fn auto_fix(
    mu_path: &str,
    mu_id: &str,
    sha256: &str,
    suggested_uri: &str,
    out_mu_dir: &Path,
) -> Result<(String, PathBuf, usize), String> {
    let mut mu = MuDocument::from_path(mu_path).map_err(|e| e.to_string())?;
    let changed = mu.rewrite_pointer_uris(sha256, suggested_uri);
    mu.push_supersedes(mu_id);
    let new_id = new_migrated_mu_id(mu_path);
    mu.set_mu_id(&new_id);

    std::fs::create_dir_all(out_mu_dir).map_err(|e| e.to_string())?;
    let out_path = out_mu_dir.join(format!("{new_id}.mimo"));
    let yaml = mu.to_yaml_string().map_err(|e| e.to_string())?;
    std::fs::write(&out_path, yaml).map_err(|e| e.to_string())?;
    Ok((new_id, out_path, changed))
}

fn exec_repair_pointer(task: &TaskSpec, ctx: &RepairContext) -> TaskResult {
    let start = Instant::now();

    let Some(mu_id) = task.param_str("mu_id").filter(|s| !s.is_empty()) else {
        return TaskResult::new(
            &task.task_id,
            TaskStatus::Error,
            vec![],
            vec![diagnostic("E_TASK", "missing params.mu_id")],
            elapsed_ms(start),
        );
    };
    let Some(sha256) = task.param_str("sha256").filter(|s| is_sha256_form(s)) else {
        return TaskResult::new(
            &task.task_id,
            TaskStatus::Error,
            vec![],
            vec![diagnostic("E_TASK", "missing/invalid params.sha256")],
            elapsed_ms(start),
        );
    };
    let uri = task.param_str("uri");
    let mu_path = task.param_str("mu_path");

    let suggested_uri = ctx.raw_manifest_path.as_ref().and_then(|manifest| {
        repair_suggest_by_sha256(manifest, sha256)
            .map_err(|err| {
                warn!(error = %err, "raw manifest lookup failed");
                err
            })
            .ok()
            .flatten()
    });

    let mut outputs = vec![TaskOutput {
        kind: "REPORT".to_string(),
        id: None,
        uri: None,
        meta: Some(json!({
            "mu_id": mu_id,
            "sha256": sha256,
            "suggested_uri": suggested_uri,
        })),
    }];
    let mut diags: Vec<Value> = Vec::new();

    let status = match &suggested_uri {
        Some(suggested) if Some(suggested.as_str()) != uri => {
            diags.push(json!({
                "code": "SUGGEST_POINTER_URI",
                "msg": format!("suggest pointer uri by sha256: {suggested}"),
                "mu_id": mu_id,
                "sha256": sha256,
                "old_uri": uri,
                "suggested_uri": suggested,
            }));

            if let (Some(out_mu_dir), Some(mu_path)) = (&ctx.out_mu_dir, mu_path) {
                match auto_fix(mu_path, mu_id, sha256, suggested, out_mu_dir) {
                    Ok((new_id, out_path, changed)) => {
                        outputs.push(TaskOutput {
                            kind: "MU".to_string(),
                            id: Some(new_id.clone()),
                            uri: Some(out_path.display().to_string()),
                            meta: Some(json!({
                                "supersedes": mu_id,
                                "changed_pointers": changed,
                            })),
                        });
                        diags.push(json!({
                            "code": "AUTO_FIXED",
                            "msg": "wrote superseding MU with migrated pointer",
                            "new_mu_id": new_id,
                            "new_mu_path": out_path.display().to_string(),
                        }));
                    }
                    Err(err) => diags.push(diagnostic("AUTO_FIX_FAILED", err)),
                }
            }
            TaskStatus::Ok
        }
        Some(_) => TaskStatus::Ok,
        None => {
            diags.push(json!({
                "code": "NO_SUGGESTION",
                "msg": "no suggestion found (missing raw_manifest_path or sha256 not present)",
                "mu_id": mu_id,
                "sha256": sha256,
                "old_uri": uri,
            }));
            TaskStatus::Partial
        }
    };

    TaskResult::new(&task.task_id, status, outputs, diags, elapsed_ms(start))
}

/// Execute one repair task.  Only `REPAIR_POINTER` is supported.
pub fn exec_repair_task(task: &TaskSpec, ctx: &RepairContext) -> TaskResult {
    match task.task_type.as_str() {
        "REPAIR_POINTER" => exec_repair_pointer(task, ctx),
        other => TaskResult::new(
            &task.task_id,
            TaskStatus::Error,
            vec![],
            vec![diagnostic("E_TASK", format!("unsupported task type: {other}"))],
            0,
        ),
    }
}
