use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use mnemo_tasks::{TaskInput, TaskSpec};
use mnemo_vault::utc_now_iso_z;

#[derive(Debug, Clone)]
pub struct EmitSummary {
    pub wrote: usize,
    pub out_dir: PathBuf,
}

fn idempotency_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

fn repair_task_id(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    let ts = Utc::now().format("%Y%m%d%H%M%S");
    format!("t_repair_pointer_{ts}_{}", &hex[..16])
}

/// Convert `diagnostics.repair_tasks` trigger signals inside a bundle into
/// concrete TaskSpec JSON files (append-only artifacts), one per trigger.
///
/// The idempotency key is deterministic over (mu_id, sha256, uri) so
/// re-emitting the same bundle does not multiply work.
pub fn emit_repair_tasks(
    bundle_path: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
) -> Result<EmitSummary> {
    let bundle_path = bundle_path.as_ref();
    let out_dir = out_dir.as_ref().to_path_buf();
    std::fs::create_dir_all(&out_dir)?;

    let text = std::fs::read_to_string(bundle_path)
        .with_context(|| format!("reading bundle {}", bundle_path.display()))?;
    let bundle: Value = serde_json::from_str(&text)?;

    let triggers = bundle
        .get("diagnostics")
        .and_then(|d| d.get("repair_tasks"))
        .and_then(Value::as_array);
    let Some(triggers) = triggers else {
        return Ok(EmitSummary { wrote: 0, out_dir });
    };

    let mut wrote = 0usize;
    for trigger in triggers {
        if trigger.get("type").and_then(Value::as_str) != Some("REPAIR_POINTER") {
            continue;
        }
        let Some(mu_id) = trigger.get("mu_id").and_then(Value::as_str).filter(|s| !s.is_empty())
        else {
            continue;
        };
        let sha256 = trigger.get("sha256").and_then(Value::as_str).unwrap_or("");
        let uri = trigger.get("uri").and_then(Value::as_str).unwrap_or("");

        let idem = idempotency_key(&["REPAIR_POINTER", mu_id, sha256, uri]);
        let task_id = repair_task_id(&idem);

        let spec = TaskSpec {
            task_id: task_id.clone(),
            task_type: "REPAIR_POINTER".to_string(),
            created_at: utc_now_iso_z(),
            parent_task_id: None,
            idempotency_key: idem,
            inputs: vec![TaskInput {
                kind: "MU_SET".to_string(),
                ids: vec![mu_id.to_string()],
            }],
            params: json!({
                "mu_id": mu_id,
                "mu_path": trigger.get("mu_path").cloned().unwrap_or(Value::Null),
                "sha256": trigger.get("sha256").cloned().unwrap_or(Value::Null),
                "uri": trigger.get("uri").cloned().unwrap_or(Value::Null),
                "reason": trigger.get("reason").cloned().unwrap_or(Value::Null),
                "hint": trigger.get("hint").cloned().unwrap_or(Value::Null),
                "source_bundle_id": bundle.get("bundle_id").cloned().unwrap_or(Value::Null),
            }),
        };

        let out_path = out_dir.join(format!("{task_id}.task_spec.json"));
        std::fs::write(&out_path, serde_json::to_string_pretty(&spec)? + "\n")?;
        wrote += 1;
    }

    Ok(EmitSummary { wrote, out_dir })
}
