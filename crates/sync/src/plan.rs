use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mnemo_vault::{append_jsonl, read_jsonl, utc_now_iso_z};

use crate::report::{
    ManifestKind, SEVERITY_ERROR, SHA_COLLISION_DIFFERENT_URI, analyze_sync, record_fingerprint,
};

pub const APPEND_RECORD: &str = "APPEND_RECORD";
pub const SUGGEST_URI_ALIAS: &str = "SUGGEST_URI_ALIAS";
pub const BLOCKED_CONFLICT: &str = "BLOCKED_CONFLICT";
pub const NOTE: &str = "NOTE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanStats {
    pub append_new_records: usize,
    pub skipped_exact_dupes: usize,
    pub blocked_conflicts: usize,
}

/// Conservative, append-only patch plan.
///
/// Safe defaults: only records that are clearly new by id key are appended;
/// every ERROR conflict blocks auto-apply for its key; a sha seen under two
/// uris becomes an alias suggestion, never a rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchPlan {
    pub plan_version: String,
    pub created_at: String,
    pub kind: String,
    pub base_path: String,
    pub incoming_path: String,
    pub dry_run: bool,
    pub stats: PlanStats,
    pub actions: Vec<PlanAction>,
}

fn first_uri(records: &[Value]) -> Option<&str> {
    records
        .iter()
        .find_map(|r| r.get("uri").and_then(Value::as_str))
}

pub fn plan_patch(
    kind: ManifestKind,
    base_path: impl AsRef<Path>,
    incoming_path: impl AsRef<Path>,
) -> Result<PatchPlan> {
    let base_path = base_path.as_ref();
    let incoming_path = incoming_path.as_ref();
    let id_key = kind.id_key();

    let base_records = read_jsonl(base_path)?;
    let incoming_records = read_jsonl(incoming_path)?;

    let base_fp: BTreeSet<String> = base_records.iter().map(record_fingerprint).collect();
    let base_ids: BTreeSet<&str> = base_records
        .iter()
        .filter_map(|r| r.get(id_key).and_then(Value::as_str))
        .collect();

    let mut actions = Vec::new();
    let mut append_count = 0usize;
    let mut skipped_dupes = 0usize;

    let report = analyze_sync(kind, base_path, incoming_path)?;
    let blocked: Vec<_> = report.error_conflicts().collect();
    for conflict in &blocked {
        actions.push(PlanAction {
            action_type: BLOCKED_CONFLICT.to_string(),
            message: format!(
                "blocked due to conflict: {} key={}",
                conflict.conflict_type, conflict.key
            ),
            record: None,
            from_uri: None,
            to_uri: None,
            sha256: None,
        });
    }

    for conflict in &report.conflicts {
        if conflict.conflict_type != SHA_COLLISION_DIFFERENT_URI {
            continue;
        }
        let base_uri = first_uri(&conflict.base_records);
        let incoming_uri = first_uri(&conflict.incoming_records);
        if let (Some(to_uri), Some(from_uri)) = (base_uri, incoming_uri) {
            if to_uri != from_uri {
                actions.push(PlanAction {
                    action_type: SUGGEST_URI_ALIAS.to_string(),
                    message: format!(
                        "same sha256={} observed at different uris; consider alias/redirect",
                        conflict.key
                    ),
                    record: None,
                    from_uri: Some(from_uri.to_string()),
                    to_uri: Some(to_uri.to_string()),
                    sha256: Some(conflict.key.clone()),
                });
            }
        }
    }

    for record in &incoming_records {
        let Some(id) = record.get(id_key).and_then(Value::as_str) else {
            continue;
        };
        if base_fp.contains(&record_fingerprint(record)) {
            skipped_dupes += 1;
            continue;
        }
        if base_ids.contains(id) {
            // existing id but not an exact dupe: never auto-append
            actions.push(PlanAction {
                action_type: NOTE.to_string(),
                message: format!("record with existing {id_key}={id} differs; not appending automatically"),
                record: Some(record.clone()),
                from_uri: None,
                to_uri: None,
                sha256: None,
            });
            continue;
        }
        actions.push(PlanAction {
            action_type: APPEND_RECORD.to_string(),
            message: format!("append new {id_key}={id}"),
            record: Some(record.clone()),
            from_uri: None,
            to_uri: None,
            sha256: None,
        });
        append_count += 1;
    }

    Ok(PatchPlan {
        plan_version: "0.1".to_string(),
        created_at: utc_now_iso_z(),
        kind: kind.to_string(),
        base_path: base_path.display().to_string(),
        incoming_path: incoming_path.display().to_string(),
        dry_run: true,
        stats: PlanStats {
            append_new_records: append_count,
            skipped_exact_dupes: skipped_dupes,
            blocked_conflicts: blocked.len(),
        },
        actions,
    })
}

/// Execute the plan's APPEND_RECORD actions against the base manifest.
/// All other actions are planning artifacts.  Returns the appended count.
pub fn apply_plan(plan: &PatchPlan) -> Result<usize> {
    let base_path = Path::new(&plan.base_path);
    let mut appended = 0usize;
    for action in &plan.actions {
        if action.action_type != APPEND_RECORD {
            continue;
        }
        if let Some(record) = &action.record {
            append_jsonl(base_path, record)?;
            appended += 1;
        }
    }
    Ok(appended)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use mnemo_vault::{append_jsonl, read_jsonl};

    use crate::report::ManifestKind;
    use crate::report::test_support::scenario_one;

    use super::{APPEND_RECORD, BLOCKED_CONFLICT, NOTE, SUGGEST_URI_ALIAS, apply_plan, plan_patch};

    #[test]
    fn scenario_one_plans_one_append_plus_alias_and_block() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (base, incoming) = scenario_one(dir.path());

        let plan = plan_patch(ManifestKind::Raw, &base, &incoming)?;
        assert!(plan.dry_run);

        let appends: Vec<_> = plan
            .actions
            .iter()
            .filter(|a| a.action_type == APPEND_RECORD)
            .collect();
        assert_eq!(appends.len(), 1);
        assert_eq!(appends[0].record.as_ref().unwrap()["raw_id"], "sha256:bb");

        assert!(plan.actions.iter().any(|a| a.action_type == SUGGEST_URI_ALIAS));
        // the URI collision is an ERROR: it must block
        assert!(plan.actions.iter().any(|a| a.action_type == BLOCKED_CONFLICT));
        assert_eq!(plan.stats.blocked_conflicts, 1);

        // existing id with different uri gets a NOTE, not an append
        assert!(plan.actions.iter().any(|a| a.action_type == NOTE));
        Ok(())
    }

    #[test]
    fn apply_plan_appends_only_and_preserves_prior_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("base.jsonl");
        let incoming = dir.path().join("incoming.jsonl");
        append_jsonl(&base, &json!({"raw_id": "sha256:aa", "uri": "u1", "sha256": "sha256:aa"}))?;
        append_jsonl(&incoming, &json!({"raw_id": "sha256:bb", "uri": "u2", "sha256": "sha256:bb"}))?;

        let before = std::fs::read_to_string(&base)?;
        let plan = plan_patch(ManifestKind::Raw, &base, &incoming)?;
        let appended = apply_plan(&plan)?;
        assert_eq!(appended, 1);

        let after = std::fs::read_to_string(&base)?;
        // append-only: prior bytes are a prefix of the new content
        assert!(after.starts_with(&before));
        assert_eq!(read_jsonl(&base)?.len(), 2);
        Ok(())
    }

    #[test]
    fn exact_dupes_are_skipped_not_reappended() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("base.jsonl");
        let incoming = dir.path().join("incoming.jsonl");
        let record = json!({"raw_id": "sha256:aa", "uri": "u1", "sha256": "sha256:aa"});
        append_jsonl(&base, &record)?;
        append_jsonl(&incoming, &record)?;

        let plan = plan_patch(ManifestKind::Raw, &base, &incoming)?;
        assert_eq!(plan.stats.skipped_exact_dupes, 1);
        assert_eq!(plan.stats.append_new_records, 0);
        assert_eq!(apply_plan(&plan)?, 0);
        assert_eq!(read_jsonl(&base)?.len(), 1);
        Ok(())
    }
}
