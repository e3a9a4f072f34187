use serde_json::json;

use mnemo_tasks::{TaskInput, TaskSpec};

use crate::report::{
    ID_COLLISION_DIFFERENT_SHA, SCHEMA_ERROR, SHA_COLLISION_DIFFERENT_URI, SyncReport,
    URI_COLLISION_DIFFERENT_SHA,
};

/// Convert a sync report into TaskSpec items for later execution.
///
/// Conservative ordering: verify both manifests first, then uri-repair
/// suggestions, then a single apply task (dry-run unless the operator
/// overrides) carrying the manual conflicts.
pub fn tasks_from_report(report: &SyncReport) -> Vec<TaskSpec> {
    let kind = report.kind.as_str();
    let mut tasks = Vec::new();

    for (side, path) in [("base", &report.base.path), ("incoming", &report.incoming.path)] {
        tasks.push(TaskSpec::new(
            "VERIFY_MANIFEST",
            &format!("verify:{kind}:{side}:{path}"),
            vec![TaskInput {
                kind: "TEXT".to_string(),
                ids: vec![path.clone()],
            }],
            json!({"kind": kind, "manifest_path": path}),
        ));
    }

    let mut manual = Vec::new();
    for conflict in &report.conflicts {
        match conflict.conflict_type.as_str() {
            SHA_COLLISION_DIFFERENT_URI => {
                tasks.push(TaskSpec::new(
                    "REPAIR_MANIFEST_URI",
                    &format!("repair_uri:{kind}:{}", conflict.key),
                    vec![],
                    json!({
                        "kind": kind,
                        "sha256": conflict.key,
                        "base_records": conflict.base_records,
                        "incoming_records": conflict.incoming_records,
                        "policy": "prefer_base_uri",
                        "dry_run": true,
                    }),
                ));
            }
            SCHEMA_ERROR | ID_COLLISION_DIFFERENT_SHA | URI_COLLISION_DIFFERENT_SHA => {
                manual.push(serde_json::to_value(conflict).unwrap_or_default());
            }
            _ => {}
        }
    }

    // Always include the apply planning task so brand-new ids get appended
    // and a patch plan artifact lands under the run dir.
    tasks.push(TaskSpec::new(
        "SYNC_MANIFEST_APPLY",
        &format!(
            "sync_apply:{kind}:{}:{}",
            report.base.path, report.incoming.path
        ),
        vec![],
        json!({
            "kind": kind,
            "base_path": report.base.path,
            "incoming_path": report.incoming.path,
            "dry_run": true,
            "manual_conflicts": manual,
            "policy": "conservative_no_overwrite",
        }),
    ));

    tasks
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::report::{ManifestKind, analyze_sync};
    use crate::report::test_support::scenario_one;

    use super::tasks_from_report;

    #[test]
    fn report_yields_verify_repair_and_apply_tasks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (base, incoming) = scenario_one(dir.path());
        let report = analyze_sync(ManifestKind::Raw, &base, &incoming)?;

        let tasks = tasks_from_report(&report);
        let types: Vec<&str> = tasks.iter().map(|t| t.task_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "VERIFY_MANIFEST",
                "VERIFY_MANIFEST",
                "REPAIR_MANIFEST_URI",
                "SYNC_MANIFEST_APPLY",
            ]
        );

        let apply = tasks.last().unwrap();
        assert_eq!(apply.params["dry_run"], true);
        assert_eq!(apply.params["policy"], "conservative_no_overwrite");
        // the URI collision is routed to manual review on the apply task
        assert_eq!(apply.params["manual_conflicts"].as_array().unwrap().len(), 1);
        Ok(())
    }

    #[test]
    fn clean_pair_still_gets_verify_and_apply() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("base.jsonl");
        let incoming = dir.path().join("incoming.jsonl");
        std::fs::write(&base, "")?;
        std::fs::write(&incoming, "")?;
        let report = analyze_sync(ManifestKind::Mu, &base, &incoming)?;

        let tasks = tasks_from_report(&report);
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| !t.idempotency_key.is_empty()));
        Ok(())
    }
}
