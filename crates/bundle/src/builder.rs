use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use mnemo_config::DataRoot;
use mnemo_index::{SearchHit, SearchQuery, search_mu};
use mnemo_membership::{canonicalize_mu_ids, load_effective_membership};
use mnemo_vault::{MuDocument, Pointer, VaultRoots, utc_now_iso_z};

use crate::granularity::{merge_spec, plan_downgrades};
use crate::pointer::resolve_pointer;
use crate::templates::load_template;
use crate::validate::validate_bundle;

/// Inputs for one bundle build.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub db_path: PathBuf,
    /// `DATA_ROOT`; inferred from the db path when absent.
    pub data_root: Option<PathBuf>,
    pub workspace: String,
    pub query: String,
    pub days: u32,
    pub template: String,
    pub target_level: String,
    pub evidence_depth: String,
    pub limit: usize,
    /// When set, the spec is compiled from this template (plus question
    /// overrides) and overrides days/evidence_depth/limit/template.
    pub template_name: Option<String>,
    pub templates_dir: Option<PathBuf>,
    pub question_setup: Option<Value>,
    pub question_expect: Option<Value>,
    pub question_budget: Option<Value>,
    pub include_diagnostics: bool,
    pub vault_roots: Option<VaultRoots>,
    pub raw_manifest_path: Option<PathBuf>,
}

impl BundleRequest {
    pub fn new(db_path: impl Into<PathBuf>, workspace: &str, query: &str) -> Self {
        Self {
            db_path: db_path.into(),
            data_root: None,
            workspace: workspace.to_string(),
            query: query.to_string(),
            days: 7,
            template: "time_overview_v1".to_string(),
            target_level: "private".to_string(),
            evidence_depth: "mu_ids".to_string(),
            limit: 50,
            template_name: None,
            templates_dir: None,
            question_setup: None,
            question_expect: None,
            question_budget: None,
            include_diagnostics: true,
            vault_roots: None,
            raw_manifest_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleScope {
    pub time_window_days: u32,
    pub since: String,
    pub workspace: String,
}

/// A reusable, auditable answer package.
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    pub bundle_id: String,
    pub template: String,
    pub scope: BundleScope,
    pub source_mu_ids: Vec<String>,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub always_on: Option<Value>,
    pub session_on: Option<Value>,
    pub query_on: Value,
    pub evidence: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Map<String, Value>>,
}

fn default_bundle_id() -> String {
    format!("bndl_{}", Utc::now().format("%Y%m%d%H%M%S"))
}

fn iso_days_ago(days: u32) -> String {
    (Utc::now() - Duration::days(days as i64)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Per-hit evidence attachment for `raw_quotes`: try each pointer in order,
/// emit the first verified snippet, otherwise record degradation and a
/// repair trigger.
struct QuoteAttacher<'a> {
    vault_roots: &'a VaultRoots,
    raw_manifest_path: Option<&'a Path>,
    target_level: &'a str,
    degraded_mu_ids: Vec<String>,
    repair_tasks: Vec<Value>,
}

impl<'a> QuoteAttacher<'a> {
    fn attach(&mut self, hit: &SearchHit) -> Value {
        let fallback = json!({"mu_id": hit.mu_id});
        let Some(path) = hit.path.as_deref() else {
            return fallback;
        };
        let Ok(mu) = MuDocument::from_path(path) else {
            return fallback;
        };

        let pointers = mu.pointers();
        let mut last_failure: Option<(Pointer, Value)> = None;

        for pointer in &pointers {
            let outcome = resolve_pointer(pointer, self.vault_roots, self.raw_manifest_path);
            if outcome.ok {
                if let Some(snippet) = outcome.snippet {
                    let mut resolved = pointer.clone();
                    resolved.uri = outcome.uri;
                    let mut evidence = json!({"mu_id": hit.mu_id, "snippet": snippet});
                    if self.target_level == "private" {
                        if let Ok(pointer_json) = serde_json::to_value(&resolved) {
                            evidence["pointer"] = Value::Array(vec![pointer_json]);
                        }
                    }
                    return evidence;
                }
            }
            last_failure = Some((pointer.clone(), outcome.diagnostics));
        }

        // degraded when a snapshot exists but no pointer resolved
        if mu.has_snapshot() {
            self.degraded_mu_ids.push(hit.mu_id.clone());
        }

        if let Some((pointer, diagnostics)) = last_failure {
            self.repair_tasks.push(json!({
                "type": "REPAIR_POINTER",
                "mu_id": hit.mu_id,
                "mu_path": path,
                "sha256": pointer.sha256,
                "uri": pointer.uri,
                "reason": diagnostics.get("error").cloned().unwrap_or(Value::Null),
                "hint": {
                    "need_vault_roots": self.vault_roots.is_empty(),
                    "need_raw_manifest": self.raw_manifest_path.is_none(),
                },
            }));
        }

        fallback
    }
}

/// Build a bundle: compile the spec (when templated), fence retrieval to the
/// canonical membership set, attach evidence, aggregate diagnostics, and
/// validate the result (schema errors land in diagnostics, never raise).
pub fn build_bundle(request: &BundleRequest) -> Result<Bundle> {
    let mut template = request.template.clone();
    let mut days = request.days;
    let mut evidence_depth = request.evidence_depth.clone();
    let mut limit = request.limit;
    let mut diagnostics: Option<Map<String, Value>> = None;

    if let Some(template_name) = &request.template_name {
        let templates_dir = request
            .templates_dir
            .as_deref()
            .context("template_name given without templates_dir")?;
        let loaded = load_template(templates_dir, template_name)?;
        let compiled = merge_spec(
            template_name,
            &loaded.defaults,
            request.question_setup.as_ref(),
            request.question_expect.as_ref(),
            request.question_budget.as_ref(),
        );
        let (final_spec, plan) = plan_downgrades(&compiled);

        template = final_spec.template.clone();
        days = final_spec.scope_days;
        evidence_depth = final_spec.granularity.evidence_depth.clone();
        limit = final_spec.budget.max_mu as usize;

        if request.include_diagnostics {
            let mut map = Map::new();
            map.insert("compiled_spec".into(), serde_json::to_value(&compiled)?);
            map.insert("final_spec".into(), serde_json::to_value(&final_spec)?);
            map.insert("downgrade_plan".into(), Value::Array(plan));
            diagnostics = Some(map);
        }
    }

    let since = iso_days_ago(days);
    let include_snippet = evidence_depth == "mu_snippets";
    let include_raw_quotes = evidence_depth == "raw_quotes";

    let data_root = match &request.data_root {
        Some(root) => root.clone(),
        None => DataRoot::infer_from_index_db(&request.db_path)?
            .path()
            .to_path_buf(),
    };
    let (effective, membership_diag) = load_effective_membership(&data_root, &request.workspace)?;
    let (canonical_set, canonical_diag) = canonicalize_mu_ids(&request.db_path, &effective)?;
    debug!(
        workspace = %request.workspace,
        effective = effective.len(),
        canonical = canonical_set.len(),
        "membership fence ready"
    );

    let hits = search_mu(
        &request.db_path,
        &SearchQuery {
            query: Some(request.query.clone()),
            since: Some(since.clone()),
            until: None,
            tag: None,
            privacy: None,
            target_level: request.target_level.clone(),
            include_snippet,
            limit,
            allow_mu_ids: Some(canonical_set.clone()),
        },
    )?;

    let empty_roots = VaultRoots::new();
    let vault_roots = request.vault_roots.as_ref().unwrap_or(&empty_roots);
    let mut attacher = QuoteAttacher {
        vault_roots,
        raw_manifest_path: request.raw_manifest_path.as_deref(),
        target_level: &request.target_level,
        degraded_mu_ids: Vec::new(),
        repair_tasks: Vec::new(),
    };

    let evidence: Vec<Value> = hits
        .iter()
        .map(|hit| {
            if include_snippet {
                json!({"mu_id": hit.mu_id, "snippet": hit.summary})
            } else if include_raw_quotes {
                attacher.attach(hit)
            } else {
                json!({"mu_id": hit.mu_id})
            }
        })
        .collect();

    let mut bundle = Bundle {
        bundle_id: default_bundle_id(),
        template,
        scope: BundleScope {
            time_window_days: days,
            since,
            workspace: request.workspace.clone(),
        },
        source_mu_ids: hits.iter().map(|h| h.mu_id.clone()).collect(),
        created_at: utc_now_iso_z(),
        expires_at: None,
        always_on: None,
        session_on: None,
        query_on: json!({"query": request.query}),
        evidence,
        diagnostics: None,
    };

    let degraded = !attacher.degraded_mu_ids.is_empty();
    if diagnostics.is_some() || degraded || !attacher.repair_tasks.is_empty() {
        let mut map = diagnostics.unwrap_or_default();
        map.entry("membership".to_string()).or_insert_with(|| {
            let mut membership = serde_json::to_value(&membership_diag)
                .unwrap_or_else(|_| json!({}));
            membership["canonicalized_count"] = json!(canonical_set.len());
            membership["canonicalization"] =
                serde_json::to_value(&canonical_diag).unwrap_or_else(|_| json!({}));
            membership
        });
        if let Some(roots) = &request.vault_roots {
            map.entry("vault_roots".to_string())
                .or_insert_with(|| serde_json::to_value(roots).unwrap_or_else(|_| json!({})));
        }
        if let Some(manifest) = &request.raw_manifest_path {
            map.entry("raw_manifest".to_string())
                .or_insert_with(|| json!(manifest.display().to_string()));
        }
        if degraded {
            let mut ids = attacher.degraded_mu_ids.clone();
            ids.sort();
            ids.dedup();
            map.insert("evidence_degraded".to_string(), json!(true));
            map.insert("evidence_degraded_mu_ids".to_string(), json!(ids));
        }
        if !attacher.repair_tasks.is_empty() {
            map.insert(
                "repair_tasks".to_string(),
                Value::Array(attacher.repair_tasks),
            );
        }
        bundle.diagnostics = Some(map);
    }

    // Best-effort shape validation; failures are diagnostics, not errors.
    let as_value = serde_json::to_value(&bundle)?;
    let errors = validate_bundle(&as_value);
    if !errors.is_empty() {
        let truncated: Vec<Value> = errors.into_iter().take(50).map(Value::from).collect();
        bundle
            .diagnostics
            .get_or_insert_with(Map::new)
            .insert("bundle_schema_errors".to_string(), Value::Array(truncated));
    }

    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use serde_json::json;

    use mnemo_index::index_mu_dir;
    use mnemo_membership::{MembershipEventKind, append_membership_events};
    use mnemo_vault::{VaultRoots, append_jsonl, sha256_bytes};

    use crate::templates::test_support::{TIME_OVERVIEW, write_template};

    use super::{Bundle, BundleRequest, build_bundle};

    struct Fixture {
        data_root: PathBuf,
        db_path: PathBuf,
        vault_root: PathBuf,
    }

    /// DATA_ROOT with one vault, one workspace, and an indexed MU tree.
    fn fixture(dir: &Path) -> Result<Fixture> {
        let data_root = dir.join("data");
        let vault_root = data_root.join("vaults").join("default");
        let mu_root = vault_root.join("mu").join("2026").join("02");
        std::fs::create_dir_all(&mu_root)?;

        let raw_dir = vault_root.join("raw").join("2026").join("02");
        std::fs::create_dir_all(&raw_dir)?;
        std::fs::write(raw_dir.join("notes.txt"), "l1\nl2\nl3\n")?;
        let raw_sha = sha256_bytes(b"l1\nl2\nl3\n");

        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

        // resolvable pointer
        std::fs::write(
            mu_root.join("mu_good.mimo"),
            format!(
                "mu_id: mu_good\nsummary: Kyoto trip planning notes\nmeta:\n  time: \"{now}\"\npointer:\n  - type: raw\n    uri: vault://default/raw/2026/02/notes.txt\n    sha256: \"{raw_sha}\"\n    locator:\n      kind: line_range\n      start: 2\n      end: 3\nprivacy:\n  level: private\n"
            ),
        )?;

        // broken pointer, snapshot present
        let gone_sha = sha256_bytes(b"vanished");
        std::fs::write(
            mu_root.join("mu_broken.mimo"),
            format!(
                "mu_id: mu_broken\nsummary: Kyoto ryokan booking confirmation\nmeta:\n  time: \"{now}\"\npointer:\n  - type: raw\n    uri: vault://default/raw/2026/02/gone.txt\n    sha256: \"{gone_sha}\"\n    locator:\n      kind: line_range\n      start: 1\n      end: 1\nsnapshot:\n  kind: text\n  payload:\n    text: booking ref 1234\nprivacy:\n  level: private\n"
            ),
        )?;

        let db_path = data_root.join("index").join("meta.sqlite");
        index_mu_dir(vault_root.join("mu"), &db_path, false)?;

        append_membership_events(
            &data_root,
            "ws_trip",
            &["mu_good".into(), "mu_broken".into()],
            "job:test",
            MembershipEventKind::Add,
        )?;

        Ok(Fixture {
            data_root,
            db_path,
            vault_root,
        })
    }

    fn request(fixture: &Fixture, query: &str) -> BundleRequest {
        let mut request = BundleRequest::new(&fixture.db_path, "ws_trip", query);
        request.data_root = Some(fixture.data_root.clone());
        request
    }

    fn as_value(bundle: &Bundle) -> serde_json::Value {
        serde_json::to_value(bundle).unwrap()
    }

    #[test]
    fn mu_ids_depth_emits_bare_ids() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fixture = fixture(dir.path())?;

        let bundle = build_bundle(&request(&fixture, "Kyoto"))?;
        assert!(bundle.bundle_id.starts_with("bndl_"));
        assert_eq!(bundle.source_mu_ids.len(), 2);
        for item in &bundle.evidence {
            assert!(item.get("snippet").is_none());
        }
        let value = as_value(&bundle);
        assert_eq!(value["scope"]["workspace"], "ws_trip");
        Ok(())
    }

    #[test]
    fn mu_snippets_depth_attaches_summaries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fixture = fixture(dir.path())?;

        let mut req = request(&fixture, "Kyoto");
        req.evidence_depth = "mu_snippets".to_string();
        let bundle = build_bundle(&req)?;
        assert!(
            bundle
                .evidence
                .iter()
                .all(|e| e["snippet"].as_str().is_some())
        );
        Ok(())
    }

    #[test]
    fn raw_quotes_resolves_pointer_and_keeps_it_for_private_target() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fixture = fixture(dir.path())?;

        let mut req = request(&fixture, "trip planning");
        req.evidence_depth = "raw_quotes".to_string();
        req.vault_roots = Some(VaultRoots::from([(
            "default".to_string(),
            fixture.vault_root.display().to_string(),
        )]));
        let bundle = build_bundle(&req)?;

        let good = bundle
            .evidence
            .iter()
            .find(|e| e["mu_id"] == "mu_good")
            .expect("mu_good in evidence");
        assert_eq!(good["snippet"], "l2\nl3");
        assert!(good["pointer"].is_array());
        Ok(())
    }

    #[test]
    fn raw_quotes_drops_pointer_for_org_target() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fixture = fixture(dir.path())?;

        // make mu_good visible at org level
        let mu_path = fixture
            .vault_root
            .join("mu")
            .join("2026")
            .join("02")
            .join("mu_good.mimo");
        let text = std::fs::read_to_string(&mu_path)?.replace("level: private", "level: org");
        std::fs::write(&mu_path, text)?;
        index_mu_dir(fixture.vault_root.join("mu"), &fixture.db_path, true)?;

        let mut req = request(&fixture, "trip planning");
        req.evidence_depth = "raw_quotes".to_string();
        req.target_level = "org".to_string();
        req.vault_roots = Some(VaultRoots::from([(
            "default".to_string(),
            fixture.vault_root.display().to_string(),
        )]));
        let bundle = build_bundle(&req)?;

        let good = bundle
            .evidence
            .iter()
            .find(|e| e["mu_id"] == "mu_good")
            .expect("mu_good in evidence");
        assert!(good["snippet"].as_str().is_some());
        assert!(good.get("pointer").is_none());
        Ok(())
    }

    #[test]
    fn broken_pointer_with_snapshot_degrades_and_emits_repair_task() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fixture = fixture(dir.path())?;

        let mut req = request(&fixture, "ryokan booking");
        req.evidence_depth = "raw_quotes".to_string();
        req.vault_roots = Some(VaultRoots::from([(
            "default".to_string(),
            fixture.vault_root.display().to_string(),
        )]));
        let bundle = build_bundle(&req)?;

        let diagnostics = bundle.diagnostics.as_ref().expect("diagnostics present");
        assert_eq!(diagnostics["evidence_degraded"], json!(true));
        assert_eq!(
            diagnostics["evidence_degraded_mu_ids"],
            json!(["mu_broken"])
        );
        let repair = diagnostics["repair_tasks"].as_array().unwrap();
        assert_eq!(repair[0]["type"], "REPAIR_POINTER");
        assert_eq!(repair[0]["mu_id"], "mu_broken");
        assert_eq!(repair[0]["hint"]["need_raw_manifest"], json!(true));
        assert_eq!(repair[0]["hint"]["need_vault_roots"], json!(false));
        Ok(())
    }

    #[test]
    fn template_compiles_and_downgrades_into_diagnostics() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fixture = fixture(dir.path())?;
        let templates_dir = dir.path().join("templates");
        write_template(&templates_dir, "time_overview_v1", TIME_OVERVIEW);

        let mut req = request(&fixture, "Kyoto");
        req.template_name = Some("time_overview_v1".to_string());
        req.templates_dir = Some(templates_dir);
        req.question_budget = Some(json!({"max_tokens": 300}));
        let bundle = build_bundle(&req)?;

        let diagnostics = bundle.diagnostics.as_ref().expect("diagnostics present");
        assert!(diagnostics.contains_key("compiled_spec"));
        assert!(diagnostics.contains_key("final_spec"));
        assert!(!diagnostics["downgrade_plan"].as_array().unwrap().is_empty());
        assert!(diagnostics["membership"]["canonicalization"]["input"].is_u64());
        Ok(())
    }

    #[test]
    fn membership_fence_excludes_non_members() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fixture = fixture(dir.path())?;
        append_membership_events(
            &fixture.data_root,
            "ws_trip",
            &["mu_broken".into()],
            "manual",
            MembershipEventKind::Remove,
        )?;

        let bundle = build_bundle(&request(&fixture, "Kyoto"))?;
        assert_eq!(bundle.source_mu_ids, vec!["mu_good"]);
        Ok(())
    }

    #[test]
    fn raw_quotes_with_missing_manifest_lookup_still_builds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fixture = fixture(dir.path())?;

        // manifest that does not contain the broken sha
        let manifest = dir.path().join("raw_manifest.jsonl");
        append_jsonl(&manifest, &json!({"sha256": "sha256:aa", "uri": "vault://default/raw/x"}))?;

        let mut req = request(&fixture, "ryokan booking");
        req.evidence_depth = "raw_quotes".to_string();
        req.raw_manifest_path = Some(manifest);
        let bundle = build_bundle(&req)?;

        let diagnostics = bundle.diagnostics.as_ref().expect("diagnostics present");
        assert!(diagnostics["raw_manifest"].as_str().is_some());
        let repair = diagnostics["repair_tasks"].as_array().unwrap();
        assert_eq!(repair[0]["hint"]["need_raw_manifest"], json!(false));
        assert_eq!(repair[0]["hint"]["need_vault_roots"], json!(true));
        Ok(())
    }
}
