use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mnemo_vault::utc_now_iso_z;

pub const SCHEMA_ERROR: &str = "SCHEMA_ERROR";
pub const ID_COLLISION_DIFFERENT_SHA: &str = "ID_COLLISION_DIFFERENT_SHA";
pub const SHA_COLLISION_DIFFERENT_URI: &str = "SHA_COLLISION_DIFFERENT_URI";
pub const URI_COLLISION_DIFFERENT_SHA: &str = "URI_COLLISION_DIFFERENT_SHA";

pub const SEVERITY_ERROR: &str = "ERROR";
pub const SEVERITY_WARN: &str = "WARN";

/// Manifest kinds and their record id key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Raw,
    Mu,
    Asset,
}

impl ManifestKind {
    pub fn id_key(self) -> &'static str {
        match self {
            ManifestKind::Raw => "raw_id",
            ManifestKind::Mu => "mu_id",
            ManifestKind::Asset => "asset_id",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ManifestKind::Raw => "raw",
            ManifestKind::Mu => "mu",
            ManifestKind::Asset => "asset",
        }
    }
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManifestKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(ManifestKind::Raw),
            "mu" => Ok(ManifestKind::Mu),
            "asset" => Ok(ManifestKind::Asset),
            other => anyhow::bail!("unknown kind={other:?} (expected raw|mu|asset)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    #[serde(rename = "type")]
    pub conflict_type: String,
    pub severity: String,
    pub key: String,
    pub message: String,
    pub base_records: Vec<Value>,
    pub incoming_records: Vec<Value>,
}

impl Conflict {
    fn schema_error(key: String, message: String) -> Self {
        Self {
            conflict_type: SCHEMA_ERROR.to_string(),
            severity: SEVERITY_ERROR.to_string(),
            key,
            message,
            base_records: Vec::new(),
            incoming_records: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideInfo {
    pub path: String,
    pub line_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub base_unique: usize,
    pub incoming_unique: usize,
    pub exact_dupes: usize,
    pub new_records: usize,
}

/// Machine-first classification of a base-vs-incoming manifest pair.
/// Analysis only; manifests are never mutated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub report_version: String,
    pub created_at: String,
    pub kind: String,
    pub base: SideInfo,
    pub incoming: SideInfo,
    pub stats: SyncStats,
    pub conflicts: Vec<Conflict>,
}

impl SyncReport {
    pub fn error_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts
            .iter()
            .filter(|c| c.severity == SEVERITY_ERROR)
    }
}

/// Line-level identity: compact JSON with sorted keys.
pub fn record_fingerprint(record: &Value) -> String {
    // serde_json maps are ordered by key, so serialization is canonical
    serde_json::to_string(record).unwrap_or_default()
}

/// Read JSONL manifest lines, collecting SCHEMA_ERROR conflicts for missing
/// files, undecodable lines, and non-object lines.
fn read_jsonl_lines(path: &Path) -> (Vec<Value>, Vec<Conflict>, usize) {
    let mut records = Vec::new();
    let mut conflicts = Vec::new();

    if !path.exists() {
        conflicts.push(Conflict::schema_error(
            path.display().to_string(),
            format!("missing manifest file: {}", path.display()),
        ));
        return (records, conflicts, 0);
    }

    let Ok(text) = std::fs::read_to_string(path) else {
        conflicts.push(Conflict::schema_error(
            path.display().to_string(),
            format!("unreadable manifest file: {}", path.display()),
        ));
        return (records, conflicts, 0);
    };

    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim_start_matches('\u{feff}');
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) if value.is_object() => records.push(value),
            Ok(_) => conflicts.push(Conflict::schema_error(
                format!("{}:{}", path.display(), i + 1),
                "manifest line must be an object".to_string(),
            )),
            Err(err) => conflicts.push(Conflict::schema_error(
                format!("{}:{}", path.display(), i + 1),
                format!("invalid json: {err}"),
            )),
        }
    }
    (records, conflicts, lines.len())
}

fn index_by<'a>(records: &'a [Value], key: &str) -> BTreeMap<String, Vec<&'a Value>> {
    let mut index: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
    for record in records {
        if let Some(value) = record.get(key).and_then(Value::as_str) {
            index.entry(value.to_string()).or_default().push(record);
        }
    }
    index
}

fn sha_set(records: &[&Value]) -> BTreeSet<String> {
    records
        .iter()
        .filter_map(|r| r.get("sha256").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn uri_set(records: &[&Value]) -> BTreeSet<String> {
    records
        .iter()
        .filter_map(|r| r.get("uri").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn owned(records: &[&Value]) -> Vec<Value> {
    records.iter().map(|r| (*r).clone()).collect()
}

/// Compare two append-only manifests and classify conflicts.
pub fn analyze_sync(
    kind: ManifestKind,
    base_path: impl AsRef<Path>,
    incoming_path: impl AsRef<Path>,
) -> Result<SyncReport> {
    let base_path = base_path.as_ref();
    let incoming_path = incoming_path.as_ref();
    let id_key = kind.id_key();

    let (base_records, base_schema, base_lines) = read_jsonl_lines(base_path);
    let (incoming_records, incoming_schema, incoming_lines) = read_jsonl_lines(incoming_path);

    let mut conflicts = Vec::new();
    conflicts.extend(base_schema);
    conflicts.extend(incoming_schema);

    // exact dupes (line-level)
    let base_fp: BTreeSet<String> = base_records.iter().map(record_fingerprint).collect();
    let incoming_fp: BTreeSet<String> = incoming_records.iter().map(record_fingerprint).collect();
    let exact_dupes = base_fp.intersection(&incoming_fp).count();

    let base_by_id = index_by(&base_records, id_key);
    let incoming_by_id = index_by(&incoming_records, id_key);

    // same id, different sha256 sets
    for (id, incoming_list) in &incoming_by_id {
        let Some(base_list) = base_by_id.get(id) else {
            continue;
        };
        let base_shas = sha_set(base_list);
        let incoming_shas = sha_set(incoming_list);
        if !base_shas.is_empty() && !incoming_shas.is_empty() && base_shas != incoming_shas {
            conflicts.push(Conflict {
                conflict_type: ID_COLLISION_DIFFERENT_SHA.to_string(),
                severity: SEVERITY_ERROR.to_string(),
                key: id.clone(),
                message: format!(
                    "same {id_key} but sha256 differs: base={base_shas:?} incoming={incoming_shas:?}"
                ),
                base_records: owned(base_list),
                incoming_records: owned(incoming_list),
            });
        }
    }

    // same sha256, different uri: suggests an alias, never a rewrite
    let base_by_sha = index_by(&base_records, "sha256");
    let incoming_by_sha = index_by(&incoming_records, "sha256");
    for (sha, incoming_list) in &incoming_by_sha {
        let Some(base_list) = base_by_sha.get(sha) else {
            continue;
        };
        let base_uris = uri_set(base_list);
        let incoming_uris = uri_set(incoming_list);
        if !base_uris.is_empty() && !incoming_uris.is_empty() && base_uris != incoming_uris {
            conflicts.push(Conflict {
                conflict_type: SHA_COLLISION_DIFFERENT_URI.to_string(),
                severity: SEVERITY_WARN.to_string(),
                key: sha.clone(),
                message: format!(
                    "same sha256 but uri differs: base={base_uris:?} incoming={incoming_uris:?}"
                ),
                base_records: owned(base_list),
                incoming_records: owned(incoming_list),
            });
        }
    }

    // same uri, different sha256
    let base_by_uri = index_by(&base_records, "uri");
    let incoming_by_uri = index_by(&incoming_records, "uri");
    for (uri, incoming_list) in &incoming_by_uri {
        let Some(base_list) = base_by_uri.get(uri) else {
            continue;
        };
        let base_shas = sha_set(base_list);
        let incoming_shas = sha_set(incoming_list);
        if !base_shas.is_empty() && !incoming_shas.is_empty() && base_shas != incoming_shas {
            conflicts.push(Conflict {
                conflict_type: URI_COLLISION_DIFFERENT_SHA.to_string(),
                severity: SEVERITY_ERROR.to_string(),
                key: uri.clone(),
                message: format!(
                    "same uri but sha256 differs: base={base_shas:?} incoming={incoming_shas:?}"
                ),
                base_records: owned(base_list),
                incoming_records: owned(incoming_list),
            });
        }
    }

    let new_records = incoming_by_id
        .keys()
        .filter(|id| !base_by_id.contains_key(*id))
        .count();

    Ok(SyncReport {
        report_version: "0.1".to_string(),
        created_at: utc_now_iso_z(),
        kind: kind.to_string(),
        base: SideInfo {
            path: base_path.display().to_string(),
            line_count: base_lines,
        },
        incoming: SideInfo {
            path: incoming_path.display().to_string(),
            line_count: incoming_lines,
        },
        stats: SyncStats {
            base_unique: base_by_id.len(),
            incoming_unique: incoming_by_id.len(),
            exact_dupes,
            new_records,
        },
        conflicts,
    })
}
