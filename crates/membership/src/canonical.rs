use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use mnemo_index::db::{connect, init_db};

/// Counters for one canonicalization pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CanonicalDiagnostics {
    pub input: usize,
    pub output: usize,
    pub folded_by_corrects: usize,
    pub folded_by_supersedes: usize,
    pub folded_by_duplicate_of: usize,
    pub tombstoned_excluded: usize,
    pub cycles_detected: usize,
    pub reverse_corrects_size: usize,
    pub reverse_supersedes_size: usize,
    pub forward_duplicate_of_size: usize,
}

fn parse_json_list(maybe_json: Option<&str>) -> Vec<String> {
    let Some(text) = maybe_json else {
        return Vec::new();
    };
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

enum Edge {
    Supersedes,
    Corrects,
    DuplicateOf,
}

/// Fold each member id to its canonical head.
///
/// One rewrite per iteration, in priority order (supersedes, then corrects,
/// then duplicate_of), repeated until stable.  Tombstoned ids are excluded at
/// any step.  Iteration is bounded and cycle-safe: the adjacency maps are
/// rebuilt from the index on every call; there is no shared graph owner.
pub fn canonicalize_mu_ids(
    db_path: impl AsRef<Path>,
    mu_ids: &BTreeSet<String>,
) -> Result<(BTreeSet<String>, CanonicalDiagnostics)> {
    let db_path = db_path.as_ref();
    init_db(db_path)?;

    if mu_ids.is_empty() {
        return Ok((BTreeSet::new(), CanonicalDiagnostics::default()));
    }

    let mut reverse_corrects: HashMap<String, String> = HashMap::new();
    let mut reverse_supersedes: HashMap<String, String> = HashMap::new();
    let mut forward_duplicate_of: HashMap<String, String> = HashMap::new();
    let mut tombstoned: HashSet<String> = HashSet::new();

    {
        let conn = connect(db_path)?;
        let mut stmt = conn.prepare(
            "SELECT mu_id, corrects_json, supersedes_json, duplicate_of_json, tombstone_json
             FROM mu
             WHERE corrects_json IS NOT NULL
                OR supersedes_json IS NOT NULL
                OR duplicate_of_json IS NOT NULL
                OR tombstone_json IS NOT NULL",
        )?;
        let rows: Vec<(String, Option<String>, Option<String>, Option<String>, Option<String>)> =
            stmt.query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        for (mu_id, corrects, supersedes, duplicate_of, tombstone) in rows {
            if tombstone
                .as_deref()
                .map(|t| !t.is_empty() && t != "null")
                .unwrap_or(false)
            {
                tombstoned.insert(mu_id.clone());
            }

            // reverse edges: old -> new
            for old in parse_json_list(corrects.as_deref()) {
                reverse_corrects.entry(old).or_insert_with(|| mu_id.clone());
            }
            for old in parse_json_list(supersedes.as_deref()) {
                reverse_supersedes
                    .entry(old)
                    .or_insert_with(|| mu_id.clone());
            }

            // forward edge: dup -> canonical (first target only, stable)
            if let Some(target) = parse_json_list(duplicate_of.as_deref()).into_iter().next() {
                forward_duplicate_of.entry(mu_id).or_insert(target);
            }
        }
    }

    let mut diag = CanonicalDiagnostics {
        input: mu_ids.len(),
        reverse_corrects_size: reverse_corrects.len(),
        reverse_supersedes_size: reverse_supersedes.len(),
        forward_duplicate_of_size: forward_duplicate_of.len(),
        ..CanonicalDiagnostics::default()
    };

    let step = |id: &str| -> Option<(String, Edge)> {
        if let Some(next) = reverse_supersedes.get(id) {
            return Some((next.clone(), Edge::Supersedes));
        }
        if let Some(next) = reverse_corrects.get(id) {
            return Some((next.clone(), Edge::Corrects));
        }
        if let Some(next) = forward_duplicate_of.get(id) {
            return Some((next.clone(), Edge::DuplicateOf));
        }
        None
    };

    let mut out = BTreeSet::new();
    for start in mu_ids {
        let mut current = start.clone();
        let mut seen: HashSet<String> = HashSet::new();
        let mut excluded = false;

        for _ in 0..16 {
            if tombstoned.contains(&current) {
                diag.tombstoned_excluded += 1;
                excluded = true;
                break;
            }
            if seen.contains(&current) {
                diag.cycles_detected += 1;
                break;
            }
            seen.insert(current.clone());
            let Some((next, edge)) = step(&current) else {
                break;
            };
            if next == current {
                break;
            }
            match edge {
                Edge::Supersedes => diag.folded_by_supersedes += 1,
                Edge::Corrects => diag.folded_by_corrects += 1,
                Edge::DuplicateOf => diag.folded_by_duplicate_of += 1,
            }
            current = next;
        }

        if !excluded && !tombstoned.contains(&current) {
            out.insert(current);
        }
    }

    diag.output = out.len();
    Ok((out, diag))
}
