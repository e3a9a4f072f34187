use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use mnemo_config::DataRoot;
use mnemo_vault::utc_now_iso_z;

/// Workspace membership is an external, append-only event log; MU stay pure
/// (no workspace fields inside MU).  This module is the only place workspace
/// scope is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipEventKind {
    Add,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipEvent {
    pub event: MembershipEventKind,
    pub workspace_id: String,
    pub mu_id: String,
    pub at: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MembershipDiagnostics {
    pub workspace_id: String,
    pub membership_path: String,
    pub events_total: usize,
    pub adds: usize,
    pub removes: usize,
    pub effective_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignResult {
    pub data_root: String,
    pub workspace: String,
    pub membership_path: String,
    pub mu_count: usize,
    pub appended_events: usize,
    pub source: String,
}

/// MU ids for every `.mimo` under a directory (file stem, sorted).
pub fn iter_mu_ids_from_dir(mu_dir: impl AsRef<Path>) -> Vec<String> {
    let mut ids = Vec::new();
    for entry in WalkDir::new(mu_dir.as_ref()).sort_by_file_name() {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().map(|e| e == "mimo").unwrap_or(false) {
            if let Some(stem) = entry.path().file_stem() {
                ids.push(stem.to_string_lossy().to_string());
            }
        }
    }
    ids
}

/// Append one membership event per mu_id, all stamped with the same `at`.
/// UTF-8 without BOM, `\n` line endings.
pub fn append_membership_events(
    data_root: impl AsRef<Path>,
    workspace: &str,
    mu_ids: &[String],
    source: &str,
    kind: MembershipEventKind,
) -> Result<AssignResult> {
    let data_root = DataRoot::new(data_root.as_ref());
    let membership_path = data_root.membership_log();
    if let Some(parent) = membership_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let at = utc_now_iso_z();
    let mut buffer = String::new();
    for mu_id in mu_ids {
        let event = MembershipEvent {
            event: kind,
            workspace_id: workspace.to_string(),
            mu_id: mu_id.clone(),
            at: at.clone(),
            source: source.to_string(),
        };
        buffer.push_str(&serde_json::to_string(&event)?);
        buffer.push('\n');
    }

    if !buffer.is_empty() {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&membership_path)
            .with_context(|| format!("opening {}", membership_path.display()))?;
        file.write_all(buffer.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
    }

    Ok(AssignResult {
        data_root: data_root.path().display().to_string(),
        workspace: workspace.to_string(),
        membership_path: membership_path.display().to_string(),
        mu_count: mu_ids.len(),
        appended_events: mu_ids.len(),
        source: source.to_string(),
    })
}

/// Fold the event log into the effective set for one workspace.
///
/// Adds insert, removes discard; events for other workspaces and malformed
/// lines are ignored (valid lines keep deterministic semantics).  Readers
/// tolerate a BOM.
pub fn load_effective_membership(
    data_root: impl AsRef<Path>,
    workspace_id: &str,
) -> Result<(BTreeSet<String>, MembershipDiagnostics)> {
    let data_root = DataRoot::new(data_root.as_ref());
    let membership_path = data_root.membership_log();
    if !membership_path.exists() {
        bail!(
            "membership.jsonl not found: {} (workspace={workspace_id})",
            membership_path.display()
        );
    }

    let mut effective = BTreeSet::new();
    let mut events_total = 0usize;
    let mut adds = 0usize;
    let mut removes = 0usize;

    let text = std::fs::read_to_string(&membership_path)?;
    for line in text.lines() {
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() {
            continue;
        }
        events_total += 1;
        let Ok(event) = serde_json::from_str::<MembershipEvent>(line) else {
            continue;
        };
        if event.workspace_id != workspace_id || event.mu_id.is_empty() {
            continue;
        }
        match event.event {
            MembershipEventKind::Add => {
                adds += 1;
                effective.insert(event.mu_id);
            }
            MembershipEventKind::Remove => {
                removes += 1;
                effective.remove(&event.mu_id);
            }
        }
    }

    let diagnostics = MembershipDiagnostics {
        workspace_id: workspace_id.to_string(),
        membership_path: membership_path.display().to_string(),
        events_total,
        adds,
        removes,
        effective_count: effective.len(),
    };
    Ok((effective, diagnostics))
}
