use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::VaultRoots;
use crate::error::VaultError;
use crate::hash::sha256_file;
use crate::manifest::read_jsonl;
use crate::uri::VaultUri;

/// Map a `vault://` URI to a local path via the configured roots.
pub fn resolve_vault_uri_to_path(
    uri: &str,
    vault_roots: &VaultRoots,
) -> Result<PathBuf, VaultError> {
    let parsed = VaultUri::parse(uri)?;
    let root = vault_roots
        .get(&parsed.vault_id)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| VaultError::MissingVaultRoot(parsed.vault_id.clone()))?;
    Ok(Path::new(root)
        .join(parsed.kind.as_str())
        .join(&parsed.path))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyIssueKind {
    InvalidRecord,
    ResolveFailed,
    UnsupportedScheme,
    MissingFile,
    Sha256Mismatch,
}

/// One verification finding for a manifest record.
#[derive(Debug, Clone)]
pub struct VerifyIssue {
    pub kind: VerifyIssueKind,
    pub uri: Option<String>,
    pub message: String,
}

impl VerifyIssue {
    fn new(kind: VerifyIssueKind, uri: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            uri: uri.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Verify that each record's file exists and its recomputed sha256 matches.
///
/// Expected record keys: `uri`, `sha256`.  Only `vault://` URIs are
/// verifiable; other schemes are reported as unsupported.
pub fn verify_manifest_records(records: &[Value], vault_roots: &VaultRoots) -> Vec<VerifyIssue> {
    let mut issues = Vec::new();
    for record in records {
        let uri = record.get("uri").and_then(Value::as_str);
        let expected = record.get("sha256").and_then(Value::as_str);
        let (Some(uri), Some(expected)) = (uri, expected) else {
            issues.push(VerifyIssue::new(
                VerifyIssueKind::InvalidRecord,
                None,
                format!("invalid record (missing uri/sha256): {record}"),
            ));
            continue;
        };

        if !VaultUri::is_vault_uri(uri) {
            issues.push(VerifyIssue::new(
                VerifyIssueKind::UnsupportedScheme,
                Some(uri),
                format!("unsupported uri scheme for verify: {uri}"),
            ));
            continue;
        }

        let path = match resolve_vault_uri_to_path(uri, vault_roots) {
            Ok(path) => path,
            Err(err) => {
                issues.push(VerifyIssue::new(
                    VerifyIssueKind::ResolveFailed,
                    Some(uri),
                    format!("resolve failed for {uri}: {err}"),
                ));
                continue;
            }
        };

        if !path.exists() {
            issues.push(VerifyIssue::new(
                VerifyIssueKind::MissingFile,
                Some(uri),
                format!("missing file for uri={uri}: {}", path.display()),
            ));
            continue;
        }

        match sha256_file(&path) {
            Ok(actual) if actual == expected => {}
            Ok(actual) => issues.push(VerifyIssue::new(
                VerifyIssueKind::Sha256Mismatch,
                Some(uri),
                format!("sha256 mismatch for uri={uri}: expected={expected} actual={actual}"),
            )),
            Err(err) => issues.push(VerifyIssue::new(
                VerifyIssueKind::ResolveFailed,
                Some(uri),
                format!("read failed for uri={uri}: {err}"),
            )),
        }
    }
    issues
}

/// Read a manifest file and verify every record.
pub fn verify_manifest(
    manifest_path: impl AsRef<Path>,
    vault_roots: &VaultRoots,
) -> Result<Vec<VerifyIssue>, VaultError> {
    let records = read_jsonl(manifest_path)?;
    Ok(verify_manifest_records(&records, vault_roots))
}

/// Linear sha256 lookup: the first manifest record with a matching sha wins.
pub fn repair_suggest_by_sha256(
    manifest_path: impl AsRef<Path>,
    sha256: &str,
) -> Result<Option<String>, VaultError> {
    for record in read_jsonl(manifest_path)? {
        if record.get("sha256").and_then(Value::as_str) == Some(sha256) {
            if let Some(uri) = record.get("uri").and_then(Value::as_str) {
                return Ok(Some(uri.to_string()));
            }
        }
    }
    Ok(None)
}

/// Suggested alias for a record whose uri no longer resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairSuggestion {
    pub old_uri: String,
    pub sha256: String,
    pub suggested_uri: String,
}

/// For records whose uri cannot be resolved to an existing local file,
/// suggest a replacement uri by sha256 lookup in the manifest.
pub fn repair_suggestions_for_missing(
    records: &[Value],
    manifest_records: &[Value],
    vault_roots: &VaultRoots,
) -> Vec<RepairSuggestion> {
    // sha256 -> first seen uri
    let mut index = std::collections::HashMap::new();
    for record in manifest_records {
        if let (Some(sha), Some(uri)) = (
            record.get("sha256").and_then(Value::as_str),
            record.get("uri").and_then(Value::as_str),
        ) {
            index.entry(sha).or_insert(uri);
        }
    }

    let mut suggestions = Vec::new();
    for record in records {
        let (Some(uri), Some(sha)) = (
            record.get("uri").and_then(Value::as_str),
            record.get("sha256").and_then(Value::as_str),
        ) else {
            continue;
        };
        if !VaultUri::is_vault_uri(uri) {
            continue;
        }
        let resolved = resolve_vault_uri_to_path(uri, vault_roots).ok();
        let missing = resolved.map(|p| !p.exists()).unwrap_or(true);
        if missing {
            if let Some(new_uri) = index.get(sha).filter(|u| **u != uri) {
                suggestions.push(RepairSuggestion {
                    old_uri: uri.to_string(),
                    sha256: sha.to_string(),
                    suggested_uri: (*new_uri).to_string(),
                });
            }
        }
    }
    suggestions
}
