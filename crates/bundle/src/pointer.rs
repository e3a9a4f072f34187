use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value, json};

use mnemo_vault::{
    Pointer, VaultRoots, VaultUri, is_sha256_form, repair_suggest_by_sha256,
    resolve_vault_uri_to_path, sha256_file,
};

/// Result of resolving one pointer back to raw bytes.
///
/// Structured outcome rather than an error: callers (bundle builder, repair
/// pipelines) branch on `ok` and keep the diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub ok: bool,
    pub uri: Option<String>,
    pub path: Option<String>,
    pub sha256_expected: Option<String>,
    pub sha256_actual: Option<String>,
    pub snippet: Option<String>,
    pub diagnostics: Value,
}

impl ResolveOutcome {
    fn fail(
        uri: Option<&str>,
        path: Option<String>,
        expected: Option<&str>,
        actual: Option<String>,
        diagnostics: Map<String, Value>,
    ) -> Self {
        Self {
            ok: false,
            uri: uri.map(str::to_string),
            path,
            sha256_expected: expected.map(str::to_string),
            sha256_actual: actual,
            snippet: None,
            diagnostics: Value::Object(diagnostics),
        }
    }
}

/// 1-indexed inclusive line range; `start >= 1` and `end >= start`.
fn read_line_range(path: &Path, start: i64, end: i64) -> Result<String, String> {
    if start < 1 || end < start {
        return Err(format!("invalid line_range: start={start} end={end}"));
    }
    let text =
        std::fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
    let lines: Vec<&str> = text.lines().collect();
    let start = (start - 1) as usize;
    let end = (end as usize).min(lines.len());
    if start >= lines.len() {
        return Ok(String::new());
    }
    Ok(lines[start..end].join("\n"))
}

/// Resolve a pointer to a local file, verify sha256, and extract a snippet.
///
/// `vault://` URIs resolve through `vault_roots`.  Legacy URIs (file://,
/// absolute paths) resolve only by sha256 lookup in the raw manifest, noting
/// the substitution in diagnostics.
pub fn resolve_pointer(
    pointer: &Pointer,
    vault_roots: &VaultRoots,
    raw_manifest_path: Option<&Path>,
) -> ResolveOutcome {
    let mut diag = Map::new();

    let sha = pointer.sha256.as_deref();
    let Some(uri) = pointer.uri.as_deref().filter(|u| !u.is_empty()) else {
        let mut d = Map::new();
        d.insert("error".into(), json!("missing uri"));
        return ResolveOutcome::fail(None, None, sha, None, d);
    };

    let verified_sha = sha.filter(|s| is_sha256_form(s));
    if verified_sha.is_none() {
        diag.insert("warning".into(), json!("missing/invalid sha256; cannot verify"));
    }

    let chosen_uri = if VaultUri::is_vault_uri(uri) {
        uri.to_string()
    } else {
        // Legacy pointer: only resolvable via manifest lookup by sha256.
        let (Some(manifest), Some(sha)) = (raw_manifest_path, verified_sha) else {
            diag.insert("error".into(), json!("legacy uri without manifest lookup"));
            return ResolveOutcome::fail(Some(uri), None, sha, None, diag);
        };
        match repair_suggest_by_sha256(manifest, sha) {
            Ok(Some(new_uri)) => {
                diag.insert("resolved_via_manifest".into(), json!(true));
                diag.insert("original_uri".into(), json!(uri));
                new_uri
            }
            Ok(None) => {
                diag.insert("error".into(), json!("sha256 not found in raw manifest"));
                return ResolveOutcome::fail(Some(uri), None, Some(sha), None, diag);
            }
            Err(err) => {
                diag.insert("error".into(), json!(format!("manifest lookup failed: {err}")));
                return ResolveOutcome::fail(Some(uri), None, Some(sha), None, diag);
            }
        }
    };

    let path = match resolve_vault_uri_to_path(&chosen_uri, vault_roots) {
        Ok(path) => path,
        Err(err) => {
            diag.insert(
                "error".into(),
                json!(format!("resolving vault uri failed: {err}")),
            );
            return ResolveOutcome::fail(Some(&chosen_uri), None, sha, None, diag);
        }
    };

    if !path.exists() {
        diag.insert("error".into(), json!("missing file"));
        return ResolveOutcome::fail(
            Some(&chosen_uri),
            Some(path.display().to_string()),
            sha,
            None,
            diag,
        );
    }

    let actual = match sha256_file(&path) {
        Ok(actual) => actual,
        Err(err) => {
            diag.insert("error".into(), json!(format!("hashing failed: {err}")));
            return ResolveOutcome::fail(
                Some(&chosen_uri),
                Some(path.display().to_string()),
                sha,
                None,
                diag,
            );
        }
    };
    if let Some(expected) = verified_sha {
        if actual != expected {
            diag.insert("error".into(), json!("sha256 mismatch"));
            return ResolveOutcome::fail(
                Some(&chosen_uri),
                Some(path.display().to_string()),
                Some(expected),
                Some(actual),
                diag,
            );
        }
    }

    // Snippet extraction per locator kind.
    let mut snippet = None;
    match &pointer.locator {
        None => {
            diag.insert("warning".into(), json!("missing locator; no snippet extracted"));
        }
        Some(locator) => match locator.kind.as_deref() {
            Some("line_range") => {
                match read_line_range(
                    &path,
                    locator.start.unwrap_or(0),
                    locator.end.unwrap_or(0),
                ) {
                    Ok(text) => snippet = Some(text),
                    Err(err) => {
                        diag.insert(
                            "warning".into(),
                            json!(format!("snippet extraction failed: {err}")),
                        );
                    }
                }
            }
            other => {
                diag.insert(
                    "warning".into(),
                    json!(format!("unsupported locator kind: {other:?}")),
                );
            }
        },
    }

    ResolveOutcome {
        ok: true,
        uri: Some(chosen_uri),
        path: Some(path.display().to_string()),
        sha256_expected: verified_sha.map(str::to_string),
        sha256_actual: Some(actual),
        snippet,
        diagnostics: Value::Object(diag),
    }
}
