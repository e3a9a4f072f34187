use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::VaultError;
use crate::hash::sha256_file;
use crate::manifest::{RawManifestLine, append_jsonl};
use crate::uri::{VaultKind, VaultUri};
use crate::utc_now_iso_z;

/// Outcome of ingesting one raw file.
#[derive(Debug, Clone)]
pub struct RawIngest {
    pub raw_id: String,
    pub uri: String,
    pub sha256: String,
    pub dest_path: PathBuf,
    pub manifest_path: PathBuf,
}

/// Outcome of a batch ingest; one file failing does not abort the batch.
#[derive(Debug, Default)]
pub struct BatchIngest<T> {
    pub ingested: Vec<T>,
    pub errors: Vec<(PathBuf, VaultError)>,
}

pub(crate) fn default_raw_manifest(vault_root: &Path) -> PathBuf {
    vault_root.join("manifests").join("raw_manifest.jsonl")
}

/// `raw/<yyyy>/<mm>/<sha256_hex><ext>` relative path for a raw artifact.
/// Only the last suffix is kept, lower-cased.
fn dest_relpath_for_raw(raw_hex: &str, src: &Path) -> PathBuf {
    let now = Utc::now();
    let suffix = src
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    PathBuf::from(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{raw_hex}{suffix}"))
}

fn mtime_iso(path: &Path) -> Option<String> {
    let modified = path.metadata().ok()?.modified().ok()?;
    let dt: DateTime<Utc> = modified.into();
    Some(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Ingest one local file into the vault under kind=raw.
///
/// sha256 is the raw_id; the copy is idempotent (a file already present at
/// the content-addressed destination is left untouched) and the manifest
/// line is appended afterwards.
pub fn ingest_raw_file(
    src: impl AsRef<Path>,
    vault_root: impl AsRef<Path>,
    vault_id: &str,
    manifest_path: Option<&Path>,
) -> Result<RawIngest, VaultError> {
    let src = src.as_ref();
    if !src.is_file() {
        return Err(VaultError::NotFound(src.to_path_buf()));
    }
    let vault_root = vault_root.as_ref();
    let manifest_path = manifest_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_raw_manifest(vault_root));

    let sha = sha256_file(src)?;
    let raw_hex = sha.trim_start_matches("sha256:");
    let rel = dest_relpath_for_raw(raw_hex, src);
    let dest_path = vault_root.join("raw").join(&rel);
    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !dest_path.exists() {
        std::fs::copy(src, &dest_path)?;
    }

    let uri = VaultUri::new(vault_id, VaultKind::Raw, rel.to_string_lossy()).to_string();
    let record = RawManifestLine {
        raw_id: sha.clone(),
        uri: uri.clone(),
        sha256: sha.clone(),
        size_bytes: dest_path.metadata()?.len(),
        mtime: mtime_iso(&dest_path),
        mime: guess_mime(&dest_path),
        ingested_at: utc_now_iso_z(),
    };
    append_jsonl(&manifest_path, &record)?;

    Ok(RawIngest {
        raw_id: sha.clone(),
        uri,
        sha256: sha,
        dest_path,
        manifest_path,
    })
}

/// Recursively ingest a file or directory (files in sorted order).
pub fn ingest_raw_tree(
    input: impl AsRef<Path>,
    vault_root: impl AsRef<Path>,
    vault_id: &str,
    manifest_path: Option<&Path>,
) -> Result<BatchIngest<RawIngest>, VaultError> {
    let input = input.as_ref();
    if !input.exists() {
        return Err(VaultError::NotFound(input.to_path_buf()));
    }
    let vault_root = vault_root.as_ref();

    let mut batch = BatchIngest {
        ingested: Vec::new(),
        errors: Vec::new(),
    };
    for entry in WalkDir::new(input).sort_by_file_name() {
        let entry = entry.map_err(|e| VaultError::validation(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        match ingest_raw_file(entry.path(), vault_root, vault_id, manifest_path) {
            Ok(result) => batch.ingested.push(result),
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "raw ingest failed; continuing batch");
                batch.errors.push((entry.path().to_path_buf(), err));
            }
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::{ingest_raw_file, ingest_raw_tree};
    use crate::hash::sha256_file;
    use crate::manifest::read_jsonl;
    use crate::uri::VaultUri;

    #[test]
    fn ingest_stores_by_sha_and_appends_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("note.md");
        std::fs::write(&src, "remember the milk\n").unwrap();
        let vault_root = dir.path().join("vaults").join("default");

        let result = ingest_raw_file(&src, &vault_root, "default", None).unwrap();
        assert!(result.dest_path.exists());
        assert_eq!(sha256_file(&result.dest_path).unwrap(), result.raw_id);
        assert!(
            result
                .dest_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .ends_with(".md")
        );

        let parsed = VaultUri::parse(&result.uri).unwrap();
        assert_eq!(parsed.vault_id, "default");

        let records = read_jsonl(&result.manifest_path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["raw_id"], result.raw_id);
        assert_eq!(records[0]["mime"], "text/markdown");
    }

    #[test]
    fn reingesting_same_content_does_not_duplicate_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, "same bytes").unwrap();
        let vault_root = dir.path().join("vault");

        let first = ingest_raw_file(&src, &vault_root, "default", None).unwrap();
        let second = ingest_raw_file(&src, &vault_root, "default", None).unwrap();
        assert_eq!(first.dest_path, second.dest_path);

        // manifest is append-only: two lines, same raw_id
        let records = read_jsonl(&first.manifest_path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["raw_id"], records[1]["raw_id"]);
    }

    #[test]
    fn tree_ingest_continues_past_individual_failures() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(input.join("sub")).unwrap();
        std::fs::write(input.join("one.txt"), "1").unwrap();
        std::fs::write(input.join("sub").join("two.txt"), "2").unwrap();

        let vault_root = dir.path().join("vault");
        let batch = ingest_raw_tree(&input, &vault_root, "default", None).unwrap();
        assert_eq!(batch.ingested.len(), 2);
        assert!(batch.errors.is_empty());
    }
}
