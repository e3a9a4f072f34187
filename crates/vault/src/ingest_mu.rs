use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::VaultError;
use crate::ingest::BatchIngest;
use crate::manifest::{MuManifestLine, append_jsonl};
use crate::mu::MuDocument;
use crate::uri::{VaultKind, VaultUri};
use crate::utc_now_iso_z;

/// Outcome of ingesting one `.mimo` file into the vault under kind=mu.
#[derive(Debug, Clone)]
pub struct MuIngest {
    pub mu_id: String,
    pub uri: String,
    pub dest_path: PathBuf,
    pub manifest_path: PathBuf,
}

pub(crate) fn default_mu_manifest(vault_root: &Path) -> PathBuf {
    vault_root.join("manifests").join("mu_manifest.jsonl")
}

fn dest_relpath_for_mu(mu_id: &str) -> PathBuf {
    let now = Utc::now();
    PathBuf::from(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{mu_id}.mimo"))
}

/// Ingest one MU file: validate the manifest-required fields, copy to
/// `mu/<yyyy>/<mm>/<mu_id>.mimo` (idempotent), append the MU manifest line.
/// The MU content itself is never modified.
pub fn ingest_mu_file(
    src: impl AsRef<Path>,
    vault_root: impl AsRef<Path>,
    vault_id: &str,
    manifest_path: Option<&Path>,
) -> Result<MuIngest, VaultError> {
    let src = src.as_ref();
    if !src.is_file() {
        return Err(VaultError::NotFound(src.to_path_buf()));
    }
    let vault_root = vault_root.as_ref();
    let manifest_path = manifest_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_mu_manifest(vault_root));

    let mu = MuDocument::from_path(src)?;
    let fields = mu.validate_for_ingest()?;
    let source_raw_ids = mu.source_raw_ids();

    let rel = dest_relpath_for_mu(&fields.mu_id);
    let dest_path = vault_root.join("mu").join(&rel);
    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !dest_path.exists() {
        std::fs::copy(src, &dest_path)?;
    }

    let uri = VaultUri::new(vault_id, VaultKind::Mu, rel.to_string_lossy()).to_string();
    let record = MuManifestLine {
        mu_id: fields.mu_id.clone(),
        schema_version: fields.schema_version,
        uri: uri.clone(),
        source_raw_ids,
        mu_key: fields.mu_key,
        content_hash: fields.content_hash,
        created_at: utc_now_iso_z(),
    };
    append_jsonl(&manifest_path, &record)?;

    Ok(MuIngest {
        mu_id: fields.mu_id,
        uri,
        dest_path,
        manifest_path,
    })
}

/// Ingest every `.mimo` under a directory (sorted), or a single file.
pub fn ingest_mu_tree(
    input: impl AsRef<Path>,
    vault_root: impl AsRef<Path>,
    vault_id: &str,
    manifest_path: Option<&Path>,
) -> Result<BatchIngest<MuIngest>, VaultError> {
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
        let is_mimo = entry
            .path()
            .extension()
            .map(|e| e == "mimo")
            .unwrap_or(false);
        if input.is_dir() && !is_mimo {
            continue;
        }
        match ingest_mu_file(entry.path(), vault_root, vault_id, manifest_path) {
            Ok(result) => batch.ingested.push(result),
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "mu ingest failed; continuing batch");
                batch.errors.push((entry.path().to_path_buf(), err));
            }
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::{ingest_mu_file, ingest_mu_tree};
    use crate::manifest::read_jsonl;
    use crate::mu::SAMPLE_MU;

    #[test]
    fn ingest_mu_extracts_manifest_fields() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("mu_20260221_0001.mimo");
        std::fs::write(&src, SAMPLE_MU).unwrap();
        let vault_root = dir.path().join("vault");

        let result = ingest_mu_file(&src, &vault_root, "default", None).unwrap();
        assert_eq!(result.mu_id, "mu_20260221_0001");
        assert!(result.dest_path.exists());
        assert!(result.uri.starts_with("vault://default/mu/"));

        let records = read_jsonl(&result.manifest_path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["mu_id"], "mu_20260221_0001");
        assert_eq!(records[0]["schema_version"], "1.1");
        assert_eq!(
            records[0]["source_raw_ids"][0],
            "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc"
        );
    }

    #[test]
    fn invalid_mu_is_rejected_but_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mu_out");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(input.join("good.mimo"), SAMPLE_MU).unwrap();
        std::fs::write(input.join("bad.mimo"), "mu_id: only-an-id\n").unwrap();
        std::fs::write(input.join("ignored.txt"), "not an mu").unwrap();

        let vault_root = dir.path().join("vault");
        let batch = ingest_mu_tree(&input, &vault_root, "default", None).unwrap();
        assert_eq!(batch.ingested.len(), 1);
        assert_eq!(batch.errors.len(), 1);
    }
}
