use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::Result;
use rusqlite::params;
use tracing::{debug, info};
use walkdir::WalkDir;

use mnemo_vault::MuDocument;

use crate::db::{connect, init_db, reset_db};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    pub indexed: usize,
}

fn json_list(ids: &[String]) -> Option<String> {
    if ids.is_empty() {
        None
    } else {
        serde_json::to_string(ids).ok()
    }
}

/// Index every `.mimo` under `mu_root` into meta.sqlite.
///
/// The index is derived and rebuildable: unreadable or invalid files are
/// skipped, and `reset` drops the previous contents first.
pub fn index_mu_dir(
    mu_root: impl AsRef<Path>,
    db_path: impl AsRef<Path>,
    reset: bool,
) -> Result<IndexSummary> {
    let mu_root = mu_root.as_ref();
    let db_path = db_path.as_ref();
    if reset {
        reset_db(db_path)?;
    } else {
        init_db(db_path)?;
    }

    let conn = connect(db_path)?;
    let mut indexed = 0usize;

    for entry in WalkDir::new(mu_root).sort_by_file_name() {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().map(|e| e != "mimo").unwrap_or(true) {
            continue;
        }

        let Ok(mu) = MuDocument::from_path(entry.path()) else {
            debug!(path = %entry.path().display(), "skipping unreadable MU");
            continue;
        };
        let Some(mu_id) = mu.mu_id().filter(|id| !id.is_empty()).map(str::to_string) else {
            debug!(path = %entry.path().display(), "skipping MU without mu_id");
            continue;
        };

        let links = mu.links();
        let tombstone_json = mu
            .tombstone()
            .and_then(|v| serde_json::to_string(v).ok());
        let mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64());

        conn.execute(
            "INSERT OR REPLACE INTO mu
               (mu_id, time, summary, content_hash, mu_key, privacy_level,
                corrects_json, supersedes_json, duplicate_of_json, tombstone_json,
                source_kind, source_note, path, mtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                mu_id,
                mu.meta_time(),
                mu.summary(),
                mu.content_hash(),
                mu.mu_key(),
                mu.privacy_level(),
                json_list(&links.corrects),
                json_list(&links.supersedes),
                json_list(&links.duplicate_of),
                tombstone_json,
                mu.meta_source_kind(),
                mu.meta_source_note(),
                entry.path().display().to_string(),
                mtime,
            ],
        )?;

        for tag in mu.tags() {
            conn.execute("INSERT OR IGNORE INTO tag(tag) VALUES (?1)", params![tag])?;
            conn.execute(
                "INSERT OR IGNORE INTO mu_tag(mu_id, tag) VALUES (?1, ?2)",
                params![mu_id, tag],
            )?;
        }

        indexed += 1;
    }

    info!(indexed, mu_root = %mu_root.display(), "mu index updated");
    Ok(IndexSummary { indexed })
}


#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::test_support::write_mu;
    use super::index_mu_dir;
    use crate::db::connect;

    #[test]
    fn indexes_mimo_tree_and_tags() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mu_root = dir.path().join("mu");
        write_mu(
            &mu_root,
            "mu_001",
            "booked flights to Kyoto",
            "2026-02-20T10:00:00Z",
            &["travel"],
            "private",
        );
        write_mu(
            &mu_root,
            "mu_002",
            "weekly review notes",
            "2026-02-21T10:00:00Z",
            &["review", "weekly"],
            "org",
        );
        std::fs::write(mu_root.join("not_an_mu.txt"), "ignored").unwrap();

        let db = dir.path().join("meta.sqlite");
        let summary = index_mu_dir(&mu_root, &db, false)?;
        assert_eq!(summary.indexed, 2);

        let conn = connect(&db)?;
        let tag_count: i64 = conn.query_row("SELECT count(*) FROM tag", [], |r| r.get(0))?;
        assert_eq!(tag_count, 3);
        let privacy: String = conn.query_row(
            "SELECT privacy_level FROM mu WHERE mu_id = 'mu_002'",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(privacy, "org");
        Ok(())
    }

    #[test]
    fn reindex_with_reset_is_a_pure_function_of_the_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mu_root = dir.path().join("mu");
        write_mu(
            &mu_root,
            "mu_001",
            "first",
            "2026-02-20T10:00:00Z",
            &[],
            "private",
        );
        let db = dir.path().join("meta.sqlite");
        index_mu_dir(&mu_root, &db, false)?;

        std::fs::remove_file(mu_root.join("mu_001.mimo"))?;
        write_mu(
            &mu_root,
            "mu_002",
            "second",
            "2026-02-21T10:00:00Z",
            &[],
            "private",
        );
        let summary = index_mu_dir(&mu_root, &db, true)?;
        assert_eq!(summary.indexed, 1);

        let conn = connect(&db)?;
        let count: i64 = conn.query_row("SELECT count(*) FROM mu", [], |r| r.get(0))?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn invalid_yaml_is_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mu_root = dir.path().join("mu");
        std::fs::create_dir_all(&mu_root)?;
        std::fs::write(mu_root.join("broken.mimo"), ":\n  - [unbalanced")?;
        let db = dir.path().join("meta.sqlite");
        let summary = index_mu_dir(&mu_root, &db, false)?;
        assert_eq!(summary.indexed, 0);
        Ok(())
    }
}
