use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// meta.sqlite schema.
///
/// Kept intentionally small and migration-friendly: new columns are added
/// through [`ensure_column`] at init, never by rewriting tables.
const SCHEMA_SQL: &str = "
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS mu (
  mu_id TEXT PRIMARY KEY,
  time TEXT,
  summary TEXT,
  content_hash TEXT,
  mu_key TEXT,
  privacy_level TEXT,
  corrects_json TEXT,
  supersedes_json TEXT,
  duplicate_of_json TEXT,
  tombstone_json TEXT,
  source_kind TEXT,
  source_note TEXT,
  path TEXT,
  mtime REAL
);

CREATE TABLE IF NOT EXISTS tag (
  tag TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS mu_tag (
  mu_id TEXT NOT NULL,
  tag TEXT NOT NULL,
  PRIMARY KEY (mu_id, tag),
  FOREIGN KEY (mu_id) REFERENCES mu(mu_id) ON DELETE CASCADE,
  FOREIGN KEY (tag) REFERENCES tag(tag) ON DELETE CASCADE
);

CREATE VIRTUAL TABLE IF NOT EXISTS mu_fts USING fts5(
  mu_id UNINDEXED,
  summary,
  content='mu',
  content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS mu_ai AFTER INSERT ON mu BEGIN
  INSERT INTO mu_fts(rowid, mu_id, summary) VALUES (new.rowid, new.mu_id, coalesce(new.summary,''));
END;

CREATE TRIGGER IF NOT EXISTS mu_ad AFTER DELETE ON mu BEGIN
  INSERT INTO mu_fts(mu_fts, rowid, mu_id, summary) VALUES ('delete', old.rowid, old.mu_id, old.summary);
END;

CREATE TRIGGER IF NOT EXISTS mu_au AFTER UPDATE ON mu BEGIN
  INSERT INTO mu_fts(mu_fts, rowid, mu_id, summary) VALUES ('delete', old.rowid, old.mu_id, old.summary);
  INSERT INTO mu_fts(rowid, mu_id, summary) VALUES (new.rowid, new.mu_id, coalesce(new.summary,''));
END;

CREATE INDEX IF NOT EXISTS idx_mu_time ON mu(time);
CREATE INDEX IF NOT EXISTS idx_mu_privacy ON mu(privacy_level);

CREATE TABLE IF NOT EXISTS view_cache (
  view_id TEXT PRIMARY KEY,
  template TEXT NOT NULL,
  scope_json TEXT NOT NULL,
  source_mu_ids_json TEXT NOT NULL,
  source_mu_hash TEXT,
  created_at TEXT NOT NULL,
  expires_at TEXT,
  stale INTEGER NOT NULL DEFAULT 0,
  content_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_view_template ON view_cache(template);
CREATE INDEX IF NOT EXISTS idx_view_stale ON view_cache(stale);
";

/// Open a connection, creating parent directories as needed.
pub fn connect(db_path: impl AsRef<Path>) -> Result<Connection> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Connection::open(db_path).with_context(|| format!("opening index db {}", db_path.display()))
}

/// Add a column when it does not exist yet (non-destructive migration).
fn ensure_column(conn: &Connection, table: &str, column: &str, coltype: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<_, _>>()?;
    if !existing.iter().any(|c| c == column) {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {coltype}"))?;
    }
    Ok(())
}

/// Create tables and run lightweight migrations.  Safe to call repeatedly.
pub fn init_db(db_path: impl AsRef<Path>) -> Result<()> {
    let conn = connect(db_path)?;
    conn.execute_batch(SCHEMA_SQL)?;
    ensure_column(&conn, "mu", "supersedes_json", "TEXT")?;
    ensure_column(&conn, "mu", "duplicate_of_json", "TEXT")?;
    Ok(())
}

/// Drop derived tables and rebuild the schema.  The index is a pure function
/// of the MU file tree, so this is always safe.
pub fn reset_db(db_path: impl AsRef<Path>) -> Result<()> {
    let db_path = db_path.as_ref();
    if db_path.exists() {
        let conn = connect(db_path)?;
        conn.execute_batch(
            "
            DROP TABLE IF EXISTS mu_tag;
            DROP TABLE IF EXISTS tag;
            DROP TABLE IF EXISTS mu;
            DROP TABLE IF EXISTS mu_fts;
            ",
        )?;
    }
    init_db(db_path)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::{connect, init_db, reset_db};

    #[test]
    fn init_is_idempotent_and_adds_migrated_columns() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("index").join("meta.sqlite");
        init_db(&db)?;
        init_db(&db)?;

        let conn = connect(&db)?;
        let mut stmt = conn.prepare("PRAGMA table_info(mu)")?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<_, _>>()?;
        assert!(columns.iter().any(|c| c == "supersedes_json"));
        assert!(columns.iter().any(|c| c == "duplicate_of_json"));
        Ok(())
    }

    #[test]
    fn migration_upgrades_older_schema_without_data_loss() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("meta.sqlite");
        {
            let conn = connect(&db)?;
            conn.execute_batch(
                "CREATE TABLE mu (mu_id TEXT PRIMARY KEY, time TEXT, summary TEXT,
                 content_hash TEXT, mu_key TEXT, privacy_level TEXT, corrects_json TEXT,
                 tombstone_json TEXT, source_kind TEXT, source_note TEXT, path TEXT, mtime REAL);
                 INSERT INTO mu (mu_id, summary) VALUES ('mu_old', 'kept');",
            )?;
        }
        init_db(&db)?;

        let conn = connect(&db)?;
        let summary: String = conn.query_row(
            "SELECT summary FROM mu WHERE mu_id = 'mu_old'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(summary, "kept");
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM mu WHERE supersedes_json IS NULL",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn reset_wipes_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("meta.sqlite");
        init_db(&db)?;
        {
            let conn = connect(&db)?;
            conn.execute("INSERT INTO mu (mu_id) VALUES ('mu_x')", [])?;
        }
        reset_db(&db)?;
        let conn = connect(&db)?;
        let count: i64 = conn.query_row("SELECT count(*) FROM mu", [], |row| row.get(0))?;
        assert_eq!(count, 0);
        Ok(())
    }
}
