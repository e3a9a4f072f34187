use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;

use mnemo_vault::utc_now_iso_z;

use crate::protocol::{TaskResult, TaskSpec};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS tasks (
  task_id TEXT PRIMARY KEY,
  idempotency_key TEXT,
  type TEXT,
  status TEXT,
  created_at TEXT,
  elapsed_ms INTEGER,
  spec_json TEXT NOT NULL,
  result_json TEXT NOT NULL,
  context_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_tasks_type ON tasks(type);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_idempotency_key ON tasks(idempotency_key);
";

fn connect(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Connection::open(db_path).with_context(|| format!("opening journal {}", db_path.display()))
}

pub fn init_journal(db_path: impl AsRef<Path>) -> Result<()> {
    let conn = connect(db_path.as_ref())?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Append one executed task to the journal.
///
/// Keyed by `task_id`: re-inserting the same id replaces the row, so a late
/// arrival of the same result is idempotent.
pub fn append_task(
    db_path: impl AsRef<Path>,
    spec: &TaskSpec,
    result: &TaskResult,
    context: Option<&Value>,
) -> Result<()> {
    let db_path = db_path.as_ref();
    init_journal(db_path)?;

    if spec.task_id.is_empty() && result.task_id.is_empty() {
        bail!("missing task_id");
    }
    let task_id = if result.task_id.is_empty() {
        spec.task_id.as_str()
    } else {
        result.task_id.as_str()
    };

    let conn = connect(db_path)?;
    conn.execute(
        "INSERT OR REPLACE INTO tasks
           (task_id, idempotency_key, type, status, created_at, elapsed_ms,
            spec_json, result_json, context_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            task_id,
            spec.idempotency_key,
            spec.task_type,
            result.status_str(),
            utc_now_iso_z(),
            result.stats.elapsed_ms as i64,
            serde_json::to_string(spec)?,
            serde_json::to_string(result)?,
            context.map(|c| serde_json::to_string(c)).transpose()?,
        ],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalRow {
    pub task_id: String,
    pub idempotency_key: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
    pub elapsed_ms: Option<i64>,
}

pub fn query_tasks(
    db_path: impl AsRef<Path>,
    task_type: Option<&str>,
    status: Option<&str>,
    limit: usize,
) -> Result<Vec<JournalRow>> {
    let db_path = db_path.as_ref();
    init_journal(db_path)?;

    let mut sql =
        "SELECT task_id, idempotency_key, type, status, created_at, elapsed_ms FROM tasks"
            .to_string();
    let mut wheres = Vec::new();
    let mut params: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(task_type) = task_type {
        wheres.push("type = ?");
        params.push(rusqlite::types::Value::from(task_type.to_string()));
    }
    if let Some(status) = status {
        wheres.push("status = ?");
        params.push(rusqlite::types::Value::from(status.to_string()));
    }
    if !wheres.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&wheres.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ?");
    params.push(rusqlite::types::Value::from(limit as i64));

    let conn = connect(db_path)?;
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(JournalRow {
                task_id: row.get(0)?,
                idempotency_key: row.get(1)?,
                task_type: row.get(2)?,
                status: row.get(3)?,
                created_at: row.get(4)?,
                elapsed_ms: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<_, _>>()?;
    Ok(rows)
}

/// Load the full journaled (spec, result, context) for one task.
///
/// Returned as raw JSON values: the journal accepts historical shapes that
/// predate the current structs.
pub fn load_task(
    db_path: impl AsRef<Path>,
    task_id: &str,
) -> Result<(Value, Value, Option<Value>)> {
    let db_path = db_path.as_ref();
    init_journal(db_path)?;
    let conn = connect(db_path)?;
    let row: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT spec_json, result_json, context_json FROM tasks WHERE task_id = ?1",
            params![task_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((spec_json, result_json, context_json)) = row else {
        bail!("task not found in journal: {task_id}");
    };
    Ok((
        serde_json::from_str(&spec_json)?,
        serde_json::from_str(&result_json)?,
        context_json.map(|c| serde_json::from_str(&c)).transpose()?,
    ))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use crate::protocol::{TaskResult, TaskSpec, TaskStatus};

    use super::{append_task, load_task, query_tasks};

    fn spec(task_type: &str) -> TaskSpec {
        TaskSpec::new(task_type, "idem:x", vec![], json!({}))
    }

    #[test]
    fn append_query_load_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("task_journal.sqlite");

        let task = spec("VERIFY_MANIFEST");
        let result = TaskResult::new(&task.task_id, TaskStatus::Ok, vec![], vec![], 5);
        append_task(&db, &task, &result, Some(&json!({"vault_roots": {}})))?;

        let rows = query_tasks(&db, Some("VERIFY_MANIFEST"), Some("OK"), 10)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task_id, task.task_id);

        let (loaded_spec, loaded_result, context) = load_task(&db, &task.task_id)?;
        assert_eq!(loaded_spec["type"], "VERIFY_MANIFEST");
        assert_eq!(loaded_result["status"], "OK");
        assert_eq!(context.unwrap()["vault_roots"], json!({}));
        Ok(())
    }

    #[test]
    fn reinserting_same_task_id_replaces_the_row() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("journal.sqlite");

        let task = spec("SYNC_MANIFEST_APPLY");
        let first = TaskResult::new(&task.task_id, TaskStatus::Error, vec![], vec![], 1);
        append_task(&db, &task, &first, None)?;
        let late = TaskResult::new(&task.task_id, TaskStatus::Ok, vec![], vec![], 2);
        append_task(&db, &task, &late, None)?;

        let rows = query_tasks(&db, None, None, 10)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status.as_deref(), Some("OK"));
        Ok(())
    }

    #[test]
    fn filters_and_limits_apply() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("journal.sqlite");
        for task_type in ["A", "A", "B"] {
            let task = spec(task_type);
            let result = TaskResult::new(&task.task_id, TaskStatus::Ok, vec![], vec![], 0);
            append_task(&db, &task, &result, None)?;
        }
        assert_eq!(query_tasks(&db, Some("A"), None, 10)?.len(), 2);
        assert_eq!(query_tasks(&db, None, None, 2)?.len(), 2);
        assert!(load_task(&db, "t_missing").is_err());
        Ok(())
    }
}
