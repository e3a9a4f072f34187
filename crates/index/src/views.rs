use std::path::Path;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;

use mnemo_vault::sha256_bytes;

use crate::db::{connect, init_db};

/// A cached, reusable rendering of some scope/template over a set of MU ids.
///
/// The dependency set (`source_mu_ids`) is what keeps the cache honest:
/// consumers MUST treat `stale` rows as invalid.
#[derive(Debug, Clone, Serialize)]
pub struct ViewRecord {
    pub view_id: String,
    pub template: String,
    pub scope: Value,
    pub source_mu_ids: Vec<String>,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub stale: bool,
    pub content: Value,
}

/// Insert or replace a view with its dependency set.
pub fn put_view(
    db_path: impl AsRef<Path>,
    view_id: &str,
    template: &str,
    scope: &Value,
    source_mu_ids: &[String],
    content: &Value,
    expires_at: Option<&str>,
) -> Result<()> {
    let db_path = db_path.as_ref();
    init_db(db_path)?;

    let scope_json = serde_json::to_string(scope)?;
    let mut sorted_ids = source_mu_ids.to_vec();
    sorted_ids.sort();
    let src_json = serde_json::to_string(&sorted_ids)?;
    let source_mu_hash = sha256_bytes(format!("{scope_json}|{src_json}").as_bytes());

    let conn = connect(db_path)?;
    conn.execute(
        "INSERT OR REPLACE INTO view_cache
           (view_id, template, scope_json, source_mu_ids_json, source_mu_hash,
            created_at, expires_at, stale, content_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
        params![
            view_id,
            template,
            scope_json,
            src_json,
            source_mu_hash,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            expires_at,
            serde_json::to_string(content)?,
        ],
    )?;
    Ok(())
}

pub fn get_view(db_path: impl AsRef<Path>, view_id: &str) -> Result<Option<ViewRecord>> {
    let db_path = db_path.as_ref();
    init_db(db_path)?;
    let conn = connect(db_path)?;
    let row: Option<(String, String, String, String, String, Option<String>, i64, String)> = conn
        .query_row(
            "SELECT view_id, template, scope_json, source_mu_ids_json, created_at,
                    expires_at, stale, content_json
             FROM view_cache WHERE view_id = ?1",
            params![view_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            },
        )
        .optional()?;

    let Some((view_id, template, scope_json, src_json, created_at, expires_at, stale, content_json)) =
        row
    else {
        return Ok(None);
    };
    Ok(Some(ViewRecord {
        view_id,
        template,
        scope: serde_json::from_str(&scope_json)?,
        source_mu_ids: serde_json::from_str(&src_json)?,
        created_at,
        expires_at,
        stale: stale != 0,
        content: serde_json::from_str(&content_json)?,
    }))
}

/// Mark every fresh view whose dependency set intersects `changed_mu_ids` as
/// stale.  Brute-force scan; linear in views.  Returns the count marked.
pub fn invalidate_by_mu_ids(db_path: impl AsRef<Path>, changed_mu_ids: &[String]) -> Result<usize> {
    let db_path = db_path.as_ref();
    init_db(db_path)?;
    if changed_mu_ids.is_empty() {
        return Ok(0);
    }
    let changed: std::collections::BTreeSet<&str> =
        changed_mu_ids.iter().map(String::as_str).collect();

    let conn = connect(db_path)?;
    let mut stmt =
        conn.prepare("SELECT view_id, source_mu_ids_json FROM view_cache WHERE stale = 0")?;
    let rows: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<_, _>>()?;

    let mut to_stale = Vec::new();
    for (view_id, src_json) in rows {
        let deps: Vec<String> = serde_json::from_str(&src_json).unwrap_or_default();
        if deps.iter().any(|d| changed.contains(d.as_str())) {
            to_stale.push(view_id);
        }
    }
    for view_id in &to_stale {
        conn.execute(
            "UPDATE view_cache SET stale = 1 WHERE view_id = ?1",
            params![view_id],
        )?;
    }
    Ok(to_stale.len())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use super::{get_view, invalidate_by_mu_ids, put_view};

    #[test]
    fn put_get_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("meta.sqlite");

        put_view(
            &db,
            "view_1",
            "time_overview_v1",
            &json!({"days": 7}),
            &["mu_b".into(), "mu_a".into()],
            &json!({"sections": []}),
            None,
        )?;

        let view = get_view(&db, "view_1")?.unwrap();
        assert_eq!(view.template, "time_overview_v1");
        assert_eq!(view.source_mu_ids, vec!["mu_a", "mu_b"]);
        assert!(!view.stale);
        assert!(get_view(&db, "missing")?.is_none());
        Ok(())
    }

    #[test]
    fn invalidation_marks_exactly_intersecting_views() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("meta.sqlite");

        put_view(&db, "v1", "t", &json!({}), &["mu_a".into()], &json!({}), None)?;
        put_view(&db, "v2", "t", &json!({}), &["mu_b".into()], &json!({}), None)?;
        put_view(
            &db,
            "v3",
            "t",
            &json!({}),
            &["mu_a".into(), "mu_c".into()],
            &json!({}),
            None,
        )?;

        let count = invalidate_by_mu_ids(&db, &["mu_a".into()])?;
        assert_eq!(count, 2);
        assert!(get_view(&db, "v1")?.unwrap().stale);
        assert!(!get_view(&db, "v2")?.unwrap().stale);
        assert!(get_view(&db, "v3")?.unwrap().stale);

        // already-stale views are not re-counted
        let again = invalidate_by_mu_ids(&db, &["mu_a".into()])?;
        assert_eq!(again, 0);

        assert_eq!(invalidate_by_mu_ids(&db, &[])?, 0);
        Ok(())
    }
}
