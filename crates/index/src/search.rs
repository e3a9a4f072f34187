use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use serde_json::{Value, json};

use mnemo_vault::rank_privacy;

use crate::db::{connect, init_db};

/// Retrieval request against meta.sqlite.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub tag: Option<String>,
    pub privacy: Option<String>,
    /// Visibility level for returned results/snippets.
    pub target_level: String,
    pub include_snippet: bool,
    pub limit: usize,
    /// Membership fence: when set, only these mu_ids are eligible (applied
    /// at the SQL level; an empty fence yields an empty result).
    pub allow_mu_ids: Option<BTreeSet<String>>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: None,
            since: None,
            until: None,
            tag: None,
            privacy: None,
            target_level: "private".to_string(),
            include_snippet: false,
            limit: 20,
            allow_mu_ids: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub mu_id: String,
    pub score: Option<f64>,
    pub summary: Option<String>,
    pub reason: Value,
    pub path: Option<String>,
    pub privacy_level: Option<String>,
}

fn looks_like_cjk(s: &str) -> bool {
    s.chars().any(|ch| ('\u{4e00}'..='\u{9fff}').contains(&ch))
}

/// FTS5 MATCH has its own query syntax that punctuation, leading dashes and
/// operators break easily.  Anything beyond plain ASCII words falls back to
/// LIKE.
fn looks_like_unsafe_fts(s: &str) -> bool {
    s.trim().chars().any(|ch| {
        let allowed =
            ch.is_ascii_alphanumeric() || ch == ' ' || ch == '_' || ('\u{4e00}'..='\u{9fff}').contains(&ch);
        !allowed
    })
}

/// Summary-derived snippet: at most `max_chars`, windowed around the first
/// case-insensitive query match when the summary is longer.
fn make_snippet(summary: Option<&str>, query: Option<&str>, max_chars: usize) -> Option<String> {
    let summary = summary?.trim();
    if summary.is_empty() {
        return None;
    }
    let chars: Vec<char> = summary.chars().collect();
    if chars.len() <= max_chars {
        return Some(summary.to_string());
    }
    if let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) {
        let lower_summary = summary.to_lowercase();
        let lower_query = query.to_lowercase();
        if let Some(byte_idx) = lower_summary.find(&lower_query) {
            let char_idx = lower_summary[..byte_idx].chars().count();
            let query_chars = lower_query.chars().count();
            let start = char_idx.saturating_sub(60);
            let end = (char_idx + query_chars + 120).min(chars.len());
            let mut chunk: String = chars[start..end].iter().collect();
            if start > 0 {
                chunk = format!("…{chunk}");
            }
            if end < chars.len() {
                chunk.push('…');
            }
            return Some(chunk);
        }
    }
    let mut clipped: String = chars[..max_chars - 1].iter().collect();
    clipped.push('…');
    Some(clipped)
}

/// Hybrid retrieval over MU summaries.
///
/// Plain ASCII-word queries go through FTS5 ranked by bm25 ascending; CJK or
/// punctuated queries use a LIKE substring fallback ordered by time desc (the
/// FTS tokenizer may not segment those, and retrieval must still find the
/// canonical member).  Empty query orders by time desc.
pub fn search_mu(db_path: impl AsRef<Path>, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    let db_path = db_path.as_ref();
    init_db(db_path)?;

    if let Some(allow) = &query.allow_mu_ids {
        if allow.is_empty() {
            return Ok(Vec::new());
        }
    }

    let text = query
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());
    let use_like = text
        .map(|q| looks_like_cjk(q) || looks_like_unsafe_fts(q))
        .unwrap_or(false);

    let mut joins: Vec<&str> = Vec::new();
    let mut wheres: Vec<String> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();

    let score_expr = match (text, use_like) {
        (Some(q), false) => {
            joins.push("JOIN mu_fts ON mu_fts.mu_id = mu.mu_id");
            wheres.push("mu_fts MATCH ?".to_string());
            params.push(SqlValue::from(q.to_string()));
            "bm25(mu_fts)"
        }
        (Some(q), true) => {
            wheres.push("mu.summary LIKE ?".to_string());
            params.push(SqlValue::from(format!("%{q}%")));
            "NULL"
        }
        (None, _) => "NULL",
    };

    if let Some(since) = &query.since {
        wheres.push("mu.time >= ?".to_string());
        params.push(SqlValue::from(since.clone()));
    }
    if let Some(until) = &query.until {
        wheres.push("mu.time <= ?".to_string());
        params.push(SqlValue::from(until.clone()));
    }
    if let Some(privacy) = &query.privacy {
        wheres.push("mu.privacy_level = ?".to_string());
        params.push(SqlValue::from(privacy.clone()));
    }
    if let Some(tag) = &query.tag {
        joins.push("JOIN mu_tag ON mu_tag.mu_id = mu.mu_id");
        wheres.push("mu_tag.tag = ?".to_string());
        params.push(SqlValue::from(tag.clone()));
    }
    if let Some(allow) = &query.allow_mu_ids {
        let placeholders = vec!["?"; allow.len()].join(",");
        wheres.push(format!("mu.mu_id IN ({placeholders})"));
        for id in allow {
            params.push(SqlValue::from(id.clone()));
        }
    }

    let mut sql = format!(
        "SELECT mu.mu_id, mu.summary, mu.privacy_level, mu.path, {score_expr} as score FROM mu {}",
        joins.join(" ")
    );
    if !wheres.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&wheres.join(" AND "));
    }
    if text.is_some() && !use_like {
        sql.push_str(" ORDER BY score ASC");
    } else {
        sql.push_str(" ORDER BY mu.time DESC NULLS LAST");
    }
    sql.push_str(" LIMIT ?");
    params.push(SqlValue::from(query.limit as i64));

    let conn = connect(db_path)?;
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<(String, Option<String>, Option<String>, Option<String>, Option<f64>)> = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?
        .collect::<std::result::Result<_, _>>()?;

    let target_rank = rank_privacy(Some(query.target_level.as_str()));
    let mut hits = Vec::new();
    for (mu_id, summary, privacy_level, path, score) in rows {
        // target-level visibility: hide records more restrictive than the target
        if rank_privacy(privacy_level.as_deref()) > target_rank {
            continue;
        }

        let mut reason = json!({"filters": {}});
        if let Some(q) = text {
            reason["fts"] = json!({"query": q, "bm25": score});
        }
        if query.since.is_some() || query.until.is_some() {
            reason["filters"]["time"] = json!({"since": query.since, "until": query.until});
        }
        if let Some(tag) = &query.tag {
            reason["filters"]["tag"] = json!(tag);
        }
        if let Some(privacy) = &query.privacy {
            reason["filters"]["privacy"] = json!(privacy);
        }

        let summary_out = if query.include_snippet {
            reason["snippet"] = json!({"max_chars": 220});
            make_snippet(summary.as_deref(), text, 220)
        } else {
            summary
        };

        hits.push(SearchHit {
            mu_id,
            score,
            summary: summary_out,
            reason,
            path,
            privacy_level,
        });
    }
    Ok(hits)
}
