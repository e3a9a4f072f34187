use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One structured log event, appended as a single JSONL line.
///
/// The shape is stable for machine consumption; `extra` carries
/// tool-specific fields without breaking readers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl LogEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            event: event.into(),
            ..Self::default()
        }
    }

    pub fn tool(mut self, tool: impl Into<String>, version: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self.tool_version = Some(version.into());
        self
    }

    pub fn run(mut self, run_id: impl Into<String>, run_dir: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self.run_dir = Some(run_dir.into());
        self
    }

    pub fn task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn stats(mut self, stats: Value) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Value) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Append-only JSONL event log.
#[derive(Debug, Clone)]
pub struct JsonlLogger {
    path: PathBuf,
}

impl JsonlLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &LogEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening log {}", self.path.display()))?;
        let line = serde_json::to_string(event)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use super::{JsonlLogger, LogEvent};

    #[test]
    fn appends_one_line_per_event() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let logger = JsonlLogger::new(dir.path().join("logs").join("ingest.jsonl"));

        logger.append(&LogEvent::new("ingest_raw").stats(json!({"ingested_files": 2})))?;
        logger.append(
            &LogEvent::new("ingest_raw")
                .tool("mnemo", "0.1")
                .field("vault_id", json!("default")),
        )?;

        let text = std::fs::read_to_string(logger.path())?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: LogEvent = serde_json::from_str(lines[0])?;
        assert_eq!(first.event, "ingest_raw");
        assert_eq!(first.stats.unwrap()["ingested_files"], 2);

        let second: LogEvent = serde_json::from_str(lines[1])?;
        assert_eq!(second.extra["vault_id"], "default");
        assert!(second.ts.ends_with('Z'));
        Ok(())
    }
}
