use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use mnemo_vault::utc_now_iso_z;

pub const PROVENANCE_TOOL: &str = "mnemo";
pub const PROVENANCE_TOOL_VERSION: &str = "0.1";

/// TaskSpec v0.1: a planned unit of work, stored as an append-only artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub created_at: String,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    pub idempotency_key: String,
    #[serde(default)]
    pub inputs: Vec<TaskInput>,
    /// Task-type-specific parameters (free-form object).
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInput {
    pub kind: String,
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "ERROR")]
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    pub kind: String,
    pub id: Option<String>,
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub elapsed_ms: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// TaskResult v0.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub outputs: Vec<TaskOutput>,
    /// Structured findings: `{code, msg, ...}` objects.
    pub diagnostics: Vec<Value>,
    pub stats: TaskStats,
    pub provenance: Value,
}

pub fn new_task_id() -> String {
    format!("t_{}", Uuid::new_v4().simple())
}

/// A `{code, msg}` diagnostic entry.
pub fn diagnostic(code: &str, msg: impl Into<String>) -> Value {
    json!({"code": code, "msg": msg.into()})
}

impl TaskSpec {
    pub fn new(task_type: &str, idempotency_key: &str, inputs: Vec<TaskInput>, params: Value) -> Self {
        Self {
            task_id: new_task_id(),
            task_type: task_type.to_string(),
            created_at: utc_now_iso_z(),
            parent_task_id: None,
            idempotency_key: idempotency_key.to_string(),
            inputs,
            params,
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

impl TaskResult {
    pub fn new(
        task_id: &str,
        status: TaskStatus,
        outputs: Vec<TaskOutput>,
        diagnostics: Vec<Value>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            status,
            outputs,
            diagnostics,
            stats: TaskStats {
                elapsed_ms,
                tokens_in: 0,
                tokens_out: 0,
            },
            provenance: json!({
                "tool": PROVENANCE_TOOL,
                "tool_version": PROVENANCE_TOOL_VERSION,
                "model": null,
                "prompt_version": null,
            }),
        }
    }

    pub fn status_str(&self) -> &'static str {
        match self.status {
            TaskStatus::Ok => "OK",
            TaskStatus::Partial => "PARTIAL",
            TaskStatus::Error => "ERROR",
        }
    }
}
