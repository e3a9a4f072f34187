use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::VaultError;
use crate::hash::is_sha256_form;

/// A structured reference from an MU to raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pointer {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<Locator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Locator {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// MU link lists; each entry is an mu_id.
#[derive(Debug, Clone, Default)]
pub struct MuLinks {
    pub corrects: Vec<String>,
    pub supersedes: Vec<String>,
    pub duplicate_of: Vec<String>,
}

/// Fields every ingestable MU must carry.
#[derive(Debug, Clone)]
pub struct MuIngestFields {
    pub mu_id: String,
    pub schema_version: String,
    pub content_hash: String,
    pub mu_key: String,
}

/// Generic read path for `.mimo` YAML documents.
///
/// MU shapes are dynamic; we load into a YAML tree and validate only the
/// fields the core actually uses.  Rejection happens at this boundary, not
/// by silent coercion.  Mutation is limited to what the repair executor needs;
/// everything else treats MU as immutable.
#[derive(Debug, Clone)]
pub struct MuDocument {
    value: Value,
}

impl MuDocument {
    pub fn from_str(text: &str) -> Result<Self, VaultError> {
        let value: Value = serde_yaml::from_str(text)?;
        if !value.is_mapping() {
            return Err(VaultError::validation("MU is not a mapping"));
        }
        Ok(Self { value })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VaultError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text).map_err(|e| match e {
            VaultError::Validation(_) => {
                VaultError::validation(format!("MU is not a mapping: {}", path.display()))
            }
            other => other,
        })
    }

    pub fn to_yaml_string(&self) -> Result<String, VaultError> {
        Ok(serde_yaml::to_string(&self.value)?)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    /// `mu_id`, with legacy `id` fallback.
    pub fn mu_id(&self) -> Option<&str> {
        self.str_field("mu_id").or_else(|| self.str_field("id"))
    }

    pub fn schema_version(&self) -> Option<&str> {
        self.str_field("schema_version")
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.str_field("content_hash")
    }

    pub fn summary(&self) -> Option<&str> {
        self.str_field("summary")
    }

    pub fn mu_key(&self) -> Option<&str> {
        self.value
            .get("idempotency")
            .and_then(|i| i.get("mu_key"))
            .and_then(Value::as_str)
    }

    pub fn meta_time(&self) -> Option<&str> {
        self.value
            .get("meta")
            .and_then(|m| m.get("time"))
            .and_then(Value::as_str)
    }

    pub fn meta_source_kind(&self) -> Option<&str> {
        self.value
            .get("meta")
            .and_then(|m| m.get("source"))
            .and_then(|s| s.get("kind"))
            .and_then(Value::as_str)
    }

    pub fn meta_source_note(&self) -> Option<&str> {
        self.value
            .get("meta")
            .and_then(|m| m.get("source"))
            .and_then(|s| s.get("note"))
            .and_then(Value::as_str)
    }

    /// Tags from top-level `tags` or `meta.tags`.
    pub fn tags(&self) -> Vec<String> {
        let list = self
            .value
            .get("tags")
            .and_then(Value::as_sequence)
            .or_else(|| {
                self.value
                    .get("meta")
                    .and_then(|m| m.get("tags"))
                    .and_then(Value::as_sequence)
            });
        list.map(|seq| {
            seq.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn privacy_level(&self) -> Option<&str> {
        self.value
            .get("privacy")
            .and_then(|p| p.get("level"))
            .and_then(Value::as_str)
    }

    pub fn pointers(&self) -> Vec<Pointer> {
        let Some(seq) = self.value.get("pointer").and_then(Value::as_sequence) else {
            return Vec::new();
        };
        seq.iter().filter_map(pointer_from_yaml).collect()
    }

    pub fn snapshot(&self) -> Option<&Value> {
        self.value.get("snapshot").filter(|v| !v.is_null())
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot().is_some()
    }

    pub fn links(&self) -> MuLinks {
        let links = self.value.get("links");
        MuLinks {
            corrects: string_list(links.and_then(|l| l.get("corrects"))),
            supersedes: string_list(links.and_then(|l| l.get("supersedes"))),
            duplicate_of: string_list(links.and_then(|l| l.get("duplicate_of"))),
        }
    }

    /// Tombstone flag; top-level field with `links.tombstone` fallback.
    pub fn tombstone(&self) -> Option<&Value> {
        self.value
            .get("tombstone")
            .or_else(|| self.value.get("links").and_then(|l| l.get("tombstone")))
            .filter(|v| !v.is_null())
    }

    /// Validate the fields a manifest line requires.
    pub fn validate_for_ingest(&self) -> Result<MuIngestFields, VaultError> {
        let mu_id = self
            .mu_id()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| VaultError::validation("missing mu_id"))?;
        let schema_version = self
            .schema_version()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| VaultError::validation("missing schema_version"))?;
        let content_hash = self
            .content_hash()
            .filter(|s| is_sha256_form(s))
            .ok_or_else(|| VaultError::validation("missing/invalid content_hash"))?;
        let mu_key = self
            .mu_key()
            .filter(|s| is_sha256_form(s))
            .ok_or_else(|| VaultError::validation("missing/invalid idempotency.mu_key"))?;
        Ok(MuIngestFields {
            mu_id: mu_id.to_string(),
            schema_version: schema_version.to_string(),
            content_hash: content_hash.to_string(),
            mu_key: mu_key.to_string(),
        })
    }

    /// Best-effort raw provenance: sorted unique `pointer[].sha256`.
    pub fn source_raw_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .pointers()
            .into_iter()
            .filter_map(|p| p.sha256)
            .filter(|s| s.starts_with("sha256:"))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    // ── mutation (repair executor only) ──────────────────────────────────────

    /// Overwrite the uri of every pointer whose sha256 matches.  Returns the
    /// number of pointers changed.
    pub fn rewrite_pointer_uris(&mut self, sha256: &str, new_uri: &str) -> usize {
        let Some(seq) = self
            .value
            .get_mut("pointer")
            .and_then(Value::as_sequence_mut)
        else {
            return 0;
        };
        let mut changed = 0;
        for item in seq.iter_mut() {
            let matches = item
                .get("sha256")
                .and_then(Value::as_str)
                .map(|s| s == sha256)
                .unwrap_or(false);
            if !matches {
                continue;
            }
            if let Some(map) = item.as_mapping_mut() {
                map.insert(
                    Value::String("uri".into()),
                    Value::String(new_uri.to_string()),
                );
                changed += 1;
            }
        }
        changed
    }

    /// Append `mu_id` to `links.supersedes` (deduplicated).
    pub fn push_supersedes(&mut self, mu_id: &str) {
        let root = self.value.as_mapping_mut().expect("MU root is a mapping");
        let links_key = Value::String("links".into());
        if !root
            .get(&links_key)
            .map(Value::is_mapping)
            .unwrap_or(false)
        {
            root.insert(links_key.clone(), Value::Mapping(Default::default()));
        }
        let links = root
            .get_mut(&links_key)
            .and_then(Value::as_mapping_mut)
            .expect("links is a mapping");

        let supersedes_key = Value::String("supersedes".into());
        let mut list = match links.get(&supersedes_key) {
            Some(Value::Sequence(seq)) => seq.clone(),
            Some(Value::Null) | None => Vec::new(),
            // scalar value: wrap it
            Some(other) => vec![other.clone()],
        };
        let already = list
            .iter()
            .any(|v| v.as_str().map(|s| s == mu_id).unwrap_or(false));
        if !already {
            list.push(Value::String(mu_id.to_string()));
        }
        links.insert(supersedes_key, Value::Sequence(list));
    }

    pub fn set_mu_id(&mut self, mu_id: &str) {
        let root = self.value.as_mapping_mut().expect("MU root is a mapping");
        root.insert(
            Value::String("mu_id".into()),
            Value::String(mu_id.to_string()),
        );
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }
}

fn pointer_from_yaml(value: &Value) -> Option<Pointer> {
    if !value.is_mapping() {
        return None;
    }
    let get_str = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
    let locator = value.get("locator").and_then(|l| {
        l.is_mapping().then(|| Locator {
            kind: l.get("kind").and_then(Value::as_str).map(str::to_string),
            start: l.get("start").and_then(Value::as_i64),
            end: l.get("end").and_then(Value::as_i64),
        })
    });
    Some(Pointer {
        kind: get_str("type"),
        uri: get_str("uri"),
        sha256: get_str("sha256"),
        locator,
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Sequence(seq)) => seq
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_MU: &str = r#"
mu_id: mu_20260221_0001
schema_version: "1.1"
content_hash: "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
idempotency:
  mu_key: "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
summary: planned the trip to Kyoto
meta:
  time: "2026-02-21T09:00:00Z"
  source:
    kind: chat
    note: morning session
  tags: [travel, planning]
pointer:
  - type: raw
    uri: vault://default/raw/2026/02/cccc.txt
    sha256: "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc"
    locator:
      kind: line_range
      start: 1
      end: 3
links:
  corrects: []
  supersedes: [mu_20260220_0009]
privacy:
  level: private
  redact: none
"#;
