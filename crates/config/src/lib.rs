use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Shared runtime configuration (`ms_config.json`).
///
/// Consumers never rely on ambient paths: everything the pipelines need is
/// either in this file or passed explicitly.  `raw_manifest_path`,
/// `mu_manifest_path` and `mu_root` default from `vault_roots.default` when
/// absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsConfig {
    pub vault_roots: BTreeMap<String, String>,
    #[serde(default)]
    pub raw_manifest_path: Option<String>,
    #[serde(default)]
    pub mu_manifest_path: Option<String>,
    #[serde(default)]
    pub mu_root: Option<String>,
    #[serde(default)]
    pub runs_root_sync: Option<String>,
    #[serde(default)]
    pub runs_root_repair: Option<String>,
}

impl MsConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config: MsConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        config.fill_defaults();
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vault_roots.is_empty() {
            bail!("missing/invalid vault_roots");
        }
        for (vault_id, root) in &self.vault_roots {
            if vault_id.is_empty() || root.is_empty() {
                bail!("invalid vault_roots entry: {vault_id:?} -> {root:?}");
            }
        }
        Ok(())
    }

    /// Fill path defaults from `vault_roots.default` when absent.
    pub fn fill_defaults(&mut self) {
        let Some(default_root) = self.vault_roots.get("default").cloned() else {
            return;
        };
        let root = PathBuf::from(default_root);
        if self.raw_manifest_path.as_deref().unwrap_or("").is_empty() {
            self.raw_manifest_path = Some(
                root.join("manifests")
                    .join("raw_manifest.jsonl")
                    .display()
                    .to_string(),
            );
        }
        if self.mu_manifest_path.as_deref().unwrap_or("").is_empty() {
            self.mu_manifest_path = Some(
                root.join("manifests")
                    .join("mu_manifest.jsonl")
                    .display()
                    .to_string(),
            );
        }
        if self.mu_root.as_deref().unwrap_or("").is_empty() {
            self.mu_root = Some(root.join("mu").display().to_string());
        }
    }

    pub fn vault_root(&self, vault_id: &str) -> Option<&str> {
        self.vault_roots.get(vault_id).map(String::as_str)
    }
}

/// Typed view of the `DATA_ROOT` directory layout.
///
/// ```text
/// vaults/<vault_id>/{raw,mu,manifests}
/// workspaces/{workspaces.json, membership.jsonl}
/// index/meta.sqlite
/// inbox/<ws>/{_queue,_done,_failed}/<job_id>
/// jobs/<job_id>/
/// runs/{sync,repair}/RUN-<ts>/
/// logs/*.jsonl
/// ```
#[derive(Debug, Clone)]
pub struct DataRoot {
    root: PathBuf,
}

impl DataRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Infer `DATA_ROOT` from `<DATA_ROOT>/index/meta.sqlite`.
    pub fn infer_from_index_db(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let parent = db_path
            .parent()
            .with_context(|| format!("db path has no parent: {}", db_path.display()))?;
        if parent
            .file_name()
            .map(|n| n.to_string_lossy().eq_ignore_ascii_case("index"))
            .unwrap_or(false)
        {
            let root = parent
                .parent()
                .with_context(|| format!("index dir has no parent: {}", db_path.display()))?;
            return Ok(Self::new(root));
        }
        bail!(
            "cannot infer data root from db path: {} (pass it explicitly)",
            db_path.display()
        )
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn vault_root(&self, vault_id: &str) -> PathBuf {
        self.root.join("vaults").join(vault_id)
    }

    pub fn index_db(&self) -> PathBuf {
        self.root.join("index").join("meta.sqlite")
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.root.join("workspaces")
    }

    pub fn workspaces_json(&self) -> PathBuf {
        self.workspaces_dir().join("workspaces.json")
    }

    pub fn membership_log(&self) -> PathBuf {
        self.workspaces_dir().join("membership.jsonl")
    }

    pub fn inbox_root(&self) -> PathBuf {
        self.root.join("inbox")
    }

    pub fn inbox_queue_dir(&self, workspace_id: &str, job_id: &str) -> PathBuf {
        self.inbox_root()
            .join(workspace_id)
            .join("_queue")
            .join(job_id)
    }

    pub fn jobs_root(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_root().join(job_id)
    }

    pub fn runs_sync_root(&self) -> PathBuf {
        self.root.join("runs").join("sync")
    }

    pub fn runs_repair_root(&self) -> PathBuf {
        self.root.join("runs").join("repair")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.logs_dir().join(format!("{name}.jsonl"))
    }
}
