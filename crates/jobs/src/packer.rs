use std::path::Path;
use std::process::Command;

use anyhow::{Result, bail};
use walkdir::WalkDir;

use crate::layout::append_log;

/// Seam for the external MU packer.
///
/// The packer converts raw inputs into MU YAML; it is an external
/// collaborator, so the worker talks to it through this trait and the
/// subprocess details stay in [`CommandMuPacker`].
pub trait MuPacker {
    /// Pack `input_dir` into `.mimo` files under `out_dir`.
    /// Returns the number of MU written.
    fn pack(
        &self,
        input_dir: &Path,
        out_dir: &Path,
        source_kind: &str,
        split: &str,
        vault_id: &str,
        log_path: &Path,
    ) -> Result<usize>;
}

/// Invoke the packer binary with its stable CLI arguments.
#[derive(Debug, Clone)]
pub struct CommandMuPacker {
    pub program: String,
    pub extra_args: Vec<String>,
}

impl Default for CommandMuPacker {
    fn default() -> Self {
        Self {
            program: "mimo-pack".to_string(),
            extra_args: Vec::new(),
        }
    }
}

fn count_mimo_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|x| x == "mimo").unwrap_or(false))
        .count()
}

impl MuPacker for CommandMuPacker {
    fn pack(
        &self,
        input_dir: &Path,
        out_dir: &Path,
        source_kind: &str,
        split: &str,
        vault_id: &str,
        log_path: &Path,
    ) -> Result<usize> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.extra_args)
            .arg("--in")
            .arg(input_dir)
            .arg("--out")
            .arg(out_dir)
            .arg("--source")
            .arg(source_kind)
            .arg("--split")
            .arg(split)
            .arg("--vault-id")
            .arg(vault_id);

        append_log(log_path, &format!("$ {command:?}"))?;
        let output = command.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            append_log(log_path, stdout.trim_end())?;
        }
        if !stderr.trim().is_empty() {
            append_log(log_path, stderr.trim_end())?;
        }
        if !output.status.success() {
            bail!("mu packer failed rc={:?}: {}", output.status.code(), self.program);
        }

        // prefer the packer's own count, fall back to counting outputs
        let written = stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix("written_mus="))
            .and_then(|n| n.trim().parse::<usize>().ok())
            .unwrap_or_else(|| count_mimo_files(out_dir));
        Ok(written)
    }
}
