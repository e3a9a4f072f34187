use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::Serialize;

use mnemo_config::DataRoot;

#[derive(Debug, Clone, Serialize)]
pub struct GcItem {
    pub path: String,
    pub state: String,
    pub age_days: f64,
}

/// Dry-run-only inbox GC report.  Nothing is ever deleted here: the
/// deletion contract (what survives of `.lock`, `log.txt`, artifacts) still
/// needs an explicit policy before a destructive mode exists.
#[derive(Debug, Clone, Serialize)]
pub struct GcReport {
    pub data_root: String,
    pub days: u32,
    pub dry_run: bool,
    pub count: usize,
    pub items: Vec<GcItem>,
}

fn mtime_secs(path: &Path) -> Option<f64> {
    let modified = path.metadata().ok()?.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}

/// List `_done|_failed` job folders older than `days`.
pub fn scan_inbox_gc(data_root: impl AsRef<Path>, days: u32) -> Result<GcReport> {
    let data_root = DataRoot::new(data_root.as_ref());
    let inbox_root = data_root.inbox_root();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    let cutoff = now - f64::from(days) * 86_400.0;

    let mut items = Vec::new();
    if inbox_root.exists() {
        let mut ws_dirs: Vec<_> = std::fs::read_dir(&inbox_root)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        ws_dirs.sort();
        for ws_dir in ws_dirs {
            for state in ["_done", "_failed"] {
                let state_dir = ws_dir.join(state);
                if !state_dir.exists() {
                    continue;
                }
                let mut job_dirs: Vec<_> = std::fs::read_dir(&state_dir)?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect();
                job_dirs.sort();
                for job_dir in job_dirs {
                    let Some(mtime) = mtime_secs(&job_dir) else {
                        continue;
                    };
                    if mtime <= cutoff {
                        items.push(GcItem {
                            path: job_dir.display().to_string(),
                            state: state.trim_start_matches('_').to_string(),
                            age_days: (now - mtime) / 86_400.0,
                        });
                    }
                }
            }
        }
    }

    Ok(GcReport {
        data_root: data_root.path().display().to_string(),
        days,
        dry_run: true,
        count: items.len(),
        items,
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::scan_inbox_gc;

    #[test]
    fn lists_terminal_dirs_older_than_cutoff() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let data_root = dir.path();
        let done = data_root.join("inbox").join("ws").join("_done").join("JOB-OLD");
        let failed = data_root
            .join("inbox")
            .join("ws")
            .join("_failed")
            .join("JOB-GONE");
        let queued = data_root
            .join("inbox")
            .join("ws")
            .join("_queue")
            .join("JOB-LIVE");
        std::fs::create_dir_all(&done)?;
        std::fs::create_dir_all(&failed)?;
        std::fs::create_dir_all(&queued)?;

        // everything was just created: days=0 includes all terminal dirs
        let report = scan_inbox_gc(data_root, 0)?;
        assert!(report.dry_run);
        assert_eq!(report.count, 2);
        assert!(report.items.iter().all(|i| i.state == "done" || i.state == "failed"));
        assert!(!report.items.iter().any(|i| i.path.contains("JOB-LIVE")));

        // nothing is 30 days old yet
        let report = scan_inbox_gc(data_root, 30)?;
        assert_eq!(report.count, 0);
        Ok(())
    }

    #[test]
    fn missing_inbox_yields_empty_report() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let report = scan_inbox_gc(dir.path(), 30)?;
        assert_eq!(report.count, 0);
        Ok(())
    }
}
