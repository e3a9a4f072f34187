use std::io::Write;
use std::path::Path;

use mnemo_vault::utc_now_iso_z;

/// Best-effort cross-platform job lock via exclusive file creation.
///
/// A killed worker leaves the `.lock` behind; later workers skip the job and
/// the operator removes the file manually.  Returns false when the lock is
/// already held.
pub fn try_lock(lock_path: &Path) -> bool {
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            let _ = writeln!(
                file,
                "locked_at={} pid={}",
                utc_now_iso_z(),
                std::process::id()
            );
            true
        }
        Err(_) => false,
    }
}

pub fn unlock(lock_path: &Path) {
    let _ = std::fs::remove_file(lock_path);
}

#[cfg(test)]
mod tests {
    use super::{try_lock, unlock};

    #[test]
    fn second_lock_attempt_fails_until_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join(".lock");

        assert!(try_lock(&lock));
        assert!(!try_lock(&lock));
        unlock(&lock);
        assert!(try_lock(&lock));
    }
}
