use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::VaultError;

const CHUNK: usize = 1024 * 1024;

/// `"sha256:" + 64 lowercase hex` over a byte slice.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Streaming file digest in 1 MiB chunks.
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String, VaultError> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// True when `s` is `sha256:` followed by exactly 64 lowercase hex digits.
pub fn is_sha256_form(s: &str) -> bool {
    let Some(hex) = s.strip_prefix("sha256:") else {
        return false;
    };
    hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::{is_sha256_form, sha256_bytes, sha256_file};

    #[test]
    fn file_and_bytes_digests_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello vault").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), sha256_bytes(b"hello vault"));
    }

    #[test]
    fn sha_form_check() {
        let sha = sha256_bytes(b"x");
        assert!(is_sha256_form(&sha));
        assert!(!is_sha256_form("sha256:short"));
        assert!(!is_sha256_form("md5:abcd"));
        assert!(!is_sha256_form(&sha.to_uppercase()));
    }
}
