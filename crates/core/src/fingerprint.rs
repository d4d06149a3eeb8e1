//! File Fingerprint: content-addressed staleness signal.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

const CHUNK_SIZE: usize = 64 * 1024;

/// Hex SHA-256 of `path`'s content, read in bounded chunks so large files
/// don't need to be loaded whole. A read failure is propagated — callers
/// treat it as "file absent" and drop any prior state for it.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn same_content_same_hash() {
        let dir = tempdir().unwrap();
        let p1 = dir.path().join("a.txt");
        let p2 = dir.path().join("b.txt");
        std::fs::write(&p1, "hello world").unwrap();
        std::fs::write(&p2, "hello world").unwrap();
        assert_eq!(hash_file(&p1).unwrap(), hash_file(&p2).unwrap());
    }

    #[test]
    fn different_content_different_hash() {
        let dir = tempdir().unwrap();
        let p1 = dir.path().join("a.txt");
        let p2 = dir.path().join("b.txt");
        std::fs::write(&p1, "hello").unwrap();
        std::fs::write(&p2, "world").unwrap();
        assert_ne!(hash_file(&p1).unwrap(), hash_file(&p2).unwrap());
    }

    #[test]
    fn missing_file_errors() {
        let dir = tempdir().unwrap();
        assert!(hash_file(&dir.path().join("missing.txt")).is_err());
    }
}
