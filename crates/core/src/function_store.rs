//! Function Store: the ordered sequence of function records kept parallel
//! to the embedding matrix.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The atomic indexed unit. Immutable once emitted; a changed file's records
/// are replaced wholesale, never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: String,
    pub code: String,
    pub file: PathBuf,
    pub lineno: usize,
    pub end_lineno: usize,
    pub class_name: Option<String>,
}

impl FunctionRecord {
    /// `H(file|name|lineno|end_lineno)` — stable across runs as long as the
    /// function's location and name don't move, independent of its body
    /// text. Two records with equal identity are the same row and may reuse
    /// an embedding.
    pub fn identity(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.file.to_string_lossy().as_bytes());
        hasher.update(b"|");
        hasher.update(self.name.as_bytes());
        hasher.update(b"|");
        hasher.update(self.lineno.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.end_lineno.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Ordered, append-only (from the builder's perspective) sequence of
/// function records, row-aligned with the embedding matrix in `IndexState`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionStore {
    records: Vec<FunctionRecord>,
}

impl FunctionStore {
    pub fn new() -> Self {
        FunctionStore { records: Vec::new() }
    }

    pub fn from_records(records: Vec<FunctionRecord>) -> Self {
        FunctionStore { records }
    }

    pub fn push(&mut self, record: FunctionRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lookup by row id, as produced by the vector index's search results.
    /// `None` for out-of-range ids (including the sentinel `-1`).
    pub fn get(&self, row_id: i64) -> Option<&FunctionRecord> {
        if row_id < 0 {
            return None;
        }
        self.records.get(row_id as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionRecord> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[FunctionRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<FunctionRecord> {
        self.records
    }

    /// Identity hashes in row order — used by the builder to decide which
    /// positions can reuse a prior embedding.
    pub fn identities(&self) -> Vec<String> {
        self.records.iter().map(|r| r.identity()).collect()
    }

    /// All distinct files referenced by at least one record.
    pub fn files(&self) -> std::collections::HashSet<&Path> {
        self.records.iter().map(|r| r.file.as_path()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(file: &str, name: &str, lineno: usize, end_lineno: usize) -> FunctionRecord {
        FunctionRecord {
            name: name.to_string(),
            code: "body".to_string(),
            file: PathBuf::from(file),
            lineno,
            end_lineno,
            class_name: None,
        }
    }

    #[test]
    fn identity_stable_across_clones() {
        let a = rec("a.py", "foo", 1, 3);
        let b = a.clone();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn identity_changes_with_span() {
        let a = rec("a.py", "foo", 1, 3);
        let b = rec("a.py", "foo", 1, 4);
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn identity_unaffected_by_body() {
        let mut a = rec("a.py", "foo", 1, 3);
        let b = a.clone();
        a.code = "a different body entirely".to_string();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn get_rejects_negative_and_oob() {
        let mut store = FunctionStore::new();
        store.push(rec("a.py", "foo", 1, 3));
        assert!(store.get(-1).is_none());
        assert!(store.get(5).is_none());
        assert!(store.get(0).is_some());
    }
}
