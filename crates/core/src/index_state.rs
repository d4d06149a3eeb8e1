//! Index State & Persistence.
//!
//! Owns all mutable state for one `(root, ext)` target: file fingerprints,
//! the function store, the embedding matrix, and the vector index built
//! over it. Responsible for the validity predicate and for atomic
//! load/save of the four on-disk artifacts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::fingerprint::hash_file;
use crate::function_store::FunctionStore;
use crate::ignore_filter::IgnoreFilter;
use crate::vector_index::VectorIndex;

/// Fingerprint of the encoder, currently just the model name but modeled as
/// an open map so future config knobs (quantization, pooling strategy) slot
/// in without a schema migration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    pub model_name: String,
}

impl ModelConfig {
    pub fn new(model_name: impl Into<String>) -> Self {
        ModelConfig { model_name: model_name.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub hash: String,
}

/// On-disk `meta.json` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaFile {
    file_info: HashMap<String, FileEntry>,
    directory: PathBuf,
    last_indexed: u64,
    file_ext: String,
    model_name: String,
    model_config: ModelConfig,
}

pub struct IndexState {
    pub root: PathBuf,
    pub ext: String,
    pub file_info: HashMap<String, FileEntry>,
    pub functions: FunctionStore,
    pub embeddings: Array2<f32>,
    pub vector_index: VectorIndex,
    pub last_indexed: u64,
    pub model_config: ModelConfig,
}

impl IndexState {
    pub fn empty(root: PathBuf, ext: String, model_config: ModelConfig, dim: usize) -> Self {
        IndexState {
            root,
            ext,
            file_info: HashMap::new(),
            functions: FunctionStore::new(),
            embeddings: Array2::zeros((0, dim)),
            vector_index: VectorIndex::new(dim),
            last_indexed: 0,
            model_config,
        }
    }

    /// The directory this target's artifacts live under:
    /// `<base>/<basename>_<md5(abs_root)[:16]>/<ext>/`.
    pub fn target_dir(base: &Path, root: &Path, ext: &str) -> PathBuf {
        use md5::{Digest, Md5};

        let abs_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let basename = abs_root.file_name().and_then(|n| n.to_str()).unwrap_or("root");
        let mut hasher = Md5::new();
        hasher.update(abs_root.to_string_lossy().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let short = &digest[..16.min(digest.len())];
        base.join(format!("{basename}_{short}")).join(ext)
    }

    /// Write `functions.json`, `embeddings.npy`, `faiss.index`, `meta.json`
    /// via `*.tmp` + rename, so a crash between writes leaves either the
    /// prior or the new version of each artifact, never a partial one.
    pub fn save(&self, dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;

        write_atomic_json(&dir.join("functions.json"), self.functions.as_slice())?;

        let npy_path = dir.join("embeddings.npy");
        let npy_tmp = npy_path.with_extension("npy.tmp");
        ndarray_npy::write_npy(&npy_tmp, &self.embeddings)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        fs::rename(&npy_tmp, &npy_path)?;

        self.vector_index.write(&dir.join("faiss.index"))?;

        let meta = MetaFile {
            file_info: self.file_info.clone(),
            directory: self.root.clone(),
            last_indexed: self.last_indexed,
            file_ext: self.ext.clone(),
            model_name: self.model_config.model_name.clone(),
            model_config: self.model_config.clone(),
        };
        write_atomic_json(&dir.join("meta.json"), &meta)?;

        Ok(())
    }

    /// Load a prior target's state. Each of the four artifacts is read
    /// independently; a failure on one clears only that slot (logged) and
    /// the caller (the builder) treats the missing slot as "must rebuild
    /// that part". Returns `None` only if `meta.json` itself is unreadable
    /// or missing — without it there's no file_info to diff against, so the
    /// builder falls through to a full rebuild anyway.
    pub fn load(dir: &Path, root: &Path, ext: &str) -> Option<Self> {
        let meta_path = dir.join("meta.json");
        let meta: MetaFile = match fs::read_to_string(&meta_path).ok().and_then(|s| serde_json::from_str(&s).ok()) {
            Some(m) => m,
            None => return None,
        };

        let model_config = meta.model_config;

        let functions_path = dir.join("functions.json");
        let records = match fs::read_to_string(&functions_path)
            .ok()
            .and_then(|s| serde_json::from_str::<Vec<crate::function_store::FunctionRecord>>(&s).ok())
        {
            Some(records) => records,
            None => {
                error!(path = %functions_path.display(), "functions.json corrupt or missing, clearing function store");
                Vec::new()
            }
        };
        let functions = FunctionStore::from_records(records);

        let npy_path = dir.join("embeddings.npy");
        let embeddings: Array2<f32> = match ndarray_npy::read_npy(&npy_path) {
            Ok(arr) => arr,
            Err(e) => {
                error!(path = %npy_path.display(), error = %e, "embeddings.npy corrupt or missing, clearing embedding matrix");
                Array2::zeros((0, 0))
            }
        };

        let index_path = dir.join("faiss.index");
        let vector_index = match VectorIndex::read(&index_path) {
            Ok(v) => v,
            Err(e) => {
                error!(path = %index_path.display(), error = %e, "faiss.index corrupt or missing, clearing vector index");
                let dim = embeddings.ncols();
                VectorIndex::new(dim)
            }
        };

        Some(IndexState {
            root: root.to_path_buf(),
            ext: ext.to_string(),
            file_info: meta.file_info,
            functions,
            embeddings,
            vector_index,
            last_indexed: meta.last_indexed,
            model_config,
        })
    }

    /// The validity predicate: every file still present with a matching
    /// hash, no untracked paths discovered by a fresh walk, the model config
    /// unchanged.
    pub fn is_up_to_date(&self, root: &Path, current_model_config: &ModelConfig) -> bool {
        if self.root != root {
            return false;
        }
        if &self.model_config != current_model_config {
            return false;
        }
        if self.file_info.is_empty() {
            return false;
        }

        for (path, entry) in &self.file_info {
            let p = Path::new(path);
            match hash_file(p) {
                Ok(hash) if hash == entry.hash => {}
                Ok(_) => {
                    warn!(path, "file content changed since last index");
                    return false;
                }
                Err(_) => {
                    warn!(path, "indexed file no longer readable");
                    return false;
                }
            }
        }

        let filter = IgnoreFilter::load(root);
        let current_files = filter.collect_files(&self.ext);
        for path in &current_files {
            let key = path.to_string_lossy().to_string();
            if !self.file_info.contains_key(&key) {
                warn!(path = %path.display(), "untracked file discovered by fresh walk");
                return false;
            }
        }

        true
    }
}

pub fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn write_atomic_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function_store::FunctionRecord;
    use tempfile::tempdir;

    fn sample_record(file: &Path) -> FunctionRecord {
        FunctionRecord {
            name: "foo".into(),
            code: "def foo(): pass".into(),
            file: file.to_path_buf(),
            lineno: 1,
            end_lineno: 2,
            class_name: None,
        }
    }

    #[test]
    fn save_then_load_roundtrips_functions_and_file_info() {
        let dir = tempdir().unwrap();
        let src_file = dir.path().join("a.py");
        fs::write(&src_file, "def foo(): pass\n").unwrap();

        let mut state = IndexState::empty(dir.path().to_path_buf(), "py".into(), ModelConfig::new("m"), 2);
        state.functions.push(sample_record(&src_file));
        state.file_info.insert(src_file.to_string_lossy().to_string(), FileEntry { hash: hash_file(&src_file).unwrap() });
        state.embeddings = Array2::from_shape_vec((1, 2), vec![1.0, 0.0]).unwrap();
        state.vector_index.add(&[vec![1.0, 0.0]]);
        state.last_indexed = 42;

        let target_dir = dir.path().join("target");
        state.save(&target_dir).unwrap();

        let loaded = IndexState::load(&target_dir, dir.path(), "py").unwrap();
        assert_eq!(loaded.functions.len(), 1);
        assert_eq!(loaded.last_indexed, 42);
        assert_eq!(loaded.model_config.model_name, "m");
        assert_eq!(loaded.vector_index.count(), 1);
    }

    #[test]
    fn missing_meta_json_yields_none() {
        let dir = tempdir().unwrap();
        assert!(IndexState::load(dir.path(), dir.path(), "py").is_none());
    }

    #[test]
    fn is_up_to_date_false_when_file_changes() {
        let dir = tempdir().unwrap();
        let src_file = dir.path().join("a.py");
        fs::write(&src_file, "def foo(): pass\n").unwrap();

        let mut state = IndexState::empty(dir.path().to_path_buf(), "py".into(), ModelConfig::new("m"), 2);
        state.file_info.insert(src_file.to_string_lossy().to_string(), FileEntry { hash: hash_file(&src_file).unwrap() });

        assert!(state.is_up_to_date(dir.path(), &ModelConfig::new("m")));

        fs::write(&src_file, "def foo(): return 1\n").unwrap();
        assert!(!state.is_up_to_date(dir.path(), &ModelConfig::new("m")));
    }

    #[test]
    fn is_up_to_date_false_when_model_config_changes() {
        let dir = tempdir().unwrap();
        let state = IndexState::empty(dir.path().to_path_buf(), "py".into(), ModelConfig::new("a"), 2);
        assert!(!state.is_up_to_date(dir.path(), &ModelConfig::new("a")));
        // empty file_info alone already fails; exercise the model-mismatch branch directly
        let mut state = state;
        let src_file = dir.path().join("a.py");
        fs::write(&src_file, "def foo(): pass\n").unwrap();
        state.file_info.insert(src_file.to_string_lossy().to_string(), FileEntry { hash: hash_file(&src_file).unwrap() });
        assert!(state.is_up_to_date(dir.path(), &ModelConfig::new("a")));
        assert!(!state.is_up_to_date(dir.path(), &ModelConfig::new("b")));
    }

    #[test]
    fn target_dir_is_deterministic_for_same_root() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("cache");
        let a = IndexState::target_dir(&base, dir.path(), "py");
        let b = IndexState::target_dir(&base, dir.path(), "py");
        assert_eq!(a, b);
    }
}
