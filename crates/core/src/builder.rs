//! Incremental index builder.
//!
//! The engine: orchestrates discovery, fingerprinting, extraction, embedding
//! reuse, and persistence with order-preserving merges, all under one
//! per-target lock. Changed files above a size threshold are extracted on a
//! bounded worker pool.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::encoder::Encoder;
use crate::error::{EngineError, EngineResult};
use crate::extractor;
use crate::fingerprint::hash_file;
use crate::function_store::{FunctionRecord, FunctionStore};
use crate::ignore_filter::IgnoreFilter;
use crate::index_state::{now_unix, FileEntry, IndexState, ModelConfig};

/// Files are extracted on a bounded worker pool once the changeset reaches
/// this size.
const PARALLEL_THRESHOLD: usize = 16;
const WORKER_POOL_SIZE: usize = 8;

type TargetKey = (PathBuf, String);

pub struct IncrementalBuilder {
    registry: DashMap<TargetKey, Arc<Mutex<IndexState>>>,
    base_dir: PathBuf,
    encoder: Arc<Encoder>,
    config: EngineConfig,
}

impl IncrementalBuilder {
    pub fn new(base_dir: PathBuf, config: EngineConfig) -> Self {
        let encoder = Arc::new(Encoder::new(config.batch_size, config.progress));
        IncrementalBuilder { registry: DashMap::new(), base_dir, encoder, config }
    }

    fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.config.model_name.clone())
    }

    /// The shared encoder, for callers (the query service) that need to
    /// encode a single query string without going through a rebuild.
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn config_model_name(&self) -> String {
        self.config.model_name.clone()
    }

    fn target_dir(&self, root: &Path, ext: &str) -> PathBuf {
        IndexState::target_dir(&self.base_dir, root, ext)
    }

    fn entry(&self, root: &Path, ext: &str) -> Arc<Mutex<IndexState>> {
        let key: TargetKey = (root.to_path_buf(), ext.to_string());
        if let Some(existing) = self.registry.get(&key) {
            return existing.clone();
        }

        // Cold start for this target within this process: try to warm-start
        // from disk before falling back to an empty state.
        let dir = self.target_dir(root, ext);
        let state = IndexState::load(&dir, root, ext).unwrap_or_else(|| {
            IndexState::empty(root.to_path_buf(), ext.to_string(), self.model_config(), 0)
        });
        let arc = Arc::new(Mutex::new(state));
        self.registry.entry(key).or_insert(arc).clone()
    }

    /// Drop in-memory state for `(root, ext)`, optionally also removing its
    /// persistence directory.
    pub fn clear_cache(&self, root: &Path, ext: &str, also_disk: bool) {
        let key: TargetKey = (root.to_path_buf(), ext.to_string());
        self.registry.remove(&key);
        if also_disk {
            let dir = self.target_dir(root, ext);
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    warn!(dir = %dir.display(), error = %e, "failed to remove persistence directory");
                }
            }
        }
    }

    /// Read-only freshness check for `(root, ext)`: locks the target's state
    /// to see a consistent snapshot and reports `is_up_to_date`, but never
    /// triggers a rebuild. Safe to call from a status endpoint that must not
    /// have parse/embed side effects.
    pub fn peek_status(&self, root: &Path, ext: &str) -> EngineResult<(bool, usize)> {
        if !root.exists() {
            return Err(EngineError::InputNotFound(root.to_path_buf()));
        }

        let arc = self.entry(root, ext);
        let guard = arc.lock().expect("index state lock poisoned");
        let up_to_date = guard.is_up_to_date(root, &self.model_config());
        Ok((up_to_date, guard.functions.len()))
    }

    /// Ensure a fresh index for `(root, ext)` and run `f` against it while
    /// still holding the target's lock — the one operation that guarantees
    /// a caller never observes a torn rebuild.
    pub fn with_index<R>(
        &self,
        root: &Path,
        ext: &str,
        update_state: bool,
        f: impl FnOnce(&mut IndexState) -> R,
    ) -> EngineResult<R> {
        if !root.exists() {
            return Err(EngineError::InputNotFound(root.to_path_buf()));
        }

        let arc = self.entry(root, ext);
        let mut guard = arc.lock().expect("index state lock poisoned");
        let current_model_config = self.model_config();

        // Fast path: already fresh, touch nothing.
        if guard.is_up_to_date(root, &current_model_config) {
            debug!(root = %root.display(), ext, "fast path: index already up to date");
            return Ok(f(&mut guard));
        }

        // Warm path (step 2): persisted config disagrees with the current
        // model -> full discard, including disk, before rebuilding.
        if guard.model_config != current_model_config && !guard.file_info.is_empty() {
            info!(root = %root.display(), ext, "model configuration changed, discarding cache");
            drop(guard);
            self.clear_cache(root, ext, true);
            let arc = self.entry(root, ext);
            guard = arc.lock().expect("index state lock poisoned");
        }

        self.rebuild(&mut guard, root, ext, update_state)?;
        Ok(f(&mut guard))
    }

    fn rebuild(&self, state: &mut IndexState, root: &Path, ext: &str, update_state: bool) -> EngineResult<()> {
        // Step 3: enumerate.
        let filter = IgnoreFilter::load(root);
        let discovered = filter.collect_files(ext);

        let mut new_info: HashMap<String, FileEntry> = HashMap::new();
        let mut ordered_paths: Vec<PathBuf> = Vec::new();
        for path in &discovered {
            match hash_file(path) {
                Ok(hash) => {
                    new_info.insert(path.to_string_lossy().to_string(), FileEntry { hash });
                    ordered_paths.push(path.clone());
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "file vanished between enumeration and hashing, treating as deleted");
                }
            }
        }

        // Step 4: diff.
        let prev_info = state.file_info.clone();
        let mut unchanged: HashSet<String> = HashSet::new();
        let mut added_or_modified: Vec<PathBuf> = Vec::new();
        for path in &ordered_paths {
            let key = path.to_string_lossy().to_string();
            match prev_info.get(&key) {
                Some(prev_entry) if prev_entry.hash == new_info[&key].hash => {
                    unchanged.insert(key);
                }
                _ => added_or_modified.push(path.clone()),
            }
        }
        let deleted: Vec<String> = prev_info.keys().filter(|k| !new_info.contains_key(*k)).cloned().collect();

        // Step 5: no-op check.
        if added_or_modified.is_empty() && deleted.is_empty() && !prev_info.is_empty() {
            debug!(root = %root.display(), ext, "no changes detected, reusing prior state");
            return Ok(());
        }

        info!(
            root = %root.display(), ext,
            unchanged = unchanged.len(), changed = added_or_modified.len(), deleted = deleted.len(),
            "rebuilding index"
        );

        // Step 6: extract. Unchanged files reuse their prior records;
        // added/modified files are (re-)parsed, in parallel above the
        // bounded-pool threshold.
        let prior_records = state.functions.as_slice().to_vec();
        let kept_records: Vec<FunctionRecord> =
            prior_records.into_iter().filter(|r| unchanged.contains(&r.file.to_string_lossy().to_string())).collect();

        let fresh_records: Vec<FunctionRecord> = if added_or_modified.len() >= PARALLEL_THRESHOLD {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(WORKER_POOL_SIZE)
                .build()
                .map_err(|e| EngineError::ExtractorFailure { path: root.to_path_buf(), reason: e.to_string() })?;
            pool.install(|| extract_many(&added_or_modified, ext, true))
        } else {
            extract_many(&added_or_modified, ext, false)
        };

        // Step 7: merge with stable ordering.
        let mut new_functions = FunctionStore::new();
        for r in kept_records {
            new_functions.push(r);
        }
        for r in fresh_records {
            new_functions.push(r);
        }

        let new_ids = new_functions.identities();
        let prev_ids = prior_ids_by_identity(state);

        // Step 8: embedding reuse via scatter, not filter-and-concat — kept
        // rows are placed by *position* in the new sequence so a crash
        // mid-rebuild can never desynchronize rows.
        let mut fresh_positions: Vec<usize> = Vec::new();
        let mut reused_rows: HashMap<usize, Vec<f32>> = HashMap::new();
        for (i, id) in new_ids.iter().enumerate() {
            if let Some(&prev_row) = prev_ids.get(id) {
                let row = state.embeddings.row(prev_row).to_vec();
                reused_rows.insert(i, row);
            } else {
                fresh_positions.push(i);
            }
        }

        let fresh_texts: Vec<String> =
            fresh_positions.iter().map(|&i| new_functions.as_slice()[i].code.clone()).collect();
        let fresh_vectors = if fresh_texts.is_empty() {
            Vec::new()
        } else {
            self.encoder.encode(&self.config.model_name, &fresh_texts)?
        };

        let dim = fresh_vectors
            .first()
            .map(|v| v.len())
            .or_else(|| self.encoder.dim())
            .or_else(|| if state.embeddings.ncols() > 0 { Some(state.embeddings.ncols()) } else { None })
            .unwrap_or(0);

        let mut new_embeddings = Array2::<f32>::zeros((new_functions.len(), dim));
        for (i, row) in reused_rows {
            if row.len() == dim {
                new_embeddings.row_mut(i).assign(&ndarray::ArrayView1::from(&row));
            }
        }
        for (pos_idx, &i) in fresh_positions.iter().enumerate() {
            let row = &fresh_vectors[pos_idx];
            new_embeddings.row_mut(i).assign(&ndarray::ArrayView1::from(row));
        }

        // Step 9: rebuild the vector index fresh rather than mutating the
        // prior one in place.
        let mut new_vector_index = crate::vector_index::VectorIndex::new(dim);
        let all_rows: Vec<Vec<f32>> = new_embeddings.rows().into_iter().map(|r| r.to_vec()).collect();
        new_vector_index.add(&all_rows);

        // Step 10: commit.
        state.file_info = new_info;
        state.functions = new_functions;
        state.embeddings = new_embeddings;
        state.vector_index = new_vector_index;
        state.last_indexed = now_unix();
        state.model_config = self.model_config();

        if update_state {
            let dir = self.target_dir(root, ext);
            state
                .save(&dir)
                .map_err(|e| EngineError::PersistenceCorrupt { artifact: "target directory", reason: e.to_string() })?;
        }

        Ok(())
    }
}

/// Extracts records for `paths`, either on the calling thread (`parallel =
/// false`, for changesets below the pool threshold) or across whatever pool
/// the caller installed (`parallel = true`). Only the `true` branch touches
/// Rayon's work-stealing path, so a small changeset never contends with the
/// global thread pool while the caller's lock is held.
fn extract_many(paths: &[PathBuf], ext: &str, parallel: bool) -> Vec<FunctionRecord> {
    let to_records = |path: &PathBuf| -> Vec<FunctionRecord> {
        extractor::extract_file(path, ext)
            .into_iter()
            .map(|raw| FunctionRecord {
                name: raw.name,
                code: raw.code,
                file: path.clone(),
                lineno: raw.lineno,
                end_lineno: raw.end_lineno,
                class_name: raw.class_name,
            })
            .collect()
    };

    let per_file: Vec<Vec<FunctionRecord>> =
        if parallel { paths.par_iter().map(to_records).collect() } else { paths.iter().map(to_records).collect() };
    per_file.into_iter().flatten().collect()
}

fn prior_ids_by_identity(state: &IndexState) -> HashMap<String, usize> {
    state
        .functions
        .as_slice()
        .iter()
        .enumerate()
        .map(|(i, r)| (r.identity(), i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn builder(base: &Path) -> IncrementalBuilder {
        IncrementalBuilder::new(base.to_path_buf(), EngineConfig { model_name: "test-model".into(), batch_size: 8, progress: false })
    }

    #[test]
    fn missing_root_is_input_not_found() {
        let base = tempdir().unwrap();
        let b = builder(base.path());
        let missing = base.path().join("does-not-exist");
        let result = b.with_index(&missing, "py", false, |_| ());
        assert!(matches!(result, Err(EngineError::InputNotFound(_))));
    }

    #[test]
    fn no_matching_files_yields_empty_index() {
        let base = tempdir().unwrap();
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), "not python").unwrap();
        let b = builder(base.path());
        let len = b.with_index(root.path(), "py", false, |s| s.functions.len()).unwrap();
        assert_eq!(len, 0);
    }
}
