//! Query Service.
//!
//! Single-query encoding + top-k search, plus the per-class composite
//! ranking derived from function hits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::builder::IncrementalBuilder;
use crate::error::{EngineError, EngineResult};
use crate::function_store::FunctionRecord;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub record: FunctionRecord,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodHit {
    pub name: String,
    pub lineno: usize,
    pub rank: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassGroup {
    pub class_name: String,
    pub file: PathBuf,
    pub weighted_score: f32,
    pub proportion: f32,
    pub composite: f32,
    pub best_rank: Option<usize>,
    pub methods: Vec<MethodHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassStats {
    pub groups: Vec<ClassGroup>,
    pub standalone: Vec<MethodHit>,
}

pub struct QueryService {
    builder: Arc<IncrementalBuilder>,
}

impl QueryService {
    pub fn new(builder: Arc<IncrementalBuilder>) -> Self {
        QueryService { builder }
    }

    /// Top-k nearest function records to `query`. A target that has never
    /// been indexed (no records at all) surfaces `EngineError::NoIndex`
    /// rather than an empty match list, so callers can tell "nothing
    /// indexed yet" apart from "indexed, but nothing matched".
    pub fn search(&self, root: &Path, ext: &str, query: &str, k: usize) -> EngineResult<Vec<SearchHit>> {
        let hits = self.builder.with_index(root, ext, true, |state| {
            if state.functions.is_empty() {
                return None;
            }

            let query_vec = match self.encode_query(query) {
                Ok(v) => v,
                Err(_) => return Some(Vec::new()),
            };

            let (scores, row_ids) = state.vector_index.search(&query_vec, k);
            Some(
                row_ids
                    .into_iter()
                    .zip(scores)
                    .filter_map(|(row_id, score)| state.functions.get(row_id).map(|r| SearchHit { record: r.clone(), score }))
                    .collect(),
            )
        })?;

        hits.ok_or(EngineError::NoIndex)
    }

    fn encode_query(&self, query: &str) -> EngineResult<Vec<f32>> {
        let rows = self.builder.encoder().encode(&self.builder.config_model_name(), &[query.to_string()])?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    /// Runs `search` with `k` as the top-k function pool, then aggregates
    /// hits into per-`(class_name, file)` composite rankings. The composite
    /// formula (`weighted_score * (1 + proportion) / 2`) is fixed and not
    /// re-derived per call.
    pub fn class_stats(&self, root: &Path, ext: &str, query: &str, k: usize) -> EngineResult<ClassStats> {
        let hits = self.search(root, ext, query, k)?;

        // rank is 1-based position in the search result, matched by
        // (name, absolute file, lineno).
        let mut rank_by_key: std::collections::HashMap<(String, PathBuf, usize), usize> = std::collections::HashMap::new();
        for (i, hit) in hits.iter().enumerate() {
            rank_by_key.insert((hit.record.name.clone(), hit.record.file.clone(), hit.record.lineno), i + 1);
        }

        let all_records = self.builder.with_index(root, ext, false, |state| state.functions.as_slice().to_vec())?;

        // Group by (class_name, file); a class appearing in two files is two groups.
        let mut groups: BTreeMap<(String, PathBuf), Vec<&FunctionRecord>> = BTreeMap::new();
        let mut standalone_order: Vec<&FunctionRecord> = Vec::new();
        for record in &all_records {
            match &record.class_name {
                Some(class_name) => {
                    groups.entry((class_name.clone(), record.file.clone())).or_default().push(record);
                }
                None => standalone_order.push(record),
            }
        }

        let mut class_groups: Vec<ClassGroup> = Vec::new();
        for ((class_name, file), methods) in groups {
            let method_count = methods.len();
            let mut method_hits: Vec<MethodHit> = methods
                .iter()
                .map(|m| {
                    let rank = rank_by_key.get(&(m.name.clone(), m.file.clone(), m.lineno)).copied();
                    MethodHit { name: m.name.clone(), lineno: m.lineno, rank }
                })
                .collect();

            let matched: Vec<usize> = method_hits.iter().filter_map(|m| m.rank).collect();
            let weighted_score: f32 = matched.iter().map(|&r| 1.0 / r as f32).sum();
            let proportion = matched.len() as f32 / method_count as f32;
            let composite = weighted_score * (1.0 + proportion) / 2.0;
            let best_rank = matched.iter().min().copied();

            method_hits.sort_by_key(|m| m.rank.unwrap_or(usize::MAX));

            class_groups.push(ClassGroup { class_name, file, weighted_score, proportion, composite, best_rank, methods: method_hits });
        }
        class_groups.sort_by(|a, b| b.composite.partial_cmp(&a.composite).unwrap_or(std::cmp::Ordering::Equal));

        // Standalone functions: matched ones in search-result order, then
        // remaining ones in discovery order.
        let mut matched_standalone: Vec<(usize, MethodHit)> = Vec::new();
        let mut unmatched_standalone: Vec<MethodHit> = Vec::new();
        for record in standalone_order {
            let rank = rank_by_key.get(&(record.name.clone(), record.file.clone(), record.lineno)).copied();
            let hit = MethodHit { name: record.name.clone(), lineno: record.lineno, rank };
            match rank {
                Some(r) => matched_standalone.push((r, hit)),
                None => unmatched_standalone.push(hit),
            }
        }
        matched_standalone.sort_by_key(|(r, _)| *r);
        let mut standalone: Vec<MethodHit> = matched_standalone.into_iter().map(|(_, h)| h).collect();
        standalone.extend(unmatched_standalone);

        Ok(ClassStats { groups: class_groups, standalone })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::function_store::FunctionStore;
    use crate::index_state::ModelConfig;

    fn rec(file: &str, name: &str, class_name: Option<&str>, lineno: usize) -> FunctionRecord {
        FunctionRecord {
            name: name.into(),
            code: "body".into(),
            file: PathBuf::from(file),
            lineno,
            end_lineno: lineno + 1,
            class_name: class_name.map(|c| c.to_string()),
        }
    }

    #[test]
    fn composite_formula_weights_matched_methods_by_inverse_rank() {
        // root contains class C with methods m1, m2, m3; search ranks m1=1, m3=2.
        let mut store = FunctionStore::new();
        store.push(rec("x.py", "m1", Some("C"), 1));
        store.push(rec("x.py", "m2", Some("C"), 10));
        store.push(rec("x.py", "m3", Some("C"), 20));

        let mut rank_by_key = std::collections::HashMap::new();
        rank_by_key.insert(("m1".to_string(), PathBuf::from("x.py"), 1usize), 1usize);
        rank_by_key.insert(("m3".to_string(), PathBuf::from("x.py"), 20usize), 2usize);

        let methods: Vec<&FunctionRecord> = store.as_slice().iter().collect();
        let method_count = methods.len();
        let matched: Vec<usize> = methods
            .iter()
            .filter_map(|m| rank_by_key.get(&(m.name.clone(), m.file.clone(), m.lineno)).copied())
            .collect();
        let weighted_score: f32 = matched.iter().map(|&r| 1.0 / r as f32).sum();
        let proportion = matched.len() as f32 / method_count as f32;
        let composite = weighted_score * (1.0 + proportion) / 2.0;

        assert!((composite - 1.25).abs() < 1e-6, "composite was {composite}");
    }

    #[test]
    fn class_in_two_files_is_two_groups() {
        // Sanity check on the grouping key itself, exercised structurally
        // rather than through the full builder (which needs an encoder).
        let mut groups: std::collections::BTreeMap<(String, PathBuf), Vec<&FunctionRecord>> = Default::default();
        let a = rec("a.py", "m", Some("C"), 1);
        let b = rec("b.py", "m", Some("C"), 1);
        groups.entry((a.class_name.clone().unwrap(), a.file.clone())).or_default().push(&a);
        groups.entry((b.class_name.clone().unwrap(), b.file.clone())).or_default().push(&b);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn search_on_never_indexed_target_is_no_index_error() {
        let base = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let builder = Arc::new(IncrementalBuilder::new(
            base.path().to_path_buf(),
            EngineConfig { model_name: "m".into(), batch_size: 4, progress: false },
        ));
        let query = QueryService::new(builder);

        let result = query.search(root.path(), "py", "anything", 5);
        assert!(matches!(result, Err(EngineError::NoIndex)));
    }

    #[test]
    fn engine_config_smoke() {
        // Not a real encode path — just verifies construction doesn't panic.
        let _cfg = EngineConfig { model_name: "m".into(), batch_size: 4, progress: false };
        let _mc = ModelConfig::new("m");
    }
}
