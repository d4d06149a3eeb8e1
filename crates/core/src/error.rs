//! Error kinds for the incremental index engine.
//!
//! Most variants are recoverable at the point they're raised — a bad file
//! during extraction, a corrupt artifact on disk — and are logged and
//! handled locally rather than bubbled all the way to a caller. The ones
//! that actually cross the public API (`build_index`, `search`,
//! `class_stats`) are `InputNotFound`, `EncoderMemory`/`EncoderFailure`
//! (after the retry ladder in `encoder` is exhausted), and `NoIndex`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("root directory not found: {0}")]
    InputNotFound(PathBuf),

    #[error("failed to parse .gitignore at {path}: {source}")]
    IgnoreParse {
        path: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error("extraction failed for {path}: {reason}")]
    ExtractorFailure { path: PathBuf, reason: String },

    #[error("encoder out of memory after exhausting retries (last batch size {batch_size})")]
    EncoderMemory { batch_size: usize },

    #[error("encoder failure: {0}")]
    EncoderFailure(String),

    #[error("persisted artifact corrupt: {artifact} ({reason})")]
    PersistenceCorrupt { artifact: &'static str, reason: String },

    #[error("model configuration mismatch: persisted {persisted:?}, current {current:?}")]
    ModelMismatch { persisted: String, current: String },

    #[error("no index built yet for this target")]
    NoIndex,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
