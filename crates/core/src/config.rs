//! Process-wide engine configuration, read once from the environment.
//!
//! A plain struct built at startup rather than scattered `env::var` calls at
//! each use site, keyed to the three `OWL_*` variables the engine reads.

use std::env;

/// The default embedding model when `OWL_MODEL_NAME` is unset.
pub const DEFAULT_MODEL_NAME: &str = "BAAI/bge-small-en-v1.5";

/// The default initial batch size when `OWL_BATCH_SIZE` is unset or unparsable.
pub const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model_name: String,
    pub batch_size: usize,
    pub progress: bool,
}

impl EngineConfig {
    /// Read `OWL_MODEL_NAME`, `OWL_BATCH_SIZE`, `OWL_PROGRESS` from the process
    /// environment. Unset or malformed values fall back to their defaults
    /// rather than failing startup.
    pub fn from_env() -> Self {
        let model_name =
            env::var("OWL_MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL_NAME.to_string());

        let batch_size = env::var("OWL_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);

        let progress = match env::var("OWL_PROGRESS") {
            Ok(v) => !matches!(v.trim(), "0" | "false" | "False" | "FALSE"),
            Err(_) => true,
        };

        EngineConfig { model_name, batch_size, progress }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            progress: true,
        }
    }
}
