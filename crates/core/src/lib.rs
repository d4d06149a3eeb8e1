//! `owlspot-core` — the incremental semantic code index engine.
//!
//! Discovers source files under a root (honoring a single root-level
//! `.gitignore`), extracts function-granular units via tree-sitter,
//! maintains a content-addressed cache of functions and their embeddings,
//! and answers k-nearest-neighbour queries with a derived per-class
//! composite ranking on top.

pub mod builder;
pub mod config;
pub mod encoder;
pub mod error;
pub mod extractor;
pub mod fingerprint;
pub mod function_store;
pub mod ignore_filter;
pub mod index_state;
pub mod query;
pub mod vector_index;

pub use builder::IncrementalBuilder;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use function_store::FunctionRecord;
pub use index_state::ModelConfig;
pub use query::{ClassGroup, ClassStats, MethodHit, QueryService, SearchHit};
