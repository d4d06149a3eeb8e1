//! Thin HTTP adapter over [`owlspot_core`]: typed `Json`/`Query` extractors,
//! a shared `AppContext` state struct, and `(StatusCode, Json<Value>)` error
//! responses.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use owlspot_core::error::EngineError;
use owlspot_core::{EngineConfig, FunctionRecord, IncrementalBuilder, QueryService};

type ApiError = (StatusCode, Json<Value>);

fn engine_error_response(err: EngineError) -> ApiError {
    match err {
        EngineError::InputNotFound(path) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": format!("root directory not found: {}", path.display()) })))
        }
        EngineError::NoIndex => (StatusCode::OK, Json(json!({ "error": "no index built yet for this target", "results": [] }))),
        EngineError::EncoderMemory { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": err.to_string() })))
        }
        other => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": other.to_string() }))),
    }
}

/// Batch size / progress settings, mutable at runtime via `/update_settings`
/// and `/set_batch_size`, held behind a lock shared with the encoder.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub progress: bool,
    pub model_name: String,
}

pub struct AppContext {
    pub builder: Arc<IncrementalBuilder>,
    pub query: Arc<QueryService>,
    pub settings: Arc<RwLock<BatchSettings>>,
    /// Last `(directory, file_ext)` target requested, for `/index_status`.
    pub last_target: Mutex<Option<(PathBuf, String)>>,
}

impl AppContext {
    pub fn new(builder: Arc<IncrementalBuilder>, config: &EngineConfig) -> Self {
        let query = Arc::new(QueryService::new(builder.clone()));
        let settings = Arc::new(RwLock::new(BatchSettings {
            batch_size: config.batch_size,
            progress: config.progress,
            model_name: config.model_name.clone(),
        }));
        AppContext { builder, query, settings, last_target: Mutex::new(None) }
    }

    fn remember_target(&self, directory: &PathBuf, file_ext: &str) {
        *self.last_target.lock().expect("last_target lock poisoned") = Some((directory.clone(), file_ext.to_string()));
    }
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/embed", post(embed))
        .route("/build_index", post(build_index))
        .route("/force_rebuild_index", post(force_rebuild_index))
        .route("/index_status", get(index_status))
        .route("/search_functions_simple", post(search_functions_simple))
        .route("/get_class_stats", post(get_class_stats))
        .route("/settings", get(get_settings))
        .route("/update_settings", post(update_settings))
        .route("/set_batch_size", post(set_batch_size))
        .with_state(ctx)
}

// ---------------------------------------------------------------------------
// /embed
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct EmbedRequest {
    texts: Vec<String>,
}

#[derive(Serialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed(State(ctx): State<Arc<AppContext>>, Json(req): Json<EmbedRequest>) -> Result<Json<EmbedResponse>, ApiError> {
    let model_name = ctx.settings.read().expect("settings lock poisoned").model_name.clone();
    let embeddings = ctx
        .builder
        .encoder()
        .encode(&model_name, &req.texts)
        .map_err(engine_error_response)?;
    Ok(Json(EmbedResponse { embeddings }))
}

// ---------------------------------------------------------------------------
// /build_index, /force_rebuild_index
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct BuildIndexRequest {
    directory: PathBuf,
    file_ext: String,
}

#[derive(Serialize)]
struct BuildIndexResponse {
    function_count: usize,
    file_count: usize,
}

async fn build_index(State(ctx): State<Arc<AppContext>>, Json(req): Json<BuildIndexRequest>) -> Result<Json<BuildIndexResponse>, ApiError> {
    ctx.remember_target(&req.directory, &req.file_ext);
    let (function_count, file_count) = ctx
        .builder
        .with_index(&req.directory, &req.file_ext, true, |state| (state.functions.len(), state.file_info.len()))
        .map_err(engine_error_response)?;
    Ok(Json(BuildIndexResponse { function_count, file_count }))
}

async fn force_rebuild_index(State(ctx): State<Arc<AppContext>>, Json(req): Json<BuildIndexRequest>) -> Result<Json<BuildIndexResponse>, ApiError> {
    ctx.builder.clear_cache(&req.directory, &req.file_ext, true);
    build_index(State(ctx), Json(req)).await
}

// ---------------------------------------------------------------------------
// /index_status
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct IndexStatusResponse {
    directory: Option<PathBuf>,
    file_ext: Option<String>,
    up_to_date: bool,
    function_count: usize,
}

async fn index_status(State(ctx): State<Arc<AppContext>>) -> Result<Json<IndexStatusResponse>, ApiError> {
    let target = ctx.last_target.lock().expect("last_target lock poisoned").clone();
    let Some((directory, file_ext)) = target else {
        return Ok(Json(IndexStatusResponse { directory: None, file_ext: None, up_to_date: false, function_count: 0 }));
    };

    // Read-only: reports the last-known freshness without forcing a rebuild.
    let (up_to_date, function_count) = ctx.builder.peek_status(&directory, &file_ext).unwrap_or((false, 0));

    Ok(Json(IndexStatusResponse { directory: Some(directory), file_ext: Some(file_ext), up_to_date, function_count }))
}

// ---------------------------------------------------------------------------
// /search_functions_simple, /get_class_stats
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SearchRequest {
    directory: PathBuf,
    query: String,
    top_k: usize,
    file_ext: String,
}

#[derive(Serialize)]
struct SearchResultItem {
    record: FunctionRecord,
    score: f32,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResultItem>,
    /// Set when the target has never been indexed — `results` is then
    /// always empty rather than "nothing matched".
    message: Option<String>,
}

async fn search_functions_simple(State(ctx): State<Arc<AppContext>>, Json(req): Json<SearchRequest>) -> impl IntoResponse {
    ctx.remember_target(&req.directory, &req.file_ext);
    match ctx.query.search(&req.directory, &req.file_ext, &req.query, req.top_k) {
        Ok(hits) => {
            let results = hits.into_iter().map(|h| SearchResultItem { record: h.record, score: h.score }).collect();
            (StatusCode::OK, Json(json!(SearchResponse { results, message: None }))).into_response()
        }
        Err(EngineError::NoIndex) => {
            let body = SearchResponse { results: Vec::new(), message: Some(EngineError::NoIndex.to_string()) };
            (StatusCode::OK, Json(json!(body))).into_response()
        }
        Err(err) => {
            let (status, body) = engine_error_response(err);
            (status, body).into_response()
        }
    }
}

async fn get_class_stats(State(ctx): State<Arc<AppContext>>, Json(req): Json<SearchRequest>) -> impl IntoResponse {
    ctx.remember_target(&req.directory, &req.file_ext);
    match ctx.query.class_stats(&req.directory, &req.file_ext, &req.query, req.top_k) {
        Ok(stats) => (StatusCode::OK, Json(json!(stats))).into_response(),
        Err(EngineError::NoIndex) => {
            let body = json!({ "groups": [], "standalone": [], "message": EngineError::NoIndex.to_string() });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            let (status, body) = engine_error_response(err);
            (status, body).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// /settings, /update_settings, /set_batch_size
// ---------------------------------------------------------------------------

async fn get_settings(State(ctx): State<Arc<AppContext>>) -> Json<BatchSettings> {
    Json(ctx.settings.read().expect("settings lock poisoned").clone())
}

#[derive(Deserialize)]
struct UpdateSettingsRequest {
    batch_size: Option<usize>,
    progress: Option<bool>,
    model_name: Option<String>,
}

async fn update_settings(State(ctx): State<Arc<AppContext>>, Json(req): Json<UpdateSettingsRequest>) -> Json<BatchSettings> {
    let mut settings = ctx.settings.write().expect("settings lock poisoned");
    if let Some(batch_size) = req.batch_size {
        settings.batch_size = batch_size;
    }
    if let Some(progress) = req.progress {
        settings.progress = progress;
    }
    if let Some(model_name) = req.model_name {
        settings.model_name = model_name;
    }
    Json(settings.clone())
}

#[derive(Deserialize)]
struct SetBatchSizeRequest {
    batch_size: usize,
}

async fn set_batch_size(State(ctx): State<Arc<AppContext>>, Json(req): Json<SetBatchSizeRequest>) -> Json<BatchSettings> {
    let mut settings = ctx.settings.write().expect("settings lock poisoned");
    settings.batch_size = req.batch_size;
    Json(settings.clone())
}
