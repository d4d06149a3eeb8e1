//! Encoder Adapter.
//!
//! Wraps `fastembed`/`ort` behind a narrow `encode(texts) -> matrix`
//! contract: cached device selection, batch-size backoff on out-of-memory,
//! CPU fallback, and opt-in progress reporting. The encoder model itself is
//! process-wide mutable state, so every caller goes through this one adapter
//! and its internal lock — nobody else touches `ort` execution providers
//! directly.

use std::sync::Mutex;

use fastembed::{EmbeddingModel, ExecutionProviderDispatch, InitOptions, TextEmbedding};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

/// Out-of-memory retries before falling back to CPU.
const MAX_OOM_RETRIES: u32 = 3;

/// Minimum input count before progress reporting kicks in.
const PROGRESS_THRESHOLD: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Mps,
    Cuda,
    Cpu,
}

impl Device {
    fn label(self) -> &'static str {
        match self {
            Device::Mps => "coreml",
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

fn resolve_model(model_name: &str) -> EmbeddingModel {
    match model_name {
        "BAAI/bge-small-en-v1.5" | "bge-small" => EmbeddingModel::BGESmallENV15,
        "BAAI/bge-base-en-v1.5" | "bge-base" => EmbeddingModel::BGEBaseENV15,
        "sentence-transformers/all-MiniLM-L6-v2" | "minilm" => EmbeddingModel::AllMiniLML6V2,
        _ => {
            warn!(model_name, "unrecognized model name, defaulting to bge-small-en-v1.5");
            EmbeddingModel::BGESmallENV15
        }
    }
}

/// Probe `mps -> cuda -> cpu` in order, returning the first that actually
/// builds an execution provider successfully. Probing happens once; the
/// result is cached by the adapter for the process lifetime.
fn probe_device() -> (Device, Vec<ExecutionProviderDispatch>) {
    #[cfg(feature = "coreml")]
    {
        let ep = ort::CoreMLExecutionProvider::default();
        if ep.is_available().unwrap_or(false) {
            return (Device::Mps, vec![ep.build()]);
        }
    }
    #[cfg(feature = "cuda")]
    {
        let ep = ort::CUDAExecutionProvider::default();
        if ep.is_available().unwrap_or(false) {
            return (Device::Cuda, vec![ep.build()]);
        }
    }
    (Device::Cpu, Vec::new())
}

struct LoadedModel {
    model: TextEmbedding,
    device: Device,
    model_name: String,
    dim: Option<usize>,
}

/// Batched text-to-vector encoder. One instance is shared process-wide; all
/// mutation of the underlying model/device happens under `inner`'s lock.
pub struct Encoder {
    inner: Mutex<Option<LoadedModel>>,
    initial_batch_size: usize,
    progress_enabled: bool,
}

impl Encoder {
    pub fn new(initial_batch_size: usize, progress_enabled: bool) -> Self {
        Encoder { inner: Mutex::new(None), initial_batch_size, progress_enabled }
    }

    fn load(&self, model_name: &str, device: Device, providers: Vec<ExecutionProviderDispatch>) -> EngineResult<TextEmbedding> {
        let options = InitOptions::new(resolve_model(model_name))
            .with_execution_providers(providers)
            .with_show_download_progress(false);
        TextEmbedding::try_new(options)
            .map_err(|e| EngineError::EncoderFailure(format!("failed to load model {model_name} on {}: {e}", device.label())))
    }

    fn ensure_loaded(&self, model_name: &str) -> EngineResult<()> {
        let mut guard = self.inner.lock().expect("encoder lock poisoned");
        if let Some(loaded) = guard.as_ref() {
            if loaded.model_name == model_name {
                return Ok(());
            }
        }

        let (device, providers) = probe_device();
        info!(model_name, device = device.label(), "loading embedding model");
        let model = self.load(model_name, device, providers)?;
        *guard = Some(LoadedModel { model, device, model_name: model_name.to_string(), dim: None });
        Ok(())
    }

    fn force_cpu(&self, model_name: &str) -> EngineResult<()> {
        let mut guard = self.inner.lock().expect("encoder lock poisoned");
        warn!(model_name, "falling back to CPU after persistent device failure");
        let model = self.load(model_name, Device::Cpu, Vec::new())?;
        *guard = Some(LoadedModel { model, device: Device::Cpu, model_name: model_name.to_string(), dim: None });
        Ok(())
    }

    /// The embedding dimension of the currently loaded model. Opaque to
    /// callers until the first successful `encode` call establishes it.
    pub fn dim(&self) -> Option<usize> {
        self.inner.lock().expect("encoder lock poisoned").as_ref().and_then(|l| l.dim)
    }

    /// Encode `texts` into unit-normalized row vectors, in positional
    /// correspondence with the input. Implements the OOM backoff ladder:
    /// halve the batch size up to `MAX_OOM_RETRIES` times, then fall back to
    /// CPU and retry once more before surfacing a fatal error.
    pub fn encode(&self, model_name: &str, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.ensure_loaded(model_name)?;

        let progress = if self.progress_enabled && texts.len() > PROGRESS_THRESHOLD {
            let bar = ProgressBar::new(texts.len() as u64);
            bar.set_style(
                ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar.set_message("embedding");
            Some(bar)
        } else {
            None
        };

        let mut batch_size = self.initial_batch_size.max(1);
        let mut halvings = 0u32;
        let mut cpu_fallback_tried = false;

        loop {
            match self.try_encode_batched(texts, batch_size, progress.as_ref()) {
                Ok(rows) => return Ok(self.finish_encode(rows, &progress)),
                Err(err) if is_oom(&err) => {
                    if halvings < MAX_OOM_RETRIES {
                        halvings += 1;
                        batch_size = (batch_size / 2).max(1);
                        warn!(halvings, batch_size, "encoder OOM, retrying with smaller batch");
                        continue;
                    }

                    let on_cpu = self
                        .inner
                        .lock()
                        .expect("encoder lock poisoned")
                        .as_ref()
                        .map(|l| l.device == Device::Cpu)
                        .unwrap_or(false);

                    if on_cpu || cpu_fallback_tried {
                        return Err(EngineError::EncoderMemory { batch_size });
                    }

                    // Persistent OOM on the original device: fall back to CPU
                    // and retry exactly once more at the current batch size,
                    // rather than re-entering the halving ladder.
                    cpu_fallback_tried = true;
                    self.force_cpu(model_name)?;
                    return match self.try_encode_batched(texts, batch_size, progress.as_ref()) {
                        Ok(rows) => Ok(self.finish_encode(rows, &progress)),
                        Err(_) => Err(EngineError::EncoderMemory { batch_size }),
                    };
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn finish_encode(&self, rows: Vec<Vec<f32>>, progress: &Option<ProgressBar>) -> Vec<Vec<f32>> {
        if let Some(bar) = progress {
            bar.finish_and_clear();
        }
        let mut guard = self.inner.lock().expect("encoder lock poisoned");
        if let Some(loaded) = guard.as_mut() {
            if loaded.dim.is_none() {
                loaded.dim = rows.first().map(|r| r.len());
            }
        }
        rows
    }

    fn try_encode_batched(
        &self,
        texts: &[String],
        batch_size: usize,
        progress: Option<&ProgressBar>,
    ) -> EngineResult<Vec<Vec<f32>>> {
        let guard = self.inner.lock().expect("encoder lock poisoned");
        let loaded = guard.as_ref().ok_or_else(|| EngineError::EncoderFailure("model not loaded".into()))?;

        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size) {
            let owned: Vec<String> = chunk.to_vec();
            let embeddings = loaded
                .model
                .embed(owned, Some(batch_size))
                .map_err(|e| classify_encode_error(e, batch_size))?;
            out.extend(embeddings.into_iter().map(normalize));
            if let Some(bar) = progress {
                bar.inc(chunk.len() as u64);
            }
        }
        debug!(count = texts.len(), batch_size, "encoded batch");
        Ok(out)
    }
}

/// Unit-normalize an embedding row. `fastembed` does not guarantee
/// normalized output for every model, so this adapter enforces it itself
/// rather than trusting the backend.
fn normalize(mut row: Vec<f32>) -> Vec<f32> {
    let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut row {
            *x /= norm;
        }
    }
    row
}

fn classify_encode_error(err: fastembed::Error, batch_size: usize) -> EngineError {
    let msg = err.to_string();
    if msg.to_lowercase().contains("memory") || msg.to_lowercase().contains("alloc") {
        EngineError::EncoderMemory { batch_size }
    } else {
        EngineError::EncoderFailure(msg)
    }
}

fn is_oom(err: &EngineError) -> bool {
    matches!(err, EngineError::EncoderMemory { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_model_maps_known_names() {
        assert_eq!(resolve_model("BAAI/bge-small-en-v1.5"), EmbeddingModel::BGESmallENV15);
        assert_eq!(resolve_model("sentence-transformers/all-MiniLM-L6-v2"), EmbeddingModel::AllMiniLML6V2);
    }

    #[test]
    fn resolve_model_falls_back_for_unknown_names() {
        assert_eq!(resolve_model("totally-unknown-model-id"), EmbeddingModel::BGESmallENV15);
    }

    #[test]
    fn empty_input_short_circuits_without_loading() {
        let encoder = Encoder::new(8, false);
        let result = encoder.encode("BAAI/bge-small-en-v1.5", &[]).unwrap();
        assert!(result.is_empty());
        assert!(encoder.dim().is_none());
    }

    #[test]
    fn normalize_produces_unit_length_rows() {
        let row = normalize(vec![3.0, 4.0]);
        let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_untouched() {
        let row = normalize(vec![0.0, 0.0]);
        assert_eq!(row, vec![0.0, 0.0]);
    }
}
