//! Local in-process embedding provider.
//!
//! Runs the model inside the process with a bundled ONNX runtime
//! (fastembed), so no external service is needed after the one-time model
//! download. The runtime is not safe for concurrent calls and can fault on
//! malformed input, which shapes everything here:
//!
//! - all inference runs under one exclusive lock,
//! - per-call limits derive from a conservative 384-token micro-batch:
//!   `max_tokens = 0.70 × 384`, `max_chars = min(1.5 × max_tokens, 450)`;
//!   longer inputs are truncated with a warning, empty inputs rejected,
//! - batches larger than [`MAX_BATCH`] are rejected to bound memory,
//! - a panic inside the native call is caught and reported as a recoverable
//!   error; the failed item yields an empty vector and the rest of the
//!   batch continues; the batch fails only when every item failed,
//! - the first successful call records the model's output dimension and
//!   later calls verify it.

use async_trait::async_trait;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Micro-batch token budget the limits derive from.
const UBATCH_TOKENS: usize = 384;
/// Per-call token ceiling: 70% of the micro-batch.
const MAX_TOKENS: usize = UBATCH_TOKENS * 70 / 100;
/// Per-call character ceiling.
const MAX_CHARS: usize = if MAX_TOKENS * 3 / 2 < 450 {
    MAX_TOKENS * 3 / 2
} else {
    450
};
/// Largest accepted document batch.
const MAX_BATCH: usize = 10;

/// In-process embedding provider. Cheap to clone; all clones share the
/// model handle and its lock.
#[derive(Clone)]
pub struct LocalProvider {
    inner: Arc<Inner>,
}

struct Inner {
    model_name: String,
    /// The model handle. Exclusive: the runtime must never see two
    /// concurrent calls.
    model: Mutex<fastembed::TextEmbedding>,
    /// Output dimension, 0 until discovered by the first successful call.
    discovered_dim: AtomicUsize,
}

impl LocalProvider {
    /// Load the configured model. Blocks while the runtime initializes
    /// (and downloads weights on first use), so call this at startup.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .local_model
            .clone()
            .unwrap_or_else(|| "nomic-embed-text-v1.5".to_string());
        let model_id = resolve_model(&model_name)?;

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(model_id).with_show_download_progress(false),
        )
        .map_err(|e| Error::Embedding(format!("failed to load model {}: {}", model_name, e)))?;

        info!(
            model = %model_name,
            max_tokens = MAX_TOKENS,
            max_chars = MAX_CHARS,
            "local embedding model loaded"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                model_name,
                model: Mutex::new(model),
                discovered_dim: AtomicUsize::new(0),
            }),
        })
    }
}

/// Map a configured model name onto the runtime's model id.
fn resolve_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        other => Err(Error::Config(format!(
            "unknown local embedding model: '{}'. Supported: all-minilm-l6-v2, \
             bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base",
            other
        ))),
    }
}

/// Truncate to the per-call character budget, on a char boundary.
fn bound_input(text: &str) -> &str {
    if text.chars().count() <= MAX_CHARS {
        return text;
    }
    let end = text
        .char_indices()
        .nth(MAX_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    warn!(
        chars = text.chars().count(),
        max = MAX_CHARS,
        "input exceeds local embedding budget, truncating"
    );
    &text[..end]
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        &self.inner.model_name
    }

    fn dimension(&self) -> usize {
        self.inner.discovered_dim.load(Ordering::Relaxed)
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() > MAX_BATCH {
            return Err(Error::Embedding(format!(
                "batch of {} exceeds the local provider limit of {}",
                texts.len(),
                MAX_BATCH
            )));
        }
        for text in texts {
            if text.trim().is_empty() {
                return Err(Error::Embedding("cannot embed empty text".into()));
            }
        }

        let bounded: Vec<String> = texts.iter().map(|t| bound_input(t).to_string()).collect();
        let inner = Arc::clone(&self.inner);

        // Inference is CPU-bound and serialized; keep it off the async
        // executor and hold the lock for the whole batch.
        tokio::task::spawn_blocking(move || {
            let mut model = inner
                .model
                .lock()
                .map_err(|_| Error::Embedding("embedding lock poisoned".into()))?;

            let mut out: Vec<Vec<f32>> = Vec::with_capacity(bounded.len());
            let mut last_err: Option<Error> = None;
            let mut any_ok = false;

            for text in &bounded {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    model.embed(vec![text.clone()], None)
                }));
                match result {
                    Ok(Ok(mut vectors)) => match vectors.pop() {
                        Some(vec) => {
                            let dim = vec.len();
                            let seen = inner.discovered_dim.load(Ordering::Relaxed);
                            if seen == 0 {
                                inner.discovered_dim.store(dim, Ordering::Relaxed);
                            } else if seen != dim {
                                last_err = Some(Error::Embedding(format!(
                                    "model dimension changed: {} then {}",
                                    seen, dim
                                )));
                                out.push(Vec::new());
                                continue;
                            }
                            any_ok = true;
                            out.push(vec);
                        }
                        None => {
                            last_err =
                                Some(Error::Embedding("runtime returned no vector".into()));
                            out.push(Vec::new());
                        }
                    },
                    Ok(Err(e)) => {
                        warn!(error = %e, "local embedding call failed");
                        last_err = Some(Error::Embedding(e.to_string()));
                        out.push(Vec::new());
                    }
                    Err(panic) => {
                        let message = panic_message(&panic);
                        warn!(message = %message, "caught panic in embedding runtime");
                        last_err = Some(Error::PanicRecovered(message));
                        out.push(Vec::new());
                    }
                }
            }

            if !any_ok {
                return Err(
                    last_err.unwrap_or_else(|| Error::Embedding("embedding failed".into()))
                );
            }
            Ok(out)
        })
        .await
        .map_err(|e| Error::Embedding(format!("embedding task aborted: {}", e)))?
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_derive_from_micro_batch() {
        assert_eq!(MAX_TOKENS, 268);
        assert_eq!(MAX_CHARS, 402);
        assert!(MAX_CHARS <= 450);
    }

    #[test]
    fn bound_input_truncates_on_char_boundary() {
        let long = "é".repeat(MAX_CHARS + 50);
        let bounded = bound_input(&long);
        assert_eq!(bounded.chars().count(), MAX_CHARS);
        let short = "hello";
        assert_eq!(bound_input(short), short);
    }

    #[test]
    fn unknown_model_is_a_config_error() {
        assert!(resolve_model("definitely-not-a-model").is_err());
        assert!(resolve_model("nomic-embed-text-v1.5").is_ok());
    }
}
