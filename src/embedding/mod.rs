//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **`LocalProvider`** — in-process inference behind an exclusive lock
//!   (see [`local`]); the highest-priority provider when configured.
//! - **[`OllamaProvider`]** — calls an Ollama-style server's `/api/embed`.
//! - **[`OpenAiProvider`]** — calls an OpenAI-compatible `/embeddings` API.
//! - **[`HashedProvider`]** — deterministic token-hash vectors; used by the
//!   test suite and offline smoke runs, never selected from configuration.
//!
//! [`Embedder`] wraps a provider with the adaptive chunker: long inputs are
//! split, embedded chunk-by-chunk, and either averaged into one vector or
//! returned chunk-wise. Every vector leaving this module is normalized to
//! [`EMBEDDING_DIM`] — shorter vectors are zero-padded, longer ones
//! rejected.
//!
//! # Retry Strategy
//!
//! The remote providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-embeddings")]
pub mod local;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::chunk::{chunk_text, TextChunk};
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::models::EMBEDDING_DIM;

/// Contract every embedding backend implements.
///
/// `embed_documents` returns one vector per input, in order. A recoverable
/// per-item failure yields an empty vector for that item; the batch fails
/// only when every item failed.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider/model identifier for logs and diagnostics.
    fn name(&self) -> &str;

    /// Raw model output dimensionality (before padding to
    /// [`EMBEDDING_DIM`]). May be discovered on first use.
    fn dimension(&self) -> usize;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vecs = self.embed_documents(&[text.to_string()]).await?;
        match vecs.pop() {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(Error::Embedding("empty embedding response".into())),
        }
    }
}

/// Instantiate the provider selected by the configuration, in priority
/// order: local model, Ollama server, OpenAI-compatible API.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.resolved_provider() {
        #[cfg(feature = "local-embeddings")]
        Some("local") => Ok(Arc::new(local::LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        Some("local") => Err(Error::Config(
            "local embedding provider requires the local-embeddings feature".into(),
        )),
        Some("ollama") => Ok(Arc::new(OllamaProvider::new(config)?)),
        Some("openai") => Ok(Arc::new(OpenAiProvider::new(config)?)),
        Some(other) => Err(Error::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
        None => Err(Error::Config("no embedding provider configured".into())),
    }
}

/// Instantiate the code-embedding provider: the independent `[embedding.code]`
/// section when present, the default provider otherwise.
pub fn create_code_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match &config.code {
        Some(code) if code.is_enabled() => create_provider(code),
        _ => create_provider(config),
    }
}

// ============ Embedder (provider + chunking) ============

/// A provider paired with chunking parameters. This is the object the
/// storage engine and indexer hold.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Embedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            provider,
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Embed a query string, normalized to [`EMBEDDING_DIM`].
    pub async fn embed_query(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Embedding("cannot embed empty text".into()));
        }
        let vec = self.provider.embed_query(trimmed).await?;
        normalize_dimension(vec)
    }

    /// Embed arbitrary-length text into a single averaged vector: the text
    /// is chunked when it exceeds the configured chunk size, each chunk is
    /// embedded, failed chunks are skipped, and the survivors are averaged.
    pub async fn embed_text_averaged(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>> {
        let chunks = self.embed_text_chunks(text, cancel).await?;
        let vectors: Vec<Vec<f32>> = chunks.into_iter().map(|(_, v)| v).collect();
        let averaged = average_embeddings(&vectors)
            .ok_or_else(|| Error::Embedding("no chunk produced an embedding".into()))?;
        normalize_dimension(averaged)
    }

    /// Embed text chunk-by-chunk, returning each chunk with its vector
    /// (already normalized). Chunks whose embedding failed are dropped with
    /// a warning; an error is returned only when nothing survived. The
    /// cancellation token is observed between chunks.
    pub async fn embed_text_chunks(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<(TextChunk, Vec<f32>)>> {
        if text.trim().is_empty() {
            return Err(Error::Embedding("cannot embed empty text".into()));
        }
        let chunks = chunk_text(text, self.chunk_size, self.chunk_overlap);
        let mut out = Vec::with_capacity(chunks.len());
        let mut last_err: Option<Error> = None;

        for chunk in chunks {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let vecs = self
                .provider
                .embed_documents(std::slice::from_ref(&chunk.content))
                .await;
            match vecs {
                Ok(mut vs) => match vs.pop() {
                    Some(v) if !v.is_empty() => out.push((chunk, normalize_dimension(v)?)),
                    _ => {
                        warn!(chunk = chunk.index, "chunk produced no embedding, skipping");
                        last_err = Some(Error::Embedding("provider returned no vector".into()));
                    }
                },
                Err(e) => {
                    warn!(chunk = chunk.index, error = %e, "chunk embedding failed, skipping");
                    last_err = Some(e);
                }
            }
        }

        if out.is_empty() {
            return Err(last_err.unwrap_or_else(|| Error::Embedding("empty input".into())));
        }
        Ok(out)
    }
}

// ============ Vector utilities ============

/// Average a set of equal-length vectors component-wise. Returns `None` for
/// an empty set. Permutation-invariant; identity for a single vector.
pub fn average_embeddings(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.iter().find(|v| !v.is_empty())?;
    let dim = first.len();
    let mut sum = vec![0.0f64; dim];
    let mut count = 0usize;
    for v in vectors {
        if v.len() != dim {
            continue;
        }
        for (s, x) in sum.iter_mut().zip(v.iter()) {
            *s += f64::from(*x);
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(sum.into_iter().map(|s| (s / count as f64) as f32).collect())
}

/// Zero-pad a vector up to [`EMBEDDING_DIM`]; reject longer vectors.
pub fn normalize_dimension(mut vec: Vec<f32>) -> Result<Vec<f32>> {
    use std::cmp::Ordering;
    match vec.len().cmp(&EMBEDDING_DIM) {
        Ordering::Equal => Ok(vec),
        Ordering::Less => {
            vec.resize(EMBEDDING_DIM, 0.0);
            Ok(vec)
        }
        Ordering::Greater => Err(Error::Embedding(format!(
            "embedding has {} dimensions, maximum is {}",
            vec.len(),
            EMBEDDING_DIM
        ))),
    }
}

/// Encode a float vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

// ============ Ollama Provider ============

/// Embedding provider backed by an Ollama-style server's `POST /api/embed`.
pub struct OllamaProvider {
    model: String,
    url: String,
    dims: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .ollama_model
            .clone()
            .ok_or_else(|| Error::Config("embedding.ollama_model required".into()))?;
        Ok(Self {
            model,
            url: config
                .ollama_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            dims: config.dims.unwrap_or(EMBEDDING_DIM),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json =
            post_with_retry(&endpoint, None, &body, self.max_retries, self.timeout_secs).await?;
        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::Embedding("invalid Ollama response: missing embeddings".into())
            })?;

        let mut result = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            let vec: Vec<f32> = embedding
                .as_array()
                .ok_or_else(|| Error::Embedding("invalid Ollama response: not an array".into()))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            result.push(vec);
        }
        Ok(result)
    }
}

// ============ OpenAI-compatible Provider ============

/// Embedding provider for OpenAI-compatible `POST <base>/embeddings` APIs.
/// The API key comes from `OPENAI_API_KEY`; it never lives in the config.
pub struct OpenAiProvider {
    model: String,
    url: String,
    dims: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .openai_model
            .clone()
            .ok_or_else(|| Error::Config("embedding.openai_model required".into()))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::Config(
                "OPENAI_API_KEY environment variable not set".into(),
            ));
        }
        Ok(Self {
            model,
            url: config
                .openai_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            dims: config.dims.unwrap_or(EMBEDDING_DIM),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY not set".into()))?;
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let endpoint = format!("{}/embeddings", self.url.trim_end_matches('/'));
        let json = post_with_retry(
            &endpoint,
            Some(&api_key),
            &body,
            self.max_retries,
            self.timeout_secs,
        )
        .await?;

        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::Embedding("invalid response: missing data array".into()))?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| Error::Embedding("invalid response: missing embedding".into()))?;
            let vec: Vec<f32> = embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            embeddings.push(vec);
        }
        Ok(embeddings)
    }
}

/// POST a JSON body with exponential-backoff retries on 429/5xx/network
/// errors; other 4xx responses fail immediately.
async fn post_with_retry(
    endpoint: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    timeout_secs: u64,
) -> Result<Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Embedding(e.to_string()))?;

    let mut last_err: Option<Error> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(endpoint).json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| Error::Embedding(e.to_string()));
                }
                let text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(Error::Embedding(format!(
                        "embedding API error {}: {}",
                        status, text
                    )));
                    continue;
                }
                return Err(Error::Embedding(format!(
                    "embedding API error {}: {}",
                    status, text
                )));
            }
            Err(e) => {
                last_err = Some(Error::Embedding(format!(
                    "embedding API unreachable at {}: {}",
                    endpoint, e
                )));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Embedding("embedding failed after retries".into())))
}

// ============ Deterministic provider for tests ============

/// A deterministic provider hashing tokens into a fixed-dimension vector.
/// Similar texts share tokens and therefore direction, which is enough for
/// ranking assertions in tests without a model download.
pub struct HashedProvider {
    dims: usize,
}

impl HashedProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let mut h: u64 = 0xcbf2_9ce4_8422_2325;
            for b in token.as_bytes() {
                h ^= u64::from(*b);
                h = h.wrapping_mul(0x1000_0000_01b3);
            }
            vec[(h % self.dims as u64) as usize] += 1.0;
        }
        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut vec {
                *x /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for HashedProvider {
    fn name(&self) -> &str {
        "hashed"
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| {
                if t.trim().is_empty() {
                    Err(Error::Embedding("cannot embed empty text".into()))
                } else {
                    Ok(self.embed_one(t))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn average_is_identity_for_single_vector() {
        let v = vec![vec![0.25f32, -1.0, 3.5]];
        assert_eq!(average_embeddings(&v).unwrap(), v[0]);
    }

    #[test]
    fn average_is_permutation_invariant() {
        let a = vec![1.0f32, 2.0, 3.0];
        let b = vec![4.0f32, 5.0, 6.0];
        let c = vec![-1.0f32, 0.0, 1.0];
        let one = average_embeddings(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let two = average_embeddings(&[c, a, b]).unwrap();
        for (x, y) in one.iter().zip(two.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn average_of_empty_set_is_none() {
        assert!(average_embeddings(&[]).is_none());
        assert!(average_embeddings(&[vec![], vec![]]).is_none());
    }

    #[test]
    fn normalize_pads_short_vectors() {
        let v = normalize_dimension(vec![1.0; 384]).unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert_eq!(v[383], 1.0);
        assert_eq!(v[384], 0.0);
    }

    #[test]
    fn normalize_rejects_long_vectors() {
        assert!(normalize_dimension(vec![0.0; EMBEDDING_DIM + 1]).is_err());
    }

    #[tokio::test]
    async fn hashed_provider_is_deterministic() {
        let p = HashedProvider::new(64);
        let a = p.embed_query("connection pool exhausted").await.unwrap();
        let b = p.embed_query("connection pool exhausted").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn hashed_provider_ranks_related_text_higher() {
        let p = HashedProvider::new(256);
        let q = p.embed_query("user preferences").await.unwrap();
        let related = p.embed_query("the user preferences panel").await.unwrap();
        let unrelated = p.embed_query("quarterly revenue forecast").await.unwrap();
        assert!(cosine_similarity(&q, &related) > cosine_similarity(&q, &unrelated));
    }

    #[tokio::test]
    async fn hashed_provider_rejects_empty() {
        let p = HashedProvider::new(64);
        assert!(p.embed_documents(&["  ".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn embedder_averages_long_text() {
        let provider = Arc::new(HashedProvider::new(32));
        let embedder = Embedder::new(provider, 20, 4);
        let text = "alpha beta gamma. delta epsilon zeta. eta theta iota.";
        let cancel = CancellationToken::new();
        let vec = embedder.embed_text_averaged(text, &cancel).await.unwrap();
        assert_eq!(vec.len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn embedder_rejects_empty_text() {
        let provider = Arc::new(HashedProvider::new(32));
        let embedder = Embedder::new(provider, 20, 4);
        let cancel = CancellationToken::new();
        assert!(embedder.embed_text_averaged("", &cancel).await.is_err());
        assert!(embedder.embed_query(" \n ", &cancel).await.is_err());
    }

    #[tokio::test]
    async fn embedder_returns_chunks_with_vectors() {
        let provider = Arc::new(HashedProvider::new(32));
        let embedder = Embedder::new(provider, 24, 6);
        let text = "one two three four. five six seven eight. nine ten.";
        let cancel = CancellationToken::new();
        let chunks = embedder.embed_text_chunks(text, &cancel).await.unwrap();
        assert!(chunks.len() > 1);
        for (chunk, vec) in &chunks {
            assert!(!chunk.content.is_empty());
            assert_eq!(vec.len(), EMBEDDING_DIM);
        }
    }

    #[tokio::test]
    async fn cancelled_token_aborts_embedding() {
        let provider = Arc::new(HashedProvider::new(32));
        let embedder = Embedder::new(provider, 20, 4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = embedder
            .embed_query("anything at all", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
