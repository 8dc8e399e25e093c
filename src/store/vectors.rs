//! Vector memories: free-form text with an embedding.
//!
//! Content is embedded through the adaptive chunker (long content is split
//! and the chunk vectors averaged) and stored as a 768-dimension BLOB.
//! Search is a cosine scan over the user's rows with scores normalized from
//! `[-1, 1]` to `[0, 1]`.

use serde_json::Value;
use sqlx::Row;
use tokio_util::sync::CancellationToken;

use super::{now_epoch, MemoryStore};
use crate::db::{bare_id, canonical_id};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{ScoredRecord, VectorMemory};

/// Hard ceiling on `k` for any search.
pub const MAX_SEARCH_K: usize = 100;
/// Default `k` when the caller does not pass one.
pub const DEFAULT_SEARCH_K: usize = 10;

/// Clamp a requested result count into `[1, MAX_SEARCH_K]`.
pub(crate) fn clamp_k(k: Option<usize>) -> usize {
    k.unwrap_or(DEFAULT_SEARCH_K).clamp(1, MAX_SEARCH_K)
}

impl MemoryStore {
    /// Embed `content` and store it as a new memory. Returns the canonical
    /// record id.
    pub async fn save_vector(
        &self,
        user_id: &str,
        content: &str,
        metadata: &Value,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if user_id.is_empty() {
            return Err(Error::Validation("user_id must not be empty".into()));
        }
        if content.trim().is_empty() {
            return Err(Error::Validation("content must not be empty".into()));
        }

        let embedding = self.embedder().embed_text_averaged(content, cancel).await?;
        let id = uuid::Uuid::new_v4().to_string();
        let statement = "INSERT INTO vector_memories
             (id, user_id, content, embedding, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?)";
        sqlx::query(statement)
            .bind(&id)
            .bind(user_id)
            .bind(content)
            .bind(vec_to_blob(&embedding))
            .bind(metadata.to_string())
            .bind(now_epoch())
            .execute(self.datastore().pool())
            .await
            .map_err(|e| crate::error::classify_sqlx(statement, e))?;
        Ok(canonical_id("vector_memories", &id))
    }

    /// Cosine search over a user's memories. Results are ordered by score
    /// descending, each in `[0, 1]`.
    pub async fn search_vectors(
        &self,
        user_id: &str,
        query: &str,
        k: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredRecord<VectorMemory>>> {
        if user_id.is_empty() {
            return Err(Error::Validation("user_id must not be empty".into()));
        }
        let k = clamp_k(k);
        let query_vec = self.embedder().embed_query(query, cancel).await?;

        let statement = "SELECT id, user_id, content, embedding, metadata, created_at
             FROM vector_memories WHERE user_id = ?";
        let rows = sqlx::query(statement)
            .bind(user_id)
            .fetch_all(self.datastore().pool())
            .await
            .map_err(|e| crate::error::classify_sqlx(statement, e))?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut scored: Vec<ScoredRecord<VectorMemory>> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let similarity = f64::from(cosine_similarity(&query_vec, &vec));
                let id: String = row.get("id");
                ScoredRecord {
                    id: canonical_id("vector_memories", &id),
                    // Cosine lands in [-1, 1]; shift into [0, 1].
                    score: (similarity + 1.0) / 2.0,
                    record: row_to_memory(row, false),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Fetch one memory by id (embedding included). `None` when absent.
    pub async fn get_vector(&self, id: &str) -> Result<Option<VectorMemory>> {
        let bare = bare_id("vector_memories", id);
        let statement = "SELECT id, user_id, content, embedding, metadata, created_at
             FROM vector_memories WHERE id = ?";
        let row = sqlx::query(statement)
            .bind(bare)
            .fetch_optional(self.datastore().pool())
            .await
            .map_err(|e| crate::error::classify_sqlx(statement, e))?;
        Ok(row.map(|r| row_to_memory(&r, true)))
    }

    /// Remove a memory by id. Returns whether it existed.
    pub async fn delete_vector(&self, id: &str) -> Result<bool> {
        self.datastore().delete_by_id("vector_memories", id).await
    }

    /// Most recent memories for a user, newest first.
    pub async fn list_vectors(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<VectorMemory>> {
        let limit = clamp_k(limit);
        let statement = "SELECT id, user_id, content, embedding, metadata, created_at
             FROM vector_memories WHERE user_id = ?
             ORDER BY created_at DESC, id LIMIT ?";
        let rows = sqlx::query(statement)
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(self.datastore().pool())
            .await
            .map_err(|e| crate::error::classify_sqlx(statement, e))?;
        Ok(rows.iter().map(|r| row_to_memory(r, false)).collect())
    }
}

fn row_to_memory(row: &sqlx::sqlite::SqliteRow, with_embedding: bool) -> VectorMemory {
    let id: String = row.get("id");
    let metadata: String = row.get("metadata");
    let created_at: i64 = row.get("created_at");
    let embedding = if with_embedding {
        let blob: Vec<u8> = row.get("embedding");
        Some(blob_to_vec(&blob))
    } else {
        None
    };
    VectorMemory {
        id: canonical_id("vector_memories", &id),
        user_id: row.get("user_id"),
        content: row.get("content"),
        embedding,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
    }
}
