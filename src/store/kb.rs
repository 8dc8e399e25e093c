//! Knowledge-base documents.
//!
//! A document is stored as one record per chunk, all sharing `source_file`
//! (the logical `file_path`) with contiguous `chunk_index` values. Each
//! chunk carries its byte offsets in its metadata so `kb_get` can stitch
//! the original text back together exactly, overlap removed.
//!
//! When a KB directory is configured, documents are mirrored to
//! `<root>/<file_path>` on write and removed on delete; `kb_sync` walks the
//! directory the other way and (re)indexes files whose content changed.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::Row;
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::vectors::clamp_k;
use super::{now_epoch, MemoryStore};
use crate::db::canonical_id;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{classify_sqlx, Error, Result};
use crate::models::ScoredRecord;

/// Summary of one stored document.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KbDocument {
    pub file_path: String,
    pub chunk_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// One grouped search hit: the best-scoring chunk of a document.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KbSearchHit {
    pub file_path: String,
    pub snippet: String,
    pub chunk_index: i64,
}

/// Outcome of a directory sync.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct KbSyncReport {
    pub indexed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl MemoryStore {
    /// Store (or replace) a document: split into chunks, embed each, write
    /// one record per chunk, and mirror the file into the KB directory.
    /// Returns the number of chunks written.
    pub async fn kb_add(
        &self,
        file_path: &str,
        content: &str,
        metadata: &Value,
        user_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let relative = validate_kb_path(file_path)?;
        if content.is_empty() {
            return Err(Error::Validation("content must not be empty".into()));
        }

        let embedded = self.embedder().embed_text_chunks(content, cancel).await?;
        let chunk_count = embedded.len() as i64;
        let now = now_epoch();

        let mut tx = self
            .datastore()
            .pool()
            .begin()
            .await
            .map_err(|e| classify_sqlx("BEGIN", e))?;

        // Replace semantics: the previous version's chunks go away first.
        sqlx::query("DELETE FROM knowledge_base WHERE source_file = ?")
            .bind(file_path)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_sqlx("DELETE FROM knowledge_base", e))?;

        for (chunk, vector) in &embedded {
            let mut chunk_meta = metadata.clone();
            if !chunk_meta.is_object() {
                chunk_meta = json!({});
            }
            chunk_meta["chunk_start"] = json!(chunk.start);
            chunk_meta["chunk_end"] = json!(chunk.end);

            let statement = "INSERT INTO knowledge_base
                 (id, file_path, content, embedding, metadata, source_file,
                  chunk_index, chunk_count, user_id, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";
            sqlx::query(statement)
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(file_path)
                .bind(&chunk.content)
                .bind(vec_to_blob(vector))
                .bind(chunk_meta.to_string())
                .bind(file_path)
                .bind(chunk.index as i64)
                .bind(chunk_count)
                .bind(user_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify_sqlx(statement, e))?;
        }

        tx.commit().await.map_err(|e| classify_sqlx("COMMIT", e))?;

        if let Some(root) = self.kb_root() {
            let target = root.join(&relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // Skip the write when the file already holds this content, so
            // kb_sync does not loop through its own writes.
            let on_disk = std::fs::read_to_string(&target).ok();
            if on_disk.as_deref() != Some(content) {
                std::fs::write(&target, content)?;
            }
        }

        Ok(chunk_count)
    }

    /// Reassemble a document from its chunks in `chunk_index` order.
    /// `None` when no chunks exist for `file_path`.
    pub async fn kb_get(&self, file_path: &str) -> Result<Option<String>> {
        let statement = "SELECT content, metadata, chunk_index FROM knowledge_base
             WHERE source_file = ? ORDER BY chunk_index";
        let rows = sqlx::query(statement)
            .bind(file_path)
            .fetch_all(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut out = String::new();
        let mut covered: usize = 0;
        for row in rows {
            let content: String = row.get("content");
            let metadata: String = row.get("metadata");
            let meta: Value = serde_json::from_str(&metadata).unwrap_or(Value::Null);
            let start = meta.get("chunk_start").and_then(Value::as_u64);
            match start {
                Some(start) if (start as usize) <= covered => {
                    let skip = covered - start as usize;
                    if skip < content.len() {
                        out.push_str(&content[skip..]);
                    }
                    covered = (start as usize) + content.len();
                }
                _ => {
                    // No offsets (foreign writer): plain concatenation.
                    out.push_str(&content);
                    covered = out.len();
                }
            }
        }
        Ok(Some(out))
    }

    /// Vector search over all KB chunks, grouped by document: each hit is
    /// the best-scoring chunk of its `source_file`.
    pub async fn kb_search(
        &self,
        query: &str,
        k: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredRecord<KbSearchHit>>> {
        let k = clamp_k(k);
        let query_vec = self.embedder().embed_query(query, cancel).await?;

        let statement = "SELECT id, source_file, content, chunk_index, embedding
             FROM knowledge_base";
        let rows = sqlx::query(statement)
            .fetch_all(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut best: std::collections::HashMap<String, ScoredRecord<KbSearchHit>> =
            std::collections::HashMap::new();
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = f64::from(cosine_similarity(&query_vec, &blob_to_vec(&blob)));
            let score = (similarity + 1.0) / 2.0;
            let source_file: String = row.get("source_file");
            let id: String = row.get("id");
            let hit = ScoredRecord {
                id: canonical_id("knowledge_base", &id),
                score,
                record: KbSearchHit {
                    file_path: source_file.clone(),
                    snippet: row.get("content"),
                    chunk_index: row.get("chunk_index"),
                },
            };
            match best.get(&source_file) {
                Some(existing) if existing.score >= score => {}
                _ => {
                    best.insert(source_file, hit);
                }
            }
        }

        let mut results: Vec<ScoredRecord<KbSearchHit>> = best.into_values().collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.file_path.cmp(&b.record.file_path))
        });
        results.truncate(k);
        Ok(results)
    }

    /// Remove every chunk of a document and its mirrored file. Returns
    /// whether anything was deleted.
    pub async fn kb_delete(&self, file_path: &str) -> Result<bool> {
        let relative = validate_kb_path(file_path)?;
        let affected = self
            .datastore()
            .execute(
                "DELETE FROM knowledge_base WHERE source_file = ?",
                &[Value::from(file_path)],
            )
            .await?;

        if let Some(root) = self.kb_root() {
            let target = root.join(&relative);
            if target.exists() {
                if let Err(e) = std::fs::remove_file(&target) {
                    warn!(path = %target.display(), error = %e, "failed to remove mirrored KB file");
                }
            }
        }

        Ok(affected > 0)
    }

    /// All stored documents with their chunk counts.
    pub async fn kb_list(&self) -> Result<Vec<KbDocument>> {
        let statement = "SELECT source_file, MAX(chunk_count) AS chunk_count,
                    MAX(user_id) AS user_id
             FROM knowledge_base GROUP BY source_file ORDER BY source_file";
        let rows = sqlx::query(statement)
            .fetch_all(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(rows
            .iter()
            .map(|row| KbDocument {
                file_path: row.get("source_file"),
                chunk_count: row.get("chunk_count"),
                user_id: row.get("user_id"),
            })
            .collect())
    }

    /// Walk the KB directory and (re)index every Markdown file whose
    /// content differs from the stored version.
    pub async fn kb_sync(&self, cancel: &CancellationToken) -> Result<KbSyncReport> {
        let Some(root) = self.kb_root().cloned() else {
            return Err(Error::Config("kb.root is not configured".into()));
        };
        if !root.exists() {
            return Err(Error::Config(format!(
                "kb.root does not exist: {}",
                root.display()
            )));
        }

        let mut report = KbSyncReport::default();
        for entry in walkdir::WalkDir::new(&root) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let entry = entry.map_err(|e| Error::Io {
                source: std::io::Error::other(e),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let relative = path
                .strip_prefix(&root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();

            let content = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable KB file, skipping");
                    report.failed += 1;
                    continue;
                }
            };

            let stored = self.kb_get(&relative).await?;
            if stored.as_deref().map(content_hash) == Some(content_hash(&content)) {
                report.unchanged += 1;
                continue;
            }

            match self
                .kb_add(&relative, &content, &json!({}), None, cancel)
                .await
            {
                Ok(_) => report.indexed += 1,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(path = %relative, error = %e, "KB sync failed for file");
                    report.failed += 1;
                }
            }
        }

        info!(
            indexed = report.indexed,
            unchanged = report.unchanged,
            failed = report.failed,
            "knowledge-base sync finished"
        );
        Ok(report)
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// KB paths are relative, forward-slashed, and must not escape the root.
fn validate_kb_path(file_path: &str) -> Result<PathBuf> {
    if file_path.is_empty() {
        return Err(Error::Validation("file_path must not be empty".into()));
    }
    let path = Path::new(file_path);
    if path.is_absolute() {
        return Err(Error::Validation("file_path must be relative".into()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(Error::Validation(format!(
                    "file_path must not contain '..' or roots: {}",
                    file_path
                )))
            }
        }
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{memory_store, memory_store_with_chunking};
    use super::*;

    #[tokio::test]
    async fn add_get_roundtrips() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        let text = "A short knowledge-base document about deployments.";
        store
            .kb_add("ops/deploy.md", text, &json!({"team": "infra"}), None, &cancel)
            .await
            .unwrap();
        assert_eq!(store.kb_get("ops/deploy.md").await.unwrap().unwrap(), text);
    }

    #[tokio::test]
    async fn long_document_chunks_and_reassembles() {
        let store = memory_store_with_chunking(800, 100).await;
        let cancel = CancellationToken::new();
        let sentence = "This sentence pads the document out to a useful size. ";
        let longtext: String = sentence.repeat(50).trim_end().to_string();
        assert!(longtext.len() > 2400);

        let chunk_count = store
            .kb_add("g.md", &longtext, &json!({}), None, &cancel)
            .await
            .unwrap();
        assert!(chunk_count >= 3, "expected >= 3 chunks, got {chunk_count}");

        let restored = store.kb_get("g.md").await.unwrap().unwrap();
        assert_eq!(restored, longtext);
    }

    #[tokio::test]
    async fn chunk_indices_are_contiguous() {
        let store = memory_store_with_chunking(100, 20).await;
        let cancel = CancellationToken::new();
        let text = "word ".repeat(200);
        store
            .kb_add("big.md", &text, &json!({}), None, &cancel)
            .await
            .unwrap();

        let rows = store
            .datastore()
            .query(
                None,
                "SELECT chunk_index, chunk_count FROM knowledge_base
                 WHERE source_file = 'big.md' ORDER BY chunk_index",
                &[],
            )
            .await
            .unwrap();
        let count = rows.rows.len() as i64;
        for (i, row) in rows.rows.iter().enumerate() {
            assert_eq!(row["chunk_index"], serde_json::json!(i as i64));
            assert_eq!(row["chunk_count"], serde_json::json!(count));
        }
    }

    #[tokio::test]
    async fn delete_removes_all_chunks() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        store
            .kb_add("tmp.md", "delete me soon", &json!({}), None, &cancel)
            .await
            .unwrap();
        assert!(store.kb_delete("tmp.md").await.unwrap());
        assert!(store.kb_get("tmp.md").await.unwrap().is_none());
        assert!(!store.kb_delete("tmp.md").await.unwrap());
    }

    #[tokio::test]
    async fn readd_replaces_previous_chunks() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        store
            .kb_add("doc.md", "first version", &json!({}), None, &cancel)
            .await
            .unwrap();
        store
            .kb_add("doc.md", "second version entirely", &json!({}), None, &cancel)
            .await
            .unwrap();
        assert_eq!(
            store.kb_get("doc.md").await.unwrap().unwrap(),
            "second version entirely"
        );
        let docs = store.kb_list().await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn search_groups_by_document() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        store
            .kb_add("rust.md", "Rust ownership and borrowing rules.", &json!({}), None, &cancel)
            .await
            .unwrap();
        store
            .kb_add("python.md", "Python list comprehensions and generators.", &json!({}), None, &cancel)
            .await
            .unwrap();

        let hits = store
            .kb_search("rust ownership borrowing", Some(5), &cancel)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].record.file_path, "rust.md");
        // One hit per document at most.
        let mut files: Vec<&str> = hits.iter().map(|h| h.record.file_path.as_str()).collect();
        files.dedup();
        assert_eq!(files.len(), hits.len());
    }

    #[tokio::test]
    async fn path_traversal_rejected() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        for bad in ["../escape.md", "/abs/path.md", "a/../../b.md"] {
            assert!(
                store
                    .kb_add(bad, "content", &json!({}), None, &cancel)
                    .await
                    .is_err(),
                "accepted {bad}"
            );
        }
    }
}
