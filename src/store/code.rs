//! Code-index records: projects, files, symbols, chunks, and jobs.
//!
//! The indexer writes exclusively through these operations. Re-indexing a
//! file replaces its symbols and chunks in one transaction (orphans from
//! the previous parse are deleted in the same step), and `file_needs_reindex`
//! is the hash gate that lets unchanged files skip.

use serde_json::Value;
use sqlx::Row;
use tokio_util::sync::CancellationToken;

use super::vectors::clamp_k;
use super::{now_epoch, MemoryStore};
use crate::db::canonical_id;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{classify_sqlx, Error, Result};
use crate::models::{
    CodeChunk, CodeFile, CodeProject, CodeSymbol, IndexingJob, IndexingStatus, JobStatus,
    ScoredRecord, SymbolType,
};

impl MemoryStore {
    // ============ Projects ============

    /// Create a project or refresh its name/root. Watcher state and
    /// statistics survive the upsert.
    pub async fn project_upsert(
        &self,
        project_id: &str,
        name: &str,
        root_path: &str,
    ) -> Result<()> {
        let now = now_epoch();
        let statement = "INSERT INTO code_projects
             (project_id, name, root_path, indexing_status, watcher_enabled, created_at, updated_at)
             VALUES (?, ?, ?, 'pending', 0, ?, ?)
             ON CONFLICT(project_id) DO UPDATE SET
                 name = excluded.name,
                 root_path = excluded.root_path,
                 indexing_status = 'pending',
                 updated_at = excluded.updated_at";
        sqlx::query(statement)
            .bind(project_id)
            .bind(name)
            .bind(root_path)
            .bind(now)
            .bind(now)
            .execute(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(())
    }

    pub async fn project_get(&self, project_id: &str) -> Result<Option<CodeProject>> {
        let statement = "SELECT * FROM code_projects WHERE project_id = ?";
        let row = sqlx::query(statement)
            .bind(project_id)
            .fetch_optional(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(row.as_ref().map(row_to_project))
    }

    pub async fn project_list(&self) -> Result<Vec<CodeProject>> {
        let statement = "SELECT * FROM code_projects ORDER BY name";
        let rows = sqlx::query(statement)
            .fetch_all(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(rows.iter().map(row_to_project).collect())
    }

    /// Update indexing status; `completed` also stamps `last_indexed_at`.
    pub async fn project_set_status(
        &self,
        project_id: &str,
        status: IndexingStatus,
    ) -> Result<()> {
        let now = now_epoch();
        let statement = if status == IndexingStatus::Completed {
            "UPDATE code_projects SET indexing_status = ?, last_indexed_at = ?, updated_at = ?
             WHERE project_id = ?"
        } else {
            "UPDATE code_projects SET indexing_status = ?, updated_at = ?
             WHERE project_id = ?"
        };
        let mut q = sqlx::query(statement).bind(status.as_str());
        if status == IndexingStatus::Completed {
            q = q.bind(now);
        }
        q.bind(now)
            .bind(project_id)
            .execute(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(())
    }

    pub async fn project_set_watcher(&self, project_id: &str, enabled: bool) -> Result<bool> {
        let statement =
            "UPDATE code_projects SET watcher_enabled = ?, updated_at = ? WHERE project_id = ?";
        let affected = sqlx::query(statement)
            .bind(enabled)
            .bind(now_epoch())
            .bind(project_id)
            .execute(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?
            .rows_affected();
        Ok(affected > 0)
    }

    pub async fn project_set_language_stats(
        &self,
        project_id: &str,
        stats: &Value,
    ) -> Result<()> {
        let statement =
            "UPDATE code_projects SET language_stats = ?, updated_at = ? WHERE project_id = ?";
        sqlx::query(statement)
            .bind(stats.to_string())
            .bind(now_epoch())
            .bind(project_id)
            .execute(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(())
    }

    /// Projects whose watcher should be re-activated on service start.
    pub async fn watched_projects(&self) -> Result<Vec<CodeProject>> {
        let statement = "SELECT * FROM code_projects WHERE watcher_enabled = 1";
        let rows = sqlx::query(statement)
            .fetch_all(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(rows.iter().map(row_to_project).collect())
    }

    // ============ Files ============

    /// True when the stored hash for `(project_id, file_path)` differs from
    /// `file_hash` (or the file is new) and the file must be re-parsed.
    pub async fn file_needs_reindex(
        &self,
        project_id: &str,
        file_path: &str,
        file_hash: &str,
    ) -> Result<bool> {
        let statement =
            "SELECT file_hash FROM code_files WHERE project_id = ? AND file_path = ?";
        let stored: Option<String> = sqlx::query_scalar(statement)
            .bind(project_id)
            .bind(file_path)
            .fetch_optional(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(stored.as_deref() != Some(file_hash))
    }

    /// Record a file's hash and symbol count after a successful parse.
    pub async fn file_upsert(
        &self,
        project_id: &str,
        file_path: &str,
        language: &str,
        file_hash: &str,
        symbols_count: i64,
    ) -> Result<()> {
        let statement = "INSERT INTO code_files
             (project_id, file_path, language, file_hash, symbols_count, indexed_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(project_id, file_path) DO UPDATE SET
                 language = excluded.language,
                 file_hash = excluded.file_hash,
                 symbols_count = excluded.symbols_count,
                 indexed_at = excluded.indexed_at";
        sqlx::query(statement)
            .bind(project_id)
            .bind(file_path)
            .bind(language)
            .bind(file_hash)
            .bind(symbols_count)
            .bind(now_epoch())
            .execute(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(())
    }

    /// Drop a file and everything extracted from it.
    pub async fn file_delete(&self, project_id: &str, file_path: &str) -> Result<bool> {
        let mut tx = self
            .datastore()
            .pool()
            .begin()
            .await
            .map_err(|e| classify_sqlx("BEGIN", e))?;
        sqlx::query(
            "DELETE FROM code_chunks WHERE project_id = ? AND file_path = ?",
        )
        .bind(project_id)
        .bind(file_path)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_sqlx("DELETE FROM code_chunks", e))?;
        sqlx::query(
            "DELETE FROM code_symbols WHERE project_id = ? AND file_path = ?",
        )
        .bind(project_id)
        .bind(file_path)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_sqlx("DELETE FROM code_symbols", e))?;
        let affected = sqlx::query(
            "DELETE FROM code_files WHERE project_id = ? AND file_path = ?",
        )
        .bind(project_id)
        .bind(file_path)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_sqlx("DELETE FROM code_files", e))?
        .rows_affected();
        tx.commit().await.map_err(|e| classify_sqlx("COMMIT", e))?;
        Ok(affected > 0)
    }

    pub async fn file_list(&self, project_id: &str) -> Result<Vec<CodeFile>> {
        let statement = "SELECT * FROM code_files WHERE project_id = ? ORDER BY file_path";
        let rows = sqlx::query(statement)
            .bind(project_id)
            .fetch_all(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(rows
            .iter()
            .map(|row| CodeFile {
                project_id: row.get("project_id"),
                file_path: row.get("file_path"),
                language: row.get("language"),
                file_hash: row.get("file_hash"),
                symbols_count: row.get("symbols_count"),
                indexed_at: chrono::DateTime::from_timestamp(row.get("indexed_at"), 0)
                    .unwrap_or_default(),
            })
            .collect())
    }

    // ============ Symbols and chunks ============

    /// Replace a file's extracted symbols and chunks in one transaction.
    /// Symbols upsert by `(project_id, name_path)`; symbols from the
    /// previous parse that are absent now are deleted together with their
    /// chunks.
    pub async fn replace_file_symbols(
        &self,
        project_id: &str,
        file_path: &str,
        symbols: &[CodeSymbol],
        chunks: &[CodeChunk],
    ) -> Result<()> {
        let mut tx = self
            .datastore()
            .pool()
            .begin()
            .await
            .map_err(|e| classify_sqlx("BEGIN", e))?;

        // Orphans: previously extracted from this file, gone from this parse.
        let kept: Vec<&str> = symbols.iter().map(|s| s.name_path.as_str()).collect();
        let existing: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, name_path FROM code_symbols WHERE project_id = ? AND file_path = ?",
        )
        .bind(project_id)
        .bind(file_path)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| classify_sqlx("SELECT code_symbols", e))?;

        for (id, name_path) in &existing {
            if !kept.contains(&name_path.as_str()) {
                sqlx::query("DELETE FROM code_chunks WHERE symbol_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| classify_sqlx("DELETE FROM code_chunks", e))?;
                sqlx::query("DELETE FROM code_symbols WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| classify_sqlx("DELETE FROM code_symbols", e))?;
            }
        }

        for symbol in symbols {
            let statement = "INSERT INTO code_symbols
                 (id, project_id, file_path, language, symbol_type, name, name_path,
                  start_line, end_line, start_byte, end_byte, source_code, signature,
                  doc_string, embedding, parent_id, metadata)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(project_id, name_path) DO UPDATE SET
                     file_path = excluded.file_path,
                     language = excluded.language,
                     symbol_type = excluded.symbol_type,
                     name = excluded.name,
                     start_line = excluded.start_line,
                     end_line = excluded.end_line,
                     start_byte = excluded.start_byte,
                     end_byte = excluded.end_byte,
                     source_code = excluded.source_code,
                     signature = excluded.signature,
                     doc_string = excluded.doc_string,
                     embedding = excluded.embedding,
                     parent_id = excluded.parent_id,
                     metadata = excluded.metadata";
            sqlx::query(statement)
                .bind(&symbol.id)
                .bind(project_id)
                .bind(file_path)
                .bind(&symbol.language)
                .bind(symbol.symbol_type.as_str())
                .bind(&symbol.name)
                .bind(&symbol.name_path)
                .bind(symbol.start_line)
                .bind(symbol.end_line)
                .bind(symbol.start_byte)
                .bind(symbol.end_byte)
                .bind(&symbol.source_code)
                .bind(&symbol.signature)
                .bind(&symbol.doc_string)
                .bind(symbol.embedding.as_deref().map(vec_to_blob))
                .bind(&symbol.parent_id)
                .bind(symbol.metadata.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| classify_sqlx(statement, e))?;
        }

        // A surviving name_path keeps its original row id, so chunk
        // references must resolve through name_path, not the fresh UUID.
        for chunk in chunks {
            let parent_path = symbols
                .iter()
                .find(|s| s.id == chunk.symbol_id)
                .map(|s| s.name_path.as_str());
            let symbol_id: String = match parent_path {
                Some(name_path) => sqlx::query_scalar(
                    "SELECT id FROM code_symbols WHERE project_id = ? AND name_path = ?",
                )
                .bind(project_id)
                .bind(name_path)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| classify_sqlx("SELECT code_symbols.id", e))?,
                None => chunk.symbol_id.clone(),
            };

            sqlx::query("DELETE FROM code_chunks WHERE symbol_id = ? AND chunk_index = ?")
                .bind(&symbol_id)
                .bind(chunk.chunk_index)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify_sqlx("DELETE FROM code_chunks", e))?;

            let statement = "INSERT INTO code_chunks
                 (id, symbol_id, project_id, file_path, chunk_index, chunk_count,
                  content, start_offset, end_offset, embedding, symbol_name,
                  symbol_type, language)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";
            sqlx::query(statement)
                .bind(&chunk.id)
                .bind(&symbol_id)
                .bind(project_id)
                .bind(file_path)
                .bind(chunk.chunk_index)
                .bind(chunk.chunk_count)
                .bind(&chunk.content)
                .bind(chunk.start_offset)
                .bind(chunk.end_offset)
                .bind(chunk.embedding.as_deref().map(vec_to_blob))
                .bind(&chunk.symbol_name)
                .bind(chunk.symbol_type.as_str())
                .bind(&chunk.language)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify_sqlx(statement, e))?;
        }

        tx.commit().await.map_err(|e| classify_sqlx("COMMIT", e))?;
        Ok(())
    }

    /// Vector search over a project's symbols. Chunk vectors refine the
    /// score: a symbol's score is the best of its own vector and any of its
    /// chunk vectors.
    pub async fn symbol_search(
        &self,
        project_id: &str,
        query: &str,
        k: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredRecord<CodeSymbol>>> {
        let k = clamp_k(k);
        let query_vec = self.code_embedder().embed_query(query, cancel).await?;

        let statement = "SELECT id, embedding FROM code_symbols
             WHERE project_id = ? AND embedding IS NOT NULL";
        let rows = sqlx::query(statement)
            .bind(project_id)
            .fetch_all(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;

        let mut best: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
        for row in &rows {
            let id: String = row.get("id");
            let blob: Vec<u8> = row.get("embedding");
            let similarity = f64::from(cosine_similarity(&query_vec, &blob_to_vec(&blob)));
            best.insert(id, (similarity + 1.0) / 2.0);
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let chunk_stmt = "SELECT symbol_id, embedding FROM code_chunks
             WHERE project_id = ? AND embedding IS NOT NULL";
        let chunk_rows = sqlx::query(chunk_stmt)
            .bind(project_id)
            .fetch_all(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(chunk_stmt, e))?;
        for row in &chunk_rows {
            let symbol_id: String = row.get("symbol_id");
            let blob: Vec<u8> = row.get("embedding");
            let similarity = f64::from(cosine_similarity(&query_vec, &blob_to_vec(&blob)));
            let score = (similarity + 1.0) / 2.0;
            let entry = best.entry(symbol_id).or_insert(score);
            if score > *entry {
                *entry = score;
            }
        }

        let mut ranked: Vec<(String, f64)> = best.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k);

        let mut out = Vec::with_capacity(ranked.len());
        for (symbol_id, score) in ranked {
            if let Some(symbol) = self.symbol_get(&symbol_id).await? {
                out.push(ScoredRecord {
                    id: canonical_id("code_symbols", &symbol_id),
                    score,
                    record: symbol,
                });
            }
        }
        Ok(out)
    }

    pub async fn symbol_get(&self, id: &str) -> Result<Option<CodeSymbol>> {
        let bare = crate::db::bare_id("code_symbols", id);
        let statement = "SELECT * FROM code_symbols WHERE id = ?";
        let row = sqlx::query(statement)
            .bind(bare)
            .fetch_optional(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(row.as_ref().map(row_to_symbol))
    }

    pub async fn symbols_for_file(
        &self,
        project_id: &str,
        file_path: &str,
    ) -> Result<Vec<CodeSymbol>> {
        let statement = "SELECT * FROM code_symbols
             WHERE project_id = ? AND file_path = ? ORDER BY start_byte";
        let rows = sqlx::query(statement)
            .bind(project_id)
            .bind(file_path)
            .fetch_all(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(rows.iter().map(row_to_symbol).collect())
    }

    // ============ Jobs ============

    /// Create a pending job for a project.
    pub async fn job_create(&self, project_id: &str, project_path: &str) -> Result<IndexingJob> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_epoch();
        let statement = "INSERT INTO code_indexing_jobs
             (id, project_id, project_path, status, progress, files_total, files_indexed, started_at)
             VALUES (?, ?, ?, 'pending', 0, 0, 0, ?)";
        sqlx::query(statement)
            .bind(&id)
            .bind(project_id)
            .bind(project_path)
            .bind(now)
            .execute(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(IndexingJob {
            id: canonical_id("code_indexing_jobs", &id),
            project_id: project_id.to_string(),
            project_path: project_path.to_string(),
            status: JobStatus::Pending,
            progress: 0.0,
            files_total: 0,
            files_indexed: 0,
            started_at: chrono::DateTime::from_timestamp(now, 0).unwrap_or_default(),
            completed_at: None,
            error: None,
        })
    }

    pub async fn job_get(&self, id: &str) -> Result<Option<IndexingJob>> {
        let bare = crate::db::bare_id("code_indexing_jobs", id);
        let statement = "SELECT * FROM code_indexing_jobs WHERE id = ?";
        let row = sqlx::query(statement)
            .bind(bare)
            .fetch_optional(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(row.as_ref().map(row_to_job))
    }

    /// The project's non-terminal job, if one exists. At most one exists at
    /// a time; the indexer enforces this before creating a new job.
    pub async fn active_job_for_project(&self, project_id: &str) -> Result<Option<IndexingJob>> {
        let statement = "SELECT * FROM code_indexing_jobs
             WHERE project_id = ? AND status IN ('pending', 'running')
             ORDER BY started_at DESC LIMIT 1";
        let row = sqlx::query(statement)
            .bind(project_id)
            .fetch_optional(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(row.as_ref().map(row_to_job))
    }

    pub async fn job_set_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let bare = crate::db::bare_id("code_indexing_jobs", id);
        let statement = "UPDATE code_indexing_jobs SET status = ? WHERE id = ?";
        sqlx::query(statement)
            .bind(status.as_str())
            .bind(bare)
            .execute(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(())
    }

    /// Update counters; progress is `files_indexed / files_total` (1 when
    /// the project has no files at all).
    pub async fn job_update_progress(
        &self,
        id: &str,
        files_total: i64,
        files_indexed: i64,
    ) -> Result<()> {
        let bare = crate::db::bare_id("code_indexing_jobs", id);
        let progress = if files_total <= 0 {
            1.0
        } else {
            files_indexed as f64 / files_total as f64
        };
        let statement = "UPDATE code_indexing_jobs
             SET files_total = ?, files_indexed = ?, progress = ? WHERE id = ?";
        sqlx::query(statement)
            .bind(files_total)
            .bind(files_indexed)
            .bind(progress.clamp(0.0, 1.0))
            .bind(bare)
            .execute(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(())
    }

    /// Move a job into a terminal state and stamp `completed_at`.
    pub async fn job_finish(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let bare = crate::db::bare_id("code_indexing_jobs", id);
        // A terminal message joins the per-file errors instead of
        // replacing them.
        let statement = "UPDATE code_indexing_jobs
             SET status = ?1, completed_at = ?2,
                 error = CASE
                     WHEN ?3 IS NULL THEN error
                     WHEN error IS NULL THEN ?3
                     ELSE error || char(10) || ?3
                 END
             WHERE id = ?4";
        sqlx::query(statement)
            .bind(status.as_str())
            .bind(now_epoch())
            .bind(error)
            .bind(bare)
            .execute(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(())
    }

    /// Append a non-fatal per-file error to the job record.
    pub async fn job_append_error(&self, id: &str, message: &str) -> Result<()> {
        let bare = crate::db::bare_id("code_indexing_jobs", id);
        let statement = "UPDATE code_indexing_jobs
             SET error = CASE WHEN error IS NULL THEN ? ELSE error || char(10) || ? END
             WHERE id = ?";
        sqlx::query(statement)
            .bind(message)
            .bind(message)
            .bind(bare)
            .execute(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(())
    }
}

fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> CodeProject {
    let language_stats: Option<String> = row.get("language_stats");
    let last_indexed_at: Option<i64> = row.get("last_indexed_at");
    let status: String = row.get("indexing_status");
    CodeProject {
        project_id: row.get("project_id"),
        name: row.get("name"),
        root_path: row.get("root_path"),
        language_stats: language_stats.and_then(|s| serde_json::from_str(&s).ok()),
        last_indexed_at: last_indexed_at
            .and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
        indexing_status: IndexingStatus::parse(&status).unwrap_or(IndexingStatus::Pending),
        watcher_enabled: row.get::<i64, _>("watcher_enabled") != 0,
        created_at: chrono::DateTime::from_timestamp(row.get("created_at"), 0)
            .unwrap_or_default(),
        updated_at: chrono::DateTime::from_timestamp(row.get("updated_at"), 0)
            .unwrap_or_default(),
    }
}

fn row_to_symbol(row: &sqlx::sqlite::SqliteRow) -> CodeSymbol {
    let symbol_type: String = row.get("symbol_type");
    let metadata: String = row.get("metadata");
    let embedding: Option<Vec<u8>> = row.get("embedding");
    CodeSymbol {
        id: row.get("id"),
        project_id: row.get("project_id"),
        file_path: row.get("file_path"),
        language: row.get("language"),
        symbol_type: SymbolType::parse(&symbol_type).unwrap_or(SymbolType::Function),
        name: row.get("name"),
        name_path: row.get("name_path"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        start_byte: row.get("start_byte"),
        end_byte: row.get("end_byte"),
        source_code: row.get("source_code"),
        signature: row.get("signature"),
        doc_string: row.get("doc_string"),
        embedding: embedding.map(|b| blob_to_vec(&b)),
        parent_id: row.get("parent_id"),
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> IndexingJob {
    let status: String = row.get("status");
    let completed_at: Option<i64> = row.get("completed_at");
    let id: String = row.get("id");
    IndexingJob {
        id: canonical_id("code_indexing_jobs", &id),
        project_id: row.get("project_id"),
        project_path: row.get("project_path"),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Pending),
        progress: row.get("progress"),
        files_total: row.get("files_total"),
        files_indexed: row.get("files_indexed"),
        started_at: chrono::DateTime::from_timestamp(row.get("started_at"), 0)
            .unwrap_or_default(),
        completed_at: completed_at.and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
        error: row.get("error"),
    }
}
