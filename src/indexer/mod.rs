//! Code indexing pipeline.
//!
//! [`CodeIndexer`] owns a fixed worker pool draining a bounded job queue,
//! a registry of per-project file watchers, and the cancellation tokens of
//! running jobs. One project has at most one non-terminal job: a second
//! `start_indexing` while one is active returns the existing job.
//!
//! A job walks the project (or just the watcher's dirty set), skips files
//! whose content hash is unchanged, parses the rest into symbols, embeds
//! them (chunking oversized symbols), and writes everything through the
//! storage engine. Per-file errors append to the job and indexing carries
//! on; the job fails only when every file failed.

pub mod extract;
pub mod languages;
pub mod walk;
pub mod watcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CodeConfig;
use crate::embedding::average_embeddings;
use crate::error::{Error, Result};
use crate::models::{
    CodeChunk, CodeSymbol, IndexingJob, IndexingStatus, JobStatus,
};
use crate::store::MemoryStore;
use walk::{
    build_exclude_set, classify_path, discover_files, hash_bytes, language_stats,
    project_id_for_path, DiscoveredFile,
};
use watcher::ProjectWatcher;

/// Files above this size are recorded as errors instead of parsed.
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// One unit of work for the pool.
struct QueuedJob {
    job_id: String,
    project_id: String,
    root: PathBuf,
    /// `Some` for a watcher-triggered partial re-index.
    dirty: Option<Vec<PathBuf>>,
}

/// The indexing subsystem handle. Cheap to clone.
#[derive(Clone)]
pub struct CodeIndexer {
    inner: Arc<Inner>,
}

struct Inner {
    store: MemoryStore,
    queue_tx: mpsc::Sender<QueuedJob>,
    exclude: globset::GlobSet,
    watchers: Mutex<HashMap<String, ProjectWatcher>>,
    running_jobs: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl CodeIndexer {
    /// Spawn the worker pool and return the handle.
    pub fn new(store: MemoryStore, config: &CodeConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let inner = Arc::new(Inner {
            store,
            queue_tx,
            exclude: build_exclude_set(&config.exclude_globs),
            watchers: Mutex::new(HashMap::new()),
            running_jobs: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        });

        let shared_rx = Arc::new(Mutex::new(queue_rx));
        let worker_count = config.worker_count().max(1);
        let mut handles = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let inner_ref = Arc::clone(&inner);
            let rx = Arc::clone(&shared_rx);
            handles.push(tokio::spawn(async move {
                worker_loop(worker, inner_ref, rx).await;
            }));
        }
        if let Ok(mut workers) = inner.workers.try_lock() {
            *workers = handles;
        }

        info!(workers = worker_count, "code indexer started");
        Self { inner }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.inner.store
    }

    /// Register (or refresh) a project and queue a full indexing run.
    /// Returns the project's active job when one already exists.
    pub async fn start_indexing(&self, path: &Path, name: Option<&str>) -> Result<IndexingJob> {
        let root = path
            .canonicalize()
            .map_err(|e| Error::Validation(format!("unreadable project path {}: {}", path.display(), e)))?;
        if !root.is_dir() {
            return Err(Error::Validation(format!(
                "project path is not a directory: {}",
                root.display()
            )));
        }
        let project_id = project_id_for_path(&root);

        if let Some(active) = self.inner.store.active_job_for_project(&project_id).await? {
            debug!(project = %project_id, job = %active.id, "indexing already in flight");
            return Ok(active);
        }

        let default_name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| project_id.clone());
        let name = name.filter(|n| !n.is_empty()).unwrap_or(&default_name);
        let root_str = root.to_string_lossy().to_string();

        self.inner
            .store
            .project_upsert(&project_id, name, &root_str)
            .await?;
        let job = self.inner.store.job_create(&project_id, &root_str).await?;

        self.enqueue(QueuedJob {
            job_id: job.id.clone(),
            project_id,
            root,
            dirty: None,
        })
        .await?;
        Ok(job)
    }

    /// Cooperatively cancel a running job. Returns whether a running job
    /// was signalled.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        let jobs = self.inner.running_jobs.lock().await;
        if let Some(token) = jobs.get(job_id) {
            token.cancel();
            return Ok(true);
        }
        Ok(false)
    }

    /// Enable the watcher flag and start watching a project's root.
    pub async fn activate_watcher(&self, project_id: &str) -> Result<bool> {
        let Some(project) = self.inner.store.project_get(project_id).await? else {
            return Ok(false);
        };
        self.inner.store.project_set_watcher(project_id, true).await?;

        let mut watchers = self.inner.watchers.lock().await;
        if watchers.contains_key(project_id) {
            return Ok(true);
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let watch_project = project_id.to_string();
        let root = PathBuf::from(&project.root_path);
        let dirty_root = root.clone();
        let handle = ProjectWatcher::spawn(watch_project.clone(), root, move |batch| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let project_id = watch_project.clone();
            let root = dirty_root.clone();
            tokio::spawn(async move {
                if let Err(e) = dirty_reindex(inner, project_id.clone(), root, batch).await {
                    warn!(project = %project_id, error = %e, "dirty re-index failed to queue");
                }
            });
        });
        watchers.insert(project_id.to_string(), handle);
        Ok(true)
    }

    /// Disable the watcher flag and stop the running watcher, if any.
    pub async fn deactivate_watcher(&self, project_id: &str) -> Result<bool> {
        self.inner.store.project_set_watcher(project_id, false).await?;
        let handle = self.inner.watchers.lock().await.remove(project_id);
        if let Some(handle) = handle {
            handle.stop().await;
            return Ok(true);
        }
        Ok(false)
    }

    /// Re-activate watchers for every project flagged `watcher_enabled`.
    /// Called once at service start.
    pub async fn activate_watched_projects(&self) -> Result<usize> {
        let projects = self.inner.store.watched_projects().await?;
        let mut activated = 0;
        for project in projects {
            if PathBuf::from(&project.root_path).is_dir() {
                self.activate_watcher(&project.project_id).await?;
                activated += 1;
            } else {
                warn!(
                    project = %project.project_id,
                    root = %project.root_path,
                    "watched project root missing, skipping"
                );
            }
        }
        Ok(activated)
    }

    /// Stop watchers and workers and cancel running jobs.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        for (_, token) in self.inner.running_jobs.lock().await.iter() {
            token.cancel();
        }
        let watchers: Vec<ProjectWatcher> = {
            let mut map = self.inner.watchers.lock().await;
            map.drain().map(|(_, w)| w).collect()
        };
        for watcher in watchers {
            watcher.stop().await;
        }
        let workers: Vec<_> = {
            let mut handles = self.inner.workers.lock().await;
            handles.drain(..).collect()
        };
        for handle in workers {
            let _ = handle.await;
        }
        info!("code indexer stopped");
    }

    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        let job_id = job.job_id.clone();
        if let Err(e) = self.inner.queue_tx.try_send(job) {
            let message = format!("indexing queue is full: {}", e);
            self.inner
                .store
                .job_finish(&job_id, JobStatus::Failed, Some(&message))
                .await?;
            return Err(Error::Validation(message));
        }
        Ok(())
    }
}

/// Queue a watcher-triggered partial re-index, unless the project already
/// has a job in flight (the hash gate makes the next run cheap anyway).
async fn dirty_reindex(
    inner: Arc<Inner>,
    project_id: String,
    root: PathBuf,
    batch: Vec<PathBuf>,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    if inner
        .store
        .active_job_for_project(&project_id)
        .await?
        .is_some()
    {
        debug!(project = %project_id, "skipping dirty batch, job already active");
        return Ok(());
    }
    let root_str = root.to_string_lossy().to_string();
    let job = inner.store.job_create(&project_id, &root_str).await?;
    let queued = QueuedJob {
        job_id: job.id.clone(),
        project_id,
        root,
        dirty: Some(batch),
    };
    if let Err(e) = inner.queue_tx.try_send(queued) {
        let message = format!("indexing queue is full: {}", e);
        inner
            .store
            .job_finish(&job.id, JobStatus::Failed, Some(&message))
            .await?;
    }
    Ok(())
}

async fn worker_loop(
    worker: usize,
    inner: Arc<Inner>,
    rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else { return };

        let cancel = inner.shutdown.child_token();
        inner
            .running_jobs
            .lock()
            .await
            .insert(job.job_id.clone(), cancel.clone());

        debug!(worker, job = %job.job_id, project = %job.project_id, "job dequeued");
        if let Err(e) = run_job(&inner, &job, &cancel).await {
            warn!(job = %job.job_id, error = %e, "indexing job aborted");
            let status = if matches!(e, Error::Cancelled) {
                JobStatus::Cancelled
            } else {
                JobStatus::Failed
            };
            let _ = inner
                .store
                .job_finish(&job.job_id, status, Some(&e.to_string()))
                .await;
            let _ = inner
                .store
                .project_set_status(&job.project_id, IndexingStatus::Failed)
                .await;
        }

        inner.running_jobs.lock().await.remove(&job.job_id);
    }
}

async fn run_job(inner: &Arc<Inner>, job: &QueuedJob, cancel: &CancellationToken) -> Result<()> {
    let store = &inner.store;
    store.job_set_status(&job.job_id, JobStatus::Running).await?;
    store
        .project_set_status(&job.project_id, IndexingStatus::Running)
        .await?;

    // Discover the work list: the full tree, or just the dirty set.
    let files: Vec<DiscoveredFile> = match &job.dirty {
        None => {
            let root = job.root.clone();
            let exclude = inner.exclude.clone();
            tokio::task::spawn_blocking(move || discover_files(&root, &exclude))
                .await
                .map_err(|e| Error::Validation(format!("walk task aborted: {}", e)))??
        }
        Some(batch) => {
            let mut files = Vec::new();
            for path in batch {
                if let Some(file) = classify_path(&job.root, path, &inner.exclude) {
                    if file.absolute.is_file() {
                        files.push(file);
                    } else {
                        // Deleted: drop its records now.
                        store.file_delete(&job.project_id, &file.relative).await?;
                    }
                }
            }
            files.sort_by(|a, b| a.relative.cmp(&b.relative));
            files
        }
    };

    let files_total = files.len() as i64;
    store
        .job_update_progress(&job.job_id, files_total, 0)
        .await?;

    let mut files_done: i64 = 0;
    let mut files_failed: i64 = 0;
    let mut parsed = 0usize;
    let mut skipped = 0usize;

    for file in &files {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match index_one_file(inner, &job.project_id, file, cancel).await {
            Ok(true) => parsed += 1,
            Ok(false) => skipped += 1,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                files_failed += 1;
                warn!(file = %file.relative, error = %e, "file indexing failed");
                store
                    .job_append_error(&job.job_id, &format!("{}: {}", file.relative, e))
                    .await?;
            }
        }

        files_done += 1;
        store
            .job_update_progress(&job.job_id, files_total, files_done)
            .await?;
    }

    // Full runs refresh project-level statistics.
    if job.dirty.is_none() {
        store
            .project_set_language_stats(&job.project_id, &language_stats(&files))
            .await?;
    }

    if files_total > 0 && files_failed == files_total {
        store
            .job_finish(&job.job_id, JobStatus::Failed, Some("every file failed"))
            .await?;
        store
            .project_set_status(&job.project_id, IndexingStatus::Failed)
            .await?;
    } else {
        store.job_finish(&job.job_id, JobStatus::Completed, None).await?;
        store
            .project_set_status(&job.project_id, IndexingStatus::Completed)
            .await?;
    }

    info!(
        job = %job.job_id,
        project = %job.project_id,
        total = files_total,
        parsed,
        skipped,
        failed = files_failed,
        "indexing job finished"
    );
    Ok(())
}

/// Index one file. `Ok(true)` when it was parsed, `Ok(false)` when the
/// hash gate skipped it.
async fn index_one_file(
    inner: &Arc<Inner>,
    project_id: &str,
    file: &DiscoveredFile,
    cancel: &CancellationToken,
) -> Result<bool> {
    let store = &inner.store;

    let metadata = std::fs::metadata(&file.absolute)?;
    if metadata.len() > MAX_FILE_BYTES {
        return Err(Error::Validation(format!(
            "file exceeds {} bytes",
            MAX_FILE_BYTES
        )));
    }

    let bytes = std::fs::read(&file.absolute)?;
    let file_hash = hash_bytes(&bytes);
    if !store
        .file_needs_reindex(project_id, &file.relative, &file_hash)
        .await?
    {
        return Ok(false);
    }

    let source = String::from_utf8_lossy(&bytes).to_string();
    let extract_project = project_id.to_string();
    let extract_path = file.relative.clone();
    let extract_language = file.language;
    let mut symbols = tokio::task::spawn_blocking(move || {
        extract::extract_symbols(&extract_project, &extract_path, extract_language, &source)
    })
    .await
    .map_err(|e| Error::Validation(format!("parse task aborted: {}", e)))??;

    let mut chunks: Vec<CodeChunk> = Vec::new();
    embed_symbols(store, &mut symbols, &mut chunks, cancel).await?;

    store
        .replace_file_symbols(project_id, &file.relative, &symbols, &chunks)
        .await?;
    store
        .file_upsert(
            project_id,
            &file.relative,
            file.language,
            &file_hash,
            symbols.len() as i64,
        )
        .await?;
    Ok(true)
}

/// Embed every symbol; oversized sources also persist per-chunk vectors
/// for fine-grained recall. Embedding failures leave the symbol without a
/// vector rather than failing the file.
async fn embed_symbols(
    store: &MemoryStore,
    symbols: &mut [CodeSymbol],
    chunks: &mut Vec<CodeChunk>,
    cancel: &CancellationToken,
) -> Result<()> {
    for symbol in symbols.iter_mut() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let embedded = match store
            .code_embedder()
            .embed_text_chunks(&symbol.source_code, cancel)
            .await
        {
            Ok(embedded) => embedded,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(symbol = %symbol.name_path, error = %e, "symbol embedding failed");
                continue;
            }
        };

        let vectors: Vec<Vec<f32>> = embedded.iter().map(|(_, v)| v.clone()).collect();
        symbol.embedding = average_embeddings(&vectors);

        if embedded.len() > 1 {
            let chunk_count = embedded.len() as i64;
            for (text_chunk, vector) in embedded {
                chunks.push(CodeChunk {
                    id: uuid::Uuid::new_v4().to_string(),
                    symbol_id: symbol.id.clone(),
                    project_id: symbol.project_id.clone(),
                    file_path: symbol.file_path.clone(),
                    chunk_index: text_chunk.index as i64,
                    chunk_count,
                    content: text_chunk.content,
                    start_offset: symbol.start_byte + text_chunk.start as i64,
                    end_offset: symbol.start_byte + text_chunk.end as i64,
                    embedding: Some(vector),
                    symbol_name: symbol.name.clone(),
                    symbol_type: symbol.symbol_type,
                    language: symbol.language.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodeConfig;
    use crate::models::JobStatus;
    use crate::store::testutil::memory_store;
    use std::time::Duration;

    async fn wait_for_terminal(indexer: &CodeIndexer, job_id: &str) -> IndexingJob {
        for _ in 0..200 {
            let job = indexer.store().job_get(job_id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {} never reached a terminal state", job_id);
    }

    fn go_project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.go"),
            "package demo\n\nfunc Alpha() {}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.go"),
            "package demo\n\ntype Beta struct{}\n\nfunc (b *Beta) Run() {}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("c.go"),
            "package demo\n\nfunc Gamma() int { return 3 }\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn indexes_a_three_file_project() {
        let store = memory_store().await;
        let config = CodeConfig {
            workers: Some(1),
            ..Default::default()
        };
        let indexer = CodeIndexer::new(store, &config);
        let dir = go_project();

        let job = indexer
            .start_indexing(dir.path(), Some("demo"))
            .await
            .unwrap();
        let done = wait_for_terminal(&indexer, &job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.files_total, 3);
        assert_eq!(done.files_indexed, 3);
        assert!((done.progress - 1.0).abs() < 1e-9);

        let project = indexer
            .store()
            .project_get(&done.project_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(project.indexing_status, crate::models::IndexingStatus::Completed);
        assert!(project.last_indexed_at.is_some());
        assert_eq!(project.language_stats.unwrap()["go"], 3);

        let symbols = indexer
            .store()
            .symbols_for_file(&done.project_id, "b.go")
            .await
            .unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Beta"));
        assert!(names.contains(&"Run"));

        indexer.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rerun_skips_unchanged_files() {
        let store = memory_store().await;
        let config = CodeConfig {
            workers: Some(1),
            ..Default::default()
        };
        let indexer = CodeIndexer::new(store, &config);
        let dir = go_project();

        let first = indexer.start_indexing(dir.path(), None).await.unwrap();
        wait_for_terminal(&indexer, &first.id).await;
        let project_id = first.project_id.clone();
        let files_before = indexer.store().file_list(&project_id).await.unwrap();

        let second = indexer.start_indexing(dir.path(), None).await.unwrap();
        assert_ne!(second.id, first.id);
        let done = wait_for_terminal(&indexer, &second.id).await;
        assert_eq!(done.status, JobStatus::Completed);

        // No file was touched: the hash gate skipped everything.
        let files_after = indexer.store().file_list(&project_id).await.unwrap();
        for (before, after) in files_before.iter().zip(files_after.iter()) {
            assert_eq!(before.file_hash, after.file_hash);
            assert_eq!(before.indexed_at, after.indexed_at);
        }

        indexer.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_start_returns_active_job() {
        let store = memory_store().await;
        // No workers draining: the queued job stays pending.
        let config = CodeConfig {
            workers: Some(1),
            queue_capacity: 4,
            ..Default::default()
        };
        let indexer = CodeIndexer::new(store, &config);
        // Stall the single worker with a shutdown-free trick: enqueue a big
        // project, then immediately race a second start for the same path.
        let dir = go_project();
        let first = indexer.start_indexing(dir.path(), None).await.unwrap();
        let second = indexer.start_indexing(dir.path(), None).await;
        if let Ok(second) = second {
            // Either the first finished already (new id) or it was still
            // active (same id). Both ids must belong to the same project.
            assert_eq!(second.project_id, first.project_id);
        }
        wait_for_terminal(&indexer, &first.id).await;
        indexer.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn per_file_errors_do_not_fail_the_job() {
        let store = memory_store().await;
        let config = CodeConfig {
            workers: Some(1),
            ..Default::default()
        };
        let indexer = CodeIndexer::new(store, &config);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.go"), "package x\nfunc Fine() {}\n").unwrap();
        // Oversized file trips the size guard.
        let big = "// filler\n".repeat((MAX_FILE_BYTES as usize / 10) + 1);
        std::fs::write(dir.path().join("huge.go"), big).unwrap();

        let job = indexer.start_indexing(dir.path(), None).await.unwrap();
        let done = wait_for_terminal(&indexer, &job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        let error = done.error.unwrap();
        assert!(error.contains("huge.go"), "{error}");

        indexer.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn watcher_reindexes_changed_file() {
        let store = memory_store().await;
        let config = CodeConfig {
            workers: Some(1),
            ..Default::default()
        };
        let indexer = CodeIndexer::new(store, &config);
        let dir = go_project();

        let job = indexer.start_indexing(dir.path(), None).await.unwrap();
        let done = wait_for_terminal(&indexer, &job.id).await;
        let project_id = done.project_id.clone();

        indexer.activate_watcher(&project_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        std::fs::write(
            dir.path().join("a.go"),
            "package demo\n\nfunc Alpha() {}\n\nfunc Delta() {}\n",
        )
        .unwrap();

        // Debounce window + indexing time.
        let mut found = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let symbols = indexer
                .store()
                .symbols_for_file(&project_id, "a.go")
                .await
                .unwrap();
            if symbols.iter().any(|s| s.name == "Delta") {
                found = true;
                break;
            }
        }
        assert!(found, "watcher never picked up the new symbol");

        indexer.shutdown().await;
    }
}
