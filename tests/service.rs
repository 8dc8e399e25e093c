//! End-to-end scenarios through the tool surface.
//!
//! Everything runs against a temporary SQLite file and the deterministic
//! hashed embedding provider, so no network or model download is needed.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use engram::config::CodeConfig;
use engram::db::Datastore;
use engram::embedding::{Embedder, HashedProvider};
use engram::indexer::CodeIndexer;
use engram::migrate;
use engram::store::MemoryStore;
use engram::tools::{ModuleManager, SharedDeps};

struct Harness {
    manager: ModuleManager,
    _data_dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    harness_with_kb_root(None).await
}

async fn harness_with_kb_root(kb_root: Option<std::path::PathBuf>) -> Harness {
    let data_dir = tempfile::tempdir().unwrap();
    let db_path = data_dir.path().join("engram.sqlite");
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("sqlite:{}?mode=rwc", db_path.display()))
        .await
        .unwrap();
    let ds = Datastore::new(pool);
    migrate::run_migrations(&ds).await.unwrap();

    let provider = Arc::new(HashedProvider::new(128));
    let embedder = Embedder::new(provider.clone(), 800, 100);
    let code_embedder = Embedder::new(provider, 800, 100);
    let store = MemoryStore::new(ds, embedder, code_embedder, kb_root);
    let indexer = CodeIndexer::new(
        store.clone(),
        &CodeConfig {
            workers: Some(1),
            ..Default::default()
        },
    );
    let manager = ModuleManager::provision(SharedDeps { store, indexer }, &[]).unwrap();
    Harness {
        manager,
        _data_dir: data_dir,
    }
}

async fn call(manager: &ModuleManager, name: &str, args: Value) -> Value {
    let response = manager.call(name, args, CancellationToken::new()).await;
    assert!(
        !response.is_error,
        "{} failed: {}",
        name, response.content[0].text
    );
    serde_json::from_str(&response.content[0].text).unwrap()
}

async fn wait_for_job(manager: &ModuleManager, job_id: &str) -> Value {
    for _ in 0..400 {
        let status = call(manager, "code_indexing_status", json!({ "job_id": job_id })).await;
        let state = status["job"]["status"].as_str().unwrap_or("").to_string();
        if ["completed", "failed", "cancelled"].contains(&state.as_str()) {
            return status["job"].clone();
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} never finished");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fact_round_trip() {
    let h = harness().await;
    call(
        &h.manager,
        "memory_save_fact",
        json!({"user_id": "alice", "key": "tz", "value": "Europe/Madrid"}),
    )
    .await;
    let got = call(
        &h.manager,
        "memory_get_fact",
        json!({"user_id": "alice", "key": "tz"}),
    )
    .await;
    assert_eq!(got["value"], "Europe/Madrid");
    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vector_memories_rank_preferences_first() {
    let h = harness().await;
    for content in [
        "I like dark mode",
        "Meeting with John Friday",
        "Favorite language is Python",
    ] {
        call(
            &h.manager,
            "memory_save_vector",
            json!({"user_id": "u1", "content": content}),
        )
        .await;
    }

    let results = call(
        &h.manager,
        "memory_search_vectors",
        json!({"user_id": "u1", "query": "I like dark mode and my favorite language", "k": 2}),
    )
    .await;
    assert_eq!(results["count"], 2);
    let returned: Vec<&str> = results["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["content"].as_str().unwrap())
        .collect();
    assert!(returned.contains(&"I like dark mode"), "{returned:?}");
    assert!(
        returned.contains(&"Favorite language is Python"),
        "{returned:?}"
    );
    for r in results["results"].as_array().unwrap() {
        assert!(r["score"].as_f64().unwrap() >= 0.0);
    }
    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn event_saved_then_found_by_hybrid_search() {
    let h = harness().await;
    call(
        &h.manager,
        "event_save",
        json!({
            "user_id": "p",
            "subject": "error:db",
            "content": "pool exhausted, raising from 10 to 25"
        }),
    )
    .await;

    let results = call(
        &h.manager,
        "event_search",
        json!({
            "user_id": "p",
            "subject": "error:db",
            "query": "connection pool",
            "last_days": 7
        }),
    )
    .await;
    assert_eq!(results["count"], 1);
    let hit = &results["results"][0];
    assert!(hit["content"].as_str().unwrap().contains("pool exhausted"));
    let score = hit["score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&score));
    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn long_kb_document_chunks_and_reconstructs() {
    let h = harness().await;
    let sentence = "The quick brown fox jumps over the extremely lazy dog once more. ";
    let longtext: String = sentence.repeat(40).trim_end().to_string();
    assert!(longtext.len() >= 2500);

    let added = call(
        &h.manager,
        "kb_add_document",
        json!({"file_path": "g.md", "content": longtext}),
    )
    .await;
    assert!(added["chunk_count"].as_i64().unwrap() >= 3);

    let got = call(&h.manager, "kb_get_document", json!({"file_path": "g.md"})).await;
    assert_eq!(got["content"].as_str().unwrap(), longtext);

    call(&h.manager, "kb_delete_document", json!({"file_path": "g.md"})).await;
    let gone = call(&h.manager, "kb_get_document", json!({"file_path": "g.md"})).await;
    assert_eq!(gone["found"], false);
    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn kb_mirrors_to_directory_and_syncs_back() {
    let kb_dir = tempfile::tempdir().unwrap();
    let h = harness_with_kb_root(Some(kb_dir.path().to_path_buf())).await;

    call(
        &h.manager,
        "kb_add_document",
        json!({"file_path": "notes/a.md", "content": "mirrored content"}),
    )
    .await;
    let on_disk = std::fs::read_to_string(kb_dir.path().join("notes/a.md")).unwrap();
    assert_eq!(on_disk, "mirrored content");

    // A file dropped into the directory gets picked up by sync.
    std::fs::write(kb_dir.path().join("external.md"), "written by hand").unwrap();
    let report = call(&h.manager, "kb_sync", json!({})).await;
    assert_eq!(report["indexed"], 1);
    assert_eq!(report["unchanged"], 1);

    let got = call(
        &h.manager,
        "kb_get_document",
        json!({"file_path": "external.md"}),
    )
    .await;
    assert_eq!(got["content"], "written by hand");
    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_file_project_indexes_and_reruns_cheaply() {
    let h = harness().await;
    let project = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("a.go"), "package m\n\nfunc A() {}\n").unwrap();
    std::fs::write(project.path().join("b.go"), "package m\n\nfunc B() {}\n").unwrap();
    std::fs::write(project.path().join("c.go"), "package m\n\nfunc C() {}\n").unwrap();

    let queued = call(
        &h.manager,
        "code_index_project",
        json!({"path": project.path().to_string_lossy()}),
    )
    .await;
    let job = wait_for_job(&h.manager, queued["job_id"].as_str().unwrap()).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["files_total"], 3);
    assert_eq!(job["files_indexed"], 3);
    assert!((job["progress"].as_f64().unwrap() - 1.0).abs() < 1e-9);

    // Second run: all hashes match, no file is re-parsed.
    let requeued = call(
        &h.manager,
        "code_index_project",
        json!({"path": project.path().to_string_lossy()}),
    )
    .await;
    let second = wait_for_job(&h.manager, requeued["job_id"].as_str().unwrap()).await;
    assert_eq!(second["status"], "completed");
    assert!(second["error"].is_null());

    let found = call(
        &h.manager,
        "code_search",
        json!({
            "project_id": queued["project_id"],
            "query": "func B"
        }),
    )
    .await;
    assert!(found["count"].as_i64().unwrap() >= 1);
    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn help_catalog_covers_all_groups() {
    let h = harness().await;
    let index = call(&h.manager, "how_to_use", json!({})).await;
    let ids: Vec<&str> = index["groups"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["id"].as_str().unwrap())
        .collect();
    for expected in ["memory", "kb", "graph", "events", "code", "help"] {
        assert!(ids.contains(&expected), "missing group {expected}");
    }
    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graph_traversal_crosses_relations() {
    let h = harness().await;
    let author = call(
        &h.manager,
        "graph_create_entity",
        json!({"name": "Ada", "type": "person"}),
    )
    .await;
    let paper = call(
        &h.manager,
        "graph_create_entity",
        json!({"name": "Sketch of the Analytical Engine", "type": "document"}),
    )
    .await;
    call(
        &h.manager,
        "graph_create_relation",
        json!({"kind": "wrote", "from": author["id"], "to": paper["id"]}),
    )
    .await;

    let walked = call(
        &h.manager,
        "graph_traverse",
        json!({"entity_id": author["id"], "kinds": ["wrote"], "depth": 2}),
    )
    .await;
    assert_eq!(walked["count"], 2);
    h.manager.shutdown().await;
}

