//! Database schema migrations.
//!
//! The schema is declared as data: ordered [`Migration`]s, each an ordered
//! list of [`SchemaElement`]s (tables, indexes, FTS tables). Applying is
//! idempotent twice over: elements already present in `sqlite_master` are
//! skipped before execution, and an "already exists" failure from a racing
//! run is logged and ignored. Any other failure aborts with the offending
//! element named.
//!
//! Versions are monotone; applied versions are recorded in
//! `schema_migrations`, but re-running a version is harmless because of the
//! existence checks.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::db::Datastore;
use crate::error::{Error, Result};

/// Kind of a schema element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Table,
    Index,
    /// FTS5 virtual table. `CREATE VIRTUAL TABLE` has no `IF NOT EXISTS`
    /// shorthand in older SQLite builds, so the existence check carries it.
    Fts,
}

/// One declarative schema element, rendered to SQL at execution time.
#[derive(Debug, Clone)]
pub struct SchemaElement {
    pub kind: ElementKind,
    /// Object name checked against `sqlite_master`.
    pub name: &'static str,
    /// Owning table for indexes; `None` for tables.
    pub table: Option<&'static str>,
    pub statement: &'static str,
}

/// A version-tagged, ordered group of schema elements.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub elements: Vec<SchemaElement>,
}

fn table(name: &'static str, statement: &'static str) -> SchemaElement {
    SchemaElement {
        kind: ElementKind::Table,
        name,
        table: None,
        statement,
    }
}

fn index(name: &'static str, owner: &'static str, statement: &'static str) -> SchemaElement {
    SchemaElement {
        kind: ElementKind::Index,
        name,
        table: Some(owner),
        statement,
    }
}

fn fts(name: &'static str, owner: &'static str, statement: &'static str) -> SchemaElement {
    SchemaElement {
        kind: ElementKind::Fts,
        name,
        table: Some(owner),
        statement,
    }
}

/// The full migration registry, ordered by version.
pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "facts, vector memories, knowledge base",
            elements: vec![
                table(
                    "kv_memories",
                    "CREATE TABLE kv_memories (
                        user_id TEXT NOT NULL,
                        key TEXT NOT NULL,
                        value TEXT NOT NULL,
                        created_at INTEGER NOT NULL,
                        updated_at INTEGER NOT NULL,
                        PRIMARY KEY (user_id, key)
                    )",
                ),
                table(
                    "vector_memories",
                    "CREATE TABLE vector_memories (
                        id TEXT PRIMARY KEY,
                        user_id TEXT NOT NULL,
                        content TEXT NOT NULL,
                        embedding BLOB NOT NULL,
                        metadata TEXT NOT NULL DEFAULT '{}',
                        created_at INTEGER NOT NULL
                    )",
                ),
                index(
                    "idx_vector_memories_user",
                    "vector_memories",
                    "CREATE INDEX idx_vector_memories_user ON vector_memories(user_id)",
                ),
                table(
                    "knowledge_base",
                    "CREATE TABLE knowledge_base (
                        id TEXT PRIMARY KEY,
                        file_path TEXT NOT NULL,
                        content TEXT NOT NULL,
                        embedding BLOB NOT NULL,
                        metadata TEXT NOT NULL DEFAULT '{}',
                        source_file TEXT NOT NULL,
                        chunk_index INTEGER NOT NULL,
                        chunk_count INTEGER NOT NULL,
                        user_id TEXT,
                        created_at INTEGER NOT NULL,
                        UNIQUE (source_file, chunk_index)
                    )",
                ),
                index(
                    "idx_knowledge_base_source",
                    "knowledge_base",
                    "CREATE INDEX idx_knowledge_base_source ON knowledge_base(source_file)",
                ),
            ],
        },
        Migration {
            version: 2,
            description: "entity graph",
            elements: vec![
                table(
                    "entities",
                    "CREATE TABLE entities (
                        id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        type TEXT NOT NULL,
                        properties TEXT NOT NULL DEFAULT '{}',
                        user_id TEXT,
                        created_at INTEGER NOT NULL
                    )",
                ),
                index(
                    "idx_entities_name",
                    "entities",
                    "CREATE INDEX idx_entities_name ON entities(name)",
                ),
                index(
                    "idx_entities_type",
                    "entities",
                    "CREATE INDEX idx_entities_type ON entities(type)",
                ),
                table(
                    "relations",
                    "CREATE TABLE relations (
                        id TEXT PRIMARY KEY,
                        kind TEXT NOT NULL,
                        from_id TEXT NOT NULL,
                        to_id TEXT NOT NULL,
                        properties TEXT NOT NULL DEFAULT '{}',
                        user_id TEXT,
                        created_at INTEGER NOT NULL
                    )",
                ),
                index(
                    "idx_relations_from",
                    "relations",
                    "CREATE INDEX idx_relations_from ON relations(from_id)",
                ),
                index(
                    "idx_relations_to",
                    "relations",
                    "CREATE INDEX idx_relations_to ON relations(to_id)",
                ),
                index(
                    "idx_relations_kind",
                    "relations",
                    "CREATE INDEX idx_relations_kind ON relations(kind)",
                ),
            ],
        },
        Migration {
            version: 3,
            description: "events with text search",
            elements: vec![
                table(
                    "events",
                    "CREATE TABLE events (
                        id TEXT PRIMARY KEY,
                        user_id TEXT NOT NULL,
                        subject TEXT NOT NULL,
                        content TEXT NOT NULL,
                        embedding BLOB NOT NULL,
                        metadata TEXT,
                        created_at INTEGER NOT NULL
                    )",
                ),
                index(
                    "idx_events_user",
                    "events",
                    "CREATE INDEX idx_events_user ON events(user_id)",
                ),
                index(
                    "idx_events_subject",
                    "events",
                    "CREATE INDEX idx_events_subject ON events(subject)",
                ),
                index(
                    "idx_events_user_subject",
                    "events",
                    "CREATE INDEX idx_events_user_subject ON events(user_id, subject)",
                ),
                index(
                    "idx_events_created_at",
                    "events",
                    "CREATE INDEX idx_events_created_at ON events(created_at DESC)",
                ),
                // Porter stemming over unicode61 tokens: lowercase, splits on
                // whitespace and character-class changes, English stemmer.
                fts(
                    "events_fts",
                    "events",
                    "CREATE VIRTUAL TABLE events_fts USING fts5(
                        event_id UNINDEXED,
                        user_id UNINDEXED,
                        subject UNINDEXED,
                        content,
                        tokenize = 'porter unicode61'
                    )",
                ),
            ],
        },
        Migration {
            version: 4,
            description: "code index",
            elements: vec![
                table(
                    "code_projects",
                    "CREATE TABLE code_projects (
                        project_id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        root_path TEXT NOT NULL,
                        language_stats TEXT,
                        last_indexed_at INTEGER,
                        indexing_status TEXT NOT NULL DEFAULT 'pending',
                        watcher_enabled INTEGER NOT NULL DEFAULT 0,
                        created_at INTEGER NOT NULL,
                        updated_at INTEGER NOT NULL
                    )",
                ),
                table(
                    "code_files",
                    "CREATE TABLE code_files (
                        project_id TEXT NOT NULL,
                        file_path TEXT NOT NULL,
                        language TEXT NOT NULL,
                        file_hash TEXT NOT NULL,
                        symbols_count INTEGER NOT NULL DEFAULT 0,
                        indexed_at INTEGER NOT NULL,
                        PRIMARY KEY (project_id, file_path)
                    )",
                ),
                table(
                    "code_symbols",
                    "CREATE TABLE code_symbols (
                        id TEXT PRIMARY KEY,
                        project_id TEXT NOT NULL,
                        file_path TEXT NOT NULL,
                        language TEXT NOT NULL,
                        symbol_type TEXT NOT NULL,
                        name TEXT NOT NULL,
                        name_path TEXT NOT NULL,
                        start_line INTEGER NOT NULL,
                        end_line INTEGER NOT NULL,
                        start_byte INTEGER NOT NULL,
                        end_byte INTEGER NOT NULL,
                        source_code TEXT NOT NULL,
                        signature TEXT,
                        doc_string TEXT,
                        embedding BLOB,
                        parent_id TEXT,
                        metadata TEXT NOT NULL DEFAULT '{}',
                        UNIQUE (project_id, name_path)
                    )",
                ),
                index(
                    "idx_code_symbols_project",
                    "code_symbols",
                    "CREATE INDEX idx_code_symbols_project ON code_symbols(project_id)",
                ),
                index(
                    "idx_code_symbols_file",
                    "code_symbols",
                    "CREATE INDEX idx_code_symbols_file ON code_symbols(project_id, file_path)",
                ),
                index(
                    "idx_code_symbols_type",
                    "code_symbols",
                    "CREATE INDEX idx_code_symbols_type ON code_symbols(symbol_type)",
                ),
                index(
                    "idx_code_symbols_language",
                    "code_symbols",
                    "CREATE INDEX idx_code_symbols_language ON code_symbols(language)",
                ),
                index(
                    "idx_code_symbols_name",
                    "code_symbols",
                    "CREATE INDEX idx_code_symbols_name ON code_symbols(name)",
                ),
                index(
                    "idx_code_symbols_parent",
                    "code_symbols",
                    "CREATE INDEX idx_code_symbols_parent ON code_symbols(parent_id)",
                ),
                table(
                    "code_chunks",
                    "CREATE TABLE code_chunks (
                        id TEXT PRIMARY KEY,
                        symbol_id TEXT NOT NULL,
                        project_id TEXT NOT NULL,
                        file_path TEXT NOT NULL,
                        chunk_index INTEGER NOT NULL,
                        chunk_count INTEGER NOT NULL,
                        content TEXT NOT NULL,
                        start_offset INTEGER NOT NULL,
                        end_offset INTEGER NOT NULL,
                        embedding BLOB,
                        symbol_name TEXT NOT NULL,
                        symbol_type TEXT NOT NULL,
                        language TEXT NOT NULL,
                        UNIQUE (symbol_id, chunk_index)
                    )",
                ),
                index(
                    "idx_code_chunks_project",
                    "code_chunks",
                    "CREATE INDEX idx_code_chunks_project ON code_chunks(project_id)",
                ),
                table(
                    "code_indexing_jobs",
                    "CREATE TABLE code_indexing_jobs (
                        id TEXT PRIMARY KEY,
                        project_id TEXT NOT NULL,
                        project_path TEXT NOT NULL,
                        status TEXT NOT NULL DEFAULT 'pending',
                        progress REAL NOT NULL DEFAULT 0,
                        files_total INTEGER NOT NULL DEFAULT 0,
                        files_indexed INTEGER NOT NULL DEFAULT 0,
                        started_at INTEGER NOT NULL,
                        completed_at INTEGER,
                        error TEXT
                    )",
                ),
                index(
                    "idx_code_jobs_project",
                    "code_indexing_jobs",
                    "CREATE INDEX idx_code_jobs_project ON code_indexing_jobs(project_id)",
                ),
            ],
        },
    ]
}

/// Apply every migration in order, skipping elements that already exist.
pub async fn run_migrations(ds: &Datastore) -> Result<()> {
    ds.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
        &[],
    )
    .await?;

    let existing = existing_objects(ds).await?;

    for migration in migrations() {
        let mut applied = 0usize;
        for element in &migration.elements {
            if existing.contains(&element.name.to_string()) {
                debug!(name = element.name, "schema element exists, skipping");
                continue;
            }
            match ds.execute(element.statement, &[]).await {
                Ok(_) => applied += 1,
                Err(e) if e.is_already_exists() => {
                    warn!(name = element.name, "element appeared concurrently, continuing");
                }
                Err(e) => {
                    return Err(Error::Datastore {
                        statement: element.statement.to_string(),
                        message: format!(
                            "migration v{} ({}) failed on {}: {}",
                            migration.version, migration.description, element.name, e
                        ),
                    });
                }
            }
        }

        let now = chrono::Utc::now().timestamp();
        ds.execute(
            "INSERT INTO schema_migrations (version, description, applied_at)
             VALUES (?, ?, ?)
             ON CONFLICT(version) DO NOTHING",
            &[
                Value::from(migration.version),
                Value::from(migration.description),
                Value::from(now),
            ],
        )
        .await?;

        if applied > 0 {
            info!(
                version = migration.version,
                elements = applied,
                "applied migration: {}",
                migration.description
            );
        }
    }

    Ok(())
}

/// Names of all tables and indexes currently in the database.
async fn existing_objects(ds: &Datastore) -> Result<std::collections::HashSet<String>> {
    let result = ds
        .query(
            None,
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'index')",
            &[],
        )
        .await?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.get("name").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> Datastore {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        Datastore::new(pool)
    }

    #[test]
    fn versions_are_monotone() {
        let m = migrations();
        for pair in m.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn element_names_match_statements() {
        for migration in migrations() {
            for element in migration.elements {
                assert!(
                    element.statement.contains(element.name),
                    "statement for {} does not mention it",
                    element.name
                );
                if element.kind == ElementKind::Index {
                    assert!(element.table.is_some());
                }
            }
        }
    }

    #[tokio::test]
    async fn migrations_apply_and_are_idempotent() {
        let ds = memory_store().await;
        run_migrations(&ds).await.unwrap();
        // Second run must be a no-op, not an error.
        run_migrations(&ds).await.unwrap();

        let objects = existing_objects(&ds).await.unwrap();
        for name in [
            "kv_memories",
            "vector_memories",
            "knowledge_base",
            "entities",
            "relations",
            "events",
            "events_fts",
            "code_projects",
            "code_files",
            "code_symbols",
            "code_chunks",
            "code_indexing_jobs",
        ] {
            assert!(objects.contains(name), "missing {}", name);
        }

        let versions = ds
            .query(None, "SELECT version FROM schema_migrations ORDER BY version", &[])
            .await
            .unwrap();
        assert_eq!(versions.rows.len(), migrations().len());
    }

    #[tokio::test]
    async fn later_version_does_not_touch_earlier_tables() {
        let ds = memory_store().await;
        run_migrations(&ds).await.unwrap();
        ds.execute(
            "INSERT INTO kv_memories (user_id, key, value, created_at, updated_at)
             VALUES ('u', 'k', '\"v\"', 0, 0)",
            &[],
        )
        .await
        .unwrap();
        run_migrations(&ds).await.unwrap();
        let rows = ds
            .query(None, "SELECT key FROM kv_memories", &[])
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 1);
    }
}
