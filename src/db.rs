//! Datastore driver adapter.
//!
//! A thin façade over the SQLite pool that every higher layer goes through.
//! It owns three responsibilities:
//!
//! - executing parameterized statements and returning rows as a typed
//!   generic envelope ([`QueryResult`]),
//! - normalizing results in two passes — raw column decode first, then id
//!   canonicalization (`"<table>:<id>"`), epoch-to-ISO-8601 datetime
//!   rewriting, and JSON-text column expansion,
//! - translating driver errors: unique-key violations become
//!   [`Error::Conflict`], DDL "already exists" failures keep their message
//!   so the migration runner can recognize the idempotency signal.
//!
//! Lookups that match nothing return `None`/empty, never an error. No
//! retries happen at this layer.

use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};
use std::str::FromStr;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{classify_sqlx, Error, Result};

/// Columns holding epoch-second timestamps, rewritten to ISO-8601 strings.
const DATETIME_COLUMNS: &[&str] = &[
    "created_at",
    "updated_at",
    "indexed_at",
    "last_indexed_at",
    "started_at",
    "completed_at",
];

/// Columns holding JSON text, expanded into nested values.
const JSON_COLUMNS: &[&str] = &["value", "metadata", "properties", "language_stats"];

/// Generic result envelope for a parameterized query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Decoded rows, one JSON object per row.
    pub rows: Vec<Value>,
}

/// Open the pooled SQLite connection described by the configuration.
/// WAL mode keeps readers unblocked while the indexer writes.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(|e| Error::Config(format!("invalid database path: {}", e)))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| Error::datastore("connect", e))?;

    Ok(pool)
}

/// The adapter every storage operation goes through.
#[derive(Clone)]
pub struct Datastore {
    pool: SqlitePool,
}

impl Datastore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Execute a parameterized statement and return decoded, normalized rows.
    ///
    /// `table` names the table whose `id` column should be canonicalized;
    /// pass `None` for statements without a record identity (aggregates,
    /// PRAGMA, DDL).
    pub async fn query(
        &self,
        table: Option<&str>,
        statement: &str,
        params: &[Value],
    ) -> Result<QueryResult> {
        let mut q = sqlx::query(statement);
        for p in params {
            q = bind_value(q, p);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx(statement, e))?;

        // Pass 1: raw column decode into JSON objects.
        let mut decoded: Vec<Value> = rows.iter().map(decode_row).collect();
        // Pass 2: canonical ids, ISO datetimes, nested JSON columns.
        for row in &mut decoded {
            normalize_row(table, row);
        }
        Ok(QueryResult { rows: decoded })
    }

    /// Execute a statement for its side effect; returns affected row count.
    pub async fn execute(&self, statement: &str, params: &[Value]) -> Result<u64> {
        let mut q = sqlx::query(statement);
        for p in params {
            q = bind_value(q, p);
        }
        let result = q
            .execute(&self.pool)
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(result.rows_affected())
    }

    /// Insert a record with a fresh UUID id and return the canonical id.
    /// Object- and array-valued fields are stored as JSON text.
    pub async fn create(&self, table: &str, fields: &Map<String, Value>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let mut columns = vec!["id".to_string()];
        let mut params: Vec<Value> = vec![Value::String(id.clone())];
        for (k, v) in fields {
            columns.push(k.clone());
            params.push(v.clone());
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let statement = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );
        self.execute(&statement, &params).await?;
        Ok(canonical_id(table, &id))
    }

    /// Fetch one record by id (bare or canonical form). `None` when absent.
    pub async fn select_by_id(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let bare = bare_id(table, id);
        let statement = format!("SELECT * FROM {} WHERE id = ?", table);
        let result = self
            .query(Some(table), &statement, &[Value::String(bare.to_string())])
            .await?;
        Ok(result.rows.into_iter().next())
    }

    /// Update named fields of a record; rewrites `updated_at` when the table
    /// carries one. Returns whether a row changed.
    pub async fn update_by_id(
        &self,
        table: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<bool> {
        if fields.is_empty() {
            return Ok(false);
        }
        let bare = bare_id(table, id);
        let mut sets = Vec::with_capacity(fields.len());
        let mut params: Vec<Value> = Vec::with_capacity(fields.len() + 1);
        for (k, v) in fields {
            sets.push(format!("{} = ?", k));
            params.push(v.clone());
        }
        params.push(Value::String(bare.to_string()));
        let statement = format!("UPDATE {} SET {} WHERE id = ?", table, sets.join(", "));
        Ok(self.execute(&statement, &params).await? > 0)
    }

    /// Delete a record by id. Returns whether a row was removed.
    pub async fn delete_by_id(&self, table: &str, id: &str) -> Result<bool> {
        let bare = bare_id(table, id);
        let statement = format!("DELETE FROM {} WHERE id = ?", table);
        Ok(self
            .execute(&statement, &[Value::String(bare.to_string())])
            .await?
            > 0)
    }
}

/// Bind one JSON value as a SQL parameter. Objects and arrays are stored as
/// JSON text so schemaless payloads survive round trips.
fn bind_value<'q>(
    q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Null => q.bind(None::<String>),
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else {
                q.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => q.bind(s.clone()),
        other => q.bind(other.to_string()),
    }
}

/// Decode one row into a JSON object using column type info. BLOB columns
/// decode to their byte length under `"<name>_len"`; the bytes themselves
/// stay out of the envelope (embeddings are fetched through typed paths).
fn decode_row(row: &SqliteRow) -> Value {
    let mut object = Map::new();
    for column in row.columns() {
        let name = column.name();
        let type_name = column.type_info().name().to_ascii_uppercase();
        let value = match type_name.as_str() {
            "INTEGER" => row
                .try_get::<Option<i64>, _>(name)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "REAL" => row
                .try_get::<Option<f64>, _>(name)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "BLOB" => {
                let len = row
                    .try_get::<Option<Vec<u8>>, _>(name)
                    .ok()
                    .flatten()
                    .map(|b| b.len());
                match len {
                    Some(len) => {
                        object.insert(format!("{}_len", name), Value::from(len));
                        continue;
                    }
                    None => Value::Null,
                }
            }
            _ => row
                .try_get::<Option<String>, _>(name)
                .ok()
                .flatten()
                .map(Value::String)
                .unwrap_or(Value::Null),
        };
        object.insert(name.to_string(), value);
    }
    Value::Object(object)
}

/// Second normalization pass over a decoded row.
fn normalize_row(table: Option<&str>, row: &mut Value) {
    let Some(object) = row.as_object_mut() else {
        return;
    };

    if let (Some(table), Some(Value::String(id))) = (table, object.get("id")) {
        let canonical = canonical_id(table, id);
        object.insert("id".to_string(), Value::String(canonical));
    }

    for column in DATETIME_COLUMNS {
        if let Some(Value::Number(n)) = object.get(*column) {
            if let Some(epoch) = n.as_i64() {
                object.insert((*column).to_string(), Value::String(epoch_to_iso(epoch)));
            }
        }
    }

    for column in JSON_COLUMNS {
        if let Some(Value::String(text)) = object.get(*column) {
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                object.insert((*column).to_string(), parsed);
            }
        }
    }
}

/// Render an epoch-seconds timestamp as ISO-8601.
pub fn epoch_to_iso(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

/// Canonical external id form: `"<table>:<id>"`.
pub fn canonical_id(table: &str, id: &str) -> String {
    match id.split_once(':') {
        Some((t, _)) if t == table => id.to_string(),
        _ => format!("{}:{}", table, id),
    }
}

/// Strip the table prefix from a canonical id; bare ids pass through.
pub fn bare_id<'a>(table: &str, id: &'a str) -> &'a str {
    match id.split_once(':') {
        Some((t, rest)) if t == table => rest,
        _ => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_id_is_idempotent() {
        assert_eq!(canonical_id("events", "abc"), "events:abc");
        assert_eq!(canonical_id("events", "events:abc"), "events:abc");
    }

    #[test]
    fn bare_id_strips_only_matching_table() {
        assert_eq!(bare_id("events", "events:abc"), "abc");
        assert_eq!(bare_id("events", "abc"), "abc");
        // A foreign prefix is part of the id, not a table tag.
        assert_eq!(bare_id("events", "entities:abc"), "entities:abc");
    }

    #[test]
    fn epoch_renders_iso() {
        assert_eq!(epoch_to_iso(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn normalize_rewrites_id_datetime_and_json() {
        let mut row = serde_json::json!({
            "id": "1234",
            "created_at": 0,
            "metadata": "{\"lang\":\"go\"}",
            "content": "hello"
        });
        normalize_row(Some("events"), &mut row);
        assert_eq!(row["id"], "events:1234");
        assert_eq!(row["created_at"], "1970-01-01T00:00:00Z");
        assert_eq!(row["metadata"]["lang"], "go");
        assert_eq!(row["content"], "hello");
    }

    #[tokio::test]
    async fn conflict_translates_to_typed_error() {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let ds = Datastore::new(pool);
        ds.execute(
            "CREATE TABLE t (a TEXT, b TEXT, UNIQUE(a, b))",
            &[],
        )
        .await
        .unwrap();
        ds.execute(
            "INSERT INTO t (a, b) VALUES (?, ?)",
            &[Value::from("x"), Value::from("y")],
        )
        .await
        .unwrap();
        let err = ds
            .execute(
                "INSERT INTO t (a, b) VALUES (?, ?)",
                &[Value::from("x"), Value::from("y")],
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "got: {err}");
    }

    #[tokio::test]
    async fn create_select_update_delete_roundtrip() {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let ds = Datastore::new(pool);
        ds.execute(
            "CREATE TABLE notes (id TEXT PRIMARY KEY, body TEXT, created_at INTEGER)",
            &[],
        )
        .await
        .unwrap();

        let mut fields = Map::new();
        fields.insert("body".into(), Value::from("hello"));
        fields.insert("created_at".into(), Value::from(0));
        let id = ds.create("notes", &fields).await.unwrap();
        assert!(id.starts_with("notes:"));

        let row = ds.select_by_id("notes", &id).await.unwrap().unwrap();
        assert_eq!(row["body"], "hello");
        assert_eq!(row["created_at"], "1970-01-01T00:00:00Z");

        let mut update = Map::new();
        update.insert("body".into(), Value::from("bye"));
        assert!(ds.update_by_id("notes", &id, &update).await.unwrap());
        assert!(ds.delete_by_id("notes", &id).await.unwrap());
        assert!(ds.select_by_id("notes", &id).await.unwrap().is_none());
    }
}
