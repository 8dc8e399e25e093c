//! Scoped key–value facts.
//!
//! Facts live in `kv_memories` with the unique key `(user_id, key)`.
//! `save_fact` has upsert semantics: concurrent writers serialize at the
//! unique index and the last write wins.

use serde_json::Value;

use super::{now_epoch, MemoryStore};
use crate::error::{Error, Result};
use crate::models::Fact;

impl MemoryStore {
    /// Insert or replace the fact stored under `(user_id, key)`.
    pub async fn save_fact(&self, user_id: &str, key: &str, value: &Value) -> Result<()> {
        validate_scope(user_id, key)?;
        let now = now_epoch();
        self.datastore()
            .execute(
                "INSERT INTO kv_memories (user_id, key, value, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(user_id, key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                &[
                    Value::from(user_id),
                    Value::from(key),
                    Value::String(value.to_string()),
                    Value::from(now),
                    Value::from(now),
                ],
            )
            .await?;
        Ok(())
    }

    /// The stored value, or `None` when the fact does not exist.
    pub async fn get_fact(&self, user_id: &str, key: &str) -> Result<Option<Value>> {
        validate_scope(user_id, key)?;
        let result = self
            .datastore()
            .query(
                None,
                "SELECT value FROM kv_memories WHERE user_id = ? AND key = ?",
                &[Value::from(user_id), Value::from(key)],
            )
            .await?;
        Ok(result
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.get("value").cloned()))
    }

    /// Remove a fact. Returns whether it existed.
    pub async fn delete_fact(&self, user_id: &str, key: &str) -> Result<bool> {
        validate_scope(user_id, key)?;
        let affected = self
            .datastore()
            .execute(
                "DELETE FROM kv_memories WHERE user_id = ? AND key = ?",
                &[Value::from(user_id), Value::from(key)],
            )
            .await?;
        Ok(affected > 0)
    }

    /// All facts belonging to a user, ordered by key.
    pub async fn list_facts(&self, user_id: &str) -> Result<Vec<Fact>> {
        if user_id.is_empty() {
            return Err(Error::Validation("user_id must not be empty".into()));
        }
        let result = self
            .datastore()
            .query(
                None,
                "SELECT user_id, key, value, created_at, updated_at
                 FROM kv_memories WHERE user_id = ? ORDER BY key",
                &[Value::from(user_id)],
            )
            .await?;
        result
            .rows
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(Error::from))
            .collect()
    }
}

fn validate_scope(user_id: &str, key: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(Error::Validation("user_id must not be empty".into()));
    }
    if key.is_empty() {
        return Err(Error::Validation("key must not be empty".into()));
    }
    Ok(())
}
