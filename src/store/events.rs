//! Time-ordered events with hybrid search.
//!
//! Events carry a colon-delimited subject (`namespace:identifier`, e.g.
//! `error:db`) used both as a filter and a grouping key. Content is
//! embedded on save and mirrored into the FTS index, so retrieval can fuse
//! vector and BM25 scores (see [`crate::search`]).

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{now_epoch, MemoryStore};
use crate::db::canonical_id;
use crate::embedding::vec_to_blob;
use crate::error::{classify_sqlx, Error, Result};
use crate::models::{Event, ScoredRecord};
use crate::search::{self, EventFilters};

impl MemoryStore {
    /// Embed and persist an event. `created_at` is set server-side.
    /// Returns the canonical record id.
    pub async fn save_event(
        &self,
        user_id: &str,
        subject: &str,
        content: &str,
        metadata: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if user_id.is_empty() {
            return Err(Error::Validation("user_id must not be empty".into()));
        }
        validate_subject(subject)?;
        if content.trim().is_empty() {
            return Err(Error::Validation("content must not be empty".into()));
        }

        let embedding = self.embedder().embed_text_averaged(content, cancel).await?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_epoch();

        let mut tx = self
            .datastore()
            .pool()
            .begin()
            .await
            .map_err(|e| classify_sqlx("BEGIN", e))?;

        let statement = "INSERT INTO events
             (id, user_id, subject, content, embedding, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)";
        sqlx::query(statement)
            .bind(&id)
            .bind(user_id)
            .bind(subject)
            .bind(content)
            .bind(vec_to_blob(&embedding))
            .bind(metadata.map(|m| m.to_string()))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_sqlx(statement, e))?;

        let fts = "INSERT INTO events_fts (event_id, user_id, subject, content)
             VALUES (?, ?, ?, ?)";
        sqlx::query(fts)
            .bind(&id)
            .bind(user_id)
            .bind(subject)
            .bind(content)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_sqlx(fts, e))?;

        tx.commit().await.map_err(|e| classify_sqlx("COMMIT", e))?;
        Ok(canonical_id("events", &id))
    }

    /// Hybrid search (or metadata listing when `query` is `None`); see
    /// [`crate::search::search_events`].
    pub async fn search_events(
        &self,
        user_id: &str,
        query: Option<&str>,
        filters: &EventFilters,
        k: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredRecord<Event>>> {
        search::search_events(self, user_id, query, filters, k, cancel).await
    }

    /// Fetch one event by id. `None` when absent.
    pub async fn get_event(&self, id: &str) -> Result<Option<Event>> {
        let bare = crate::db::bare_id("events", id);
        let statement =
            "SELECT id, user_id, subject, content, metadata, created_at FROM events WHERE id = ?";
        let row = sqlx::query(statement)
            .bind(bare)
            .fetch_optional(self.datastore().pool())
            .await
            .map_err(|e| classify_sqlx(statement, e))?;
        Ok(row.as_ref().map(search::row_to_event))
    }
}

/// Subjects are `namespace:identifier` with both halves non-empty.
fn validate_subject(subject: &str) -> Result<()> {
    match subject.split_once(':') {
        Some((ns, id)) if !ns.is_empty() && !id.is_empty() => Ok(()),
        _ => Err(Error::Validation(format!(
            "subject must be namespace:identifier, got '{}'",
            subject
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::memory_store;
    use super::*;
    use crate::search::TimeFilter;

    #[tokio::test]
    async fn save_and_fetch_event() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        let id = store
            .save_event(
                "p",
                "error:db",
                "pool exhausted, raising from 10 to 25",
                Some(&serde_json::json!({"pool": "primary"})),
                &cancel,
            )
            .await
            .unwrap();
        let event = store.get_event(&id).await.unwrap().unwrap();
        assert_eq!(event.subject, "error:db");
        assert_eq!(event.metadata.unwrap()["pool"], "primary");
    }

    #[tokio::test]
    async fn invalid_subject_rejected() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        for bad in ["", "nodelimiter", ":noprefix", "nosuffix:"] {
            assert!(
                store
                    .save_event("u", bad, "content", None, &cancel)
                    .await
                    .is_err(),
                "accepted subject {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn hybrid_search_finds_event_by_subject_and_query() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        store
            .save_event(
                "p",
                "error:db",
                "pool exhausted, raising from 10 to 25",
                None,
                &cancel,
            )
            .await
            .unwrap();
        store
            .save_event("p", "deploy:api", "rolled out build 1234", None, &cancel)
            .await
            .unwrap();

        let filters = EventFilters {
            subject: Some("error:db".into()),
            time: Some(TimeFilter {
                last_days: Some(7),
                ..Default::default()
            }),
        };
        let results = store
            .search_events("p", Some("connection pool"), &filters, None, &cancel)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].record.content.contains("pool exhausted"));
        assert!(results[0].score >= 0.0 && results[0].score <= 1.0);
    }

    #[tokio::test]
    async fn scores_are_non_increasing() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        for (subject, content) in [
            ("note:a", "database connection pool tuning guide"),
            ("note:b", "pool maintenance schedule for summer"),
            ("note:c", "completely unrelated gardening notes"),
        ] {
            store
                .save_event("u", subject, content, None, &cancel)
                .await
                .unwrap();
        }
        let results = store
            .search_events(
                "u",
                Some("database connection pool"),
                &EventFilters::default(),
                Some(10),
                &cancel,
            )
            .await
            .unwrap();
        assert!(!results.is_empty());
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn metadata_only_search_orders_by_recency() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        store
            .save_event("u", "tick:1", "first", None, &cancel)
            .await
            .unwrap();
        store
            .save_event("u", "tick:2", "second", None, &cancel)
            .await
            .unwrap();

        let results = store
            .search_events("u", None, &EventFilters::default(), None, &cancel)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        // Same-second inserts tie-break by id.
        assert!(results[0].record.created_at >= results[1].record.created_at);
    }

    #[tokio::test]
    async fn subject_filter_scopes_results() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        store
            .save_event("u", "error:db", "a database thing happened", None, &cancel)
            .await
            .unwrap();
        store
            .save_event("u", "error:net", "a network thing happened", None, &cancel)
            .await
            .unwrap();

        let filters = EventFilters {
            subject: Some("error:net".into()),
            time: None,
        };
        let results = store
            .search_events("u", Some("thing happened"), &filters, None, &cancel)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.subject, "error:net");
    }

    #[tokio::test]
    async fn time_filter_excludes_old_events() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        let id = store
            .save_event("u", "old:event", "ancient history", None, &cancel)
            .await
            .unwrap();
        // Age the event well past any relative window.
        let bare = crate::db::bare_id("events", &id).to_string();
        store
            .datastore()
            .execute(
                "UPDATE events SET created_at = 1000 WHERE id = ?",
                &[serde_json::Value::from(bare)],
            )
            .await
            .unwrap();

        let filters = EventFilters {
            subject: None,
            time: Some(TimeFilter {
                last_days: Some(1),
                ..Default::default()
            }),
        };
        let results = store
            .search_events("u", Some("ancient history"), &filters, None, &cancel)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
