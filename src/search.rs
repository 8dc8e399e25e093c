//! Hybrid retrieval over events.
//!
//! A query runs through two engines and the results are fused:
//!
//! - **Vector** — cosine similarity between the embedded query and stored
//!   event embeddings, shifted from `[-1, 1]` into `[0, 1]`.
//! - **Text** — FTS5 BM25 over `events_fts`, normalized to `[0, 1]` by
//!   dividing by the best score in the candidate window.
//!
//! Candidates are unioned by record id; a record found by both engines
//! scores `0.5 · vec + 0.5 · bm25`, a record found by one contributes `0`
//! for the missing side. Time-window filters are applied as post-filters,
//! then results sort by score descending (ties: newer first, then id) and
//! truncate to `k` (default 10, cap 100).
//!
//! Queries with no text skip both engines and return events ordered by
//! `created_at` descending.

use serde::Deserialize;
use sqlx::Row;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::db::canonical_id;
use crate::embedding::{blob_to_vec, cosine_similarity, Embedder};
use crate::error::{classify_sqlx, Error, Result};
use crate::models::{Event, ScoredRecord};
use crate::store::vectors::clamp_k;
use crate::store::MemoryStore;

/// Weight of the vector side in the fused score; the text side gets the
/// complement.
const VECTOR_WEIGHT: f64 = 0.5;

/// How many candidates each engine contributes before fusion.
const CANDIDATE_WINDOW: usize = 200;

/// A time window over `created_at`. The relative variants are mutually
/// exclusive with each other; `from_date`/`to_date` bound an absolute
/// range and may be combined with each other only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeFilter {
    pub last_hours: Option<i64>,
    pub last_days: Option<i64>,
    pub last_months: Option<i64>,
    /// Inclusive lower bound, `YYYY-MM-DD`.
    pub from_date: Option<String>,
    /// Inclusive upper bound, `YYYY-MM-DD`.
    pub to_date: Option<String>,
}

impl TimeFilter {
    pub fn is_empty(&self) -> bool {
        self.last_hours.is_none()
            && self.last_days.is_none()
            && self.last_months.is_none()
            && self.from_date.is_none()
            && self.to_date.is_none()
    }

    /// Resolve to an inclusive epoch-second range `(min, max)`.
    pub fn to_range(&self, now: i64) -> Result<(Option<i64>, Option<i64>)> {
        let relative_set = [
            self.last_hours.is_some(),
            self.last_days.is_some(),
            self.last_months.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if relative_set > 1 {
            return Err(Error::Validation(
                "last_hours, last_days, and last_months are mutually exclusive".into(),
            ));
        }
        if relative_set == 1 && (self.from_date.is_some() || self.to_date.is_some()) {
            return Err(Error::Validation(
                "relative windows cannot be combined with from_date/to_date".into(),
            ));
        }

        if let Some(hours) = self.last_hours {
            ensure_positive(hours, "last_hours")?;
            return Ok((Some(now - hours * 3600), None));
        }
        if let Some(days) = self.last_days {
            ensure_positive(days, "last_days")?;
            return Ok((Some(now - days * 86_400), None));
        }
        if let Some(months) = self.last_months {
            ensure_positive(months, "last_months")?;
            // Calendar months vary; 30 days is the service's month.
            return Ok((Some(now - months * 30 * 86_400), None));
        }

        let min = self
            .from_date
            .as_deref()
            .map(|d| parse_date(d, false))
            .transpose()?;
        let max = self
            .to_date
            .as_deref()
            .map(|d| parse_date(d, true))
            .transpose()?;
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(Error::Validation("from_date is after to_date".into()));
            }
        }
        Ok((min, max))
    }
}

fn ensure_positive(value: i64, field: &str) -> Result<()> {
    if value <= 0 {
        return Err(Error::Validation(format!("{} must be positive", field)));
    }
    Ok(())
}

fn parse_date(date: &str, end_of_day: bool) -> Result<i64> {
    let parsed = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("invalid date (expected YYYY-MM-DD): {}", date)))?;
    let time = if end_of_day {
        parsed.and_hms_opt(23, 59, 59)
    } else {
        parsed.and_hms_opt(0, 0, 0)
    };
    Ok(time.expect("valid wall-clock time").and_utc().timestamp())
}

/// Filters applied to an event search besides the query text.
#[derive(Debug, Clone, Default)]
pub struct EventFilters {
    pub subject: Option<String>,
    pub time: Option<TimeFilter>,
}

/// Ranked fusion of vector and BM25 candidates, or a pure-metadata listing
/// when `query` is absent.
pub async fn search_events(
    store: &MemoryStore,
    user_id: &str,
    query: Option<&str>,
    filters: &EventFilters,
    k: Option<usize>,
    cancel: &CancellationToken,
) -> Result<Vec<ScoredRecord<Event>>> {
    if user_id.is_empty() {
        return Err(Error::Validation("user_id must not be empty".into()));
    }
    let k = clamp_k(k);
    let now = crate::store::now_epoch();
    let range = filters
        .time
        .as_ref()
        .map(|t| t.to_range(now))
        .transpose()?
        .unwrap_or((None, None));

    let query = query.map(str::trim).filter(|q| !q.is_empty());

    let Some(query) = query else {
        return metadata_listing(store, user_id, filters, range, k).await;
    };

    let vector_scores =
        vector_candidates(store, store.embedder(), user_id, query, filters, cancel).await?;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let text_scores = text_candidates(store, user_id, query, filters).await?;

    // Union by id; either side missing contributes zero.
    let mut fused: HashMap<String, f64> = HashMap::new();
    for (id, score) in &vector_scores {
        fused.insert(id.clone(), VECTOR_WEIGHT * score);
    }
    for (id, score) in &text_scores {
        *fused.entry(id.clone()).or_insert(0.0) += (1.0 - VECTOR_WEIGHT) * score;
    }

    let mut results = Vec::with_capacity(fused.len());
    for (id, score) in fused {
        if let Some(event) = fetch_event(store, &id).await? {
            let epoch = event.created_at.timestamp();
            if let Some(min) = range.0 {
                if epoch < min {
                    continue;
                }
            }
            if let Some(max) = range.1 {
                if epoch > max {
                    continue;
                }
            }
            results.push(ScoredRecord {
                id,
                score: score.clamp(0.0, 1.0),
                record: event,
            });
        }
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.created_at.cmp(&a.record.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(k);
    Ok(results)
}

/// No-query path: newest matching events, score 0.
async fn metadata_listing(
    store: &MemoryStore,
    user_id: &str,
    filters: &EventFilters,
    range: (Option<i64>, Option<i64>),
    k: usize,
) -> Result<Vec<ScoredRecord<Event>>> {
    let mut statement =
        "SELECT id, user_id, subject, content, metadata, created_at FROM events
         WHERE user_id = ?"
            .to_string();
    let mut params: Vec<String> = vec![user_id.to_string()];
    if let Some(subject) = &filters.subject {
        statement.push_str(" AND subject = ?");
        params.push(subject.clone());
    }
    if let Some(min) = range.0 {
        statement.push_str(" AND created_at >= ?");
        params.push(min.to_string());
    }
    if let Some(max) = range.1 {
        statement.push_str(" AND created_at <= ?");
        params.push(max.to_string());
    }
    statement.push_str(" ORDER BY created_at DESC, id LIMIT ?");

    let mut q = sqlx::query(&statement);
    for p in &params {
        q = q.bind(p);
    }
    q = q.bind(k as i64);
    let rows = q
        .fetch_all(store.datastore().pool())
        .await
        .map_err(|e| classify_sqlx(&statement, e))?;

    Ok(rows
        .iter()
        .map(|row| {
            let event = row_to_event(row);
            ScoredRecord {
                id: event.id.clone(),
                score: 0.0,
                record: event,
            }
        })
        .collect())
}

/// Cosine scores for the user's events, already shifted into `[0, 1]` and
/// truncated to the candidate window.
async fn vector_candidates(
    store: &MemoryStore,
    embedder: &Embedder,
    user_id: &str,
    query: &str,
    filters: &EventFilters,
    cancel: &CancellationToken,
) -> Result<Vec<(String, f64)>> {
    let query_vec = embedder.embed_query(query, cancel).await?;

    let mut statement = "SELECT id, embedding FROM events WHERE user_id = ?".to_string();
    let mut params: Vec<String> = vec![user_id.to_string()];
    if let Some(subject) = &filters.subject {
        statement.push_str(" AND subject = ?");
        params.push(subject.clone());
    }

    let mut q = sqlx::query(&statement);
    for p in &params {
        q = q.bind(p);
    }
    let rows = q
        .fetch_all(store.datastore().pool())
        .await
        .map_err(|e| classify_sqlx(&statement, e))?;

    let mut scored: Vec<(String, f64)> = rows
        .iter()
        .map(|row| {
            let id: String = row.get("id");
            let blob: Vec<u8> = row.get("embedding");
            let similarity = f64::from(cosine_similarity(&query_vec, &blob_to_vec(&blob)));
            (canonical_id("events", &id), (similarity + 1.0) / 2.0)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(CANDIDATE_WINDOW);
    Ok(scored)
}

/// BM25 scores from FTS5, normalized by the window's best score.
async fn text_candidates(
    store: &MemoryStore,
    user_id: &str,
    query: &str,
    filters: &EventFilters,
) -> Result<Vec<(String, f64)>> {
    let Some(match_expr) = fts_match_expression(query) else {
        return Ok(Vec::new());
    };

    let mut statement = "SELECT event_id, rank FROM events_fts
         WHERE events_fts MATCH ? AND user_id = ?"
        .to_string();
    let mut params: Vec<String> = vec![match_expr, user_id.to_string()];
    if let Some(subject) = &filters.subject {
        statement.push_str(" AND subject = ?");
        params.push(subject.clone());
    }
    statement.push_str(" ORDER BY rank LIMIT ?");

    let mut q = sqlx::query(&statement);
    for p in &params {
        q = q.bind(p);
    }
    q = q.bind(CANDIDATE_WINDOW as i64);
    let rows = q
        .fetch_all(store.datastore().pool())
        .await
        .map_err(|e| classify_sqlx(&statement, e))?;

    // FTS5 rank is a negative BM25 value, lower = better.
    let raw: Vec<(String, f64)> = rows
        .iter()
        .map(|row| {
            let id: String = row.get("event_id");
            let rank: f64 = row.get("rank");
            (canonical_id("events", &id), -rank)
        })
        .collect();

    let max = raw.iter().map(|(_, s)| *s).fold(f64::MIN, f64::max);
    if max <= 0.0 {
        return Ok(raw.into_iter().map(|(id, _)| (id, 0.0)).collect());
    }
    Ok(raw.into_iter().map(|(id, s)| (id, s / max)).collect())
}

/// Quote each token so caller text cannot inject FTS5 operators.
fn fts_match_expression(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if tokens.is_empty() {
        return None;
    }
    Some(tokens.join(" OR "))
}

async fn fetch_event(store: &MemoryStore, id: &str) -> Result<Option<Event>> {
    let bare = crate::db::bare_id("events", id);
    let statement =
        "SELECT id, user_id, subject, content, metadata, created_at FROM events WHERE id = ?";
    let row = sqlx::query(statement)
        .bind(bare)
        .fetch_optional(store.datastore().pool())
        .await
        .map_err(|e| classify_sqlx(statement, e))?;
    Ok(row.as_ref().map(row_to_event))
}

pub(crate) fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Event {
    let id: String = row.get("id");
    let metadata: Option<String> = row.get("metadata");
    let created_at: i64 = row.get("created_at");
    Event {
        id: canonical_id("events", &id),
        user_id: row.get("user_id"),
        subject: row.get("subject"),
        content: row.get("content"),
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_windows_are_mutually_exclusive() {
        let filter = TimeFilter {
            last_hours: Some(1),
            last_days: Some(7),
            ..Default::default()
        };
        assert!(filter.to_range(1_000_000).is_err());
    }

    #[test]
    fn relative_and_absolute_cannot_mix() {
        let filter = TimeFilter {
            last_days: Some(7),
            from_date: Some("2026-01-01".into()),
            ..Default::default()
        };
        assert!(filter.to_range(1_000_000).is_err());
    }

    #[test]
    fn last_days_resolves_to_lower_bound() {
        let now = 10 * 86_400;
        let filter = TimeFilter {
            last_days: Some(7),
            ..Default::default()
        };
        let (min, max) = filter.to_range(now).unwrap();
        assert_eq!(min, Some(3 * 86_400));
        assert_eq!(max, None);
    }

    #[test]
    fn date_range_parses_inclusive() {
        let filter = TimeFilter {
            from_date: Some("2026-01-01".into()),
            to_date: Some("2026-01-02".into()),
            ..Default::default()
        };
        let (min, max) = filter.to_range(0).unwrap();
        assert!(min.unwrap() < max.unwrap());
        assert_eq!(max.unwrap() - min.unwrap(), 86_400 * 2 - 1);
    }

    #[test]
    fn reversed_date_range_rejected() {
        let filter = TimeFilter {
            from_date: Some("2026-02-01".into()),
            to_date: Some("2026-01-01".into()),
            ..Default::default()
        };
        assert!(filter.to_range(0).is_err());
    }

    #[test]
    fn negative_relative_window_rejected() {
        let filter = TimeFilter {
            last_hours: Some(-2),
            ..Default::default()
        };
        assert!(filter.to_range(0).is_err());
    }

    #[test]
    fn fts_expression_quotes_tokens() {
        assert_eq!(
            fts_match_expression("connection pool"),
            Some("\"connection\" OR \"pool\"".to_string())
        );
        assert_eq!(fts_match_expression("  --  "), None);
        // Operator characters are stripped, not interpreted.
        assert_eq!(
            fts_match_expression("a AND b*"),
            Some("\"a\" OR \"AND\" OR \"b\"".to_string())
        );
    }
}
