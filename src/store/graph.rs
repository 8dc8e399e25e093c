//! Entity/relationship graph.
//!
//! Entities are typed nodes; relations are directed, typed edges
//! (`wrote`, `mentioned_in`, `related_to`, or any caller-defined kind).
//! The graph admits cycles, so traversal is an iterative breadth-first
//! expansion with a visited set keyed by record id and a hard depth cap —
//! no in-memory graph is ever materialized.

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{now_epoch, MemoryStore};
use crate::db::bare_id;
use crate::error::{Error, Result};
use crate::models::{Entity, Relation};

/// Depth cap for [`MemoryStore::traverse`].
pub const MAX_TRAVERSE_DEPTH: usize = 10;

/// Filters for [`MemoryStore::entity_list`].
#[derive(Debug, Clone, Default)]
pub struct EntityFilters {
    pub name: Option<String>,
    pub entity_type: Option<String>,
    pub user_id: Option<String>,
}

/// One node reached during traversal, with the edge that reached it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TraversalNode {
    pub entity: Entity,
    /// Hops from the start entity (the start itself is depth 0).
    pub depth: usize,
    /// Edge kind and source entity id that led here; `None` for the start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<(String, String)>,
}

impl MemoryStore {
    /// Create an entity. Returns the canonical id.
    pub async fn entity_create(
        &self,
        name: &str,
        entity_type: &str,
        properties: &Value,
        user_id: Option<&str>,
    ) -> Result<String> {
        if name.is_empty() {
            return Err(Error::Validation("entity name must not be empty".into()));
        }
        if entity_type.is_empty() {
            return Err(Error::Validation("entity type must not be empty".into()));
        }
        let mut fields = Map::new();
        fields.insert("name".into(), Value::from(name));
        fields.insert("type".into(), Value::from(entity_type));
        fields.insert("properties".into(), properties.clone());
        fields.insert(
            "user_id".into(),
            user_id.map(Value::from).unwrap_or(Value::Null),
        );
        fields.insert("created_at".into(), Value::from(now_epoch()));
        self.datastore().create("entities", &fields).await
    }

    /// Fetch one entity by id. `None` when absent.
    pub async fn entity_get(&self, id: &str) -> Result<Option<Entity>> {
        let row = self.datastore().select_by_id("entities", id).await?;
        row.map(|r| serde_json::from_value(r).map_err(Error::from))
            .transpose()
    }

    /// Entities matching the given filters, ordered by name.
    pub async fn entity_list(&self, filters: &EntityFilters) -> Result<Vec<Entity>> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(name) = &filters.name {
            clauses.push("name = ?");
            params.push(Value::from(name.as_str()));
        }
        if let Some(entity_type) = &filters.entity_type {
            clauses.push("type = ?");
            params.push(Value::from(entity_type.as_str()));
        }
        if let Some(user_id) = &filters.user_id {
            clauses.push("user_id = ?");
            params.push(Value::from(user_id.as_str()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let statement = format!("SELECT * FROM entities{} ORDER BY name", where_clause);
        let result = self
            .datastore()
            .query(Some("entities"), &statement, &params)
            .await?;
        result
            .rows
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(Error::from))
            .collect()
    }

    /// Delete an entity and every edge touching it. Returns whether the
    /// entity existed.
    pub async fn entity_delete(&self, id: &str) -> Result<bool> {
        let bare = bare_id("entities", id);
        self.datastore()
            .execute(
                "DELETE FROM relations WHERE from_id = ? OR to_id = ?",
                &[Value::from(bare), Value::from(bare)],
            )
            .await?;
        self.datastore().delete_by_id("entities", id).await
    }

    /// Create a typed edge between two existing entities. Returns the
    /// canonical relation id.
    pub async fn relation_create(
        &self,
        kind: &str,
        from_id: &str,
        to_id: &str,
        properties: &Value,
        user_id: Option<&str>,
    ) -> Result<String> {
        if kind.is_empty() {
            return Err(Error::Validation("relation kind must not be empty".into()));
        }
        for (label, id) in [("from", from_id), ("to", to_id)] {
            if self.entity_get(id).await?.is_none() {
                return Err(Error::Validation(format!(
                    "{} entity does not exist: {}",
                    label, id
                )));
            }
        }

        let mut fields = Map::new();
        fields.insert("kind".into(), Value::from(kind));
        fields.insert(
            "from_id".into(),
            Value::from(bare_id("entities", from_id)),
        );
        fields.insert("to_id".into(), Value::from(bare_id("entities", to_id)));
        fields.insert("properties".into(), properties.clone());
        fields.insert(
            "user_id".into(),
            user_id.map(Value::from).unwrap_or(Value::Null),
        );
        fields.insert("created_at".into(), Value::from(now_epoch()));
        self.datastore().create("relations", &fields).await
    }

    /// Edges leaving or entering an entity, optionally restricted by kind.
    pub async fn relations_of(
        &self,
        entity_id: &str,
        kinds: Option<&[String]>,
    ) -> Result<Vec<Relation>> {
        let bare = bare_id("entities", entity_id);
        let mut statement =
            "SELECT * FROM relations WHERE (from_id = ? OR to_id = ?)".to_string();
        let mut params = vec![Value::from(bare), Value::from(bare)];
        if let Some(kinds) = kinds {
            if !kinds.is_empty() {
                let placeholders = vec!["?"; kinds.len()].join(", ");
                statement.push_str(&format!(" AND kind IN ({})", placeholders));
                params.extend(kinds.iter().map(|k| Value::from(k.as_str())));
            }
        }
        let result = self
            .datastore()
            .query(Some("relations"), &statement, &params)
            .await?;
        result
            .rows
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(Error::from))
            .collect()
    }

    /// Breadth-first traversal from `entity_id`, following edges in both
    /// directions up to `depth` hops. Cycles terminate via the visited set.
    pub async fn traverse(
        &self,
        entity_id: &str,
        kinds: Option<&[String]>,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<TraversalNode>> {
        let depth = depth.min(MAX_TRAVERSE_DEPTH);
        let Some(start) = self.entity_get(entity_id).await? else {
            return Ok(Vec::new());
        };

        let mut visited = std::collections::HashSet::new();
        visited.insert(start.id.clone());
        let mut out = vec![TraversalNode {
            entity: start.clone(),
            depth: 0,
            via: None,
        }];
        let mut frontier = vec![start.id];

        for level in 1..=depth {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if frontier.is_empty() {
                break;
            }
            let mut next_frontier = Vec::new();
            for node_id in std::mem::take(&mut frontier) {
                let edges = self.relations_of(&node_id, kinds).await?;
                for edge in edges {
                    let bare_node = bare_id("entities", &node_id).to_string();
                    let neighbor = if edge.from_id == bare_node {
                        &edge.to_id
                    } else {
                        &edge.from_id
                    };
                    let canonical = crate::db::canonical_id("entities", neighbor);
                    if !visited.insert(canonical.clone()) {
                        continue;
                    }
                    if let Some(entity) = self.entity_get(&canonical).await? {
                        out.push(TraversalNode {
                            entity,
                            depth: level,
                            via: Some((edge.kind.clone(), node_id.clone())),
                        });
                        next_frontier.push(canonical);
                    }
                }
            }
            frontier = next_frontier;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::memory_store;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_and_get_entity() {
        let store = memory_store().await;
        let id = store
            .entity_create("Ada Lovelace", "person", &json!({"born": 1815}), Some("u"))
            .await
            .unwrap();
        assert!(id.starts_with("entities:"));
        let entity = store.entity_get(&id).await.unwrap().unwrap();
        assert_eq!(entity.name, "Ada Lovelace");
        assert_eq!(entity.entity_type, "person");
        assert_eq!(entity.properties["born"], json!(1815));
    }

    #[tokio::test]
    async fn list_filters_by_name_and_type() {
        let store = memory_store().await;
        store
            .entity_create("Rust", "language", &json!({}), None)
            .await
            .unwrap();
        store
            .entity_create("Go", "language", &json!({}), None)
            .await
            .unwrap();
        store
            .entity_create("Ada Lovelace", "person", &json!({}), None)
            .await
            .unwrap();

        let languages = store
            .entity_list(&EntityFilters {
                entity_type: Some("language".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(languages.len(), 2);

        let named = store
            .entity_list(&EntityFilters {
                name: Some("Rust".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(named.len(), 1);
    }

    #[tokio::test]
    async fn relation_requires_existing_endpoints() {
        let store = memory_store().await;
        let a = store
            .entity_create("a", "node", &json!({}), None)
            .await
            .unwrap();
        let err = store
            .relation_create("related_to", &a, "entities:missing", &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn traverse_follows_edges_to_depth() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        let a = store.entity_create("a", "n", &json!({}), None).await.unwrap();
        let b = store.entity_create("b", "n", &json!({}), None).await.unwrap();
        let c = store.entity_create("c", "n", &json!({}), None).await.unwrap();
        store
            .relation_create("related_to", &a, &b, &json!({}), None)
            .await
            .unwrap();
        store
            .relation_create("related_to", &b, &c, &json!({}), None)
            .await
            .unwrap();

        let one_hop = store.traverse(&a, None, 1, &cancel).await.unwrap();
        assert_eq!(one_hop.len(), 2); // a + b

        let two_hops = store.traverse(&a, None, 2, &cancel).await.unwrap();
        assert_eq!(two_hops.len(), 3);
        assert_eq!(two_hops[2].depth, 2);
    }

    #[tokio::test]
    async fn traverse_terminates_on_cycles() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        let a = store.entity_create("a", "n", &json!({}), None).await.unwrap();
        let b = store.entity_create("b", "n", &json!({}), None).await.unwrap();
        store
            .relation_create("related_to", &a, &b, &json!({}), None)
            .await
            .unwrap();
        store
            .relation_create("related_to", &b, &a, &json!({}), None)
            .await
            .unwrap();

        let nodes = store
            .traverse(&a, None, MAX_TRAVERSE_DEPTH, &cancel)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 2, "cycle must not duplicate nodes");
    }

    #[tokio::test]
    async fn traverse_filters_by_kind() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        let a = store.entity_create("a", "n", &json!({}), None).await.unwrap();
        let b = store.entity_create("b", "n", &json!({}), None).await.unwrap();
        let c = store.entity_create("c", "n", &json!({}), None).await.unwrap();
        store
            .relation_create("wrote", &a, &b, &json!({}), None)
            .await
            .unwrap();
        store
            .relation_create("mentioned_in", &a, &c, &json!({}), None)
            .await
            .unwrap();

        let only_wrote = store
            .traverse(&a, Some(&["wrote".to_string()]), 2, &cancel)
            .await
            .unwrap();
        assert_eq!(only_wrote.len(), 2);
        assert_eq!(only_wrote[1].entity.name, "b");
    }

    #[tokio::test]
    async fn entity_delete_removes_edges() {
        let store = memory_store().await;
        let a = store.entity_create("a", "n", &json!({}), None).await.unwrap();
        let b = store.entity_create("b", "n", &json!({}), None).await.unwrap();
        store
            .relation_create("related_to", &a, &b, &json!({}), None)
            .await
            .unwrap();
        assert!(store.entity_delete(&a).await.unwrap());
        let edges = store.relations_of(&b, None).await.unwrap();
        assert!(edges.is_empty());
    }
}
