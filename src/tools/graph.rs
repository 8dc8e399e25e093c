//! Entity/relationship graph tools (`graph_*`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{decode_args, ModuleInfo, SharedDeps, Tool, ToolContext, ToolModule};
use crate::error::Result;
use crate::store::graph::EntityFilters;

#[derive(Default)]
pub struct GraphModule {
    deps: Option<SharedDeps>,
}

#[async_trait]
impl ToolModule for GraphModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: "graph",
            name: "Graph",
            description: "Typed entities and relationships with bounded traversal",
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    fn provision(&mut self, deps: &SharedDeps) -> Result<()> {
        self.deps = Some(deps.clone());
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.deps
            .as_ref()
            .map(|_| ())
            .ok_or_else(|| crate::error::Error::Config("graph module not provisioned".into()))
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(CreateEntity),
            Arc::new(GetEntity),
            Arc::new(ListEntities),
            Arc::new(DeleteEntity),
            Arc::new(CreateRelation),
            Arc::new(Traverse),
        ]
    }
}

struct CreateEntity;

#[async_trait]
impl Tool for CreateEntity {
    fn name(&self) -> &str {
        "graph_create_entity"
    }

    fn description(&self) -> &str {
        "Create a typed entity node"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "type": { "type": "string", "description": "Entity type, e.g. person, project" },
                "properties": { "type": "object" },
                "user_id": { "type": "string" }
            },
            "required": ["name", "type"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            name: String,
            #[serde(rename = "type")]
            entity_type: String,
            #[serde(default)]
            properties: Value,
            #[serde(default)]
            user_id: Option<String>,
        }
        let mut args: Args = decode_args(params)?;
        if args.properties.is_null() {
            args.properties = json!({});
        }
        let id = ctx
            .deps
            .store
            .entity_create(
                &args.name,
                &args.entity_type,
                &args.properties,
                args.user_id.as_deref(),
            )
            .await?;
        Ok(json!({ "id": id }))
    }
}

struct GetEntity;

#[async_trait]
impl Tool for GetEntity {
    fn name(&self) -> &str {
        "graph_get_entity"
    }

    fn description(&self) -> &str {
        "Fetch an entity by id"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Entity id (entities:<uuid>)" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            id: String,
        }
        let args: Args = decode_args(params)?;
        let entity = ctx.deps.store.entity_get(&args.id).await?;
        Ok(json!({ "found": entity.is_some(), "entity": entity }))
    }
}

struct ListEntities;

#[async_trait]
impl Tool for ListEntities {
    fn name(&self) -> &str {
        "graph_list_entities"
    }

    fn description(&self) -> &str {
        "List entities, optionally filtered by name, type, or user"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "type": { "type": "string" },
                "user_id": { "type": "string" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            #[serde(default)]
            name: Option<String>,
            #[serde(rename = "type", default)]
            entity_type: Option<String>,
            #[serde(default)]
            user_id: Option<String>,
        }
        let args: Args = decode_args(params)?;
        let entities = ctx
            .deps
            .store
            .entity_list(&EntityFilters {
                name: args.name,
                entity_type: args.entity_type,
                user_id: args.user_id,
            })
            .await?;
        Ok(json!({ "count": entities.len(), "entities": entities }))
    }
}

struct DeleteEntity;

#[async_trait]
impl Tool for DeleteEntity {
    fn name(&self) -> &str {
        "graph_delete_entity"
    }

    fn description(&self) -> &str {
        "Delete an entity and every edge touching it"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            id: String,
        }
        let args: Args = decode_args(params)?;
        let deleted = ctx.deps.store.entity_delete(&args.id).await?;
        Ok(json!({ "deleted": deleted }))
    }
}

struct CreateRelation;

#[async_trait]
impl Tool for CreateRelation {
    fn name(&self) -> &str {
        "graph_create_relation"
    }

    fn description(&self) -> &str {
        "Create a typed, directed edge between two entities"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "kind": { "type": "string", "description": "Edge kind, e.g. wrote, mentioned_in, related_to" },
                "from": { "type": "string", "description": "Source entity id" },
                "to": { "type": "string", "description": "Target entity id" },
                "properties": { "type": "object" },
                "user_id": { "type": "string" }
            },
            "required": ["kind", "from", "to"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            kind: String,
            from: String,
            to: String,
            #[serde(default)]
            properties: Value,
            #[serde(default)]
            user_id: Option<String>,
        }
        let mut args: Args = decode_args(params)?;
        if args.properties.is_null() {
            args.properties = json!({});
        }
        let id = ctx
            .deps
            .store
            .relation_create(
                &args.kind,
                &args.from,
                &args.to,
                &args.properties,
                args.user_id.as_deref(),
            )
            .await?;
        Ok(json!({ "id": id }))
    }
}

struct Traverse;

#[async_trait]
impl Tool for Traverse {
    fn name(&self) -> &str {
        "graph_traverse"
    }

    fn description(&self) -> &str {
        "Walk the graph outward from an entity, bounded by depth"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "entity_id": { "type": "string" },
                "kinds": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Edge kinds to follow; all when omitted"
                },
                "depth": { "type": "integer", "description": "Max hops (default 2, cap 10)" }
            },
            "required": ["entity_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            entity_id: String,
            #[serde(default)]
            kinds: Option<Vec<String>>,
            #[serde(default)]
            depth: Option<usize>,
        }
        let args: Args = decode_args(params)?;
        let nodes = ctx
            .deps
            .store
            .traverse(
                &args.entity_id,
                args.kinds.as_deref(),
                args.depth.unwrap_or(2),
                &ctx.cancel,
            )
            .await?;
        Ok(json!({ "count": nodes.len(), "nodes": nodes }))
    }
}
