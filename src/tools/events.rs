//! Event tools (`event_*`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{decode_args, ModuleInfo, SharedDeps, Tool, ToolContext, ToolModule};
use crate::error::Result;
use crate::search::{EventFilters, TimeFilter};

#[derive(Default)]
pub struct EventsModule {
    deps: Option<SharedDeps>,
}

#[async_trait]
impl ToolModule for EventsModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: "events",
            name: "Events",
            description: "Time-ordered events with hybrid vector and text search",
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
            .ok_or_else(|| crate::error::Error::Config("events module not provisioned".into()))
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(SaveEvent), Arc::new(SearchEvents)]
    }
}

struct SaveEvent;

#[async_trait]
impl Tool for SaveEvent {
    fn name(&self) -> &str {
        "event_save"
    }

    fn description(&self) -> &str {
        "Record an event under a namespace:identifier subject"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "subject": { "type": "string", "description": "namespace:identifier, e.g. error:db" },
                "content": { "type": "string" },
                "metadata": { "type": "object" }
            },
            "required": ["user_id", "subject", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            user_id: String,
            subject: String,
            content: String,
            #[serde(default)]
            metadata: Option<Value>,
        }
        let args: Args = decode_args(params)?;
        let id = ctx
            .deps
            .store
            .save_event(
                &args.user_id,
                &args.subject,
                &args.content,
                args.metadata.as_ref(),
                &ctx.cancel,
            )
            .await?;
        Ok(json!({ "id": id }))
    }
}

struct SearchEvents;

#[async_trait]
impl Tool for SearchEvents {
    fn name(&self) -> &str {
        "event_search"
    }

    fn description(&self) -> &str {
        "Hybrid search over events with subject and time filters"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "query": { "type": "string", "description": "Free-text query; omit for a pure listing" },
                "subject": { "type": "string" },
                "last_hours": { "type": "integer" },
                "last_days": { "type": "integer" },
                "last_months": { "type": "integer" },
                "from_date": { "type": "string", "description": "YYYY-MM-DD" },
                "to_date": { "type": "string", "description": "YYYY-MM-DD" },
                "k": { "type": "integer", "description": "Max results (default 10, cap 100)" }
            },
            "required": ["user_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            user_id: String,
            #[serde(default)]
            query: Option<String>,
            #[serde(default)]
            subject: Option<String>,
            #[serde(flatten)]
            time: TimeFilter,
            #[serde(default)]
            k: Option<usize>,
        }
        let args: Args = decode_args(params)?;
        let filters = EventFilters {
            subject: args.subject,
            time: if args.time.is_empty() {
                None
            } else {
                Some(args.time)
            },
        };
        let results = ctx
            .deps
            .store
            .search_events(
                &args.user_id,
                args.query.as_deref(),
                &filters,
                args.k,
                &ctx.cancel,
            )
            .await?;
        let hits: Vec<Value> = results
            .iter()
            .map(|hit| {
                json!({
                    "id": hit.id,
                    "score": hit.score,
                    "subject": hit.record.subject,
                    "content": hit.record.content,
                    "metadata": hit.record.metadata,
                    "created_at": hit.record.created_at,
                })
            })
            .collect();
        Ok(json!({ "count": hits.len(), "results": hits }))
    }
}
