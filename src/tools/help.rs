//! Discoverability tool (`how_to_use`).
//!
//! Agents keep their per-call context small by fetching documentation on
//! demand: no argument returns the group index, a group id returns that
//! group's tools, a tool name returns its full schema.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{decode_args, ModuleInfo, SharedDeps, Tool, ToolContext, ToolModule};
use crate::error::Result;

#[derive(Default)]
pub struct HelpModule;

#[async_trait]
impl ToolModule for HelpModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: "help",
            name: "Help",
            description: "Documentation lookup for tool groups and tools",
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    fn provision(&mut self, _deps: &SharedDeps) -> Result<()> {
        Ok(())
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(HowToUse)]
    }
}

struct HowToUse;

#[async_trait]
impl Tool for HowToUse {
    fn name(&self) -> &str {
        "how_to_use"
    }

    fn description(&self) -> &str {
        "Describe the available tool groups, one group, or one tool"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Group id (memory, kb, graph, events, code) or tool name; omit for the index"
                }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            #[serde(default)]
            name: Option<String>,
        }
        let args: Args = decode_args(params)?;

        let Some(name) = args.name.filter(|n| !n.is_empty()) else {
            // Top-level index: groups only, to keep the payload small.
            let groups: Vec<Value> = ctx
                .catalog
                .modules
                .iter()
                .map(|module| {
                    json!({
                        "id": module.info.id,
                        "name": module.info.name,
                        "description": module.info.description,
                        "tools": module.tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            return Ok(json!({ "groups": groups }));
        };

        if let Some(module) = ctx.catalog.find_module(&name) {
            return Ok(json!({ "group": module }));
        }
        if let Some((module, tool)) = ctx.catalog.find_tool(&name) {
            return Ok(json!({ "group_id": module.info.id, "tool": tool }));
        }
        Ok(json!({
            "found": false,
            "hint": format!("no group or tool named '{}'; call how_to_use without arguments for the index", name),
        }))
    }
}
