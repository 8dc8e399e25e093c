//! Knowledge-base tools (`kb_*`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{decode_args, ModuleInfo, SharedDeps, Tool, ToolContext, ToolModule};
use crate::error::Result;

#[derive(Default)]
pub struct KbModule {
    deps: Option<SharedDeps>,
}

#[async_trait]
impl ToolModule for KbModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: "kb",
            name: "Knowledge Base",
            description: "Chunked, embedded documents mirrored to a Markdown directory",
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    fn provision(&mut self, deps: &SharedDeps) -> Result<()> {
        self.deps = Some(deps.clone());
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let deps = self
            .deps
            .as_ref()
            .ok_or_else(|| crate::error::Error::Config("kb module not provisioned".into()))?;
        // A configured-but-missing KB directory is almost always a typo.
        if let Some(root) = deps.store.kb_root() {
            if !root.exists() {
                tracing::warn!(root = %root.display(), "kb.root does not exist yet");
            }
        }
        Ok(())
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(AddDocument),
            Arc::new(Search),
            Arc::new(GetDocument),
            Arc::new(DeleteDocument),
            Arc::new(ListDocuments),
            Arc::new(Sync),
        ]
    }
}

struct AddDocument;

#[async_trait]
impl Tool for AddDocument {
    fn name(&self) -> &str {
        "kb_add_document"
    }

    fn description(&self) -> &str {
        "Chunk, embed, and store a document under a relative path"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Relative path, e.g. notes/setup.md" },
                "content": { "type": "string" },
                "metadata": { "type": "object" },
                "user_id": { "type": "string" }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            file_path: String,
            content: String,
            #[serde(default)]
            metadata: Value,
            #[serde(default)]
            user_id: Option<String>,
        }
        let mut args: Args = decode_args(params)?;
        if args.metadata.is_null() {
            args.metadata = json!({});
        }
        let chunk_count = ctx
            .deps
            .store
            .kb_add(
                &args.file_path,
                &args.content,
                &args.metadata,
                args.user_id.as_deref(),
                &ctx.cancel,
            )
            .await?;
        Ok(json!({ "file_path": args.file_path, "chunk_count": chunk_count }))
    }
}

struct Search;

#[async_trait]
impl Tool for Search {
    fn name(&self) -> &str {
        "kb_search"
    }

    fn description(&self) -> &str {
        "Semantic search over knowledge-base documents"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "k": { "type": "integer", "description": "Max documents (default 10, cap 100)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            query: String,
            #[serde(default)]
            k: Option<usize>,
        }
        let args: Args = decode_args(params)?;
        let hits = ctx
            .deps
            .store
            .kb_search(&args.query, args.k, &ctx.cancel)
            .await?;
        let results: Vec<Value> = hits
            .iter()
            .map(|hit| {
                json!({
                    "file_path": hit.record.file_path,
                    "score": hit.score,
                    "snippet": hit.record.snippet,
                    "chunk_index": hit.record.chunk_index,
                })
            })
            .collect();
        Ok(json!({ "count": results.len(), "results": results }))
    }
}

struct GetDocument;

#[async_trait]
impl Tool for GetDocument {
    fn name(&self) -> &str {
        "kb_get_document"
    }

    fn description(&self) -> &str {
        "Reassemble a stored document from its chunks"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string" }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            file_path: String,
        }
        let args: Args = decode_args(params)?;
        let content = ctx.deps.store.kb_get(&args.file_path).await?;
        Ok(json!({
            "file_path": args.file_path,
            "found": content.is_some(),
            "content": content,
        }))
    }
}

struct DeleteDocument;

#[async_trait]
impl Tool for DeleteDocument {
    fn name(&self) -> &str {
        "kb_delete_document"
    }

    fn description(&self) -> &str {
        "Delete a document and all of its chunks"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string" }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            file_path: String,
        }
        let args: Args = decode_args(params)?;
        let deleted = ctx.deps.store.kb_delete(&args.file_path).await?;
        Ok(json!({ "deleted": deleted }))
    }
}

struct ListDocuments;

#[async_trait]
impl Tool for ListDocuments {
    fn name(&self) -> &str {
        "kb_list_documents"
    }

    fn description(&self) -> &str {
        "List stored documents and their chunk counts"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let documents = ctx.deps.store.kb_list().await?;
        Ok(json!({ "count": documents.len(), "documents": documents }))
    }
}

struct Sync;

#[async_trait]
impl Tool for Sync {
    fn name(&self) -> &str {
        "kb_sync"
    }

    fn description(&self) -> &str {
        "Re-index Markdown files in the knowledge-base directory"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let report = ctx.deps.store.kb_sync(&ctx.cancel).await?;
        Ok(serde_json::to_value(report)?)
    }
}
