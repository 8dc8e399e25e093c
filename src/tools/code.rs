//! Code-index tools (`code_*`).
//!
//! This module owns the indexer's lifecycle: it re-activates watchers for
//! flagged projects when provisioned (unless watching is disabled) and
//! stops workers and watchers in `cleanup`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use super::{decode_args, ModuleInfo, SharedDeps, Tool, ToolContext, ToolModule};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct CodeModule {
    deps: Option<SharedDeps>,
}

#[async_trait]
impl ToolModule for CodeModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: "code",
            name: "Code Index",
            description: "Background project indexing with symbol-level semantic search",
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
            .ok_or_else(|| Error::Config("code module not provisioned".into()))
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(IndexProject),
            Arc::new(IndexingStatus),
            Arc::new(SearchCode),
            Arc::new(ListProjects),
            Arc::new(Watch),
        ]
    }

    async fn cleanup(&self) -> Result<()> {
        if let Some(deps) = &self.deps {
            deps.indexer.shutdown().await;
        }
        Ok(())
    }
}

struct IndexProject;

#[async_trait]
impl Tool for IndexProject {
    fn name(&self) -> &str {
        "code_index_project"
    }

    fn description(&self) -> &str {
        "Queue a background indexing run for a source tree"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Project root directory" },
                "name": { "type": "string", "description": "Display name; defaults to the directory name" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            path: String,
            #[serde(default)]
            name: Option<String>,
        }
        let args: Args = decode_args(params)?;
        let job = ctx
            .deps
            .indexer
            .start_indexing(&PathBuf::from(&args.path), args.name.as_deref())
            .await?;
        Ok(json!({
            "job_id": job.id,
            "project_id": job.project_id,
            "status": job.status,
        }))
    }
}

struct IndexingStatus;

#[async_trait]
impl Tool for IndexingStatus {
    fn name(&self) -> &str {
        "code_indexing_status"
    }

    fn description(&self) -> &str {
        "Inspect an indexing job or a project's active job"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "job_id": { "type": "string" },
                "project_id": { "type": "string" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            #[serde(default)]
            job_id: Option<String>,
            #[serde(default)]
            project_id: Option<String>,
        }
        let args: Args = decode_args(params)?;
        let job = match (&args.job_id, &args.project_id) {
            (Some(job_id), _) => ctx.deps.store.job_get(job_id).await?,
            (None, Some(project_id)) => {
                ctx.deps.store.active_job_for_project(project_id).await?
            }
            (None, None) => {
                return Err(Error::Validation(
                    "pass job_id or project_id".into(),
                ))
            }
        };
        Ok(json!({ "found": job.is_some(), "job": job }))
    }
}

struct SearchCode;

#[async_trait]
impl Tool for SearchCode {
    fn name(&self) -> &str {
        "code_search"
    }

    fn description(&self) -> &str {
        "Semantic search over a project's indexed symbols"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": { "type": "string" },
                "query": { "type": "string" },
                "k": { "type": "integer", "description": "Max symbols (default 10, cap 100)" }
            },
            "required": ["project_id", "query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: String,
            query: String,
            #[serde(default)]
            k: Option<usize>,
        }
        let args: Args = decode_args(params)?;
        let hits = ctx
            .deps
            .store
            .symbol_search(&args.project_id, &args.query, args.k, &ctx.cancel)
            .await?;
        let results: Vec<Value> = hits
            .iter()
            .map(|hit| {
                json!({
                    "score": hit.score,
                    "name": hit.record.name,
                    "name_path": hit.record.name_path,
                    "symbol_type": hit.record.symbol_type,
                    "file_path": hit.record.file_path,
                    "start_line": hit.record.start_line,
                    "end_line": hit.record.end_line,
                    "signature": hit.record.signature,
                    "doc_string": hit.record.doc_string,
                })
            })
            .collect();
        Ok(json!({ "count": results.len(), "results": results }))
    }
}

struct ListProjects;

#[async_trait]
impl Tool for ListProjects {
    fn name(&self) -> &str {
        "code_list_projects"
    }

    fn description(&self) -> &str {
        "List registered projects with status and language statistics"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let projects = ctx.deps.store.project_list().await?;
        Ok(json!({ "count": projects.len(), "projects": projects }))
    }
}

struct Watch;

#[async_trait]
impl Tool for Watch {
    fn name(&self) -> &str {
        "code_watch"
    }

    fn description(&self) -> &str {
        "Enable or disable the file watcher for a project"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": { "type": "string" },
                "enabled": { "type": "boolean" }
            },
            "required": ["project_id", "enabled"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: String,
            enabled: bool,
        }
        let args: Args = decode_args(params)?;
        let changed = if args.enabled {
            ctx.deps.indexer.activate_watcher(&args.project_id).await?
        } else {
            ctx.deps.indexer.deactivate_watcher(&args.project_id).await?
        };
        Ok(json!({ "project_id": args.project_id, "watching": args.enabled, "changed": changed }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{call_err, call_ok, manager};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn index_then_query_status_and_symbols() {
        let manager = manager().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("svc.go"),
            "package svc\n\n// Dial opens the backend connection.\nfunc Dial() {}\n",
        )
        .unwrap();

        let queued = call_ok(
            &manager,
            "code_index_project",
            json!({"path": dir.path().to_string_lossy(), "name": "svc"}),
        )
        .await;
        let job_id = queued["job_id"].as_str().unwrap().to_string();
        let project_id = queued["project_id"].as_str().unwrap().to_string();

        let mut completed = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            let status = call_ok(&manager, "code_indexing_status", json!({"job_id": job_id})).await;
            if status["job"]["status"] == "completed" {
                completed = true;
                break;
            }
        }
        assert!(completed, "indexing never completed");

        let found = call_ok(
            &manager,
            "code_search",
            json!({"project_id": project_id, "query": "open backend connection"}),
        )
        .await;
        assert!(found["count"].as_i64().unwrap() >= 1);
        assert_eq!(found["results"][0]["name"], "Dial");

        let projects = call_ok(&manager, "code_list_projects", json!({})).await;
        assert_eq!(projects["count"], 1);
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn status_requires_an_identifier() {
        let manager = manager().await;
        let message = call_err(&manager, "code_indexing_status", json!({})).await;
        assert!(message.contains("job_id or project_id"), "{message}");
        manager.shutdown().await;
    }
}
