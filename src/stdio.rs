//! Stdio tool transport.
//!
//! One JSON object per line on stdin (`{"name": ..., "arguments": {...}}`),
//! one protocol envelope per line on stdout. Malformed lines produce an
//! `isError` envelope instead of terminating the loop; EOF or the shutdown
//! token ends the session. Handlers run as parallel tasks, so a slow call
//! does not block the next request — responses are serialized through one
//! writer task and carry the request's `name` for correlation.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::tools::{ModuleManager, ToolResponse};

#[derive(Deserialize)]
struct StdioRequest {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Run the stdio loop until EOF or shutdown.
pub async fn run_stdio(manager: Arc<ModuleManager>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    info!("stdio transport ready");
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let request: StdioRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let response = ToolResponse::error(format!("invalid request: {}", e));
                let _ = out_tx.send(render(None, &response));
                continue;
            }
        };

        debug!(tool = %request.name, "stdio request");
        let manager = Arc::clone(&manager);
        let out = out_tx.clone();
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            let name = request.name.clone();
            let response = manager.call(&request.name, request.arguments, cancel).await;
            let _ = out.send(render(Some(&name), &response));
        });
    }

    drop(out_tx);
    let _ = writer.await;
    info!("stdio transport closed");
    Ok(())
}

fn render(name: Option<&str>, response: &ToolResponse) -> String {
    let mut value = serde_json::to_value(response).unwrap_or_else(|_| {
        serde_json::json!({ "content": [], "isError": true })
    });
    if let (Some(name), Value::Object(map)) = (name, &mut value) {
        map.insert("name".to_string(), Value::from(name));
    }
    value.to_string()
}
