//! Stdio tool server. Reads newline-delimited JSON-RPC from stdin and routes
//! each request on its own task; replies go out through a single writer task.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;

use super::protocol::{RpcRequest, RpcResponse};
use crate::daemon::state::ServerState;
use crate::daemon::tools;
use crate::error::LensError;

/// Serve on the process's stdin/stdout until EOF or shutdown.
pub async fn run_stdio(state: Arc<ServerState>) -> Result<()> {
    tracing::info!(
        "vibelens {} serving on stdio (project: {})",
        env!("CARGO_PKG_VERSION"),
        state.project_dir.display()
    );
    serve(state, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve one JSON-RPC stream. Returns once input ends or the shutdown token
/// fires, after in-flight requests have been answered.
pub async fn serve<R, W>(state: Arc<ServerState>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();

    // Single writer task so concurrent replies never interleave.
    let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
    let writer_handle = tokio::spawn(async move {
        let mut writer = BufWriter::new(writer);
        while let Some(msg) = write_rx.recv().await {
            if writer.write_all(msg.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    let token = state.shutdown_token.clone();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = token.cancelled() => {
                tracing::info!("Shutdown requested, stopping request loop");
                break;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("stdin closed");
                break;
            }
            Err(e) => {
                tracing::error!("Failed to read request: {}", e);
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let parsed: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Unparsable request line: {}", e);
                let resp = RpcResponse::from_lens_error(
                    Value::Null,
                    LensError::ParseError(e.to_string()),
                );
                let _ = write_tx.send(serde_json::to_string(&resp)?).await;
                continue;
            }
        };

        let permit = state.request_semaphore.clone().acquire_owned().await?;
        let st = state.clone();
        let tx = write_tx.clone();
        tokio::spawn(async move {
            let out = match parsed {
                Value::Array(batch) if !batch.is_empty() => handle_batch(batch, &st).await,
                single => handle_value(single, &st)
                    .await
                    .map(|resp| serde_json::to_string(&resp)),
            };
            match out {
                Some(Ok(msg)) => {
                    let _ = tx.send(msg).await;
                }
                Some(Err(e)) => tracing::error!("Failed to serialize response: {}", e),
                None => {}
            }
            drop(permit);
        });
    }

    // Writer exits once every in-flight task has dropped its sender.
    drop(write_tx);
    let _ = writer_handle.await;
    Ok(())
}

/// JSON-RPC 2.0 batch: members run in parallel, replies keep input order.
async fn handle_batch(
    batch: Vec<Value>,
    state: &Arc<ServerState>,
) -> Option<serde_json::Result<String>> {
    let handles: Vec<_> = batch
        .into_iter()
        .map(|v| {
            let st = state.clone();
            tokio::spawn(async move { handle_value(v, &st).await })
        })
        .collect();

    let mut responses = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Some(resp)) => responses.push(resp),
            Ok(None) => {}
            Err(e) => tracing::error!("Batch member panicked: {}", e),
        }
    }

    if responses.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&responses))
    }
}

async fn handle_value(value: Value, state: &ServerState) -> Option<RpcResponse> {
    match serde_json::from_value::<RpcRequest>(value) {
        Ok(req) => handle_request(req, state).await,
        Err(e) => Some(RpcResponse::from_lens_error(
            Value::Null,
            LensError::ParseError(e.to_string()),
        )),
    }
}

/// Route one request. Notifications produce no reply.
pub async fn handle_request(req: RpcRequest, state: &ServerState) -> Option<RpcResponse> {
    tracing::debug!("<- {}", req.method);
    let notification = req.is_notification();
    let id = req.id.clone().unwrap_or(Value::Null);

    let response = match req.method.as_str() {
        "initialize" => RpcResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {
                    "name": "vibelens",
                    "version": env!("CARGO_PKG_VERSION")
                },
                "capabilities": {
                    "tools": { "listChanged": false }
                }
            }),
        ),
        "initialized" | "notifications/initialized" => RpcResponse::success(id, json!({})),
        "ping" => RpcResponse::success(id, json!({})),
        "tools/list" => RpcResponse::success(id, json!({ "tools": tools::core_tools_list() })),
        "tools/call" => handle_tools_call(id, &req, state).await,
        "vibelens/status" => RpcResponse::success(id, state.status().await),
        "vibelens/cleanup" => {
            state.symbols.cache().cleanup().await;
            state.metrics.record_cleanup();
            RpcResponse::success(id, json!({ "cleaned": true }))
        }
        _ if notification => {
            tracing::debug!("Ignoring notification {}", req.method);
            return None;
        }
        _ => RpcResponse::from_lens_error(id, LensError::MethodNotFound(req.method.clone())),
    };

    if notification {
        None
    } else {
        Some(response)
    }
}

async fn handle_tools_call(id: Value, req: &RpcRequest, state: &ServerState) -> RpcResponse {
    let Some(name) = req.params.get("name").and_then(|v| v.as_str()) else {
        return RpcResponse::from_lens_error(
            id,
            LensError::InvalidParams("tools/call requires a tool name".into()),
        );
    };
    let args = req
        .params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let ctx = state.tool_context();
    let start = Instant::now();
    let result = tools::dispatch(name, args, &ctx).await;
    let latency_us = start.elapsed().as_micros() as usize;

    let (value, is_error) = match result {
        Ok(output) => (output.value, output.is_error),
        Err(e) => match e.downcast::<LensError>() {
            Ok(err @ LensError::MethodNotFound(_)) => {
                return RpcResponse::from_lens_error(id, err);
            }
            Ok(err) => {
                tracing::warn!("Tool {} failed: {}", name, err);
                (json!({ "error": err.to_string() }), true)
            }
            Err(e) => {
                tracing::error!("Tool {} failed: {:#}", name, e);
                (json!({ "error": LensError::Internal(e).to_string() }), true)
            }
        },
    };
    state.metrics.record_call(latency_us, is_error);
    tracing::debug!("-> {} ({}us, is_error={})", name, latency_us, is_error);

    let text = serde_json::to_string_pretty(&value).unwrap_or_default();
    RpcResponse::success(
        id,
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": value,
            "isError": is_error
        }),
    )
}
