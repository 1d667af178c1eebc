//! Line-delimited JSON request/response loop over stdio (§6 "RPC server").
//!
//! Each line in is `{"operation": "tasks.add", "params": {...}, "session_id":
//! 1, "agent_id": "...", "grade_mode": false}`; each line out is a
//! [`cleo_core::dispatch::DispatchResult`]. The MCP handshake and tool
//! schemas a real client integration needs are a separate concern this
//! crate does not implement.

use std::sync::Arc;

use anyhow::{Context, Result};
use cleo_core::dispatch::DispatchContext;
use cleo_core::store::Store;
use cleo_dispatch::CleoDispatcher;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    operation: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    session_id: Option<i64>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    grade_mode: bool,
}

pub struct StdioRpcServer<S: Store> {
    dispatcher: Arc<CleoDispatcher<S>>,
    shutdown: CancellationToken,
}

impl<S: Store + 'static> StdioRpcServer<S> {
    pub fn new(dispatcher: Arc<CleoDispatcher<S>>) -> Self {
        Self { dispatcher, shutdown: CancellationToken::new() }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn serve(self) -> Result<()> {
        info!("cleo-server ready, reading requests from stdin");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, stopping stdio loop");
                    break;
                }
                read = reader.read_line(&mut line) => {
                    match read {
                        Ok(0) => {
                            info!("stdin closed, shutting down");
                            break;
                        }
                        Ok(_) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            debug!(request = trimmed, "received request");

                            let response = self.handle_line(trimmed).await;
                            let response_json = serde_json::to_string(&response)
                                .context("failed to serialize dispatch result")?;

                            stdout.write_all(response_json.as_bytes()).await
                                .context("failed to write response")?;
                            stdout.write_all(b"\n").await.context("failed to write newline")?;
                            stdout.flush().await.context("failed to flush stdout")?;
                        }
                        Err(e) => {
                            error!(error = %e, "error reading from stdin");
                            break;
                        }
                    }
                }
            }
        }

        info!("cleo-server stdio loop finished");
        Ok(())
    }

    async fn handle_line(&self, line: &str) -> cleo_core::dispatch::DispatchResult {
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(err) => {
                return cleo_core::dispatch::DispatchResult::err(&cleo_core::error::CleoError::invalid_input(
                    format!("malformed request: {err}"),
                ));
            }
        };

        let ctx = DispatchContext {
            session_id: request.session_id,
            agent_id: request.agent_id,
            grade_mode: request.grade_mode,
            cancellation: self.shutdown.clone(),
        };

        self.dispatcher.dispatch_wire(&request.operation, request.params, ctx).await
    }
}
