//! Dispatch client example.
//!
//! Demonstrates driving `cleo-server` as a child process over its
//! line-delimited JSON stdio protocol (§6 "RPC server"): each line in is a
//! request envelope, each line out is a `DispatchResult`.

use serde_json::{json, Value};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

struct DispatchClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    request_counter: u64,
}

impl DispatchClient {
    fn spawn(project_root: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut child = Command::new(env!("CARGO_BIN_EXE_cleo-server"))
            .arg("--project-root")
            .arg(project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));

        Ok(Self { child, stdin, stdout, request_counter: 0 })
    }

    async fn call(&mut self, operation: &str, params: Value) -> Result<Value, Box<dyn std::error::Error>> {
        self.request_counter += 1;
        let request = json!({ "operation": operation, "params": params });

        println!("-> {operation} {params}");
        self.stdin.write_all(serde_json::to_string(&request)?.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;

        let mut line = String::new();
        self.stdout.read_line(&mut line).await?;
        let response: Value = serde_json::from_str(line.trim())?;
        println!("<- {response}");
        Ok(response)
    }

    async fn shutdown(mut self) -> Result<(), Box<dyn std::error::Error>> {
        drop(self.stdin);
        self.child.wait().await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = DispatchClient::spawn(".")?;

    client.call("admin.health", json!({})).await?;

    let added = client
        .call(
            "tasks.add",
            json!({ "title": "wire up the widget service", "description": "stand up the new widget microservice" }),
        )
        .await?;
    let task_id = added["data"]["id"].as_str().unwrap_or("T001").to_string();

    client.call("tasks.show", json!({ "id": task_id })).await?;
    client.call("tasks.list", json!({})).await?;
    client.call("tasks.getExecutionWaves", json!({})).await?;

    client
        .call("session.start", json!({ "scope": "project:" }))
        .await?;
    client.call("tasks.start", json!({ "id": task_id })).await?;
    client.call("session.status", json!({})).await?;
    client.call("session.end", json!({})).await?;

    client.call("tasks.teleport", json!({})).await?;

    client.shutdown().await?;
    Ok(())
}
