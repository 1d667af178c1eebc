//! Thin CLI frontend (§6 "CLI"): argv -> `dispatch(...)` -> printed result.
//!
//! The real argv surface (subcommands per domain, flag parsing per
//! operation, TTY-aware text rendering) is an external collaborator per §1;
//! this binary accepts a dotted operation name and a JSON params blob
//! directly so the dispatch contract is exercisable without that layer.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cleo_core::config::Config;
use cleo_core::dispatch::{DispatchContext, DispatchResult};
use cleo_core::models::GateEnforcement;
use cleo_core::store::Store;
use cleo_dispatch::CleoDispatcher;
use cleo_engine::GraphConfig;
use cleo_store::SqliteStore;

/// Dispatch a single CLEO operation and print the JSON result.
#[derive(Parser)]
#[command(name = "cleo", version, about)]
struct Cli {
    /// Dotted operation name, e.g. `tasks.add` or `orchestrate.ready`
    operation: String,

    /// JSON-encoded parameters for the operation
    #[arg(long, default_value = "{}")]
    params: String,

    /// Project root directory; holds the `.cleo/` state directory
    #[arg(long, env = "PROJECT_ROOT", default_value = ".")]
    project_root: PathBuf,

    /// Active session id to attach to the dispatch context
    #[arg(long)]
    session_id: Option<i64>,

    /// Agent identifier to attach to the dispatch context
    #[arg(long)]
    agent_id: Option<String>,

    /// Record this query in the audit log too (grade mode)
    #[arg(long)]
    grade_mode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
    ).init();

    let cli = Cli::parse();

    let config = Config::load(Some(&cli.project_root)).context("failed to load configuration")?;
    let database_url = config.database_url(&cli.project_root);

    let store = Arc::new(
        SqliteStore::connect(&database_url)
            .await
            .context("failed to connect to the store")?,
    );
    store.migrate().await.context("failed to run migrations")?;

    let dispatcher = CleoDispatcher::new(
        store,
        GraphConfig::default(),
        cli.project_root.join(".cleo").join("rcasd"),
        GateEnforcement::Strict,
    );

    let params: serde_json::Value = serde_json::from_str(&cli.params).context("--params must be valid JSON")?;

    let ctx = DispatchContext {
        session_id: cli.session_id,
        agent_id: cli.agent_id,
        grade_mode: cli.grade_mode,
        cancellation: tokio_util::sync::CancellationToken::new(),
    };

    let result = dispatcher.dispatch_wire(&cli.operation, params, ctx).await;

    let exit_code = match &result {
        DispatchResult::Ok { .. } => 0,
        DispatchResult::Err { error } => error.exit_code,
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    std::process::exit(exit_code);
}
