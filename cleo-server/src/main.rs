mod telemetry;
mod stdio;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cleo_core::config::Config;
use cleo_core::models::GateEnforcement;
use cleo_core::store::Store;
use cleo_dispatch::CleoDispatcher;
use cleo_engine::GraphConfig;
use cleo_store::SqliteStore;
use stdio::StdioRpcServer;
use telemetry::{init_telemetry, log_config_validation, log_startup_info};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cleo-server")]
#[command(about = "CLEO dispatch RPC server (stdio transport)")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Project root directory; holds the `.cleo/` state directory
    #[arg(long, env = "PROJECT_ROOT", default_value = ".")]
    project_root: PathBuf,

    /// Database URL override (defaults to `.cleo/cleo.sqlite` under the project root)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Log level override
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Lifecycle gate enforcement mode override
    #[arg(long, value_enum)]
    enforcement: Option<EnforcementArg>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum EnforcementArg {
    Strict,
    Advisory,
    Off,
}

impl From<EnforcementArg> for GateEnforcement {
    fn from(value: EnforcementArg) -> Self {
        match value {
            EnforcementArg::Strict => GateEnforcement::Strict,
            EnforcementArg::Advisory => GateEnforcement::Advisory,
            EnforcementArg::Off => GateEnforcement::Off,
        }
    }
}

fn ensure_state_directory(project_root: &Path) -> Result<()> {
    let cleo_dir = project_root.join(".cleo");
    std::fs::create_dir_all(&cleo_dir)
        .with_context(|| format!("failed to create state directory: {cleo_dir:?}"))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = Config::load(Some(&cli.project_root)).context("failed to load configuration")?;

    if let Some(ref database_url) = cli.database_url {
        config.database.url = Some(database_url.clone());
    }
    if let Some(ref log_level) = cli.log_level {
        config.logging.level = log_level.clone();
    }

    init_telemetry(&config.logging).context("failed to initialize telemetry")?;
    log_config_validation(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration validation failed");
        std::process::exit(1);
    }

    log_startup_info(&cli.project_root, &config);

    ensure_state_directory(&cli.project_root).context("failed to create project state directory")?;

    let database_url = config.database_url(&cli.project_root);
    let store = Arc::new(
        SqliteStore::connect(&database_url)
            .await
            .context("failed to connect to the store")?,
    );
    store.migrate().await.context("failed to run migrations")?;

    let enforcement = cli
        .enforcement
        .map(GateEnforcement::from)
        .unwrap_or(GateEnforcement::Strict);

    let dispatcher = Arc::new(CleoDispatcher::new(
        store,
        GraphConfig::default(),
        cli.project_root.join(".cleo").join("rcasd"),
        enforcement,
    ));

    info!("cleo-server starting");

    let server = StdioRpcServer::new(dispatcher);
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
            let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                .expect("failed to register SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
                _ = sigint.recv() => info!("received SIGINT, initiating graceful shutdown"),
            }
        }

        #[cfg(windows)]
        {
            tokio::signal::ctrl_c().await.expect("failed to listen for ctrl+c");
            info!("received Ctrl+C, initiating graceful shutdown");
        }

        shutdown.cancel();
    });

    server.serve().await.context("stdio server failed")?;

    info!("cleo-server shut down cleanly");
    Ok(())
}
