//! Hierarchical configuration merge (§6): CLI/RPC parameters (applied by
//! the caller after loading) > `CLEO_*` environment variables > per-project
//! config > per-user global config > built-in defaults. Follows the
//! grounding repository's `mcp-server/src/config.rs` layering, swapping the
//! `MCP_` prefix for `CLEO_` and adding the project/user file tiers the
//! distilled spec calls out explicitly.

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    pub default_format: String,
    pub show_color: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub retention_days: u32,
    pub retain_labels: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VerificationConfig {
    pub enabled: bool,
    pub required_gates: Vec<String>,
    pub max_rounds: u32,
    pub require_for_parent_auto_complete: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    pub max_active: u32,
    pub timeout_minutes: u32,
    pub suspend_on_idle: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ValidationConfig {
    pub strict_mode: bool,
    pub enforcement_mode: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CliConfig {
    pub tty_auto_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub output: OutputConfig,
    pub archive: ArchiveConfig,
    pub verification: VerificationConfig,
    pub session: SessionConfig,
    pub validation: ValidationConfig,
    pub cli: CliConfig,
}

const DEFAULTS_TOML: &str = include_str!("../config/default.toml");

impl Config {
    /// Load the default tier, then the per-user global config, then the
    /// per-project config, then `CLEO_*` environment overrides, in that
    /// increasing-precedence order (§6).
    pub fn load(project_root: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = ConfigBuilder::builder()
            .add_source(File::from_str(DEFAULTS_TOML, FileFormat::Toml));

        if let Some(user_config) = Self::user_config_path() {
            builder = builder.add_source(
                File::from(user_config).required(false).format(FileFormat::Toml),
            );
        }

        if let Some(root) = project_root {
            let project_config = root.join(".cleo").join("config.toml");
            builder = builder.add_source(
                File::from(project_config).required(false).format(FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("CLEO").separator("_").try_parsing(true),
        );

        let built = builder.build()?;
        let config: Config = built.try_deserialize()?;
        Ok(config)
    }

    fn user_config_path() -> Option<std::path::PathBuf> {
        dirs_home().map(|home| home.join(".cleo").join("config.toml"))
    }

    pub fn database_url(&self, project_root: &Path) -> String {
        self.database.url.clone().unwrap_or_else(|| {
            format!(
                "sqlite://{}",
                project_root.join(".cleo").join("cleo.sqlite").display()
            )
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("invalid log level: {other}"),
        }
        if self.session.max_active != 1 {
            anyhow::bail!("session.maxActive must be 1 (single-writer invariant)");
        }
        Ok(())
    }
}

fn dirs_home() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(std::path::PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_and_validate() {
        let config = Config::load(None).expect("defaults parse");
        assert!(config.validate().is_ok());
        assert_eq!(config.session.max_active, 1);
    }
}
