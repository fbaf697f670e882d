//! CLI command definitions.
//!
//! This module defines the command structure for the Hidraulik CLI and the
//! helpers shared by the commands for loading configuration and connecting
//! to GitLab.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hidra_core::{ConfigStore, CoreError, HidraConfig, CONFIG_DIR_ENV};
use hidra_gitlab::GitLabClient;

pub mod create;
pub mod discover;
pub mod init;
pub mod list_templates;
pub mod set_variable;
pub mod status;

/// Hidraulik - GitLab CI/CD provisioning from shared templates
#[derive(Parser)]
#[command(name = "hidraulik")]
#[command(version, about = "Hidraulik - GitLab CI/CD provisioning from shared templates")]
#[command(long_about = r#"
Hidraulik renders the templates of a shared repository for one project and
applies pipelines, Kubernetes manifests and CI/CD variables to GitLab.
Running it again only updates what changed.

COMMANDS:
  init            → Store GitLab URL, template repository and token
  create          → Provision a project from a request file
  status          → Show the latest pipeline and variables of a project
  set-variable    → Create or update one CI/CD variable
  list-templates  → List the templates of the template repository
  discover        → List runners and cluster agents

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or configuration
  3 - Validation failure
  4 - Template error
  5 - GitLab API error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Configuration directory (defaults to ~/.hidraulik)
    #[arg(long, global = true, env = CONFIG_DIR_ENV)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn context(&self) -> CliContext {
        CliContext {
            config_dir: self.config_dir.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store the GitLab connection and verify it
    Init(init::InitArgs),

    /// Provision CI/CD into a project from a request file
    Create(create::CreateArgs),

    /// Show the CI/CD status of a project
    Status(status::StatusArgs),

    /// Create or update a CI/CD variable
    #[command(name = "set-variable")]
    SetVariable(set_variable::SetVariableArgs),

    /// List the available templates
    #[command(name = "list-templates")]
    ListTemplates(list_templates::ListTemplatesArgs),

    /// Discover runners and cluster agents
    Discover(discover::DiscoverArgs),
}

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct CliContext {
    pub config_dir: Option<PathBuf>,
}

impl CliContext {
    pub fn store(&self) -> Result<ConfigStore> {
        ConfigStore::locate(self.config_dir.clone()).context("Failed to locate configuration")
    }

    pub fn load_config(&self) -> Result<HidraConfig> {
        let store = self.store()?;
        store
            .load()
            .with_context(|| format!("Failed to load configuration from {}", store.dir().display()))
    }

    /// Load the configuration and require it to be complete.
    pub fn require_config(&self) -> Result<HidraConfig> {
        let config = self.load_config()?;
        if !config.is_configured() {
            return Err(CoreError::NotConfigured(format!(
                "missing {}",
                config.missing().join(", ")
            ))
            .into());
        }
        Ok(config)
    }
}

/// GitLab client for a complete configuration.
pub fn connect(config: &HidraConfig) -> Result<Arc<GitLabClient>> {
    match (&config.gitlab_url, &config.token) {
        (Some(url), Some(token)) => Ok(Arc::new(GitLabClient::new(url, token))),
        _ => Err(CoreError::NotConfigured("missing gitlab_url or token".to_string()).into()),
    }
}

/// Template repository of a complete configuration.
pub fn template_repo(config: &HidraConfig) -> Result<&str> {
    config
        .template_repo
        .as_deref()
        .ok_or_else(|| CoreError::NotConfigured("missing template_repo".to_string()).into())
}
