//! Error types for the core module.

use std::path::PathBuf;

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while provisioning.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid provisioning request: {}", format_validation(.0))]
    Validation(Vec<ValidationError>),

    #[error("Could not read request {path}: {message}")]
    Request { path: PathBuf, message: String },

    #[error("Not configured: {0}. Run 'hidraulik init' first")]
    NotConfigured(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template error: {0}")]
    Template(#[from] hidra_templates::TemplateError),

    #[error("GitLab API error: {0}")]
    Api(#[from] hidra_gitlab::ApiError),

    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] hidra_gitlab::ReconcileError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ValidationError> for CoreError {
    fn from(error: ValidationError) -> Self {
        CoreError::Validation(vec![error])
    }
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine home directory")]
    NoHomeDirectory,

    #[error("Invalid configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Could not serialize configuration: {0}")]
    Serialize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
