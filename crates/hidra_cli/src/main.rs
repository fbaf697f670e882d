//! Hidraulik CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or configuration
//! - 3: Validation failure
//! - 4: Template error
//! - 5: GitLab API or reconciliation error

use std::process::ExitCode;

use clap::Parser;
use hidra_core::{ConfigError, CoreError, ValidationError};
use hidra_gitlab::{ApiError, ReconcileError};
use hidra_templates::TemplateError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands, LogFormat};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const TEMPLATE_ERROR: u8 = 4;
    pub const REMOTE_ERROR: u8 = 5;
}

fn init_logging(verbose: bool, format: LogFormat) {
    let default_directives = if verbose {
        "hidra=debug,info"
    } else {
        "hidra=info,warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry();
    let log_result = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false))
            .with(filter)
            .try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).with(filter).try_init(),
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let context = cli.context();
    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, &context).await,
        Commands::Create(args) => commands::create::execute(args, &context).await,
        Commands::Status(args) => commands::status::execute(args, &context).await,
        Commands::SetVariable(args) => commands::set_variable::execute(args, &context).await,
        Commands::ListTemplates(args) => commands::list_templates::execute(args, &context).await,
        Commands::Discover(args) => commands::discover::execute(args, &context).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            if let Some(hint) = remediation_hint(&e) {
                eprintln!("💡 {}", hint);
            }
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(core) = cause.downcast_ref::<CoreError>() {
            return match core {
                CoreError::Validation(_) => ExitCodes::VALIDATION_FAILURE,
                CoreError::Request { .. } | CoreError::NotConfigured(_) | CoreError::Config(_) => {
                    ExitCodes::INVALID_ARGS
                }
                CoreError::Template(_) => ExitCodes::TEMPLATE_ERROR,
                CoreError::Api(_) | CoreError::Reconcile(_) => ExitCodes::REMOTE_ERROR,
                CoreError::Io(_) => ExitCodes::GENERAL_ERROR,
            };
        }
        if cause.is::<ValidationError>() {
            return ExitCodes::VALIDATION_FAILURE;
        }
        if cause.is::<ConfigError>() {
            return ExitCodes::INVALID_ARGS;
        }
        if cause.is::<TemplateError>() {
            return ExitCodes::TEMPLATE_ERROR;
        }
        if cause.is::<ApiError>() || cause.is::<ReconcileError>() {
            return ExitCodes::REMOTE_ERROR;
        }
    }
    ExitCodes::GENERAL_ERROR
}

/// Remediation hint for remote errors.
fn remediation_hint(e: &anyhow::Error) -> Option<String> {
    for cause in e.chain() {
        let reconcile = cause.downcast_ref::<ReconcileError>().or_else(|| {
            match cause.downcast_ref::<CoreError>() {
                Some(CoreError::Reconcile(inner)) => Some(inner),
                _ => None,
            }
        });
        if let Some(hint) = reconcile.and_then(ReconcileError::hint) {
            return Some(hint.to_string());
        }

        let api = cause.downcast_ref::<ApiError>().or_else(|| {
            match cause.downcast_ref::<CoreError>() {
                Some(CoreError::Api(inner)) => Some(inner),
                _ => None,
            }
        });
        if let Some(ApiError::Unauthorized(_)) = api {
            return Some("Token invalid or expired. Run 'hidraulik init' to reconfigure".to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_categorize_error() {
        let validation = anyhow::Error::new(CoreError::Validation(vec![ValidationError::new(
            "port", "0", "out of range",
        )]));
        assert_eq!(categorize_error(&validation), ExitCodes::VALIDATION_FAILURE);

        let remote = anyhow::Error::new(ApiError::Forbidden("403".to_string()))
            .context("Failed to read project");
        assert_eq!(categorize_error(&remote), ExitCodes::REMOTE_ERROR);

        let template: anyhow::Result<()> =
            Err(TemplateError::NotFound("x".to_string())).context("Failed to load templates");
        assert_eq!(
            categorize_error(&template.unwrap_err()),
            ExitCodes::TEMPLATE_ERROR
        );

        let config = anyhow::Error::new(CoreError::NotConfigured("token".to_string()));
        assert_eq!(categorize_error(&config), ExitCodes::INVALID_ARGS);

        assert_eq!(
            categorize_error(&anyhow::anyhow!("boom")),
            ExitCodes::GENERAL_ERROR
        );
    }

    #[test]
    fn test_remediation_hint() {
        let missing = anyhow::Error::new(CoreError::Reconcile(ReconcileError::ProjectNotFound {
            path: "team/api".to_string(),
            hint: "use --create-project to create it".to_string(),
        }));
        assert_eq!(
            remediation_hint(&missing).as_deref(),
            Some("use --create-project to create it")
        );

        let unauthorized = anyhow::Error::new(ApiError::Unauthorized("401".to_string()));
        assert!(remediation_hint(&unauthorized).is_some());
        assert!(remediation_hint(&anyhow::anyhow!("boom")).is_none());
    }
}
