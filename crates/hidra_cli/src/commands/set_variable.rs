//! Set-variable command - Create or update one CI/CD variable.

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use hidra_core::validate_variable_name;
use hidra_gitlab::{
    Reconciler, RemoteClient, VariableAction, VariableKey, VariableSpec, ALL_ENVIRONMENTS,
};

use super::{connect, CliContext};

#[derive(Args)]
pub struct SetVariableArgs {
    /// Project path (e.g. group/project)
    pub project: String,

    /// Variable name
    pub key: String,

    /// Variable value
    pub value: String,

    /// Only expose the variable to protected branches and tags
    #[arg(long)]
    pub protected: bool,

    /// Mask the value in job logs
    #[arg(long)]
    pub masked: bool,

    /// Environment scope
    #[arg(long, default_value = ALL_ENVIRONMENTS)]
    pub scope: String,
}

pub async fn execute(args: SetVariableArgs, context: &CliContext) -> Result<()> {
    validate_variable_name(&args.key)?;

    let config = context.require_config()?;
    let client = connect(&config)?;

    let project = client
        .get_project_by_path(&args.project)
        .await
        .with_context(|| format!("Project '{}' not found", args.project))?;

    let key = VariableKey::new(&args.key, &args.scope);
    let spec = VariableSpec::new(&args.value)
        .protected(args.protected)
        .masked(args.masked);

    info!("Setting {} on {}", key, project.path_with_namespace);

    let current = match client.list_variables(project.id).await {
        Ok(variables) => variables
            .into_iter()
            .find(|v| v.matches(&key.name, &key.scope)),
        Err(e) if e.is_permission_denied() => {
            warn!("Cannot list variables ({}); writing without comparison", e);
            None
        }
        Err(e) => return Err(e).context("Failed to list variables"),
    };

    let reconciler =
        Reconciler::new(client.clone()).with_retry(config.retry.to_policy());
    let action = reconciler
        .apply_variable(project.id, &key, &spec, current.as_ref())
        .await?;

    match action {
        VariableAction::Created => println!("✅ Variable {} created", key),
        VariableAction::Updated => println!("✅ Variable {} updated", key),
        VariableAction::Unchanged | VariableAction::KeptExisting => {
            println!("✅ Variable {} already up to date", key)
        }
    }

    Ok(())
}
