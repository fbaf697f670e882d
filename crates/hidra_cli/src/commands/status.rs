//! Status command - Show the CI/CD status of a project.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use hidra_gitlab::project_status;

use super::{connect, CliContext};

#[derive(Args)]
pub struct StatusArgs {
    /// Project path (e.g. group/project)
    project: String,
}

pub async fn execute(args: StatusArgs, context: &CliContext) -> Result<()> {
    let config = context.require_config()?;
    let client = connect(&config)?;

    info!("Reading status of {}", args.project);

    let status = project_status(&*client, &args.project)
        .await
        .with_context(|| format!("Failed to read project '{}'", args.project))?;

    println!("📊 CI/CD status: {}", status.project_path);
    println!("   {}", status.web_url);
    println!();

    match &status.latest_pipeline {
        Some(pipeline) => {
            let icon = match pipeline.status.as_str() {
                "success" => "✅",
                "failed" => "❌",
                "running" | "pending" => "⏳",
                _ => "⚪",
            };
            println!("Latest pipeline: {} {}", icon, pipeline.status);
            println!("   Ref: {}", pipeline.git_ref);
            println!("   URL: {}", pipeline.web_url);
        }
        None => println!("⚠️  No pipelines found"),
    }

    println!();
    println!("CI/CD variables:");
    if status.variables.is_empty() {
        println!("   (none)");
    }
    for (key, scope) in &status.variables {
        println!("   • {} [{}]", key, scope);
    }

    for error in &status.errors {
        println!("⚠️  {}", error);
        if error.error.is_permission_denied() {
            println!("   The token cannot read this information");
        }
    }

    Ok(())
}
