//! List-templates command - Show the templates of the template repository.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use hidra_core::RemoteTemplateSource;
use hidra_templates::{DirectorySource, TemplateLoader, TemplateSource, VariableClassifier};

use super::{connect, template_repo, CliContext};

#[derive(Args)]
pub struct ListTemplatesArgs {
    /// Read templates from a local directory instead of GitLab
    #[arg(long)]
    templates_dir: Option<PathBuf>,

    /// Also show the variables each template uses
    #[arg(long)]
    variables: bool,
}

pub async fn execute(args: ListTemplatesArgs, context: &CliContext) -> Result<()> {
    let source: Box<dyn TemplateSource> = match &args.templates_dir {
        Some(dir) => {
            info!("Listing templates in {:?}", dir);
            println!("📁 Templates in: {}", dir.display());
            Box::new(DirectorySource::new(dir))
        }
        None => {
            let config = context.require_config()?;
            let repo = template_repo(&config)?;
            println!("📁 Templates in: {} ({})", repo, config.template_ref);
            Box::new(
                RemoteTemplateSource::connect(connect(&config)?, repo, &config.template_ref)
                    .await
                    .with_context(|| format!("Template repository '{}' not found", repo))?,
            )
        }
    };

    let loader = TemplateLoader::new(&*source);
    let set = loader.load_all().await.context("Failed to load templates")?;

    if set.is_empty() {
        println!("⚠️  No templates found");
        return Ok(());
    }

    println!("\n✅ Found {} template(s):\n", set.len());
    let classifier = VariableClassifier::new();
    for template in set.iter() {
        println!(
            "  • {} → {} ({})",
            template.source_path, template.dest_path, template.category
        );
        if args.variables {
            let classification = classifier.classify([template.body.as_str()]);
            if !classification.template_time.is_empty() {
                println!("      values:  {}", classification.template_time.join(", "));
            }
            if !classification.deploy_time.is_empty() {
                println!("      secrets: {}", classification.deploy_time.join(", "));
            }
        }
    }

    let includes = loader.list_includes().await.unwrap_or_default();
    if !includes.is_empty() {
        println!("\n📎 Remote includes:");
        for include in includes {
            println!("  • {}", include);
        }
    }

    Ok(())
}
