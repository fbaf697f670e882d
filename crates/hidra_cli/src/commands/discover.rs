//! Discover command - List runners and cluster agents.

use anyhow::Result;
use clap::Args;
use tracing::info;

use hidra_gitlab::{default_runner_index, discover_cluster_agents, discover_runners};

use super::{connect, CliContext};

#[derive(Args)]
pub struct DiscoverArgs {
    /// Also look at the groups and runners of this project
    #[arg(long)]
    project: Option<String>,

    /// Tags the proposed default runner must carry
    #[arg(long, value_delimiter = ',')]
    default_tags: Vec<String>,
}

pub async fn execute(args: DiscoverArgs, context: &CliContext) -> Result<()> {
    let config = context.require_config()?;
    let client = connect(&config)?;
    let template_repo = config.template_repo.as_deref();
    let project = args.project.as_deref();

    info!("Discovering runners and cluster agents");

    let runners = discover_runners(&*client, template_repo, project).await;
    println!("🏃 Runners ({}):", runners.items.len());
    if runners.items.is_empty() {
        println!("   (none with tags)");
    } else {
        let default = default_runner_index(&runners.items, &args.default_tags);
        for (i, runner) in runners.items.iter().enumerate() {
            let marker = if i == default { "→" } else { " " };
            let state = if runner.online { "online" } else { runner.status.as_str() };
            println!(
                " {} #{} {} [{}] ({})",
                marker,
                runner.id,
                runner.description,
                runner.tags.join(", "),
                state
            );
        }
    }
    for error in &runners.errors {
        println!("   ⚠️  {}", error);
    }

    let agents = discover_cluster_agents(&*client, template_repo, project).await;
    println!();
    println!("☸️  Cluster agents ({}):", agents.items.len());
    if agents.items.is_empty() {
        println!("   (none) - KUBE_CONTEXT defaults to <template repo>:cluster-<env>");
    }
    for agent in &agents.items {
        println!("   • {} ({})", agent.context, agent.config_project);
    }
    for error in &agents.errors {
        println!("   ⚠️  {}", error);
    }

    Ok(())
}
