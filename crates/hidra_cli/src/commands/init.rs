//! Init command - Store and verify the GitLab connection.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use hidra_core::{normalize_url, CoreError, TOKEN_ENV};
use hidra_gitlab::RemoteClient;

use super::{connect, CliContext};

#[derive(Args)]
pub struct InitArgs {
    /// GitLab instance URL (e.g. https://gitlab.example.com)
    #[arg(long)]
    gitlab_url: Option<String>,

    /// Path of the template repository (e.g. platform/cicd-templates)
    #[arg(long)]
    template_repo: Option<String>,

    /// Personal access token with api scope
    #[arg(long, env = TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    /// Git ref templates are read from
    #[arg(long)]
    template_ref: Option<String>,

    /// Branch generated files are committed to
    #[arg(long)]
    target_branch: Option<String>,

    /// Save without contacting GitLab
    #[arg(long)]
    skip_verify: bool,
}

pub async fn execute(args: InitArgs, context: &CliContext) -> Result<()> {
    let store = context.store()?;
    let mut config = store.load_file().context("Failed to read existing configuration")?;

    info!("Initializing Hidraulik configuration in {:?}", store.dir());

    if let Some(url) = args.gitlab_url {
        config.gitlab_url = Some(normalize_url(&url));
    }
    if let Some(repo) = args.template_repo {
        config.template_repo = Some(repo.trim_matches('/').to_string());
    }
    if let Some(token) = args.token {
        config.token = Some(token.trim().to_string());
    }
    if let Some(template_ref) = args.template_ref {
        config.template_ref = template_ref;
    }
    if let Some(branch) = args.target_branch {
        config.target_branch = branch;
    }

    if !config.is_configured() {
        return Err(CoreError::NotConfigured(format!(
            "missing {} (pass --gitlab-url, --template-repo and --token)",
            config.missing().join(", ")
        ))
        .into());
    }

    if !args.skip_verify {
        let client = connect(&config)?;
        let user = client
            .current_user()
            .await
            .context("Failed to authenticate with GitLab")?;
        println!("✅ Authenticated as {}", user.username);

        let template_repo = config.template_repo.as_deref().unwrap_or_default();
        let project = client
            .get_project_by_path(template_repo)
            .await
            .with_context(|| format!("Template repository '{}' not accessible", template_repo))?;
        println!("✅ Template repository: {}", project.web_url);
    }

    let config_path = store.save(&config).context("Failed to save configuration")?;
    if let Some(token) = &config.token {
        store.save_token(token).context("Failed to save token")?;
    }

    println!("✅ Hidraulik configured!");
    println!();
    println!("Saved:");
    println!("  📄 {}", config_path.display());
    println!("  🔑 {}", store.token_path().display());
    println!();
    println!("Next steps:");
    println!("  hidraulik list-templates");
    println!("  hidraulik create request.yaml --dry-run");

    Ok(())
}
