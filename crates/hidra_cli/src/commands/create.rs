//! Create command - Provision CI/CD into a project.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use hidra_core::{CoreError, ProvisionPlan, ProvisionRequest, Provisioner, RemoteTemplateSource};
use hidra_gitlab::{FileAction, ReconcileReport, Reconciler, ResourceAction, VariableAction};
use hidra_templates::{DirectorySource, TemplateSource};

use super::{connect, template_repo, CliContext};

#[derive(Args)]
pub struct CreateArgs {
    /// Provisioning request file (YAML)
    pub request: PathBuf,

    /// Create the project (and missing groups) when it does not exist
    #[arg(long)]
    pub create_project: bool,

    /// Read templates from a local directory instead of GitLab
    #[arg(long)]
    pub templates_dir: Option<PathBuf>,

    /// Render and print the plan without writing to GitLab
    #[arg(long)]
    pub dry_run: bool,

    /// Print the dry-run plan as JSON
    #[arg(long, requires = "dry_run")]
    pub json: bool,
}

/// Read the request and reject it before anything talks to GitLab.
fn load_request(args: &CreateArgs) -> Result<ProvisionRequest> {
    let mut request = ProvisionRequest::from_file(&args.request)?;
    if args.create_project {
        request.create_project = true;
    }
    request.validate().map_err(CoreError::Validation)?;
    Ok(request)
}

pub async fn execute(args: CreateArgs, context: &CliContext) -> Result<()> {
    let request = load_request(&args)?;

    info!("Provisioning {} from {:?}", request.project_path, args.request);

    let config = if args.dry_run && args.templates_dir.is_some() {
        context.load_config()?
    } else {
        context.require_config()?
    };

    let source: Box<dyn TemplateSource> = match &args.templates_dir {
        Some(dir) => Box::new(DirectorySource::new(dir)),
        None => {
            let repo = template_repo(&config)?;
            Box::new(
                RemoteTemplateSource::connect(connect(&config)?, repo, &config.template_ref)
                    .await
                    .with_context(|| format!("Template repository '{}' not found", repo))?,
            )
        }
    };

    let mut provisioner = Provisioner::new(&*source);
    if let Some(repo) = &config.template_repo {
        provisioner = provisioner.with_template_repo(repo);
    }

    if args.dry_run {
        let plan = provisioner.plan(&request).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            print_plan(&plan);
        }
        return Ok(());
    }

    let client = connect(&config)?;
    let reconciler = Reconciler::new(client)
        .with_retry(config.retry.to_policy())
        .with_branch(&config.target_branch);

    println!("🚀 Provisioning {}...", request.project_path);
    let outcome = provisioner.provision(&request, &reconciler).await?;

    print_warnings(&outcome.plan);
    print_report(&outcome.report);
    let web_url = outcome
        .report
        .project
        .as_ref()
        .map(|p| p.project.web_url.as_str());
    print_placeholders(&outcome.plan, web_url);

    Ok(())
}

fn print_warnings(plan: &ProvisionPlan) {
    for warning in &plan.warnings {
        println!("⚠️  {}", warning);
    }
    for fallback in &plan.fallbacks {
        println!("⚠️  {} kept unrendered: {}", fallback.path, fallback.message);
    }
}

fn print_plan(plan: &ProvisionPlan) {
    println!("📋 Plan for {} (dry run)", plan.state.project.path);
    println!();
    println!(
        "Templates: {} ({} value(s), {} secret(s))",
        plan.template_count,
        plan.classification.template_time.len(),
        plan.classification.deploy_time.len()
    );
    print_warnings(plan);

    println!();
    println!("Files:");
    for (path, content) in &plan.state.files {
        println!("  📄 {} ({} bytes)", path, content.len());
    }

    println!();
    println!("Variables:");
    for (key, spec) in &plan.state.variables {
        let value = if spec.masked {
            "********"
        } else {
            spec.value.as_str()
        };
        let mut flags = Vec::new();
        if spec.protected {
            flags.push("protected");
        }
        if spec.masked {
            flags.push("masked");
        }
        if spec.placeholder {
            flags.push("placeholder");
        }
        println!("  🔧 {} = {} {:?}", key, value, flags);
    }

    if !plan.includes.is_empty() {
        println!();
        println!("Remote includes: {}", plan.includes.join(", "));
    }
}

fn print_report(report: &ReconcileReport) {
    println!();
    for group in &report.groups {
        let icon = match group.action {
            ResourceAction::Created => "🆕",
            ResourceAction::Found => "✓",
        };
        println!("  {} group {}", icon, group.full_path);
    }
    if let Some(project) = &report.project {
        let icon = match project.action {
            ResourceAction::Created => "🆕",
            ResourceAction::Found => "✓",
        };
        println!("  {} project {}", icon, project.project.path_with_namespace);
    }
    for file in &report.files {
        let icon = match file.action {
            FileAction::Created => "🆕",
            FileAction::Updated => "✏️ ",
            FileAction::Unchanged => "✓",
        };
        println!("  {} {}", icon, file.path);
    }
    for variable in &report.variables {
        let icon = match variable.action {
            VariableAction::Created => "🆕",
            VariableAction::Updated => "✏️ ",
            VariableAction::Unchanged | VariableAction::KeptExisting => "✓",
        };
        let lock = if variable.masked { " 🔒" } else { "" };
        println!("  {} {}{}", icon, variable.key, lock);
    }
    for warning in &report.warnings {
        println!("⚠️  {}", warning);
    }

    println!();
    if report.is_noop() {
        println!("✅ Everything already up to date");
    } else {
        println!("✅ Provisioned with {} change(s)", report.write_count());
    }
}

fn print_placeholders(plan: &ProvisionPlan, web_url: Option<&str>) {
    let placeholders = plan.placeholders();
    if placeholders.is_empty() {
        return;
    }
    println!();
    println!(
        "⚠️  {} variable(s) hold a placeholder value:",
        placeholders.len()
    );
    for key in placeholders {
        println!("  • {}", key);
    }
    if let Some(url) = web_url {
        println!();
        println!("Set them in: {}/-/settings/ci_cd", url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidra_core::{ConfigStore, HidraConfig};
    use tempfile::tempdir;

    const INVALID_REQUEST: &str = r#"
project_path: /acme//shop
runner_tags: []
components:
  - name: Web_App
    port: 0
"#;

    fn args(request: PathBuf) -> CreateArgs {
        CreateArgs {
            request,
            create_project: true,
            templates_dir: None,
            dry_run: false,
            json: false,
        }
    }

    #[test]
    fn test_invalid_request_is_rejected_with_every_problem() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("request.yaml");
        std::fs::write(&path, INVALID_REQUEST).unwrap();

        let err = load_request(&args(path)).unwrap_err();
        match err.downcast_ref::<CoreError>() {
            Some(CoreError::Validation(errors)) => assert!(errors.len() >= 4),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_request_fails_before_connecting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("request.yaml");
        std::fs::write(&path, INVALID_REQUEST).unwrap();

        // Nothing listens on the discard port; reaching it would be a request error
        let store = ConfigStore::new(dir.path().join("config"));
        store
            .save(&HidraConfig {
                gitlab_url: Some("http://127.0.0.1:9".to_string()),
                template_repo: Some("platform/templates".to_string()),
                ..Default::default()
            })
            .unwrap();
        store.save_token("glpat-test").unwrap();
        let context = CliContext {
            config_dir: Some(store.dir().to_path_buf()),
        };

        let err = execute(args(path), &context).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::Validation(_))
        ));
    }
}
