//! Provisioning orchestration.
//!
//! Loads the templates, classifies their variables, renders them for the
//! request and turns the result into a [`DesiredResourceState`] that the
//! reconciler applies. [`Provisioner::plan`] never writes anything, which is
//! what `--dry-run` shows.

use std::collections::BTreeSet;

use hidra_gitlab::{DesiredResourceState, ReconcileReport, Reconciler, VariableKey};
use hidra_templates::{
    Classification, ManifestRouter, RenderFallback, TemplateLoader, TemplateRenderer,
    TemplateSource, VariableClassifier,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::request::ProvisionRequest;
use crate::validation::sanitize_file_path;

/// Everything a provisioning run would write.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionPlan {
    pub template_count: usize,
    pub classification: Classification,
    /// Remote includes referenced by the templates
    pub includes: Vec<String>,
    /// Variables the remote includes declare
    pub include_required: Vec<String>,
    /// Files rendered from their original text after a render error
    pub fallbacks: Vec<RenderFallback>,
    pub state: DesiredResourceState,
    pub warnings: Vec<String>,
}

impl ProvisionPlan {
    /// Placeholder variables the project owner still has to fill in.
    pub fn placeholders(&self) -> Vec<&VariableKey> {
        self.state
            .variables
            .iter()
            .filter(|(_, spec)| spec.placeholder)
            .map(|(key, _)| key)
            .collect()
    }
}

/// Result of an applied plan.
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub plan: ProvisionPlan,
    pub report: ReconcileReport,
}

/// Builds and applies provisioning plans from one template source.
pub struct Provisioner<'a> {
    source: &'a dyn TemplateSource,
    template_repo: Option<String>,
    classifier: VariableClassifier,
    renderer: TemplateRenderer,
}

impl<'a> Provisioner<'a> {
    pub fn new(source: &'a dyn TemplateSource) -> Self {
        Self {
            source,
            template_repo: None,
            classifier: VariableClassifier::new(),
            renderer: TemplateRenderer::new(),
        }
    }

    /// Template repository path, used for default cluster contexts.
    pub fn with_template_repo(mut self, template_repo: impl Into<String>) -> Self {
        self.template_repo = Some(template_repo.into());
        self
    }

    /// Validate the request and render everything it needs, without writing.
    pub async fn plan(&self, request: &ProvisionRequest) -> CoreResult<ProvisionPlan> {
        request.validate().map_err(CoreError::Validation)?;

        let template_repo = self.template_repo.as_deref();
        let mut warnings = Vec::new();

        let set = TemplateLoader::new(self.source).load_all().await?;
        if set.is_empty() {
            warnings.push("No templates found; only variables will be configured".to_string());
        }

        let classification = self.classifier.classify(set.bodies());
        debug!(
            "Classified {} template-time and {} deploy-time variable(s)",
            classification.template_time.len(),
            classification.deploy_time.len()
        );

        let bindings = request.render_bindings(template_repo);
        for name in &classification.template_time {
            if !bindings.contains_key(name) {
                warnings.push(format!("No value for template variable '{}'", name));
            }
        }

        let deploy_time: BTreeSet<String> = classification.deploy_time.iter().cloned().collect();
        let selection = request.manifest_selection();
        let output =
            ManifestRouter::new(&self.renderer, &selection).render_set(&set, &bindings, &deploy_time);

        let includes = self.classifier.remote_includes(set.bodies());
        let mut include_required = BTreeSet::new();
        for include in &includes {
            match self.source.get_template_content(include).await {
                Ok(content) => include_required.extend(self.classifier.required_by_include(&content)),
                Err(e) => warnings.push(format!("Could not read include {}: {}", include, e)),
            }
        }
        let include_required: Vec<String> = include_required.into_iter().collect();

        let mut state =
            DesiredResourceState::for_project(&request.project_path, request.create_project);
        for (path, content) in output.files {
            let path = sanitize_file_path(&path)?;
            state.files.insert(path, content);
        }
        request.add_variables(
            &mut state,
            &classification.deploy_time,
            &include_required,
            template_repo,
        );

        for message in &warnings {
            warn!("{}", message);
        }
        info!(
            "Planned {} file(s) and {} variable(s) for {}",
            state.files.len(),
            state.variables.len(),
            request.project_path
        );

        Ok(ProvisionPlan {
            template_count: set.len(),
            classification,
            includes,
            include_required,
            fallbacks: output.fallbacks,
            state,
            warnings,
        })
    }

    /// Plan and apply through `reconciler`.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
        reconciler: &Reconciler,
    ) -> CoreResult<ProvisionOutcome> {
        let plan = self.plan(request).await?;
        let report = reconciler.apply(&plan.state).await?;
        Ok(ProvisionOutcome { plan, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidra_templates::DirectorySource;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn request(yaml: &str) -> ProvisionRequest {
        ProvisionRequest::from_yaml_str(yaml).unwrap()
    }

    const MINIMAL: &str = r#"
project_path: team/api
runner_tags: [docker]
components:
  - name: api
    manifests: [deployment]
"#;

    #[tokio::test]
    async fn test_invalid_request_fails_before_loading() {
        let source = DirectorySource::new("/nonexistent/templates");
        let mut bad = request(MINIMAL);
        bad.project_path = "api".to_string();

        let err = Provisioner::new(&source).plan(&bad).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(ref errors) if errors[0].field == "project_path"));
    }

    #[tokio::test]
    async fn test_plan_routes_and_warns() {
        let temp = tempdir().unwrap();
        write(temp.path(), "pipeline/.gitlab-ci.yml.j2", "tags: {{ runner_tags | join(sep=\",\") }}\nx: {{ missing_value }}\n");
        write(temp.path(), "k8s/04-deployment.yaml.j2", "name: {{ component }}\n");
        write(temp.path(), "k8s/06-service.yaml.j2", "name: {{ component }}-svc\n");

        let source = DirectorySource::new(temp.path());
        let plan = Provisioner::new(&source)
            .with_template_repo("platform/templates")
            .plan(&request(MINIMAL))
            .await
            .unwrap();

        assert_eq!(plan.template_count, 3);
        assert_eq!(
            plan.state.files.keys().collect::<Vec<_>>(),
            vec![".gitlab-ci.yml", "k8s/api/04-deployment.yaml"]
        );
        assert_eq!(plan.state.files["k8s/api/04-deployment.yaml"], "name: api\n");
        assert_eq!(plan.fallbacks.len(), 1);
        assert_eq!(plan.fallbacks[0].path, ".gitlab-ci.yml");
        assert!(plan.warnings.iter().any(|w| w.contains("missing_value")));
        assert_eq!(
            plan.state.variables[&VariableKey::new("KUBE_CONTEXT", "pre")].value,
            "platform/templates:cluster-pre"
        );
    }

    #[tokio::test]
    async fn test_missing_include_is_a_warning() {
        let temp = tempdir().unwrap();
        write(
            temp.path(),
            "pipeline/.gitlab-ci.yml.j2",
            "include:\n  - file: '/includes/deploy.yml'\n",
        );

        let source = DirectorySource::new(temp.path());
        let plan = Provisioner::new(&source).plan(&request(MINIMAL)).await.unwrap();
        assert_eq!(plan.includes, vec!["includes/deploy.yml"]);
        assert!(plan.include_required.is_empty());
        assert!(plan.warnings.iter().any(|w| w.contains("includes/deploy.yml")));
    }
}
