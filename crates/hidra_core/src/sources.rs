//! Template source backed by the shared template repository on GitLab.

use std::sync::Arc;

use async_trait::async_trait;
use hidra_gitlab::{ApiError, ApiResult, RemoteClient};
use hidra_templates::{TemplateError, TemplateResult, TemplateSource};
use tracing::debug;

/// Reads templates from a repository at a fixed ref.
pub struct RemoteTemplateSource {
    client: Arc<dyn RemoteClient>,
    project_id: u64,
    project_path: String,
    git_ref: String,
}

impl RemoteTemplateSource {
    /// Resolve the template repository by path.
    pub async fn connect(
        client: Arc<dyn RemoteClient>,
        project_path: &str,
        git_ref: &str,
    ) -> ApiResult<Self> {
        let project = client.get_project_by_path(project_path).await?;
        debug!(
            "Template repository {} resolved to project {}",
            project.path_with_namespace, project.id
        );
        Ok(Self {
            client,
            project_id: project.id,
            project_path: project.path_with_namespace,
            git_ref: git_ref.to_string(),
        })
    }

    pub fn project_path(&self) -> &str {
        &self.project_path
    }

    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }
}

fn template_error(path: &str, error: ApiError) -> TemplateError {
    match error {
        ApiError::NotFound(_) => TemplateError::NotFound(path.to_string()),
        other => TemplateError::SourceUnavailable(format!("{}: {}", path, other)),
    }
}

#[async_trait]
impl TemplateSource for RemoteTemplateSource {
    async fn list_template_paths(&self) -> TemplateResult<Vec<String>> {
        let entries = self
            .client
            .list_repository_tree(self.project_id, &self.git_ref)
            .await
            .map_err(|e| template_error(&self.project_path, e))?;

        let mut paths: Vec<String> = entries
            .into_iter()
            .filter(|e| e.is_blob())
            .map(|e| e.path)
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn get_template_content(&self, path: &str) -> TemplateResult<String> {
        self.client
            .get_file(self.project_id, path, &self.git_ref)
            .await
            .map_err(|e| template_error(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidra_gitlab::InMemoryGitLab;
    use hidra_templates::TemplateLoader;

    #[tokio::test]
    async fn test_loads_templates_from_repository() {
        let gitlab = InMemoryGitLab::new()
            .with_file("platform/templates", "pipeline/.gitlab-ci.yml.j2", "stages: []")
            .with_file("platform/templates", "k8s/04-deployment.yaml.j2", "kind: Deployment")
            .with_file("platform/templates", "includes/build.yml", "# @requires: A")
            .with_file("platform/templates", "README.md", "docs");

        let source = RemoteTemplateSource::connect(Arc::new(gitlab), "platform/templates", "main")
            .await
            .unwrap();
        let set = TemplateLoader::new(&source).load_all().await.unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.get(".gitlab-ci.yml").is_some());
        assert!(set.get("k8s/04-deployment.yaml").is_some());
        assert_eq!(
            source.get_template_content("includes/build.yml").await.unwrap(),
            "# @requires: A"
        );
    }

    #[tokio::test]
    async fn test_missing_repository() {
        let result =
            RemoteTemplateSource::connect(Arc::new(InMemoryGitLab::new()), "nope/templates", "main")
                .await;
        assert!(result.err().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_file_maps_to_not_found() {
        let gitlab = InMemoryGitLab::new().with_project("platform/templates");
        let source = RemoteTemplateSource::connect(Arc::new(gitlab), "platform/templates", "main")
            .await
            .unwrap();
        let err = source.get_template_content("includes/x.yml").await.unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(_)));
    }
}
