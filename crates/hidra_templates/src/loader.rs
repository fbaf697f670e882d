//! Template loading from a template source.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{TemplateError, TemplateResult};
use crate::template::{Template, TemplateSet, INCLUDES_DIR, TEMPLATE_EXTENSION};

/// Where templates come from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// List every file path in the source, relative to its root, using `/`.
    async fn list_template_paths(&self) -> TemplateResult<Vec<String>>;

    /// Read the content of one file.
    async fn get_template_content(&self, path: &str) -> TemplateResult<String>;
}

/// Template source backed by a local directory.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl TemplateSource for DirectorySource {
    async fn list_template_paths(&self) -> TemplateResult<Vec<String>> {
        if !self.root.exists() {
            return Err(TemplateError::MissingDirectory(self.root.clone()));
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                let parts: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                paths.push(parts.join("/"));
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn get_template_content(&self, path: &str) -> TemplateResult<String> {
        let full = self.root.join(path);
        if !full.is_file() {
            return Err(TemplateError::NotFound(path.to_string()));
        }
        Ok(fs::read_to_string(full)?)
    }
}

/// Loads the `.j2` templates of a source into a [`TemplateSet`].
pub struct TemplateLoader<'a> {
    source: &'a dyn TemplateSource,
}

impl<'a> TemplateLoader<'a> {
    pub fn new(source: &'a dyn TemplateSource) -> Self {
        Self { source }
    }

    /// Whether a repository path is a loadable template.
    pub fn is_template_path(path: &str) -> bool {
        path.ends_with(TEMPLATE_EXTENSION) && !path.starts_with(INCLUDES_DIR)
    }

    /// Load every template. A template that cannot be read is skipped with a warning.
    pub async fn load_all(&self) -> TemplateResult<TemplateSet> {
        let paths = self.source.list_template_paths().await?;
        let template_paths: Vec<_> = paths
            .into_iter()
            .filter(|p| Self::is_template_path(p))
            .collect();

        info!("Found {} template file(s)", template_paths.len());

        let mut set = TemplateSet::new();
        for path in template_paths {
            match self.source.get_template_content(&path).await {
                Ok(body) => {
                    let template = Template::new(path, body);
                    debug!(
                        "Loaded template: {} -> {} ({})",
                        template.source_path, template.dest_path, template.category
                    );
                    set.insert(template);
                }
                Err(e) => {
                    warn!("Failed to load template {}: {}", path, e);
                }
            }
        }

        Ok(set)
    }

    /// List the remote include files available in the source.
    pub async fn list_includes(&self) -> TemplateResult<Vec<String>> {
        let mut includes: Vec<_> = self
            .source
            .list_template_paths()
            .await?
            .into_iter()
            .filter(|p| p.starts_with(INCLUDES_DIR))
            .collect();
        includes.sort();
        Ok(includes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_loader_empty_dir() {
        let temp = tempdir().unwrap();
        let source = DirectorySource::new(temp.path());
        let set = TemplateLoader::new(&source).load_all().await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_loader_missing_dir() {
        let temp = tempdir().unwrap();
        let source = DirectorySource::new(temp.path().join("nope"));
        let result = TemplateLoader::new(&source).load_all().await;
        assert!(matches!(result, Err(TemplateError::MissingDirectory(_))));
    }

    #[tokio::test]
    async fn test_loader_filters_includes_and_non_templates() {
        let temp = tempdir().unwrap();
        write(temp.path(), "pipeline/.gitlab-ci.yml.j2", "stages: []");
        write(temp.path(), "k8s/04-deployment.yaml.j2", "kind: Deployment");
        write(temp.path(), "includes/build.yml", "# @requires: REGISTRY");
        write(temp.path(), "includes/deploy.yml.j2", "x");
        write(temp.path(), "README.md", "docs");

        let source = DirectorySource::new(temp.path());
        let loader = TemplateLoader::new(&source);
        let set = loader.load_all().await.unwrap();

        assert_eq!(set.dest_paths(), vec![".gitlab-ci.yml", "k8s/04-deployment.yaml"]);

        let includes = loader.list_includes().await.unwrap();
        assert_eq!(includes, vec!["includes/build.yml", "includes/deploy.yml.j2"]);
    }

    #[tokio::test]
    async fn test_unreadable_template_is_skipped() {
        let mut source = MockTemplateSource::new();
        source.expect_list_template_paths().times(1).returning(|| {
            Ok(vec![
                "k8s/04-deployment.yaml.j2".to_string(),
                "k8s/06-service.yaml.j2".to_string(),
            ])
        });
        source.expect_get_template_content().returning(|path| {
            if path.contains("service") {
                Err(TemplateError::SourceUnavailable("503".to_string()))
            } else {
                Ok("kind: Deployment".to_string())
            }
        });

        let set = TemplateLoader::new(&source).load_all().await.unwrap();
        assert_eq!(set.dest_paths(), vec!["k8s/04-deployment.yaml"]);
    }

    #[tokio::test]
    async fn test_listing_failure_is_an_error() {
        let mut source = MockTemplateSource::new();
        source
            .expect_list_template_paths()
            .returning(|| Err(TemplateError::SourceUnavailable("401".to_string())));
        source.expect_get_template_content().never();

        let result = TemplateLoader::new(&source).load_all().await;
        assert!(matches!(result, Err(TemplateError::SourceUnavailable(_))));
    }
}
