//! Template model: categories, destination paths and the per-run template set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Extension carried by every template in the template repository.
pub const TEMPLATE_EXTENSION: &str = ".j2";

/// Directory holding remote includes; referenced by pipelines, never copied.
pub const INCLUDES_DIR: &str = "includes/";

/// Template category, detected from the first directory of the source path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    Pipeline,
    KubernetesManifest,
    Helm,
    Config,
    Unclassified,
}

impl TemplateCategory {
    /// Detect the category from a source path such as `k8s/04-deployment.yaml.j2`.
    pub fn detect(source_path: &str) -> Self {
        match source_path.split_once('/') {
            Some((dir, _)) => Self::from_dir(dir).unwrap_or(Self::Unclassified),
            None => Self::Unclassified,
        }
    }

    fn from_dir(dir: &str) -> Option<Self> {
        match dir {
            "pipeline" => Some(Self::Pipeline),
            "k8s" => Some(Self::KubernetesManifest),
            "helm" => Some(Self::Helm),
            "config" => Some(Self::Config),
            _ => None,
        }
    }

    /// Directory name used in the template repository.
    pub fn source_dir(&self) -> Option<&'static str> {
        match self {
            Self::Pipeline => Some("pipeline"),
            Self::KubernetesManifest => Some("k8s"),
            Self::Helm => Some("helm"),
            Self::Config => Some("config"),
            Self::Unclassified => None,
        }
    }

    /// Directory prefix in the target project. Pipelines land at the root.
    pub fn dest_prefix(&self) -> Option<&'static str> {
        match self {
            Self::Pipeline | Self::Unclassified => None,
            Self::KubernetesManifest => Some("k8s"),
            Self::Helm => Some("helm"),
            Self::Config => Some("config"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::KubernetesManifest => "kubernetes-manifest",
            Self::Helm => "helm",
            Self::Config => "config",
            Self::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for TemplateCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single template loaded from the template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Path in the template repository (with `.j2`)
    pub source_path: String,
    /// Path in the target project
    pub dest_path: String,
    /// Detected category
    pub category: TemplateCategory,
    /// Raw, unrendered body
    pub body: String,
}

impl Template {
    /// Build a template from its repository path and body.
    pub fn new(source_path: impl Into<String>, body: impl Into<String>) -> Self {
        let source_path = source_path.into();
        let category = TemplateCategory::detect(&source_path);
        let dest_path = dest_path_for(&source_path, category);
        Self {
            source_path,
            dest_path,
            category,
            body: body.into(),
        }
    }

    /// File name of the destination path.
    pub fn file_name(&self) -> &str {
        self.dest_path
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.dest_path)
    }

    pub fn is_kubernetes(&self) -> bool {
        self.category == TemplateCategory::KubernetesManifest
    }
}

/// Compute the destination path for a template source path.
///
/// `pipeline/.gitlab-ci.yml.j2` becomes `.gitlab-ci.yml` and
/// `k8s/04-deployment.yaml.j2` becomes `k8s/04-deployment.yaml`.
pub fn dest_path_for(source_path: &str, category: TemplateCategory) -> String {
    let without_ext = source_path
        .strip_suffix(TEMPLATE_EXTENSION)
        .unwrap_or(source_path);

    let file_name = match category.source_dir() {
        Some(dir) => without_ext
            .strip_prefix(dir)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(without_ext),
        None => without_ext,
    };

    match category.dest_prefix() {
        Some(prefix) => format!("{}/{}", prefix, file_name),
        None => file_name.to_string(),
    }
}

/// The set of templates for one provisioning run, keyed by destination path.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, Template>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from `(source path, body)` pairs.
    pub fn from_sources<I, P, B>(sources: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<String>,
        B: Into<String>,
    {
        let mut set = Self::new();
        for (path, body) in sources {
            set.insert(Template::new(path, body));
        }
        set
    }

    /// Insert a template, replacing any template with the same destination.
    pub fn insert(&mut self, template: Template) {
        self.templates.insert(template.dest_path.clone(), template);
    }

    pub fn get(&self, dest_path: &str) -> Option<&Template> {
        self.templates.get(dest_path)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    /// Destination paths in sorted order.
    pub fn dest_paths(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    /// Templates of the given category.
    pub fn by_category(&self, category: TemplateCategory) -> Vec<&Template> {
        self.iter().filter(|t| t.category == category).collect()
    }

    /// Split into (Kubernetes manifests, everything else).
    pub fn partition_kubernetes(&self) -> (Vec<&Template>, Vec<&Template>) {
        self.iter().partition(|t| t.is_kubernetes())
    }

    /// Raw bodies, for variable classification.
    pub fn bodies(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|t| t.body.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_category() {
        assert_eq!(
            TemplateCategory::detect("pipeline/.gitlab-ci.yml.j2"),
            TemplateCategory::Pipeline
        );
        assert_eq!(
            TemplateCategory::detect("k8s/04-deployment.yaml.j2"),
            TemplateCategory::KubernetesManifest
        );
        assert_eq!(TemplateCategory::detect("helm/values.yaml.j2"), TemplateCategory::Helm);
        assert_eq!(TemplateCategory::detect("config/app.env.j2"), TemplateCategory::Config);
        assert_eq!(TemplateCategory::detect("README.md.j2"), TemplateCategory::Unclassified);
        assert_eq!(TemplateCategory::detect("docs/x.md.j2"), TemplateCategory::Unclassified);
    }

    #[test]
    fn test_dest_paths() {
        assert_eq!(
            Template::new("pipeline/.gitlab-ci.yml.j2", "").dest_path,
            ".gitlab-ci.yml"
        );
        assert_eq!(
            Template::new("k8s/04-deployment.yaml.j2", "").dest_path,
            "k8s/04-deployment.yaml"
        );
        assert_eq!(
            Template::new("helm/chart/values.yaml.j2", "").dest_path,
            "helm/chart/values.yaml"
        );
        assert_eq!(Template::new("docs/notes.md.j2", "").dest_path, "docs/notes.md");
    }

    #[test]
    fn test_file_name() {
        let template = Template::new("k8s/06-service.yaml.j2", "");
        assert_eq!(template.file_name(), "06-service.yaml");
        let root = Template::new("pipeline/.gitlab-ci.yml.j2", "");
        assert_eq!(root.file_name(), ".gitlab-ci.yml");
    }

    #[test]
    fn test_partition_kubernetes() {
        let set = TemplateSet::from_sources([
            ("pipeline/.gitlab-ci.yml.j2", "a"),
            ("k8s/01-namespace.yaml.j2", "b"),
            ("k8s/04-deployment.yaml.j2", "c"),
        ]);
        let (k8s, global) = set.partition_kubernetes();
        assert_eq!(k8s.len(), 2);
        assert_eq!(global.len(), 1);
        assert_eq!(set.by_category(TemplateCategory::Pipeline).len(), 1);
    }
}
