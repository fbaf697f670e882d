//! Per-component manifest selection and path routing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::renderer::{Bindings, RenderOutput, TemplateRenderer};
use crate::template::{Template, TemplateSet};

/// Kubernetes manifest kinds a component can deploy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Namespace,
    Secrets,
    Configs,
    Deployment,
    Ingress,
    Service,
    Pvc,
}

impl ManifestKind {
    pub const ALL: [ManifestKind; 7] = [
        Self::Namespace,
        Self::Secrets,
        Self::Configs,
        Self::Deployment,
        Self::Ingress,
        Self::Service,
        Self::Pvc,
    ];

    /// File name marker of the template that produces this kind.
    pub fn file_marker(&self) -> &'static str {
        match self {
            Self::Namespace => "01-namespace",
            Self::Secrets => "02-secrets",
            Self::Configs => "03-configs",
            Self::Deployment => "04-deployment",
            Self::Ingress => "05-ingress",
            Self::Service => "06-service",
            Self::Pvc => "07-pvc",
        }
    }

    /// Infer the kind from a manifest file name such as `04-deployment.yaml`.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| file_name.contains(kind.file_marker()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Secrets => "secrets",
            Self::Configs => "configs",
            Self::Deployment => "deployment",
            Self::Ingress => "ingress",
            Self::Service => "service",
            Self::Pvc => "pvc",
        }
    }
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ManifestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown manifest kind: {}", s))
    }
}

/// Component name -> ordered, duplicate-free manifest kinds.
///
/// A selection only grows: kinds are appended after the existing ones and
/// nothing is ever removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestSelection {
    components: BTreeMap<String, Vec<ManifestKind>>,
}

impl ManifestSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the explicit choices for a component.
    pub fn select(&mut self, component: &str, kinds: impl IntoIterator<Item = ManifestKind>) {
        for kind in kinds {
            self.add(component, kind);
        }
        self.components.entry(component.to_string()).or_default();
    }

    /// Append a kind unless already present. Returns true when it was added.
    pub fn add(&mut self, component: &str, kind: ManifestKind) -> bool {
        let kinds = self.components.entry(component.to_string()).or_default();
        if kinds.contains(&kind) {
            return false;
        }
        kinds.push(kind);
        true
    }

    /// Ensure a component with secret or config variables deploys them.
    pub fn force_include(&mut self, component: &str, has_config: bool, has_secret: bool) {
        if has_secret && self.add(component, ManifestKind::Secrets) {
            debug!("Added secrets manifest for {}", component);
        }
        if has_config && self.add(component, ManifestKind::Configs) {
            debug!("Added configs manifest for {}", component);
        }
    }

    pub fn kinds(&self, component: &str) -> &[ManifestKind] {
        self.components
            .get(component)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, component: &str, kind: ManifestKind) -> bool {
        self.kinds(component).contains(&kind)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.components.values().all(Vec::is_empty)
    }

    /// JSON form bound into the render context.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Destination of a component-scoped manifest.
pub fn component_path(component: &str, file_name: &str) -> String {
    format!("k8s/{}/{}", component, file_name)
}

/// Renders a template set, routing Kubernetes manifests per component.
pub struct ManifestRouter<'a> {
    renderer: &'a TemplateRenderer,
    selection: &'a ManifestSelection,
}

impl<'a> ManifestRouter<'a> {
    pub fn new(renderer: &'a TemplateRenderer, selection: &'a ManifestSelection) -> Self {
        Self {
            renderer,
            selection,
        }
    }

    /// Render every template in the set.
    ///
    /// Non-Kubernetes templates are rendered once and never filtered.
    /// Kubernetes templates are rendered once per selected component with
    /// `component` bound, and kept only when their kind is selected.
    pub fn render_set(
        &self,
        set: &TemplateSet,
        binding: &Bindings,
        deploy_time: &BTreeSet<String>,
    ) -> RenderOutput {
        let (manifests, global) = set.partition_kubernetes();

        let mut output = self.renderer.render(global, binding, deploy_time);
        for component in self.selection.components() {
            output.extend(self.render_component(component, &manifests, binding, deploy_time));
        }
        output
    }

    /// Render the manifests selected for one component.
    pub fn render_component(
        &self,
        component: &str,
        manifests: &[&Template],
        binding: &Bindings,
        deploy_time: &BTreeSet<String>,
    ) -> RenderOutput {
        let mut component_binding = binding.clone();
        component_binding.insert("component".to_string(), Value::String(component.to_string()));

        let mut output = RenderOutput::default();
        for template in manifests {
            let file_name = template.file_name();
            let Some(kind) = ManifestKind::from_file_name(file_name) else {
                debug!("Dropping {}: manifest kind not recognized", template.source_path);
                continue;
            };
            if !self.selection.contains(component, kind) {
                continue;
            }

            let path = component_path(component, file_name);
            let (content, fallback) = self.renderer.render_or_original(
                &path,
                &template.body,
                &component_binding,
                deploy_time,
            );
            output.files.insert(path, content);
            output.fallbacks.extend(fallback);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_from_file_name() {
        assert_eq!(
            ManifestKind::from_file_name("04-deployment.yaml"),
            Some(ManifestKind::Deployment)
        );
        assert_eq!(ManifestKind::from_file_name("07-pvc.yml"), Some(ManifestKind::Pvc));
        assert_eq!(ManifestKind::from_file_name("deployment.yaml"), None);
        assert_eq!(ManifestKind::from_file_name("99-hpa.yaml"), None);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("Ingress".parse::<ManifestKind>(), Ok(ManifestKind::Ingress));
        assert!("cronjob".parse::<ManifestKind>().is_err());
    }

    #[test]
    fn test_force_include_appends_after_choices() {
        let mut selection = ManifestSelection::new();
        selection.select("api", [ManifestKind::Deployment]);
        selection.force_include("api", false, true);
        assert_eq!(
            selection.kinds("api"),
            &[ManifestKind::Deployment, ManifestKind::Secrets]
        );

        selection.force_include("api", true, true);
        assert_eq!(
            selection.kinds("api"),
            &[
                ManifestKind::Deployment,
                ManifestKind::Secrets,
                ManifestKind::Configs
            ]
        );
    }

    #[test]
    fn test_select_deduplicates() {
        let mut selection = ManifestSelection::new();
        selection.select(
            "web",
            [
                ManifestKind::Service,
                ManifestKind::Deployment,
                ManifestKind::Service,
            ],
        );
        assert_eq!(
            selection.kinds("web"),
            &[ManifestKind::Service, ManifestKind::Deployment]
        );
        assert!(selection.kinds("missing").is_empty());
    }

    #[test]
    fn test_selection_serializes_as_map() {
        let mut selection = ManifestSelection::new();
        selection.select("api", [ManifestKind::Deployment, ManifestKind::Pvc]);
        assert_eq!(selection.to_value(), json!({"api": ["deployment", "pvc"]}));
    }

    #[test]
    fn test_router_filters_and_relocates() {
        let set = TemplateSet::from_sources([
            ("pipeline/.gitlab-ci.yml.j2", "stages: [{{ stage }}]"),
            ("k8s/01-namespace.yaml.j2", "ns: {{ namespace }}"),
            ("k8s/04-deployment.yaml.j2", "name: {{ component }}"),
            ("k8s/hpa.yaml.j2", "kind: HorizontalPodAutoscaler"),
        ]);
        let mut selection = ManifestSelection::new();
        selection.select("api", [ManifestKind::Deployment]);
        selection.select("web", [ManifestKind::Namespace, ManifestKind::Deployment]);

        let mut binding = Bindings::new();
        binding.insert("stage".to_string(), json!("build"));
        binding.insert("namespace".to_string(), json!("shop"));

        let renderer = TemplateRenderer::new();
        let output = ManifestRouter::new(&renderer, &selection).render_set(
            &set,
            &binding,
            &BTreeSet::new(),
        );

        let paths: Vec<_> = output.files.keys().map(String::as_str).collect();
        assert_eq!(
            paths,
            vec![
                ".gitlab-ci.yml",
                "k8s/api/04-deployment.yaml",
                "k8s/web/01-namespace.yaml",
                "k8s/web/04-deployment.yaml",
            ]
        );
        assert_eq!(output.files["k8s/api/04-deployment.yaml"], "name: api");
        assert_eq!(output.files["k8s/web/04-deployment.yaml"], "name: web");
        assert_eq!(output.files[".gitlab-ci.yml"], "stages: [build]");
    }

    #[test]
    fn test_component_without_selection_gets_nothing() {
        let set = TemplateSet::from_sources([("k8s/04-deployment.yaml.j2", "x")]);
        let mut selection = ManifestSelection::new();
        selection.select("worker", Vec::new());

        let renderer = TemplateRenderer::new();
        let output = ManifestRouter::new(&renderer, &selection).render_set(
            &set,
            &Bindings::new(),
            &BTreeSet::new(),
        );
        assert!(output.files.is_empty());
        assert!(selection.is_empty());
    }
}
