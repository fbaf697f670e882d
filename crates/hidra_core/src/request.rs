//! Provisioning requests.
//!
//! A [`ProvisionRequest`] is read from a YAML file and describes the target
//! project, its components and the values the templates need. It produces
//! the render bindings, the manifest selection and the desired CI/CD
//! variables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use hidra_gitlab::{DesiredResourceState, VariableKey, VariableSpec, ALL_ENVIRONMENTS};
use hidra_templates::{Bindings, ManifestKind, ManifestSelection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{CoreError, CoreResult};
use crate::validation::{
    normalize_namespace, validate_component_name, validate_namespace, validate_port,
    validate_project_path, validate_runner_tags, validate_storage_size, validate_variable_name,
    ValidationError, Validator, MAX_K8S_NAME_LEN,
};

/// Environments provisioned when the request names none.
pub const DEFAULT_ENVIRONMENTS: [&str; 3] = ["dev", "pre", "pro"];

/// Value of variables the project owner fills in later.
pub const PLACEHOLDER_VALUE: &str = "CHANGE_ME";

/// Per-environment variable pointing the pipeline at a cluster agent.
pub const KUBE_CONTEXT_VARIABLE: &str = "KUBE_CONTEXT";

/// Default container port.
pub const DEFAULT_PORT: u32 = 80;

/// Manifests deployed when a component does not list any.
pub const DEFAULT_MANIFESTS: [ManifestKind; 6] = [
    ManifestKind::Namespace,
    ManifestKind::Secrets,
    ManifestKind::Configs,
    ManifestKind::Deployment,
    ManifestKind::Ingress,
    ManifestKind::Service,
];

/// Container resource sizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceProfile {
    XSmall,
    Small,
    #[default]
    Medium,
    Large,
    XLarge,
}

/// CPU and memory requests and limits of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resources {
    pub profile: &'static str,
    pub cpu_request: &'static str,
    pub cpu_limit: &'static str,
    pub memory_request: &'static str,
    pub memory_limit: &'static str,
}

impl ResourceProfile {
    pub const ALL: [ResourceProfile; 5] = [
        Self::XSmall,
        Self::Small,
        Self::Medium,
        Self::Large,
        Self::XLarge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::XSmall => "xsmall",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::XLarge => "xlarge",
        }
    }

    pub fn resources(&self) -> Resources {
        let (cpu_request, cpu_limit, memory_request, memory_limit) = match self {
            Self::XSmall => ("100m", "500m", "64Mi", "256Mi"),
            Self::Small => ("250m", "500m", "256Mi", "512Mi"),
            Self::Medium => ("500m", "1000m", "512Mi", "1Gi"),
            Self::Large => ("1000m", "2000m", "1Gi", "2Gi"),
            Self::XLarge => ("2000m", "4000m", "2Gi", "4Gi"),
        };
        Resources {
            profile: self.as_str(),
            cpu_request,
            cpu_limit,
            memory_request,
            memory_limit,
        }
    }
}

impl fmt::Display for ResourceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceProfile {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                ValidationError::new(
                    "resource_profile",
                    s,
                    "expected one of xsmall, small, medium, large, xlarge",
                )
            })
    }
}

/// A persistent volume of a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub name: String,
    pub mount_path: String,
    pub storage: String,
}

/// One deployable unit of the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRequest {
    pub name: String,
    /// Whether the component is deployed to Kubernetes
    #[serde(default = "default_true")]
    pub deploy: bool,
    pub dockerfile: Option<String>,
    pub port: Option<u32>,
    #[serde(default = "default_profile")]
    pub resource_profile: String,
    /// Manifest kinds; the defaults apply when omitted
    pub manifests: Option<Vec<String>>,
    #[serde(default)]
    pub config_vars: Vec<String>,
    #[serde(default)]
    pub secret_vars: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<VolumeRequest>,
}

/// Value and flags of a deploy-time variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployValue {
    pub value: String,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub masked: bool,
    #[serde(default = "default_scope")]
    pub scope: String,
}

/// Everything needed to provision CI/CD into one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub project_path: String,
    /// Defaults to the project name normalized to a namespace
    pub namespace: Option<String>,
    #[serde(default = "default_environments")]
    pub environments: Vec<String>,
    #[serde(default)]
    pub create_project: bool,
    #[serde(default = "default_true")]
    pub use_docker: bool,
    pub components: Vec<ComponentRequest>,
    pub tag_prefix: Option<String>,
    #[serde(default)]
    pub runner_tags: Vec<String>,
    /// Environment -> cluster context
    #[serde(default)]
    pub kube_contexts: BTreeMap<String, String>,
    /// Extra template-time values, taking precedence over computed ones
    #[serde(default)]
    pub template_values: BTreeMap<String, Value>,
    /// Deploy-time variable values
    #[serde(default)]
    pub deploy_values: BTreeMap<String, DeployValue>,
}

fn default_true() -> bool {
    true
}

fn default_profile() -> String {
    ResourceProfile::default().as_str().to_string()
}

fn default_scope() -> String {
    ALL_ENVIRONMENTS.to_string()
}

fn default_environments() -> Vec<String> {
    DEFAULT_ENVIRONMENTS.iter().map(|e| e.to_string()).collect()
}

impl ComponentRequest {
    fn has_volumes(&self) -> bool {
        !self.volumes.is_empty()
    }

    /// Selected manifest kinds, ignoring unknown names.
    pub fn manifest_kinds(&self) -> Vec<ManifestKind> {
        if !self.deploy {
            return Vec::new();
        }
        let mut kinds: Vec<ManifestKind> = match &self.manifests {
            Some(names) => names.iter().filter_map(|n| n.parse().ok()).collect(),
            None => DEFAULT_MANIFESTS.to_vec(),
        };
        if self.has_volumes() && !kinds.contains(&ManifestKind::Pvc) {
            kinds.push(ManifestKind::Pvc);
        }
        kinds
    }

    pub fn profile(&self) -> ResourceProfile {
        self.resource_profile.parse().unwrap_or_default()
    }
}

impl ProvisionRequest {
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::Request {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&content).map_err(|e| CoreError::Request {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Last segment of the project path.
    pub fn project_name(&self) -> &str {
        self.project_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.project_path)
    }

    pub fn namespace(&self) -> String {
        match &self.namespace {
            Some(namespace) => namespace.clone(),
            None => normalize_namespace(self.project_name()),
        }
    }

    /// Release tag prefix: explicit, else the name up to the first `-`, else
    /// its first four characters.
    pub fn tag_prefix(&self) -> String {
        if let Some(prefix) = &self.tag_prefix {
            return prefix.clone();
        }
        let name = self.project_name();
        match name.split_once('-') {
            Some((head, _)) => head.to_string(),
            None => name.chars().take(4).collect(),
        }
    }

    /// Cluster context for an environment.
    pub fn kube_context(&self, environment: &str, template_repo: Option<&str>) -> String {
        if let Some(context) = self.kube_contexts.get(environment) {
            return context.clone();
        }
        match template_repo {
            Some(repo) => format!("{}:cluster-{}", repo, environment),
            None => format!("cluster-{}", environment),
        }
    }

    /// Check every field; reports all problems.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut v = Validator::new();

        v.check(validate_project_path(&self.project_path));
        v.check(validate_namespace(&self.namespace()));
        v.check(validate_runner_tags(&self.runner_tags));

        if self.environments.is_empty() {
            v.add_error(ValidationError::new(
                "environments",
                "[]",
                "at least one environment is required",
            ));
        }
        for env in &self.environments {
            if env.trim().is_empty() {
                v.add_error(ValidationError::new("environments", env, "empty environment"));
            }
        }

        if self.components.is_empty() {
            v.add_error(ValidationError::new(
                "components",
                "[]",
                "at least one component is required",
            ));
        }
        let mut seen = BTreeSet::new();
        for component in &self.components {
            v.check(validate_component_name(&component.name));
            if !seen.insert(component.name.as_str()) {
                v.add_error(ValidationError::new(
                    "component",
                    &component.name,
                    "declared more than once",
                ));
            }
            self.validate_component(component, &mut v);
        }

        for (name, value) in &self.deploy_values {
            v.check(validate_variable_name(name));
            if value.scope.trim().is_empty() {
                v.add_error(ValidationError::new("scope", name, "empty environment scope"));
            }
        }

        v.finish()
    }

    fn validate_component(&self, component: &ComponentRequest, v: &mut Validator) {
        if let Some(port) = component.port {
            v.check(validate_port(port));
        }
        v.check(component.resource_profile.parse::<ResourceProfile>().map(|_| ()));
        for name in component.manifests.iter().flatten() {
            v.check(
                name.parse::<ManifestKind>()
                    .map(|_| ())
                    .map_err(|reason| ValidationError::new("manifests", name, reason)),
            );
        }
        for name in component.config_vars.iter().chain(&component.secret_vars) {
            v.check(validate_variable_name(name));
        }
        for volume in &component.volumes {
            v.check(validate_component_name(&volume.name).map_err(|e| {
                ValidationError::new("volume", e.value, e.reason)
            }));
            v.check(validate_storage_size(&volume.storage));
            if !volume.mount_path.starts_with('/') {
                v.add_error(ValidationError::new(
                    "mount_path",
                    &volume.mount_path,
                    "must be absolute",
                ));
            }
        }
    }

    /// Manifest kinds per deployed component, with secrets and configs
    /// forced in when the component declares such variables.
    pub fn manifest_selection(&self) -> ManifestSelection {
        let mut selection = ManifestSelection::new();
        for component in self.components.iter().filter(|c| c.deploy) {
            selection.select(&component.name, component.manifest_kinds());
            if self.namespace.is_some() {
                selection.add(&component.name, ManifestKind::Namespace);
            }
            selection.force_include(
                &component.name,
                !component.config_vars.is_empty(),
                !component.secret_vars.is_empty(),
            );
        }
        selection
    }

    fn dockerfile_path(&self, component: &ComponentRequest) -> String {
        match &component.dockerfile {
            Some(path) => path.clone(),
            None if self.components.len() == 1 => "Dockerfile".to_string(),
            None => format!("{}/Dockerfile", component.name),
        }
    }

    /// Template-time values for rendering.
    pub fn render_bindings(&self, template_repo: Option<&str>) -> Bindings {
        let selection = self.manifest_selection();
        let project_name: String = self.project_name().chars().take(MAX_K8S_NAME_LEN).collect();

        let mut dockerfile_paths = serde_json::Map::new();
        let mut container_ports = serde_json::Map::new();
        let mut k8s_deployment = serde_json::Map::new();
        let mut resource_profiles = serde_json::Map::new();
        let mut pvc_volumes = serde_json::Map::new();
        let mut config_vars = serde_json::Map::new();
        let mut secret_vars = serde_json::Map::new();

        for component in &self.components {
            let name = component.name.clone();
            if self.use_docker {
                dockerfile_paths.insert(name.clone(), json!(self.dockerfile_path(component)));
                container_ports.insert(name.clone(), json!(component.port.unwrap_or(DEFAULT_PORT)));
            }
            k8s_deployment.insert(name.clone(), json!(component.deploy));
            if component.deploy {
                resource_profiles.insert(name.clone(), json!(component.profile().resources()));
                if component.has_volumes() {
                    pvc_volumes.insert(name.clone(), json!(component.volumes));
                }
            }
            if !component.config_vars.is_empty() {
                config_vars.insert(name.clone(), json!(component.config_vars));
            }
            if !component.secret_vars.is_empty() {
                secret_vars.insert(name, json!(component.secret_vars));
            }
        }

        let kube_contexts: BTreeMap<&str, String> = self
            .environments
            .iter()
            .map(|env| (env.as_str(), self.kube_context(env, template_repo)))
            .collect();
        let components: Vec<&str> = self.components.iter().map(|c| c.name.as_str()).collect();

        let mut bindings = Bindings::new();
        let mut bind = |key: &str, value: Value| {
            bindings.insert(key.to_string(), value);
        };
        bind("project_name", json!(project_name));
        bind("project_path", json!(self.project_path));
        bind("namespace", json!(self.namespace()));
        bind("environments", json!(self.environments));
        bind("components", json!(components));
        bind("use_docker", json!(self.use_docker));
        bind("dockerfile_paths", Value::Object(dockerfile_paths));
        bind("container_ports", Value::Object(container_ports));
        bind("tag_prefix", json!(self.tag_prefix()));
        bind("runner_tags", json!(self.runner_tags));
        bind("k8s_manifests", selection.to_value());
        bind("k8s_deployment", Value::Object(k8s_deployment));
        bind("resource_profiles", Value::Object(resource_profiles));
        bind("pvc_volumes", Value::Object(pvc_volumes));
        bind("config_vars", Value::Object(config_vars));
        bind("secret_vars", Value::Object(secret_vars));
        bind("kube_contexts", json!(kube_contexts));
        if let Some(repo) = template_repo {
            bind("template_repo", json!(repo));
        }

        for (key, value) in &self.template_values {
            bindings.insert(key.clone(), value.clone());
        }
        bindings
    }

    /// Add the CI/CD variables of this request to `state`.
    ///
    /// Explicit values come first; placeholders are only added for keys
    /// not already present. `deploy_time` are the deploy-time names the
    /// templates reference and `include_required` the names remote
    /// includes declare.
    pub fn add_variables(
        &self,
        state: &mut DesiredResourceState,
        deploy_time: &[String],
        include_required: &[String],
        template_repo: Option<&str>,
    ) {
        for env in &self.environments {
            state.add_variable_if_absent(
                VariableKey::new(KUBE_CONTEXT_VARIABLE, env),
                VariableSpec::new(self.kube_context(env, template_repo)),
            );
        }

        for (name, value) in &self.deploy_values {
            state.add_variable_if_absent(
                VariableKey::new(name, &value.scope),
                VariableSpec::new(&value.value)
                    .protected(value.protected)
                    .masked(value.masked),
            );
        }

        for component in &self.components {
            for name in &component.secret_vars {
                state.add_variable_if_absent(
                    VariableKey::global(name),
                    VariableSpec::placeholder(PLACEHOLDER_VALUE)
                        .masked(true)
                        .raw(true),
                );
            }
            for name in &component.config_vars {
                state.add_variable_if_absent(
                    VariableKey::global(name),
                    VariableSpec::placeholder(PLACEHOLDER_VALUE).raw(true),
                );
            }
        }

        for name in deploy_time {
            if self.deploy_values.contains_key(name) {
                continue;
            }
            state.add_variable_if_absent(
                VariableKey::global(name),
                VariableSpec::placeholder(PLACEHOLDER_VALUE).masked(true),
            );
        }

        for name in include_required {
            if self.deploy_values.contains_key(name)
                || state.variables.keys().any(|k| &k.name == name)
            {
                continue;
            }
            state.add_variable_if_absent(
                VariableKey::global(name),
                VariableSpec::placeholder(PLACEHOLDER_VALUE),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = r#"
project_path: acme/shop/storefront-web
create_project: true
runner_tags: [docker, k8s]
components:
  - name: web
    port: 8080
    resource_profile: small
    manifests: [deployment, service]
    config_vars: [API_URL]
    secret_vars: [API_KEY]
  - name: worker
    deploy: false
  - name: files
    volumes:
      - name: uploads
        mount_path: /data/uploads
        storage: 5Gi
kube_contexts:
  pro: acme/agents:prod-cluster
template_values:
  registry: registry.acme.io
deploy_values:
  CICD_REGISTRY_PASSWORD:
    value: s3cr3t-value
    masked: true
    scope: pro
"#;

    fn request() -> ProvisionRequest {
        ProvisionRequest::from_yaml_str(REQUEST).unwrap()
    }

    #[test]
    fn test_defaults() {
        let request = request();
        assert_eq!(request.environments, vec!["dev", "pre", "pro"]);
        assert_eq!(request.namespace(), "storefront-web");
        assert_eq!(request.tag_prefix(), "storefront");
        assert!(request.use_docker);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_tag_prefix_without_dash() {
        let mut request = request();
        request.project_path = "acme/payments".to_string();
        assert_eq!(request.tag_prefix(), "paym");
        request.tag_prefix = Some("pay".to_string());
        assert_eq!(request.tag_prefix(), "pay");
    }

    #[test]
    fn test_kube_context_defaults() {
        let request = request();
        assert_eq!(
            request.kube_context("dev", Some("platform/templates")),
            "platform/templates:cluster-dev"
        );
        assert_eq!(request.kube_context("pro", None), "acme/agents:prod-cluster");
        assert_eq!(request.kube_context("pre", None), "cluster-pre");
    }

    #[test]
    fn test_selection_forces_variables_manifests() {
        let selection = request().manifest_selection();
        assert_eq!(
            selection.kinds("web"),
            &[
                ManifestKind::Deployment,
                ManifestKind::Service,
                ManifestKind::Secrets,
                ManifestKind::Configs
            ]
        );
        assert!(selection.kinds("worker").is_empty());
        assert!(selection.contains("files", ManifestKind::Pvc));
        assert!(selection.contains("files", ManifestKind::Namespace));
    }

    #[test]
    fn test_explicit_namespace_selects_namespace_manifest() {
        let mut request = request();
        request.namespace = Some("shop".to_string());
        let selection = request.manifest_selection();
        assert!(selection.contains("web", ManifestKind::Namespace));
        assert!(selection.kinds("worker").is_empty());
    }

    #[test]
    fn test_render_bindings() {
        let bindings = request().render_bindings(Some("platform/templates"));
        assert_eq!(bindings["project_name"], json!("storefront-web"));
        assert_eq!(bindings["components"], json!(["web", "worker", "files"]));
        assert_eq!(bindings["dockerfile_paths"]["web"], json!("web/Dockerfile"));
        assert_eq!(bindings["container_ports"]["web"], json!(8080));
        assert_eq!(bindings["container_ports"]["worker"], json!(80));
        assert_eq!(bindings["k8s_deployment"]["worker"], json!(false));
        assert_eq!(bindings["resource_profiles"]["web"]["cpu_request"], json!("250m"));
        assert_eq!(bindings["resource_profiles"]["files"]["memory_limit"], json!("1Gi"));
        assert!(bindings["resource_profiles"].get("worker").is_none());
        assert_eq!(bindings["pvc_volumes"]["files"][0]["storage"], json!("5Gi"));
        assert_eq!(bindings["secret_vars"]["web"], json!(["API_KEY"]));
        assert_eq!(
            bindings["kube_contexts"]["dev"],
            json!("platform/templates:cluster-dev")
        );
        assert_eq!(bindings["registry"], json!("registry.acme.io"));
        assert!(!bindings.contains_key("CICD_REGISTRY_PASSWORD"));
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let mut request = request();
        request.project_path = "storefront".to_string();
        request.runner_tags.clear();
        request.components[0].port = Some(0);
        request.components[0].resource_profile = "huge".to_string();
        request.components[0].manifests = Some(vec!["cronjob".to_string()]);
        request.components[2].volumes[0].storage = "5GB".to_string();
        request.components.push(request.components[1].clone());

        let errors = request.validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        for field in [
            "project_path",
            "runner_tags",
            "port",
            "resource_profile",
            "manifests",
            "storage",
            "component",
        ] {
            assert!(fields.contains(&field), "missing {}: {:?}", field, fields);
        }
    }

    #[test]
    fn test_add_variables() {
        let request = request();
        let mut state = DesiredResourceState::for_project(&request.project_path, true);
        request.add_variables(
            &mut state,
            &["CICD_REGISTRY_PASSWORD".to_string(), "CICD_API_TOKEN".to_string()],
            &["SONAR_TOKEN".to_string(), "API_URL".to_string()],
            Some("platform/templates"),
        );

        let get = |name: &str, scope: &str| state.variables.get(&VariableKey::new(name, scope));

        assert_eq!(
            get("KUBE_CONTEXT", "pro").unwrap().value,
            "acme/agents:prod-cluster"
        );
        assert_eq!(
            get("KUBE_CONTEXT", "dev").unwrap().value,
            "platform/templates:cluster-dev"
        );

        let password = get("CICD_REGISTRY_PASSWORD", "pro").unwrap();
        assert_eq!(password.value, "s3cr3t-value");
        assert!(password.masked && !password.placeholder);
        assert!(get("CICD_REGISTRY_PASSWORD", "*").is_none());

        let token = get("CICD_API_TOKEN", "*").unwrap();
        assert!(token.placeholder && token.masked);

        let api_key = get("API_KEY", "*").unwrap();
        assert!(api_key.placeholder && api_key.masked && api_key.raw);
        let api_url = get("API_URL", "*").unwrap();
        assert!(api_url.placeholder && !api_url.masked && api_url.raw);

        assert!(get("SONAR_TOKEN", "*").unwrap().placeholder);
        // 3 contexts, 1 value, 2 component vars, 1 template secret, 1 include var
        assert_eq!(state.variables.len(), 8);
    }
}
