//! GitLab resource types, as returned by the REST v4 API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Default environment scope of a CI/CD variable.
pub const ALL_ENVIRONMENTS: &str = "*";

/// Read an explicit `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub full_path: String,
    #[serde(default)]
    pub parent_id: Option<u64>,
}

/// Namespace summary embedded in a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub full_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub path_with_namespace: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub web_url: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub namespace: Option<Namespace>,
}

/// Content and message of a single-file commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCommit {
    pub branch: String,
    pub content: String,
    pub commit_message: String,
}

/// A project-level CI/CD variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiVariable {
    pub key: String,
    /// `None` when GitLab hides the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub masked: bool,
    /// Value is not expanded by GitLab
    #[serde(default)]
    pub raw: bool,
    #[serde(default = "default_scope", deserialize_with = "scope_or_default")]
    pub environment_scope: String,
}

fn scope_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_scope))
}

fn default_scope() -> String {
    ALL_ENVIRONMENTS.to_string()
}

impl CiVariable {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            protected: false,
            masked: false,
            raw: false,
            environment_scope: default_scope(),
        }
    }

    pub fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn masked(mut self, masked: bool) -> Self {
        self.masked = masked;
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.environment_scope = scope.into();
        self
    }

    /// Whether GitLab withheld the value of this record.
    pub fn is_hidden(&self) -> bool {
        self.value.is_none()
    }

    /// Whether this record has the given key and environment scope.
    pub fn matches(&self, key: &str, scope: &str) -> bool {
        self.key == key && self.environment_scope == scope
    }
}

/// An entry of a repository tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: u64,
    pub status: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub web_url: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runner {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub online: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    /// Only present on single-runner responses
    #[serde(default, rename = "tag_list", deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}

/// Where to list runners from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerSource {
    /// Runners visible to the user, filtered by scope (`active`, `online`, ...)
    Instance(String),
    /// Runners available to a group, by full path
    Group(String),
    /// Runners available to a project
    Project(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAgent {
    pub id: u64,
    pub name: String,
}

/// Percent-encode a full path for use as a URL path parameter.
pub fn encode_path(path: &str) -> String {
    urlencoding::encode(path).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("team/sub group/app"), "team%2Fsub%20group%2Fapp");
        assert_eq!(encode_path("k8s/api/04-deployment.yaml"), "k8s%2Fapi%2F04-deployment.yaml");
    }

    #[test]
    fn test_variable_deserialize_defaults() {
        let var: CiVariable = serde_json::from_str(r#"{"key":"DB_URL","value":"x"}"#).unwrap();
        assert_eq!(var.environment_scope, "*");
        assert!(!var.protected);
        assert!(var.matches("DB_URL", "*"));
        assert!(!var.matches("DB_URL", "prod"));
    }

    #[test]
    fn test_hidden_variable_has_no_value() {
        let vars: Vec<CiVariable> = serde_json::from_str(
            r#"[{"variable_type":"env_var","key":"SIGNING_KEY","value":null,"hidden":true,"protected":true,"masked":true,"raw":false,"environment_scope":"*"},
                {"key":"REGION","value":"eu-west-1","environment_scope":null}]"#,
        )
        .unwrap();
        assert!(vars[0].is_hidden());
        assert!(vars[0].protected && vars[0].masked);
        assert_eq!(vars[1].value.as_deref(), Some("eu-west-1"));
        assert_eq!(vars[1].environment_scope, "*");

        let body = serde_json::to_value(&vars[0]).unwrap();
        assert!(body.get("value").is_none());
    }

    #[test]
    fn test_runner_with_null_fields() {
        let runner: Runner = serde_json::from_str(
            r#"{"id":3,"description":null,"active":true,"status":null,"tag_list":null}"#,
        )
        .unwrap();
        assert_eq!(runner.description, "");
        assert!(runner.tags.is_empty());
    }

    #[test]
    fn test_runner_tags_from_tag_list() {
        let runner: Runner = serde_json::from_str(
            r#"{"id":7,"description":"docker","active":true,"tag_list":["docker","linux"]}"#,
        )
        .unwrap();
        assert_eq!(runner.tags, vec!["docker", "linux"]);
        assert!(!runner.online);
    }

    #[test]
    fn test_pipeline_ref() {
        let pipeline: Pipeline = serde_json::from_str(
            r#"{"id":1,"status":"success","ref":"main","web_url":"https://x/-/pipelines/1","created_at":"2024-01-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(pipeline.git_ref, "main");
        assert!(pipeline.created_at.is_some());
    }
}
