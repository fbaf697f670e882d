//! Desired state consumed by the reconciler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{CiVariable, ALL_ENVIRONMENTS};

/// Target project and whether it may be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTarget {
    /// Full path, `group/sub/project`
    pub path: String,
    pub create_if_absent: bool,
}

/// Identity of a CI/CD variable: GitLab allows one record per key and scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableKey {
    pub name: String,
    pub scope: String,
}

impl VariableKey {
    pub fn new(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
        }
    }

    /// Key in the all-environments scope.
    pub fn global(name: impl Into<String>) -> Self {
        Self::new(name, ALL_ENVIRONMENTS)
    }
}

impl std::fmt::Display for VariableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.name, self.scope)
    }
}

/// Desired value and flags of a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub value: String,
    pub protected: bool,
    pub masked: bool,
    #[serde(default)]
    pub raw: bool,
    /// A placeholder is only created when absent and never overwrites a value
    #[serde(default)]
    pub placeholder: bool,
}

impl VariableSpec {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            protected: false,
            masked: false,
            raw: false,
            placeholder: false,
        }
    }

    /// A value to be filled in by the project owner later.
    pub fn placeholder(value: impl Into<String>) -> Self {
        Self {
            placeholder: true,
            ..Self::new(value)
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

    /// Store the value unexpanded, so `$` survives literally.
    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// The API record for this spec.
    pub fn to_variable(&self, key: &VariableKey) -> CiVariable {
        CiVariable::new(&key.name, &self.value)
            .protected(self.protected)
            .masked(self.masked)
            .raw(self.raw)
            .scope(&key.scope)
    }

    /// Whether an existing record already carries this value and these flags.
    pub fn matches(&self, existing: &CiVariable) -> bool {
        existing.value.as_deref() == Some(self.value.as_str())
            && existing.protected == self.protected
            && existing.masked == self.masked
            && existing.raw == self.raw
    }
}

/// Everything one provisioning run wants to exist remotely.
///
/// Applying the same state twice is safe: the second run only finds
/// resources that already match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredResourceState {
    /// Group path segments, root first
    pub group_segments: Vec<String>,
    pub project: ProjectTarget,
    /// Destination path -> content
    pub files: BTreeMap<String, String>,
    pub variables: BTreeMap<VariableKey, VariableSpec>,
}

impl DesiredResourceState {
    /// Start from a full project path such as `team/backend/api`.
    pub fn for_project(path: &str, create_if_absent: bool) -> Self {
        let mut segments: Vec<String> = path.split('/').map(str::to_string).collect();
        segments.pop();
        Self {
            group_segments: segments,
            project: ProjectTarget {
                path: path.to_string(),
                create_if_absent,
            },
            files: BTreeMap::new(),
            variables: BTreeMap::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    pub fn with_variable(mut self, key: VariableKey, spec: VariableSpec) -> Self {
        self.variables.insert(key, spec);
        self
    }

    /// Insert a variable unless the key is already present.
    pub fn add_variable_if_absent(&mut self, key: VariableKey, spec: VariableSpec) -> bool {
        if self.variables.contains_key(&key) {
            return false;
        }
        self.variables.insert(key, spec);
        true
    }

    /// Name of the project (last path segment).
    pub fn project_name(&self) -> &str {
        self.project
            .path
            .rsplit('/')
            .next()
            .unwrap_or(&self.project.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_project() {
        let state = DesiredResourceState::for_project("team/backend/api", true);
        assert_eq!(state.group_segments, vec!["team", "backend"]);
        assert_eq!(state.project_name(), "api");
        assert!(state.project.create_if_absent);
    }

    #[test]
    fn test_scope_is_part_of_identity() {
        let state = DesiredResourceState::for_project("team/api", false)
            .with_variable(VariableKey::global("DB_URL"), VariableSpec::new("a"))
            .with_variable(VariableKey::new("DB_URL", "prod"), VariableSpec::new("b"));
        assert_eq!(state.variables.len(), 2);
    }

    #[test]
    fn test_add_if_absent_keeps_first() {
        let mut state = DesiredResourceState::for_project("team/api", false);
        assert!(state.add_variable_if_absent(VariableKey::global("X"), VariableSpec::new("1")));
        assert!(!state.add_variable_if_absent(VariableKey::global("X"), VariableSpec::new("2")));
        assert_eq!(state.variables[&VariableKey::global("X")].value, "1");
    }

    #[test]
    fn test_spec_to_variable() {
        let key = VariableKey::new("TOKEN", "pro");
        let spec = VariableSpec::placeholder("CHANGE_ME")
            .masked(true)
            .protected(true)
            .raw(true);
        let variable = spec.to_variable(&key);
        assert_eq!(variable.key, "TOKEN");
        assert_eq!(variable.environment_scope, "pro");
        assert!(variable.masked && variable.protected && variable.raw);
        assert!(spec.matches(&variable));
        assert!(!spec.matches(&variable.clone().raw(false)));
        assert!(spec.placeholder);
    }
}
