//! Input validation, applied before any remote call.
//!
//! Every rejection is a [`ValidationError`] naming the field, the offending
//! value and a reason. [`Validator`] collects them so a request reports all of
//! its problems at once.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static RE_DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));
static RE_PATH_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]+$").expect("valid regex"));
static RE_VARIABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("valid regex"));
static RE_STORAGE_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)?(Mi|Gi|Ti|M|G|T)$").expect("valid regex"));
static RE_RUNNER_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid regex"));

/// Maximum length of a Kubernetes name.
pub const MAX_K8S_NAME_LEN: usize = 63;

/// Variable names owned by the shell environment.
pub const RESERVED_VARIABLE_NAMES: &[&str] = &["PATH", "HOME", "USER", "SHELL", "PWD", "TERM"];

/// A rejected input value.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Invalid {field} '{value}': {reason}")]
pub struct ValidationError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for single-value validation.
pub type ValidationResult<T = ()> = Result<T, ValidationError>;

/// Validate a GitLab project path (`group/project` or deeper).
pub fn validate_project_path(path: &str) -> ValidationResult {
    let invalid = |reason: &str| ValidationError::new("project_path", path, reason);

    if path.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if !path.contains('/') {
        return Err(invalid("must include a group (group/project)"));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(invalid("must not start or end with /"));
    }
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(invalid("must not contain //"));
        }
        if !RE_PATH_SEGMENT.is_match(segment) {
            return Err(invalid(&format!(
                "invalid segment '{}': only letters, digits, _, - and . are allowed",
                segment
            )));
        }
    }
    Ok(())
}

fn validate_dns_label(field: &str, value: &str) -> ValidationResult {
    if value.is_empty() {
        return Err(ValidationError::new(field, value, "must not be empty"));
    }
    if value.len() > MAX_K8S_NAME_LEN {
        return Err(ValidationError::new(
            field,
            value,
            format!(
                "at most {} characters (has {})",
                MAX_K8S_NAME_LEN,
                value.len()
            ),
        ));
    }
    if !RE_DNS_LABEL.is_match(value) {
        return Err(ValidationError::new(
            field,
            value,
            "lowercase letters, digits and '-' only; must not start or end with '-'",
        ));
    }
    Ok(())
}

/// Validate a Kubernetes namespace (RFC 1123 label).
pub fn validate_namespace(namespace: &str) -> ValidationResult {
    validate_dns_label("namespace", namespace)
}

/// Validate a component name, used in paths and Kubernetes names.
pub fn validate_component_name(component: &str) -> ValidationResult {
    validate_dns_label("component", component)
}

/// Normalize an arbitrary name into a valid namespace.
pub fn normalize_namespace(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && normalized.ends_with('-') {
            continue;
        }
        normalized.push(c);
    }

    let mut normalized = normalized.trim_matches('-').to_string();
    if normalized.len() > MAX_K8S_NAME_LEN {
        normalized.truncate(MAX_K8S_NAME_LEN);
        normalized = normalized.trim_end_matches('-').to_string();
    }
    if normalized.is_empty() {
        normalized = "default".to_string();
    }
    normalized
}

/// Validate a CI/CD variable name.
pub fn validate_variable_name(name: &str) -> ValidationResult {
    if name.is_empty() {
        return Err(ValidationError::new("variable_name", name, "must not be empty"));
    }
    if !RE_VARIABLE_NAME.is_match(name) {
        return Err(ValidationError::new(
            "variable_name",
            name,
            "must start with A-Z or _ and contain only A-Z, 0-9 and _",
        ));
    }
    if RESERVED_VARIABLE_NAMES.contains(&name) {
        return Err(ValidationError::new(
            "variable_name",
            name,
            "reserved system name",
        ));
    }
    Ok(())
}

/// Validate a container port.
pub fn validate_port(port: u32) -> ValidationResult {
    if !(1..=65535).contains(&port) {
        return Err(ValidationError::new(
            "port",
            port.to_string(),
            "must be between 1 and 65535",
        ));
    }
    Ok(())
}

/// Validate a Kubernetes storage size such as `5Gi`.
pub fn validate_storage_size(size: &str) -> ValidationResult {
    if !RE_STORAGE_SIZE.is_match(size) {
        return Err(ValidationError::new(
            "storage",
            size,
            "expected a size such as 5Gi, 10Mi or 1Ti",
        ));
    }
    Ok(())
}

/// Validate runner tags: at least one, each `[a-zA-Z0-9_-]+`.
pub fn validate_runner_tags(tags: &[String]) -> ValidationResult {
    if tags.is_empty() {
        return Err(ValidationError::new(
            "runner_tags",
            "[]",
            "at least one tag is required",
        ));
    }
    for tag in tags {
        if tag.trim().is_empty() {
            return Err(ValidationError::new("runner_tags", tag, "empty tag"));
        }
        if !RE_RUNNER_TAG.is_match(tag) {
            return Err(ValidationError::new(
                "runner_tags",
                tag,
                "only a-z, A-Z, 0-9, - and _ are allowed",
            ));
        }
    }
    Ok(())
}

/// Check a repository file path and return it with `/` separators.
///
/// Rejects empty, absolute and `..` paths.
pub fn sanitize_file_path(path: &str) -> ValidationResult<String> {
    if path.is_empty() {
        return Err(ValidationError::new("file_path", path, "must not be empty"));
    }
    let normalized = path.replace('\\', "/");
    if normalized.contains("..") {
        return Err(ValidationError::new(
            "file_path",
            path,
            "'..' is not allowed",
        ));
    }
    if normalized.starts_with('/') {
        return Err(ValidationError::new(
            "file_path",
            path,
            "must be relative",
        ));
    }
    Ok(normalized)
}

/// Collects validation failures.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one check.
    pub fn check(&mut self, result: ValidationResult) {
        if let Err(e) = result {
            self.errors.push(e);
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn finish(self) -> Result<(), Vec<ValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}
