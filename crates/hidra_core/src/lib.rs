//! # hidra_core
//!
//! Provisioning core for Hidraulik.
//!
//! This crate ties the template engine and the GitLab reconciler together:
//! it reads a provisioning request, renders the shared templates for it and
//! applies the resulting desired state to a GitLab project.
//!
//! # Architecture
//!
//! - **Request**: YAML description of the project, its components and values
//! - **Validation**: every input checked before any remote call
//! - **Provisioner**: load, classify, render, route and reconcile
//! - **Config**: persisted GitLab URL, template repository and token
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hidra_core::{ConfigStore, Provisioner, ProvisionRequest, RemoteTemplateSource};
//! use hidra_gitlab::{GitLabClient, Reconciler};
//!
//! let config = ConfigStore::locate(None)?.load()?;
//! let client = Arc::new(GitLabClient::new(url, token));
//!
//! let source = RemoteTemplateSource::connect(client.clone(), "platform/templates", "main").await?;
//! let request = ProvisionRequest::from_file("request.yaml")?;
//!
//! let outcome = Provisioner::new(&source)
//!     .with_template_repo("platform/templates")
//!     .provision(&request, &Reconciler::new(client))
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod provisioner;
pub mod request;
pub mod sources;
pub mod validation;

pub use config::{
    normalize_url, ConfigStore, HidraConfig, RetrySettings, CONFIG_DIR_ENV, GITLAB_URL_ENV,
    TEMPLATE_REPO_ENV, TOKEN_ENV,
};
pub use error::{ConfigError, ConfigResult, CoreError, CoreResult};
pub use provisioner::{ProvisionOutcome, ProvisionPlan, Provisioner};
pub use request::{
    ComponentRequest, DeployValue, ProvisionRequest, ResourceProfile, Resources, VolumeRequest,
    DEFAULT_ENVIRONMENTS, KUBE_CONTEXT_VARIABLE, PLACEHOLDER_VALUE,
};
pub use sources::RemoteTemplateSource;
pub use validation::{
    normalize_namespace, sanitize_file_path, validate_component_name, validate_namespace,
    validate_port, validate_project_path, validate_runner_tags, validate_storage_size,
    validate_variable_name, ValidationError, Validator,
};
