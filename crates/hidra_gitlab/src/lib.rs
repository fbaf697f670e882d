//! # hidra_gitlab
//!
//! GitLab access for Hidraulik.
//!
//! This crate provides the [`RemoteClient`] abstraction over the GitLab REST
//! API and the [`Reconciler`] that applies a [`DesiredResourceState`] through
//! it with get-or-create / get-or-update semantics.
//!
//! # Features
//!
//! - **REST transport**: [`GitLabClient`] (reqwest, private token)
//! - **Reconciliation**: groups, project, files and scope-qualified variables
//! - **Race tolerance**: conflicts fall back to re-lookup with bounded backoff
//! - **Discovery**: runners, cluster agents and project status
//! - **In-memory GitLab**: for testing without a server
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hidra_gitlab::{DesiredResourceState, GitLabClient, Reconciler, VariableKey, VariableSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(GitLabClient::new("https://gitlab.example.com", "glpat-..."));
//!
//!     let state = DesiredResourceState::for_project("team/backend/api", true)
//!         .with_file(".gitlab-ci.yml", "stages: [build]\n")
//!         .with_variable(VariableKey::new("KUBE_CONTEXT", "dev"), VariableSpec::new("agents:dev"));
//!
//!     let report = Reconciler::new(client).apply(&state).await?;
//!     println!("{} write(s)", report.write_count());
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod desired;
pub mod discovery;
pub mod error;
pub mod http;
pub mod mock;
pub mod reconciler;
pub mod retry;
pub mod types;

pub use client::{RemoteClient, PAGE_SIZE};
pub use desired::{DesiredResourceState, ProjectTarget, VariableKey, VariableSpec};
pub use discovery::{
    default_runner_index, discover_cluster_agents, discover_runners, parent_groups,
    project_status, ClusterContext, Discovered, DiscoveryError, ProjectStatus,
};
pub use error::{ApiError, ApiResult, ReconcileError, ReconcileResult};
pub use http::GitLabClient;
pub use mock::{CapturedCall, InMemoryGitLab};
pub use reconciler::{
    FileAction, FileOutcome, GroupOutcome, ProjectOutcome, ReconcileReport, Reconciler,
    ResourceAction, VariableAction, VariableOutcome, DEFAULT_BRANCH,
};
pub use retry::RetryPolicy;
pub use types::{
    encode_path, CiVariable, ClusterAgent, FileCommit, Group, Namespace,
    Pipeline, Project, Runner, RunnerSource, TreeEntry, User, ALL_ENVIRONMENTS,
};
