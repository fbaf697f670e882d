//! Remote client abstraction.

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::types::{
    CiVariable, ClusterAgent, FileCommit, Group, Pipeline, Project, Runner, RunnerSource,
    TreeEntry, User,
};

/// Page size used by every list call.
pub const PAGE_SIZE: u32 = 100;

/// Operations the provisioning core needs from GitLab.
///
/// Every call is a single request. Errors are classified into [`crate::ApiError`]
/// so callers can tell not-found, conflict and permission failures apart.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// The authenticated user.
    async fn current_user(&self) -> ApiResult<User>;

    /// Look up a group by its full path (`team/backend`).
    async fn get_group_by_path(&self, full_path: &str) -> ApiResult<Group>;

    /// Direct subgroups of a group, filtered by a search term.
    async fn list_subgroups(&self, parent_id: u64, search: &str) -> ApiResult<Vec<Group>>;

    /// Create a group (top-level when `parent_id` is `None`).
    async fn create_group(&self, parent_id: Option<u64>, name: &str) -> ApiResult<Group>;

    /// Projects directly inside a group.
    async fn list_group_projects(&self, group_path: &str) -> ApiResult<Vec<Project>>;

    /// Look up a project by its full path.
    async fn get_project_by_path(&self, full_path: &str) -> ApiResult<Project>;

    /// Search projects by name.
    async fn list_projects(&self, search: &str) -> ApiResult<Vec<Project>>;

    /// Create a project (in the user namespace when `namespace_id` is `None`).
    async fn create_project(&self, namespace_id: Option<u64>, name: &str) -> ApiResult<Project>;

    /// Raw content of a repository file at a ref.
    async fn get_file(&self, project_id: u64, path: &str, git_ref: &str) -> ApiResult<String>;

    async fn create_file(&self, project_id: u64, path: &str, commit: &FileCommit)
        -> ApiResult<()>;

    async fn update_file(&self, project_id: u64, path: &str, commit: &FileCommit)
        -> ApiResult<()>;

    /// Recursive listing of a repository at a ref.
    async fn list_repository_tree(&self, project_id: u64, git_ref: &str)
        -> ApiResult<Vec<TreeEntry>>;

    /// Every project variable, across all environment scopes.
    async fn list_variables(&self, project_id: u64) -> ApiResult<Vec<CiVariable>>;

    async fn create_variable(&self, project_id: u64, variable: &CiVariable) -> ApiResult<()>;

    /// Update the variable matching both key and environment scope.
    async fn update_variable(&self, project_id: u64, variable: &CiVariable) -> ApiResult<()>;

    /// Most recent pipelines first.
    async fn list_pipelines(&self, project_id: u64, per_page: u32) -> ApiResult<Vec<Pipeline>>;

    async fn list_runners(&self, source: &RunnerSource) -> ApiResult<Vec<Runner>>;

    /// A single runner, including its tags.
    async fn get_runner(&self, runner_id: u64) -> ApiResult<Runner>;

    async fn list_cluster_agents(&self, project_id: u64) -> ApiResult<Vec<ClusterAgent>>;
}
