//! Resource reconciliation.
//!
//! Converts a [`DesiredResourceState`] into the create/update calls needed to
//! make GitLab match it. Every resource is looked up before it is written, so
//! re-applying the same state only performs reads.
//!
//! Order: project, files, variables. Missing groups (root to leaf) are only
//! created right before a missing project is created. Calls are issued one at
//! a time; a fatal error stops the run and leaves what was already applied in
//! place.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::RemoteClient;
use crate::desired::{DesiredResourceState, ProjectTarget, VariableKey, VariableSpec};
use crate::error::{ApiError, ReconcileError, ReconcileResult};
use crate::retry::RetryPolicy;
use crate::types::{CiVariable, FileCommit, Group, Project};

/// Default branch files are committed to.
pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAction {
    Found,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableAction {
    Created,
    Updated,
    Unchanged,
    /// Not written because a value already exists (placeholder, or hidden remote value)
    KeptExisting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub full_path: String,
    pub id: u64,
    pub action: ResourceAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectOutcome {
    pub project: Project,
    pub action: ResourceAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: String,
    pub action: FileAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableOutcome {
    pub key: VariableKey,
    pub masked: bool,
    pub protected: bool,
    pub action: VariableAction,
}

/// What a reconciliation run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub groups: Vec<GroupOutcome>,
    pub project: Option<ProjectOutcome>,
    pub files: Vec<FileOutcome>,
    pub variables: Vec<VariableOutcome>,
    /// Degraded operations (permission-denied lookups and similar)
    pub warnings: Vec<String>,
}

impl ReconcileReport {
    /// Number of remote writes performed.
    pub fn write_count(&self) -> usize {
        let groups = self
            .groups
            .iter()
            .filter(|g| g.action == ResourceAction::Created)
            .count();
        let project = self
            .project
            .iter()
            .filter(|p| p.action == ResourceAction::Created)
            .count();
        let files = self
            .files
            .iter()
            .filter(|f| f.action != FileAction::Unchanged)
            .count();
        let variables = self
            .variables
            .iter()
            .filter(|v| matches!(v.action, VariableAction::Created | VariableAction::Updated))
            .count();
        groups + project + files + variables
    }

    /// True when the run found everything already in place.
    pub fn is_noop(&self) -> bool {
        self.write_count() == 0
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Applies desired state through a [`RemoteClient`].
pub struct Reconciler {
    client: Arc<dyn RemoteClient>,
    retry: RetryPolicy,
    branch: String,
}

impl Reconciler {
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            branch: DEFAULT_BRANCH.to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Apply the full desired state.
    pub async fn apply(&self, state: &DesiredResourceState) -> ReconcileResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let project = self
            .ensure_project(&state.project, &state.group_segments, &mut report)
            .await?;

        for (path, content) in &state.files {
            let action = self.apply_file(project.id, path, content, &mut report).await?;
            report.files.push(FileOutcome {
                path: path.clone(),
                action,
            });
        }

        self.apply_variables(project.id, &state.variables, &mut report)
            .await?;

        info!(
            "Reconciled {}: {} write(s), {} warning(s)",
            project.path_with_namespace,
            report.write_count(),
            report.warnings.len()
        );
        Ok(report)
    }

    /// Resolve or create each group from root to leaf. Returns the innermost id.
    pub async fn ensure_groups(
        &self,
        segments: &[String],
        report: &mut ReconcileReport,
    ) -> ReconcileResult<Option<u64>> {
        let mut parent: Option<Group> = None;

        for segment in segments {
            if segment.is_empty() {
                return Err(ReconcileError::InvalidPath(segments.join("/")));
            }
            let full_path = match &parent {
                Some(p) => format!("{}/{}", p.full_path, segment),
                None => segment.clone(),
            };

            let (group, action) = self
                .ensure_group(parent.as_ref(), &full_path, segment, report)
                .await?;
            report.groups.push(GroupOutcome {
                full_path: full_path.clone(),
                id: group.id,
                action,
            });
            parent = Some(group);
        }

        Ok(parent.map(|g| g.id))
    }

    async fn ensure_group(
        &self,
        parent: Option<&Group>,
        full_path: &str,
        name: &str,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<(Group, ResourceAction)> {
        match self.client.get_group_by_path(full_path).await {
            Ok(group) => {
                debug!("Group found: {} (id {})", full_path, group.id);
                return Ok((group, ResourceAction::Found));
            }
            Err(ApiError::NotFound(_)) => {}
            Err(e) if e.is_permission_denied() => {
                report.warn(format!(
                    "Group lookup for {} denied ({}); trying to create it",
                    full_path, e
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let parent_id = parent.map(|p| p.id);
        match self.client.create_group(parent_id, name).await {
            Ok(group) => {
                info!("Created group {} (id {})", full_path, group.id);
                Ok((group, ResourceAction::Created))
            }
            Err(ApiError::Conflict(_)) => {
                info!("Group {} already exists, resolving it", full_path);
                let group = self.resolve_existing_group(parent_id, full_path, name).await?;
                Ok((group, ResourceAction::Found))
            }
            Err(source) => Err(ReconcileError::GroupCreation {
                path: full_path.to_string(),
                source,
            }),
        }
    }

    /// Find a group that a creation attempt reported as taken.
    async fn resolve_existing_group(
        &self,
        parent_id: Option<u64>,
        full_path: &str,
        name: &str,
    ) -> ReconcileResult<Group> {
        let client = &self.client;
        let lookup = self
            .retry
            .retry_not_found(full_path, move || client.get_group_by_path(full_path))
            .await;

        match lookup {
            Ok(group) => return Ok(group),
            Err(e) if e.is_not_found() || e.is_permission_denied() => {
                debug!("Group {} still not resolvable by path: {}", full_path, e);
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(parent_id) = parent_id {
            let children = self.client.list_subgroups(parent_id, name).await?;
            if let Some(group) = children.into_iter().find(|g| g.path == name) {
                return Ok(group);
            }
        }

        Err(ReconcileError::GroupUnresolvable(full_path.to_string()))
    }

    /// Look up a project by path, falling back to a search by name.
    pub async fn find_project(
        &self,
        path: &str,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<Option<Project>> {
        match self.client.get_project_by_path(path).await {
            Ok(project) => return Ok(Some(project)),
            Err(ApiError::NotFound(_)) => {}
            Err(e) if e.is_permission_denied() => {
                report.warn(format!("Project lookup for {} denied ({})", path, e));
            }
            Err(e) => return Err(e.into()),
        }

        let name = path.rsplit('/').next().unwrap_or(path);
        match self.client.list_projects(name).await {
            Ok(projects) => Ok(projects
                .into_iter()
                .find(|p| p.path_with_namespace == path)),
            Err(e) if e.is_permission_denied() => {
                report.warn(format!("Project search for {} denied ({})", name, e));
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the target project, creating it and its groups when allowed.
    ///
    /// Groups are only looked up or created once the project is known to be
    /// missing, so an existing project never touches its namespace.
    pub async fn ensure_project(
        &self,
        target: &ProjectTarget,
        group_segments: &[String],
        report: &mut ReconcileReport,
    ) -> ReconcileResult<Project> {
        if let Some(project) = self.find_project(&target.path, report).await? {
            debug!("Project found: {} (id {})", target.path, project.id);
            report.project = Some(ProjectOutcome {
                project: project.clone(),
                action: ResourceAction::Found,
            });
            return Ok(project);
        }

        if !target.create_if_absent {
            return Err(ReconcileError::ProjectNotFound {
                path: target.path.clone(),
                hint: "use --create-project to create it".to_string(),
            });
        }

        let namespace_id = if self.is_personal_namespace(group_segments).await {
            None
        } else {
            self.ensure_groups(group_segments, report).await?
        };

        let name = target.path.rsplit('/').next().unwrap_or(&target.path);
        let (project, action) = match self.client.create_project(namespace_id, name).await {
            Ok(project) => {
                info!("Created project {} (id {})", target.path, project.id);
                (project, ResourceAction::Created)
            }
            Err(ApiError::Conflict(_)) => {
                info!("Project {} already exists, resolving it", target.path);
                let project = self.resolve_existing_project(&target.path, report).await?;
                (project, ResourceAction::Found)
            }
            Err(source) => {
                return Err(ReconcileError::ProjectCreation {
                    path: target.path.clone(),
                    source,
                })
            }
        };

        report.project = Some(ProjectOutcome {
            project: project.clone(),
            action,
        });
        Ok(project)
    }

    /// Whether the namespace is the authenticated user's own.
    async fn is_personal_namespace(&self, group_segments: &[String]) -> bool {
        let [namespace] = group_segments else {
            return false;
        };
        match self.client.current_user().await {
            Ok(user) => user.username == *namespace,
            Err(e) => {
                debug!("Could not read the current user: {}", e);
                false
            }
        }
    }

    /// Find a project that a creation attempt reported as taken.
    async fn resolve_existing_project(
        &self,
        path: &str,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<Project> {
        let creation_error = |source| ReconcileError::ProjectCreation {
            path: path.to_string(),
            source,
        };

        let client = &self.client;
        let lookup = self
            .retry
            .retry_not_found(path, move || client.get_project_by_path(path))
            .await;
        match lookup {
            Ok(project) => return Ok(project),
            Err(e) if e.is_not_found() || e.is_permission_denied() => {
                debug!("Project {} still not resolvable by path: {}", path, e);
            }
            Err(e) => return Err(creation_error(e)),
        }

        self.find_project(path, report).await?.ok_or_else(|| {
            creation_error(ApiError::Conflict(format!(
                "{} reported as existing but not found",
                path
            )))
        })
    }

    fn commit(&self, path: &str, content: &str) -> FileCommit {
        FileCommit {
            branch: self.branch.clone(),
            content: content.to_string(),
            commit_message: format!("Add CI/CD: {}", path),
        }
    }

    /// Create or update one file. Identical content is left alone.
    pub async fn apply_file(
        &self,
        project_id: u64,
        path: &str,
        content: &str,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<FileAction> {
        let file_error = |source| ReconcileError::File {
            path: path.to_string(),
            source,
        };

        match self.client.get_file(project_id, path, &self.branch).await {
            Ok(existing) => {
                return self
                    .update_file_if_changed(project_id, path, &existing, content)
                    .await
            }
            Err(ApiError::NotFound(_)) => {}
            Err(e) if e.is_permission_denied() => {
                report.warn(format!("Reading {} denied ({}); writing blindly", path, e));
            }
            Err(e) => return Err(file_error(e)),
        }

        let commit = self.commit(path, content);
        match self.client.create_file(project_id, path, &commit).await {
            Ok(()) => {
                info!("Created {}", path);
                Ok(FileAction::Created)
            }
            Err(ApiError::Conflict(_)) => {
                debug!("{} appeared concurrently, updating it", path);
                let client = &self.client;
                let branch = self.branch.as_str();
                match self
                    .retry
                    .retry_not_found(path, move || client.get_file(project_id, path, branch))
                    .await
                {
                    Ok(existing) => {
                        self.update_file_if_changed(project_id, path, &existing, content)
                            .await
                    }
                    Err(e) if e.is_permission_denied() => {
                        self.client
                            .update_file(project_id, path, &commit)
                            .await
                            .map_err(file_error)?;
                        Ok(FileAction::Updated)
                    }
                    Err(e) => Err(file_error(e)),
                }
            }
            Err(e) => Err(file_error(e)),
        }
    }

    async fn update_file_if_changed(
        &self,
        project_id: u64,
        path: &str,
        existing: &str,
        content: &str,
    ) -> ReconcileResult<FileAction> {
        if existing == content {
            debug!("{} unchanged", path);
            return Ok(FileAction::Unchanged);
        }
        self.client
            .update_file(project_id, path, &self.commit(path, content))
            .await
            .map_err(|source| ReconcileError::File {
                path: path.to_string(),
                source,
            })?;
        info!("Updated {}", path);
        Ok(FileAction::Updated)
    }

    /// Enumerate every variable of the project, keyed by name and scope.
    async fn snapshot_variables(
        &self,
        project_id: u64,
    ) -> Result<BTreeMap<VariableKey, CiVariable>, ApiError> {
        let variables = self.client.list_variables(project_id).await?;
        Ok(variables
            .into_iter()
            .map(|v| (VariableKey::new(&v.key, &v.environment_scope), v))
            .collect())
    }

    async fn apply_variables(
        &self,
        project_id: u64,
        variables: &BTreeMap<VariableKey, VariableSpec>,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<()> {
        if variables.is_empty() {
            return Ok(());
        }

        let existing = match self.snapshot_variables(project_id).await {
            Ok(existing) => Some(existing),
            Err(e) if e.is_permission_denied() => {
                report.warn(format!(
                    "Listing variables denied ({}); creating them without comparison",
                    e
                ));
                None
            }
            Err(e) => return Err(e.into()),
        };

        for (key, spec) in variables {
            let current = existing.as_ref().and_then(|vars| vars.get(key));
            let action = self.apply_variable(project_id, key, spec, current).await?;
            report.variables.push(VariableOutcome {
                key: key.clone(),
                masked: spec.masked,
                protected: spec.protected,
                action,
            });
        }
        Ok(())
    }

    /// Create or update one variable, matched on key and environment scope.
    ///
    /// `current` is the record found by the last enumeration, if any.
    pub async fn apply_variable(
        &self,
        project_id: u64,
        key: &VariableKey,
        spec: &VariableSpec,
        current: Option<&CiVariable>,
    ) -> ReconcileResult<VariableAction> {
        let variable_error = |source| ReconcileError::Variable {
            key: key.name.clone(),
            scope: key.scope.clone(),
            source,
        };

        if let Some(current) = current {
            return self.update_variable_if_changed(project_id, key, spec, current).await;
        }

        match self
            .client
            .create_variable(project_id, &spec.to_variable(key))
            .await
        {
            Ok(()) => {
                info!("Created variable {}", key);
                Ok(VariableAction::Created)
            }
            Err(ApiError::Conflict(_)) => {
                debug!("Variable {} appeared concurrently, re-reading", key);
                match self.snapshot_variables(project_id).await {
                    Ok(vars) => match vars.get(key) {
                        Some(current) => {
                            self.update_variable_if_changed(project_id, key, spec, current)
                                .await
                        }
                        None => Err(variable_error(ApiError::Conflict(format!(
                            "{} reported as existing but not listed",
                            key
                        )))),
                    },
                    Err(e) if e.is_permission_denied() => {
                        if spec.placeholder {
                            return Ok(VariableAction::KeptExisting);
                        }
                        self.client
                            .update_variable(project_id, &spec.to_variable(key))
                            .await
                            .map_err(variable_error)?;
                        Ok(VariableAction::Updated)
                    }
                    Err(e) => Err(variable_error(e)),
                }
            }
            Err(e) => Err(variable_error(e)),
        }
    }

    async fn update_variable_if_changed(
        &self,
        project_id: u64,
        key: &VariableKey,
        spec: &VariableSpec,
        current: &CiVariable,
    ) -> ReconcileResult<VariableAction> {
        if spec.placeholder {
            debug!("Variable {} already set, keeping it", key);
            return Ok(VariableAction::KeptExisting);
        }
        if current.is_hidden() {
            debug!("Variable {} has a hidden value, keeping it", key);
            return Ok(VariableAction::KeptExisting);
        }
        if spec.matches(current) {
            return Ok(VariableAction::Unchanged);
        }
        self.client
            .update_variable(project_id, &spec.to_variable(key))
            .await
            .map_err(|source| ReconcileError::Variable {
                key: key.name.clone(),
                scope: key.scope.clone(),
                source,
            })?;
        info!("Updated variable {}", key);
        Ok(VariableAction::Updated)
    }
}
