//! In-memory GitLab for testing.
//!
//! Provides a stateful fake of the RemoteClient trait that enforces the same
//! uniqueness rules as GitLab (group and project paths, file paths, variable
//! key plus scope) and can simulate the failure modes the reconciler has to
//! survive: eventual consistency, creation races and permission denials.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::client::RemoteClient;
use crate::error::{ApiError, ApiResult};
use crate::types::{
    CiVariable, ClusterAgent, FileCommit, Group, Namespace, Pipeline, Project, Runner,
    RunnerSource, TreeEntry, User,
};

/// Captured call information for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedCall {
    pub method: String,
    /// Path, key or id the call was about
    pub target: String,
}

#[derive(Default)]
struct State {
    next_id: u64,
    user: Option<User>,
    groups: Vec<Group>,
    projects: Vec<Project>,
    /// (project id, path) -> content
    files: BTreeMap<(u64, String), String>,
    variables: BTreeMap<u64, Vec<CiVariable>>,
    pipelines: BTreeMap<u64, Vec<Pipeline>>,
    runners: Vec<(RunnerSource, Runner)>,
    agents: BTreeMap<u64, Vec<ClusterAgent>>,

    /// Full path -> remaining lookups that miss an existing group
    lagging_groups: BTreeMap<String, u32>,
    /// Full path -> remaining lookups that miss an existing project
    lagging_projects: BTreeMap<String, u32>,
    denied_groups: BTreeSet<String>,
    denied_projects: BTreeSet<String>,
    raced_groups: BTreeSet<String>,
    raced_projects: BTreeSet<String>,
    /// File path -> content written by a concurrent editor on create
    raced_files: BTreeMap<String, String>,
    /// (key, scope) created by a concurrent editor on create
    raced_variables: BTreeSet<(String, String)>,
    deny_variable_listing: bool,
    failures: BTreeMap<String, ApiError>,
}

impl State {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn group_by_path(&self, full_path: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.full_path == full_path)
    }

    fn project_by_path(&self, full_path: &str) -> Option<&Project> {
        self.projects
            .iter()
            .find(|p| p.path_with_namespace == full_path)
    }

    fn insert_group(&mut self, parent_id: Option<u64>, name: &str) -> ApiResult<Group> {
        let full_path = match parent_id {
            Some(id) => {
                let parent = self
                    .groups
                    .iter()
                    .find(|g| g.id == id)
                    .ok_or_else(|| ApiError::NotFound(format!("404 Group {} Not Found", id)))?;
                format!("{}/{}", parent.full_path, name)
            }
            None => name.to_string(),
        };
        if self.group_by_path(&full_path).is_some() {
            return Err(ApiError::Conflict(
                r#"{"message":"Failed to save group {:path=>["has already been taken"]}"}"#
                    .to_string(),
            ));
        }
        let group = Group {
            id: self.allocate_id(),
            name: name.to_string(),
            path: name.to_string(),
            full_path,
            parent_id,
        };
        self.groups.push(group.clone());
        Ok(group)
    }

    fn ensure_group_chain(&mut self, full_path: &str) -> Option<u64> {
        let mut parent_id = None;
        let mut current = String::new();
        for segment in full_path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            let existing = self.group_by_path(&current).map(|g| g.id);
            let id = match existing {
                Some(id) => id,
                None => self.insert_group(parent_id, segment).ok()?.id,
            };
            parent_id = Some(id);
        }
        parent_id
    }

    fn insert_project(&mut self, namespace_id: Option<u64>, name: &str) -> ApiResult<Project> {
        let namespace = match namespace_id {
            Some(id) => {
                let group = self
                    .groups
                    .iter()
                    .find(|g| g.id == id)
                    .ok_or_else(|| ApiError::NotFound(format!("404 Namespace {} Not Found", id)))?;
                Namespace {
                    id,
                    full_path: group.full_path.clone(),
                }
            }
            None => Namespace {
                id: 0,
                full_path: self
                    .user
                    .as_ref()
                    .map(|u| u.username.clone())
                    .unwrap_or_else(|| "root".to_string()),
            },
        };
        let path_with_namespace = format!("{}/{}", namespace.full_path, name);
        if self.project_by_path(&path_with_namespace).is_some() {
            return Err(ApiError::Conflict(
                r#"{"message":{"path":["has already been taken"]}}"#.to_string(),
            ));
        }
        let project = Project {
            id: self.allocate_id(),
            name: name.to_string(),
            path: name.to_string(),
            path_with_namespace: path_with_namespace.clone(),
            web_url: format!("https://gitlab.test/{}", path_with_namespace),
            default_branch: Some("main".to_string()),
            namespace: Some(namespace),
        };
        self.projects.push(project.clone());
        Ok(project)
    }

    fn project_id(&self, full_path: &str) -> Option<u64> {
        self.project_by_path(full_path).map(|p| p.id)
    }

    fn ensure_project(&mut self, full_path: &str) -> u64 {
        if let Some(id) = self.project_id(full_path) {
            return id;
        }
        let (namespace, name) = match full_path.rsplit_once('/') {
            Some((namespace, name)) => (Some(namespace), name),
            None => (None, full_path),
        };
        let namespace_id = namespace.and_then(|ns| self.ensure_group_chain(ns));
        self.insert_project(namespace_id, name)
            .map(|p| p.id)
            .unwrap_or_default()
    }

    fn project_exists(&self, project_id: u64) -> ApiResult<()> {
        if self.projects.iter().any(|p| p.id == project_id) {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!(
                "404 Project {} Not Found",
                project_id
            )))
        }
    }
}

/// Stateful in-memory GitLab.
///
/// Clones share state, so a test can keep one handle for inspection and pass
/// another to the code under test.
#[derive(Clone, Default)]
pub struct InMemoryGitLab {
    state: Arc<RwLock<State>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
}

impl InMemoryGitLab {
    pub fn new() -> Self {
        let gitlab = Self::default();
        gitlab.state.write().user = Some(User {
            id: 1,
            username: "root".to_string(),
            name: "Administrator".to_string(),
        });
        gitlab
    }

    /// Set the authenticated user.
    pub fn with_user(self, username: &str) -> Self {
        self.state.write().user = Some(User {
            id: 1,
            username: username.to_string(),
            name: username.to_string(),
        });
        self
    }

    /// Remove the authenticated user so `current_user` fails with 401.
    pub fn without_user(self) -> Self {
        self.state.write().user = None;
        self
    }

    /// Add a group and any missing parents.
    pub fn with_group(self, full_path: &str) -> Self {
        self.state.write().ensure_group_chain(full_path);
        self
    }

    /// Add a project and any missing parent groups.
    pub fn with_project(self, full_path: &str) -> Self {
        self.state.write().ensure_project(full_path);
        self
    }

    /// Add a project in the authenticated user's namespace.
    pub fn with_personal_project(self, name: &str) -> Self {
        // Name clashes are a test setup error and surface as a missing project
        let _ = self.state.write().insert_project(None, name);
        self
    }

    /// Add a repository file, creating the project when needed.
    pub fn with_file(self, project_path: &str, path: &str, content: &str) -> Self {
        {
            let mut state = self.state.write();
            let id = state.ensure_project(project_path);
            state
                .files
                .insert((id, path.to_string()), content.to_string());
        }
        self
    }

    /// Add a variable, creating the project when needed.
    pub fn with_variable(self, project_path: &str, variable: CiVariable) -> Self {
        {
            let mut state = self.state.write();
            let id = state.ensure_project(project_path);
            state.variables.entry(id).or_default().push(variable);
        }
        self
    }

    pub fn with_pipeline(self, project_path: &str, pipeline: Pipeline) -> Self {
        {
            let mut state = self.state.write();
            let id = state.ensure_project(project_path);
            state.pipelines.entry(id).or_default().insert(0, pipeline);
        }
        self
    }

    pub fn with_runner(self, source: RunnerSource, runner: Runner) -> Self {
        self.state.write().runners.push((source, runner));
        self
    }

    /// Register a cluster agent on a project, creating the project when needed.
    pub fn with_cluster_agent(self, project_path: &str, name: &str) -> Self {
        {
            let mut state = self.state.write();
            let id = state.ensure_project(project_path);
            let agent_id = state.allocate_id();
            state.agents.entry(id).or_default().push(ClusterAgent {
                id: agent_id,
                name: name.to_string(),
            });
        }
        self
    }

    /// Make the next `misses` lookups of an existing group return not-found.
    pub fn lag_group_visibility(self, full_path: &str, misses: u32) -> Self {
        self.state
            .write()
            .lagging_groups
            .insert(full_path.to_string(), misses);
        self
    }

    /// Make the next `misses` lookups of an existing project return not-found.
    pub fn lag_project_visibility(self, full_path: &str, misses: u32) -> Self {
        self.state
            .write()
            .lagging_projects
            .insert(full_path.to_string(), misses);
        self
    }

    /// Lookups of this group path always return permission denied.
    pub fn deny_group_lookup(self, full_path: &str) -> Self {
        self.state
            .write()
            .denied_groups
            .insert(full_path.to_string());
        self
    }

    /// Lookups of this project path always return permission denied.
    pub fn deny_project_lookup(self, full_path: &str) -> Self {
        self.state
            .write()
            .denied_projects
            .insert(full_path.to_string());
        self
    }

    /// A concurrent editor creates this project just before our creation request.
    pub fn race_project_creation(self, full_path: &str) -> Self {
        self.state
            .write()
            .raced_projects
            .insert(full_path.to_string());
        self
    }

    /// A concurrent editor creates this group just before our creation request.
    pub fn race_group_creation(self, full_path: &str) -> Self {
        self.state
            .write()
            .raced_groups
            .insert(full_path.to_string());
        self
    }

    /// A concurrent editor creates this file just before our creation request.
    pub fn race_file_creation(self, path: &str, their_content: &str) -> Self {
        self.state
            .write()
            .raced_files
            .insert(path.to_string(), their_content.to_string());
        self
    }

    /// A concurrent editor creates this variable just before our creation request.
    pub fn race_variable_creation(self, key: &str, scope: &str) -> Self {
        self.state
            .write()
            .raced_variables
            .insert((key.to_string(), scope.to_string()));
        self
    }

    /// Variable listing fails with permission denied.
    pub fn deny_variable_listing(self) -> Self {
        self.state.write().deny_variable_listing = true;
        self
    }

    /// Every call to `method` fails with `error`.
    pub fn fail_method(self, method: &str, error: ApiError) -> Self {
        self.state
            .write()
            .failures
            .insert(method.to_string(), error);
        self
    }

    pub fn group(&self, full_path: &str) -> Option<Group> {
        self.state.read().group_by_path(full_path).cloned()
    }

    pub fn groups(&self) -> Vec<Group> {
        self.state.read().groups.clone()
    }

    pub fn project(&self, full_path: &str) -> Option<Project> {
        self.state.read().project_by_path(full_path).cloned()
    }

    pub fn file(&self, project_path: &str, path: &str) -> Option<String> {
        let state = self.state.read();
        let id = state.project_id(project_path)?;
        state.files.get(&(id, path.to_string())).cloned()
    }

    pub fn variables(&self, project_path: &str) -> Vec<CiVariable> {
        let state = self.state.read();
        state
            .project_id(project_path)
            .and_then(|id| state.variables.get(&id).cloned())
            .unwrap_or_default()
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.captured_calls.read().iter().any(|c| c.method == method)
    }

    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Number of calls that changed remote state.
    pub fn write_count(&self) -> usize {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method.starts_with("create_") || c.method.starts_with("update_"))
            .count()
    }

    fn record_call(&self, method: &str, target: impl Into<String>) -> ApiResult<()> {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            target: target.into(),
        });
        match self.state.read().failures.get(method) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Consume one pending miss for `path`, returning true when the lookup should miss.
fn take_miss(lagging: &mut BTreeMap<String, u32>, path: &str) -> bool {
    match lagging.get_mut(path) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl RemoteClient for InMemoryGitLab {
    async fn current_user(&self) -> ApiResult<User> {
        self.record_call("current_user", "")?;
        self.state
            .read()
            .user
            .clone()
            .ok_or_else(|| ApiError::Unauthorized("401 Unauthorized".to_string()))
    }

    async fn get_group_by_path(&self, full_path: &str) -> ApiResult<Group> {
        self.record_call("get_group_by_path", full_path)?;
        let mut state = self.state.write();
        if state.denied_groups.contains(full_path) {
            return Err(ApiError::Forbidden("403 Forbidden".to_string()));
        }
        if take_miss(&mut state.lagging_groups, full_path) {
            return Err(ApiError::NotFound("404 Group Not Found".to_string()));
        }
        state
            .group_by_path(full_path)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("404 Group Not Found".to_string()))
    }

    async fn list_subgroups(&self, parent_id: u64, search: &str) -> ApiResult<Vec<Group>> {
        self.record_call("list_subgroups", parent_id.to_string())?;
        let state = self.state.read();
        Ok(state
            .groups
            .iter()
            .filter(|g| g.parent_id == Some(parent_id) && g.path.contains(search))
            .cloned()
            .collect())
    }

    async fn create_group(&self, parent_id: Option<u64>, name: &str) -> ApiResult<Group> {
        self.record_call("create_group", name)?;
        let mut state = self.state.write();
        let full_path = match parent_id {
            Some(id) => state
                .groups
                .iter()
                .find(|g| g.id == id)
                .map(|g| format!("{}/{}", g.full_path, name))
                .unwrap_or_else(|| name.to_string()),
            None => name.to_string(),
        };
        if state.raced_groups.remove(&full_path) {
            state.insert_group(parent_id, name)?;
            return Err(ApiError::Conflict("has already been taken".to_string()));
        }
        state.insert_group(parent_id, name)
    }

    async fn list_group_projects(&self, group_path: &str) -> ApiResult<Vec<Project>> {
        self.record_call("list_group_projects", group_path)?;
        let state = self.state.read();
        if state.group_by_path(group_path).is_none() {
            return Err(ApiError::NotFound("404 Group Not Found".to_string()));
        }
        Ok(state
            .projects
            .iter()
            .filter(|p| {
                p.namespace
                    .as_ref()
                    .map(|ns| ns.full_path == group_path)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn get_project_by_path(&self, full_path: &str) -> ApiResult<Project> {
        self.record_call("get_project_by_path", full_path)?;
        let mut state = self.state.write();
        if state.denied_projects.contains(full_path) {
            return Err(ApiError::Forbidden("403 Forbidden".to_string()));
        }
        if take_miss(&mut state.lagging_projects, full_path) {
            return Err(ApiError::NotFound("404 Project Not Found".to_string()));
        }
        state
            .project_by_path(full_path)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("404 Project Not Found".to_string()))
    }

    async fn list_projects(&self, search: &str) -> ApiResult<Vec<Project>> {
        self.record_call("list_projects", search)?;
        let state = self.state.read();
        Ok(state
            .projects
            .iter()
            .filter(|p| p.name.contains(search))
            .cloned()
            .collect())
    }

    async fn create_project(&self, namespace_id: Option<u64>, name: &str) -> ApiResult<Project> {
        self.record_call("create_project", name)?;
        let mut state = self.state.write();
        let project = state.insert_project(namespace_id, name)?;
        if state.raced_projects.remove(&project.path_with_namespace) {
            return Err(ApiError::Conflict("has already been taken".to_string()));
        }
        Ok(project)
    }

    async fn get_file(&self, project_id: u64, path: &str, _git_ref: &str) -> ApiResult<String> {
        self.record_call("get_file", path)?;
        let state = self.state.read();
        state.project_exists(project_id)?;
        state
            .files
            .get(&(project_id, path.to_string()))
            .cloned()
            .ok_or_else(|| ApiError::NotFound("404 File Not Found".to_string()))
    }

    async fn create_file(
        &self,
        project_id: u64,
        path: &str,
        commit: &FileCommit,
    ) -> ApiResult<()> {
        self.record_call("create_file", path)?;
        let mut state = self.state.write();
        state.project_exists(project_id)?;
        let key = (project_id, path.to_string());
        if let Some(theirs) = state.raced_files.remove(path) {
            state.files.insert(key.clone(), theirs);
        }
        if state.files.contains_key(&key) {
            return Err(ApiError::Conflict(
                "A file with this name already exists".to_string(),
            ));
        }
        state.files.insert(key, commit.content.clone());
        Ok(())
    }

    async fn update_file(
        &self,
        project_id: u64,
        path: &str,
        commit: &FileCommit,
    ) -> ApiResult<()> {
        self.record_call("update_file", path)?;
        let mut state = self.state.write();
        state.project_exists(project_id)?;
        match state.files.get_mut(&(project_id, path.to_string())) {
            Some(content) => {
                *content = commit.content.clone();
                Ok(())
            }
            None => Err(ApiError::NotFound("404 File Not Found".to_string())),
        }
    }

    async fn list_repository_tree(
        &self,
        project_id: u64,
        _git_ref: &str,
    ) -> ApiResult<Vec<TreeEntry>> {
        self.record_call("list_repository_tree", project_id.to_string())?;
        let state = self.state.read();
        state.project_exists(project_id)?;
        Ok(state
            .files
            .keys()
            .filter(|(id, _)| *id == project_id)
            .map(|(_, path)| TreeEntry {
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                path: path.clone(),
                kind: "blob".to_string(),
            })
            .collect())
    }

    async fn list_variables(&self, project_id: u64) -> ApiResult<Vec<CiVariable>> {
        self.record_call("list_variables", project_id.to_string())?;
        let state = self.state.read();
        state.project_exists(project_id)?;
        if state.deny_variable_listing {
            return Err(ApiError::Forbidden("403 Forbidden".to_string()));
        }
        Ok(state
            .variables
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_variable(&self, project_id: u64, variable: &CiVariable) -> ApiResult<()> {
        self.record_call("create_variable", &variable.key)?;
        let mut state = self.state.write();
        state.project_exists(project_id)?;
        let raced = state
            .raced_variables
            .remove(&(variable.key.clone(), variable.environment_scope.clone()));
        let records = state.variables.entry(project_id).or_default();
        if raced {
            records.push(
                CiVariable::new(&variable.key, "set-by-someone-else")
                    .scope(&variable.environment_scope),
            );
        }
        if records
            .iter()
            .any(|v| v.matches(&variable.key, &variable.environment_scope))
        {
            return Err(ApiError::Conflict(format!(
                "({}) has already been taken",
                variable.key
            )));
        }
        records.push(variable.clone());
        Ok(())
    }

    async fn update_variable(&self, project_id: u64, variable: &CiVariable) -> ApiResult<()> {
        self.record_call("update_variable", &variable.key)?;
        let mut state = self.state.write();
        state.project_exists(project_id)?;
        let existing = state.variables.get_mut(&project_id).and_then(|records| {
            records
                .iter_mut()
                .find(|v| v.matches(&variable.key, &variable.environment_scope))
        });
        match existing {
            Some(record) => {
                *record = variable.clone();
                Ok(())
            }
            None => Err(ApiError::NotFound("404 Variable Not Found".to_string())),
        }
    }

    async fn list_pipelines(&self, project_id: u64, per_page: u32) -> ApiResult<Vec<Pipeline>> {
        self.record_call("list_pipelines", project_id.to_string())?;
        let state = self.state.read();
        state.project_exists(project_id)?;
        Ok(state
            .pipelines
            .get(&project_id)
            .map(|p| p.iter().take(per_page as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_runners(&self, source: &RunnerSource) -> ApiResult<Vec<Runner>> {
        self.record_call("list_runners", format!("{:?}", source))?;
        let state = self.state.read();
        Ok(state
            .runners
            .iter()
            .filter(|(s, _)| match (s, source) {
                (RunnerSource::Instance(_), RunnerSource::Instance(_)) => true,
                _ => s == source,
            })
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn get_runner(&self, runner_id: u64) -> ApiResult<Runner> {
        self.record_call("get_runner", runner_id.to_string())?;
        self.state
            .read()
            .runners
            .iter()
            .map(|(_, r)| r)
            .find(|r| r.id == runner_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("404 Runner Not Found".to_string()))
    }

    async fn list_cluster_agents(&self, project_id: u64) -> ApiResult<Vec<ClusterAgent>> {
        self.record_call("list_cluster_agents", project_id.to_string())?;
        let state = self.state.read();
        state.project_exists(project_id)?;
        Ok(state.agents.get(&project_id).cloned().unwrap_or_default())
    }
}
