//! Read-only discovery of runners, cluster agents and project status.
//!
//! Each source is queried independently. A failing source yields a
//! [`DiscoveryError`] that is collected next to the partial result, so callers
//! can show what was found and degrade on the rest.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::client::RemoteClient;
use crate::error::ApiError;
use crate::types::{CiVariable, Pipeline, Runner, RunnerSource};

/// A discovery source that could not be read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Could not read {source_name}: {error}")]
pub struct DiscoveryError {
    pub source_name: String,
    pub error: ApiError,
}

impl DiscoveryError {
    fn new(source_name: impl Into<String>, error: ApiError) -> Self {
        Self {
            source_name: source_name.into(),
            error,
        }
    }
}

/// Items found plus the sources that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered<T> {
    pub items: Vec<T>,
    pub errors: Vec<DiscoveryError>,
}

impl<T> Default for Discovered<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Parent group paths of a project path, root first.
///
/// `a/b/c` yields `a` and `a/b`.
pub fn parent_groups(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    (1..segments.len())
        .map(|i| segments[..i].join("/"))
        .collect()
}

/// Discover tagged runners available to the template repository and the project.
///
/// Sources, in order: active instance runners, runners of every parent group
/// of the template repository and of the project, and the project's own
/// runners. Runners are deduplicated by id and untagged runners are dropped.
pub async fn discover_runners(
    client: &dyn RemoteClient,
    template_repo: Option<&str>,
    project_path: Option<&str>,
) -> Discovered<Runner> {
    let mut sources = vec![RunnerSource::Instance("active".to_string())];
    for repo in [template_repo, project_path].into_iter().flatten() {
        sources.extend(parent_groups(repo).into_iter().map(RunnerSource::Group));
    }

    let mut found = Discovered::default();
    let mut seen = BTreeSet::new();

    let mut collect = |found: &mut Discovered<Runner>, runners: Vec<Runner>| {
        for runner in runners {
            if !runner.tags.is_empty() && seen.insert(runner.id) {
                found.items.push(runner);
            }
        }
    };

    for source in &sources {
        match client.list_runners(source).await {
            Ok(runners) => collect(&mut found, runners),
            Err(e) => {
                debug!("Runner source {:?} unavailable: {}", source, e);
                found.errors.push(DiscoveryError::new(format!("{:?}", source), e));
            }
        }
    }

    if let Some(path) = project_path {
        match client.get_project_by_path(path).await {
            Ok(project) => match client.list_runners(&RunnerSource::Project(project.id)).await {
                Ok(runners) => collect(&mut found, runners),
                Err(e) => found
                    .errors
                    .push(DiscoveryError::new(format!("project {} runners", path), e)),
            },
            Err(e) => found
                .errors
                .push(DiscoveryError::new(format!("project {}", path), e)),
        }
    }

    found
}

/// Index of the runner to propose by default.
///
/// The first runner whose tags include every default tag, else the first runner.
pub fn default_runner_index(runners: &[Runner], default_tags: &[String]) -> usize {
    if default_tags.is_empty() {
        return 0;
    }
    runners
        .iter()
        .position(|r| default_tags.iter().all(|t| r.tags.contains(t)))
        .unwrap_or(0)
}

/// A Kubernetes agent usable as a `KUBE_CONTEXT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterContext {
    pub agent_name: String,
    /// Path of the project holding the agent configuration
    pub config_project: String,
    /// `<config project path>:<agent name>`
    pub context: String,
}

/// Discover cluster agents registered in the parent groups of the template
/// repository and the project.
pub async fn discover_cluster_agents(
    client: &dyn RemoteClient,
    template_repo: Option<&str>,
    project_path: Option<&str>,
) -> Discovered<ClusterContext> {
    let mut groups = Vec::new();
    for repo in [template_repo, project_path].into_iter().flatten() {
        for group in parent_groups(repo) {
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
    }

    let mut found: Discovered<ClusterContext> = Discovered::default();
    for group in &groups {
        let projects = match client.list_group_projects(group).await {
            Ok(projects) => projects,
            Err(e) => {
                found
                    .errors
                    .push(DiscoveryError::new(format!("group {}", group), e));
                continue;
            }
        };

        for project in projects {
            let agents = match client.list_cluster_agents(project.id).await {
                Ok(agents) => agents,
                Err(e) => {
                    debug!(
                        "Agents of {} unavailable: {}",
                        project.path_with_namespace, e
                    );
                    continue;
                }
            };
            for agent in agents {
                let context = format!("{}:{}", project.path_with_namespace, agent.name);
                if found.items.iter().any(|c| c.context == context) {
                    continue;
                }
                found.items.push(ClusterContext {
                    agent_name: agent.name,
                    config_project: project.path_with_namespace.clone(),
                    context,
                });
            }
        }
    }

    found
}

/// CI/CD status of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectStatus {
    pub project_path: String,
    pub web_url: String,
    pub latest_pipeline: Option<Pipeline>,
    /// Configured variables (values never exposed)
    pub variables: Vec<(String, String)>,
    pub errors: Vec<DiscoveryError>,
}

/// Read the latest pipeline and the configured variable keys of a project.
///
/// A missing project is an error; unreadable pipelines or variables degrade.
pub async fn project_status(
    client: &dyn RemoteClient,
    project_path: &str,
) -> Result<ProjectStatus, ApiError> {
    let project = client.get_project_by_path(project_path).await?;
    let mut status = ProjectStatus {
        project_path: project.path_with_namespace.clone(),
        web_url: project.web_url.clone(),
        latest_pipeline: None,
        variables: Vec::new(),
        errors: Vec::new(),
    };

    match client.list_pipelines(project.id, 1).await {
        Ok(pipelines) => status.latest_pipeline = pipelines.into_iter().next(),
        Err(e) => status.errors.push(DiscoveryError::new("pipelines", e)),
    }

    match client.list_variables(project.id).await {
        Ok(variables) => {
            status.variables = variables
                .into_iter()
                .map(|CiVariable { key, environment_scope, .. }| (key, environment_scope))
                .collect();
            status.variables.sort();
        }
        Err(e) => status.errors.push(DiscoveryError::new("variables", e)),
    }

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::InMemoryGitLab;

    fn runner(id: u64, tags: &[&str]) -> Runner {
        Runner {
            id,
            description: format!("runner-{}", id),
            active: true,
            is_shared: false,
            online: true,
            status: "online".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_parent_groups() {
        assert_eq!(parent_groups("a/b/c"), vec!["a", "a/b"]);
        assert!(parent_groups("a").is_empty());
    }

    #[test]
    fn test_default_runner_index() {
        let runners = vec![
            runner(1, &["docker"]),
            runner(2, &["docker", "k8s", "linux"]),
        ];
        let tags = |t: &[&str]| t.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(default_runner_index(&runners, &tags(&["k8s", "docker"])), 1);
        assert_eq!(default_runner_index(&runners, &tags(&["gpu"])), 0);
        assert_eq!(default_runner_index(&runners, &[]), 0);
    }

    #[tokio::test]
    async fn test_discover_runners_dedupes_and_skips_untagged() {
        let gitlab = InMemoryGitLab::new()
            .with_project("team/backend/api")
            .with_runner(RunnerSource::Instance("active".to_string()), runner(1, &["docker"]))
            .with_runner(RunnerSource::Instance("active".to_string()), runner(2, &[]))
            .with_runner(RunnerSource::Group("team".to_string()), runner(1, &["docker"]))
            .with_runner(RunnerSource::Group("team/backend".to_string()), runner(3, &["k8s"]));
        let project_id = gitlab.project("team/backend/api").unwrap().id;
        let gitlab = gitlab.with_runner(RunnerSource::Project(project_id), runner(4, &["deploy"]));

        let found = discover_runners(&gitlab, Some("platform/templates"), Some("team/backend/api")).await;
        let ids: Vec<u64> = found.items.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        assert!(found.errors.is_empty());
    }

    #[tokio::test]
    async fn test_discover_runners_degrades() {
        let gitlab = InMemoryGitLab::new()
            .fail_method("list_runners", ApiError::Forbidden("403".to_string()));
        let found = discover_runners(&gitlab, None, Some("team/api")).await;
        assert!(found.items.is_empty());
        // instance runners, group team, and the missing project
        assert_eq!(found.errors.len(), 3);
    }

    #[tokio::test]
    async fn test_discover_cluster_agents() {
        let gitlab = InMemoryGitLab::new()
            .with_cluster_agent("platform/agents", "cluster-dev")
            .with_cluster_agent("platform/agents", "cluster-pro")
            .with_project("team/api");

        let found =
            discover_cluster_agents(&gitlab, Some("platform/templates"), Some("team/api")).await;
        let contexts: Vec<&str> = found.items.iter().map(|c| c.context.as_str()).collect();
        assert_eq!(
            contexts,
            vec!["platform/agents:cluster-dev", "platform/agents:cluster-pro"]
        );
        assert!(found.errors.is_empty());
    }

    #[tokio::test]
    async fn test_project_status() {
        let gitlab = InMemoryGitLab::new()
            .with_variable("team/api", CiVariable::new("B", "secret").scope("pro"))
            .with_variable("team/api", CiVariable::new("A", "x"))
            .with_pipeline(
                "team/api",
                Pipeline {
                    id: 9,
                    status: "success".to_string(),
                    git_ref: "main".to_string(),
                    web_url: "https://gitlab.test/team/api/-/pipelines/9".to_string(),
                    created_at: None,
                },
            );

        let status = project_status(&gitlab, "team/api").await.unwrap();
        assert_eq!(status.latest_pipeline.unwrap().id, 9);
        assert_eq!(
            status.variables,
            vec![
                ("A".to_string(), "*".to_string()),
                ("B".to_string(), "pro".to_string())
            ]
        );

        let missing = project_status(&gitlab, "team/nope").await;
        assert!(missing.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_project_status_degrades_on_denied_variables() {
        let gitlab = InMemoryGitLab::new()
            .with_project("team/api")
            .deny_variable_listing();
        let status = project_status(&gitlab, "team/api").await.unwrap();
        assert!(status.latest_pipeline.is_none());
        assert_eq!(status.errors.len(), 1);
    }
}
