//! GitLab REST v4 transport over reqwest.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::client::{RemoteClient, PAGE_SIZE};
use crate::error::{ApiError, ApiResult};
use crate::types::{
    encode_path, CiVariable, ClusterAgent, FileCommit, Group, Pipeline, Project, Runner,
    RunnerSource, TreeEntry, User,
};

const USER_AGENT: &str = concat!("hidraulik/", env!("CARGO_PKG_VERSION"));

/// Authenticated GitLab API client.
pub struct GitLabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl GitLabClient {
    /// Create a client for an instance URL such as `https://gitlab.example.com`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!("{} {}", method, path);
        self.http
            .request(method, self.api_url(path))
            .header("PRIVATE-TOKEN", &self.token)
            .header("User-Agent", USER_AGENT)
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status.as_u16(), &body))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ApiResult<T> {
        let response = self.send(self.request(Method::GET, path).query(query)).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> ApiResult<T> {
        let request = self.request(method, path).query(query).json(body);
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn send_ignoring_body<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> ApiResult<()> {
        let request = self.request(method, path).query(query).json(body);
        self.send(request).await?;
        Ok(())
    }

    async fn with_runner_details(&self, runners: Vec<Runner>) -> Vec<Runner> {
        let mut detailed = Vec::with_capacity(runners.len());
        for runner in runners {
            // List responses omit tags; fall back to the summary when the detail is hidden.
            match self.get_runner(runner.id).await {
                Ok(detail) => detailed.push(detail),
                Err(e) => {
                    debug!("Runner {} details unavailable: {}", runner.id, e);
                    detailed.push(runner);
                }
            }
        }
        detailed
    }
}

fn page() -> (&'static str, String) {
    ("per_page", PAGE_SIZE.to_string())
}

#[async_trait]
impl RemoteClient for GitLabClient {
    async fn current_user(&self) -> ApiResult<User> {
        self.get_json("/user", &[]).await
    }

    async fn get_group_by_path(&self, full_path: &str) -> ApiResult<Group> {
        self.get_json(&format!("/groups/{}", encode_path(full_path)), &[])
            .await
    }

    async fn list_subgroups(&self, parent_id: u64, search: &str) -> ApiResult<Vec<Group>> {
        self.get_json(
            &format!("/groups/{}/subgroups", parent_id),
            &[("search", search.to_string()), page()],
        )
        .await
    }

    async fn create_group(&self, parent_id: Option<u64>, name: &str) -> ApiResult<Group> {
        let mut body = json!({ "name": name, "path": name });
        if let Some(parent_id) = parent_id {
            body["parent_id"] = json!(parent_id);
        }
        self.send_json(Method::POST, "/groups", &[], &body).await
    }

    async fn list_group_projects(&self, group_path: &str) -> ApiResult<Vec<Project>> {
        self.get_json(
            &format!("/groups/{}/projects", encode_path(group_path)),
            &[page()],
        )
        .await
    }

    async fn get_project_by_path(&self, full_path: &str) -> ApiResult<Project> {
        self.get_json(&format!("/projects/{}", encode_path(full_path)), &[])
            .await
    }

    async fn list_projects(&self, search: &str) -> ApiResult<Vec<Project>> {
        self.get_json("/projects", &[("search", search.to_string()), page()])
            .await
    }

    async fn create_project(&self, namespace_id: Option<u64>, name: &str) -> ApiResult<Project> {
        let mut body = json!({ "name": name, "path": name });
        if let Some(namespace_id) = namespace_id {
            body["namespace_id"] = json!(namespace_id);
        }
        self.send_json(Method::POST, "/projects", &[], &body).await
    }

    async fn get_file(&self, project_id: u64, path: &str, git_ref: &str) -> ApiResult<String> {
        let url = format!(
            "/projects/{}/repository/files/{}/raw",
            project_id,
            encode_path(path)
        );
        let response = self
            .send(
                self.request(Method::GET, &url)
                    .query(&[("ref", git_ref)]),
            )
            .await?;
        response
            .text()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn create_file(
        &self,
        project_id: u64,
        path: &str,
        commit: &FileCommit,
    ) -> ApiResult<()> {
        let url = format!("/projects/{}/repository/files/{}", project_id, encode_path(path));
        self.send_ignoring_body(Method::POST, &url, &[], commit).await
    }

    async fn update_file(
        &self,
        project_id: u64,
        path: &str,
        commit: &FileCommit,
    ) -> ApiResult<()> {
        let url = format!("/projects/{}/repository/files/{}", project_id, encode_path(path));
        self.send_ignoring_body(Method::PUT, &url, &[], commit).await
    }

    async fn list_repository_tree(
        &self,
        project_id: u64,
        git_ref: &str,
    ) -> ApiResult<Vec<TreeEntry>> {
        self.get_json(
            &format!("/projects/{}/repository/tree", project_id),
            &[
                ("ref", git_ref.to_string()),
                ("recursive", "true".to_string()),
                page(),
            ],
        )
        .await
    }

    async fn list_variables(&self, project_id: u64) -> ApiResult<Vec<CiVariable>> {
        self.get_json(&format!("/projects/{}/variables", project_id), &[page()])
            .await
    }

    async fn create_variable(&self, project_id: u64, variable: &CiVariable) -> ApiResult<()> {
        self.send_ignoring_body(
            Method::POST,
            &format!("/projects/{}/variables", project_id),
            &[],
            variable,
        )
        .await
    }

    async fn update_variable(&self, project_id: u64, variable: &CiVariable) -> ApiResult<()> {
        let url = format!(
            "/projects/{}/variables/{}",
            project_id,
            encode_path(&variable.key)
        );
        self.send_ignoring_body(
            Method::PUT,
            &url,
            &[(
                "filter[environment_scope]",
                variable.environment_scope.clone(),
            )],
            variable,
        )
        .await
    }

    async fn list_pipelines(&self, project_id: u64, per_page: u32) -> ApiResult<Vec<Pipeline>> {
        self.get_json(
            &format!("/projects/{}/pipelines", project_id),
            &[("per_page", per_page.to_string())],
        )
        .await
    }

    async fn list_runners(&self, source: &RunnerSource) -> ApiResult<Vec<Runner>> {
        let runners: Vec<Runner> = match source {
            RunnerSource::Instance(scope) => {
                self.get_json("/runners", &[("scope", scope.clone()), page()])
                    .await?
            }
            RunnerSource::Group(path) => {
                self.get_json(&format!("/groups/{}/runners", encode_path(path)), &[page()])
                    .await?
            }
            RunnerSource::Project(id) => {
                self.get_json(&format!("/projects/{}/runners", id), &[page()])
                    .await?
            }
        };
        Ok(self.with_runner_details(runners).await)
    }

    async fn get_runner(&self, runner_id: u64) -> ApiResult<Runner> {
        self.get_json(&format!("/runners/{}", runner_id), &[]).await
    }

    async fn list_cluster_agents(&self, project_id: u64) -> ApiResult<Vec<ClusterAgent>> {
        self.get_json(&format!("/projects/{}/cluster_agents", project_id), &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        let client = GitLabClient::new("https://gitlab.example.com/", "token");
        assert_eq!(client.base_url(), "https://gitlab.example.com");
        assert_eq!(
            client.api_url("/projects/1"),
            "https://gitlab.example.com/api/v4/projects/1"
        );
    }
}
