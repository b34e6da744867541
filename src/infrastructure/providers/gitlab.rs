//! GitLab REST client (API v4)
//!
//! The configured group may be a numeric id or a group name. Names are
//! resolved through group search once, on first use, together with the
//! group's full path which prefixes every project id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{
    api_error, check, http_client, optional, transport_error, GitOpsClient, ProviderRequest,
    RepoInfo, RepositoryApi, RepositoryCreation, RepositoryProvisioner,
};
use crate::domain::{ChartConfig, CommitResult, GitProvider, TlsMaterial};
use crate::error::ProviderError;

const GITLAB_DEFAULT_HOST: &str = "https://gitlab.com";

#[derive(Debug, Clone, Deserialize)]
struct Group {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct Project {
    http_url_to_repo: String,
    #[serde(default)]
    empty_repo: bool,
}

#[derive(Debug, Serialize)]
struct CreateProject<'a> {
    name: &'a str,
    description: &'a str,
    visibility: &'static str,
    merge_requests_enabled: bool,
    snippets_enabled: bool,
    namespace_id: i64,
}

#[derive(Debug, Serialize)]
struct CommitAction<'a> {
    action: &'static str,
    file_path: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateCommit<'a> {
    branch: &'a str,
    commit_message: &'a str,
    actions: Vec<CommitAction<'a>>,
    author_email: &'a str,
    author_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct Commit {
    id: String,
    authored_date: Option<DateTime<Utc>>,
}

pub struct GitLabClient {
    http: Client,
    api_base: String,
    token: String,
    group_id: String,
    group: OnceCell<Group>,
    provisioner: RepositoryProvisioner,
}

impl GitLabClient {
    pub fn new(
        host: &str,
        token: &str,
        group_id: &str,
        tls: Option<&TlsMaterial>,
        provisioner: RepositoryProvisioner,
    ) -> Result<Self, ProviderError> {
        let host = if host.trim().is_empty() {
            GITLAB_DEFAULT_HOST
        } else {
            host.trim_end_matches('/')
        };
        url::Url::parse(host)
            .map_err(|e| api_error(GitProvider::GitLab, format!("invalid host '{}': {}", host, e)))?;
        if group_id.trim().is_empty() {
            return Err(api_error(GitProvider::GitLab, "no gitlab group id found"));
        }
        Ok(Self {
            http: http_client(GitProvider::GitLab, tls)?,
            api_base: format!("{}/api/v4", host),
            token: token.to_string(),
            group_id: group_id.trim().to_string(),
            group: OnceCell::new(),
            provisioner,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .header("PRIVATE-TOKEN", &self.token)
    }

    async fn send(&self, builder: RequestBuilder, resource: &str) -> Result<Response, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(GitProvider::GitLab, e))?;
        check(GitProvider::GitLab, response, resource).await
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ProviderError> {
        response
            .json()
            .await
            .map_err(|e| transport_error(GitProvider::GitLab, e))
    }

    /// Resolve the configured group once
    async fn group(&self) -> Result<&Group, ProviderError> {
        self.group
            .get_or_try_init(|| async {
                let id = if self.group_id.parse::<i64>().is_ok() {
                    self.group_id.clone()
                } else {
                    let response = self
                        .send(
                            self.request(Method::GET, "/groups")
                                .query(&[("search", self.group_id.as_str())]),
                            "/groups",
                        )
                        .await?;
                    let groups: Vec<Group> = Self::json(response).await?;
                    debug!("GitLab group search returned {} groups", groups.len());
                    groups
                        .into_iter()
                        .find(|g| g.name == self.group_id)
                        .map(|g| g.id.to_string())
                        .ok_or_else(|| api_error(GitProvider::GitLab, "no gitlab group id found"))?
                };
                let resource = format!("/groups/{}", id);
                let response = self.send(self.request(Method::GET, &resource), &resource).await?;
                Self::json::<Group>(response).await
            })
            .await
    }

    async fn project_id(&self, repo: &str) -> Result<String, ProviderError> {
        let group = self.group().await?;
        Ok(urlencoding::encode(&format!("{}/{}", group.full_path, repo)).into_owned())
    }

    async fn file_exists(&self, pid: &str, path: &str, branch: &str) -> Result<bool, ProviderError> {
        let resource = format!(
            "/projects/{}/repository/files/{}",
            pid,
            urlencoding::encode(path)
        );
        let found = optional(
            self.send(
                self.request(Method::HEAD, &resource).query(&[("ref", branch)]),
                &resource,
            )
            .await,
        )?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl GitOpsClient for GitLabClient {
    fn provider(&self) -> GitProvider {
        GitProvider::GitLab
    }

    async fn create_repository(&self, req: &ProviderRequest) -> RepositoryCreation {
        self.provisioner.provision(self, req).await
    }

    async fn commit_values(
        &self,
        chart: &ChartConfig,
        _req: &ProviderRequest,
    ) -> Result<CommitResult, ProviderError> {
        let pid = self.project_id(&chart.chart_repo_name).await?;
        let branch = chart.branch(self.provisioner.default_revision());
        let path = chart.file_path();
        let action = if self.file_exists(&pid, &path, branch).await? {
            "update"
        } else {
            "create"
        };
        let body = CreateCommit {
            branch,
            commit_message: &chart.release_message,
            actions: vec![CommitAction {
                action,
                file_path: &path,
                content: &chart.file_content,
            }],
            author_email: &chart.user_email_id,
            author_name: &chart.user_name,
        };
        let resource = format!("/projects/{}/repository/commits", pid);
        let response = self
            .send(self.request(Method::POST, &resource).json(&body), &resource)
            .await?;
        let commit: Commit = Self::json(response).await?;
        Ok(CommitResult {
            hash: commit.id,
            committed_at: commit.authored_date,
        })
    }

    async fn get_repo_url(&self, req: &ProviderRequest) -> Result<Option<RepoInfo>, ProviderError> {
        let resource = format!("/projects/{}", self.project_id(&req.git_repo_name).await?);
        let Some(response) =
            optional(self.send(self.request(Method::GET, &resource), &resource).await)?
        else {
            return Ok(None);
        };
        let project: Project = Self::json(response).await?;
        Ok(Some(RepoInfo {
            url: project.http_url_to_repo,
            is_empty: project.empty_repo,
        }))
    }

    async fn delete_repository(&self, req: &ProviderRequest) -> Result<(), ProviderError> {
        let resource = format!("/projects/{}", self.project_id(&req.git_repo_name).await?);
        self.send(self.request(Method::DELETE, &resource), &resource)
            .await?;
        Ok(())
    }

    async fn organisation_path(&self) -> Result<String, ProviderError> {
        Ok(self.group().await?.full_path.clone())
    }
}

#[async_trait]
impl RepositoryApi for GitLabClient {
    async fn create_remote_repository(&self, req: &ProviderRequest) -> Result<RepoInfo, ProviderError> {
        let group = self.group().await?;
        let body = CreateProject {
            name: &req.git_repo_name,
            description: &req.description,
            visibility: "private",
            merge_requests_enabled: true,
            snippets_enabled: false,
            namespace_id: group.id,
        };
        let response = self
            .send(self.request(Method::POST, "/projects").json(&body), "/projects")
            .await?;
        let project: Project = Self::json(response).await?;
        Ok(RepoInfo {
            url: project.http_url_to_repo,
            is_empty: true,
        })
    }
}
