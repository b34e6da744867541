//! GitHub REST client
//!
//! Talks to `api.github.com`, or `<host>/api/v3` for GitHub Enterprise.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    check, http_client, optional, transport_error, GitOpsClient, ProviderRequest, RepoInfo,
    RepositoryApi, RepositoryCreation, RepositoryProvisioner,
};
use crate::domain::{ChartConfig, CommitResult, GitProvider, TlsMaterial};
use crate::error::ProviderError;

const GITHUB_HOST: &str = "github.com";
const GITHUB_API: &str = "https://api.github.com";

pub struct GitHubClient {
    http: Client,
    api_base: String,
    org: String,
    token: String,
    provisioner: RepositoryProvisioner,
}

#[derive(Debug, Deserialize)]
struct Repository {
    clone_url: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Serialize)]
struct CreateRepository<'a> {
    name: &'a str,
    description: &'a str,
    private: bool,
}

#[derive(Debug, Deserialize)]
struct Content {
    sha: String,
}

#[derive(Debug, Serialize)]
struct CommitAuthor<'a> {
    name: &'a str,
    email: &'a str,
    date: String,
}

#[derive(Debug, Serialize)]
struct PutContent<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
    author: CommitAuthor<'a>,
    committer: CommitAuthor<'a>,
}

#[derive(Debug, Deserialize)]
struct PutContentResponse {
    commit: CommitInfo,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    sha: String,
    author: Option<CommitDate>,
}

#[derive(Debug, Deserialize)]
struct CommitDate {
    date: Option<DateTime<Utc>>,
}

impl GitHubClient {
    pub fn new(
        host: &str,
        token: &str,
        org: &str,
        tls: Option<&TlsMaterial>,
        provisioner: RepositoryProvisioner,
    ) -> Result<Self, ProviderError> {
        let api_base = match url::Url::parse(host) {
            Ok(url) if url.host_str() != Some(GITHUB_HOST) => {
                info!("Using GitHub Enterprise API at {}", host);
                format!("{}/api/v3", host.trim_end_matches('/'))
            }
            _ => GITHUB_API.to_string(),
        };
        Ok(Self {
            http: http_client(GitProvider::GitHub, tls)?,
            api_base,
            org: org.to_string(),
            token: token.to_string(),
            provisioner,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "gitops-core")
    }

    async fn send(&self, builder: RequestBuilder, resource: &str) -> Result<reqwest::Response, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(GitProvider::GitHub, e))?;
        check(GitProvider::GitHub, response, resource).await
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, ProviderError> {
        response
            .json()
            .await
            .map_err(|e| transport_error(GitProvider::GitHub, e))
    }

    fn repo_info(repo: Repository) -> RepoInfo {
        RepoInfo {
            url: repo.clone_url,
            is_empty: repo.size == 0,
        }
    }
}

#[async_trait]
impl GitOpsClient for GitHubClient {
    fn provider(&self) -> GitProvider {
        GitProvider::GitHub
    }

    async fn create_repository(&self, req: &ProviderRequest) -> RepositoryCreation {
        self.provisioner.provision(self, req).await
    }

    async fn commit_values(
        &self,
        chart: &ChartConfig,
        _req: &ProviderRequest,
    ) -> Result<CommitResult, ProviderError> {
        let branch = chart.branch(self.provisioner.default_revision());
        let path = chart.file_path();
        let resource = format!("/repos/{}/{}/contents/{}", self.org, chart.chart_repo_name, path);

        let existing = optional(
            self.send(
                self.request(reqwest::Method::GET, &resource)
                    .query(&[("ref", branch)]),
                &resource,
            )
            .await,
        )?;
        let sha = match existing {
            Some(response) => Some(Self::json::<Content>(response).await?.sha),
            None => None,
        };
        debug!("Committing {} to {} (new file: {})", path, chart.chart_repo_name, sha.is_none());

        let now = Utc::now().to_rfc3339();
        let body = PutContent {
            message: &chart.release_message,
            content: base64::engine::general_purpose::STANDARD.encode(chart.file_content.as_bytes()),
            branch,
            sha,
            author: CommitAuthor {
                name: &chart.user_name,
                email: &chart.user_email_id,
                date: now.clone(),
            },
            committer: CommitAuthor {
                name: &chart.user_name,
                email: &chart.user_email_id,
                date: now,
            },
        };
        let response = self
            .send(self.request(reqwest::Method::PUT, &resource).json(&body), &resource)
            .await?;
        let put: PutContentResponse = Self::json(response).await?;
        Ok(CommitResult {
            hash: put.commit.sha,
            committed_at: put
                .commit
                .author
                .and_then(|a| a.date)
                .or_else(|| Some(Utc::now())),
        })
    }

    async fn get_repo_url(&self, req: &ProviderRequest) -> Result<Option<RepoInfo>, ProviderError> {
        let resource = format!("/repos/{}/{}", self.org, req.git_repo_name);
        let Some(response) = optional(
            self.send(self.request(reqwest::Method::GET, &resource), &resource)
                .await,
        )?
        else {
            return Ok(None);
        };
        Ok(Some(Self::repo_info(Self::json(response).await?)))
    }

    async fn delete_repository(&self, req: &ProviderRequest) -> Result<(), ProviderError> {
        let resource = format!("/repos/{}/{}", self.org, req.git_repo_name);
        self.send(self.request(reqwest::Method::DELETE, &resource), &resource)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RepositoryApi for GitHubClient {
    async fn create_remote_repository(&self, req: &ProviderRequest) -> Result<RepoInfo, ProviderError> {
        let resource = format!("/orgs/{}/repos", self.org);
        let body = CreateRepository {
            name: &req.git_repo_name,
            description: &req.description,
            private: true,
        };
        let response = self
            .send(self.request(reqwest::Method::POST, &resource).json(&body), &resource)
            .await?;
        Ok(Self::repo_info(Self::json(response).await?))
    }
}
