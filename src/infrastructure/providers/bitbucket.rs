//! Bitbucket Cloud REST client (API 2.0)
//!
//! Commits go through the multipart `src` endpoint. The file is staged under
//! the Bitbucket scratch directory first and removed when the call returns.
//! Bitbucket answers a racing commit with a 500, which is treated as a
//! conflict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{
    api_error, check, http_client, optional, transport_error, GitOpsClient, ProviderRequest,
    RepoInfo, RepositoryApi, RepositoryCreation, RepositoryProvisioner,
};
use crate::domain::repo_url::BITBUCKET_CLONE_BASE_URL;
use crate::domain::{ChartConfig, CommitResult, GitProvider, TlsMaterial};
use crate::error::ProviderError;
use crate::infrastructure::workdir::{random_suffix, remove_dir_quietly};

const BITBUCKET_API: &str = "https://api.bitbucket.org/2.0";

#[derive(Debug, Serialize)]
struct ProjectKey<'a> {
    key: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRepository<'a> {
    scm: &'static str,
    is_private: bool,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<ProjectKey<'a>>,
}

#[derive(Debug, Deserialize)]
struct Commits {
    #[serde(default)]
    values: Vec<CommitEntry>,
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    hash: String,
    date: Option<DateTime<Utc>>,
}

pub struct BitbucketClient {
    http: Client,
    api_base: String,
    username: String,
    token: String,
    staging_dir: PathBuf,
    provisioner: RepositoryProvisioner,
}

/// `https://bitbucket.org/<workspace>/<slug>.git`
pub fn clone_url(workspace: &str, slug: &str) -> String {
    format!("{}{}/{}.git", BITBUCKET_CLONE_BASE_URL, workspace, slug)
}

impl BitbucketClient {
    pub fn new(
        username: &str,
        token: &str,
        staging_dir: &Path,
        tls: Option<&TlsMaterial>,
        provisioner: RepositoryProvisioner,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http_client(GitProvider::BitbucketCloud, tls)?,
            api_base: BITBUCKET_API.to_string(),
            username: username.to_string(),
            token: token.to_string(),
            staging_dir: staging_dir.to_path_buf(),
            provisioner,
        })
    }

    /// Point the client at another API root
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .basic_auth(&self.username, Some(&self.token))
    }

    async fn send(&self, builder: RequestBuilder, resource: &str) -> Result<Response, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(GitProvider::BitbucketCloud, e))?;
        check(GitProvider::BitbucketCloud, response, resource).await
    }

    fn repo_path(workspace: &str, slug: &str) -> String {
        format!("/repositories/{}/{}", workspace, slug)
    }

    /// Write the file under `<staging>/<random>/` and read it back for upload
    async fn stage_file(&self, chart: &ChartConfig, dir: &Path) -> Result<Vec<u8>, ProviderError> {
        let io_err = |e: std::io::Error| api_error(GitProvider::BitbucketCloud, e.to_string());
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        let staged = dir.join(&chart.file_name);
        debug!("Staging Bitbucket commit file {}", staged.display());
        tokio::fs::write(&staged, chart.file_content.as_bytes())
            .await
            .map_err(io_err)?;
        tokio::fs::read(&staged).await.map_err(io_err)
    }
}

#[async_trait]
impl GitOpsClient for BitbucketClient {
    fn provider(&self) -> GitProvider {
        GitProvider::BitbucketCloud
    }

    async fn create_repository(&self, req: &ProviderRequest) -> RepositoryCreation {
        self.provisioner.provision(self, req).await
    }

    async fn commit_values(
        &self,
        chart: &ChartConfig,
        req: &ProviderRequest,
    ) -> Result<CommitResult, ProviderError> {
        let stage_dir = self.staging_dir.join(random_suffix(12));
        let _cleanup = scopeguard::guard(stage_dir.clone(), |dir| remove_dir_quietly(&dir));
        let content = self.stage_file(chart, &stage_dir).await?;

        let branch = chart.branch(self.provisioner.default_revision()).to_string();
        let author = format!("{} <{}>", chart.user_name, chart.user_email_id);
        let form = Form::new()
            .part(
                chart.file_path(),
                Part::bytes(content).file_name(chart.file_name.clone()),
            )
            .text("message", chart.release_message.clone())
            .text("branch", branch.clone())
            .text("author", author);

        let repo = Self::repo_path(&req.bitbucket_workspace_id, &chart.chart_repo_name);
        let resource = format!("{}/src", repo);
        let response = self
            .request(Method::POST, &resource)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(GitProvider::BitbucketCloud, e))?;
        if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Conflict {
                provider: GitProvider::BitbucketCloud,
                message: format!("500 Internal Server Error {}", body.trim()),
            });
        }
        check(GitProvider::BitbucketCloud, response, &resource).await?;

        let resource = format!("{}/commits/{}", repo, branch);
        let response = self.send(self.request(Method::GET, &resource), &resource).await?;
        let commits: Commits = response
            .json()
            .await
            .map_err(|e| transport_error(GitProvider::BitbucketCloud, e))?;
        let latest = commits
            .values
            .into_iter()
            .next()
            .ok_or_else(|| api_error(GitProvider::BitbucketCloud, "empty commits array in bitbucket response"))?;
        Ok(CommitResult {
            hash: latest.hash,
            committed_at: latest.date,
        })
    }

    async fn get_repo_url(&self, req: &ProviderRequest) -> Result<Option<RepoInfo>, ProviderError> {
        let resource = Self::repo_path(&req.bitbucket_workspace_id, &req.git_repo_name);
        let found = optional(self.send(self.request(Method::GET, &resource), &resource).await)?;
        Ok(found.map(|_| RepoInfo {
            url: clone_url(&req.bitbucket_workspace_id, &req.git_repo_name),
            is_empty: false,
        }))
    }

    async fn delete_repository(&self, req: &ProviderRequest) -> Result<(), ProviderError> {
        let resource = Self::repo_path(&req.bitbucket_workspace_id, &req.git_repo_name);
        self.send(self.request(Method::DELETE, &resource), &resource)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RepositoryApi for BitbucketClient {
    async fn create_remote_repository(&self, req: &ProviderRequest) -> Result<RepoInfo, ProviderError> {
        let resource = Self::repo_path(&req.bitbucket_workspace_id, &req.git_repo_name);
        let body = CreateRepository {
            scm: "git",
            is_private: true,
            description: &req.description,
            project: (!req.bitbucket_project_key.is_empty()).then(|| ProjectKey {
                key: &req.bitbucket_project_key,
            }),
        };
        self.send(self.request(Method::POST, &resource).json(&body), &resource)
            .await?;
        Ok(RepoInfo {
            url: clone_url(&req.bitbucket_workspace_id, &req.git_repo_name),
            is_empty: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_provisioner;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, staging: &Path) -> BitbucketClient {
        BitbucketClient::new("bob", "app-password", staging, None, test_provisioner())
            .unwrap()
            .with_api_base(server.uri())
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            bitbucket_workspace_id: "acme".into(),
            bitbucket_project_key: "OPS".into(),
            ..ProviderRequest::new("web")
        }
    }

    #[tokio::test]
    async fn test_lookup_and_create() {
        let server = MockServer::start().await;
        let staging = tempfile::tempdir().unwrap();
        Mock::given(method("GET"))
            .and(path("/repositories/acme/web"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repositories/acme/web"))
            .and(header_exists("Authorization"))
            .and(body_partial_json(serde_json::json!({
                "scm": "git", "is_private": true, "project": {"key": "OPS"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server, staging.path());
        assert!(c.get_repo_url(&request()).await.unwrap().is_none());
        let info = c.create_remote_repository(&request()).await.unwrap();
        assert_eq!(info.url, "https://bitbucket.org/acme/web.git");
    }

    #[tokio::test]
    async fn test_commit_reads_latest_hash_and_cleans_staging() {
        let server = MockServer::start().await;
        let staging = tempfile::tempdir().unwrap();
        Mock::given(method("POST"))
            .and(path("/repositories/acme/web/src"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repositories/acme/web/commits/master"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "values": [
                    {"hash": "newest", "date": "2024-05-01T10:00:00+00:00"},
                    {"hash": "older", "date": "2024-04-01T10:00:00+00:00"}
                ]
            })))
            .mount(&server)
            .await;

        let chart = ChartConfig {
            chart_repo_name: "web".into(),
            file_name: "values.yaml".into(),
            file_content: "a: 1".into(),
            ..Default::default()
        };
        let result = client(&server, staging.path())
            .commit_values(&chart, &request())
            .await
            .unwrap();
        assert_eq!(result.hash, "newest");
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_server_error_on_commit_is_conflict() {
        let server = MockServer::start().await;
        let staging = tempfile::tempdir().unwrap();
        Mock::given(method("POST"))
            .and(path("/repositories/acme/web/src"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let chart = ChartConfig {
            chart_repo_name: "web".into(),
            file_name: "values.yaml".into(),
            ..Default::default()
        };
        let err = client(&server, staging.path())
            .commit_values(&chart, &request())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.normalised().starts_with("bitbucket client error: "));
    }
}
