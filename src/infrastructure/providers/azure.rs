//! Azure DevOps Git REST client
//!
//! All calls are scoped to one project: `<host>/<project>/_apis/git`.
//! Commits go through the pushes API, which takes the old object id of the
//! branch and rejects the push with a 409 when the branch has moved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    api_error, check, http_client, optional, transport_error, GitOpsClient, ProviderRequest,
    RepoInfo, RepositoryApi, RepositoryCreation, RepositoryProvisioner,
};
use crate::domain::{ChartConfig, CommitResult, GitProvider, TlsMaterial};
use crate::error::ProviderError;

const API_VERSION: &str = "7.0";

/// Object id used for a branch that does not exist yet
const NULL_OBJECT_ID: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Repository {
    id: String,
    #[serde(default)]
    web_url: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Serialize)]
struct CreateRepository<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    commit_id: String,
}

#[derive(Debug, Deserialize)]
struct Refs {
    #[serde(default)]
    value: Vec<GitRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitRef {
    name: String,
    object_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Push<'a> {
    ref_updates: Vec<RefUpdate>,
    commits: Vec<PushCommit<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefUpdate {
    name: String,
    old_object_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushCommit<'a> {
    comment: &'a str,
    author: Identity<'a>,
    committer: Identity<'a>,
    changes: Vec<Change<'a>>,
}

#[derive(Debug, Serialize)]
struct Identity<'a> {
    name: &'a str,
    email: &'a str,
    date: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Change<'a> {
    change_type: &'static str,
    item: ItemPath,
    new_content: NewContent<'a>,
}

#[derive(Debug, Serialize)]
struct ItemPath {
    path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewContent<'a> {
    content: &'a str,
    content_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(default)]
    commits: Vec<PushedCommit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushedCommit {
    commit_id: String,
    author: Option<PushedAuthor>,
}

#[derive(Debug, Deserialize)]
struct PushedAuthor {
    date: Option<DateTime<Utc>>,
}

pub struct AzureDevOpsClient {
    http: Client,
    api_base: String,
    token: String,
    provisioner: RepositoryProvisioner,
}

impl AzureDevOpsClient {
    pub fn new(
        host: &str,
        token: &str,
        project: &str,
        tls: Option<&TlsMaterial>,
        provisioner: RepositoryProvisioner,
    ) -> Result<Self, ProviderError> {
        if project.trim().is_empty() {
            return Err(api_error(GitProvider::AzureDevOps, "azure project name is required"));
        }
        Ok(Self {
            http: http_client(GitProvider::AzureDevOps, tls)?,
            api_base: format!("{}/{}/_apis/git", host.trim_end_matches('/'), project),
            token: token.to_string(),
            provisioner,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .query(&[("api-version", API_VERSION)])
            .basic_auth("", Some(&self.token))
    }

    async fn send(&self, builder: RequestBuilder, resource: &str) -> Result<Response, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(GitProvider::AzureDevOps, e))?;
        check(GitProvider::AzureDevOps, response, resource).await
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ProviderError> {
        response
            .json()
            .await
            .map_err(|e| transport_error(GitProvider::AzureDevOps, e))
    }

    async fn repository(&self, name: &str) -> Result<Option<Repository>, ProviderError> {
        let resource = format!("/repositories/{}", name);
        match optional(self.send(self.request(Method::GET, &resource), &resource).await)? {
            Some(response) => Ok(Some(Self::json(response).await?)),
            None => Ok(None),
        }
    }

    async fn item_commit(&self, repo: &str, path: &str, branch: &str) -> Result<Option<String>, ProviderError> {
        let resource = format!("/repositories/{}/items", repo);
        let builder = self.request(Method::GET, &resource).query(&[
            ("path", path),
            ("versionDescriptor.version", branch),
            ("versionDescriptor.versionType", "branch"),
        ]);
        match optional(self.send(builder, &resource).await)? {
            Some(response) => Ok(Some(Self::json::<Item>(response).await?.commit_id)),
            None => Ok(None),
        }
    }

    async fn branch_tip(&self, repo: &str, branch: &str) -> Result<Option<String>, ProviderError> {
        let resource = format!("/repositories/{}/refs", repo);
        let filter = format!("heads/{}", branch);
        let builder = self
            .request(Method::GET, &resource)
            .query(&[("filter", filter.as_str())]);
        let Some(response) = optional(self.send(builder, &resource).await)? else {
            return Ok(None);
        };
        let refs: Refs = Self::json(response).await?;
        let wanted = format!("refs/heads/{}", branch);
        Ok(refs
            .value
            .into_iter()
            .find(|r| r.name == wanted)
            .map(|r| r.object_id))
    }

    fn repo_info(repo: Repository) -> RepoInfo {
        RepoInfo {
            url: repo.web_url,
            is_empty: repo.size == 0,
        }
    }
}

#[async_trait]
impl GitOpsClient for AzureDevOpsClient {
    fn provider(&self) -> GitProvider {
        GitProvider::AzureDevOps
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
        let path = format!("/{}", chart.file_path());
        let repo = &chart.chart_repo_name;

        let (change_type, old_object_id) = match self.item_commit(repo, &path, branch).await? {
            Some(commit_id) => ("edit", commit_id),
            None => match self.branch_tip(repo, branch).await? {
                Some(tip) => ("add", tip),
                None => ("add", NULL_OBJECT_ID.to_string()),
            },
        };
        debug!("Pushing {} to {} as {} on {}", path, repo, change_type, old_object_id);

        let now = Utc::now();
        let identity = || Identity {
            name: &chart.user_name,
            email: &chart.user_email_id,
            date: now,
        };
        let body = Push {
            ref_updates: vec![RefUpdate {
                name: format!("refs/heads/{}", branch),
                old_object_id,
            }],
            commits: vec![PushCommit {
                comment: &chart.release_message,
                author: identity(),
                committer: identity(),
                changes: vec![Change {
                    change_type,
                    item: ItemPath { path },
                    new_content: NewContent {
                        content: &chart.file_content,
                        content_type: "rawtext",
                    },
                }],
            }],
        };

        let resource = format!("/repositories/{}/pushes", repo);
        let response = self
            .send(self.request(Method::POST, &resource).json(&body), &resource)
            .await?;
        let pushed: PushResponse = Self::json(response).await?;
        let commit = pushed
            .commits
            .into_iter()
            .next()
            .ok_or_else(|| api_error(GitProvider::AzureDevOps, "push response carried no commit"))?;
        Ok(CommitResult {
            hash: commit.commit_id,
            committed_at: commit.author.and_then(|a| a.date).or(Some(now)),
        })
    }

    async fn get_repo_url(&self, req: &ProviderRequest) -> Result<Option<RepoInfo>, ProviderError> {
        Ok(self.repository(&req.git_repo_name).await?.map(Self::repo_info))
    }

    async fn delete_repository(&self, req: &ProviderRequest) -> Result<(), ProviderError> {
        let repo = self
            .repository(&req.git_repo_name)
            .await?
            .ok_or_else(|| ProviderError::NotFound {
                provider: GitProvider::AzureDevOps,
                resource: req.git_repo_name.clone(),
            })?;
        let resource = format!("/repositories/{}", repo.id);
        self.send(self.request(Method::DELETE, &resource), &resource)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RepositoryApi for AzureDevOpsClient {
    async fn create_remote_repository(&self, req: &ProviderRequest) -> Result<RepoInfo, ProviderError> {
        let resource = "/repositories";
        let body = CreateRepository {
            name: &req.git_repo_name,
        };
        let response = self
            .send(self.request(Method::POST, resource).json(&body), resource)
            .await?;
        Ok(Self::repo_info(Self::json(response).await?))
    }
}
