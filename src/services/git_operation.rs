//! Git operations on application repositories
//!
//! Wraps the active provider client and Git helper with the workflows the
//! deployment pipeline needs: repository creation, chart pushes with
//! conflict recovery, and values commits.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GitSettings;
use crate::domain::deployment_config::{deployed_app_name, join_path, SYSTEM_USER_ID};
use crate::domain::repo_url::collapse_whitespace;
use crate::domain::{ChartConfig, ChartGitAttribute, CommitResult};
use crate::error::{GitOpsError, GitOpsResult, ProviderError};
use crate::infrastructure::providers::{GitProviderFactory, ProviderRequest};
use crate::infrastructure::workdir::{copy_dir, remove_dir_quietly, unique_dir_name};
use crate::infrastructure::GitOpsHelper;
use crate::services::gitops_config_read::GitOpsConfigReadService;

const CHART_FILE: &str = "Chart.yaml";
const FIRST_COMMIT_MESSAGE: &str = "first commit";

/// Reference chart to push into an application repository
#[derive(Debug, Clone)]
pub struct PushChartRequest {
    pub repo_name: String,
    /// Directory of the chart template inside the repository
    pub reference_template: String,
    pub version: String,
    /// Local copy of the reference chart
    pub source_dir: PathBuf,
    pub repo_url: String,
    pub target_revision: String,
    pub user_id: i32,
}

/// Chart-store app pushed for a Helm-mode GitOps deployment
#[derive(Debug, Clone)]
pub struct HelmAppPushRequest {
    pub app_name: String,
    pub env_name: String,
    pub repo_url: String,
    pub target_revision: String,
    /// Local copy of the chart
    pub chart_dir: PathBuf,
    pub user_id: i32,
}

pub struct GitOperationService {
    factory: Arc<GitProviderFactory>,
    read: Arc<GitOpsConfigReadService>,
    settings: GitSettings,
}

impl GitOperationService {
    pub fn new(
        factory: Arc<GitProviderFactory>,
        read: Arc<GitOpsConfigReadService>,
        settings: GitSettings,
    ) -> Self {
        Self {
            factory,
            read,
            settings,
        }
    }

    /// Provider request carrying committer and Bitbucket scoping
    async fn request(
        &self,
        repo_name: &str,
        user_id: i32,
        target_revision: &str,
        cancel: &CancellationToken,
    ) -> GitOpsResult<ProviderRequest> {
        let committer = self.read.committer(user_id).await;
        let bitbucket = self.read.bitbucket_metadata().await?;
        Ok(ProviderRequest {
            git_repo_name: repo_name.to_string(),
            target_revision: target_revision.to_string(),
            user_email_id: committer.email,
            user_name: committer.name,
            bitbucket_workspace_id: bitbucket.workspace_id,
            bitbucket_project_key: bitbucket.project_key,
            cancel: cancel.clone(),
            ..Default::default()
        })
    }

    /// Create (or find) the repository for `name` and report where its
    /// chart lives
    pub async fn create_git_repository_for_app(
        &self,
        name: &str,
        base_template: &str,
        version: &str,
        user_id: i32,
        target_revision: &str,
        cancel: &CancellationToken,
    ) -> GitOpsResult<ChartGitAttribute> {
        let repo_name = collapse_whitespace(name);
        let mut req = self.request(&repo_name, user_id, target_revision, cancel).await?;
        req.description = format!("helm chart for {}", repo_name);

        let client = self.factory.client().await;
        let created = client.create_repository(&req).await;
        if let Some((stage, message)) = created.outcome.first_error() {
            warn!(repo = %repo_name, ?stage, "Repository creation failed: {}", message);
            return Err(ProviderError::StageFailed {
                stage,
                message: message.to_string(),
            }
            .into());
        }
        info!(repo = %repo_name, url = %created.url, is_new = created.is_new, "Repository ready");
        Ok(ChartGitAttribute {
            repo_url: created.url,
            chart_location: join_path(base_template, version),
            is_new_repo: created.is_new,
        })
    }

    /// Copy the reference chart into the repository and push it
    ///
    /// A working copy without `Chart.yaml` under the target directory is
    /// repopulated. A rejected push is retried once after pulling.
    pub async fn push_chart_to_git_repo(
        &self,
        req: &PushChartRequest,
        cancel: &CancellationToken,
    ) -> GitOpsResult<()> {
        let helper = self.factory.helper().await;
        let dir_name = unique_dir_name(&req.repo_name);
        let clone_dir = helper.clone_directory(&dir_name);
        let _cleanup = scopeguard::guard(clone_dir.clone(), |dir| remove_dir_quietly(&dir));

        let branch = if clone_dir.exists() {
            self.git_pull(&clone_dir, &req.repo_url, &req.target_revision, cancel)
                .await?;
            self.branch(&req.target_revision)
        } else {
            helper
                .clone_repo(&req.repo_url, &dir_name, &req.target_revision, cancel)
                .await?
                .branch
        };

        let chart_dir = clone_dir.join(&req.reference_template).join(&req.version);
        if !chart_dir.exists() {
            debug!(dir = %chart_dir.display(), "Chart directory missing, copying reference chart");
            copy_dir(&req.source_dir, &chart_dir)?;
        } else if !chart_dir.join(CHART_FILE).exists() {
            info!(dir = %chart_dir.display(), "Chart directory has no {}, repopulating", CHART_FILE);
            copy_dir(&req.source_dir, &chart_dir)?;
        } else {
            info!(repo = %req.repo_name, version = %req.version, "Chart already present, nothing to push");
            return Ok(());
        }

        let committer = self.read.committer(req.user_id).await;
        let first = helper
            .commit_and_push_all_changes(
                &clone_dir,
                &branch,
                FIRST_COMMIT_MESSAGE,
                &committer.name,
                &committer.email,
                cancel,
            )
            .await;
        match first {
            Ok(hash) => {
                info!(repo = %req.repo_name, %hash, "Pushed reference chart");
                Ok(())
            }
            Err(e) if e.is_push_failure() => {
                warn!(repo = %req.repo_name, "Push rejected, pulling and retrying: {}", e);
                self.git_pull(&clone_dir, &req.repo_url, &branch, cancel).await?;
                copy_dir(&req.source_dir, &chart_dir)?;
                let hash = helper
                    .commit_and_push_all_changes(
                        &clone_dir,
                        &branch,
                        FIRST_COMMIT_MESSAGE,
                        &committer.name,
                        &committer.email,
                        cancel,
                    )
                    .await?;
                info!(repo = %req.repo_name, %hash, "Pushed reference chart after retry");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Commit one file through the provider API, retrying on conflicts
    pub async fn commit_values(
        &self,
        chart: &ChartConfig,
        cancel: &CancellationToken,
    ) -> GitOpsResult<CommitResult> {
        let client = self.factory.client().await;
        let bitbucket = self.read.bitbucket_metadata().await?;
        let req = ProviderRequest {
            git_repo_name: chart.chart_repo_name.clone(),
            target_revision: chart.target_revision.clone(),
            user_email_id: chart.user_email_id.clone(),
            user_name: chart.user_name.clone(),
            bitbucket_workspace_id: bitbucket.workspace_id,
            bitbucket_project_key: bitbucket.project_key,
            cancel: cancel.clone(),
            ..Default::default()
        };

        let attempts = self.settings.commit_retry_count_on_conflict.max(1);
        let mut attempt = 1;
        loop {
            match client.commit_values(chart, &req).await {
                Ok(result) => {
                    debug!(repo = %chart.chart_repo_name, file = %chart.file_path(), "Committed values");
                    return Ok(result);
                }
                Err(e @ ProviderError::Conflict { .. }) if attempt < attempts => {
                    warn!(
                        repo = %chart.chart_repo_name,
                        attempt,
                        "Commit conflicted, retrying: {}",
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.commit_retry_delay()) => {}
                        _ = cancel.cancelled() => return Err(ProviderError::Cancelled.into()),
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Commit requirements before values, keeping a local working copy in
    /// step with each commit
    pub async fn commit_requirements_and_values(
        &self,
        app_store_name: &str,
        repo_url: &str,
        requirements: &ChartConfig,
        values: &ChartConfig,
        cancel: &CancellationToken,
    ) -> GitOpsResult<CommitResult> {
        let helper = self.factory.helper().await;
        let dir_name = unique_dir_name(app_store_name);
        let clone_dir = helper.clone_directory(&dir_name);
        let _cleanup = scopeguard::guard(clone_dir.clone(), |dir| remove_dir_quietly(&dir));

        let branch = helper
            .clone_repo(repo_url, &dir_name, &values.target_revision, cancel)
            .await?
            .branch;

        self.commit_values(requirements, cancel).await?;
        self.git_pull(&clone_dir, repo_url, &branch, cancel).await?;
        let result = self.commit_values(values, cancel).await?;
        self.git_pull(&clone_dir, repo_url, &branch, cancel).await?;
        info!(app = %app_store_name, hash = %result.hash, "Committed requirements and values");
        Ok(result)
    }

    pub async fn commit_and_push_all_changes(
        &self,
        dir: &Path,
        branch: &str,
        message: &str,
        name: &str,
        email: &str,
        cancel: &CancellationToken,
    ) -> GitOpsResult<String> {
        let helper = self.factory.helper().await;
        Ok(helper
            .commit_and_push_all_changes(dir, branch, message, name, email, cancel)
            .await?)
    }

    /// Pull into `dir`; a failed pull clones `repo_url` afresh into the
    /// same directory
    pub async fn git_pull(
        &self,
        dir: &Path,
        repo_url: &str,
        branch: &str,
        cancel: &CancellationToken,
    ) -> GitOpsResult<()> {
        let helper = self.factory.helper().await;
        let branch = self.branch(branch);
        match helper.pull(dir, &branch, cancel).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(dir = %dir.display(), "Pull failed, cloning again: {}", e);
                let dir_name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        GitOpsError::Fatal(format!("invalid working directory {}", dir.display()))
                    })?;
                remove_dir_quietly(dir);
                helper.clone_repo(repo_url, &dir_name, &branch, cancel).await?;
                Ok(())
            }
        }
    }

    /// Push a chart-store app with its requirements and values files
    pub async fn push_chart_to_gitops_repo_for_helm_app(
        &self,
        req: &HelmAppPushRequest,
        requirements: &ChartConfig,
        values: &ChartConfig,
        cancel: &CancellationToken,
    ) -> GitOpsResult<(ChartGitAttribute, CommitResult)> {
        let helper = self.factory.helper().await;
        let dir_name = unique_dir_name(&req.app_name);
        let clone_dir = helper.clone_directory(&dir_name);
        let _cleanup = scopeguard::guard(clone_dir.clone(), |dir| remove_dir_quietly(&dir));

        let branch = if clone_dir.exists() {
            self.git_pull(&clone_dir, &req.repo_url, &req.target_revision, cancel)
                .await?;
            self.branch(&req.target_revision)
        } else {
            helper
                .clone_repo(&req.repo_url, &dir_name, &req.target_revision, cancel)
                .await?
                .branch
        };

        let chart_location = deployed_app_name(&req.app_name, &req.env_name);
        let target = clone_dir.join(&chart_location);
        populate_helm_app(&req.chart_dir, &target, &[requirements, values])?;

        let committer = self.read.committer(req.user_id).await;
        let hash = match self
            .commit_first(&helper, &clone_dir, &branch, &committer.name, &committer.email, cancel)
            .await
        {
            Ok(hash) => hash,
            Err(e) => {
                warn!(app = %chart_location, "Push failed, pulling and retrying: {}", e);
                self.git_pull(&clone_dir, &req.repo_url, &branch, cancel).await?;
                populate_helm_app(&req.chart_dir, &target, &[requirements, values])?;
                self.commit_first(&helper, &clone_dir, &branch, &committer.name, &committer.email, cancel)
                    .await?
            }
        };
        info!(app = %chart_location, %hash, "Pushed chart-store app");
        Ok((
            ChartGitAttribute {
                repo_url: req.repo_url.clone(),
                chart_location,
                is_new_repo: false,
            },
            CommitResult {
                hash,
                committed_at: Some(Utc::now()),
            },
        ))
    }

    async fn commit_first(
        &self,
        helper: &GitOpsHelper,
        dir: &Path,
        branch: &str,
        name: &str,
        email: &str,
        cancel: &CancellationToken,
    ) -> GitOpsResult<String> {
        Ok(helper
            .commit_and_push_all_changes(dir, branch, FIRST_COMMIT_MESSAGE, name, email, cancel)
            .await?)
    }

    pub async fn create_readme_in_git_repo(
        &self,
        repo_name: &str,
        user_id: i32,
        cancel: &CancellationToken,
    ) -> GitOpsResult<CommitResult> {
        let req = self.request(repo_name, user_id, "", cancel).await?;
        let client = self.factory.client().await;
        Ok(client.create_readme(&req).await?)
    }

    /// Repository URL, or empty when the lookup fails or finds nothing
    pub async fn get_repo_url_by_repo_name(&self, repo_name: &str, cancel: &CancellationToken) -> String {
        let req = match self.request(repo_name, SYSTEM_USER_ID, "", cancel).await {
            Ok(req) => req,
            Err(e) => {
                warn!(repo = %repo_name, "Failed to build lookup request: {}", e);
                return String::new();
            }
        };
        let client = self.factory.client().await;
        match client.get_repo_url(&req).await {
            Ok(Some(info)) => info.url,
            Ok(None) => String::new(),
            Err(e) => {
                warn!(repo = %repo_name, "Repository lookup failed: {}", e);
                String::new()
            }
        }
    }

    pub async fn delete_git_repository(&self, repo_name: &str, cancel: &CancellationToken) -> GitOpsResult<()> {
        let req = self
            .request(repo_name, SYSTEM_USER_ID, "", cancel)
            .await?;
        let client = self.factory.client().await;
        client.delete_repository(&req).await?;
        info!(repo = %repo_name, "Deleted repository");
        Ok(())
    }

    fn branch(&self, target_revision: &str) -> String {
        if target_revision.trim().is_empty() {
            self.settings.default_target_revision.clone()
        } else {
            target_revision.to_string()
        }
    }
}

/// Copy the chart into `target` and write each config file next to it
fn populate_helm_app(chart_dir: &Path, target: &Path, files: &[&ChartConfig]) -> GitOpsResult<()> {
    std::fs::create_dir_all(target)?;
    copy_dir(chart_dir, target)?;
    for file in files {
        std::fs::write(target.join(&file.file_name), &file.file_content)?;
    }
    Ok(())
}
