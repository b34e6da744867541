//! Clone and commit workflows on top of a `GitExecutor`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{GitAuth, GitContext, GitExecutor};
use crate::config::GitSettings;
use crate::domain::branch::resolve_branch;
use crate::domain::TlsMaterial;
use crate::error::GitError;

/// Working copy produced by `GitOpsHelper::clone`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClonedRepo {
    pub dir: PathBuf,
    pub branch: String,
    pub is_empty_repo: bool,
}

/// Git workflows bound to the credentials of one GitOps config
#[derive(Clone)]
pub struct GitOpsHelper {
    executor: Arc<dyn GitExecutor>,
    settings: GitSettings,
    auth: GitAuth,
    tls: Option<TlsMaterial>,
}

impl GitOpsHelper {
    pub fn new(
        executor: Arc<dyn GitExecutor>,
        settings: GitSettings,
        auth: GitAuth,
        tls: Option<TlsMaterial>,
    ) -> Self {
        Self {
            executor,
            settings,
            auth,
            tls,
        }
    }

    /// Execution context carrying this helper's credentials
    pub fn context(&self, cancel: &CancellationToken) -> GitContext {
        GitContext::new(self.auth.clone())
            .with_tls(self.tls.clone())
            .with_cancel(cancel.clone())
    }

    /// `<working dir>/<name>`
    pub fn clone_directory(&self, name: &str) -> PathBuf {
        self.settings.working_dir.join(name)
    }

    pub fn default_revision(&self) -> &str {
        &self.settings.default_target_revision
    }

    /// Clone `url` into `<working dir>/<dir_name>` and check out the
    /// resolved branch. An empty remote gets HEAD pointed at the default
    /// revision and no pull.
    pub async fn clone_repo(
        &self,
        url: &str,
        dir_name: &str,
        target_revision: &str,
        cancel: &CancellationToken,
    ) -> Result<ClonedRepo, GitError> {
        let dir = self.clone_directory(dir_name);
        let ctx = self.context(cancel);
        info!("Cloning {} into {}", url, dir.display());

        self.executor.add_repo(&ctx, &dir, url).await?;
        self.executor.fetch(&ctx, &dir).await?;
        let listed = self.executor.list_branch(&ctx, &dir).await?.stdout;
        let branches: Vec<String> = listed
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        if branches.is_empty() {
            let branch = self.default_revision().to_string();
            debug!("Remote {} is empty, checking out {}", url, branch);
            self.executor.checkout(&ctx, &dir, &branch).await?;
            return Ok(ClonedRepo {
                dir,
                branch,
                is_empty_repo: true,
            });
        }

        let remote_head = match self.executor.get_default_branch(&ctx, &dir).await {
            Ok(out) if !out.stdout.is_empty() => Some(out.stdout),
            _ => None,
        };
        let resolved = resolve_branch(
            &branches,
            target_revision,
            self.default_revision(),
            remote_head.as_deref(),
        );
        self.executor.pull(&ctx, &dir, &resolved.name).await?;
        Ok(ClonedRepo {
            dir,
            branch: resolved.name,
            is_empty_repo: resolved.is_empty_repo,
        })
    }

    pub async fn pull(
        &self,
        dir: &Path,
        branch: &str,
        cancel: &CancellationToken,
    ) -> Result<(), GitError> {
        self.executor
            .pull(&self.context(cancel), dir, branch)
            .await
            .map(|_| ())
    }

    /// Commit everything under `dir` and push; returns the commit hash.
    /// A rejected push surfaces as `GitError::PushConflict`.
    pub async fn commit_and_push_all_changes(
        &self,
        dir: &Path,
        branch: &str,
        message: &str,
        name: &str,
        email: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GitError> {
        let out = self
            .executor
            .commit_and_push(&self.context(cancel), dir, branch, message, name, email)
            .await?;
        info!("Pushed {} to {}", out.stdout, branch);
        Ok(out.stdout)
    }
}
