//! Git working-copy operations
//!
//! `GitExecutor` presents one operation set over two interchangeable
//! backends: the `git` CLI driven through `tokio::process`, and libgit2
//! through the `git2` crate. Every call carries a `GitContext` with the
//! credentials, optional TLS material, timeout and cancellation token of the
//! request it serves.

pub mod cli;
pub mod helper;
pub mod library;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::GitSettings;
use crate::domain::TlsMaterial;
use crate::error::GitError;

pub use cli::CliGitExecutor;
pub use helper::{ClonedRepo, GitOpsHelper};
pub use library::LibraryGitExecutor;

/// Username/password (or PAT) presented to the remote
#[derive(Clone, Default, PartialEq, Eq)]
pub struct GitAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for GitAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-call execution context
#[derive(Debug, Clone, Default)]
pub struct GitContext {
    pub auth: GitAuth,
    pub tls: Option<TlsMaterial>,
    /// Overrides the executor's global timeout for this call
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl GitContext {
    pub fn new(auth: GitAuth) -> Self {
        Self {
            auth,
            ..Default::default()
        }
    }

    pub fn with_tls(mut self, tls: Option<TlsMaterial>) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Captured process or library output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Working-copy operations shared by both backends
#[async_trait]
pub trait GitExecutor: Send + Sync {
    /// `git init` plus `remote add origin <url>`
    async fn add_repo(&self, ctx: &GitContext, dir: &Path, url: &str) -> Result<GitOutput, GitError>;

    /// Fetch all refs and tags from origin
    async fn fetch(&self, ctx: &GitContext, dir: &Path) -> Result<GitOutput, GitError>;

    /// Remote branches, one per line in `stdout`
    async fn list_branch(&self, ctx: &GitContext, dir: &Path) -> Result<GitOutput, GitError>;

    /// Pull `branch` from origin; "already up to date" is success
    async fn pull(&self, ctx: &GitContext, dir: &Path, branch: &str) -> Result<GitOutput, GitError>;

    /// Point HEAD at `branch`, creating it locally if needed
    async fn checkout(&self, ctx: &GitContext, dir: &Path, branch: &str) -> Result<GitOutput, GitError>;

    /// Stage everything, commit as the given author and push `branch`.
    /// The commit hash is returned in `stdout`.
    async fn commit_and_push(
        &self,
        ctx: &GitContext,
        dir: &Path,
        branch: &str,
        message: &str,
        name: &str,
        email: &str,
    ) -> Result<GitOutput, GitError>;

    /// Remote HEAD branch name in `stdout`, empty if unknown
    async fn get_default_branch(&self, ctx: &GitContext, dir: &Path) -> Result<GitOutput, GitError>;
}

/// Pick the backend named by the settings
pub fn executor_from_settings(settings: &GitSettings) -> Arc<dyn GitExecutor> {
    let cli = CliGitExecutor::new(settings.ask_pass.clone(), settings.global_timeout());
    if settings.use_git_cli {
        Arc::new(cli)
    } else {
        Arc::new(LibraryGitExecutor::new(cli))
    }
}
