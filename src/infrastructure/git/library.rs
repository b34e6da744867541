//! libgit2 backend
//!
//! Every call runs on the blocking pool. Remote transfers abort through the
//! progress callback once the context is cancelled. Requests carrying TLS
//! material go to the CLI backend since libgit2 takes no per-call CA file.

use async_trait::async_trait;
use git2::{
    AutotagOption, BranchType, Cred, Direction, ErrorCode, FetchOptions, IndexAddOption,
    PushOptions, RemoteCallbacks, Repository, Signature,
};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CliGitExecutor, GitAuth, GitContext, GitExecutor, GitOutput};
use crate::domain::branch::strip_origin;
use crate::error::GitError;

/// Executor backed by the `git2` crate
#[derive(Debug, Clone)]
pub struct LibraryGitExecutor {
    cli: CliGitExecutor,
}

impl LibraryGitExecutor {
    pub fn new(cli: CliGitExecutor) -> Self {
        Self { cli }
    }

    /// Run `op` on the blocking pool under the context's cancel and timeout
    async fn blocking<T, F>(&self, ctx: &GitContext, command: &str, op: F) -> Result<T, GitError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, GitError> + Send + 'static,
    {
        debug!("libgit2 {}", command);
        let task = tokio::task::spawn_blocking(op);
        let joined = async {
            let result = match ctx.timeout.or(self.cli.global_timeout()) {
                Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                    GitError::Timeout {
                        command: command.to_string(),
                        seconds: limit.as_secs(),
                    }
                })?,
                None => task.await,
            };
            result.map_err(|e| GitError::Io(std::io::Error::other(e.to_string())))?
        };
        tokio::select! {
            result = joined => result,
            _ = ctx.cancel.cancelled() => Err(GitError::Cancelled),
        }
    }
}

fn callbacks<'a>(auth: &'a GitAuth, cancel: &'a CancellationToken) -> RemoteCallbacks<'a> {
    let mut cb = RemoteCallbacks::new();
    cb.credentials(move |_url, _user, _allowed| {
        Cred::userpass_plaintext(&auth.username, &auth.password)
    });
    cb.transfer_progress(move |_| !cancel.is_cancelled());
    cb
}

fn fetch_origin(repo: &Repository, auth: &GitAuth, cancel: &CancellationToken) -> Result<(), GitError> {
    let mut remote = repo.find_remote("origin")?;
    let mut opts = FetchOptions::new();
    opts.remote_callbacks(callbacks(auth, cancel))
        .download_tags(AutotagOption::All);
    remote.fetch(
        &["+refs/heads/*:refs/remotes/origin/*"],
        Some(&mut opts),
        None,
    )?;
    Ok(())
}

/// Point `refs/heads/<branch>` at `origin/<branch>` and hard-reset the tree
fn reset_to_remote(repo: &Repository, branch: &str) -> Result<(), GitError> {
    let remote_ref = format!("refs/remotes/origin/{}", branch);
    let commit = repo.find_reference(&remote_ref)?.peel_to_commit()?;
    let local_ref = format!("refs/heads/{}", branch);
    repo.reference(&local_ref, commit.id(), true, "pull: reset to origin")?;
    repo.set_head(&local_ref)?;
    repo.reset(commit.as_object(), git2::ResetType::Hard, None)?;
    Ok(())
}

#[async_trait]
impl GitExecutor for LibraryGitExecutor {
    async fn add_repo(&self, ctx: &GitContext, dir: &Path, url: &str) -> Result<GitOutput, GitError> {
        if ctx.tls.is_some() {
            return self.cli.add_repo(ctx, dir, url).await;
        }
        let dir = dir.to_path_buf();
        let url = url.to_string();
        self.blocking(ctx, "init", move || {
            std::fs::create_dir_all(&dir)?;
            let repo = Repository::init(&dir)?;
            repo.remote("origin", &url)?;
            Ok(GitOutput::default())
        })
        .await
    }

    async fn fetch(&self, ctx: &GitContext, dir: &Path) -> Result<GitOutput, GitError> {
        if ctx.tls.is_some() {
            return self.cli.fetch(ctx, dir).await;
        }
        let (dir, auth, cancel) = (dir.to_path_buf(), ctx.auth.clone(), ctx.cancel.clone());
        self.blocking(ctx, "fetch", move || {
            let repo = Repository::open(&dir)?;
            fetch_origin(&repo, &auth, &cancel)?;
            Ok(GitOutput::default())
        })
        .await
    }

    async fn list_branch(&self, ctx: &GitContext, dir: &Path) -> Result<GitOutput, GitError> {
        if ctx.tls.is_some() {
            return self.cli.list_branch(ctx, dir).await;
        }
        let dir = dir.to_path_buf();
        self.blocking(ctx, "branch -r", move || {
            let repo = Repository::open(&dir)?;
            let mut names = Vec::new();
            for branch in repo.branches(Some(BranchType::Remote))? {
                let (branch, _) = branch?;
                if let Some(name) = branch.name()? {
                    names.push(name.to_string());
                }
            }
            Ok(GitOutput::stdout(names.join("\n")))
        })
        .await
    }

    async fn pull(&self, ctx: &GitContext, dir: &Path, branch: &str) -> Result<GitOutput, GitError> {
        if ctx.tls.is_some() {
            return self.cli.pull(ctx, dir, branch).await;
        }
        let (dir, auth, cancel) = (dir.to_path_buf(), ctx.auth.clone(), ctx.cancel.clone());
        let branch = branch.to_string();
        self.blocking(ctx, "pull", move || {
            let repo = Repository::open(&dir)?;
            fetch_origin(&repo, &auth, &cancel)?;
            reset_to_remote(&repo, &branch)?;
            Ok(GitOutput::default())
        })
        .await
    }

    async fn checkout(&self, ctx: &GitContext, dir: &Path, branch: &str) -> Result<GitOutput, GitError> {
        if ctx.tls.is_some() {
            return self.cli.checkout(ctx, dir, branch).await;
        }
        let dir = dir.to_path_buf();
        let branch = branch.to_string();
        self.blocking(ctx, "checkout", move || {
            let repo = Repository::open(&dir)?;
            let remote_ref = format!("refs/remotes/origin/{}", branch);
            if repo.find_reference(&remote_ref).is_ok() {
                reset_to_remote(&repo, &branch)?;
            } else {
                // Unborn branches are allowed: HEAD simply names them
                repo.set_head(&format!("refs/heads/{}", branch))?;
            }
            Ok(GitOutput::default())
        })
        .await
    }

    async fn commit_and_push(
        &self,
        ctx: &GitContext,
        dir: &Path,
        branch: &str,
        message: &str,
        name: &str,
        email: &str,
    ) -> Result<GitOutput, GitError> {
        if ctx.tls.is_some() {
            return self
                .cli
                .commit_and_push(ctx, dir, branch, message, name, email)
                .await;
        }
        let (dir, auth, cancel): (PathBuf, _, _) =
            (dir.to_path_buf(), ctx.auth.clone(), ctx.cancel.clone());
        let (branch, message) = (branch.to_string(), message.to_string());
        let (name, email) = (name.to_string(), email.to_string());
        self.blocking(ctx, "commit and push", move || {
            let repo = Repository::open(&dir)?;
            let mut index = repo.index()?;
            index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
            index.update_all(["*"].iter(), None)?;
            index.write()?;
            let tree = repo.find_tree(index.write_tree()?)?;
            let signature = Signature::now(&name, &email)?;
            let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
            let parents: Vec<&git2::Commit> = parent.iter().collect();
            let oid = repo.commit(Some("HEAD"), &signature, &signature, &message, &tree, &parents)?;

            let head_ref = repo
                .head()?
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("refs/heads/{}", branch));
            let refspec = format!("{}:refs/heads/{}", head_ref, branch);

            let rejected = RefCell::new(None::<String>);
            {
                let mut cb = callbacks(&auth, &cancel);
                cb.push_update_reference(|refname, status| {
                    if let Some(status) = status {
                        *rejected.borrow_mut() = Some(format!("{}: {}", refname, status));
                    }
                    Ok(())
                });
                let mut opts = PushOptions::new();
                opts.remote_callbacks(cb);
                let mut remote = repo.find_remote("origin")?;
                match remote.push(&[refspec.as_str()], Some(&mut opts)) {
                    Ok(()) => {}
                    Err(e) if e.code() == ErrorCode::NotFastForward => {
                        return Err(GitError::PushConflict)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if let Some(reason) = rejected.into_inner() {
                debug!("Push rejected: {}", reason);
                return Err(GitError::PushConflict);
            }
            Ok(GitOutput::stdout(oid.to_string()))
        })
        .await
    }

    async fn get_default_branch(&self, ctx: &GitContext, dir: &Path) -> Result<GitOutput, GitError> {
        if ctx.tls.is_some() {
            return self.cli.get_default_branch(ctx, dir).await;
        }
        let (dir, auth, cancel) = (dir.to_path_buf(), ctx.auth.clone(), ctx.cancel.clone());
        self.blocking(ctx, "default branch", move || {
            let repo = Repository::open(&dir)?;
            if let Ok(head) = repo.find_reference("refs/remotes/origin/HEAD") {
                if let Some(target) = head.symbolic_target() {
                    return Ok(GitOutput::stdout(strip_origin(target)));
                }
            }
            let mut remote = repo.find_remote("origin")?;
            let connection = remote.connect_auth(Direction::Fetch, Some(callbacks(&auth, &cancel)), None)?;
            let branch = connection
                .default_branch()
                .ok()
                .and_then(|b| b.as_str().map(|s| strip_origin(s).to_string()))
                .unwrap_or_default();
            Ok(GitOutput::stdout(branch))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_remote(root: &Path) -> String {
        let bare = root.join("remote.git");
        Repository::init_bare(&bare).unwrap();
        format!("file://{}", bare.display())
    }

    fn executor() -> LibraryGitExecutor {
        LibraryGitExecutor::new(CliGitExecutor::new("/bin/true", None))
    }

    fn ctx() -> GitContext {
        GitContext::new(GitAuth::default())
    }

    #[tokio::test]
    async fn test_commit_push_and_pull() {
        let root = tempfile::tempdir().unwrap();
        let url = bare_remote(root.path());
        let git = executor();

        let first = root.path().join("first");
        git.add_repo(&ctx(), &first, &url).await.unwrap();
        git.fetch(&ctx(), &first).await.unwrap();
        assert!(git.list_branch(&ctx(), &first).await.unwrap().stdout.is_empty());
        git.checkout(&ctx(), &first, "master").await.unwrap();
        std::fs::write(first.join("README.md"), "@devtron").unwrap();
        let out = git
            .commit_and_push(&ctx(), &first, "master", "readme", "devtron bot", "bot@x.io")
            .await
            .unwrap();
        assert_eq!(out.stdout.len(), 40);

        let second = root.path().join("second");
        git.add_repo(&ctx(), &second, &url).await.unwrap();
        git.fetch(&ctx(), &second).await.unwrap();
        let branches = git.list_branch(&ctx(), &second).await.unwrap().stdout;
        assert_eq!(branches, "origin/master");
        git.pull(&ctx(), &second, "master").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(second.join("README.md")).unwrap(),
            "@devtron"
        );
    }

    #[tokio::test]
    async fn test_stale_push_is_conflict() {
        let root = tempfile::tempdir().unwrap();
        let url = bare_remote(root.path());
        let git = executor();

        let a = root.path().join("a");
        git.add_repo(&ctx(), &a, &url).await.unwrap();
        git.checkout(&ctx(), &a, "master").await.unwrap();
        git.commit_and_push(&ctx(), &a, "master", "init", "n", "e@x.io")
            .await
            .unwrap();

        let b = root.path().join("b");
        git.add_repo(&ctx(), &b, &url).await.unwrap();
        git.pull(&ctx(), &b, "master").await.unwrap();

        std::fs::write(a.join("a.txt"), "a").unwrap();
        git.commit_and_push(&ctx(), &a, "master", "a", "n", "e@x.io")
            .await
            .unwrap();

        std::fs::write(b.join("b.txt"), "b").unwrap();
        let err = git
            .commit_and_push(&ctx(), &b, "master", "b", "n", "e@x.io")
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::PushConflict));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let root = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ctx().with_cancel(token);
        let result = executor()
            .fetch(&ctx, &root.path().join("missing"))
            .await;
        assert!(result.is_err());
    }
}
