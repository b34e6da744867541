//! `git` CLI backend
//!
//! Credentials reach git through the askpass helper: `GIT_ASKPASS` points at
//! a script that echoes `GIT_USERNAME`/`GIT_PASSWORD`. TLS material is
//! written to temp files and exported through the `GIT_SSL_*` variables.

use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use super::{GitContext, GitExecutor, GitOutput};
use crate::domain::TlsMaterial;
use crate::error::GitError;

/// Executor that shells out to the `git` binary
#[derive(Debug, Clone)]
pub struct CliGitExecutor {
    ask_pass: String,
    global_timeout: Option<Duration>,
}

impl CliGitExecutor {
    pub fn new(ask_pass: impl Into<String>, global_timeout: Option<Duration>) -> Self {
        Self {
            ask_pass: ask_pass.into(),
            global_timeout,
        }
    }

    /// Timeout applied when the context sets none
    pub fn global_timeout(&self) -> Option<Duration> {
        self.global_timeout
    }

    /// Run `git -C <dir> <args>` under the request context
    async fn run(
        &self,
        ctx: &GitContext,
        dir: &Path,
        args: &[&str],
    ) -> Result<GitOutput, GitError> {
        let command = format!("git {}", args.join(" "));
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_ASKPASS", &self.ask_pass)
            .env("GIT_USERNAME", &ctx.auth.username)
            .env("GIT_PASSWORD", &ctx.auth.password)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Temp files must outlive the child
        let _tls_files = match &ctx.tls {
            Some(tls) => write_tls_files(tls, &mut cmd)?,
            None => Vec::new(),
        };

        debug!("Running {}", command);
        let child = cmd.spawn()?;
        let timeout = ctx.timeout.or(self.global_timeout);

        let wait = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                    .await
                    .map_err(|_| GitError::Timeout {
                        command: command.clone(),
                        seconds: limit.as_secs(),
                    })?
                    .map_err(GitError::from),
                None => child.wait_with_output().await.map_err(GitError::from),
            }
        };

        // Dropping the wait future drops the child, which kills it
        let output = tokio::select! {
            result = wait => result?,
            _ = ctx.cancel.cancelled() => return Err(GitError::Cancelled),
        };

        let result = GitOutput {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command,
                stderr: if result.stderr.is_empty() {
                    result.stdout
                } else {
                    result.stderr
                },
            });
        }
        Ok(result)
    }
}

fn write_tls_files(tls: &TlsMaterial, cmd: &mut Command) -> Result<Vec<NamedTempFile>, GitError> {
    let mut files = Vec::new();
    for (var, pem) in [
        ("GIT_SSL_CAINFO", &tls.ca_cert),
        ("GIT_SSL_CERT", &tls.tls_cert),
        ("GIT_SSL_KEY", &tls.tls_key),
    ] {
        if pem.is_empty() {
            continue;
        }
        let mut file = NamedTempFile::new()?;
        file.write_all(pem.as_bytes())?;
        file.flush()?;
        cmd.env(var, file.path());
        files.push(file);
    }
    Ok(files)
}

fn is_push_rejection(stderr: &str) -> bool {
    stderr.contains("failed to push some refs") || stderr.contains("[rejected]")
}

#[async_trait]
impl GitExecutor for CliGitExecutor {
    async fn add_repo(&self, ctx: &GitContext, dir: &Path, url: &str) -> Result<GitOutput, GitError> {
        tokio::fs::create_dir_all(dir).await?;
        self.run(ctx, dir, &["init"]).await?;
        self.run(ctx, dir, &["remote", "add", "origin", url]).await
    }

    async fn fetch(&self, ctx: &GitContext, dir: &Path) -> Result<GitOutput, GitError> {
        self.run(ctx, dir, &["fetch", "origin", "--tags", "--force"])
            .await
    }

    async fn list_branch(&self, ctx: &GitContext, dir: &Path) -> Result<GitOutput, GitError> {
        self.run(ctx, dir, &["branch", "-r"]).await
    }

    async fn pull(&self, ctx: &GitContext, dir: &Path, branch: &str) -> Result<GitOutput, GitError> {
        match self.run(ctx, dir, &["pull", "origin", branch, "--force"]).await {
            Err(GitError::CommandFailed { stderr, .. })
                if stderr.contains("Already up to date") || stderr.contains("already up-to-date") =>
            {
                Ok(GitOutput::stdout(stderr))
            }
            other => other,
        }
    }

    async fn checkout(&self, ctx: &GitContext, dir: &Path, branch: &str) -> Result<GitOutput, GitError> {
        match self.run(ctx, dir, &["checkout", "-B", branch]).await {
            Ok(out) => Ok(out),
            // Unborn HEAD: just repoint the symbolic ref
            Err(GitError::CommandFailed { .. }) => {
                let head = format!("refs/heads/{}", branch);
                self.run(ctx, dir, &["symbolic-ref", "HEAD", &head]).await
            }
            Err(e) => Err(e),
        }
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
        self.run(ctx, dir, &["add", "-A"]).await?;
        let user_name = format!("user.name={}", name);
        let user_email = format!("user.email={}", email);
        let author = format!("{} <{}>", name, email);
        self.run(
            ctx,
            dir,
            &[
                "-c",
                &user_name,
                "-c",
                &user_email,
                "commit",
                "--allow-empty",
                "-m",
                message,
                "--author",
                &author,
            ],
        )
        .await?;
        let hash = self.run(ctx, dir, &["rev-parse", "HEAD"]).await?.stdout;

        let refspec = format!("HEAD:refs/heads/{}", branch);
        match self.run(ctx, dir, &["push", "origin", &refspec]).await {
            Ok(out) => Ok(GitOutput {
                stdout: hash,
                stderr: out.stderr,
            }),
            Err(GitError::CommandFailed { stderr, .. }) if is_push_rejection(&stderr) => {
                debug!("Push rejected: {}", stderr);
                Err(GitError::PushConflict)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_default_branch(&self, ctx: &GitContext, dir: &Path) -> Result<GitOutput, GitError> {
        if let Ok(out) = self
            .run(ctx, dir, &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"])
            .await
        {
            return Ok(out);
        }
        let out = self
            .run(ctx, dir, &["ls-remote", "--symref", "origin", "HEAD"])
            .await?;
        let branch = out
            .stdout
            .lines()
            .find_map(|line| {
                line.strip_prefix("ref: refs/heads/")
                    .and_then(|rest| rest.split_whitespace().next())
            })
            .unwrap_or_default()
            .to_string();
        Ok(GitOutput::stdout(branch))
    }
}
