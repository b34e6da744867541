//! Git working-copy and commit settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings for the git executor and commit pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    /// Use the git CLI instead of the embedded libgit2 backend
    #[serde(default)]
    pub use_git_cli: bool,

    /// Global per-command timeout in seconds (0 = no timeout)
    #[serde(default)]
    pub cli_cmd_timeout_global_seconds: u64,

    /// Root directory for per-operation working copies
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Credential helper script exported as GIT_ASKPASS
    #[serde(default = "default_ask_pass")]
    pub ask_pass: String,

    /// Prefix prepended to generated repository names
    #[serde(default)]
    pub repo_name_prefix: String,

    /// Branch used when a request names none
    #[serde(default = "default_target_revision")]
    pub default_target_revision: String,

    /// Attempts for a single-file commit rejected with a conflict
    #[serde(default = "default_commit_retry_count")]
    pub commit_retry_count_on_conflict: u32,

    /// Delay between conflicting commit attempts, in seconds
    #[serde(default = "default_commit_retry_delay")]
    pub commit_retry_delay_on_conflict_seconds: u64,

    /// Staging directory for Bitbucket multipart commits
    #[serde(default = "default_bitbucket_dir")]
    pub bitbucket_gitops_dir: PathBuf,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("/tmp/gitops/")
}

fn default_ask_pass() -> String {
    "/git-ask-pass.sh".to_string()
}

fn default_target_revision() -> String {
    "master".to_string()
}

fn default_commit_retry_count() -> u32 {
    3
}

fn default_commit_retry_delay() -> u64 {
    1
}

fn default_bitbucket_dir() -> PathBuf {
    PathBuf::from("/tmp/bitbucketGitOps")
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            use_git_cli: false,
            cli_cmd_timeout_global_seconds: 0,
            working_dir: default_working_dir(),
            ask_pass: default_ask_pass(),
            repo_name_prefix: String::new(),
            default_target_revision: default_target_revision(),
            commit_retry_count_on_conflict: default_commit_retry_count(),
            commit_retry_delay_on_conflict_seconds: default_commit_retry_delay(),
            bitbucket_gitops_dir: default_bitbucket_dir(),
        }
    }
}

impl GitSettings {
    /// Global command timeout, if one is configured
    pub fn global_timeout(&self) -> Option<Duration> {
        (self.cli_cmd_timeout_global_seconds > 0)
            .then(|| Duration::from_secs(self.cli_cmd_timeout_global_seconds))
    }

    pub fn commit_retry_delay(&self) -> Duration {
        Duration::from_secs(self.commit_retry_delay_on_conflict_seconds)
    }
}

/// Polling budget for provider availability checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySettings {
    /// Seconds between polls
    #[serde(default = "default_poll_interval")]
    pub interval_seconds: u64,

    /// Scale factor applied to every provider's attempt budget (1 = as shipped)
    #[serde(default = "default_attempt_scale")]
    pub attempt_scale: u32,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_attempt_scale() -> u32 {
    1
}

impl Default for AvailabilitySettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_poll_interval(),
            attempt_scale: default_attempt_scale(),
        }
    }
}

impl AvailabilitySettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}
