//! Chart commit payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::deployment_config::join_path;

/// A single file to commit into a GitOps repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    /// Repository name
    pub chart_repo_name: String,
    /// Directory inside the repository
    #[serde(default)]
    pub chart_location: String,
    pub file_name: String,
    pub file_content: String,
    #[serde(default)]
    pub release_message: String,
    /// Branch; empty means the default target revision
    #[serde(default)]
    pub target_revision: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_email_id: String,
    /// Controls whether the file lives at the repo root or under `chart_location`
    #[serde(default)]
    pub use_root_path: bool,
}

impl ChartConfig {
    /// In-repo path of the file
    pub fn file_path(&self) -> String {
        if self.use_root_path {
            self.file_name.clone()
        } else {
            join_path(&self.chart_location, &self.file_name)
        }
    }

    /// Branch to commit to, falling back to `default_revision`
    pub fn branch<'a>(&'a self, default_revision: &'a str) -> &'a str {
        if self.target_revision.trim().is_empty() {
            default_revision
        } else {
            &self.target_revision
        }
    }
}

/// Outcome of a provider-side commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub hash: String,
    pub committed_at: Option<DateTime<Utc>>,
}

/// Where an application's chart lives in Git
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartGitAttribute {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub chart_location: String,
    pub is_new_repo: bool,
}
