//! # GitOps Core Configuration
//!
//! Layered configuration loading: defaults → YAML file → environment
//!
//! ## Sources
//!
//! 1. **Defaults** baked into each settings struct (`#[serde(default)]`)
//! 2. **YAML file** passed with `--config` or `GITOPS_CONFIG`
//! 3. **Environment** variables such as `USE_GIT_CLI`, `GIT_WORKING_DIR`,
//!    `GITOPS_TARGET_REVISION` which win over everything else
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let settings = Settings::load(Some(Path::new("gitops.yaml")))?;
//! println!("Working dir: {}", settings.git.working_dir.display());
//! ```

mod controller;
mod git;

pub use controller::{ControllerSettings, DeploymentSettings};
pub use git::{AvailabilitySettings, GitSettings};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete process configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Git executor and commit pipeline settings
    #[serde(default)]
    pub git: GitSettings,

    /// Provider availability polling
    #[serde(default)]
    pub availability: AvailabilitySettings,

    /// GitOps controller settings
    #[serde(default)]
    pub controller: ControllerSettings,

    /// DeploymentConfig read-path settings
    #[serde(default)]
    pub deployment: DeploymentSettings,
}

impl Settings {
    /// Load defaults, overlay the optional YAML file, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a YAML settings file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Overlay environment variables resolved through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("USE_GIT_CLI") {
            self.git.use_git_cli = parse_bool("USE_GIT_CLI", &v)?;
        }
        if let Some(v) = non_empty("CLI_CMD_TIMEOUT_GLOBAL_SECONDS") {
            self.git.cli_cmd_timeout_global_seconds = parse_num("CLI_CMD_TIMEOUT_GLOBAL_SECONDS", &v)?;
        }
        if let Some(v) = non_empty("GIT_WORKING_DIR") {
            self.git.working_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("GIT_ASK_PASS") {
            self.git.ask_pass = v;
        }
        if let Some(v) = lookup("GITOPS_REPO_NAME_PREFIX") {
            self.git.repo_name_prefix = v;
        }
        if let Some(v) = non_empty("GITOPS_TARGET_REVISION") {
            self.git.default_target_revision = v;
        }
        if let Some(v) = non_empty("COMMIT_RETRY_COUNT_ON_CONFLICT") {
            self.git.commit_retry_count_on_conflict = parse_num("COMMIT_RETRY_COUNT_ON_CONFLICT", &v)?;
        }
        if let Some(v) = non_empty("COMMIT_RETRY_DELAY_ON_CONFLICT_SECONDS") {
            self.git.commit_retry_delay_on_conflict_seconds =
                parse_num("COMMIT_RETRY_DELAY_ON_CONFLICT_SECONDS", &v)?;
        }
        if let Some(v) = non_empty("BITBUCKET_GITOPS_DIR") {
            self.git.bitbucket_gitops_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("ACD_NAMESPACE") {
            self.controller.namespace = v;
        }
        if let Some(v) = non_empty("ACD_CM") {
            self.controller.config_map = v;
        }
        if let Some(v) = non_empty("GITOPS_SECRET_NAME") {
            self.controller.gitops_secret_name = v;
        }
        if let Some(v) = non_empty("ACD_URL") {
            self.controller.url = v;
        }
        if let Some(v) = non_empty("ACD_TOKEN") {
            self.controller.token = v;
        }
        if let Some(v) = non_empty("MIGRATE_DEPLOYMENT_CONFIG_DATA") {
            self.deployment.migrate_deployment_config_data =
                parse_bool("MIGRATE_DEPLOYMENT_CONFIG_DATA", &v)?;
        }
        Ok(())
    }

    /// Reject settings that would make every operation fail later
    pub fn validate(&self) -> Result<()> {
        if self.git.working_dir.as_os_str().is_empty() {
            bail!("GIT_WORKING_DIR must not be empty");
        }
        if self.git.commit_retry_count_on_conflict == 0 {
            bail!("COMMIT_RETRY_COUNT_ON_CONFLICT must be at least 1");
        }
        if self.git.default_target_revision.trim().is_empty() {
            bail!("GITOPS_TARGET_REVISION must not be empty");
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("Invalid boolean for {}: {}", key, other),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid number for {}: {}", key, value))
}
