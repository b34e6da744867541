//! Deployment configuration entity and its controller-specific release view
//!
//! A `DeploymentConfig` is the effective release target of an application
//! (`environment_id == 0`) or of an (application, environment) pair. The
//! embedded `ReleaseConfiguration` is regenerated from the entity's own
//! fields on every write and is never read back as a source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current release-configuration schema version
pub const RELEASE_CONFIG_VERSION: &str = "v1.0.0";

/// Marker stored when an application has no GitOps repository yet
pub const GIT_REPO_NOT_CONFIGURED: &str = "NOT_CONFIGURED";

/// In-cluster API server address used as the Argo CD destination
pub const DEFAULT_CLUSTER_URL: &str = "https://kubernetes.default.svc";

/// Cluster id of the cluster hosting the control plane
pub const DEFAULT_CLUSTER_ID: i32 = 1;

/// Namespace the Argo CD application objects live in
pub const DEFAULT_ARGO_NAMESPACE: &str = "devtroncd";

/// User id recorded on writes performed by migration
pub const SYSTEM_USER_ID: i32 = 1;

/// Whether a URL counts as "no repository configured"
pub fn is_repo_not_configured(url: &str) -> bool {
    url.trim().is_empty() || url == GIT_REPO_NOT_CONFIGURED
}

/// Values file owned by the platform for an environment
pub fn values_file_for_env(env_id: i32) -> String {
    format!("_{}-values.yaml", env_id)
}

/// Release/application name for an (app, env) deployment
pub fn deployed_app_name(app_name: &str, env_name: &str) -> String {
    format!("{}-{}", app_name, env_name)
}

/// Join path segments with `/`, ignoring empty ones
pub fn join_path(base: &str, leaf: &str) -> String {
    match (base.trim_end_matches('/'), leaf.trim_start_matches('/')) {
        ("", leaf) => leaf.to_string(),
        (base, "") => base.to_string(),
        (base, leaf) => format!("{}/{}", base, leaf),
    }
}

/// Whether the repository was generated by the platform or supplied by a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    #[default]
    SystemGenerated,
    Custom,
}

impl ConfigType {
    pub fn from_custom_flag(is_custom: bool) -> Self {
        if is_custom {
            Self::Custom
        } else {
            Self::SystemGenerated
        }
    }
}

/// Which controller reconciles the release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentAppType {
    ArgoCd,
    Helm,
    FluxCd,
}

impl DeploymentAppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArgoCd => "argo_cd",
            Self::Helm => "helm",
            Self::FluxCd => "flux_cd",
        }
    }

    /// Whether the release is driven from a GitOps repository
    pub fn is_gitops(&self) -> bool {
        matches!(self, Self::ArgoCd | Self::FluxCd)
    }
}

impl fmt::Display for DeploymentAppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether this system owns the application object or only points at one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseMode {
    #[default]
    Create,
    Link,
}

/// Argo CD application metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cluster_id: i32,
    #[serde(default)]
    pub namespace: String,
}

/// Argo CD application source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(default, rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub target_revision: String,
    #[serde(default)]
    pub value_files: Vec<String>,
}

/// Argo CD application destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub server: String,
}

/// Argo CD application spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    #[serde(default)]
    pub source: ApplicationSource,
    #[serde(default)]
    pub destination: Destination,
}

/// Release view for Argo CD managed deployments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgoCdSpec {
    #[serde(default)]
    pub metadata: ApplicationMetadata,
    #[serde(default)]
    pub spec: ApplicationSpec,
}

/// Release view for Flux managed deployments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FluxCdSpec {
    #[serde(default)]
    pub cluster_id: i32,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub git_repository_name: String,
    #[serde(default)]
    pub git_repository_namespace: String,
    #[serde(default)]
    pub helm_release_name: String,
    #[serde(default)]
    pub helm_release_namespace: String,
    #[serde(default)]
    pub git_ops_secret_name: String,
    #[serde(default)]
    pub chart_location: String,
    #[serde(default)]
    pub chart_version: String,
    #[serde(default)]
    pub revision_target: String,
    #[serde(default, rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub devtron_values_file: String,
    #[serde(default)]
    pub extra_values_files: Vec<String>,
}

impl FluxCdSpec {
    /// Ordered values files: chart defaults, user files, then the owned file last so it wins
    pub fn final_values_files(&self) -> Vec<String> {
        let mut files = Vec::with_capacity(self.extra_values_files.len() + 2);
        files.push(join_path(&self.chart_location, "values.yaml"));
        files.extend(self.extra_values_files.iter().cloned());
        if !self.devtron_values_file.is_empty() {
            files.push(join_path(&self.chart_location, &self.devtron_values_file));
        }
        files
    }
}

/// Controller-specific part of a release configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReleaseTarget {
    ArgoCd(ArgoCdSpec),
    FluxCd(FluxCdSpec),
    Helm,
}

/// Versioned release view embedded in a deployment config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfiguration {
    pub version: String,
    #[serde(flatten)]
    pub target: ReleaseTarget,
}

impl ReleaseConfiguration {
    pub fn new(target: ReleaseTarget) -> Self {
        Self {
            version: RELEASE_CONFIG_VERSION.to_string(),
            target,
        }
    }

    pub fn argo(&self) -> Option<&ArgoCdSpec> {
        match &self.target {
            ReleaseTarget::ArgoCd(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn flux(&self) -> Option<&FluxCdSpec> {
        match &self.target {
            ReleaseTarget::FluxCd(spec) => Some(spec),
            _ => None,
        }
    }

    /// App-level Argo view derived from a chart's repo and location
    pub fn app_level_from_chart(repo_url: &str, chart_location: &str) -> Self {
        Self::new(ReleaseTarget::ArgoCd(ArgoCdSpec {
            spec: ApplicationSpec {
                source: ApplicationSource {
                    repo_url: repo_url.to_string(),
                    path: chart_location.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }))
    }
}

/// Effective release target for an app or (app, env)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    #[serde(default)]
    pub id: i32,
    pub app_id: i32,
    /// 0 for the app-level record
    #[serde(default)]
    pub environment_id: i32,
    #[serde(default)]
    pub config_type: ConfigType,
    #[serde(default)]
    pub deployment_app_type: Option<DeploymentAppType>,
    #[serde(default)]
    pub release_mode: ReleaseMode,
    #[serde(default, rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub repo_name: String,
    #[serde(default)]
    pub chart_location: String,
    #[serde(default)]
    pub target_revision: String,
    #[serde(default)]
    pub credential_type: String,
    #[serde(default)]
    pub credential_id_int: i32,
    #[serde(default)]
    pub credential_id_string: String,
    #[serde(default)]
    pub release_configuration: Option<ReleaseConfiguration>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: i32,
    #[serde(default)]
    pub updated_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: i32,
}

impl DeploymentConfig {
    pub fn is_app_level(&self) -> bool {
        self.environment_id == 0
    }

    pub fn is_argo(&self) -> bool {
        self.deployment_app_type == Some(DeploymentAppType::ArgoCd)
    }

    pub fn is_flux(&self) -> bool {
        self.deployment_app_type == Some(DeploymentAppType::FluxCd)
    }

    /// Whether the release view is missing or predates versioning
    pub fn needs_release_configuration(&self) -> bool {
        self.release_configuration
            .as_ref()
            .map(|r| r.version.is_empty())
            .unwrap_or(true)
    }

    pub fn is_repo_configured(&self) -> bool {
        !is_repo_not_configured(&self.repo_url)
    }

    /// Project the entity's repo URL, chart location and revision into the release view
    pub fn sync_release_configuration(&mut self) {
        let Some(release) = self.release_configuration.as_mut() else {
            return;
        };
        match &mut release.target {
            ReleaseTarget::ArgoCd(spec) => {
                spec.spec.source.repo_url = self.repo_url.clone();
                if !self.chart_location.is_empty() {
                    spec.spec.source.path = self.chart_location.clone();
                }
                if !self.target_revision.is_empty() {
                    spec.spec.source.target_revision = self.target_revision.clone();
                }
            }
            ReleaseTarget::FluxCd(spec) => {
                spec.repo_url = self.repo_url.clone();
                if !self.chart_location.is_empty() {
                    spec.chart_location = self.chart_location.clone();
                }
                if !self.target_revision.is_empty() {
                    spec.revision_target = self.target_revision.clone();
                }
            }
            ReleaseTarget::Helm => {}
        }
        if release.version.is_empty() {
            release.version = RELEASE_CONFIG_VERSION.to_string();
        }
    }

    /// Fill entity fields the legacy rows only carried inside the release view
    pub fn backfill_from_release_configuration(&mut self) {
        let Some(release) = self.release_configuration.as_ref() else {
            return;
        };
        let (repo_url, path, revision) = match &release.target {
            ReleaseTarget::ArgoCd(spec) => (
                spec.spec.source.repo_url.as_str(),
                spec.spec.source.path.as_str(),
                spec.spec.source.target_revision.as_str(),
            ),
            ReleaseTarget::FluxCd(spec) => (
                spec.repo_url.as_str(),
                spec.chart_location.as_str(),
                spec.revision_target.as_str(),
            ),
            ReleaseTarget::Helm => return,
        };
        if self.repo_url.is_empty() {
            self.repo_url = repo_url.to_string();
        }
        if self.chart_location.is_empty() {
            self.chart_location = path.to_string();
        }
        if self.target_revision.is_empty() {
            self.target_revision = revision.to_string();
        }
    }

    /// Set the repository URL on both the entity and its release view
    pub fn set_repo_url(&mut self, url: impl Into<String>) {
        self.repo_url = url.into();
        self.sync_release_configuration();
    }

    /// Set the chart location on both the entity and its release view
    pub fn set_chart_location(&mut self, location: impl Into<String>) {
        self.chart_location = location.into();
        self.sync_release_configuration();
    }
}
