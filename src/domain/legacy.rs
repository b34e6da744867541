//! Rows owned by collaborators that the core only reads
//!
//! These back lazy migration of deployment configs and the cluster and
//! identity lookups the services need.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::deployment_config::DeploymentAppType;

/// Latest chart of an application (or an environment override of it)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRow {
    pub id: i32,
    pub app_id: i32,
    #[serde(default)]
    pub git_repo_url: String,
    /// Reference chart directory, e.g. `reference-chart_4-18-0`
    #[serde(default)]
    pub reference_template: String,
    #[serde(default)]
    pub chart_version: String,
    /// In-repo path of the rendered chart
    #[serde(default)]
    pub chart_location: String,
    #[serde(default)]
    pub is_custom_git_repository: bool,
    #[serde(default)]
    pub chart_ref_id: i32,
}

/// Reference chart registered with the platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRefRow {
    pub id: i32,
    /// Directory name of the reference chart
    pub location: String,
    #[serde(default)]
    pub version: String,
}

/// Deployment pipeline bound to an (app, env)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRow {
    pub id: i32,
    pub app_id: i32,
    pub environment_id: i32,
    #[serde(default)]
    pub deployment_app_type: Option<DeploymentAppType>,
    #[serde(default)]
    pub deployment_app_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub deployment_app_created: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Chart-store installation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub id: i32,
    pub app_id: i32,
    pub environment_id: i32,
    #[serde(default)]
    pub deployment_app_type: Option<DeploymentAppType>,
    #[serde(default)]
    pub git_ops_repo_url: String,
    #[serde(default)]
    pub git_ops_repo_name: String,
    #[serde(default)]
    pub is_custom_repository: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// One deployed version of a chart-store installation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledAppVersionHistory {
    pub id: i32,
    pub installed_app_version_id: i32,
    #[serde(default)]
    pub values_yaml_raw: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub git_hash: String,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: i32,
}

/// Target cluster known to the platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: i32,
    pub name: String,
    pub server_url: String,
    #[serde(default)]
    pub bearer_token: String,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Deployment environment (namespace on a cluster)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: i32,
    pub name: String,
    pub namespace: String,
    pub cluster_id: i32,
}

/// Application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: i32,
    pub name: String,
}

/// Platform user (only the email matters to the core)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub email_id: String,
}

/// Entry of a chart group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartGroupEntry {
    #[serde(default)]
    pub id: i32,
    pub chart_group_id: i32,
    #[serde(default)]
    pub app_store_values_version_id: i32,
    #[serde(default)]
    pub app_store_application_version_id: i32,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: i32,
    #[serde(default)]
    pub updated_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: i32,
}
