//! GitOps controller and deployment-config settings.

use serde::{Deserialize, Serialize};

/// Where the Argo CD controller lives and how to reach its API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Namespace holding the controller's config map and shared secret
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Controller config map carrying `repository.credentials`
    #[serde(default = "default_config_map")]
    pub config_map: String,

    /// Shared secret with `username`/`password` for non-TLS hosts
    #[serde(default = "default_secret_name")]
    pub gitops_secret_name: String,

    /// Argo CD API server URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Argo CD API bearer token
    #[serde(default)]
    pub token: String,

    /// Skip TLS verification against the Argo CD API
    #[serde(default)]
    pub insecure: bool,

    /// Attempts for repository registration at deploy time
    #[serde(default = "default_register_retries")]
    pub register_repo_retries: u32,
}

fn default_namespace() -> String {
    "devtroncd".to_string()
}

fn default_config_map() -> String {
    "argocd-cm".to_string()
}

fn default_secret_name() -> String {
    "devtron-gitops-secret".to_string()
}

fn default_url() -> String {
    "https://argocd-server.devtroncd".to_string()
}

fn default_register_retries() -> u32 {
    3
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            config_map: default_config_map(),
            gitops_secret_name: default_secret_name(),
            url: default_url(),
            token: String::new(),
            insecure: false,
            register_repo_retries: default_register_retries(),
        }
    }
}

/// DeploymentConfig read-path behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSettings {
    /// Persist records synthesised from legacy rows on read
    #[serde(default = "default_true")]
    pub migrate_deployment_config_data: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            migrate_deployment_config_data: true,
        }
    }
}
