//! Release dispatch
//!
//! Drives the controller a `DeploymentConfig` names: Argo CD gets the repo
//! registered and its application re-pointed and synced, Flux gets a
//! credential secret plus `GitRepository`/`HelmRelease` objects in the
//! target cluster, and Helm releases are installed directly.

use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerSettings;
use crate::domain::deployment_config::{ArgoCdSpec, DeploymentAppType, FluxCdSpec};
use crate::domain::legacy::Cluster;
use crate::domain::{DeploymentConfig, GitOpsConfig};
use crate::error::{ControllerCode, ControllerError, GitOpsResult, KubernetesError, ValidationError};
use crate::infrastructure::argocd::{ArgoCdClient, RepositoryRegistration};
use crate::infrastructure::flux::{
    apply_managed_fields, basic_auth_secret, git_repository, git_repository_gvk, helm_release,
    helm_release_gvk, merge_secret,
};
use crate::infrastructure::helm::{HelmClient, HelmInstall};
use crate::infrastructure::kubernetes::{KubeObjects, KubeObjectsProvider};
use crate::store::GitOpsConfigRepository;

const REGISTER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Chart and values for a direct Helm release
#[derive(Debug, Clone)]
pub struct HelmDeployment {
    pub release_name: String,
    pub namespace: String,
    pub chart_dir: PathBuf,
    pub values_yaml: String,
}

#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub config: DeploymentConfig,
    pub cluster: Cluster,
    /// Whether the controller objects were created by an earlier deploy
    pub is_app_created: bool,
    /// Required for Helm releases
    pub helm: Option<HelmDeployment>,
}

pub struct ReleaseDispatcher {
    configs: Arc<dyn GitOpsConfigRepository>,
    argocd: Arc<dyn ArgoCdClient>,
    kube: Arc<dyn KubeObjectsProvider>,
    helm: Arc<dyn HelmClient>,
    settings: ControllerSettings,
    retry_delay: Duration,
}

impl ReleaseDispatcher {
    pub fn new(
        configs: Arc<dyn GitOpsConfigRepository>,
        argocd: Arc<dyn ArgoCdClient>,
        kube: Arc<dyn KubeObjectsProvider>,
        helm: Arc<dyn HelmClient>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            configs,
            argocd,
            kube,
            helm,
            settings,
            retry_delay: REGISTER_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn dispatch(&self, req: &DeploymentRequest, cancel: &CancellationToken) -> GitOpsResult<()> {
        let config = &req.config;
        match deployment_app_type(config)? {
            DeploymentAppType::ArgoCd => {
                let spec = argo_spec(config)?;
                let credentials = self.credentials(config).await?;
                self.register_repository(&config.repo_url, &credentials, cancel)
                    .await?;
                let patch = serde_json::json!({
                    "spec": {
                        "source": {
                            "repoURL": config.repo_url,
                            "path": config.chart_location,
                            "targetRevision": config.target_revision,
                        }
                    }
                });
                self.argocd
                    .patch_application(&spec.metadata.name, &patch)
                    .await?;
                self.argocd.sync_application(&spec.metadata.name).await?;
                info!(app = %spec.metadata.name, repo = %config.repo_url, "Argo CD application synced");
            }
            DeploymentAppType::FluxCd => {
                let spec = flux_spec(config)?;
                let credentials = self.credentials(config).await?;
                let kube = self.kube.objects_for(&req.cluster).await?;
                self.upsert_flux_secret(kube.as_ref(), spec, &credentials).await?;
                apply_object(
                    kube.as_ref(),
                    &git_repository_gvk(),
                    &spec.git_repository_namespace,
                    git_repository(spec),
                    req.is_app_created,
                )
                .await?;
                apply_object(
                    kube.as_ref(),
                    &helm_release_gvk(),
                    &spec.helm_release_namespace,
                    helm_release(spec),
                    req.is_app_created,
                )
                .await?;
                info!(
                    release = %spec.helm_release_name,
                    cluster = %req.cluster.name,
                    "Flux release applied"
                );
            }
            DeploymentAppType::Helm => {
                let helm = helm_deployment(req)?;
                self.helm
                    .upgrade_install(
                        &HelmInstall {
                            release_name: helm.release_name.clone(),
                            namespace: helm.namespace.clone(),
                            chart_dir: helm.chart_dir.clone(),
                            values_yaml: helm.values_yaml.clone(),
                            cluster: req.cluster.clone(),
                        },
                        cancel,
                    )
                    .await?;
                info!(release = %helm.release_name, "Helm release installed");
            }
        }
        Ok(())
    }

    /// Remove the controller objects of a release; missing objects are fine
    pub async fn delete(&self, req: &DeploymentRequest, cancel: &CancellationToken) -> GitOpsResult<()> {
        let config = &req.config;
        match deployment_app_type(config)? {
            DeploymentAppType::ArgoCd => {
                let spec = argo_spec(config)?;
                match self.argocd.delete_application(&spec.metadata.name).await {
                    Ok(()) => {}
                    Err(e) if e.code == ControllerCode::NotFound => {
                        debug!(app = %spec.metadata.name, "Application already gone");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            DeploymentAppType::FluxCd => {
                let spec = flux_spec(config)?;
                let kube = self.kube.objects_for(&req.cluster).await?;
                delete_object(
                    kube.as_ref(),
                    &helm_release_gvk(),
                    &spec.helm_release_namespace,
                    &spec.helm_release_name,
                )
                .await?;
                delete_object(
                    kube.as_ref(),
                    &git_repository_gvk(),
                    &spec.git_repository_namespace,
                    &spec.git_repository_name,
                )
                .await?;
            }
            DeploymentAppType::Helm => {
                let helm = helm_deployment(req)?;
                self.helm
                    .uninstall(&helm.release_name, &helm.namespace, &req.cluster, cancel)
                    .await?;
            }
        }
        info!(app_id = config.app_id, env_id = config.environment_id, "Release deleted");
        Ok(())
    }

    /// The GitOps account whose token the controller pulls with
    async fn credentials(&self, config: &DeploymentConfig) -> GitOpsResult<GitOpsConfig> {
        if config.credential_id_int > 0 {
            return Ok(self.configs.get_by_id(config.credential_id_int).await?);
        }
        self.configs
            .get_active()
            .await?
            .ok_or_else(|| ValidationError::GitOpsNotConfigured.into())
    }

    async fn register_repository(
        &self,
        repo_url: &str,
        credentials: &GitOpsConfig,
        cancel: &CancellationToken,
    ) -> GitOpsResult<()> {
        let registration = RepositoryRegistration {
            repo: repo_url.to_string(),
            username: credentials.username.clone(),
            password: credentials.token.clone(),
        };
        let attempts = self.settings.register_repo_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.argocd.register_repository(&registration).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(repo = %repo_url, attempt, "Repository registration failed: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
            attempt += 1;
            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = cancel.cancelled() => {
                    return Err(ControllerError::new(ControllerCode::Canceled, "repository registration cancelled").into());
                }
            }
        }
    }

    async fn upsert_flux_secret(
        &self,
        kube: &dyn KubeObjects,
        spec: &FluxCdSpec,
        credentials: &GitOpsConfig,
    ) -> GitOpsResult<()> {
        let namespace = &spec.git_repository_namespace;
        let desired = basic_auth_secret(
            &spec.git_ops_secret_name,
            namespace,
            &credentials.username,
            &credentials.token,
            credentials.provider()?,
        );
        match kube.create_secret(namespace, &desired).await {
            Ok(_) => Ok(()),
            Err(KubernetesError::AlreadyExists { .. }) => {
                let mut existing = kube.get_secret(namespace, &spec.git_ops_secret_name).await?;
                merge_secret(&mut existing, &desired);
                kube.update_secret(namespace, &existing).await?;
                debug!(secret = %spec.git_ops_secret_name, "Updated existing Flux secret");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn deployment_app_type(config: &DeploymentConfig) -> GitOpsResult<DeploymentAppType> {
    config.deployment_app_type.ok_or_else(|| {
        ValidationError::InvalidRequest(format!(
            "deployment app type is not set for app {} env {}",
            config.app_id, config.environment_id
        ))
        .into()
    })
}

fn argo_spec(config: &DeploymentConfig) -> GitOpsResult<&ArgoCdSpec> {
    config
        .release_configuration
        .as_ref()
        .and_then(|r| r.argo())
        .ok_or_else(|| ValidationError::InvalidRequest("argo cd release configuration is missing".into()).into())
}

fn flux_spec(config: &DeploymentConfig) -> GitOpsResult<&FluxCdSpec> {
    config
        .release_configuration
        .as_ref()
        .and_then(|r| r.flux())
        .ok_or_else(|| ValidationError::InvalidRequest("flux release configuration is missing".into()).into())
}

fn helm_deployment(req: &DeploymentRequest) -> GitOpsResult<&HelmDeployment> {
    req.helm
        .as_ref()
        .ok_or_else(|| ValidationError::InvalidRequest("helm chart and values are required".into()).into())
}

/// Create `desired`, or replace the live object when one exists
async fn apply_object(
    kube: &dyn KubeObjects,
    gvk: &GroupVersionKind,
    namespace: &str,
    desired: DynamicObject,
    is_app_created: bool,
) -> GitOpsResult<()> {
    let name = desired.metadata.name.clone().unwrap_or_default();
    if !is_app_created {
        match kube.create_object(gvk, namespace, &desired).await {
            Ok(_) => return Ok(()),
            Err(KubernetesError::AlreadyExists { .. }) => {
                debug!(kind = %gvk.kind, name = %name, "Object exists, replacing");
            }
            Err(e) => return Err(e.into()),
        }
    }
    match kube.get_object(gvk, namespace, &name).await {
        Ok(mut live) => {
            apply_managed_fields(&mut live, &desired);
            kube.replace_object(gvk, namespace, &live).await?;
        }
        Err(e) if e.is_not_found() => {
            kube.create_object(gvk, namespace, &desired).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn delete_object(kube: &dyn KubeObjects, gvk: &GroupVersionKind, namespace: &str, name: &str) -> GitOpsResult<()> {
    match kube.delete_object(gvk, namespace, name).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!(kind = %gvk.kind, name, "Already deleted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
