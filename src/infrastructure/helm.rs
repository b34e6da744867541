//! Helm releases through the `helm` CLI

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::kubernetes::{is_local_cluster, kubeconfig_yaml};
use crate::domain::legacy::Cluster;
use crate::error::GitOpsError;

/// One `helm upgrade --install`
#[derive(Debug, Clone)]
pub struct HelmInstall {
    pub release_name: String,
    pub namespace: String,
    pub chart_dir: PathBuf,
    pub values_yaml: String,
    pub cluster: Cluster,
}

#[async_trait]
pub trait HelmClient: Send + Sync {
    async fn upgrade_install(&self, install: &HelmInstall, cancel: &CancellationToken) -> Result<(), GitOpsError>;

    async fn uninstall(
        &self,
        release_name: &str,
        namespace: &str,
        cluster: &Cluster,
        cancel: &CancellationToken,
    ) -> Result<(), GitOpsError>;
}

/// `HelmClient` running the `helm` binary
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: String,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new("helm")
    }
}

impl HelmCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: Vec<String>, cancel: &CancellationToken) -> Result<(), GitOpsError> {
        debug!("Running {} {}", self.binary, args.join(" "));
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GitOpsError::Helm(format!("failed to run {}: {}", self.binary, e)))?;

        let output = tokio::select! {
            out = child.wait_with_output() => out?,
            _ = cancel.cancelled() => {
                return Err(GitOpsError::Helm("helm command cancelled".to_string()));
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitOpsError::Helm(format!(
                "helm {} failed: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Write the kubeconfig for a remote cluster; `None` for the local one
fn kubeconfig_file(cluster: &Cluster, dir: &Path) -> Result<Option<PathBuf>, GitOpsError> {
    if is_local_cluster(cluster) {
        return Ok(None);
    }
    let path = dir.join("kubeconfig");
    std::fs::write(&path, kubeconfig_yaml(cluster)?)?;
    Ok(Some(path))
}

/// Arguments for `helm upgrade --install`
pub fn upgrade_args(install: &HelmInstall, values_file: &Path, kubeconfig: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        install.release_name.clone(),
        install.chart_dir.display().to_string(),
        "--namespace".to_string(),
        install.namespace.clone(),
        "--create-namespace".to_string(),
        "--values".to_string(),
        values_file.display().to_string(),
    ];
    if let Some(kubeconfig) = kubeconfig {
        args.push("--kubeconfig".to_string());
        args.push(kubeconfig.display().to_string());
    }
    args
}

#[async_trait]
impl HelmClient for HelmCli {
    async fn upgrade_install(&self, install: &HelmInstall, cancel: &CancellationToken) -> Result<(), GitOpsError> {
        let scratch = tempfile::tempdir()?;
        let values_file = scratch.path().join("values.yaml");
        std::fs::write(&values_file, &install.values_yaml)?;
        let kubeconfig = kubeconfig_file(&install.cluster, scratch.path())?;

        info!(
            release = %install.release_name,
            namespace = %install.namespace,
            "Installing helm release"
        );
        self.run(upgrade_args(install, &values_file, kubeconfig.as_deref()), cancel)
            .await
    }

    async fn uninstall(
        &self,
        release_name: &str,
        namespace: &str,
        cluster: &Cluster,
        cancel: &CancellationToken,
    ) -> Result<(), GitOpsError> {
        let scratch = tempfile::tempdir()?;
        let mut args = vec![
            "uninstall".to_string(),
            release_name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        if let Some(kubeconfig) = kubeconfig_file(cluster, scratch.path())? {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        info!(release = %release_name, namespace = %namespace, "Uninstalling helm release");
        self.run(args, cancel).await
    }
}
