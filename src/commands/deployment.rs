//! `gitops deployment` subcommands

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use gitops_core::domain::{DeploymentAppType, DeploymentConfig};
use gitops_core::services::release_dispatcher::{DeploymentRequest, HelmDeployment};
use gitops_core::GitOpsCore;

use crate::cli::{DeploymentCommands, DeploymentTarget, DispatchArgs};
use crate::ui;

async fn resolve(core: &GitOpsCore, target: &DeploymentTarget, migrate: bool) -> Result<DeploymentConfig> {
    let service = &core.deployment_configs;
    let config = match (target.env_id, target.helm_app, migrate) {
        (None, _, false) => service.get_config_for_app(target.app_id).await?,
        (None, _, true) => service.get_and_migrate_config_for_app(target.app_id).await?,
        (Some(env), false, false) => service.get_config_for_app_and_env(target.app_id, env).await?,
        (Some(env), false, true) => {
            service
                .get_and_migrate_config_for_app_and_env(target.app_id, env)
                .await?
        }
        (Some(env), true, false) => service.get_config_for_helm_app(target.app_id, env).await?,
        (Some(env), true, true) => service.get_and_migrate_config_for_helm_app(target.app_id, env).await?,
    };
    Ok(config)
}

async fn request(core: &GitOpsCore, args: &DispatchArgs) -> Result<DeploymentRequest> {
    let target = DeploymentTarget {
        app_id: args.app_id,
        env_id: Some(args.env_id),
        helm_app: args.helm_app,
    };
    let config = resolve(core, &target, true).await?;
    let cluster = core.repos.clusters.find_by_id(args.cluster_id).await?;

    let helm = if config.deployment_app_type == Some(DeploymentAppType::Helm) {
        let (Some(release_name), Some(namespace), Some(chart_dir)) =
            (args.release_name.clone(), args.namespace.clone(), args.chart_dir.clone())
        else {
            bail!("helm releases need --release-name, --namespace and --chart-dir");
        };
        let values_yaml = match &args.values {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            None => String::new(),
        };
        Some(HelmDeployment {
            release_name,
            namespace,
            chart_dir,
            values_yaml,
        })
    } else {
        None
    };

    Ok(DeploymentRequest {
        config,
        cluster,
        is_app_created: args.app_created,
        helm,
    })
}

pub async fn execute(core: &GitOpsCore, command: DeploymentCommands, cancel: &CancellationToken) -> Result<()> {
    match command {
        DeploymentCommands::Get(target) => {
            ui::print_json(&resolve(core, &target, false).await?)?;
        }
        DeploymentCommands::Migrate(target) => {
            let config = resolve(core, &target, true).await?;
            ui::print_success(&format!("Deployment config {} stored", config.id));
            ui::print_json(&config)?;
        }
        DeploymentCommands::Dispatch(args) => {
            let req = request(core, &args).await?;
            core.dispatcher.dispatch(&req, cancel).await?;
            ui::print_success(&format!(
                "Release for app {} env {} dispatched to {}",
                args.app_id,
                args.env_id,
                req.config
                    .deployment_app_type
                    .map(|t| t.as_str())
                    .unwrap_or_default()
            ));
        }
        DeploymentCommands::Delete(args) => {
            let req = request(core, &args).await?;
            core.dispatcher.delete(&req, cancel).await?;
            ui::print_success(&format!("Release for app {} env {} deleted", args.app_id, args.env_id));
        }
    }
    Ok(())
}
