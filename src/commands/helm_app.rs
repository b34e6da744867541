//! `gitops helm-app` subcommands

use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use gitops_core::domain::deployment_config::deployed_app_name;
use gitops_core::domain::ChartConfig;
use gitops_core::services::git_operation::HelmAppPushRequest;
use gitops_core::GitOpsCore;

use crate::cli::HelmAppCommands;
use crate::ui;

fn chart_file(path: &Path, file_name: &str, repo_name: &str, location: &str) -> Result<ChartConfig> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(ChartConfig {
        chart_repo_name: repo_name.to_string(),
        chart_location: location.to_string(),
        file_name: file_name.to_string(),
        file_content,
        ..Default::default()
    })
}

pub async fn execute(core: &GitOpsCore, command: HelmAppCommands, user_id: i32, cancel: &CancellationToken) -> Result<()> {
    match command {
        HelmAppCommands::Push {
            app_name,
            env_name,
            repo_url,
            chart_dir,
            requirements,
            values,
            target_revision,
        } => {
            let repo_name = core.read.repo_name_from_url(&repo_url);
            let location = deployed_app_name(&app_name, &env_name);
            let requirements = chart_file(&requirements, "requirements.yaml", &repo_name, &location)?;
            let values = chart_file(&values, "values.yaml", &repo_name, &location)?;
            let request = HelmAppPushRequest {
                app_name,
                env_name,
                repo_url,
                target_revision,
                chart_dir,
                user_id,
            };
            let (attribute, commit) = core
                .git
                .push_chart_to_gitops_repo_for_helm_app(&request, &requirements, &values, cancel)
                .await?;
            ui::print_success(&format!("Pushed {} at {}", attribute.chart_location, commit.hash));
            ui::print_json(&attribute)?;
        }
    }
    Ok(())
}
