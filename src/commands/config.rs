//! `gitops config` subcommands

use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use gitops_core::domain::{DetailedValidationResponse, GitOpsConfig, GitProvider};
use gitops_core::GitOpsCore;

use crate::cli::ConfigCommands;
use crate::ui;

fn read_config(path: &Path) -> Result<GitOpsConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn report(response: &DetailedValidationResponse, action: &str) -> Result<()> {
    if response.has_errors() {
        ui::print_error(&format!("Dry run failed, config not {}", action));
    } else if response.validation_skipped {
        ui::print_info("Custom repositories allowed, dry run skipped");
    } else {
        ui::print_success(&format!("GitOps config {}", action));
    }
    ui::print_json(response)
}

pub async fn execute(core: &GitOpsCore, command: ConfigCommands, user_id: i32, cancel: &CancellationToken) -> Result<()> {
    let service = &core.gitops_configs;
    match command {
        ConfigCommands::Create { file } => {
            let config = read_config(&file)?;
            let response = service.validate_and_create(config, user_id, cancel).await?;
            report(&response, "saved")?;
        }
        ConfigCommands::Update { file } => {
            let config = read_config(&file)?;
            if config.id == 0 {
                anyhow::bail!("{} must carry the id of the config to update", file.display());
            }
            let response = service.validate_and_update(config, user_id, cancel).await?;
            report(&response, "updated")?;
        }
        ConfigCommands::Get { id, provider } => {
            let config = match (id, provider) {
                (Some(id), _) => service.get_by_id(id).await?,
                (None, Some(provider)) => {
                    let provider: GitProvider = provider.parse()?;
                    service.get_by_provider(provider).await?
                }
                (None, None) => anyhow::bail!("pass --id or --provider"),
            };
            ui::print_json(&config)?;
        }
        ConfigCommands::List => {
            ui::print_json(&service.get_all().await?)?;
        }
        ConfigCommands::Active => match service.get_gitops_config_active().await? {
            Some(config) => ui::print_json(&config)?,
            None => ui::print_warning("GitOps is not configured"),
        },
        ConfigCommands::DryRun { file } => {
            let mut config = read_config(&file)?;
            config.validate_tls()?;
            let response = service.validate_dry_run(&config, cancel).await;
            if response.has_errors() {
                ui::print_error("Dry run failed");
            } else {
                ui::print_success("Dry run passed");
            }
            ui::print_json(&response)?;
        }
    }
    Ok(())
}
