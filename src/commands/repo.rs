//! `gitops repo` subcommands

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use gitops_core::domain::ChartConfig;
use gitops_core::services::git_operation::PushChartRequest;
use gitops_core::services::validation::ValidateCustomUrlRequest;
use gitops_core::GitOpsCore;

use crate::cli::{CommitArgs, RepoCommands};
use crate::ui;

pub async fn execute(core: &GitOpsCore, command: RepoCommands, user_id: i32, cancel: &CancellationToken) -> Result<()> {
    match command {
        RepoCommands::Create {
            name,
            reference_template,
            version,
            target_revision,
        } => {
            let attribute = core
                .git
                .create_git_repository_for_app(&name, &reference_template, &version, user_id, &target_revision, cancel)
                .await?;
            if attribute.is_new_repo {
                ui::print_success(&format!("Created {}", attribute.repo_url));
            } else {
                ui::print_info(&format!("Repository already exists: {}", attribute.repo_url));
            }
            ui::print_json(&attribute)?;
        }
        RepoCommands::PushChart {
            name,
            reference_template,
            version,
            source_dir,
            repo_url,
            target_revision,
        } => {
            let request = PushChartRequest {
                repo_name: name,
                reference_template,
                version,
                source_dir,
                repo_url,
                target_revision,
                user_id,
            };
            core.git.push_chart_to_git_repo(&request, cancel).await?;
            ui::print_success(&format!(
                "Chart {}/{} pushed to {}",
                request.reference_template, request.version, request.repo_url
            ));
        }
        RepoCommands::ValidateUrl {
            app_name,
            url,
            target_revision,
        } => {
            let validated = core
                .validation
                .validate_custom_git_repo_url(
                    &ValidateCustomUrlRequest {
                        git_repo_url: url,
                        app_name,
                        user_id,
                        target_revision,
                    },
                    cancel,
                )
                .await?;
            ui::print_success(&format!("Repository accepted: {}", validated.repo_url));
            ui::print_info(&format!("new repository: {}", validated.is_new_repo));
        }
        RepoCommands::Commit(args) => commit(core, args, user_id, cancel).await?,
        RepoCommands::Readme { name } => {
            let result = core.git.create_readme_in_git_repo(&name, user_id, cancel).await?;
            ui::print_json(&result)?;
        }
        RepoCommands::Url { name } => {
            let url = core.git.get_repo_url_by_repo_name(&name, cancel).await;
            if url.is_empty() {
                ui::print_warning(&format!("No repository named {}", name));
            } else {
                println!("{}", url);
            }
        }
        RepoCommands::Delete { name } => {
            core.git.delete_git_repository(&name, cancel).await?;
            ui::print_success(&format!("Deleted {}", name));
        }
    }
    Ok(())
}

async fn commit(core: &GitOpsCore, args: CommitArgs, user_id: i32, cancel: &CancellationToken) -> Result<()> {
    let content = std::fs::read_to_string(&args.content)
        .with_context(|| format!("Failed to read {}", args.content.display()))?;
    let committer = core.read.committer(user_id).await;
    let chart = ChartConfig {
        chart_repo_name: args.repo_name,
        chart_location: args.location,
        file_name: args.file_name,
        file_content: content,
        release_message: args.message,
        target_revision: args.target_revision,
        user_name: committer.name,
        user_email_id: committer.email,
        use_root_path: false,
    };
    let result = core.git.commit_values(&chart, cancel).await?;
    ui::print_success(&format!("Committed {}", chart.file_path()));
    ui::print_json(&result)
}
