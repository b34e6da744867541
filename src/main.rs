use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod cli;
mod commands;
mod ui;

use cli::{Cli, Commands};
use gitops_core::services::Adapters;
use gitops_core::store::{MemoryStore, Repositories};
use gitops_core::{GitOpsCore, GitOpsError, Settings};

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let store = Arc::new(MemoryStore::load(&cli.state).await?);
    let repos = Repositories::from_memory(store.clone());
    let adapters = Adapters::live(&settings)?;
    let core = GitOpsCore::new(settings, repos, adapters).await?;

    let result = match cli.command {
        Commands::Config(command) => commands::config::execute(&core, command, cli.user_id, &cancel).await,
        Commands::Repo(command) => commands::repo::execute(&core, command, cli.user_id, &cancel).await,
        Commands::Deployment(command) => commands::deployment::execute(&core, command, &cancel).await,
        Commands::HelmApp(command) => commands::helm_app::execute(&core, command, cli.user_id, &cancel).await,
    };

    // Partial writes (migrated configs, deactivated records) are kept even on failure
    store.persist(&cli.state).await?;
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .init();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight operations");
            on_signal.cancel();
        }
    });

    if let Err(err) = run(cli, cancel).await {
        if let Some(gitops) = err.downcast_ref::<GitOpsError>() {
            ui::print_error(&format!("{} ({})", gitops.user_message(), gitops.http_status()));
            tracing::debug!("{}", gitops.internal_message());
            std::process::exit(1);
        }
        return Err(err);
    }
    Ok(())
}
