//! CLI definitions for gitops
//!
//! This module contains all CLI argument parsing structures using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "gitops",
    version,
    about = "GitOps deployment core",
    long_about = "Manages GitOps provider accounts, chart repositories and release dispatch.\nState is kept in a YAML snapshot between invocations."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (YAML)
    #[arg(long, global = true, env = "GITOPS_CONFIG")]
    pub config: Option<PathBuf>,

    /// State snapshot read before and written after every command
    #[arg(long, global = true, env = "GITOPS_STATE", default_value = "gitops-state.yaml")]
    pub state: PathBuf,

    /// Acting user id for audit fields and commit authorship
    #[arg(long, global = true, env = "GITOPS_USER_ID", default_value = "1")]
    pub user_id: i32,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// GitOps provider configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Chart repositories
    #[command(subcommand)]
    Repo(RepoCommands),

    /// Deployment configs and release dispatch
    #[command(subcommand)]
    Deployment(DeploymentCommands),

    /// Chart-store (Helm app) repositories
    #[command(subcommand)]
    HelmApp(HelmAppCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Dry-run and save a new config as the active one
    Create {
        /// Config YAML
        #[arg(long)]
        file: PathBuf,
    },

    /// Dry-run and save changes to an existing config
    Update {
        /// Config YAML; must carry the id
        #[arg(long)]
        file: PathBuf,
    },

    /// Show one config (secrets redacted)
    Get {
        #[arg(long, conflicts_with = "provider")]
        id: Option<i32>,

        /// GITHUB, GITLAB, BITBUCKET_CLOUD or AZURE_DEVOPS
        #[arg(long)]
        provider: Option<String>,
    },

    /// List every config (secrets redacted)
    List,

    /// Show the active config
    Active,

    /// Run the provider dry run without saving
    DryRun {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum RepoCommands {
    /// Create (or look up) the repository for an application
    Create {
        #[arg(long)]
        name: String,

        /// Chart template directory inside the repo
        #[arg(long, default_value = "")]
        reference_template: String,

        #[arg(long, default_value = "")]
        version: String,

        #[arg(long, env = "GITOPS_TARGET_REVISION", default_value = "")]
        target_revision: String,
    },

    /// Copy a reference chart into the repository and push it
    PushChart {
        #[arg(long)]
        name: String,

        #[arg(long)]
        reference_template: String,

        #[arg(long)]
        version: String,

        /// Local reference chart directory
        #[arg(long)]
        source_dir: PathBuf,

        #[arg(long)]
        repo_url: String,

        #[arg(long, default_value = "")]
        target_revision: String,
    },

    /// Check a user-supplied repository URL for an application
    ValidateUrl {
        #[arg(long)]
        app_name: String,

        /// Empty or `Default` selects the generated repository
        #[arg(long, default_value = "")]
        url: String,

        #[arg(long, default_value = "")]
        target_revision: String,
    },

    /// Commit one file through the provider API
    Commit(CommitArgs),

    /// Seed a README so the repository has a first commit
    Readme {
        #[arg(long)]
        name: String,
    },

    /// Print the clone URL of a repository (empty when unknown)
    Url {
        #[arg(long)]
        name: String,
    },

    /// Delete a repository at the provider
    Delete {
        #[arg(long)]
        name: String,
    },
}

#[derive(Args)]
pub struct CommitArgs {
    #[arg(long)]
    pub repo_name: String,

    /// Directory inside the repository
    #[arg(long, default_value = "")]
    pub location: String,

    #[arg(long)]
    pub file_name: String,

    /// Local file whose content is committed
    #[arg(long)]
    pub content: PathBuf,

    #[arg(long, default_value = "update values")]
    pub message: String,

    #[arg(long, default_value = "")]
    pub target_revision: String,
}

/// Selects which record a deployment command works on
#[derive(Args)]
pub struct DeploymentTarget {
    #[arg(long)]
    pub app_id: i32,

    /// Omit for the app-level record
    #[arg(long)]
    pub env_id: Option<i32>,

    /// Resolve through the chart-store installation
    #[arg(long, requires = "env_id")]
    pub helm_app: bool,
}

#[derive(Args)]
pub struct DispatchArgs {
    #[arg(long)]
    pub app_id: i32,

    #[arg(long)]
    pub env_id: i32,

    /// Target cluster
    #[arg(long)]
    pub cluster_id: i32,

    /// Resolve through the chart-store installation
    #[arg(long)]
    pub helm_app: bool,

    /// Controller objects already exist from an earlier deploy
    #[arg(long)]
    pub app_created: bool,

    /// Helm only: release name
    #[arg(long)]
    pub release_name: Option<String>,

    /// Helm only: target namespace
    #[arg(long)]
    pub namespace: Option<String>,

    /// Helm only: chart directory
    #[arg(long)]
    pub chart_dir: Option<PathBuf>,

    /// Helm only: values file
    #[arg(long)]
    pub values: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum DeploymentCommands {
    /// Show the effective deployment config
    Get(DeploymentTarget),

    /// Resolve and persist the deployment config
    Migrate(DeploymentTarget),

    /// Hand the release to its controller
    Dispatch(DispatchArgs),

    /// Remove the release's controller objects
    Delete(DispatchArgs),
}

#[derive(Subcommand)]
pub enum HelmAppCommands {
    /// Write requirements and values for a chart-store app and push them
    Push {
        #[arg(long)]
        app_name: String,

        #[arg(long)]
        env_name: String,

        #[arg(long)]
        repo_url: String,

        /// Local chart directory
        #[arg(long)]
        chart_dir: PathBuf,

        /// requirements.yaml to commit
        #[arg(long)]
        requirements: PathBuf,

        /// values.yaml to commit
        #[arg(long)]
        values: PathBuf,

        #[arg(long, default_value = "")]
        target_revision: String,
    },
}
