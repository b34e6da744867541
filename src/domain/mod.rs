//! Domain layer - pure business logic
//!
//! Types and rules with no I/O, unit tested without mocking.

pub mod branch;
pub mod chart;
pub mod deployment_config;
pub mod gitops_config;
pub mod identity;
pub mod legacy;
pub mod repo_url;
pub mod stage;

pub use chart::{ChartConfig, ChartGitAttribute, CommitResult};
pub use deployment_config::{
    ConfigType, DeploymentAppType, DeploymentConfig, ReleaseConfiguration, ReleaseMode,
    ReleaseTarget,
};
pub use gitops_config::{GitOpsConfig, GitProvider, TlsMaterial};
pub use identity::Committer;
pub use stage::{DetailedValidationResponse, Stage, StageOutcome};
