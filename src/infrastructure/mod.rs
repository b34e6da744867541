//! Infrastructure layer - external I/O adapters
//!
//! This module contains all code that interacts with external systems:
//! - Git hosting provider REST APIs
//! - Git working copies (CLI or libgit2)
//! - Argo CD API
//! - Kubernetes API and Flux CD objects
//! - Helm CLI

pub mod argocd;
pub mod flux;
pub mod git;
pub mod helm;
pub mod kubernetes;
pub mod providers;
pub mod workdir;

// Re-export commonly used types
pub use argocd::{ArgoCdClient, ArgoCdRestClient};
pub use git::{executor_from_settings, GitExecutor, GitOpsHelper};
pub use helm::{HelmCli, HelmClient};
pub use kubernetes::{KubeClientFactory, KubeObjects, KubeObjectsProvider, LiveKubeObjects};
pub use providers::{GitOpsClient, GitProviderFactory, ProviderRequest};
