//! Services layer - orchestration logic
//!
//! This module coordinates between domain logic and infrastructure.
//! Services use infrastructure adapters to perform I/O operations.

pub mod chart_group;
pub mod deployment_config;
pub mod git_operation;
pub mod gitops_config;
pub mod gitops_config_read;
pub mod release_dispatcher;
pub mod validation;

// Re-export commonly used types
pub use chart_group::ChartGroupService;
pub use deployment_config::DeploymentConfigService;
pub use git_operation::GitOperationService;
pub use gitops_config::GitOpsConfigService;
pub use gitops_config_read::GitOpsConfigReadService;
pub use release_dispatcher::ReleaseDispatcher;
pub use validation::GitOpsValidationService;

use std::sync::Arc;

use crate::config::Settings;
use crate::error::GitOpsResult;
use crate::infrastructure::{
    executor_from_settings, ArgoCdClient, ArgoCdRestClient, GitExecutor, GitProviderFactory,
    HelmCli, HelmClient, KubeClientFactory, KubeObjectsProvider,
};
use crate::store::Repositories;

/// External systems the services talk to
pub struct Adapters {
    pub executor: Arc<dyn GitExecutor>,
    pub argocd: Arc<dyn ArgoCdClient>,
    pub kube: Arc<dyn KubeObjectsProvider>,
    pub helm: Arc<dyn HelmClient>,
}

impl Adapters {
    /// Real git, Argo CD REST, Kubernetes and helm CLI adapters
    pub fn live(settings: &Settings) -> GitOpsResult<Self> {
        Ok(Self {
            executor: executor_from_settings(&settings.git),
            argocd: Arc::new(ArgoCdRestClient::new(&settings.controller)?),
            kube: Arc::new(KubeClientFactory),
            helm: Arc::new(HelmCli::default()),
        })
    }
}

/// Every service wired over one set of repositories and adapters
pub struct GitOpsCore {
    pub settings: Settings,
    pub repos: Repositories,
    pub factory: Arc<GitProviderFactory>,
    pub read: Arc<GitOpsConfigReadService>,
    pub deployment_configs: Arc<DeploymentConfigService>,
    pub git: Arc<GitOperationService>,
    pub validation: Arc<GitOpsValidationService>,
    pub gitops_configs: Arc<GitOpsConfigService>,
    pub dispatcher: Arc<ReleaseDispatcher>,
    pub chart_groups: Arc<ChartGroupService>,
}

impl GitOpsCore {
    pub async fn new(settings: Settings, repos: Repositories, adapters: Adapters) -> GitOpsResult<Self> {
        let factory = Arc::new(
            GitProviderFactory::new(settings.clone(), adapters.executor, repos.gitops_configs.clone()).await?,
        );
        Ok(Self::wire(settings, repos, factory, adapters.argocd, adapters.kube, adapters.helm))
    }

    fn wire(
        settings: Settings,
        repos: Repositories,
        factory: Arc<GitProviderFactory>,
        argocd: Arc<dyn ArgoCdClient>,
        kube: Arc<dyn KubeObjectsProvider>,
        helm: Arc<dyn HelmClient>,
    ) -> Self {
        let read = Arc::new(GitOpsConfigReadService::new(
            repos.gitops_configs.clone(),
            repos.users.clone(),
            settings.git.clone(),
        ));
        let deployment_configs = Arc::new(DeploymentConfigService::new(
            repos.clone(),
            settings.deployment.clone(),
            settings.git.default_target_revision.clone(),
        ));
        let git = Arc::new(GitOperationService::new(
            factory.clone(),
            read.clone(),
            settings.git.clone(),
        ));
        let validation = Arc::new(GitOpsValidationService::new(
            factory.clone(),
            read.clone(),
            git.clone(),
            repos.charts.clone(),
            repos.installed_apps.clone(),
        ));
        let gitops_configs = Arc::new(GitOpsConfigService::new(
            repos.gitops_configs.clone(),
            repos.clusters.clone(),
            factory.clone(),
            validation.clone(),
            argocd.clone(),
            kube.clone(),
            settings.controller.clone(),
        ));
        let dispatcher = Arc::new(ReleaseDispatcher::new(
            repos.gitops_configs.clone(),
            argocd,
            kube,
            helm,
            settings.controller.clone(),
        ));
        let chart_groups = Arc::new(ChartGroupService::new(repos.chart_group_entries.clone()));

        Self {
            settings,
            repos,
            factory,
            read,
            deployment_configs,
            git,
            validation,
            gitops_configs,
            dispatcher,
            chart_groups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeArgoCd, FakeHelm, FakeKubeObjects, FakeKubeProvider, Harness};

    #[tokio::test]
    async fn test_wiring_shares_the_active_config() {
        let h = Harness::github().await;
        let core = GitOpsCore::wire(
            h.settings.clone(),
            h.repositories(),
            h.factory.clone(),
            Arc::new(FakeArgoCd::default()),
            Arc::new(FakeKubeProvider::new(Arc::new(FakeKubeObjects::default()))),
            Arc::new(FakeHelm::default()),
        );

        assert!(core.read.is_gitops_configured().await.unwrap());
        let active = core.gitops_configs.get_gitops_config_active().await.unwrap().unwrap();
        assert_eq!(active.id, 1);
        assert!(active.token.is_empty());
        assert_eq!(
            core.git.get_repo_url_by_repo_name("missing", &tokio_util::sync::CancellationToken::new()).await,
            ""
        );
    }
}
