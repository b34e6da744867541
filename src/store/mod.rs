//! Persistence boundary
//!
//! Async repository traits for every table the core reads or writes. The
//! relational backend is a collaborator; `memory::MemoryStore` implements
//! all traits in-process and backs the CLI's state file and the tests.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::deployment_config::DeploymentAppType;
use crate::domain::legacy::{
    App, ChartGroupEntry, ChartRefRow, ChartRow, Cluster, Environment, InstalledApp,
    InstalledAppVersionHistory, PipelineRow, User,
};
use crate::domain::{DeploymentConfig, GitOpsConfig, GitProvider};
use crate::error::StoreError;

pub use memory::MemoryStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// GitOps provider configurations
#[async_trait]
pub trait GitOpsConfigRepository: Send + Sync {
    async fn get_by_id(&self, id: i32) -> StoreResult<GitOpsConfig>;
    async fn get_all(&self) -> StoreResult<Vec<GitOpsConfig>>;
    async fn get_by_provider(&self, provider: GitProvider) -> StoreResult<GitOpsConfig>;
    async fn get_active(&self) -> StoreResult<Option<GitOpsConfig>>;

    /// Open a write transaction holding the logical config lock
    async fn begin(&self) -> StoreResult<Box<dyn GitOpsConfigTx>>;
}

/// Serialised write transaction over GitOps configurations.
///
/// Dropping without `commit` discards every write.
#[async_trait]
pub trait GitOpsConfigTx: Send {
    async fn get_active(&mut self) -> StoreResult<Option<GitOpsConfig>>;
    async fn get_by_id(&mut self, id: i32) -> StoreResult<GitOpsConfig>;
    /// Insert and return the record with its assigned id
    async fn save(&mut self, config: GitOpsConfig) -> StoreResult<GitOpsConfig>;
    async fn update(&mut self, config: &GitOpsConfig) -> StoreResult<()>;
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Deployment configs
#[async_trait]
pub trait DeploymentConfigRepository: Send + Sync {
    async fn get_app_level(&self, app_id: i32) -> StoreResult<Option<DeploymentConfig>>;
    async fn get_by_app_and_env(
        &self,
        app_id: i32,
        env_id: i32,
    ) -> StoreResult<Option<DeploymentConfig>>;
    /// Most recent row regardless of the active flag
    async fn get_even_if_inactive(
        &self,
        app_id: i32,
        env_id: i32,
    ) -> StoreResult<Option<DeploymentConfig>>;
    async fn get_by_app_ids(&self, app_ids: &[i32]) -> StoreResult<Vec<DeploymentConfig>>;
    /// Active app-level rows of every active application
    async fn get_all_app_level_active(&self) -> StoreResult<Vec<DeploymentConfig>>;
    async fn get_all_active(&self) -> StoreResult<Vec<DeploymentConfig>>;
    /// Rejects a second active row for the same (app, env)
    async fn save(&self, config: DeploymentConfig) -> StoreResult<DeploymentConfig>;
    async fn update(&self, config: DeploymentConfig) -> StoreResult<DeploymentConfig>;
    async fn save_all(&self, configs: Vec<DeploymentConfig>) -> StoreResult<Vec<DeploymentConfig>>;
    async fn update_all(
        &self,
        configs: Vec<DeploymentConfig>,
    ) -> StoreResult<Vec<DeploymentConfig>>;
}

/// Charts of devtron applications
#[async_trait]
pub trait ChartRepository: Send + Sync {
    async fn find_latest_for_app(&self, app_id: i32) -> StoreResult<ChartRow>;
    /// Chart pinned by an environment override, if any
    async fn find_env_override(&self, app_id: i32, env_id: i32) -> StoreResult<Option<ChartRow>>;
    async fn find_chart_ref(&self, chart_ref_id: i32) -> StoreResult<ChartRefRow>;
    async fn is_repo_registered(&self, repo_url: &str) -> StoreResult<bool>;
}

/// CD pipelines
#[async_trait]
pub trait PipelineRepository: Send + Sync {
    async fn find_active(&self, app_id: i32, env_id: i32) -> StoreResult<Vec<PipelineRow>>;
}

/// Chart-store installations
#[async_trait]
pub trait InstalledAppRepository: Send + Sync {
    async fn find_by_app_id(&self, app_id: i32) -> StoreResult<InstalledApp>;
    async fn is_repo_registered(&self, repo_url: &str) -> StoreResult<bool>;
    async fn save_version_history(
        &self,
        history: InstalledAppVersionHistory,
    ) -> StoreResult<InstalledAppVersionHistory>;
    async fn latest_version_history(
        &self,
        installed_app_version_id: i32,
    ) -> StoreResult<Option<InstalledAppVersionHistory>>;
}

#[async_trait]
pub trait AppRepository: Send + Sync {
    async fn find_by_id(&self, id: i32) -> StoreResult<App>;
}

#[async_trait]
pub trait EnvironmentRepository: Send + Sync {
    async fn find_by_id(&self, id: i32) -> StoreResult<Environment>;
}

#[async_trait]
pub trait ClusterRepository: Send + Sync {
    async fn find_all_active(&self) -> StoreResult<Vec<Cluster>>;
    async fn find_by_id(&self, id: i32) -> StoreResult<Cluster>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: i32) -> StoreResult<Option<User>>;
}

/// Chart group entries
#[async_trait]
pub trait ChartGroupEntryRepository: Send + Sync {
    async fn find_by_group(&self, chart_group_id: i32) -> StoreResult<Vec<ChartGroupEntry>>;
    /// Insert `save` and overwrite `update` atomically; returns `save ++ update`
    async fn save_and_update_in_transaction(
        &self,
        save: Vec<ChartGroupEntry>,
        update: Vec<ChartGroupEntry>,
    ) -> StoreResult<Vec<ChartGroupEntry>>;
}

/// Every repository the services depend on
#[derive(Clone)]
pub struct Repositories {
    pub gitops_configs: Arc<dyn GitOpsConfigRepository>,
    pub deployment_configs: Arc<dyn DeploymentConfigRepository>,
    pub charts: Arc<dyn ChartRepository>,
    pub pipelines: Arc<dyn PipelineRepository>,
    pub installed_apps: Arc<dyn InstalledAppRepository>,
    pub apps: Arc<dyn AppRepository>,
    pub environments: Arc<dyn EnvironmentRepository>,
    pub clusters: Arc<dyn ClusterRepository>,
    pub users: Arc<dyn UserRepository>,
    pub chart_group_entries: Arc<dyn ChartGroupEntryRepository>,
}

impl Repositories {
    /// Wire every repository to one in-memory store
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            gitops_configs: store.clone(),
            deployment_configs: store.clone(),
            charts: store.clone(),
            pipelines: store.clone(),
            installed_apps: store.clone(),
            apps: store.clone(),
            environments: store.clone(),
            clusters: store.clone(),
            users: store.clone(),
            chart_group_entries: store,
        }
    }
}

/// Deployment-app type of a chart-store app, if a config row records it
pub async fn chart_store_app_type(
    repo: &dyn DeploymentConfigRepository,
    app_id: i32,
) -> StoreResult<Option<DeploymentAppType>> {
    Ok(repo
        .get_by_app_ids(&[app_id])
        .await?
        .into_iter()
        .find(|c| c.active && !c.is_app_level())
        .and_then(|c| c.deployment_app_type))
}
