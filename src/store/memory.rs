//! In-process store implementing every repository trait
//!
//! State is held behind an async `RwLock`; GitOps config writes go through a
//! transaction that works on a private copy under a dedicated mutex and
//! publishes on commit. The whole state round-trips through YAML so the CLI
//! can persist it between invocations.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use super::*;
use crate::error::StoreError;

/// Chart pinned by an environment override
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvChartOverride {
    pub app_id: i32,
    pub env_id: i32,
    pub chart: ChartRow,
}

/// Serializable contents of the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub gitops_configs: Vec<GitOpsConfig>,
    #[serde(default)]
    pub deployment_configs: Vec<DeploymentConfig>,
    #[serde(default)]
    pub charts: Vec<ChartRow>,
    #[serde(default)]
    pub env_chart_overrides: Vec<EnvChartOverride>,
    #[serde(default)]
    pub chart_refs: Vec<ChartRefRow>,
    #[serde(default)]
    pub pipelines: Vec<PipelineRow>,
    #[serde(default)]
    pub installed_apps: Vec<InstalledApp>,
    #[serde(default)]
    pub installed_app_version_history: Vec<InstalledAppVersionHistory>,
    #[serde(default)]
    pub apps: Vec<App>,
    #[serde(default)]
    pub environments: Vec<Environment>,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub chart_group_entries: Vec<ChartGroupEntry>,
}

/// In-memory implementation of all repositories
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    config_lock: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: StoreState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            config_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Load a YAML snapshot; a missing file yields an empty store
    pub async fn load(path: &Path) -> StoreResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let state: StoreState = serde_yaml::from_str(&content)
                    .map_err(|e| StoreError::Backend(format!("{}: {}", path.display(), e)))?;
                debug!("Loaded store snapshot from {}", path.display());
                Ok(Self::with_state(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(StoreError::Backend(format!("{}: {}", path.display(), e))),
        }
    }

    /// Write the committed state as a YAML snapshot
    pub async fn persist(&self, path: &Path) -> StoreResult<()> {
        let content = {
            let state = self.state.read().await;
            serde_yaml::to_string(&*state).map_err(|e| StoreError::Backend(e.to_string()))?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| StoreError::Backend(format!("{}: {}", path.display(), e)))
    }

    /// Copy of the committed state
    pub async fn snapshot(&self) -> StoreState {
        self.state.read().await.clone()
    }

    /// Apply a mutation to the committed state (seeding collaborator rows)
    pub async fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut StoreState),
    {
        let mut state = self.state.write().await;
        f(&mut state);
    }
}

fn not_found(entity: &'static str, key: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        key: key.to_string(),
    }
}

fn next_id<T>(rows: &[T], id: impl Fn(&T) -> i32) -> i32 {
    rows.iter().map(id).max().unwrap_or(0) + 1
}

// ============================================================================
// GitOps configs
// ============================================================================

struct MemoryGitOpsTx {
    _guard: OwnedMutexGuard<()>,
    working: Vec<GitOpsConfig>,
    state: Arc<RwLock<StoreState>>,
}

#[async_trait]
impl GitOpsConfigTx for MemoryGitOpsTx {
    async fn get_active(&mut self) -> StoreResult<Option<GitOpsConfig>> {
        Ok(self.working.iter().find(|c| c.active).cloned())
    }

    async fn get_by_id(&mut self, id: i32) -> StoreResult<GitOpsConfig> {
        self.working
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| not_found("gitops config", id))
    }

    async fn save(&mut self, mut config: GitOpsConfig) -> StoreResult<GitOpsConfig> {
        config.id = next_id(&self.working, |c| c.id);
        self.working.push(config.clone());
        Ok(config)
    }

    async fn update(&mut self, config: &GitOpsConfig) -> StoreResult<()> {
        let slot = self
            .working
            .iter_mut()
            .find(|c| c.id == config.id)
            .ok_or_else(|| not_found("gitops config", config.id))?;
        *slot = config.clone();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let active = self.working.iter().filter(|c| c.active).count();
        if active > 1 {
            return Err(StoreError::Conflict {
                entity: "gitops config",
                message: format!("{} active configs at commit", active),
            });
        }
        let mut state = self.state.write().await;
        state.gitops_configs = self.working;
        Ok(())
    }
}

#[async_trait]
impl GitOpsConfigRepository for MemoryStore {
    async fn get_by_id(&self, id: i32) -> StoreResult<GitOpsConfig> {
        let state = self.state.read().await;
        state
            .gitops_configs
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| not_found("gitops config", id))
    }

    async fn get_all(&self) -> StoreResult<Vec<GitOpsConfig>> {
        Ok(self.state.read().await.gitops_configs.clone())
    }

    async fn get_by_provider(&self, provider: GitProvider) -> StoreResult<GitOpsConfig> {
        let state = self.state.read().await;
        state
            .gitops_configs
            .iter()
            .find(|c| c.provider == Some(provider))
            .cloned()
            .ok_or_else(|| not_found("gitops config", provider))
    }

    async fn get_active(&self) -> StoreResult<Option<GitOpsConfig>> {
        let state = self.state.read().await;
        Ok(state.gitops_configs.iter().find(|c| c.active).cloned())
    }

    async fn begin(&self) -> StoreResult<Box<dyn GitOpsConfigTx>> {
        let guard = self.config_lock.clone().lock_owned().await;
        let working = self.state.read().await.gitops_configs.clone();
        Ok(Box::new(MemoryGitOpsTx {
            _guard: guard,
            working,
            state: self.state.clone(),
        }))
    }
}

// ============================================================================
// Deployment configs
// ============================================================================

fn insert_deployment_config(
    state: &mut StoreState,
    mut config: DeploymentConfig,
) -> StoreResult<DeploymentConfig> {
    if config.active
        && state.deployment_configs.iter().any(|c| {
            c.active && c.app_id == config.app_id && c.environment_id == config.environment_id
        })
    {
        return Err(StoreError::Conflict {
            entity: "deployment config",
            message: format!(
                "active config already exists for app {} env {}",
                config.app_id, config.environment_id
            ),
        });
    }
    config.id = next_id(&state.deployment_configs, |c| c.id);
    state.deployment_configs.push(config.clone());
    Ok(config)
}

fn replace_deployment_config(
    state: &mut StoreState,
    config: DeploymentConfig,
) -> StoreResult<DeploymentConfig> {
    if config.active
        && state.deployment_configs.iter().any(|c| {
            c.id != config.id
                && c.active
                && c.app_id == config.app_id
                && c.environment_id == config.environment_id
        })
    {
        return Err(StoreError::Conflict {
            entity: "deployment config",
            message: format!(
                "another active config exists for app {} env {}",
                config.app_id, config.environment_id
            ),
        });
    }
    let slot = state
        .deployment_configs
        .iter_mut()
        .find(|c| c.id == config.id)
        .ok_or_else(|| not_found("deployment config", config.id))?;
    *slot = config.clone();
    Ok(config)
}

#[async_trait]
impl DeploymentConfigRepository for MemoryStore {
    async fn get_app_level(&self, app_id: i32) -> StoreResult<Option<DeploymentConfig>> {
        self.get_by_app_and_env(app_id, 0).await
    }

    async fn get_by_app_and_env(
        &self,
        app_id: i32,
        env_id: i32,
    ) -> StoreResult<Option<DeploymentConfig>> {
        let state = self.state.read().await;
        Ok(state
            .deployment_configs
            .iter()
            .find(|c| c.active && c.app_id == app_id && c.environment_id == env_id)
            .cloned())
    }

    async fn get_even_if_inactive(
        &self,
        app_id: i32,
        env_id: i32,
    ) -> StoreResult<Option<DeploymentConfig>> {
        let state = self.state.read().await;
        Ok(state
            .deployment_configs
            .iter()
            .filter(|c| c.app_id == app_id && c.environment_id == env_id)
            .max_by_key(|c| c.id)
            .cloned())
    }

    async fn get_by_app_ids(&self, app_ids: &[i32]) -> StoreResult<Vec<DeploymentConfig>> {
        let state = self.state.read().await;
        Ok(state
            .deployment_configs
            .iter()
            .filter(|c| c.active && app_ids.contains(&c.app_id))
            .cloned()
            .collect())
    }

    async fn get_all_app_level_active(&self) -> StoreResult<Vec<DeploymentConfig>> {
        let state = self.state.read().await;
        Ok(state
            .deployment_configs
            .iter()
            .filter(|c| {
                c.active && c.is_app_level() && state.apps.iter().any(|a| a.id == c.app_id)
            })
            .cloned()
            .collect())
    }

    async fn get_all_active(&self) -> StoreResult<Vec<DeploymentConfig>> {
        let state = self.state.read().await;
        Ok(state
            .deployment_configs
            .iter()
            .filter(|c| c.active)
            .cloned()
            .collect())
    }

    async fn save(&self, config: DeploymentConfig) -> StoreResult<DeploymentConfig> {
        let mut state = self.state.write().await;
        insert_deployment_config(&mut state, config)
    }

    async fn update(&self, config: DeploymentConfig) -> StoreResult<DeploymentConfig> {
        let mut state = self.state.write().await;
        replace_deployment_config(&mut state, config)
    }

    async fn save_all(&self, configs: Vec<DeploymentConfig>) -> StoreResult<Vec<DeploymentConfig>> {
        let mut state = self.state.write().await;
        let mut working = state.clone();
        let saved = configs
            .into_iter()
            .map(|c| insert_deployment_config(&mut working, c))
            .collect::<StoreResult<Vec<_>>>()?;
        *state = working;
        Ok(saved)
    }

    async fn update_all(
        &self,
        configs: Vec<DeploymentConfig>,
    ) -> StoreResult<Vec<DeploymentConfig>> {
        let mut state = self.state.write().await;
        let mut working = state.clone();
        let updated = configs
            .into_iter()
            .map(|c| replace_deployment_config(&mut working, c))
            .collect::<StoreResult<Vec<_>>>()?;
        *state = working;
        Ok(updated)
    }
}

// ============================================================================
// Collaborator tables
// ============================================================================

#[async_trait]
impl ChartRepository for MemoryStore {
    async fn find_latest_for_app(&self, app_id: i32) -> StoreResult<ChartRow> {
        let state = self.state.read().await;
        state
            .charts
            .iter()
            .filter(|c| c.app_id == app_id)
            .max_by_key(|c| c.id)
            .cloned()
            .ok_or_else(|| not_found("chart", app_id))
    }

    async fn find_env_override(&self, app_id: i32, env_id: i32) -> StoreResult<Option<ChartRow>> {
        let state = self.state.read().await;
        Ok(state
            .env_chart_overrides
            .iter()
            .find(|o| o.app_id == app_id && o.env_id == env_id)
            .map(|o| o.chart.clone()))
    }

    async fn find_chart_ref(&self, chart_ref_id: i32) -> StoreResult<ChartRefRow> {
        let state = self.state.read().await;
        state
            .chart_refs
            .iter()
            .find(|r| r.id == chart_ref_id)
            .cloned()
            .ok_or_else(|| not_found("chart ref", chart_ref_id))
    }

    async fn is_repo_registered(&self, repo_url: &str) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state.charts.iter().any(|c| c.git_repo_url == repo_url)
            || state
                .deployment_configs
                .iter()
                .any(|c| c.active && c.repo_url == repo_url))
    }
}

#[async_trait]
impl PipelineRepository for MemoryStore {
    async fn find_active(&self, app_id: i32, env_id: i32) -> StoreResult<Vec<PipelineRow>> {
        let state = self.state.read().await;
        Ok(state
            .pipelines
            .iter()
            .filter(|p| p.active && p.app_id == app_id && p.environment_id == env_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InstalledAppRepository for MemoryStore {
    async fn find_by_app_id(&self, app_id: i32) -> StoreResult<InstalledApp> {
        let state = self.state.read().await;
        state
            .installed_apps
            .iter()
            .find(|i| i.active && i.app_id == app_id)
            .cloned()
            .ok_or_else(|| not_found("installed app", app_id))
    }

    async fn is_repo_registered(&self, repo_url: &str) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .installed_apps
            .iter()
            .any(|i| i.active && i.git_ops_repo_url == repo_url))
    }

    async fn save_version_history(
        &self,
        mut history: InstalledAppVersionHistory,
    ) -> StoreResult<InstalledAppVersionHistory> {
        let mut state = self.state.write().await;
        history.id = next_id(&state.installed_app_version_history, |h| h.id);
        if history.created_on.is_none() {
            history.created_on = Some(Utc::now());
        }
        state.installed_app_version_history.push(history.clone());
        Ok(history)
    }

    async fn latest_version_history(
        &self,
        installed_app_version_id: i32,
    ) -> StoreResult<Option<InstalledAppVersionHistory>> {
        let state = self.state.read().await;
        Ok(state
            .installed_app_version_history
            .iter()
            .filter(|h| h.installed_app_version_id == installed_app_version_id)
            .max_by_key(|h| h.id)
            .cloned())
    }
}

#[async_trait]
impl AppRepository for MemoryStore {
    async fn find_by_id(&self, id: i32) -> StoreResult<App> {
        let state = self.state.read().await;
        state
            .apps
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| not_found("app", id))
    }
}

#[async_trait]
impl EnvironmentRepository for MemoryStore {
    async fn find_by_id(&self, id: i32) -> StoreResult<Environment> {
        let state = self.state.read().await;
        state
            .environments
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| not_found("environment", id))
    }
}

#[async_trait]
impl ClusterRepository for MemoryStore {
    async fn find_all_active(&self) -> StoreResult<Vec<Cluster>> {
        let state = self.state.read().await;
        Ok(state.clusters.iter().filter(|c| c.active).cloned().collect())
    }

    async fn find_by_id(&self, id: i32) -> StoreResult<Cluster> {
        let state = self.state.read().await;
        state
            .clusters
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| not_found("cluster", id))
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, id: i32) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }
}

#[async_trait]
impl ChartGroupEntryRepository for MemoryStore {
    async fn find_by_group(&self, chart_group_id: i32) -> StoreResult<Vec<ChartGroupEntry>> {
        let state = self.state.read().await;
        Ok(state
            .chart_group_entries
            .iter()
            .filter(|e| e.chart_group_id == chart_group_id && !e.deleted)
            .cloned()
            .collect())
    }

    async fn save_and_update_in_transaction(
        &self,
        save: Vec<ChartGroupEntry>,
        update: Vec<ChartGroupEntry>,
    ) -> StoreResult<Vec<ChartGroupEntry>> {
        let mut state = self.state.write().await;
        let mut entries = state.chart_group_entries.clone();

        let mut saved = Vec::with_capacity(save.len());
        for mut entry in save {
            entry.id = next_id(&entries, |e| e.id);
            entries.push(entry.clone());
            saved.push(entry);
        }
        for entry in &update {
            let slot = entries
                .iter_mut()
                .find(|e| e.id == entry.id)
                .ok_or_else(|| not_found("chart group entry", entry.id))?;
            *slot = entry.clone();
        }

        state.chart_group_entries = entries;
        saved.extend(update);
        Ok(saved)
    }
}
