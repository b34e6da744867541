//! Deployment config reads, legacy synthesis and writes
//!
//! Applications created before deployment configs existed only have chart,
//! pipeline and installed-app rows. The getters synthesise a config from
//! those rows when none is stored; the `get_and_migrate_*` twins also
//! persist what they synthesised.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::DeploymentSettings;
use crate::domain::deployment_config::{
    deployed_app_name, is_repo_not_configured, join_path, values_file_for_env, ApplicationMetadata,
    ApplicationSource, ApplicationSpec, ArgoCdSpec, ConfigType, DeploymentAppType, DeploymentConfig,
    Destination, ReleaseConfiguration, ReleaseMode, ReleaseTarget, DEFAULT_ARGO_NAMESPACE,
    DEFAULT_CLUSTER_ID, DEFAULT_CLUSTER_URL, SYSTEM_USER_ID,
};
use crate::domain::repo_url::{git_host_url_by_provider, url_has_prefix};
use crate::error::{GitOpsError, GitOpsResult, StoreError};
use crate::store::{chart_store_app_type, Repositories};

/// Credential kind recorded when the repo is reached with a GitOps config
pub const CREDENTIAL_TYPE_GITOPS: &str = "gitops";

const CHART_VALUES_FILE: &str = "values.yaml";

pub struct DeploymentConfigService {
    repos: Repositories,
    settings: DeploymentSettings,
    default_target_revision: String,
}

fn not_found(entity: &'static str, key: String) -> GitOpsError {
    StoreError::NotFound { entity, key }.into()
}

impl DeploymentConfigService {
    pub fn new(repos: Repositories, settings: DeploymentSettings, default_target_revision: String) -> Self {
        Self {
            repos,
            settings,
            default_target_revision,
        }
    }

    /// Insert or update the active row for the config's (app, env)
    ///
    /// The release view is regenerated from the entity first. An existing
    /// row keeps its id and creation audit.
    pub async fn create_or_update_config(
        &self,
        mut config: DeploymentConfig,
        user_id: i32,
    ) -> GitOpsResult<DeploymentConfig> {
        config.sync_release_configuration();
        let now = Some(Utc::now());
        let existing = self
            .repos
            .deployment_configs
            .get_by_app_and_env(config.app_id, config.environment_id)
            .await?;

        let saved = match existing {
            Some(existing) => {
                config.id = existing.id;
                config.created_on = existing.created_on;
                config.created_by = existing.created_by;
                config.updated_on = now;
                config.updated_by = user_id;
                self.repos.deployment_configs.update(config).await?
            }
            None => {
                config.id = 0;
                config.created_on = now;
                config.created_by = user_id;
                config.updated_on = now;
                config.updated_by = user_id;
                match self.repos.deployment_configs.save(config.clone()).await {
                    Ok(saved) => saved,
                    // A concurrent writer inserted the row first; update theirs
                    Err(StoreError::Conflict { .. }) => {
                        let winner = self
                            .repos
                            .deployment_configs
                            .get_by_app_and_env(config.app_id, config.environment_id)
                            .await?
                            .ok_or_else(|| {
                                not_found(
                                    "deployment config",
                                    format!("app {} env {}", config.app_id, config.environment_id),
                                )
                            })?;
                        debug!(app_id = config.app_id, env_id = config.environment_id, "Lost insert race, updating");
                        config.id = winner.id;
                        config.created_on = winner.created_on;
                        config.created_by = winner.created_by;
                        self.repos.deployment_configs.update(config).await?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };
        debug!(
            app_id = saved.app_id,
            env_id = saved.environment_id,
            id = saved.id,
            "Stored deployment config"
        );
        Ok(saved)
    }

    pub async fn create_or_update_config_in_bulk(
        &self,
        to_create: Vec<DeploymentConfig>,
        to_update: Vec<DeploymentConfig>,
        user_id: i32,
    ) -> GitOpsResult<()> {
        let now = Some(Utc::now());
        let to_create: Vec<DeploymentConfig> = to_create
            .into_iter()
            .map(|mut c| {
                c.sync_release_configuration();
                c.created_on = now;
                c.created_by = user_id;
                c.updated_on = now;
                c.updated_by = user_id;
                c
            })
            .collect();
        let to_update: Vec<DeploymentConfig> = to_update
            .into_iter()
            .map(|mut c| {
                c.sync_release_configuration();
                c.updated_on = now;
                c.updated_by = user_id;
                c
            })
            .collect();

        if !to_create.is_empty() {
            self.repos.deployment_configs.save_all(to_create).await?;
        }
        if !to_update.is_empty() {
            self.repos.deployment_configs.update_all(to_update).await?;
        }
        Ok(())
    }

    pub async fn get_config_for_app(&self, app_id: i32) -> GitOpsResult<DeploymentConfig> {
        Ok(self.app_level(app_id).await?.0)
    }

    pub async fn get_and_migrate_config_for_app(&self, app_id: i32) -> GitOpsResult<DeploymentConfig> {
        let (config, needs_migration) = self.app_level(app_id).await?;
        self.migrate_if_needed(config, needs_migration).await
    }

    pub async fn get_config_for_app_and_env(&self, app_id: i32, env_id: i32) -> GitOpsResult<DeploymentConfig> {
        let (app_level, _) = self.app_level(app_id).await?;
        Ok(self.env_level(&app_level, app_id, env_id).await?.0)
    }

    /// Like `get_config_for_app_and_env`; the app-level and env-level
    /// records are persisted independently when synthesised
    pub async fn get_and_migrate_config_for_app_and_env(
        &self,
        app_id: i32,
        env_id: i32,
    ) -> GitOpsResult<DeploymentConfig> {
        let (app_level, needs_migration) = self.app_level(app_id).await?;
        let app_level = self.migrate_if_needed(app_level, needs_migration).await?;
        let (config, needs_migration) = self.env_level(&app_level, app_id, env_id).await?;
        self.migrate_if_needed(config, needs_migration).await
    }

    pub async fn get_config_for_helm_app(&self, app_id: i32, env_id: i32) -> GitOpsResult<DeploymentConfig> {
        Ok(self.helm_app(app_id, env_id).await?.0)
    }

    pub async fn get_and_migrate_config_for_helm_app(
        &self,
        app_id: i32,
        env_id: i32,
    ) -> GitOpsResult<DeploymentConfig> {
        let (config, needs_migration) = self.helm_app(app_id, env_id).await?;
        self.migrate_if_needed(config, needs_migration).await
    }

    /// Latest row for (app, env), active or not
    pub async fn get_config_even_if_inactive(&self, app_id: i32, env_id: i32) -> GitOpsResult<DeploymentConfig> {
        self.repos
            .deployment_configs
            .get_even_if_inactive(app_id, env_id)
            .await?
            .ok_or_else(|| not_found("deployment config", format!("app {} env {}", app_id, env_id)))
    }

    pub async fn update_repo_url_for_app_and_env(&self, repo_url: &str, app_id: i32, env_id: i32) -> GitOpsResult<()> {
        let mut config = self
            .repos
            .deployment_configs
            .get_by_app_and_env(app_id, env_id)
            .await?
            .ok_or_else(|| not_found("deployment config", format!("app {} env {}", app_id, env_id)))?;
        config.set_repo_url(repo_url);
        self.repos.deployment_configs.update(config).await?;
        info!(app_id, env_id, repo_url, "Updated deployment repository");
        Ok(())
    }

    pub async fn get_configs_by_app_ids(&self, app_ids: &[i32]) -> GitOpsResult<Vec<DeploymentConfig>> {
        if app_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.repos.deployment_configs.get_by_app_ids(app_ids).await?)
    }

    /// Whether any active application or chart-store install uses `repo_url`
    pub async fn check_if_url_already_present(&self, repo_url: &str) -> GitOpsResult<bool> {
        let in_apps = self
            .repos
            .deployment_configs
            .get_all_app_level_active()
            .await?
            .iter()
            .any(|c| c.repo_url == repo_url);
        if in_apps {
            warn!(repo_url, "Repository already used by an application");
            return Ok(true);
        }
        Ok(self.repos.installed_apps.is_repo_registered(repo_url).await?)
    }

    pub async fn is_chart_store_app_managed_by_argo_cd(&self, app_id: i32) -> GitOpsResult<bool> {
        let app_type = match chart_store_app_type(self.repos.deployment_configs.as_ref(), app_id).await? {
            Some(t) => Some(t),
            None => self.repos.installed_apps.find_by_app_id(app_id).await?.deployment_app_type,
        };
        Ok(app_type == Some(DeploymentAppType::ArgoCd))
    }

    /// Point a GitOps deployment at a new reference chart version
    ///
    /// No-op without an active pipeline, for linked releases and for Helm
    /// deployments.
    pub async fn update_chart_location(
        &self,
        app_id: i32,
        env_id: i32,
        chart_ref_id: i32,
        chart_version: &str,
        user_id: i32,
    ) -> GitOpsResult<()> {
        if self.repos.pipelines.find_active(app_id, env_id).await?.is_empty() {
            return Ok(());
        }
        let mut config = self.get_config_for_app_and_env(app_id, env_id).await?;
        if config.release_mode != ReleaseMode::Create || !(config.is_argo() || config.is_flux()) {
            return Ok(());
        }
        let chart_ref = self.repos.charts.find_chart_ref(chart_ref_id).await?;
        config.set_chart_location(join_path(&chart_ref.location, chart_version));
        self.create_or_update_config(config, user_id).await?;
        Ok(())
    }

    async fn migrate_if_needed(
        &self,
        config: DeploymentConfig,
        needs_migration: bool,
    ) -> GitOpsResult<DeploymentConfig> {
        if !(needs_migration && self.settings.migrate_deployment_config_data) {
            return Ok(config);
        }
        info!(
            app_id = config.app_id,
            env_id = config.environment_id,
            "Migrating deployment config"
        );
        self.create_or_update_config(config, SYSTEM_USER_ID).await
    }

    /// App-level record and whether it had to be synthesised or repaired
    async fn app_level(&self, app_id: i32) -> GitOpsResult<(DeploymentConfig, bool)> {
        match self.repos.deployment_configs.get_app_level(app_id).await? {
            None => {
                let chart = self.repos.charts.find_latest_for_app(app_id).await?;
                let chart_location = join_path(&chart.reference_template, &chart.chart_version);
                let config = DeploymentConfig {
                    app_id,
                    config_type: ConfigType::from_custom_flag(chart.is_custom_git_repository),
                    repo_url: chart.git_repo_url.clone(),
                    chart_location: chart_location.clone(),
                    release_configuration: Some(ReleaseConfiguration::app_level_from_chart(
                        &chart.git_repo_url,
                        &chart_location,
                    )),
                    active: true,
                    ..Default::default()
                };
                Ok((config, true))
            }
            Some(mut config) => {
                if !config.needs_release_configuration() {
                    return Ok((config, false));
                }
                config.backfill_from_release_configuration();
                let chart = self.repos.charts.find_latest_for_app(app_id).await?;
                let repo_url = if config.repo_url.is_empty() {
                    chart.git_repo_url.clone()
                } else {
                    config.repo_url.clone()
                };
                let chart_location = join_path(&chart.reference_template, &chart.chart_version);
                config.release_configuration =
                    Some(ReleaseConfiguration::app_level_from_chart(&repo_url, &chart_location));
                Ok((config, true))
            }
        }
    }

    /// Env-level record and whether it had to be synthesised or repaired
    async fn env_level(
        &self,
        app_level: &DeploymentConfig,
        app_id: i32,
        env_id: i32,
    ) -> GitOpsResult<(DeploymentConfig, bool)> {
        let (mut config, mut needs_migration) =
            match self.repos.deployment_configs.get_by_app_and_env(app_id, env_id).await? {
                None => {
                    let mut config = DeploymentConfig {
                        app_id,
                        environment_id: env_id,
                        config_type: app_level.config_type,
                        release_mode: ReleaseMode::Create,
                        repo_url: app_level.repo_url.clone(),
                        chart_location: app_level.chart_location.clone(),
                        active: true,
                        ..Default::default()
                    };
                    config.deployment_app_type = Some(self.pipeline_app_type(app_id, env_id).await?);
                    config.release_configuration = self.env_release_configuration(&mut config).await?;
                    config.backfill_from_release_configuration();
                    (config, true)
                }
                Some(mut config) if config.needs_release_configuration() => {
                    config.backfill_from_release_configuration();
                    config.release_configuration = self.env_release_configuration(&mut config).await?;
                    (config, true)
                }
                Some(config) => (config, false),
            };

        if is_repo_not_configured(&config.repo_url) && app_level.is_repo_configured() {
            debug!(app_id, env_id, "Inheriting repository from app-level config");
            config.set_repo_url(app_level.repo_url.clone());
            needs_migration = true;
        }
        Ok((config, needs_migration))
    }

    async fn pipeline_app_type(&self, app_id: i32, env_id: i32) -> GitOpsResult<DeploymentAppType> {
        let pipelines = self.repos.pipelines.find_active(app_id, env_id).await?;
        if pipelines.len() > 1 {
            return Err(GitOpsError::Fatal(
                "multiple pipelines found for app and env".to_string(),
            ));
        }
        pipelines
            .first()
            .and_then(|p| p.deployment_app_type)
            .ok_or_else(|| not_found("pipeline", format!("app {} env {}", app_id, env_id)))
    }

    /// Release view for an env-level record; Argo also gets its credential
    async fn env_release_configuration(
        &self,
        config: &mut DeploymentConfig,
    ) -> GitOpsResult<Option<ReleaseConfiguration>> {
        match config.deployment_app_type {
            Some(DeploymentAppType::ArgoCd) => {}
            Some(DeploymentAppType::Helm) => return Ok(Some(ReleaseConfiguration::new(ReleaseTarget::Helm))),
            _ => return Ok(None),
        }
        let (app_id, env_id) = (config.app_id, config.environment_id);

        let chart = match self.repos.charts.find_env_override(app_id, env_id).await? {
            Some(chart) => chart,
            None => self.repos.charts.find_latest_for_app(app_id).await?,
        };
        let repo_url = if config.repo_url.is_empty() {
            chart.git_repo_url.clone()
        } else {
            config.repo_url.clone()
        };
        let chart_location = if chart.chart_location.is_empty() {
            config.chart_location.clone()
        } else {
            chart.chart_location.clone()
        };

        let pipelines = self.repos.pipelines.find_active(app_id, env_id).await?;
        let environment = self.repos.environments.find_by_id(env_id).await?;
        let (app_name, namespace) = match pipelines.first() {
            Some(p) if !p.deployment_app_name.is_empty() => {
                let ns = if p.namespace.is_empty() {
                    environment.namespace.clone()
                } else {
                    p.namespace.clone()
                };
                (p.deployment_app_name.clone(), ns)
            }
            _ => {
                let app = self.repos.apps.find_by_id(app_id).await?;
                (
                    deployed_app_name(&app.name, &environment.name),
                    environment.namespace.clone(),
                )
            }
        };

        if let Some(id) = self.credential_for(&repo_url).await? {
            config.credential_type = CREDENTIAL_TYPE_GITOPS.to_string();
            config.credential_id_int = id;
        }

        Ok(Some(ReleaseConfiguration::new(ReleaseTarget::ArgoCd(ArgoCdSpec {
            metadata: ApplicationMetadata {
                name: app_name,
                cluster_id: DEFAULT_CLUSTER_ID,
                namespace: DEFAULT_ARGO_NAMESPACE.to_string(),
            },
            spec: ApplicationSpec {
                source: ApplicationSource {
                    repo_url,
                    path: chart_location,
                    target_revision: self.default_target_revision.clone(),
                    value_files: vec![values_file_for_env(env_id)],
                },
                destination: Destination {
                    namespace,
                    server: DEFAULT_CLUSTER_URL.to_string(),
                },
            },
        }))))
    }

    /// Id of the GitOps config whose credential host covers `repo_url`
    async fn credential_for(&self, repo_url: &str) -> GitOpsResult<Option<i32>> {
        if repo_url.is_empty() {
            return Ok(None);
        }
        for config in self.repos.gitops_configs.get_all().await? {
            let Some(provider) = config.provider else {
                continue;
            };
            let host = git_host_url_by_provider(
                provider,
                &config.host,
                &config.github_org_id,
                &config.gitlab_group_id,
                &config.bitbucket_workspace_id,
            );
            match host {
                Ok(host) if url_has_prefix(repo_url, &host) => return Ok(Some(config.id)),
                Ok(_) => {}
                Err(e) => debug!(config_id = config.id, "Skipping config with invalid host: {}", e),
            }
        }
        Ok(None)
    }

    /// Chart-store app record and whether it had to be synthesised
    async fn helm_app(&self, app_id: i32, env_id: i32) -> GitOpsResult<(DeploymentConfig, bool)> {
        match self.repos.deployment_configs.get_by_app_and_env(app_id, env_id).await? {
            Some(config) if !config.needs_release_configuration() => Ok((config, false)),
            Some(mut config) => {
                config.backfill_from_release_configuration();
                config.release_configuration = self.helm_release_configuration(&config).await?;
                Ok((config, true))
            }
            None => {
                let installed = self.repos.installed_apps.find_by_app_id(app_id).await?;
                if installed.environment_id != env_id {
                    return Err(not_found("installed app", format!("app {} env {}", app_id, env_id)));
                }
                let mut config = DeploymentConfig {
                    app_id,
                    environment_id: env_id,
                    deployment_app_type: installed.deployment_app_type,
                    config_type: ConfigType::from_custom_flag(installed.is_custom_repository),
                    repo_url: installed.git_ops_repo_url.clone(),
                    repo_name: installed.git_ops_repo_name.clone(),
                    active: true,
                    ..Default::default()
                };
                config.release_configuration = self.helm_release_configuration(&config).await?;
                config.backfill_from_release_configuration();
                Ok((config, true))
            }
        }
    }

    async fn helm_release_configuration(
        &self,
        config: &DeploymentConfig,
    ) -> GitOpsResult<Option<ReleaseConfiguration>> {
        match config.deployment_app_type {
            Some(DeploymentAppType::ArgoCd) => {}
            Some(DeploymentAppType::Helm) => return Ok(Some(ReleaseConfiguration::new(ReleaseTarget::Helm))),
            _ => return Ok(None),
        }
        let app = self.repos.apps.find_by_id(config.app_id).await?;
        let environment = self.repos.environments.find_by_id(config.environment_id).await?;
        let repo_url = if config.repo_url.is_empty() {
            self.repos
                .installed_apps
                .find_by_app_id(config.app_id)
                .await?
                .git_ops_repo_url
        } else {
            config.repo_url.clone()
        };
        Ok(Some(ReleaseConfiguration::new(ReleaseTarget::ArgoCd(ArgoCdSpec {
            metadata: ApplicationMetadata {
                name: String::new(),
                cluster_id: DEFAULT_CLUSTER_ID,
                namespace: DEFAULT_ARGO_NAMESPACE.to_string(),
            },
            spec: ApplicationSpec {
                source: ApplicationSource {
                    repo_url,
                    path: deployed_app_name(&app.name, &environment.name),
                    target_revision: self.default_target_revision.clone(),
                    value_files: vec![CHART_VALUES_FILE.to_string()],
                },
                destination: Destination {
                    namespace: environment.namespace,
                    server: DEFAULT_CLUSTER_URL.to_string(),
                },
            },
        }))))
    }
}
