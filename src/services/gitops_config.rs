//! GitOps configuration lifecycle
//!
//! Every create or update is dry-run against the provider first. Only a
//! clean dry run is persisted, and persisting also distributes the
//! credentials to the controller:
//!
//! - **TLS on**: a repository credential template plus the host CA
//! - **TLS off**: the shared gitops secret and the `repository.credentials`
//!   entry in the controller config map
//!
//! The first config ever activated also registers every active cluster
//! with the controller.

use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerSettings;
use crate::domain::repo_url::{git_host_url_by_provider, server_name};
use crate::domain::{DetailedValidationResponse, GitOpsConfig, GitProvider};
use crate::error::{GitOpsError, GitOpsResult, KubernetesError, ValidationError};
use crate::infrastructure::argocd::{ArgoCdClient, ClusterRegistration, RepoCredentialTemplate};
use crate::infrastructure::kubernetes::{KubeObjects, KubeObjectsProvider};
use crate::infrastructure::providers::{GitOpsClient, GitProviderFactory};
use crate::services::validation::GitOpsValidationService;
use crate::store::{ClusterRepository, GitOpsConfigRepository};

pub const REPOSITORY_CREDENTIALS_KEY: &str = "repository.credentials";
const WRITE_ATTEMPTS: u32 = 3;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretKeyRef<'a> {
    name: &'a str,
    key: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryCredential<'a> {
    url: &'a str,
    username_secret: SecretKeyRef<'a>,
    password_secret: SecretKeyRef<'a>,
}

/// Rewrite the controller's `repository.credentials` list
///
/// Entries for `old_host` and `new_host` are dropped and one entry pointing
/// `new_host` at `secret_name` is appended. Other entries pass through
/// untouched, including fields this crate does not model.
pub fn rewrite_repository_credentials(
    existing: Option<&str>,
    old_host: Option<&str>,
    new_host: &str,
    secret_name: &str,
) -> Result<String, serde_yaml::Error> {
    let mut entries: Vec<serde_yaml::Value> = match existing.map(str::trim) {
        Some(raw) if !raw.is_empty() => serde_yaml::from_str::<Option<Vec<serde_yaml::Value>>>(raw)?
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    entries.retain(|entry| {
        let url = entry.get("url").and_then(serde_yaml::Value::as_str);
        url != Some(new_host) && (old_host.is_none() || url != old_host)
    });
    entries.push(serde_yaml::to_value(RepositoryCredential {
        url: new_host,
        username_secret: SecretKeyRef {
            name: secret_name,
            key: "username",
        },
        password_secret: SecretKeyRef {
            name: secret_name,
            key: "password",
        },
    })?);
    serde_yaml::to_string(&entries)
}

pub struct GitOpsConfigService {
    configs: Arc<dyn GitOpsConfigRepository>,
    clusters: Arc<dyn ClusterRepository>,
    factory: Arc<GitProviderFactory>,
    validation: Arc<GitOpsValidationService>,
    argocd: Arc<dyn ArgoCdClient>,
    kube: Arc<dyn KubeObjectsProvider>,
    settings: ControllerSettings,
}

impl GitOpsConfigService {
    pub fn new(
        configs: Arc<dyn GitOpsConfigRepository>,
        clusters: Arc<dyn ClusterRepository>,
        factory: Arc<GitProviderFactory>,
        validation: Arc<GitOpsValidationService>,
        argocd: Arc<dyn ArgoCdClient>,
        kube: Arc<dyn KubeObjectsProvider>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            configs,
            clusters,
            factory,
            validation,
            argocd,
            kube,
            settings,
        }
    }

    /// Dry-run `config` and persist it as the active config if it passes
    ///
    /// A failing dry run is returned as `Ok` with its stage errors and
    /// nothing is written.
    pub async fn validate_and_create(
        &self,
        mut config: GitOpsConfig,
        user_id: i32,
        cancel: &CancellationToken,
    ) -> GitOpsResult<DetailedValidationResponse> {
        config.provider()?;
        config.validate_tls()?;
        let response = self.validation.validate_dry_run(&config, cancel).await;
        if response.has_errors() {
            info!(
                provider = ?config.provider,
                stages = response.stage_error_map.len(),
                "GitOps dry run failed, config not saved"
            );
            return Ok(response);
        }
        self.persist(config, user_id, false).await?;
        Ok(response)
    }

    /// Dry-run and persist changes to an existing config
    ///
    /// Secrets omitted from the request are taken from the stored record.
    pub async fn validate_and_update(
        &self,
        mut config: GitOpsConfig,
        user_id: i32,
        cancel: &CancellationToken,
    ) -> GitOpsResult<DetailedValidationResponse> {
        config.provider()?;
        let stored = self.configs.get_by_id(config.id).await?;
        config.fill_secrets_from(&stored);
        config.validate_tls()?;
        let response = self.validation.validate_dry_run(&config, cancel).await;
        if response.has_errors() {
            info!(
                id = config.id,
                stages = response.stage_error_map.len(),
                "GitOps dry run failed, config not updated"
            );
            return Ok(response);
        }
        self.persist(config, user_id, true).await?;
        Ok(response)
    }

    pub async fn validate_dry_run(
        &self,
        config: &GitOpsConfig,
        cancel: &CancellationToken,
    ) -> DetailedValidationResponse {
        self.validation.validate_dry_run(config, cancel).await
    }

    pub async fn get_by_id(&self, id: i32) -> GitOpsResult<GitOpsConfig> {
        Ok(self.configs.get_by_id(id).await?.redacted())
    }

    pub async fn get_all(&self) -> GitOpsResult<Vec<GitOpsConfig>> {
        Ok(self
            .configs
            .get_all()
            .await?
            .iter()
            .map(GitOpsConfig::redacted)
            .collect())
    }

    pub async fn get_by_provider(&self, provider: GitProvider) -> GitOpsResult<GitOpsConfig> {
        Ok(self.configs.get_by_provider(provider).await?.redacted())
    }

    pub async fn get_gitops_config_active(&self) -> GitOpsResult<Option<GitOpsConfig>> {
        Ok(self.configs.get_active().await?.map(|c| c.redacted()))
    }

    async fn persist(&self, config: GitOpsConfig, user_id: i32, is_update: bool) -> GitOpsResult<GitOpsConfig> {
        let now = Utc::now();
        let mut tx = self.configs.begin().await?;
        let previous = tx.get_active().await?;

        let saved = if is_update {
            let stored = tx.get_by_id(config.id).await?;
            match &previous {
                Some(active) if config.active && active.id != stored.id => {
                    let mut active = active.clone();
                    active.active = false;
                    active.updated_on = Some(now);
                    active.updated_by = user_id;
                    tx.update(&active).await?;
                }
                Some(active) if !config.active && active.id == stored.id => {
                    return Err(ValidationError::NoActiveConfig.into());
                }
                None if !config.active => return Err(ValidationError::NoActiveConfig.into()),
                _ => {}
            }
            let model = GitOpsConfig {
                id: stored.id,
                created_on: stored.created_on,
                created_by: stored.created_by,
                updated_on: Some(now),
                updated_by: user_id,
                ..config
            };
            tx.update(&model).await?;
            model
        } else {
            if let Some(active) = &previous {
                let mut active = active.clone();
                active.active = false;
                active.updated_on = Some(now);
                active.updated_by = user_id;
                tx.update(&active).await?;
            }
            tx.save(GitOpsConfig {
                id: 0,
                active: true,
                created_on: Some(now),
                created_by: user_id,
                updated_on: Some(now),
                updated_by: user_id,
                ..config
            })
            .await?
        };

        if saved.active {
            self.register_with_controller(&saved, previous.as_ref()).await?;
        } else {
            debug!(id = saved.id, "Config saved inactive, controller left unchanged");
        }

        if previous.is_none() {
            self.register_clusters().await?;
        }

        tx.commit().await?;
        self.factory.reload().await?;
        info!(id = saved.id, provider = ?saved.provider, "GitOps config saved");
        Ok(saved)
    }

    async fn register_with_controller(
        &self,
        config: &GitOpsConfig,
        previous: Option<&GitOpsConfig>,
    ) -> GitOpsResult<()> {
        let (client, _) = self.factory.client_for_validation(config)?;
        let host = credential_host(config, client.as_ref()).await?;

        if config.enable_tls_verification {
            self.argocd
                .upsert_repository_credential_template(&RepoCredentialTemplate {
                    url: host.clone(),
                    username: config.username.clone(),
                    password: config.token.clone(),
                    tls_client_cert_data: config.tls.tls_cert.clone(),
                    tls_client_cert_key: config.tls.tls_key.clone(),
                })
                .await?;
            if !config.tls.ca_cert.is_empty() {
                self.argocd
                    .upsert_certificate(&server_name(&host), &config.tls.ca_cert)
                    .await?;
            }
            info!(host = %host, "Registered credential template with controller");
            return Ok(());
        }

        let previous_host = match previous {
            Some(previous) => {
                let active_client = self.factory.client().await;
                match credential_host(previous, active_client.as_ref()).await {
                    Ok(host) => Some(host),
                    Err(e) => {
                        warn!("Failed to resolve previous credential host, using raw host: {}", e);
                        Some(previous.host.clone())
                    }
                }
            }
            None => None,
        };

        let kube = self.kube.controller_objects().await?;
        self.upsert_gitops_secret(kube.as_ref(), config).await?;
        self.update_repository_credentials(kube.as_ref(), previous_host.as_deref(), &host)
            .await?;
        info!(host = %host, "Registered repository credentials with controller");
        Ok(())
    }

    async fn upsert_gitops_secret(&self, kube: &dyn KubeObjects, config: &GitOpsConfig) -> GitOpsResult<()> {
        let namespace = &self.settings.namespace;
        let name = &self.settings.gitops_secret_name;
        let data = BTreeMap::from([
            ("username".to_string(), ByteString(config.username.as_bytes().to_vec())),
            ("password".to_string(), ByteString(config.token.as_bytes().to_vec())),
        ]);

        for attempt in 1..=WRITE_ATTEMPTS {
            let result = match kube.get_secret(namespace, name).await {
                Ok(mut secret) => {
                    secret.data = Some(data.clone());
                    kube.update_secret(namespace, &secret).await
                }
                Err(e) if e.is_not_found() => {
                    let secret = Secret {
                        metadata: ObjectMeta {
                            name: Some(name.clone()),
                            namespace: Some(namespace.clone()),
                            ..Default::default()
                        },
                        data: Some(data.clone()),
                        ..Default::default()
                    };
                    kube.create_secret(namespace, &secret).await
                }
                Err(e) => return Err(e.into()),
            };
            match result {
                Ok(_) => return Ok(()),
                Err(e @ KubernetesError::Conflict { .. }) | Err(e @ KubernetesError::AlreadyExists { .. }) => {
                    debug!(attempt, secret = %name, "Secret write raced: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(GitOpsError::Fatal(format!(
            "resource version not matched with secret attempted {} times",
            WRITE_ATTEMPTS
        )))
    }

    async fn update_repository_credentials(
        &self,
        kube: &dyn KubeObjects,
        old_host: Option<&str>,
        new_host: &str,
    ) -> GitOpsResult<()> {
        let namespace = &self.settings.namespace;
        for attempt in 1..=WRITE_ATTEMPTS {
            let mut config_map = kube.get_config_map(namespace, &self.settings.config_map).await?;
            let data = config_map.data.get_or_insert_with(BTreeMap::new);
            let rewritten = rewrite_repository_credentials(
                data.get(REPOSITORY_CREDENTIALS_KEY).map(String::as_str),
                old_host,
                new_host,
                &self.settings.gitops_secret_name,
            )?;
            data.insert(REPOSITORY_CREDENTIALS_KEY.to_string(), rewritten);
            match kube.update_config_map(namespace, &config_map).await {
                Ok(_) => return Ok(()),
                Err(e @ KubernetesError::Conflict { .. }) => {
                    debug!(attempt, config_map = %self.settings.config_map, "Config map write raced: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(GitOpsError::Fatal(format!(
            "resource version not matched with config map attempted {} times",
            WRITE_ATTEMPTS
        )))
    }

    async fn register_clusters(&self) -> GitOpsResult<()> {
        for cluster in self.clusters.find_all_active().await? {
            self.argocd
                .upsert_cluster(&ClusterRegistration {
                    name: cluster.name.clone(),
                    server: cluster.server_url.clone(),
                    bearer_token: cluster.bearer_token.clone(),
                    insecure: true,
                })
                .await?;
            info!(cluster = %cluster.name, "Registered cluster with controller");
        }
        Ok(())
    }
}

/// URL under which the controller keys credentials for `config`
async fn credential_host(config: &GitOpsConfig, client: &dyn GitOpsClient) -> GitOpsResult<String> {
    let provider = config.provider()?;
    let group_path = match provider {
        GitProvider::GitLab => client.organisation_path().await?,
        _ => String::new(),
    };
    git_host_url_by_provider(
        provider,
        &config.host,
        &config.github_org_id,
        &group_path,
        &config.bitbucket_workspace_id,
    )
    .map_err(|e| ValidationError::InvalidRequest(e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::legacy::Cluster;
    use crate::domain::TlsMaterial;
    use crate::error::ProviderError;
    use crate::testing::{
        github_config, FakeArgoCd, FakeGitExecutor, FakeGitOpsClient, FakeKubeObjects,
        FakeKubeProvider, Harness,
    };
    use tokio_test::assert_ok;

    const NS: &str = "devtroncd";
    const CM: &str = "argocd-cm";

    struct Fixture {
        h: Harness,
        argocd: Arc<FakeArgoCd>,
        kube: Arc<FakeKubeObjects>,
        service: GitOpsConfigService,
    }

    async fn fixture(h: Harness, kube: FakeKubeObjects) -> Fixture {
        let argocd = Arc::new(FakeArgoCd::default());
        let kube = Arc::new(kube);
        let validation = Arc::new(GitOpsValidationService::new(
            h.factory.clone(),
            h.read.clone(),
            h.git_operations(),
            h.store.clone(),
            h.store.clone(),
        ));
        let service = GitOpsConfigService::new(
            h.store.clone(),
            h.store.clone(),
            h.factory.clone(),
            validation,
            argocd.clone(),
            Arc::new(FakeKubeProvider::new(kube.clone())),
            ControllerSettings::default(),
        );
        Fixture {
            h,
            argocd,
            kube,
            service,
        }
    }

    fn argo_cm() -> FakeKubeObjects {
        FakeKubeObjects::default().with_config_map(
            NS,
            CM,
            &[
                ("url", "https://argocd.acme.io"),
                (
                    REPOSITORY_CREDENTIALS_KEY,
                    "- url: https://github.com/acme\n  usernameSecret:\n    name: devtron-gitops-secret\n    key: username\n- url: git@gitlab.com:ops\n  sshPrivateKeySecret:\n    name: ssh\n    key: key\n",
                ),
            ],
        )
    }

    fn credentials(kube: &FakeKubeObjects) -> Vec<serde_yaml::Value> {
        let cm = kube.config_map(NS, CM).unwrap();
        serde_yaml::from_str(&cm.data.unwrap()[REPOSITORY_CREDENTIALS_KEY]).unwrap()
    }

    fn urls(entries: &[serde_yaml::Value]) -> Vec<String> {
        entries
            .iter()
            .map(|e| e["url"].as_str().unwrap().to_string())
            .collect()
    }

    fn bitbucket_config() -> GitOpsConfig {
        GitOpsConfig {
            provider: Some(GitProvider::BitbucketCloud),
            host: "https://bitbucket.org".into(),
            username: "ci".into(),
            token: "app-password".into(),
            bitbucket_workspace_id: "acme-ws".into(),
            bitbucket_project_key: "ops".into(),
            active: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_rewrite_replaces_old_host_and_keeps_others() {
        let existing = "- url: https://old.example/acme\n  usernameSecret: {name: s, key: username}\n- url: https://other.example\n  tlsClientCertData: abc\n";
        let rewritten =
            rewrite_repository_credentials(Some(existing), Some("https://old.example/acme"), "https://github.com/acme", "gitops")
                .unwrap();
        let entries: Vec<serde_yaml::Value> = serde_yaml::from_str(&rewritten).unwrap();
        assert_eq!(urls(&entries), vec!["https://other.example", "https://github.com/acme"]);
        assert_eq!(entries[0]["tlsClientCertData"].as_str(), Some("abc"));
        assert_eq!(entries[1]["passwordSecret"]["name"].as_str(), Some("gitops"));
        assert_eq!(entries[1]["passwordSecret"]["key"].as_str(), Some("password"));
    }

    #[test]
    fn test_rewrite_from_empty() {
        let rewritten = rewrite_repository_credentials(None, None, "https://github.com/acme", "gitops").unwrap();
        let entries: Vec<serde_yaml::Value> = serde_yaml::from_str(&rewritten).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["usernameSecret"]["key"].as_str(), Some("username"));
    }

    #[tokio::test]
    async fn test_first_config_registers_credentials_and_clusters() {
        let h = Harness::new(None, FakeGitExecutor::default(), FakeGitOpsClient::github()).await;
        h.store
            .mutate(|s| {
                s.clusters.push(Cluster {
                    id: 1,
                    name: "default_cluster".into(),
                    server_url: "https://kubernetes.default.svc".into(),
                    bearer_token: "tok".into(),
                    insecure_skip_tls_verify: false,
                    active: true,
                });
                s.clusters.push(Cluster {
                    id: 2,
                    name: "retired".into(),
                    server_url: "https://old.example".into(),
                    bearer_token: String::new(),
                    insecure_skip_tls_verify: false,
                    active: false,
                });
            })
            .await;
        let f = fixture(h, argo_cm()).await;

        let response = assert_ok!(
            f.service
                .validate_and_create(github_config(), 9, &CancellationToken::new())
                .await
        );
        assert!(!response.has_errors());

        let secret = f.kube.secret(NS, "devtron-gitops-secret").unwrap();
        let data = secret.data.unwrap();
        assert_eq!(data["username"].0, b"bot".to_vec());
        assert_eq!(data["password"].0, b"ghp_token".to_vec());

        let entries = credentials(&f.kube);
        assert_eq!(urls(&entries), vec!["git@gitlab.com:ops", "https://github.com/acme"]);
        assert_eq!(entries[0]["sshPrivateKeySecret"]["name"].as_str(), Some("ssh"));
        let cm = f.kube.config_map(NS, CM).unwrap();
        assert_eq!(cm.data.unwrap()["url"], "https://argocd.acme.io");

        let clusters = f.argocd.clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name, "default_cluster");
        assert!(clusters[0].insecure);

        let active = f.h.factory.active_config().await.unwrap();
        assert_eq!(active.created_by, 9);
        assert!(active.created_on.is_some());
    }

    #[tokio::test]
    async fn test_replacing_active_config_swaps_credentials() {
        let h = Harness::github().await;
        let f = fixture(h, argo_cm()).await;

        assert_ok!(
            f.service
                .validate_and_create(bitbucket_config(), 9, &CancellationToken::new())
                .await
        );

        let all = f.service.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all[0].active);
        assert_eq!(all[0].updated_by, 9);
        assert!(all[1].active);
        assert!(all.iter().all(|c| c.token.is_empty()));

        assert_eq!(
            urls(&credentials(&f.kube)),
            vec!["git@gitlab.com:ops", "https://bitbucket.org/acme-ws"]
        );
        assert!(f.argocd.clusters().is_empty());
        assert_eq!(
            f.h.factory.active_config().await.unwrap().provider,
            Some(GitProvider::BitbucketCloud)
        );
    }

    #[tokio::test]
    async fn test_failed_dry_run_persists_nothing() {
        let client = FakeGitOpsClient::github().with_create_error(ProviderError::Api {
            provider: GitProvider::GitHub,
            message: "401 Bad credentials".into(),
        });
        let h = Harness::new(None, FakeGitExecutor::default(), client).await;
        let f = fixture(h, argo_cm()).await;

        let response = assert_ok!(
            f.service
                .validate_and_create(github_config(), 9, &CancellationToken::new())
                .await
        );
        assert!(response.has_errors());
        assert!(f.service.get_all().await.unwrap().is_empty());
        assert!(f.kube.secret(NS, "devtron-gitops-secret").is_none());
        assert!(f.argocd.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deactivating_only_active_config_is_rejected() {
        let h = Harness::github().await;
        let f = fixture(h, argo_cm()).await;

        let update = GitOpsConfig {
            id: 1,
            active: false,
            ..github_config()
        };
        let err = f
            .service
            .validate_and_update(update, 9, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.user_message(),
            "no active config found, please ensure atleast on gitops config active"
        );
        assert!(f.service.get_by_id(1).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_update_keeps_stored_token() {
        let h = Harness::github().await;
        let f = fixture(h, argo_cm()).await;

        let update = GitOpsConfig {
            id: 1,
            token: String::new(),
            username: "bot2".into(),
            ..github_config()
        };
        assert_ok!(
            f.service
                .validate_and_update(update, 9, &CancellationToken::new())
                .await
        );

        let stored = f.h.factory.active_config().await.unwrap();
        assert_eq!(stored.token, "ghp_token");
        assert_eq!(stored.username, "bot2");
        assert_eq!(stored.updated_by, 9);
        let secret = f.kube.secret(NS, "devtron-gitops-secret").unwrap();
        assert_eq!(secret.data.unwrap()["password"].0, b"ghp_token".to_vec());
        assert_eq!(urls(&credentials(&f.kube)), vec!["git@gitlab.com:ops", "https://github.com/acme"]);
    }

    #[tokio::test]
    async fn test_config_map_conflicts_are_retried() {
        let h = Harness::github().await;
        let f = fixture(h, argo_cm().with_config_map_conflicts(2)).await;

        let update = GitOpsConfig { id: 1, ..github_config() };
        assert_ok!(
            f.service
                .validate_and_update(update, 9, &CancellationToken::new())
                .await
        );
        assert_eq!(urls(&credentials(&f.kube)).len(), 2);
    }

    #[tokio::test]
    async fn test_config_map_retries_exhausted() {
        let h = Harness::github().await;
        let f = fixture(h, argo_cm().with_config_map_conflicts(3)).await;

        let update = GitOpsConfig {
            id: 1,
            username: "bot2".into(),
            ..github_config()
        };
        let err = f
            .service
            .validate_and_update(update, 9, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "resource version not matched with config map attempted 3 times"
        );
        assert_eq!(f.service.get_by_id(1).await.unwrap().username, "bot");
    }

    fn stale_gitops_secret() -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("devtron-gitops-secret".into()),
                namespace: Some(NS.into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                ("username".to_string(), ByteString(b"old-bot".to_vec())),
                ("password".to_string(), ByteString(b"old-token".to_vec())),
            ])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_secret_conflicts_are_retried() {
        let h = Harness::github().await;
        let kube = argo_cm()
            .with_secret(NS, stale_gitops_secret())
            .with_secret_conflicts(2);
        let f = fixture(h, kube).await;

        let update = GitOpsConfig { id: 1, ..github_config() };
        assert_ok!(
            f.service
                .validate_and_update(update, 9, &CancellationToken::new())
                .await
        );
        let data = f.kube.secret(NS, "devtron-gitops-secret").unwrap().data.unwrap();
        assert_eq!(data["username"].0, github_config().username.into_bytes());
        assert_eq!(data["password"].0, github_config().token.into_bytes());
    }

    #[tokio::test]
    async fn test_secret_retries_exhausted() {
        let h = Harness::github().await;
        let kube = argo_cm()
            .with_secret(NS, stale_gitops_secret())
            .with_secret_conflicts(3);
        let f = fixture(h, kube).await;

        let update = GitOpsConfig {
            id: 1,
            username: "bot2".into(),
            ..github_config()
        };
        let err = f
            .service
            .validate_and_update(update, 9, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "resource version not matched with secret attempted 3 times"
        );
        assert_eq!(f.service.get_by_id(1).await.unwrap().username, "bot");
        let data = f.kube.secret(NS, "devtron-gitops-secret").unwrap().data.unwrap();
        assert_eq!(data["username"].0, b"old-bot".to_vec());
    }

    #[tokio::test]
    async fn test_tls_config_uses_credential_template() {
        let h = Harness::new(None, FakeGitExecutor::default(), FakeGitOpsClient::github()).await;
        let f = fixture(h, argo_cm()).await;

        let config = GitOpsConfig {
            enable_tls_verification: true,
            tls: TlsMaterial {
                ca_cert: "CA".into(),
                tls_cert: "CERT".into(),
                tls_key: "KEY".into(),
            },
            ..github_config()
        };
        assert_ok!(
            f.service
                .validate_and_create(config, 9, &CancellationToken::new())
                .await
        );

        let templates = f.argocd.templates();
        assert_eq!(templates[0].url, "https://github.com/acme");
        assert_eq!(templates[0].tls_client_cert_key, "KEY");
        assert!(f.argocd.calls().contains(&"certificate github.com".to_string()));
        assert!(f.kube.secret(NS, "devtron-gitops-secret").is_none());
        assert_eq!(urls(&credentials(&f.kube)).len(), 2);
    }

    #[tokio::test]
    async fn test_incomplete_tls_is_rejected_before_dry_run() {
        let h = Harness::new(None, FakeGitExecutor::default(), FakeGitOpsClient::github()).await;
        let f = fixture(h, argo_cm()).await;

        let config = GitOpsConfig {
            enable_tls_verification: true,
            tls: TlsMaterial {
                tls_cert: "CERT".into(),
                ..Default::default()
            },
            ..github_config()
        };
        let err = f
            .service
            .validate_and_create(config, 9, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 412);
        assert!(f.h.client.create_requests().is_empty());
    }

    #[tokio::test]
    async fn test_reads_are_redacted() {
        let h = Harness::github().await;
        let f = fixture(h, FakeKubeObjects::default()).await;

        assert!(f.service.get_by_id(1).await.unwrap().token.is_empty());
        assert!(f
            .service
            .get_by_provider(GitProvider::GitHub)
            .await
            .unwrap()
            .token
            .is_empty());
        let active = f.service.get_gitops_config_active().await.unwrap().unwrap();
        assert_eq!(active.id, 1);
        assert!(active.token.is_empty());
    }
}
