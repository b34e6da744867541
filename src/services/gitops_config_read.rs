//! Read-side view of the active GitOps configuration

use std::sync::Arc;
use tracing::warn;

use crate::config::GitSettings;
use crate::domain::identity::resolve_committer;
use crate::domain::repo_url::{repo_name_for_app, repo_name_from_url};
use crate::domain::{Committer, GitOpsConfig};
use crate::error::{GitOpsResult, ValidationError};
use crate::store::{GitOpsConfigRepository, UserRepository};

/// Bitbucket scoping taken from the active config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitbucketMetadata {
    pub workspace_id: String,
    pub project_key: String,
}

pub struct GitOpsConfigReadService {
    configs: Arc<dyn GitOpsConfigRepository>,
    users: Arc<dyn UserRepository>,
    settings: GitSettings,
}

impl GitOpsConfigReadService {
    pub fn new(
        configs: Arc<dyn GitOpsConfigRepository>,
        users: Arc<dyn UserRepository>,
        settings: GitSettings,
    ) -> Self {
        Self {
            configs,
            users,
            settings,
        }
    }

    pub async fn active_config(&self) -> GitOpsResult<Option<GitOpsConfig>> {
        Ok(self.configs.get_active().await?)
    }

    /// Active config or `GitOpsNotConfigured`
    pub async fn require_active(&self) -> GitOpsResult<GitOpsConfig> {
        self.active_config()
            .await?
            .ok_or_else(|| ValidationError::GitOpsNotConfigured.into())
    }

    pub async fn is_gitops_configured(&self) -> GitOpsResult<bool> {
        Ok(self.active_config().await?.is_some())
    }

    pub async fn allows_custom_repository(&self) -> GitOpsResult<bool> {
        Ok(self
            .active_config()
            .await?
            .map(|c| c.allow_custom_repository)
            .unwrap_or(false))
    }

    /// Commit author for `user_id`
    ///
    /// Lookup failures degrade to the config email or the bot identity.
    pub async fn committer(&self, user_id: i32) -> Committer {
        let user_email = match self.users.find_by_id(user_id).await {
            Ok(user) => user.map(|u| u.email_id),
            Err(e) => {
                warn!(user_id, "Failed to look up commit author: {}", e);
                None
            }
        };
        let config_email = match self.configs.get_active().await {
            Ok(config) => config.map(|c| c.email_id),
            Err(e) => {
                warn!("Failed to read active GitOps config: {}", e);
                None
            }
        };
        resolve_committer(user_email.as_deref(), config_email.as_deref())
    }

    /// Generated repository name for an application
    pub fn repo_name(&self, app_name: &str) -> String {
        repo_name_for_app(&self.settings.repo_name_prefix, app_name)
    }

    pub fn repo_name_from_url(&self, url: &str) -> String {
        repo_name_from_url(url)
    }

    pub async fn bitbucket_metadata(&self) -> GitOpsResult<BitbucketMetadata> {
        Ok(self
            .active_config()
            .await?
            .map(|c| BitbucketMetadata {
                workspace_id: c.bitbucket_workspace_id,
                project_key: c.bitbucket_project_key,
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::legacy::User;
    use crate::domain::GitProvider;
    use crate::store::MemoryStore;

    async fn service(config_email: &str) -> GitOpsConfigReadService {
        let store = Arc::new(MemoryStore::new());
        store
            .mutate(|s| {
                s.gitops_configs.push(GitOpsConfig {
                    id: 1,
                    provider: Some(GitProvider::BitbucketCloud),
                    email_id: config_email.into(),
                    bitbucket_workspace_id: "acme".into(),
                    bitbucket_project_key: "OPS".into(),
                    active: true,
                    ..Default::default()
                });
                s.users.push(User {
                    id: 2,
                    email_id: "admin".into(),
                });
                s.users.push(User {
                    id: 9,
                    email_id: "jane@acme.io".into(),
                });
            })
            .await;
        GitOpsConfigReadService::new(
            store.clone(),
            store,
            GitSettings {
                repo_name_prefix: "devtron".into(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_committer_resolution_order() {
        let svc = service("gitops@acme.io").await;
        assert_eq!(svc.committer(9).await.email, "jane@acme.io");
        assert_eq!(svc.committer(2).await.email, "gitops@acme.io");
        assert_eq!(svc.committer(404).await.email, "gitops@acme.io");

        let svc = service("").await;
        assert_eq!(svc.committer(2).await.email, "devtron-bot@devtron.ai");
    }

    #[tokio::test]
    async fn test_repo_names_and_metadata() {
        let svc = service("").await;
        assert_eq!(svc.repo_name("my  app"), "devtron-my-app");
        assert_eq!(svc.repo_name_from_url("https://github.com/acme/web.git"), "web");
        assert_eq!(
            svc.bitbucket_metadata().await.unwrap(),
            BitbucketMetadata {
                workspace_id: "acme".into(),
                project_key: "OPS".into()
            }
        );
        assert!(svc.is_gitops_configured().await.unwrap());
    }

    #[tokio::test]
    async fn test_require_active_without_config() {
        let store = Arc::new(MemoryStore::new());
        let svc = GitOpsConfigReadService::new(store.clone(), store, GitSettings::default());
        let err = svc.require_active().await.unwrap_err();
        assert_eq!(err.http_status(), 412);
    }
}
