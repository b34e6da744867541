//! GitOps config dry runs and custom repository URL checks

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::repo_url::{sanitise_repo_url, BITBUCKET_CLONE_BASE_URL, GIT_REPO_DEFAULT};
use crate::domain::{DetailedValidationResponse, GitOpsConfig, GitProvider, Stage, StageOutcome};
use crate::error::{GitError, GitOpsResult, ValidationError};
use crate::infrastructure::providers::{GitProviderFactory, ProviderRequest};
use crate::infrastructure::workdir::{random_suffix, remove_dir_quietly, unique_dir_name};
use crate::services::git_operation::GitOperationService;
use crate::services::gitops_config_read::GitOpsConfigReadService;
use crate::store::{ChartRepository, InstalledAppRepository};

const DRY_RUN_REPO_PREFIX: &str = "devtron-sample-repo-dryrun-";
const DRY_RUN_FILE: &str = "dry-run.md";
const DRY_RUN_COMMIT_MESSAGE: &str = "first commit";

/// Repository an application asked to deploy from
#[derive(Debug, Clone, Default)]
pub struct ValidateCustomUrlRequest {
    /// Empty or `Default` selects the generated repository
    pub git_repo_url: String,
    pub app_name: String,
    pub user_id: i32,
    pub target_revision: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRepo {
    pub repo_url: String,
    pub is_new_repo: bool,
}

pub struct GitOpsValidationService {
    factory: Arc<GitProviderFactory>,
    read: Arc<GitOpsConfigReadService>,
    git: Arc<GitOperationService>,
    charts: Arc<dyn ChartRepository>,
    installed_apps: Arc<dyn InstalledAppRepository>,
}

fn connection_error_key(provider: &str) -> String {
    format!("error in connecting with {}", provider)
}

impl GitOpsValidationService {
    pub fn new(
        factory: Arc<GitProviderFactory>,
        read: Arc<GitOpsConfigReadService>,
        git: Arc<GitOperationService>,
        charts: Arc<dyn ChartRepository>,
        installed_apps: Arc<dyn InstalledAppRepository>,
    ) -> Self {
        Self {
            factory,
            read,
            git,
            charts,
            installed_apps,
        }
    }

    /// Exercise `config` end to end against a throwaway repository
    ///
    /// Failures are reported per stage in the response; the call itself
    /// never fails.
    pub async fn validate_dry_run(
        &self,
        config: &GitOpsConfig,
        cancel: &CancellationToken,
    ) -> DetailedValidationResponse {
        if config.allow_custom_repository {
            return DetailedValidationResponse::skipped();
        }
        let mut config = config.clone();
        if config.provider == Some(GitProvider::BitbucketCloud) {
            config.host = BITBUCKET_CLONE_BASE_URL.to_string();
            config.bitbucket_project_key = config.bitbucket_project_key.to_uppercase();
        }
        let provider_name = config.provider.map(|p| p.as_str()).unwrap_or_default();

        let mut response = self.dry_run(&config, provider_name, cancel).await;
        response.validated_on = Some(Utc::now());
        response
    }

    async fn dry_run(
        &self,
        config: &GitOpsConfig,
        provider_name: &str,
        cancel: &CancellationToken,
    ) -> DetailedValidationResponse {
        let (client, helper) = match self.factory.client_for_validation(config) {
            Ok(pair) => pair,
            Err(e) => {
                error!(provider = provider_name, "Failed to build validation client: {}", e);
                let mut response = DetailedValidationResponse::default();
                response
                    .stage_error_map
                    .insert(connection_error_key(provider_name), e.normalised());
                return response;
            }
        };

        let repo_name = format!("{}{}", DRY_RUN_REPO_PREFIX, random_suffix(6));
        let user_id = if config.updated_by != 0 {
            config.updated_by
        } else {
            config.created_by
        };
        let committer = self.read.committer(user_id).await;
        let req = ProviderRequest {
            git_repo_name: repo_name.clone(),
            description: "sample dry-run repo".to_string(),
            user_email_id: committer.email.clone(),
            user_name: committer.name.clone(),
            cancel: cancel.clone(),
            ..ProviderRequest::default()
        }
        .with_bitbucket(config);

        info!(repo = %repo_name, provider = provider_name, "Starting GitOps dry run");
        let created = client.create_repository(&req).await;
        let mut outcome: StageOutcome = created.outcome;

        if let Some(message) = outcome.errors.remove(&Stage::GetRepoUrl) {
            let mut response = DetailedValidationResponse::from_outcome(&outcome);
            response
                .stage_error_map
                .insert(connection_error_key(provider_name), message);
            return response;
        }
        if outcome.errors.contains_key(&Stage::CreateRepo) {
            return DetailedValidationResponse::from_outcome(&outcome);
        }

        let dir_name = unique_dir_name(&repo_name);
        let clone_dir = helper.clone_directory(&dir_name);
        let _cleanup = scopeguard::guard(clone_dir.clone(), |dir| remove_dir_quietly(&dir));

        match helper.clone_repo(&created.url, &dir_name, "", cancel).await {
            Err(e) => {
                warn!(repo = %repo_name, "Dry-run clone failed: {}", e);
                outcome.fail(Stage::Clone, e.to_string());
            }
            Ok(cloned) => {
                outcome.succeed(Stage::Clone);
                let pushed = match std::fs::write(clone_dir.join(DRY_RUN_FILE), "dry run\n") {
                    Err(e) => Err(GitError::Io(e)),
                    Ok(()) => {
                        helper
                            .commit_and_push_all_changes(
                                &clone_dir,
                                &cloned.branch,
                                DRY_RUN_COMMIT_MESSAGE,
                                &committer.name,
                                &committer.email,
                                cancel,
                            )
                            .await
                    }
                };
                match pushed {
                    Ok(_) => {
                        outcome.succeed(Stage::CommitOnRest);
                        outcome.succeed(Stage::Push);
                    }
                    Err(e) if e.is_push_failure() => outcome.fail(Stage::Push, e.to_string()),
                    Err(e) => outcome.fail(Stage::CommitOnRest, e.to_string()),
                }
            }
        }

        let mut delete_repo_failed = false;
        match client.delete_repository(&req).await {
            Ok(()) => outcome.succeed(Stage::DeleteRepo),
            Err(e) => {
                error!(repo = %repo_name, "Failed to delete dry-run repository: {}", e);
                delete_repo_failed = true;
            }
        }

        let mut response = DetailedValidationResponse::from_outcome(&outcome);
        response.delete_repo_failed = delete_repo_failed;
        info!(
            repo = %repo_name,
            failed_stages = response.stage_error_map.len(),
            "GitOps dry run finished"
        );
        response
    }

    /// Resolve the repository an application will deploy from and check
    /// that it may be used
    pub async fn validate_custom_git_repo_url(
        &self,
        req: &ValidateCustomUrlRequest,
        cancel: &CancellationToken,
    ) -> GitOpsResult<ValidatedRepo> {
        let config = self.read.require_active().await?;
        let is_custom = !req.git_repo_url.is_empty() && req.git_repo_url != GIT_REPO_DEFAULT;
        if is_custom && !config.allow_custom_repository {
            return Err(ValidationError::CustomRepositoryDisabled.into());
        }

        let repo_name = if is_custom {
            self.read.repo_name_from_url(&req.git_repo_url)
        } else {
            self.read.repo_name(&req.app_name)
        };
        let attr = self
            .git
            .create_git_repository_for_app(&repo_name, "", "", req.user_id, &req.target_revision, cancel)
            .await?;

        let mut validated = ValidatedRepo {
            repo_url: attr.repo_url,
            is_new_repo: attr.is_new_repo,
        };
        if is_custom {
            let provider = config.provider()?;
            let requested = sanitise_repo_url(provider, &req.git_repo_url).replace(".git", "");
            if !validated.repo_url.contains(&requested) {
                warn!(requested = %req.git_repo_url, canonical = %validated.repo_url, "Repository outside configured scope");
                return Err(config.organisation_mismatch().into());
            }
            validated.is_new_repo = true;
        }

        if self.charts.is_repo_registered(&validated.repo_url).await?
            || self.installed_apps.is_repo_registered(&validated.repo_url).await?
        {
            return Err(ValidationError::RepositoryInUse {
                url: validated.repo_url,
            }
            .into());
        }
        Ok(validated)
    }
}
