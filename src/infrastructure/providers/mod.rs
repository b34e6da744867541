//! Git hosting provider clients
//!
//! One REST client per provider behind `GitOpsClient`. Repository creation
//! follows the same staged protocol everywhere (lookup, create, HTTP
//! availability, README seed, clone availability), implemented once in
//! `RepositoryProvisioner` over the small `RepositoryApi` surface each
//! provider adds.

pub mod availability;
pub mod azure;
pub mod bitbucket;
pub mod github;
pub mod gitlab;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AvailabilitySettings, Settings};
use crate::domain::{ChartConfig, CommitResult, GitOpsConfig, GitProvider, Stage, StageOutcome, TlsMaterial};
use crate::error::{GitOpsResult, ProviderError};
use crate::infrastructure::git::{GitAuth, GitExecutor, GitOpsHelper};
use crate::store::GitOpsConfigRepository;

pub use azure::AzureDevOpsClient;
pub use bitbucket::BitbucketClient;
pub use github::GitHubClient;
pub use gitlab::GitLabClient;

pub const README_FILE: &str = "README.md";
pub const README_CONTENT: &str = "@devtron";
pub const README_MESSAGE: &str = "readme";

/// Per-call repository request
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub git_repo_name: String,
    pub description: String,
    /// Branch; empty means the configured default
    pub target_revision: String,
    pub user_email_id: String,
    pub user_name: String,
    pub bitbucket_workspace_id: String,
    pub bitbucket_project_key: String,
    pub cancel: CancellationToken,
}

impl ProviderRequest {
    pub fn new(git_repo_name: impl Into<String>) -> Self {
        Self {
            git_repo_name: git_repo_name.into(),
            ..Default::default()
        }
    }

    /// Bitbucket workspace and project taken from `config`
    pub fn with_bitbucket(mut self, config: &GitOpsConfig) -> Self {
        self.bitbucket_workspace_id = config.bitbucket_workspace_id.clone();
        self.bitbucket_project_key = config.bitbucket_project_key.clone();
        self
    }

    /// The README commit seeded into new repositories
    pub fn readme(&self) -> ChartConfig {
        ChartConfig {
            chart_repo_name: self.git_repo_name.clone(),
            file_name: README_FILE.to_string(),
            file_content: README_CONTENT.to_string(),
            release_message: README_MESSAGE.to_string(),
            target_revision: self.target_revision.clone(),
            user_name: self.user_name.clone(),
            user_email_id: self.user_email_id.clone(),
            ..Default::default()
        }
    }
}

/// Repository as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub url: String,
    pub is_empty: bool,
}

/// Result of the staged repository creation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryCreation {
    pub url: String,
    pub is_new: bool,
    pub is_empty: bool,
    pub outcome: StageOutcome,
}

/// Operations every Git hosting provider supports
#[async_trait]
pub trait GitOpsClient: Send + Sync {
    fn provider(&self) -> GitProvider;

    /// Staged creation; failures are recorded per stage, never returned
    async fn create_repository(&self, req: &ProviderRequest) -> RepositoryCreation;

    async fn commit_values(
        &self,
        chart: &ChartConfig,
        req: &ProviderRequest,
    ) -> Result<CommitResult, ProviderError>;

    /// `None` when the repository does not exist
    async fn get_repo_url(&self, req: &ProviderRequest) -> Result<Option<RepoInfo>, ProviderError>;

    async fn delete_repository(&self, req: &ProviderRequest) -> Result<(), ProviderError>;

    async fn create_readme(&self, req: &ProviderRequest) -> Result<CommitResult, ProviderError> {
        self.commit_values(&req.readme(), req).await
    }

    /// Provider-side path of the configured group; only GitLab has one
    async fn organisation_path(&self) -> Result<String, ProviderError> {
        Ok(String::new())
    }
}

/// Provider primitive used by `RepositoryProvisioner`
#[async_trait]
pub trait RepositoryApi: GitOpsClient {
    /// Create a private repository
    async fn create_remote_repository(&self, req: &ProviderRequest) -> Result<RepoInfo, ProviderError>;
}

/// Shared staged-creation protocol
#[derive(Clone)]
pub struct RepositoryProvisioner {
    helper: GitOpsHelper,
    availability: AvailabilitySettings,
}

impl RepositoryProvisioner {
    pub fn new(helper: GitOpsHelper, availability: AvailabilitySettings) -> Self {
        Self {
            helper,
            availability,
        }
    }

    pub fn default_revision(&self) -> &str {
        self.helper.default_revision()
    }

    pub async fn provision(&self, api: &dyn RepositoryApi, req: &ProviderRequest) -> RepositoryCreation {
        let provider = api.provider();
        let mut outcome = StageOutcome::default();
        let done = |url: String, is_new: bool, is_empty: bool, outcome: StageOutcome| RepositoryCreation {
            url,
            is_new,
            is_empty,
            outcome,
        };

        match api.get_repo_url(req).await {
            Err(e) => {
                warn!("Lookup of {} on {} failed: {}", req.git_repo_name, provider, e);
                outcome.fail(Stage::GetRepoUrl, e.normalised());
                return done(String::new(), false, false, outcome);
            }
            Ok(Some(info)) => {
                outcome.succeed(Stage::GetRepoUrl);
                return done(info.url, false, info.is_empty, outcome);
            }
            Ok(None) => outcome.succeed(Stage::GetRepoUrl),
        }

        let created = match api.create_remote_repository(req).await {
            Ok(info) => info,
            Err(create_err) => {
                warn!("Creating {} on {} failed: {}", req.git_repo_name, provider, create_err);
                // Another writer may have won the race
                if let Ok(Some(info)) = api.get_repo_url(req).await {
                    return done(info.url, false, info.is_empty, outcome);
                }
                outcome.fail(Stage::CreateRepo, create_err.normalised());
                return done(String::new(), true, false, outcome);
            }
        };
        info!("Created repository {} on {}", created.url, provider);
        outcome.succeed(Stage::CreateRepo);

        let scale = self.availability.attempt_scale.max(1);
        let interval = self.availability.interval();

        if let Err(e) = availability::wait_for_http(
            api,
            req,
            provider.http_availability_attempts() * scale,
            interval,
        )
        .await
        {
            outcome.fail(Stage::CloneHttp, e.normalised());
            return done(created.url, true, created.is_empty, outcome);
        }
        outcome.succeed(Stage::CloneHttp);

        if let Err(e) = api.create_readme(req).await {
            outcome.fail(Stage::CreateReadme, e.normalised());
            return done(created.url, true, created.is_empty, outcome);
        }
        outcome.succeed(Stage::CreateReadme);

        if let Err(e) = availability::wait_for_clone(
            &self.helper,
            &created.url,
            req,
            provider.clone_availability_attempts() * scale,
            interval,
        )
        .await
        {
            outcome.fail(Stage::CloneSsh, e.normalised());
            return done(created.url, true, false, outcome);
        }
        outcome.succeed(Stage::CloneSsh);
        done(created.url, true, false, outcome)
    }
}

/// Client wired while GitOps is not configured
#[derive(Debug, Clone, Copy, Default)]
pub struct UnimplementedGitOpsClient;

#[async_trait]
impl GitOpsClient for UnimplementedGitOpsClient {
    fn provider(&self) -> GitProvider {
        GitProvider::GitHub
    }

    async fn create_repository(&self, _req: &ProviderRequest) -> RepositoryCreation {
        let mut outcome = StageOutcome::default();
        outcome.fail(Stage::GetRepoUrl, ProviderError::NotConfigured.to_string());
        RepositoryCreation {
            outcome,
            ..Default::default()
        }
    }

    async fn commit_values(
        &self,
        _chart: &ChartConfig,
        _req: &ProviderRequest,
    ) -> Result<CommitResult, ProviderError> {
        Err(ProviderError::NotConfigured)
    }

    async fn get_repo_url(&self, _req: &ProviderRequest) -> Result<Option<RepoInfo>, ProviderError> {
        Err(ProviderError::NotConfigured)
    }

    async fn delete_repository(&self, _req: &ProviderRequest) -> Result<(), ProviderError> {
        Err(ProviderError::NotConfigured)
    }
}

/// HTTP client honouring the config's TLS material
pub(crate) fn http_client(
    provider: GitProvider,
    tls: Option<&TlsMaterial>,
) -> Result<Client, ProviderError> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10));
    if let Some(tls) = tls {
        if !tls.ca_cert.is_empty() {
            let ca = reqwest::Certificate::from_pem(tls.ca_cert.as_bytes())
                .map_err(|e| api_error(provider, format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(ca);
        }
        if tls.has_client_pair() {
            let pem = format!("{}\n{}", tls.tls_cert, tls.tls_key);
            let identity = reqwest::Identity::from_pem(pem.as_bytes())
                .map_err(|e| api_error(provider, format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }
    }
    builder
        .build()
        .map_err(|e| api_error(provider, format!("failed to build http client: {}", e)))
}

pub(crate) fn api_error(provider: GitProvider, message: impl Into<String>) -> ProviderError {
    ProviderError::Api {
        provider,
        message: message.into(),
    }
}

/// Network failures are transient
pub(crate) fn transport_error(provider: GitProvider, e: reqwest::Error) -> ProviderError {
    ProviderError::Transient {
        provider,
        message: e.to_string(),
    }
}

/// Map a non-success status to the provider error taxonomy
pub(crate) fn status_error(
    provider: GitProvider,
    status: StatusCode,
    resource: &str,
    body: &str,
) -> ProviderError {
    let message = format!("{} {}", status, body.trim());
    match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound {
            provider,
            resource: resource.to_string(),
        },
        StatusCode::CONFLICT => ProviderError::Conflict { provider, message },
        s if s.is_server_error() => ProviderError::Transient { provider, message },
        _ => ProviderError::Api { provider, message },
    }
}

/// Pass successful responses through, map the rest
pub(crate) async fn check(
    provider: GitProvider,
    response: Response,
    resource: &str,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(provider, status, resource, &body))
}

/// Turn a 404 into `None`
pub(crate) fn optional<T>(result: Result<T, ProviderError>) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(ProviderError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Build a client for `config`
pub fn build_client(
    config: &GitOpsConfig,
    helper: GitOpsHelper,
    settings: &Settings,
) -> Result<Arc<dyn GitOpsClient>, ProviderError> {
    let provider = config.provider.ok_or(ProviderError::NotConfigured)?;
    let provisioner = RepositoryProvisioner::new(helper, settings.availability.clone());
    let tls = config.tls_material();
    let client: Arc<dyn GitOpsClient> = match provider {
        GitProvider::GitHub => Arc::new(GitHubClient::new(
            &config.host,
            &config.token,
            &config.github_org_id,
            tls.as_ref(),
            provisioner,
        )?),
        GitProvider::GitLab => Arc::new(GitLabClient::new(
            &config.host,
            &config.token,
            &config.gitlab_group_id,
            tls.as_ref(),
            provisioner,
        )?),
        GitProvider::BitbucketCloud => Arc::new(BitbucketClient::new(
            &config.username,
            &config.token,
            &settings.git.bitbucket_gitops_dir,
            tls.as_ref(),
            provisioner,
        )?),
        GitProvider::AzureDevOps => Arc::new(AzureDevOpsClient::new(
            &config.host,
            &config.token,
            &config.azure_project_name,
            tls.as_ref(),
            provisioner,
        )?),
    };
    Ok(client)
}

/// Constructs the provider client for a config
pub type ClientBuilder = Arc<
    dyn Fn(&GitOpsConfig, GitOpsHelper, &Settings) -> Result<Arc<dyn GitOpsClient>, ProviderError>
        + Send
        + Sync,
>;

struct ActiveProvider {
    client: Arc<dyn GitOpsClient>,
    helper: GitOpsHelper,
    config: Option<GitOpsConfig>,
}

/// Holds the client and helper built from the active GitOps config
pub struct GitProviderFactory {
    settings: Settings,
    executor: Arc<dyn GitExecutor>,
    configs: Arc<dyn GitOpsConfigRepository>,
    builder: ClientBuilder,
    active: RwLock<ActiveProvider>,
}

impl GitProviderFactory {
    /// Build the factory and wire the currently active config
    pub async fn new(
        settings: Settings,
        executor: Arc<dyn GitExecutor>,
        configs: Arc<dyn GitOpsConfigRepository>,
    ) -> GitOpsResult<Self> {
        Self::with_builder(settings, executor, configs, Arc::new(build_client)).await
    }

    /// Like `new`, with a custom client constructor
    pub async fn with_builder(
        settings: Settings,
        executor: Arc<dyn GitExecutor>,
        configs: Arc<dyn GitOpsConfigRepository>,
        builder: ClientBuilder,
    ) -> GitOpsResult<Self> {
        let helper = GitOpsHelper::new(
            executor.clone(),
            settings.git.clone(),
            GitAuth::default(),
            None,
        );
        let factory = Self {
            settings,
            executor,
            configs,
            builder,
            active: RwLock::new(ActiveProvider {
                client: Arc::new(UnimplementedGitOpsClient),
                helper,
                config: None,
            }),
        };
        factory.reload().await?;
        Ok(factory)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Git helper bound to `config`'s credentials
    pub fn helper_for(&self, config: &GitOpsConfig) -> GitOpsHelper {
        GitOpsHelper::new(
            self.executor.clone(),
            self.settings.git.clone(),
            GitAuth {
                username: config.username.clone(),
                password: config.token.clone(),
            },
            config.tls_material(),
        )
    }

    /// Re-read the active config and swap client and helper together
    pub async fn reload(&self) -> GitOpsResult<()> {
        let active = self.configs.get_active().await?;
        let next = match active {
            Some(config) => {
                let helper = self.helper_for(&config);
                let client = (self.builder)(&config, helper.clone(), &self.settings)?;
                info!("GitOps client wired for {}", client.provider());
                ActiveProvider {
                    client,
                    helper,
                    config: Some(config),
                }
            }
            None => {
                info!("No active GitOps config, provider calls are disabled");
                ActiveProvider {
                    client: Arc::new(UnimplementedGitOpsClient),
                    helper: GitOpsHelper::new(
                        self.executor.clone(),
                        self.settings.git.clone(),
                        GitAuth::default(),
                        None,
                    ),
                    config: None,
                }
            }
        };
        *self.active.write().await = next;
        Ok(())
    }

    pub async fn client(&self) -> Arc<dyn GitOpsClient> {
        self.active.read().await.client.clone()
    }

    pub async fn helper(&self) -> GitOpsHelper {
        self.active.read().await.helper.clone()
    }

    /// The config the current client was built from
    pub async fn active_config(&self) -> Option<GitOpsConfig> {
        self.active.read().await.config.clone()
    }

    /// Throwaway client for validating an unsaved config
    pub fn client_for_validation(
        &self,
        config: &GitOpsConfig,
    ) -> Result<(Arc<dyn GitOpsClient>, GitOpsHelper), ProviderError> {
        let helper = self.helper_for(config);
        let client = (self.builder)(config, helper.clone(), &self.settings)?;
        Ok((client, helper))
    }
}
