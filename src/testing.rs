//! In-memory fakes shared by unit tests

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{AvailabilitySettings, GitSettings, Settings};
use crate::domain::legacy::{Cluster, User};
use crate::domain::{ChartConfig, CommitResult, GitOpsConfig, GitProvider, Stage, StageOutcome};
use crate::error::{ControllerCode, ControllerError, GitError, GitOpsError, KubernetesError, ProviderError};
use crate::infrastructure::argocd::{
    ArgoCdClient, ClusterRegistration, RepoCredentialTemplate, RepositoryRegistration,
};
use crate::infrastructure::git::{GitAuth, GitContext, GitExecutor, GitOpsHelper, GitOutput};
use crate::infrastructure::helm::{HelmClient, HelmInstall};
use crate::infrastructure::kubernetes::{KubeObjects, KubeObjectsProvider};
use crate::infrastructure::providers::{
    ClientBuilder, GitOpsClient, GitProviderFactory, ProviderRequest, RepoInfo, RepositoryApi,
    RepositoryCreation, RepositoryProvisioner,
};
use crate::infrastructure::workdir::random_suffix;
use crate::services::git_operation::GitOperationService;
use crate::services::gitops_config_read::GitOpsConfigReadService;
use crate::store::{MemoryStore, Repositories};

/// Fresh scratch directory under the system temp dir
pub fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("gitops-test-{}", random_suffix(10)))
}

// ============================================================================
// Git executor
// ============================================================================

/// One `commit_and_push` seen by the fake executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub dir: PathBuf,
    pub branch: String,
    pub message: String,
    pub author: String,
    /// Files present in the working copy at commit time, relative to `dir`
    pub files: Vec<String>,
    pub hash: String,
}

#[derive(Default)]
struct FakeGitState {
    empty_remote: bool,
    push_conflicts: u32,
    pull_failures: u32,
    add_repo_failures: u32,
    remote_files: Vec<(String, String)>,
    commits: Vec<RecordedCommit>,
    pulls: Vec<(PathBuf, String)>,
}

/// `GitExecutor` that only touches the local filesystem
#[derive(Default)]
pub struct FakeGitExecutor {
    state: Mutex<FakeGitState>,
}

impl FakeGitExecutor {
    /// Remote with no branches
    pub fn empty_remote() -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().empty_remote = true;
        fake
    }

    /// Reject the next `n` pushes with `PushConflict`
    pub fn with_push_conflicts(self, n: u32) -> Self {
        self.state.lock().unwrap().push_conflicts = n;
        self
    }

    /// Fail the next `n` pulls
    pub fn with_pull_failures(self, n: u32) -> Self {
        self.state.lock().unwrap().pull_failures = n;
        self
    }

    /// Fail the next `n` clones at `add_repo`
    pub fn with_add_repo_failures(self, n: u32) -> Self {
        self.state.lock().unwrap().add_repo_failures = n;
        self
    }

    /// File every clone of the remote starts with
    pub fn with_remote_file(self, path: &str, content: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .remote_files
            .push((path.to_string(), content.to_string()));
        self
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn pulls(&self) -> Vec<(PathBuf, String)> {
        self.state.lock().unwrap().pulls.clone()
    }
}

fn relative_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .filter(|p| !p.starts_with(".git"))
        .collect();
    files.sort();
    files
}

#[async_trait]
impl GitExecutor for FakeGitExecutor {
    async fn add_repo(&self, _ctx: &GitContext, dir: &Path, url: &str) -> Result<GitOutput, GitError> {
        let files = {
            let mut state = self.state.lock().unwrap();
            if state.add_repo_failures > 0 {
                state.add_repo_failures -= 1;
                return Err(GitError::CommandFailed {
                    command: format!("git remote add origin {}", url),
                    stderr: "repository not found".into(),
                });
            }
            state.remote_files.clone()
        };
        std::fs::create_dir_all(dir)?;
        for (path, content) in files {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }
        Ok(GitOutput::default())
    }

    async fn fetch(&self, _ctx: &GitContext, _dir: &Path) -> Result<GitOutput, GitError> {
        Ok(GitOutput::default())
    }

    async fn list_branch(&self, _ctx: &GitContext, _dir: &Path) -> Result<GitOutput, GitError> {
        let empty = self.state.lock().unwrap().empty_remote;
        Ok(GitOutput::stdout(if empty { "" } else { "origin/master" }))
    }

    async fn pull(&self, _ctx: &GitContext, dir: &Path, branch: &str) -> Result<GitOutput, GitError> {
        let mut state = self.state.lock().unwrap();
        state.pulls.push((dir.to_path_buf(), branch.to_string()));
        if state.pull_failures > 0 {
            state.pull_failures -= 1;
            return Err(GitError::CommandFailed {
                command: format!("git pull origin {}", branch),
                stderr: "fatal: not a git repository".into(),
            });
        }
        Ok(GitOutput::stdout("Already up to date."))
    }

    async fn checkout(&self, _ctx: &GitContext, _dir: &Path, _branch: &str) -> Result<GitOutput, GitError> {
        Ok(GitOutput::default())
    }

    async fn commit_and_push(
        &self,
        _ctx: &GitContext,
        dir: &Path,
        branch: &str,
        message: &str,
        name: &str,
        email: &str,
    ) -> Result<GitOutput, GitError> {
        let mut state = self.state.lock().unwrap();
        if state.push_conflicts > 0 {
            state.push_conflicts -= 1;
            return Err(GitError::PushConflict);
        }
        let hash = format!("{:040x}", state.commits.len() + 1);
        state.commits.push(RecordedCommit {
            dir: dir.to_path_buf(),
            branch: branch.to_string(),
            message: message.to_string(),
            author: format!("{} <{}>", name, email),
            files: relative_files(dir),
            hash: hash.clone(),
        });
        state.empty_remote = false;
        Ok(GitOutput::stdout(hash))
    }

    async fn get_default_branch(&self, _ctx: &GitContext, _dir: &Path) -> Result<GitOutput, GitError> {
        Ok(GitOutput::stdout("master"))
    }
}

/// Helper over `executor` rooted at `working_dir`
pub fn fake_helper(executor: Arc<FakeGitExecutor>, working_dir: &Path) -> GitOpsHelper {
    let settings = GitSettings {
        working_dir: working_dir.to_path_buf(),
        default_target_revision: "master".into(),
        ..Default::default()
    };
    GitOpsHelper::new(executor, settings, GitAuth::default(), None)
}

/// Settings rooted in a scratch dir with zero-delay polling and retries
pub fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.git.working_dir = root.join("work");
    settings.git.bitbucket_gitops_dir = root.join("bitbucket");
    settings.git.commit_retry_delay_on_conflict_seconds = 0;
    settings.availability = AvailabilitySettings {
        interval_seconds: 0,
        attempt_scale: 1,
    };
    settings
}

/// Provisioner over a fake executor with zero-delay polling
pub fn test_provisioner() -> RepositoryProvisioner {
    RepositoryProvisioner::new(
        fake_helper(Arc::new(FakeGitExecutor::default()), &scratch_dir()),
        AvailabilitySettings {
            interval_seconds: 0,
            attempt_scale: 1,
        },
    )
}

// ============================================================================
// Scripted provider primitive
// ============================================================================

/// `RepositoryApi` whose lookup and create results are scripted
pub struct ScriptedRepositoryApi {
    url: String,
    exists: bool,
    create_fails: bool,
    visible_after_failed_create: bool,
    visible_after_polls: u32,
    create_calls: AtomicU32,
    polls_after_create: AtomicU32,
    readme_calls: AtomicU32,
    provisioner: RepositoryProvisioner,
}

impl ScriptedRepositoryApi {
    fn scripted(url: &str) -> Self {
        Self {
            url: url.to_string(),
            exists: false,
            create_fails: false,
            visible_after_failed_create: false,
            visible_after_polls: 1,
            create_calls: AtomicU32::new(0),
            polls_after_create: AtomicU32::new(0),
            readme_calls: AtomicU32::new(0),
            provisioner: test_provisioner(),
        }
    }

    /// Repository already present
    pub fn existing(url: &str) -> Self {
        Self {
            exists: true,
            ..Self::scripted(url)
        }
    }

    /// Creation succeeds; the API reports it from the `visible_after_polls`-th poll on
    pub fn creatable(url: &str, visible_after_polls: u32) -> Self {
        Self {
            visible_after_polls,
            ..Self::scripted(url)
        }
    }

    /// Creation fails; `Some(url)` makes the repository visible afterwards
    pub fn failing_create(url: Option<&str>) -> Self {
        Self {
            create_fails: true,
            visible_after_failed_create: url.is_some(),
            ..Self::scripted(url.unwrap_or_default())
        }
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn readme_calls(&self) -> u32 {
        self.readme_calls.load(Ordering::SeqCst)
    }

    fn info(&self) -> Option<RepoInfo> {
        Some(RepoInfo {
            url: self.url.clone(),
            is_empty: false,
        })
    }
}

#[async_trait]
impl GitOpsClient for ScriptedRepositoryApi {
    fn provider(&self) -> GitProvider {
        GitProvider::GitHub
    }

    async fn create_repository(&self, req: &ProviderRequest) -> RepositoryCreation {
        self.provisioner.provision(self, req).await
    }

    async fn commit_values(
        &self,
        _chart: &ChartConfig,
        _req: &ProviderRequest,
    ) -> Result<CommitResult, ProviderError> {
        Ok(CommitResult {
            hash: "0".repeat(40),
            committed_at: Some(Utc::now()),
        })
    }

    async fn get_repo_url(&self, _req: &ProviderRequest) -> Result<Option<RepoInfo>, ProviderError> {
        if self.exists {
            return Ok(self.info());
        }
        if self.create_calls() == 0 {
            return Ok(None);
        }
        if self.create_fails {
            return Ok(if self.visible_after_failed_create {
                self.info()
            } else {
                None
            });
        }
        let polls = self.polls_after_create.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((polls >= self.visible_after_polls).then(|| self.info()).flatten())
    }

    async fn delete_repository(&self, _req: &ProviderRequest) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn create_readme(&self, req: &ProviderRequest) -> Result<CommitResult, ProviderError> {
        self.readme_calls.fetch_add(1, Ordering::SeqCst);
        self.commit_values(&req.readme(), req).await
    }
}

#[async_trait]
impl RepositoryApi for ScriptedRepositoryApi {
    async fn create_remote_repository(&self, _req: &ProviderRequest) -> Result<RepoInfo, ProviderError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.create_fails {
            return Err(ProviderError::Api {
                provider: GitProvider::GitHub,
                message: "422 name already exists on this account".into(),
            });
        }
        Ok(RepoInfo {
            url: self.url.clone(),
            is_empty: true,
        })
    }
}

// ============================================================================
// Provider client
// ============================================================================

#[derive(Default)]
struct FakeClientState {
    repos: BTreeMap<String, bool>,
    commits: Vec<ChartConfig>,
    deleted: Vec<String>,
    requests: Vec<ProviderRequest>,
    commit_conflicts: u32,
    lookup_error: Option<ProviderError>,
    create_error: Option<ProviderError>,
    stage_errors: BTreeMap<Stage, String>,
    delete_fails: bool,
}

/// In-memory `GitOpsClient` serving repositories under `base_url`
pub struct FakeGitOpsClient {
    provider: GitProvider,
    base_url: String,
    state: Mutex<FakeClientState>,
}

impl FakeGitOpsClient {
    pub fn new(provider: GitProvider, base_url: &str) -> Self {
        Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            state: Mutex::new(FakeClientState::default()),
        }
    }

    pub fn github() -> Self {
        Self::new(GitProvider::GitHub, "https://github.com/acme")
    }

    pub fn repo_url(&self, name: &str) -> String {
        format!("{}/{}.git", self.base_url, name)
    }

    pub fn with_repo(self, name: &str) -> Self {
        self.state.lock().unwrap().repos.insert(name.to_string(), false);
        self
    }

    pub fn with_commit_conflicts(self, n: u32) -> Self {
        self.state.lock().unwrap().commit_conflicts = n;
        self
    }

    pub fn with_lookup_error(self, err: ProviderError) -> Self {
        self.state.lock().unwrap().lookup_error = Some(err);
        self
    }

    pub fn with_create_error(self, err: ProviderError) -> Self {
        self.state.lock().unwrap().create_error = Some(err);
        self
    }

    /// Fail a post-create stage (CloneHttp, CreateReadme or CloneSsh)
    pub fn with_stage_error(self, stage: Stage, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .stage_errors
            .insert(stage, message.to_string());
        self
    }

    pub fn with_failing_delete(self) -> Self {
        self.state.lock().unwrap().delete_fails = true;
        self
    }

    pub fn has_repo(&self, name: &str) -> bool {
        self.state.lock().unwrap().repos.contains_key(name)
    }

    pub fn commits(&self) -> Vec<ChartConfig> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Requests passed to `create_repository`
    pub fn create_requests(&self) -> Vec<ProviderRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Builder handing out this client for every config
    pub fn builder(client: Arc<FakeGitOpsClient>) -> ClientBuilder {
        Arc::new(move |_config: &GitOpsConfig, _helper: GitOpsHelper, _settings: &Settings| {
            Ok::<_, ProviderError>(client.clone() as Arc<dyn GitOpsClient>)
        })
    }
}

#[async_trait]
impl GitOpsClient for FakeGitOpsClient {
    fn provider(&self) -> GitProvider {
        self.provider
    }

    async fn create_repository(&self, req: &ProviderRequest) -> RepositoryCreation {
        let mut state = self.state.lock().unwrap();
        state.requests.push(req.clone());
        let mut outcome = StageOutcome::default();
        let name = req.git_repo_name.clone();

        if let Some(err) = &state.lookup_error {
            outcome.fail(Stage::GetRepoUrl, err.normalised());
            return RepositoryCreation {
                outcome,
                ..Default::default()
            };
        }
        if state.repos.contains_key(&name) {
            outcome.succeed(Stage::GetRepoUrl);
            return RepositoryCreation {
                url: self.repo_url(&name),
                is_new: false,
                is_empty: false,
                outcome,
            };
        }
        outcome.succeed(Stage::GetRepoUrl);
        if let Some(err) = &state.create_error {
            outcome.fail(Stage::CreateRepo, err.normalised());
            return RepositoryCreation {
                is_new: true,
                outcome,
                ..Default::default()
            };
        }
        state.repos.insert(name.clone(), true);
        outcome.succeed(Stage::CreateRepo);
        let created = |outcome| RepositoryCreation {
            url: self.repo_url(&name),
            is_new: true,
            is_empty: false,
            outcome,
        };
        for stage in [Stage::CloneHttp, Stage::CreateReadme, Stage::CloneSsh] {
            if let Some(message) = state.stage_errors.get(&stage) {
                outcome.fail(stage, message.clone());
                return created(outcome);
            }
            outcome.succeed(stage);
        }
        created(outcome)
    }

    async fn commit_values(
        &self,
        chart: &ChartConfig,
        _req: &ProviderRequest,
    ) -> Result<CommitResult, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.commit_conflicts > 0 {
            state.commit_conflicts -= 1;
            return Err(ProviderError::Conflict {
                provider: self.provider,
                message: "409 sha does not match".into(),
            });
        }
        state.commits.push(chart.clone());
        Ok(CommitResult {
            hash: format!("{:040x}", state.commits.len()),
            committed_at: Some(Utc::now()),
        })
    }

    async fn get_repo_url(&self, req: &ProviderRequest) -> Result<Option<RepoInfo>, ProviderError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = &state.lookup_error {
            return Err(err.clone());
        }
        Ok(state.repos.get(&req.git_repo_name).map(|empty| RepoInfo {
            url: self.repo_url(&req.git_repo_name),
            is_empty: *empty,
        }))
    }

    async fn delete_repository(&self, req: &ProviderRequest) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.delete_fails {
            return Err(ProviderError::Api {
                provider: self.provider,
                message: "403 must have admin rights to repository".into(),
            });
        }
        state.repos.remove(&req.git_repo_name);
        state.deleted.push(req.git_repo_name.clone());
        Ok(())
    }
}

// ============================================================================
// Argo CD
// ============================================================================

#[derive(Default)]
struct FakeArgoState {
    calls: Vec<String>,
    templates: Vec<RepoCredentialTemplate>,
    clusters: Vec<ClusterRegistration>,
    repositories: Vec<RepositoryRegistration>,
    patches: Vec<(String, serde_json::Value)>,
    register_failures: u32,
    sync_error: Option<ControllerError>,
}

/// Recording `ArgoCdClient`
#[derive(Default)]
pub struct FakeArgoCd {
    state: Mutex<FakeArgoState>,
}

impl FakeArgoCd {
    pub fn with_register_failures(self, n: u32) -> Self {
        self.state.lock().unwrap().register_failures = n;
        self
    }

    pub fn with_sync_error(self, err: ControllerError) -> Self {
        self.state.lock().unwrap().sync_error = Some(err);
        self
    }

    /// Call log, one `<operation> <subject>` entry per call
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn templates(&self) -> Vec<RepoCredentialTemplate> {
        self.state.lock().unwrap().templates.clone()
    }

    pub fn clusters(&self) -> Vec<ClusterRegistration> {
        self.state.lock().unwrap().clusters.clone()
    }

    pub fn repositories(&self) -> Vec<RepositoryRegistration> {
        self.state.lock().unwrap().repositories.clone()
    }

    pub fn patches(&self) -> Vec<(String, serde_json::Value)> {
        self.state.lock().unwrap().patches.clone()
    }
}

#[async_trait]
impl ArgoCdClient for FakeArgoCd {
    async fn upsert_repository_credential_template(
        &self,
        template: &RepoCredentialTemplate,
    ) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("repocreds {}", template.url));
        state.templates.push(template.clone());
        Ok(())
    }

    async fn upsert_certificate(&self, server_name: &str, _ca_cert: &str) -> Result<(), ControllerError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("certificate {}", server_name));
        Ok(())
    }

    async fn upsert_cluster(&self, cluster: &ClusterRegistration) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("cluster {}", cluster.name));
        state.clusters.push(cluster.clone());
        Ok(())
    }

    async fn register_repository(&self, repo: &RepositoryRegistration) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("repository {}", repo.repo));
        if state.register_failures > 0 {
            state.register_failures -= 1;
            return Err(ControllerError::new(
                ControllerCode::Unavailable,
                "repository server unavailable",
            ));
        }
        state.repositories.push(repo.clone());
        Ok(())
    }

    async fn patch_application(&self, name: &str, patch: &serde_json::Value) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("patch {}", name));
        state.patches.push((name.to_string(), patch.clone()));
        Ok(())
    }

    async fn sync_application(&self, name: &str) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("sync {}", name));
        match &state.sync_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn delete_application(&self, name: &str) -> Result<(), ControllerError> {
        self.state.lock().unwrap().calls.push(format!("delete {}", name));
        Ok(())
    }
}

// ============================================================================
// Kubernetes
// ============================================================================

#[derive(Default)]
struct FakeKubeState {
    secrets: BTreeMap<(String, String), Secret>,
    config_maps: BTreeMap<(String, String), ConfigMap>,
    objects: BTreeMap<(String, String, String), DynamicObject>,
    config_map_conflicts: u32,
    secret_conflicts: u32,
    version: u64,
    deleted: Vec<String>,
}

impl FakeKubeState {
    fn next_version(&mut self) -> Option<String> {
        self.version += 1;
        Some(self.version.to_string())
    }
}

/// In-memory `KubeObjects` with optimistic concurrency on resource versions
#[derive(Default)]
pub struct FakeKubeObjects {
    state: Mutex<FakeKubeState>,
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn conflict(kind: &str, name: &str) -> KubernetesError {
    KubernetesError::Conflict {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn missing(kind: &str, namespace: &str, name: &str) -> KubernetesError {
    KubernetesError::NotFound {
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

fn exists(kind: &str, namespace: &str, name: &str) -> KubernetesError {
    KubernetesError::AlreadyExists {
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

impl FakeKubeObjects {
    pub fn with_config_map(self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let resource_version = state.next_version();
            let cm = ConfigMap {
                metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    resource_version,
                    ..Default::default()
                },
                data: Some(
                    data.iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            };
            state.config_maps.insert(key(namespace, name), cm);
        }
        self
    }

    pub fn with_secret(self, namespace: &str, secret: Secret) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let mut secret = secret;
            secret.metadata.resource_version = state.next_version();
            let name = secret.metadata.name.clone().unwrap_or_default();
            state.secrets.insert(key(namespace, &name), secret);
        }
        self
    }

    /// Reject the next `n` config map updates with a version conflict
    pub fn with_config_map_conflicts(self, n: u32) -> Self {
        self.state.lock().unwrap().config_map_conflicts = n;
        self
    }

    /// Reject the next `n` secret updates with a version conflict
    pub fn with_secret_conflicts(self, n: u32) -> Self {
        self.state.lock().unwrap().secret_conflicts = n;
        self
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state.lock().unwrap().secrets.get(&key(namespace, name)).cloned()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn object(&self, kind: &str, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// `<kind>/<name>` of deleted objects, in order
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl KubeObjects for FakeKubeObjects {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, KubernetesError> {
        self.secret(namespace, name)
            .ok_or_else(|| missing("Secret", namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, KubernetesError> {
        let mut state = self.state.lock().unwrap();
        let name = secret.metadata.name.clone().unwrap_or_default();
        if state.secrets.contains_key(&key(namespace, &name)) {
            return Err(exists("Secret", namespace, &name));
        }
        let mut stored = secret.clone();
        stored.metadata.resource_version = state.next_version();
        state.secrets.insert(key(namespace, &name), stored.clone());
        Ok(stored)
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, KubernetesError> {
        let mut state = self.state.lock().unwrap();
        let name = secret.metadata.name.clone().unwrap_or_default();
        if state.secret_conflicts > 0 {
            state.secret_conflicts -= 1;
            return Err(conflict("Secret", &name));
        }
        let current = state
            .secrets
            .get(&key(namespace, &name))
            .ok_or_else(|| missing("Secret", namespace, &name))?;
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(conflict("Secret", &name));
        }
        let mut stored = secret.clone();
        stored.metadata.resource_version = state.next_version();
        state.secrets.insert(key(namespace, &name), stored.clone());
        Ok(stored)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, KubernetesError> {
        self.config_map(namespace, name)
            .ok_or_else(|| missing("ConfigMap", namespace, name))
    }

    async fn update_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, KubernetesError> {
        let mut state = self.state.lock().unwrap();
        let name = config_map.metadata.name.clone().unwrap_or_default();
        if state.config_map_conflicts > 0 {
            state.config_map_conflicts -= 1;
            return Err(conflict("ConfigMap", &name));
        }
        let current = state
            .config_maps
            .get(&key(namespace, &name))
            .ok_or_else(|| missing("ConfigMap", namespace, &name))?;
        if current.metadata.resource_version != config_map.metadata.resource_version {
            return Err(conflict("ConfigMap", &name));
        }
        let mut stored = config_map.clone();
        stored.metadata.resource_version = state.next_version();
        state.config_maps.insert(key(namespace, &name), stored.clone());
        Ok(stored)
    }

    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, KubernetesError> {
        self.object(&gvk.kind, namespace, name)
            .ok_or_else(|| missing(&gvk.kind, namespace, name))
    }

    async fn create_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, KubernetesError> {
        let mut state = self.state.lock().unwrap();
        let name = object.metadata.name.clone().unwrap_or_default();
        let k = (gvk.kind.clone(), namespace.to_string(), name.clone());
        if state.objects.contains_key(&k) {
            return Err(exists(&gvk.kind, namespace, &name));
        }
        let mut stored = object.clone();
        stored.metadata.resource_version = state.next_version();
        stored.metadata.uid = Some(format!("uid-{}", name));
        state.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn replace_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, KubernetesError> {
        let mut state = self.state.lock().unwrap();
        let name = object.metadata.name.clone().unwrap_or_default();
        let k = (gvk.kind.clone(), namespace.to_string(), name.clone());
        let current = state
            .objects
            .get(&k)
            .ok_or_else(|| missing(&gvk.kind, namespace, &name))?;
        if current.metadata.resource_version != object.metadata.resource_version {
            return Err(conflict(&gvk.kind, &name));
        }
        let mut stored = object.clone();
        stored.metadata.resource_version = state.next_version();
        state.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn delete_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), KubernetesError> {
        let mut state = self.state.lock().unwrap();
        let k = (gvk.kind.clone(), namespace.to_string(), name.to_string());
        if state.objects.remove(&k).is_none() {
            return Err(missing(&gvk.kind, namespace, name));
        }
        state.deleted.push(format!("{}/{}", gvk.kind, name));
        Ok(())
    }
}

/// Hands out one shared `FakeKubeObjects` for every cluster
pub struct FakeKubeProvider {
    pub objects: Arc<FakeKubeObjects>,
    clusters: Mutex<Vec<i32>>,
}

impl FakeKubeProvider {
    pub fn new(objects: Arc<FakeKubeObjects>) -> Self {
        Self {
            objects,
            clusters: Mutex::new(Vec::new()),
        }
    }

    /// Cluster ids requested through `objects_for`
    pub fn requested_clusters(&self) -> Vec<i32> {
        self.clusters.lock().unwrap().clone()
    }
}

#[async_trait]
impl KubeObjectsProvider for FakeKubeProvider {
    async fn objects_for(&self, cluster: &Cluster) -> Result<Arc<dyn KubeObjects>, KubernetesError> {
        self.clusters.lock().unwrap().push(cluster.id);
        Ok(self.objects.clone())
    }

    async fn controller_objects(&self) -> Result<Arc<dyn KubeObjects>, KubernetesError> {
        Ok(self.objects.clone())
    }
}

// ============================================================================
// Helm
// ============================================================================

/// Recording `HelmClient`
#[derive(Default)]
pub struct FakeHelm {
    installs: Mutex<Vec<HelmInstall>>,
    uninstalls: Mutex<Vec<(String, String)>>,
}

impl FakeHelm {
    pub fn installs(&self) -> Vec<HelmInstall> {
        self.installs.lock().unwrap().clone()
    }

    pub fn uninstalls(&self) -> Vec<(String, String)> {
        self.uninstalls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HelmClient for FakeHelm {
    async fn upgrade_install(&self, install: &HelmInstall, _cancel: &CancellationToken) -> Result<(), GitOpsError> {
        self.installs.lock().unwrap().push(install.clone());
        Ok(())
    }

    async fn uninstall(
        &self,
        release_name: &str,
        namespace: &str,
        _cluster: &Cluster,
        _cancel: &CancellationToken,
    ) -> Result<(), GitOpsError> {
        self.uninstalls
            .lock()
            .unwrap()
            .push((release_name.to_string(), namespace.to_string()));
        Ok(())
    }
}

// ============================================================================
// Service harness
// ============================================================================

/// Active GitHub config for org `acme`
pub fn github_config() -> GitOpsConfig {
    GitOpsConfig {
        provider: Some(GitProvider::GitHub),
        host: "https://github.com".into(),
        username: "bot".into(),
        token: "ghp_token".into(),
        github_org_id: "acme".into(),
        email_id: "ops@acme.io".into(),
        active: true,
        ..Default::default()
    }
}

/// Store, provider factory and read service wired over fakes
pub struct Harness {
    pub root: tempfile::TempDir,
    pub settings: Settings,
    pub store: Arc<MemoryStore>,
    pub executor: Arc<FakeGitExecutor>,
    pub client: Arc<FakeGitOpsClient>,
    pub factory: Arc<GitProviderFactory>,
    pub read: Arc<GitOpsConfigReadService>,
}

impl Harness {
    pub async fn new(active: Option<GitOpsConfig>, executor: FakeGitExecutor, client: FakeGitOpsClient) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut settings = test_settings(root.path());
        settings.git.repo_name_prefix = "devtron".into();
        let store = Arc::new(MemoryStore::new());
        store
            .mutate(|s| {
                if let Some(mut config) = active {
                    config.id = 1;
                    s.gitops_configs.push(config);
                }
                s.users.push(User {
                    id: 9,
                    email_id: "jane@acme.io".into(),
                });
            })
            .await;
        let executor = Arc::new(executor);
        let client = Arc::new(client);
        let factory = Arc::new(
            GitProviderFactory::with_builder(
                settings.clone(),
                executor.clone(),
                store.clone(),
                FakeGitOpsClient::builder(client.clone()),
            )
            .await
            .unwrap(),
        );
        let read = Arc::new(GitOpsConfigReadService::new(
            store.clone(),
            store.clone(),
            settings.git.clone(),
        ));
        Self {
            root,
            settings,
            store,
            executor,
            client,
            factory,
            read,
        }
    }

    /// Harness with the GitHub config active and default fakes
    pub async fn github() -> Self {
        Self::new(
            Some(github_config()),
            FakeGitExecutor::default(),
            FakeGitOpsClient::github(),
        )
        .await
    }

    pub fn repositories(&self) -> Repositories {
        Repositories::from_memory(self.store.clone())
    }

    pub fn git_operations(&self) -> Arc<GitOperationService> {
        Arc::new(GitOperationService::new(
            self.factory.clone(),
            self.read.clone(),
            self.settings.git.clone(),
        ))
    }
}
