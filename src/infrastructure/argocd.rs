//! Argo CD API client
//!
//! Credential templates, host certificates, clusters, repositories and
//! application patch/sync/delete over the Argo CD REST gateway. Error bodies
//! carry a gRPC status code which is mapped onto `ControllerCode`.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ControllerSettings;
use crate::error::{ControllerCode, ControllerError};

/// Credential template matched by URL prefix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoCredentialTemplate {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_client_cert_data: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_client_cert_key: String,
}

/// Cluster registration payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterRegistration {
    pub name: String,
    pub server: String,
    pub bearer_token: String,
    pub insecure: bool,
}

/// Repository registration payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryRegistration {
    pub repo: String,
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait ArgoCdClient: Send + Sync {
    async fn upsert_repository_credential_template(
        &self,
        template: &RepoCredentialTemplate,
    ) -> Result<(), ControllerError>;

    /// Trust `ca_cert` for `server_name`
    async fn upsert_certificate(&self, server_name: &str, ca_cert: &str) -> Result<(), ControllerError>;

    async fn upsert_cluster(&self, cluster: &ClusterRegistration) -> Result<(), ControllerError>;

    async fn register_repository(&self, repo: &RepositoryRegistration) -> Result<(), ControllerError>;

    /// Merge-patch an application
    async fn patch_application(&self, name: &str, patch: &serde_json::Value) -> Result<(), ControllerError>;

    async fn sync_application(&self, name: &str) -> Result<(), ControllerError>;

    async fn delete_application(&self, name: &str) -> Result<(), ControllerError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: String,
}

/// Code from the HTTP status when the body carries none
fn code_from_status(status: StatusCode) -> ControllerCode {
    match status {
        StatusCode::BAD_REQUEST => ControllerCode::InvalidArgument,
        StatusCode::NOT_FOUND => ControllerCode::NotFound,
        StatusCode::CONFLICT => ControllerCode::AlreadyExists,
        StatusCode::PRECONDITION_FAILED => ControllerCode::FailedPrecondition,
        StatusCode::UNAUTHORIZED => ControllerCode::Unauthenticated,
        StatusCode::FORBIDDEN => ControllerCode::PermissionDenied,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ControllerCode::DeadlineExceeded,
        StatusCode::SERVICE_UNAVAILABLE => ControllerCode::Unavailable,
        s if s.is_server_error() => ControllerCode::Internal,
        _ => ControllerCode::Unknown,
    }
}

/// Parse an error response into a `ControllerError`
pub fn controller_error(status: StatusCode, body: &str) -> ControllerError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => {
            let code = parsed
                .code
                .map(ControllerCode::from_grpc)
                .unwrap_or_else(|| code_from_status(status));
            let message = if parsed.message.is_empty() {
                parsed.error
            } else {
                parsed.message
            };
            ControllerError::new(code, message)
        }
        Err(_) => ControllerError::new(code_from_status(status), body.trim()),
    }
}

/// `ArgoCdClient` over the REST gateway
pub struct ArgoCdRestClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ArgoCdRestClient {
    pub fn new(settings: &ControllerSettings) -> Result<Self, ControllerError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(settings.insecure)
            .build()
            .map_err(|e| ControllerError::new(ControllerCode::Internal, e.to_string()))?;
        Ok(Self {
            http,
            base_url: settings.url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}/api/v1{}", self.base_url, path));
        if self.token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.token)
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<(), ControllerError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ControllerError::new(ControllerCode::Unavailable, e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(controller_error(status, &body))
    }
}

#[async_trait]
impl ArgoCdClient for ArgoCdRestClient {
    async fn upsert_repository_credential_template(
        &self,
        template: &RepoCredentialTemplate,
    ) -> Result<(), ControllerError> {
        info!(url = %template.url, "Upserting repository credential template");
        self.send(
            self.request(Method::POST, "/repocreds")
                .query(&[("upsert", "true")])
                .json(template),
        )
        .await
    }

    async fn upsert_certificate(&self, server_name: &str, ca_cert: &str) -> Result<(), ControllerError> {
        info!(server = %server_name, "Upserting host certificate");
        let body = serde_json::json!({
            "items": [{
                "serverName": server_name,
                "certType": "https",
                "certData": base64::engine::general_purpose::STANDARD.encode(ca_cert.as_bytes()),
            }]
        });
        self.send(
            self.request(Method::POST, "/certificates")
                .query(&[("upsert", "true")])
                .json(&body),
        )
        .await
    }

    async fn upsert_cluster(&self, cluster: &ClusterRegistration) -> Result<(), ControllerError> {
        info!(cluster = %cluster.name, "Upserting cluster");
        let body = serde_json::json!({
            "name": cluster.name,
            "server": cluster.server,
            "config": {
                "bearerToken": cluster.bearer_token,
                "tlsClientConfig": { "insecure": cluster.insecure },
            }
        });
        self.send(
            self.request(Method::POST, "/clusters")
                .query(&[("upsert", "true")])
                .json(&body),
        )
        .await
    }

    async fn register_repository(&self, repo: &RepositoryRegistration) -> Result<(), ControllerError> {
        debug!(repo = %repo.repo, "Registering repository");
        let body = serde_json::json!({
            "repo": repo.repo,
            "username": repo.username,
            "password": repo.password,
            "type": "git",
        });
        self.send(
            self.request(Method::POST, "/repositories")
                .query(&[("upsert", "true")])
                .json(&body),
        )
        .await
    }

    async fn patch_application(&self, name: &str, patch: &serde_json::Value) -> Result<(), ControllerError> {
        let body = serde_json::json!({
            "name": name,
            "patch": patch.to_string(),
            "patchType": "merge",
        });
        self.send(
            self.request(Method::PATCH, &format!("/applications/{}", name))
                .json(&body),
        )
        .await
    }

    async fn sync_application(&self, name: &str) -> Result<(), ControllerError> {
        self.send(
            self.request(Method::POST, &format!("/applications/{}/sync", name))
                .json(&serde_json::json!({ "name": name })),
        )
        .await
    }

    async fn delete_application(&self, name: &str) -> Result<(), ControllerError> {
        self.send(
            self.request(Method::DELETE, &format!("/applications/{}", name))
                .query(&[("cascade", "true")]),
        )
        .await
    }
}
