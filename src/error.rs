//! Centralized error types for the GitOps core
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.
//! Every error maps to an HTTP status plus a user-facing and an
//! internal message so collaborators can render it without
//! inspecting variants.

use serde::Serialize;
use thiserror::Error;

use crate::domain::gitops_config::GitProvider;
use crate::domain::stage::Stage;

/// Result alias used by the services layer
pub type GitOpsResult<T> = std::result::Result<T, GitOpsError>;

/// Top-level error type for GitOps operations
#[derive(Error, Debug)]
pub enum GitOpsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] KubernetesError),

    #[error("Helm error: {0}")]
    Helm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Fatal(String),
}

/// Input violates a documented precondition. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("GitOps is not configured, please configure GitOps in global configurations")]
    GitOpsNotConfigured,

    #[error("{message}")]
    TlsMaterialIncomplete { message: String },

    #[error("custom repository is not allowed, enable 'allow custom repository' in global configurations > GitOps")]
    CustomRepositoryDisabled,

    #[error("The repository must belong to {provider} {scope} {value} as configured in global configurations > GitOps")]
    OrganisationMismatch {
        provider: String,
        scope: String,
        value: String,
    },

    #[error("invalid git repository! '{url}' is already in use by another application! Use a different repository")]
    RepositoryInUse { url: String },

    #[error("no active config found, please ensure atleast on gitops config active")]
    NoActiveConfig,

    #[error("{0}")]
    InvalidRequest(String),
}

/// Persistence errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} conflict: {message}")]
    Conflict {
        entity: &'static str,
        message: String,
    },

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Git hosting provider errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} resource not found: {resource}")]
    NotFound {
        provider: GitProvider,
        resource: String,
    },

    /// 409-equivalent. Callers retry with a fresh read.
    #[error("{provider} conflict: {message}")]
    Conflict {
        provider: GitProvider,
        message: String,
    },

    #[error("{provider} transient failure: {message}")]
    Transient {
        provider: GitProvider,
        message: String,
    },

    #[error("{provider} api error: {message}")]
    Api {
        provider: GitProvider,
        message: String,
    },

    #[error("GitOps is not configured, please configure GitOps in global configurations")]
    NotConfigured,

    #[error("unable to validate project:{repo} in given time")]
    AvailabilityTimeout { repo: String },

    #[error("operation cancelled")]
    Cancelled,

    /// Staged repository creation failed; `message` is already normalised
    #[error("{message}")]
    StageFailed { stage: Stage, message: String },
}

impl ProviderError {
    /// Whether a caller may retry the same call
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Transient { .. })
    }

    /// Provider-prefixed message shown in dry-run stages and API responses
    pub fn normalised(&self) -> String {
        match self {
            Self::NotFound { provider, .. }
            | Self::Conflict { provider, .. }
            | Self::Transient { provider, .. }
            | Self::Api { provider, .. } => {
                format!("{}: {}", provider.error_prefix(), self.detail())
            }
            other => other.to_string(),
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::NotFound { resource, .. } => format!("not found: {}", resource),
            Self::Conflict { message, .. }
            | Self::Transient { message, .. }
            | Self::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Remote rejected the push because the branch moved
    #[error("push conflict: failed to push some refs")]
    PushConflict,

    #[error("git command timed out after {seconds}s: {command}")]
    Timeout { command: String, seconds: u64 },

    #[error("git operation cancelled")]
    Cancelled,

    #[error("libgit2: {0}")]
    Library(#[from] git2::Error),

    #[error("git io: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Whether the failure happened talking to the remote rather than committing locally
    pub fn is_push_failure(&self) -> bool {
        match self {
            Self::PushConflict => true,
            Self::CommandFailed { command, .. } => command.starts_with("git push"),
            Self::Library(e) => matches!(
                e.class(),
                git2::ErrorClass::Net | git2::ErrorClass::Http | git2::ErrorClass::Ssh
            ),
            _ => false,
        }
    }
}

/// gRPC-style status codes returned by the GitOps controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControllerCode {
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    DeadlineExceeded,
    Canceled,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    Unavailable,
    Internal,
    Unknown,
}

impl ControllerCode {
    /// Parse the numeric gRPC code carried in controller error bodies
    pub fn from_grpc(code: i64) -> Self {
        match code {
            1 => Self::Canceled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            9 => Self::FailedPrecondition,
            13 => Self::Internal,
            14 => Self::Unavailable,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidArgument => 409,
            Self::NotFound => 404,
            Self::FailedPrecondition => 412,
            Self::DeadlineExceeded => 408,
            Self::Canceled => 499,
            _ => 500,
        }
    }
}

/// GitOps controller rejected the desired state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code:?})")]
pub struct ControllerError {
    pub code: ControllerCode,
    pub message: String,
}

impl ControllerError {
    pub fn new(code: ControllerCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Kubernetes errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KubernetesError {
    #[error("{kind} {name} not found in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    #[error("{kind} {name} already exists in namespace {namespace}")]
    AlreadyExists {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Optimistic concurrency failure on resourceVersion
    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: String, name: String },

    #[error("kubernetes api failure: {0}")]
    Api(String),
}

impl KubernetesError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl GitOpsError {
    /// HTTP status surfaced to collaborators
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(v) => match v {
                ValidationError::GitOpsNotConfigured
                | ValidationError::TlsMaterialIncomplete { .. } => 412,
                ValidationError::CustomRepositoryDisabled => 409,
                ValidationError::OrganisationMismatch { .. }
                | ValidationError::RepositoryInUse { .. }
                | ValidationError::NoActiveConfig
                | ValidationError::InvalidRequest(_) => 400,
            },
            Self::Store(StoreError::NotFound { .. }) => 404,
            Self::Store(StoreError::Conflict { .. }) => 409,
            Self::Provider(ProviderError::NotConfigured) => 412,
            Self::Provider(ProviderError::NotFound { .. }) => 404,
            Self::Controller(c) => c.code.http_status(),
            Self::Kubernetes(KubernetesError::NotFound { .. }) => 404,
            _ => 500,
        }
    }

    /// UI-safe message
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(v) => v.to_string(),
            Self::Provider(p) => p.normalised(),
            Self::Store(StoreError::NotFound { entity, .. }) => format!("{} not found", entity),
            Self::Controller(c) => c.message.clone(),
            _ => "internal error, please retry or contact your administrator".to_string(),
        }
    }

    /// Log-only message with full detail
    pub fn internal_message(&self) -> String {
        match self {
            Self::Provider(p) => p.normalised(),
            other => other.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::NotFound { .. })
                | Self::Provider(ProviderError::NotFound { .. })
                | Self::Kubernetes(KubernetesError::NotFound { .. })
        )
    }

    /// Error-response body for HTTP collaborators
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.http_status(),
            user_message: self.user_message(),
            internal_message: self.internal_message(),
        }
    }
}

/// Serialisable error body
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: u16,
    pub user_message: String,
    pub internal_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_status_codes() {
        let cases = [
            (ValidationError::GitOpsNotConfigured, 412),
            (
                ValidationError::TlsMaterialIncomplete {
                    message: "x".into(),
                },
                412,
            ),
            (ValidationError::CustomRepositoryDisabled, 409),
            (ValidationError::NoActiveConfig, 400),
            (
                ValidationError::RepositoryInUse {
                    url: "https://x".into(),
                },
                400,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(GitOpsError::from(err).http_status(), status);
        }
    }

    #[test]
    fn test_controller_code_mapping() {
        assert_eq!(ControllerCode::from_grpc(3).http_status(), 409);
        assert_eq!(ControllerCode::from_grpc(5).http_status(), 404);
        assert_eq!(ControllerCode::from_grpc(9).http_status(), 412);
        assert_eq!(ControllerCode::from_grpc(4).http_status(), 408);
        assert_eq!(ControllerCode::from_grpc(1).http_status(), 499);
        assert_eq!(ControllerCode::from_grpc(13).http_status(), 500);
    }

    #[test]
    fn test_provider_error_normalisation() {
        let err = ProviderError::Api {
            provider: GitProvider::GitLab,
            message: "403 Forbidden".into(),
        };
        assert_eq!(err.normalised(), "gitlab client error: 403 Forbidden");

        let err = ProviderError::Conflict {
            provider: GitProvider::AzureDevOps,
            message: "stale".into(),
        };
        assert!(err.is_retryable());
        assert!(err.normalised().starts_with("azure devops client error: "));
    }

    #[test]
    fn test_push_failure_classification() {
        assert!(GitError::PushConflict.is_push_failure());
        assert!(GitError::CommandFailed {
            command: "git push origin HEAD:refs/heads/master".into(),
            stderr: "denied".into(),
        }
        .is_push_failure());
        assert!(!GitError::CommandFailed {
            command: "git commit -m x".into(),
            stderr: "nothing".into(),
        }
        .is_push_failure());
    }

    #[test]
    fn test_organisation_mismatch_message() {
        let err = ValidationError::OrganisationMismatch {
            provider: "GitHub".into(),
            scope: "organization".into(),
            value: "acme".into(),
        };
        assert_eq!(
            err.to_string(),
            "The repository must belong to GitHub organization acme as configured in global configurations > GitOps"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: GitOpsError = StoreError::NotFound {
            entity: "deployment config",
            key: "1/2".into(),
        }
        .into();
        assert!(matches!(err, GitOpsError::Store(_)));
        assert!(err.is_not_found());
        let body = err.to_response();
        assert_eq!(body.code, 404);
        assert_eq!(body.user_message, "deployment config not found");
    }
}
