//! GitOps provider configuration
//!
//! A `GitOpsConfig` describes one Git hosting account the platform may use
//! for chart repositories. At most one record is active at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Supported Git hosting providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GitProvider {
    #[serde(rename = "GITHUB")]
    GitHub,
    #[serde(rename = "GITLAB")]
    GitLab,
    #[serde(rename = "BITBUCKET_CLOUD")]
    BitbucketCloud,
    #[serde(rename = "AZURE_DEVOPS")]
    AzureDevOps,
}

impl GitProvider {
    /// Wire identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "GITHUB",
            Self::GitLab => "GITLAB",
            Self::BitbucketCloud => "BITBUCKET_CLOUD",
            Self::AzureDevOps => "AZURE_DEVOPS",
        }
    }

    /// Human-readable name used in validation messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::GitHub => "GitHub",
            Self::GitLab => "GitLab",
            Self::BitbucketCloud => "Bitbucket",
            Self::AzureDevOps => "Azure DevOps",
        }
    }

    /// Prefix applied to every error surfaced from this provider
    pub fn error_prefix(&self) -> &'static str {
        match self {
            Self::GitHub => "github client error",
            Self::GitLab => "gitlab client error",
            Self::BitbucketCloud => "bitbucket client error",
            Self::AzureDevOps => "azure devops client error",
        }
    }

    /// Polling budget for HTTP availability after repo creation
    pub fn http_availability_attempts(&self) -> u32 {
        match self {
            Self::GitHub | Self::GitLab => 3,
            Self::BitbucketCloud | Self::AzureDevOps => 5,
        }
    }

    /// Polling budget for clone availability after the README is seeded
    pub fn clone_availability_attempts(&self) -> u32 {
        match self {
            Self::GitHub | Self::GitLab => 3,
            Self::BitbucketCloud => 5,
            Self::AzureDevOps => 8,
        }
    }
}

impl fmt::Display for GitProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GitProvider {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GITHUB" => Ok(Self::GitHub),
            "GITLAB" => Ok(Self::GitLab),
            "BITBUCKET_CLOUD" | "BITBUCKET" => Ok(Self::BitbucketCloud),
            "AZURE_DEVOPS" => Ok(Self::AzureDevOps),
            other => Err(ValidationError::InvalidRequest(format!(
                "unsupported git provider '{}'",
                other
            ))),
        }
    }
}

/// Optional client TLS material for the Git host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsMaterial {
    /// PEM CA bundle trusted for the host
    #[serde(default)]
    pub ca_cert: String,
    /// PEM client certificate
    #[serde(default)]
    pub tls_cert: String,
    /// PEM client key
    #[serde(default)]
    pub tls_key: String,
}

impl TlsMaterial {
    pub fn is_empty(&self) -> bool {
        self.ca_cert.is_empty() && self.tls_cert.is_empty() && self.tls_key.is_empty()
    }

    pub fn has_client_pair(&self) -> bool {
        !self.tls_cert.is_empty() && !self.tls_key.is_empty()
    }
}

/// A Git hosting account usable for GitOps repositories
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsConfig {
    #[serde(default)]
    pub id: i32,
    pub provider: Option<GitProvider>,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub github_org_id: String,
    #[serde(default)]
    pub gitlab_group_id: String,
    #[serde(default)]
    pub azure_project_name: String,
    #[serde(default)]
    pub bitbucket_workspace_id: String,
    #[serde(default)]
    pub bitbucket_project_key: String,
    /// Committer email used when the acting user has none
    #[serde(default)]
    pub email_id: String,
    #[serde(default)]
    pub allow_custom_repository: bool,
    #[serde(default, rename = "enableTLSVerification")]
    pub enable_tls_verification: bool,
    #[serde(default)]
    pub tls: TlsMaterial,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: i32,
    #[serde(default)]
    pub updated_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: i32,
}

impl GitOpsConfig {
    /// Provider of this record, or a validation error if unset
    pub fn provider(&self) -> Result<GitProvider, ValidationError> {
        self.provider
            .ok_or_else(|| ValidationError::InvalidRequest("provider is required".to_string()))
    }

    /// Enforce the TLS completeness rules, clearing material when TLS is off
    pub fn validate_tls(&mut self) -> Result<(), ValidationError> {
        if !self.enable_tls_verification {
            self.tls = TlsMaterial::default();
            return Ok(());
        }
        let tls = &self.tls;
        if tls.tls_cert.is_empty() != tls.tls_key.is_empty() {
            return Err(ValidationError::TlsMaterialIncomplete {
                message: "both TLS cert and TLS key are required when either is provided"
                    .to_string(),
            });
        }
        if tls.ca_cert.is_empty() && !tls.has_client_pair() {
            return Err(ValidationError::TlsMaterialIncomplete {
                message: "TLS verification is enabled but neither a CA cert nor a TLS cert/key pair was provided".to_string(),
            });
        }
        Ok(())
    }

    /// Fill secrets the client never receives back from the stored record
    pub fn fill_secrets_from(&mut self, existing: &GitOpsConfig) {
        if self.token.is_empty() {
            self.token = existing.token.clone();
        }
        if self.enable_tls_verification {
            if self.tls.ca_cert.is_empty() {
                self.tls.ca_cert = existing.tls.ca_cert.clone();
            }
            if self.tls.tls_cert.is_empty() {
                self.tls.tls_cert = existing.tls.tls_cert.clone();
            }
            if self.tls.tls_key.is_empty() {
                self.tls.tls_key = existing.tls.tls_key.clone();
            }
        }
    }

    /// Copy safe to return from a read API
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.token = String::new();
        copy.tls.tls_key = String::new();
        copy
    }

    /// TLS material to hand to git transports, if verification is on
    pub fn tls_material(&self) -> Option<TlsMaterial> {
        (self.enable_tls_verification && !self.tls.is_empty()).then(|| self.tls.clone())
    }

    /// Scope word and value named in organisational-mismatch errors
    pub fn organisation_scope(&self) -> (&'static str, &str) {
        match self.provider {
            Some(GitProvider::GitHub) | None => ("organization", &self.github_org_id),
            Some(GitProvider::GitLab) => ("group", &self.gitlab_group_id),
            Some(GitProvider::BitbucketCloud) => ("workspace", &self.bitbucket_workspace_id),
            Some(GitProvider::AzureDevOps) => ("project", &self.azure_project_name),
        }
    }

    /// Build the organisational-mismatch validation error for this config
    pub fn organisation_mismatch(&self) -> ValidationError {
        let (scope, value) = self.organisation_scope();
        ValidationError::OrganisationMismatch {
            provider: self
                .provider
                .map(|p| p.display_name())
                .unwrap_or("GitOps")
                .to_string(),
            scope: scope.to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls_config(ca: &str, cert: &str, key: &str) -> GitOpsConfig {
        GitOpsConfig {
            provider: Some(GitProvider::GitHub),
            enable_tls_verification: true,
            tls: TlsMaterial {
                ca_cert: ca.into(),
                tls_cert: cert.into(),
                tls_key: key.into(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_tls_half_pair_rejected() {
        let mut cfg = tls_config("ca", "cert", "");
        assert!(matches!(
            cfg.validate_tls(),
            Err(ValidationError::TlsMaterialIncomplete { .. })
        ));
        let mut cfg = tls_config("", "", "key");
        assert!(cfg.validate_tls().is_err());
    }

    #[test]
    fn test_tls_requires_ca_or_pair() {
        assert!(tls_config("", "", "").validate_tls().is_err());
        assert!(tls_config("ca", "", "").validate_tls().is_ok());
        assert!(tls_config("", "cert", "key").validate_tls().is_ok());
    }

    #[test]
    fn test_tls_disabled_clears_material() {
        let mut cfg = tls_config("ca", "cert", "key");
        cfg.enable_tls_verification = false;
        cfg.validate_tls().unwrap();
        assert!(cfg.tls.is_empty());
        assert!(cfg.tls_material().is_none());
    }

    #[test]
    fn test_fill_secrets_keeps_existing_token() {
        let stored = GitOpsConfig {
            token: "ghp_secret".into(),
            ..tls_config("ca", "cert", "key")
        };
        let mut update = tls_config("", "", "");
        update.fill_secrets_from(&stored);
        assert_eq!(update.token, "ghp_secret");
        assert_eq!(update.tls, stored.tls);
    }

    #[test]
    fn test_redacted_strips_secrets() {
        let cfg = GitOpsConfig {
            token: "t".into(),
            ..tls_config("ca", "cert", "key")
        };
        let redacted = cfg.redacted();
        assert!(redacted.token.is_empty());
        assert!(redacted.tls.tls_key.is_empty());
        assert_eq!(redacted.tls.ca_cert, "ca");
    }

    #[test]
    fn test_provider_parse_and_serde() {
        assert_eq!("github".parse::<GitProvider>().unwrap(), GitProvider::GitHub);
        assert_eq!(
            serde_json::to_string(&GitProvider::BitbucketCloud).unwrap(),
            "\"BITBUCKET_CLOUD\""
        );
        assert!("svn".parse::<GitProvider>().is_err());
    }
}
