//! Staged outcomes for repository provisioning and dry-run validation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Steps of repository provisioning and of the dry run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    GetRepoUrl,
    CreateRepo,
    CloneHttp,
    CreateReadme,
    CloneSsh,
    Clone,
    CommitOnRest,
    Push,
    DeleteRepo,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetRepoUrl => "GetRepoUrl",
            Self::CreateRepo => "CreateRepo",
            Self::CloneHttp => "CloneHttp",
            Self::CreateReadme => "CreateReadme",
            Self::CloneSsh => "CloneSsh",
            Self::Clone => "Clone",
            Self::CommitOnRest => "CommitOnRest",
            Self::Push => "Push",
            Self::DeleteRepo => "DeleteRepo",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage record of a multi-step provider operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Stages that completed, in execution order
    pub successful: Vec<Stage>,
    /// Normalised error message per failed stage
    pub errors: BTreeMap<Stage, String>,
}

impl StageOutcome {
    pub fn succeed(&mut self, stage: Stage) {
        self.successful.push(stage);
    }

    pub fn fail(&mut self, stage: Stage, message: impl Into<String>) {
        self.errors.insert(stage, message.into());
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// First failed stage in execution order
    pub fn first_error(&self) -> Option<(Stage, &str)> {
        self.errors.iter().next().map(|(s, m)| (*s, m.as_str()))
    }
}

/// Dry-run report returned to clients
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedValidationResponse {
    pub successful_stages: Vec<String>,
    pub stage_error_map: BTreeMap<String, String>,
    pub validated_on: Option<DateTime<Utc>>,
    pub delete_repo_failed: bool,
    pub validation_skipped: bool,
}

impl DetailedValidationResponse {
    pub fn skipped() -> Self {
        Self {
            validation_skipped: true,
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.stage_error_map.is_empty()
    }

    pub fn from_outcome(outcome: &StageOutcome) -> Self {
        Self {
            successful_stages: outcome.successful.iter().map(|s| s.to_string()).collect(),
            stage_error_map: outcome
                .errors
                .iter()
                .map(|(s, m)| (s.to_string(), m.clone()))
                .collect(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_follows_stage_order() {
        let mut outcome = StageOutcome::default();
        outcome.succeed(Stage::GetRepoUrl);
        outcome.fail(Stage::CloneSsh, "ssh");
        outcome.fail(Stage::CloneHttp, "http");
        assert_eq!(outcome.first_error(), Some((Stage::CloneHttp, "http")));
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_response_serialisation() {
        let mut outcome = StageOutcome::default();
        outcome.succeed(Stage::GetRepoUrl);
        outcome.fail(Stage::CreateRepo, "github client error: 422");
        let json = serde_json::to_value(DetailedValidationResponse::from_outcome(&outcome)).unwrap();
        assert_eq!(json["successfulStages"][0], "GetRepoUrl");
        assert_eq!(json["stageErrorMap"]["CreateRepo"], "github client error: 422");
        assert_eq!(json["validationSkipped"], false);
    }
}
