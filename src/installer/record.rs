// src/installer/record.rs

//! Deployment run state
//!
//! A [`DeploymentRecord`] is created once per deploy call and mutated in
//! place by the worker that executes it. Status moves strictly forward:
//!
//! ```text
//! pending -> validating -> scanning -> running -> completed | failed
//!                                          (any non-terminal) -> cancelled
//! completed -> rolling_back -> rolled_back | partially_rolled_back | rollback_failed
//! ```

use crate::recipe::{ParameterValues, Recipe, ResourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Validating,
    Scanning,
    Running,
    Completed,
    Failed,
    Cancelled,
    RollingBack,
    RolledBack,
    PartiallyRolledBack,
    RollbackFailed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Scanning => "scanning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
            Self::PartiallyRolledBack => "partially_rolled_back",
            Self::RollbackFailed => "rollback_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "validating" => Self::Validating,
            "scanning" => Self::Scanning,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "rolling_back" => Self::RollingBack,
            "rolled_back" => Self::RolledBack,
            "partially_rolled_back" => Self::PartiallyRolledBack,
            "rollback_failed" => Self::RollbackFailed,
            _ => return None,
        })
    }

    /// Whether the worker has finished with this deployment
    ///
    /// `completed` counts as terminal even though a rollback may follow.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Pending | Self::Validating | Self::Scanning | Self::Running | Self::RollingBack
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a deployment's audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStep {
    /// `verify_signature`, `security_scan`, `resolve_dependencies`,
    /// `deploy_<kind>`, `cancelled` or `error`
    pub name: String,
    pub resource_name: Option<String>,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl DeploymentStep {
    /// A step that starts running now
    pub fn start(name: impl Into<String>, resource_name: Option<&str>) -> Self {
        Self {
            name: name.into(),
            resource_name: resource_name.map(str::to_string),
            status: StepStatus::Running,
            started_at: Some(Utc::now()),
            completed_at: None,
            output: None,
            error: None,
        }
    }

    pub fn complete(&mut self, output: impl Into<String>) {
        self.finish(StepStatus::Completed);
        self.output = Some(output.into());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.finish(StepStatus::Failed);
        self.error = Some(error.into());
    }

    pub fn skip(&mut self, output: impl Into<String>) {
        self.finish(StepStatus::Skipped);
        self.output = Some(output.into());
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// Outcome of rolling back one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackOutcome {
    Success,
    Failed,
    Skipped,
}

impl RollbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rollback audit entry for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub resource_name: String,
    pub kind: ResourceKind,
    pub outcome: RollbackOutcome,
    pub message: String,
}

/// One installation attempt
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub recipe: Recipe,
    /// Values as supplied by the caller, before defaults
    pub parameters: ParameterValues,
    pub status: DeploymentStatus,
    pub steps: Vec<DeploymentStep>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub rollback_available: bool,
    pub namespace: Option<String>,
    /// Non-fatal problems, e.g. parameter validation findings
    pub warnings: Vec<String>,
    pub rollback_log: Vec<RollbackEntry>,
}

impl DeploymentRecord {
    pub fn new(
        id: impl Into<String>,
        recipe: Recipe,
        parameters: ParameterValues,
        namespace: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            recipe,
            parameters,
            status: DeploymentStatus::Pending,
            steps: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            rollback_available: false,
            namespace,
            warnings: Vec::new(),
            rollback_log: Vec::new(),
        }
    }

    /// Steps that deployed a resource, in deployment order
    pub fn deployed_resources(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .filter_map(|s| s.resource_name.as_deref())
            .collect()
    }

    /// Steps named `name`
    pub fn steps_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DeploymentStep> + 'a {
        self.steps.iter().filter(move |s| s.name == name)
    }

    /// Most recent step, if any
    pub fn current_step(&self) -> Option<&DeploymentStep> {
        self.steps.last()
    }

    pub(crate) fn last_step_mut(&mut self) -> Option<&mut DeploymentStep> {
        self.steps.last_mut()
    }

    /// Mark the deployment failed with `error`
    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.status = DeploymentStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names_roundtrip() {
        for status in [
            DeploymentStatus::Pending,
            DeploymentStatus::Running,
            DeploymentStatus::PartiallyRolledBack,
            DeploymentStatus::RollbackFailed,
        ] {
            assert_eq!(DeploymentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DeploymentStatus::parse("bogus"), None);
        assert_eq!(
            serde_json::to_string(&DeploymentStatus::RolledBack).unwrap(),
            "\"rolled_back\""
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!DeploymentStatus::Scanning.is_terminal());
        assert!(!DeploymentStatus::RollingBack.is_terminal());
        assert!(DeploymentStatus::Completed.is_terminal());
        assert!(DeploymentStatus::Cancelled.is_terminal());
        assert!(DeploymentStatus::RollbackFailed.is_terminal());
    }

    #[test]
    fn test_deployed_resources() {
        let recipe = Recipe::new("app", "1.0", "p", "d");
        let mut record = DeploymentRecord::new("id", recipe, ParameterValues::new(), None);

        let mut verify = DeploymentStep::start("verify_signature", None);
        verify.complete("ok");
        let mut web = DeploymentStep::start("deploy_helm", Some("web"));
        web.complete("deployed");
        let mut cfg = DeploymentStep::start("deploy_kustomize", Some("cfg"));
        cfg.skip("No handler for kustomize");
        record.steps = vec![verify, web, cfg];

        assert_eq!(record.deployed_resources(), vec!["web"]);
        assert_eq!(record.steps_named("deploy_helm").count(), 1);
        assert_eq!(record.current_step().unwrap().status, StepStatus::Skipped);
    }
}
