// Outcomes reported back to the caller

use serde::Serialize;

use crate::installation::requirements::RequirementIssue;
use crate::models::state::InstallPhase;

/// Result of testing candidate database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DbValidation {
    Valid,
    Invalid { reason: String },
}

impl DbValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, DbValidation::Valid)
    }
}

/// Result of `provision_schema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// Settings did not validate; nothing was written or run.
    Rejected { reason: String },
    /// Settings persisted, migrations and seed applied.
    Provisioned { prefix: String },
}

impl ProvisionOutcome {
    pub fn is_provisioned(&self) -> bool {
        matches!(self, ProvisionOutcome::Provisioned { .. })
    }
}

/// Requirement check as shown to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct RequirementsReport {
    pub passed: bool,
    pub issues: Vec<RequirementIssue>,
    pub messages: Vec<String>,
}

impl RequirementsReport {
    pub fn from_issues(issues: Vec<RequirementIssue>) -> Self {
        Self {
            passed: issues.is_empty(),
            messages: issues.iter().map(|i| i.to_string()).collect(),
            issues,
        }
    }
}

/// Summary of a completed install.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub table_prefix: String,
    pub phase: InstallPhase,
    pub duration_ms: u128,
}

/// Progress notification emitted between install steps.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub phase: InstallPhase,
    pub step: String,
    pub percent: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u128>,
}
